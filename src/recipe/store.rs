use super::definition::{PlaylistType, Recipe};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const REGISTRY_FILE: &str = "registry.json";

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("no recipe registered for playlist type '{0}'")]
    NotRegistered(PlaylistType),

    #[error("recipe '{0}' version '{1}' is not loaded")]
    UnknownVersion(PlaylistType, String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid registry {path}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A recipe file that failed to parse or validate
#[derive(Debug, Clone)]
pub struct RejectedRecipe {
    pub source: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipeSummary {
    pub playlist_type: PlaylistType,
    pub version: String,
    pub description: String,
    pub current: bool,
    pub uses_ai: bool,
}

/// Registry of validated recipes keyed by `(type, version)`.
///
/// Loaded once at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct RecipeStore {
    recipes: HashMap<(PlaylistType, String), Arc<Recipe>>,
    current: HashMap<PlaylistType, String>,
    rejected: Vec<RejectedRecipe>,
}

impl RecipeStore {
    /// Load every recipe in `dir`, using `registry.json` to pick current versions.
    ///
    /// Files that fail validation are logged and skipped; the rest still load.
    pub fn load_dir(dir: &Path) -> Result<Self, RecipeError> {
        let entries = fs::read_dir(dir).map_err(|source| RecipeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter(|path| path.file_name().is_some_and(|name| name != REGISTRY_FILE))
            .collect();
        files.sort();

        let mut store = RecipeStore::default();
        let mut by_file: HashMap<String, (PlaylistType, String)> = HashMap::new();

        for path in files {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Recipe>(&text).map_err(|e| e.to_string()));

            match parsed {
                Ok(recipe) => {
                    let key = (recipe.playlist_type, recipe.version.clone());
                    if store.admit(recipe, &file_name) {
                        by_file.insert(file_name, key);
                    }
                }
                Err(e) => store.reject(&file_name, vec![e]),
            }
        }

        let registry_path = dir.join(REGISTRY_FILE);
        if registry_path.exists() {
            let text = fs::read_to_string(&registry_path).map_err(|source| RecipeError::Io {
                path: registry_path.clone(),
                source,
            })?;
            let registry: HashMap<String, String> =
                serde_json::from_str(&text).map_err(|source| RecipeError::Registry {
                    path: registry_path.clone(),
                    source,
                })?;

            for (type_name, file_name) in registry {
                let playlist_type = match type_name.parse::<PlaylistType>() {
                    Ok(kind) => kind,
                    Err(e) => {
                        warn!(entry = %type_name, error = %e, "Ignoring registry entry");
                        continue;
                    }
                };

                match by_file.get(&file_name) {
                    Some((kind, version)) if *kind == playlist_type => {
                        store.current.insert(playlist_type, version.clone());
                    }
                    Some((kind, _)) => warn!(
                        registered = %playlist_type,
                        actual = %kind,
                        file = %file_name,
                        "Registry points at a recipe of another type, type unavailable"
                    ),
                    None => warn!(
                        playlist_type = %playlist_type,
                        file = %file_name,
                        "Registered recipe was not loaded, type unavailable"
                    ),
                }
            }
        } else {
            warn!(dir = %dir.display(), "No registry.json, using highest loaded version per type");
            store.current = store.highest_versions();
        }

        info!(
            loaded = store.recipes.len(),
            rejected = store.rejected.len(),
            types = store.current.len(),
            "Loaded recipes"
        );
        Ok(store)
    }

    /// Build a store from in-memory recipes; the last valid one of each type is current
    pub fn from_recipes<I>(recipes: I) -> Self
    where
        I: IntoIterator<Item = Recipe>,
    {
        let mut store = RecipeStore::default();
        for recipe in recipes {
            let key = (recipe.playlist_type, recipe.version.clone());
            let source = format!("{} {}", key.0, key.1);
            if store.admit(recipe, &source) {
                store.current.insert(key.0, key.1);
            }
        }
        store
    }

    fn admit(&mut self, recipe: Recipe, source: &str) -> bool {
        let errors = recipe.validate();
        if !errors.is_empty() {
            self.reject(source, errors);
            return false;
        }

        let key = (recipe.playlist_type, recipe.version.clone());
        if self.recipes.contains_key(&key) {
            self.reject(
                source,
                vec![format!("duplicate recipe {} version {}", key.0, key.1)],
            );
            return false;
        }

        debug!(playlist_type = %key.0, version = %key.1, source, "Recipe accepted");
        self.recipes.insert(key, Arc::new(recipe));
        true
    }

    fn reject(&mut self, source: &str, errors: Vec<String>) {
        warn!(source, errors = ?errors, "Recipe rejected");
        self.rejected.push(RejectedRecipe {
            source: source.to_string(),
            errors,
        });
    }

    fn highest_versions(&self) -> HashMap<PlaylistType, String> {
        let mut current: HashMap<PlaylistType, String> = HashMap::new();
        for (kind, version) in self.recipes.keys() {
            let entry = current.entry(*kind).or_insert_with(|| version.clone());
            if version > entry {
                *entry = version.clone();
            }
        }
        current
    }

    /// The currently registered recipe for a playlist type
    pub fn resolve(&self, playlist_type: PlaylistType) -> Result<Arc<Recipe>, RecipeError> {
        let version = self
            .current
            .get(&playlist_type)
            .ok_or(RecipeError::NotRegistered(playlist_type))?;
        self.resolve_version(playlist_type, version)
    }

    /// A specific, possibly superseded, recipe version
    pub fn resolve_version(
        &self,
        playlist_type: PlaylistType,
        version: &str,
    ) -> Result<Arc<Recipe>, RecipeError> {
        self.recipes
            .get(&(playlist_type, version.to_string()))
            .cloned()
            .ok_or_else(|| RecipeError::UnknownVersion(playlist_type, version.to_string()))
    }

    pub fn list(&self) -> Vec<RecipeSummary> {
        let mut summaries: Vec<RecipeSummary> = self
            .recipes
            .values()
            .map(|recipe| RecipeSummary {
                playlist_type: recipe.playlist_type,
                version: recipe.version.clone(),
                description: recipe.description.clone(),
                current: self.current.get(&recipe.playlist_type) == Some(&recipe.version),
                uses_ai: recipe.uses_ai(),
            })
            .collect();
        summaries.sort_by(|a, b| {
            a.playlist_type
                .cmp(&b.playlist_type)
                .then_with(|| a.version.cmp(&b.version))
        });
        summaries
    }

    pub fn rejected(&self) -> &[RejectedRecipe] {
        &self.rejected
    }
}
