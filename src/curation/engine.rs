use super::fallback::{FallbackScoring, Selection};
use super::prefilter;
use super::response::parse_response;
use crate::library::CandidateTrack;
use crate::provider::{CompletionParams, CompletionProvider, Prompt, ProviderError};
use crate::recipe::{Recipe, template};
use crate::store::SeedParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which path produced a curation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Ai,
    Fallback,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Ai => "ai",
            Provenance::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Provenance::Ai),
            "fallback" => Ok(Provenance::Fallback),
            other => Err(format!("unknown provenance '{other}'")),
        }
    }
}

/// Why a run took the fallback path
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    ProviderDisabled,
    AlgorithmOnlyRecipe,
    Prompt(String),
    Provider(ProviderError),
    Unparseable(String),
    NoValidTracks { returned: usize },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::ProviderDisabled => write!(f, "no AI provider configured"),
            FallbackReason::AlgorithmOnlyRecipe => write!(f, "recipe has no prompt"),
            FallbackReason::Prompt(e) => write!(f, "prompt could not be rendered: {e}"),
            FallbackReason::Provider(e) => write!(f, "{e}"),
            FallbackReason::Unparseable(e) => write!(f, "unusable AI response: {e}"),
            FallbackReason::NoValidTracks { returned } => {
                write!(f, "none of the {returned} tracks returned by the AI were candidates")
            }
        }
    }
}

/// Inputs of one curation run
#[derive(Debug, Clone, Copy)]
pub struct CurationRequest<'a> {
    pub recipe: &'a Recipe,
    pub seed: &'a SeedParams,
    pub candidates: &'a [CandidateTrack],
    pub target_length: usize,
    pub want_reasoning: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurationResult {
    /// Ordered, duplicate-free, never longer than the target length
    pub track_ids: Vec<String>,
    pub reasoning: Option<String>,
    pub provenance: Provenance,
    pub fallback_reason: Option<FallbackReason>,
}

struct AiPick {
    track_ids: Vec<String>,
    reasoning: Option<String>,
}

/// Chooses between AI curation and deterministic scoring
#[derive(Clone)]
pub struct CurationEngine {
    provider: Option<Arc<dyn CompletionProvider>>,
}

impl CurationEngine {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        CurationEngine { provider }
    }

    /// Curate a track list; provider failures degrade to the fallback and never surface
    pub async fn curate(&self, request: &CurationRequest<'_>) -> CurationResult {
        let started = Instant::now();

        match self.curate_with_ai(request).await {
            Ok(pick) => {
                let track_ids = finalize(&pick.track_ids, request.candidates, request.target_length);
                info!(
                    playlist_type = %request.recipe.playlist_type,
                    selected = track_ids.len(),
                    target = request.target_length,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "AI curation succeeded"
                );

                CurationResult {
                    track_ids,
                    reasoning: pick.reasoning.filter(|_| request.want_reasoning),
                    provenance: Provenance::Ai,
                    fallback_reason: None,
                }
            }
            Err(reason) => {
                match &reason {
                    FallbackReason::ProviderDisabled | FallbackReason::AlgorithmOnlyRecipe => {
                        debug!(reason = %reason, "Using fallback scoring")
                    }
                    _ => warn!(reason = %reason, "AI curation failed, using fallback scoring"),
                }
                self.curate_with_fallback(request, reason)
            }
        }
    }

    fn curate_with_fallback(&self, request: &CurationRequest<'_>, reason: FallbackReason) -> CurationResult {
        let selection = FallbackScoring::select(
            request.recipe,
            request.candidates,
            request.target_length,
            request.now,
        );
        let track_ids = finalize(&selection.track_ids, request.candidates, request.target_length);

        info!(
            playlist_type = %request.recipe.playlist_type,
            selected = track_ids.len(),
            target = request.target_length,
            pool = request.candidates.len(),
            "Fallback curation finished"
        );

        let reasoning = request.want_reasoning.then(|| match &reason {
            FallbackReason::ProviderDisabled | FallbackReason::AlgorithmOnlyRecipe => {
                selection.summary.clone()
            }
            other => format!("{} (AI curation unavailable: {other})", selection.summary),
        });

        CurationResult {
            track_ids,
            reasoning,
            provenance: Provenance::Fallback,
            fallback_reason: Some(reason),
        }
    }

    async fn curate_with_ai(&self, request: &CurationRequest<'_>) -> Result<AiPick, FallbackReason> {
        let provider = self.provider.as_ref().ok_or(FallbackReason::ProviderDisabled)?;
        let template_text = request
            .recipe
            .template_for(request.want_reasoning)
            .ok_or(FallbackReason::AlgorithmOnlyRecipe)?;

        let pool = prefilter::compact_pool(request.candidates, request.target_length, request.now);
        let values = prompt_values(request, &pool);

        let user = template::render(template_text, &values)
            .map_err(|e| FallbackReason::Prompt(e.to_string()))?;
        let system = request
            .recipe
            .system_prompt
            .as_deref()
            .map(|text| template::render(text, &values))
            .transpose()
            .map_err(|e| FallbackReason::Prompt(e.to_string()))?;

        let prompt = Prompt { system, user };
        let params = CompletionParams::from(&request.recipe.llm_params);

        debug!(
            provider = provider.name(),
            pool = request.candidates.len(),
            sent = pool.len(),
            timeout_secs = provider.timeout().as_secs(),
            "Requesting AI curation"
        );

        let raw = match tokio::time::timeout(provider.timeout(), provider.complete(&prompt, &params)).await {
            Ok(result) => result.map_err(FallbackReason::Provider)?,
            Err(_) => return Err(FallbackReason::Provider(ProviderError::Timeout)),
        };

        let parsed = parse_response(&raw).map_err(FallbackReason::Unparseable)?;
        let returned = parsed.track_ids.len();

        let known: HashSet<&str> = request.candidates.iter().map(|t| t.id.as_str()).collect();
        let track_ids: Vec<String> = parsed
            .track_ids
            .into_iter()
            .filter(|id| known.contains(id.as_str()))
            .collect();

        if track_ids.is_empty() {
            return Err(FallbackReason::NoValidTracks { returned });
        }
        if track_ids.len() < returned {
            debug!(returned, kept = track_ids.len(), "Discarded track ids outside the candidate pool");
        }

        Ok(AiPick {
            track_ids,
            reasoning: parsed.reasoning,
        })
    }
}

fn prompt_values(request: &CurationRequest<'_>, pool: &[&CandidateTrack]) -> HashMap<&'static str, String> {
    let artist_names = match request.seed {
        SeedParams::Artists { names, .. } if !names.is_empty() => names.join(", "),
        SeedParams::Artists { .. } => {
            // Fall back to the credited names in the pool
            let mut names: Vec<&str> = Vec::new();
            for track in request.candidates {
                if !names.contains(&track.artist.as_str()) {
                    names.push(&track.artist);
                }
            }
            names.join(", ")
        }
        _ => String::new(),
    };

    let genre = match request.seed {
        SeedParams::Genre { name } => name.clone(),
        _ => String::new(),
    };

    HashMap::from([
        ("seed", request.seed.describe()),
        ("artist_names", artist_names),
        ("genre", genre),
        ("num_tracks", request.target_length.to_string()),
        ("tracks_data", prefilter::tracks_data(pool, request.now)),
        (
            "analysis_summary",
            prefilter::analysis_summary(
                request.recipe,
                request.candidates.len(),
                pool.len(),
                request.target_length,
            ),
        ),
    ])
}

/// Final pass shared by both paths: drop duplicate ids and near-duplicate
/// (title, artist) pairs, then truncate to the target length
pub fn finalize(track_ids: &[String], candidates: &[CandidateTrack], target_length: usize) -> Vec<String> {
    let by_id: HashMap<&str, &CandidateTrack> =
        candidates.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut selection = Selection::new(target_length);
    for id in track_ids {
        if selection.is_full() {
            break;
        }
        if let Some(track) = by_id.get(id.as_str()) {
            selection.try_add(track, None);
        }
    }
    selection.into_ids()
}
