use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_LIBRARY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CLOUD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCAL_TIMEOUT_SECS: u64 = 180;
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_TICK_SECS: u64 = 3600;
const DEFAULT_GRACE_DAYS: i64 = 7;
const DEFAULT_CONCURRENCY: usize = 2;
const DEFAULT_PLAYLIST_LENGTH: usize = 25;

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub library: LibrarySettings,
    pub provider: ProviderSettings,
    pub scheduler: SchedulerSettings,
    pub database_path: PathBuf,
    pub recipes_dir: PathBuf,
    pub default_playlist_length: usize,
}

/// Connection details for the Subsonic-compatible library
#[derive(Debug, Clone)]
pub struct LibrarySettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Music folder ids to restrict catalog queries to; empty means all
    pub library_ids: Vec<String>,
    pub timeout: Duration,
}

/// Which AI backend curates playlists, resolved once at startup
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    /// No AI provider; every run uses the scoring fallback
    Disabled,
    Cloud(CloudProviderSettings),
    Local(LocalProviderSettings),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudService {
    OpenRouter,
    Groq,
}

impl CloudService {
    pub fn name(self) -> &'static str {
        match self {
            CloudService::OpenRouter => "openrouter",
            CloudService::Groq => "groq",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            CloudService::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            CloudService::Groq => "https://api.groq.com/openai/v1/chat/completions",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            CloudService::OpenRouter => "openai/gpt-3.5-turbo",
            CloudService::Groq => "mixtral-8x7b-32768",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudProviderSettings {
    pub service: CloudService,
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalProviderSettings {
    pub base_url: String,
    pub model: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub grace_period: chrono::Duration,
    pub max_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECS),
            grace_period: chrono::Duration::days(DEFAULT_GRACE_DAYS),
            max_concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Load configuration from `.env` and environment
pub fn load_config() -> Result<Config> {
    // Load `.env` file if present
    dotenv::dotenv().ok();
    Config::from_lookup(|key| std::env::var(key).ok())
}

impl Config {
    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
        };

        let library = LibrarySettings {
            base_url: get(&["NAVIDROME_URL", "BASE_URL"])
                .ok_or_else(|| anyhow!("NAVIDROME_URL (or BASE_URL) is not set"))?,
            username: get(&["NAVIDROME_USERNAME", "USERNAME"])
                .ok_or_else(|| anyhow!("NAVIDROME_USERNAME (or USERNAME) is not set"))?,
            password: get(&["NAVIDROME_PASSWORD", "PASSWORD"])
                .ok_or_else(|| anyhow!("NAVIDROME_PASSWORD (or PASSWORD) is not set"))?,
            library_ids: get(&["NAVIDROME_LIBRARY_IDS"])
                .map(|ids| {
                    ids.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            timeout: Duration::from_secs(parse_or(
                get(&["LIBRARY_TIMEOUT_SECS"]),
                "LIBRARY_TIMEOUT_SECS",
                DEFAULT_LIBRARY_TIMEOUT_SECS,
            )?),
        };

        let provider = provider_settings(&get)?;

        let scheduler = SchedulerSettings {
            tick_interval: Duration::from_secs(parse_or(
                get(&["REFRESH_TICK_SECS"]),
                "REFRESH_TICK_SECS",
                DEFAULT_TICK_SECS,
            )?),
            grace_period: chrono::Duration::days(parse_or(
                get(&["REFRESH_GRACE_DAYS"]),
                "REFRESH_GRACE_DAYS",
                DEFAULT_GRACE_DAYS,
            )?),
            max_concurrency: parse_or(
                get(&["REFRESH_CONCURRENCY"]),
                "REFRESH_CONCURRENCY",
                DEFAULT_CONCURRENCY,
            )?
            .max(1),
        };

        if scheduler.tick_interval.is_zero() {
            bail!("REFRESH_TICK_SECS must be greater than zero");
        }

        let default_playlist_length = parse_or(
            get(&["DEFAULT_PLAYLIST_LENGTH"]),
            "DEFAULT_PLAYLIST_LENGTH",
            DEFAULT_PLAYLIST_LENGTH,
        )?;
        if default_playlist_length == 0 {
            bail!("DEFAULT_PLAYLIST_LENGTH must be greater than zero");
        }

        Ok(Config {
            library,
            provider,
            scheduler,
            database_path: get(&["DATABASE_PATH"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("magiclists.db")),
            recipes_dir: get(&["RECIPES_DIR"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("recipes")),
            default_playlist_length,
        })
    }
}

fn provider_settings<G>(get: &G) -> Result<ProviderSettings>
where
    G: Fn(&[&str]) -> Option<String>,
{
    let kind = get(&["AI_PROVIDER"])
        .unwrap_or_else(|| "openrouter".to_string())
        .to_lowercase();
    let model = get(&["AI_MODEL"]);

    let service = match kind.as_str() {
        "none" | "disabled" => return Ok(ProviderSettings::Disabled),
        "ollama" => {
            let timeout = parse_or(
                get(&["OLLAMA_TIMEOUT"]),
                "OLLAMA_TIMEOUT",
                DEFAULT_LOCAL_TIMEOUT_SECS,
            )?;
            return Ok(ProviderSettings::Local(LocalProviderSettings {
                base_url: get(&["OLLAMA_BASE_URL", "AI_BASE_URL"])
                    .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                model,
                timeout: Duration::from_secs(timeout),
            }));
        }
        "openrouter" => CloudService::OpenRouter,
        "groq" => CloudService::Groq,
        other => bail!("Unknown AI_PROVIDER '{other}' (expected openrouter, groq, ollama or none)"),
    };

    let Some(api_key) = get(&["AI_API_KEY"]) else {
        warn!(
            provider = service.name(),
            "AI_API_KEY is not set, AI curation disabled and scoring fallback will be used"
        );
        return Ok(ProviderSettings::Disabled);
    };

    Ok(ProviderSettings::Cloud(CloudProviderSettings {
        service,
        api_key,
        model,
        base_url: get(&["AI_BASE_URL"]).unwrap_or_else(|| service.default_base_url().to_string()),
        timeout: Duration::from_secs(parse_or(
            get(&["AI_TIMEOUT_SECS"]),
            "AI_TIMEOUT_SECS",
            DEFAULT_CLOUD_TIMEOUT_SECS,
        )?),
    }))
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
