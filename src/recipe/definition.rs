use super::template;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inputs the curation engine knows how to supply to a prompt template
pub const KNOWN_INPUTS: [&str; 6] = [
    "seed",
    "artist_names",
    "genre",
    "num_tracks",
    "tracks_data",
    "analysis_summary",
];

/// Kind of playlist a recipe curates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlaylistType {
    #[serde(rename = "artist_radio")]
    ArtistRadio,
    #[serde(rename = "genre_mix")]
    GenreMix,
    #[serde(rename = "re_discover")]
    Rediscover,
}

impl PlaylistType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaylistType::ArtistRadio => "artist_radio",
            PlaylistType::GenreMix => "genre_mix",
            PlaylistType::Rediscover => "re_discover",
        }
    }

    /// Whether the fallback scores by listening gap rather than popularity
    pub fn emphasizes_history(self) -> bool {
        self == PlaylistType::Rediscover
    }
}

impl fmt::Display for PlaylistType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaylistType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "artist_radio" | "this_is" | "song_radio" => Ok(PlaylistType::ArtistRadio),
            "genre_mix" | "genre" => Ok(PlaylistType::GenreMix),
            "re_discover" | "rediscover" => Ok(PlaylistType::Rediscover),
            other => Err(format!(
                "unknown playlist type '{other}' (expected artist_radio, genre_mix or re_discover)"
            )),
        }
    }
}

/// Knobs of the deterministic fallback and candidate collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// Maximum tracks a single artist may contribute
    pub max_per_artist: usize,
    /// Tracks played more recently than this are held back from rediscovery
    pub min_gap_days: i64,
    /// Listening-history window for rediscovery collection
    pub lookback_days: i64,
    /// Cap on the days factor of the rediscovery score
    pub score_cap_days: i64,
    /// Gap used to top up an under-filled rediscovery playlist
    pub relaxed_gap_days: i64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams {
            max_per_artist: 3,
            min_gap_days: 7,
            lookback_days: 30,
            score_cap_days: 90,
            relaxed_gap_days: 3,
        }
    }
}

/// Parameters for the AI completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmParams {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Model to use when none is configured for the provider
    pub model_fallback: Option<String>,
}

impl Default for LlmParams {
    fn default() -> Self {
        LlmParams {
            temperature: 0.7,
            max_tokens: 1000,
            model_fallback: None,
        }
    }
}

/// A versioned, declarative description of how one playlist type is curated.
///
/// Recipes are immutable once loaded; a new version is a new file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub playlist_type: PlaylistType,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Ordered names of the values the templates may reference
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Absent for algorithm-only recipes
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub prompt_template_with_reasoning: Option<String>,
    #[serde(default)]
    pub strategy: StrategyParams,
    #[serde(default)]
    pub llm_params: LlmParams,
}

impl Recipe {
    /// A recipe with no prompt, curated by the scoring fallback only
    #[cfg(test)]
    pub fn algorithmic(playlist_type: PlaylistType, version: &str) -> Self {
        Recipe {
            playlist_type,
            version: version.to_string(),
            description: String::new(),
            inputs: Vec::new(),
            system_prompt: None,
            prompt_template: None,
            prompt_template_with_reasoning: None,
            strategy: StrategyParams::default(),
            llm_params: LlmParams::default(),
        }
    }

    pub fn uses_ai(&self) -> bool {
        self.prompt_template.is_some()
    }

    /// Template to render for a run, preferring the reasoning variant when asked
    pub fn template_for(&self, want_reasoning: bool) -> Option<&str> {
        if want_reasoning {
            if let Some(template) = self.prompt_template_with_reasoning.as_deref() {
                return Some(template);
            }
        }
        self.prompt_template.as_deref()
    }

    /// Check every load-time invariant, returning one message per violation
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.version.trim().is_empty() {
            errors.push("version must not be empty".to_string());
        }

        for (idx, input) in self.inputs.iter().enumerate() {
            if !KNOWN_INPUTS.contains(&input.as_str()) {
                errors.push(format!("input '{input}' is not supplied by the curation engine"));
            }
            if self.inputs[..idx].contains(input) {
                errors.push(format!("input '{input}' is declared twice"));
            }
        }

        let templates = [
            ("system_prompt", self.system_prompt.as_deref()),
            ("prompt_template", self.prompt_template.as_deref()),
            (
                "prompt_template_with_reasoning",
                self.prompt_template_with_reasoning.as_deref(),
            ),
        ];

        for (field, template) in templates {
            let Some(template) = template else { continue };

            match template::placeholders(template) {
                Ok(names) => {
                    for name in names {
                        if !self.inputs.iter().any(|input| input == name) {
                            errors.push(format!(
                                "{field} references '{{{name}}}' which is not a declared input"
                            ));
                        }
                    }
                }
                Err(e) => errors.push(format!("{field}: {e}")),
            }
        }

        if self.prompt_template_with_reasoning.is_some() && self.prompt_template.is_none() {
            errors.push("prompt_template_with_reasoning requires prompt_template".to_string());
        }

        let temperature = self.llm_params.temperature;
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            errors.push(format!("temperature {temperature} must be between 0 and 2"));
        }
        if self.llm_params.max_tokens == 0 {
            errors.push("max_tokens must be greater than zero".to_string());
        }

        let strategy = &self.strategy;
        if strategy.max_per_artist == 0 {
            errors.push("max_per_artist must be at least 1".to_string());
        }
        if strategy.lookback_days <= 0 {
            errors.push("lookback_days must be positive".to_string());
        }
        if strategy.score_cap_days <= 0 {
            errors.push("score_cap_days must be positive".to_string());
        }
        if strategy.min_gap_days < 0 || strategy.relaxed_gap_days < 0 {
            errors.push("gap days must not be negative".to_string());
        }
        if strategy.relaxed_gap_days > strategy.min_gap_days {
            errors.push("relaxed_gap_days must not exceed min_gap_days".to_string());
        }

        errors
    }
}
