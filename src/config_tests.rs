// Configuration parsing from an in-memory environment

use crate::config::{CloudService, Config, ProviderSettings};
use std::collections::HashMap;
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = [
            ("NAVIDROME_URL", "http://music.local:4533"),
            ("NAVIDROME_USERNAME", "alice"),
            ("NAVIDROME_PASSWORD", "hunter2"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        vars
    }

    fn load(vars: &HashMap<String, String>) -> anyhow::Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&env(&[("AI_PROVIDER", "none")])).unwrap();

        assert_eq!(config.library.base_url, "http://music.local:4533");
        assert!(config.library.library_ids.is_empty());
        assert_eq!(config.library.timeout, Duration::from_secs(30));
        assert_eq!(config.provider, ProviderSettings::Disabled);
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(3600));
        assert_eq!(config.scheduler.grace_period, chrono::Duration::days(7));
        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.default_playlist_length, 25);
        assert_eq!(config.database_path.to_str(), Some("magiclists.db"));
        assert_eq!(config.recipes_dir.to_str(), Some("recipes"));
    }

    #[test]
    fn test_legacy_library_aliases() {
        let mut vars = HashMap::new();
        vars.insert("BASE_URL".to_string(), "http://old.local".to_string());
        vars.insert("USERNAME".to_string(), "bob".to_string());
        vars.insert("PASSWORD".to_string(), "pw".to_string());
        vars.insert("AI_PROVIDER".to_string(), "none".to_string());

        let config = load(&vars).unwrap();
        assert_eq!(config.library.base_url, "http://old.local");
        assert_eq!(config.library.username, "bob");
    }

    #[test]
    fn test_missing_library_url_is_an_error() {
        let mut vars = env(&[]);
        vars.remove("NAVIDROME_URL");

        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("NAVIDROME_URL"));
    }

    #[test]
    fn test_library_ids_are_split_and_trimmed() {
        let config = load(&env(&[
            ("AI_PROVIDER", "none"),
            ("NAVIDROME_LIBRARY_IDS", " 1, 3 ,,7"),
        ]))
        .unwrap();

        assert_eq!(config.library.library_ids, vec!["1", "3", "7"]);
    }

    #[test]
    fn test_cloud_provider_without_key_is_disabled() {
        let config = load(&env(&[("AI_PROVIDER", "groq")])).unwrap();
        assert_eq!(config.provider, ProviderSettings::Disabled);
    }

    #[test]
    fn test_cloud_provider_settings() {
        let config = load(&env(&[
            ("AI_PROVIDER", "OpenRouter"),
            ("AI_API_KEY", "sk-test"),
            ("AI_TIMEOUT_SECS", "12"),
        ]))
        .unwrap();

        match config.provider {
            ProviderSettings::Cloud(cloud) => {
                assert_eq!(cloud.service, CloudService::OpenRouter);
                assert_eq!(cloud.api_key, "sk-test");
                assert_eq!(cloud.model, None);
                assert_eq!(cloud.base_url, "https://openrouter.ai/api/v1/chat/completions");
                assert_eq!(cloud.timeout, Duration::from_secs(12));
            }
            other => panic!("expected cloud provider, got {other:?}"),
        }
    }

    #[test]
    fn test_local_provider_has_longer_timeout() {
        let config = load(&env(&[("AI_PROVIDER", "ollama"), ("AI_MODEL", "qwen2.5")])).unwrap();

        match config.provider {
            ProviderSettings::Local(local) => {
                assert_eq!(local.base_url, "http://localhost:11434");
                assert_eq!(local.model.as_deref(), Some("qwen2.5"));
                assert_eq!(local.timeout, Duration::from_secs(180));
            }
            other => panic!("expected local provider, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(load(&env(&[("AI_PROVIDER", "skynet")])).is_err());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = load(&env(&[("AI_PROVIDER", "none"), ("REFRESH_GRACE_DAYS", "a week")]))
            .unwrap_err();
        assert!(err.to_string().contains("REFRESH_GRACE_DAYS"));

        assert!(load(&env(&[("AI_PROVIDER", "none"), ("DEFAULT_PLAYLIST_LENGTH", "0")])).is_err());
    }

    #[test]
    fn test_concurrency_is_at_least_one() {
        let config = load(&env(&[("AI_PROVIDER", "none"), ("REFRESH_CONCURRENCY", "0")])).unwrap();
        assert_eq!(config.scheduler.max_concurrency, 1);
    }
}
