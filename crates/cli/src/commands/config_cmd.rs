//! `marginalia config`: Show the effective configuration.

use marginalia_config::AppConfig;

pub fn run(default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", AppConfig::config_path().display());
    println!("{}", render(&config)?);

    if !config.has_api_key() {
        eprintln!("  ⚠️  No API key set (set MARGINALIA_API_KEY or OPENAI_API_KEY)");
    }
    Ok(())
}

/// Serialize the config with the API key masked.
fn render(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("[REDACTED]".into());
    }
    toml::to_string_pretty(&shown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_path();
        assert!(path.to_str().unwrap().ends_with("config.toml"));
    }

    #[test]
    fn render_masks_key() {
        let config = AppConfig {
            api_key: Some("sk-live-123".into()),
            ..AppConfig::default()
        };
        let rendered = render(&config).unwrap();
        assert!(!rendered.contains("sk-live-123"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains("gpt-4o-mini"));
    }

    #[test]
    fn rendered_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, render(&AppConfig::default()).unwrap()).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.agent.max_iterations, 10);
    }
}
