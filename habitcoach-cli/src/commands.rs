//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use habitcoach_core::goal::{CompletionDetector, EntityExtractor, GoalRecord, GoalSlot};
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Chat {
            mode,
            name,
            model,
            mock,
        } => {
            let mut config = habitcoach_core::config::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            for warning in config.validate() {
                tracing::warn!("{}", warning);
            }
            if let Some(model) = model {
                config.llm.model = model;
            }
            if mock {
                config.llm.provider = "mock".to_string();
            }
            let mode = match mode {
                Some(m) => m.parse().map_err(anyhow::Error::msg)?,
                None => config.dialogue.default_mode,
            };
            crate::repl::run_chat(config, mode, name).await
        }
        Commands::Extract { text, explain } => handle_extract(&text, explain),
        Commands::Detect { text } => handle_detect(&text),
        Commands::Config { action } => {
            handle_config(action.unwrap_or(ConfigAction::Show), workspace).await
        }
    }
}

fn handle_extract(text: &str, explain: bool) -> anyhow::Result<()> {
    let extractor = EntityExtractor::shared();
    let record = extractor.extract(text, &GoalRecord::new());
    println!("{}", serde_json::to_string_pretty(&record)?);

    if explain {
        if let Some(summary) = extractor.parse_summary_block(text) {
            println!(
                "\nsummary block: {} field(s), overrides free text",
                summary.filled_count()
            );
        }
        for slot in GoalSlot::ALL {
            match extractor.first_match(slot, text) {
                Some((pattern, value)) => println!("  {}: {} <- {}", slot, value, pattern),
                None => println!("  {}: -", slot),
            }
        }
    }
    Ok(())
}

fn handle_detect(text: &str) -> anyhow::Result<()> {
    let detector = CompletionDetector::new();
    let verdict = detector.classify(text);
    println!("{}", verdict);
    if let Some(phrase) = detector.premature_phrase(text) {
        println!("premature phrase: {}", phrase);
    }
    Ok(())
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".habitcoach");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = habitcoach_core::CoachConfig::default();
            std::fs::write(&config_path, default_config.to_toml()?)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = habitcoach_core::config::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            for warning in config.validate() {
                eprintln!("warning: {}", warning);
            }
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: Some(ConfigAction::Init),
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".habitcoach").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: habitcoach_core::CoachConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.llm.model, "gemini-2.0-flash");
        assert_eq!(parsed.dialogue.context_turns, 6);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: Some(ConfigAction::Init),
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".habitcoach").join("config.toml");
        let content_first = std::fs::read_to_string(&config_path).unwrap();

        // Second init should not overwrite
        let command = Commands::Config {
            action: Some(ConfigAction::Init),
        };
        handle_command(command, workspace).await.unwrap();

        let content_second = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(content_first, content_second);
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config { action: None };
        assert!(handle_command(command, dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_extract_and_detect_commands() {
        let dir = TempDir::new().unwrap();
        let extract = Commands::Extract {
            text: "목표: 독서\n기간: 한 달".to_string(),
            explain: true,
        };
        assert!(handle_command(extract, dir.path()).await.is_ok());

        let detect = Commands::Detect {
            text: "루틴을 만들어드릴게요".to_string(),
        };
        assert!(handle_command(detect, dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_chat_rejects_unknown_mode() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Chat {
            mode: Some("weekly".to_string()),
            name: None,
            model: None,
            mock: true,
        };
        let err = handle_command(command, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("unknown chat mode"));
    }
}
