//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::PrefetchResult;
use console::style;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> PrefetchResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> PrefetchResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> PrefetchResult<()> {
    let path = manager.path();

    if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
        println!(
            "{} Config already exists at {}",
            style("[WARN]").yellow(),
            path.display()
        );
        println!("  Use --force to overwrite");
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{} Configuration initialized ({})",
        style("[OK]").green(),
        path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn init_writes_defaults_once() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        init_config(&manager, false).await.unwrap();
        let mut edited = manager.load().await.unwrap();
        edited.worker.cache_name = "edited".to_string();
        manager.save(&edited).await.unwrap();

        // Without --force the existing file is kept
        init_config(&manager, false).await.unwrap();
        assert_eq!(manager.load().await.unwrap().worker.cache_name, "edited");

        init_config(&manager, true).await.unwrap();
        assert_eq!(manager.load().await.unwrap().worker.cache_name, "bundles");
    }
}
