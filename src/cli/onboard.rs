use crate::config::{Config, DEFAULT_WORKERS, MAX_WORKERS, default_report_dir, expand_home};
use crate::db::Database;
use anyhow::{Context, Result};
use dialoguer::{Input, Password, theme::ColorfulTheme};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn run_onboarding() -> Result<Config> {
    println!("──────────────────────────────────────────");
    println!("  Welcome to HabitLens onboarding.");
    println!("──────────────────────────────────────────");

    let theme = ColorfulTheme::default();
    let existing = existing_config(&Config::config_path()?);

    println!("\n[1/4] Integration token");
    println!("  Create an internal integration and share both databases with it.");
    let api_token: String = Password::with_theme(&theme)
        .with_prompt("  Paste the integration token")
        .allow_empty_password(existing.api_token.is_some())
        .interact()
        .context("Failed to read integration token")?;
    let api_token = if api_token.trim().is_empty() {
        existing.api_token.clone()
    } else {
        Some(api_token.trim().to_string())
    };
    println!("  ✓ Token stored (masked)");

    println!("\n[2/4] Database ids");
    let reference_collection_id = prompt_id(
        &theme,
        "  Reference (activity list) database id",
        existing.reference_collection_id.clone(),
    )?;
    let dashboard_collection_id = prompt_id(
        &theme,
        "  Dashboard (daily pages) database id",
        existing.dashboard_collection_id.clone(),
    )?;
    println!("  ✓ Reference: {reference_collection_id}");
    println!("  ✓ Dashboard: {dashboard_collection_id}");

    println!("\n[3/4] Parallel page fetches");
    let workers: usize = Input::with_theme(&theme)
        .with_prompt("  How many pages to fetch at once")
        .default(DEFAULT_WORKERS)
        .validate_with(|input: &usize| -> std::result::Result<(), String> {
            if (1..=MAX_WORKERS).contains(input) {
                Ok(())
            } else {
                Err(format!("Use a number between 1 and {MAX_WORKERS}"))
            }
        })
        .interact_text()
        .context("Failed to read worker count")?;
    println!("  ✓ {workers} worker(s)");

    println!("\n[4/4] Report output directory");
    let default_report_dir = default_report_dir().display().to_string();
    let report_dir_input: String = Input::with_theme(&theme)
        .with_prompt("  Folder where reports will be saved")
        .default(default_report_dir)
        .interact_text()
        .context("Failed to read report directory")?;

    let report_dir = expand_home(&report_dir_input);
    println!("  ✓ {}", report_dir.display());

    let config = Config {
        api_token,
        reference_collection_id: Some(reference_collection_id),
        dashboard_collection_id: Some(dashboard_collection_id),
        workers,
        report_dir,
        ..existing
    };

    config.ensure_directories()?;
    config.save()?;
    let _ = Database::open(&config.db_path)?;

    println!("\n──────────────────────────────────────────");
    println!("  Onboarding complete!");
    println!("  Run HabitLens doctor to verify access, then HabitLens run.");
    println!("──────────────────────────────────────────");

    Ok(config)
}

/// Config used to prefill the prompts. A file that no longer parses is copied
/// aside first, since finishing onboarding overwrites it.
fn existing_config(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    let error = match Config::load_from(path) {
        Ok(config) => return config,
        Err(error) => format!("{error:#}"),
    };

    let backup = invalid_config_backup(path);
    match fs::copy(path, &backup) {
        Ok(_) => {
            warn!(error = %error, backup = %backup.display(), "existing config is unreadable");
            println!("  ! Existing config could not be read: {error}");
            println!("  ! A copy was kept at {}", backup.display());
        }
        Err(copy_error) => {
            warn!(
                error = %error,
                copy_error = %copy_error,
                "existing config is unreadable and could not be copied"
            );
            println!("  ! Existing config could not be read and will be replaced: {error}");
        }
    }

    Config::default()
}

fn invalid_config_backup(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".invalid");
    path.with_file_name(name)
}

fn prompt_id(theme: &ColorfulTheme, prompt: &str, current: Option<String>) -> Result<String> {
    let input = Input::<String>::with_theme(theme).with_prompt(prompt);
    let input = match current {
        Some(value) => input.default(value),
        None => input,
    };

    let value = input
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if input.trim().is_empty() {
                Err("Database id is required")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .with_context(|| format!("Failed to read {}", prompt.trim()))?;

    Ok(normalize_database_id(&value))
}

/// Accepts a bare id or a share URL and keeps the trailing 32-hex id.
fn normalize_database_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let last_segment = trimmed
        .split('?')
        .next()
        .unwrap_or(trimmed)
        .rsplit('/')
        .next()
        .unwrap_or(trimmed);

    let hex_tail = last_segment
        .rsplit('-')
        .next()
        .filter(|tail| tail.len() == 32 && tail.chars().all(|c| c.is_ascii_hexdigit()));

    hex_tail.unwrap_or(last_segment).to_string()
}
