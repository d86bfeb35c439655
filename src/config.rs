use crate::extract::ExtractSettings;
use crate::extract::records::PropertySchema;
use crate::notion::NotionSettings;
use anyhow::{Context, Result, anyhow, bail};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = ".HabitLens";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_API_BASE_URL: &str = "https://api.notion.com/v1";
const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
pub const DEFAULT_WORKERS: usize = 5;
pub const MAX_WORKERS: usize = 32;
const MAX_PAGE_SIZE: u32 = 100;

const TOKEN_ENV_VARS: [&str; 2] = ["HABITLENS_API_TOKEN", "NOTION_API_TOKEN"];
const REFERENCE_ENV_VAR: &str = "NOTION_DATABASE_ID_REF";
const DASHBOARD_ENV_VAR: &str = "NOTION_DATABASE_ID_DASHBOARD";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_token: Option<String>,
    pub api_base_url: String,
    pub notion_version: String,
    pub reference_collection_id: Option<String>,
    pub dashboard_collection_id: Option<String>,
    pub workers: usize,
    pub timeout_seconds: u64,
    pub page_size: u32,
    pub db_path: PathBuf,
    pub report_dir: PathBuf,
    pub api_port: u16,
    pub properties: PropertySchema,
}

impl Default for Config {
    fn default() -> Self {
        let root = default_root_dir();

        Self {
            api_token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            notion_version: DEFAULT_NOTION_VERSION.to_string(),
            reference_collection_id: None,
            dashboard_collection_id: None,
            workers: DEFAULT_WORKERS,
            timeout_seconds: 30,
            page_size: MAX_PAGE_SIZE,
            db_path: root.join("db").join("activity.db"),
            report_dir: default_report_dir(),
            api_port: 7891,
            properties: PropertySchema::default(),
        }
    }
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        Ok(default_root_dir().join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(&config_path)?;

        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        fs::create_dir_all(&self.report_dir).with_context(|| {
            format!(
                "Failed to create report directory: {}",
                self.report_dir.display()
            )
        })?;

        Ok(())
    }

    /// Worker pool width used when the command line does not override it.
    pub fn effective_workers(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.workers).clamp(1, MAX_WORKERS)
    }

    pub fn resolve_api_token(&self) -> Option<String> {
        TOKEN_ENV_VARS
            .iter()
            .find_map(|name| non_empty_env(name))
            .or_else(|| non_empty(self.api_token.clone()))
    }

    pub fn resolve_reference_collection_id(&self) -> Option<String> {
        non_empty_env(REFERENCE_ENV_VAR).or_else(|| non_empty(self.reference_collection_id.clone()))
    }

    pub fn resolve_dashboard_collection_id(&self) -> Option<String> {
        non_empty_env(DASHBOARD_ENV_VAR).or_else(|| non_empty(self.dashboard_collection_id.clone()))
    }

    pub fn notion_settings(&self) -> Result<NotionSettings> {
        let token = self.resolve_api_token().context(
            "API token is missing. Set `HabitLens config set notion.token <TOKEN>` or `NOTION_API_TOKEN`.",
        )?;

        Ok(NotionSettings {
            token,
            base_url: self.api_base_url.trim().trim_end_matches('/').to_string(),
            version: self.notion_version.clone(),
            timeout: Duration::from_secs(self.timeout_seconds.max(5)),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    pub fn extract_settings(&self) -> Result<ExtractSettings> {
        let reference_collection_id = self.resolve_reference_collection_id().context(
            "Reference collection id is missing. Set `HabitLens config set notion.reference_id <ID>` or `NOTION_DATABASE_ID_REF`.",
        )?;
        let dashboard_collection_id = self.resolve_dashboard_collection_id().context(
            "Dashboard collection id is missing. Set `HabitLens config set notion.dashboard_id <ID>` or `NOTION_DATABASE_ID_DASHBOARD`.",
        )?;

        Ok(ExtractSettings {
            reference_collection_id,
            dashboard_collection_id,
            schema: self.properties.clone(),
        })
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let normalized = normalize_config_key(key);

        match normalized {
            "api_token" => {
                self.api_token = (!value.trim().is_empty()).then(|| value.trim().to_string());
            }
            "api_base_url" => {
                let trimmed = value.trim().trim_end_matches('/');
                url::Url::parse(trimmed)
                    .with_context(|| format!("api_base_url is not a valid URL: {value}"))?;
                self.api_base_url = trimmed.to_string();
            }
            "notion_version" => {
                self.notion_version = value.trim().to_string();
            }
            "reference_collection_id" => {
                self.reference_collection_id =
                    (!value.trim().is_empty()).then(|| value.trim().to_string());
            }
            "dashboard_collection_id" => {
                self.dashboard_collection_id =
                    (!value.trim().is_empty()).then(|| value.trim().to_string());
            }
            "workers" => {
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("workers must be a number"))?;
                if parsed == 0 || parsed > MAX_WORKERS {
                    bail!("workers must be between 1 and {MAX_WORKERS}");
                }
                self.workers = parsed;
            }
            "timeout_seconds" => {
                self.timeout_seconds = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("timeout_seconds must be a number"))?
                    .max(5);
            }
            "page_size" => {
                self.page_size = value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("page_size must be a number"))?
                    .clamp(1, MAX_PAGE_SIZE);
            }
            "db_path" => {
                self.db_path = expand_home(value);
            }
            "report_dir" => {
                self.report_dir = expand_home(value);
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            "properties.title" => self.properties.title = required(key, value)?,
            "properties.category" => self.properties.category = required(key, value)?,
            "properties.difficulty" => self.properties.difficulty = required(key, value)?,
            "properties.relation" => self.properties.relation = required(key, value)?,
            "properties.checkbox" => self.properties.checkbox = required(key, value)?,
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: api_token|notion.token, api_base_url|notion.base_url, notion_version|notion.version, reference_collection_id|notion.reference_id, dashboard_collection_id|notion.dashboard_id, workers|extract.workers, timeout_seconds|extract.timeout_seconds, page_size|extract.page_size, db_path|db.path, report_dir|report.dir, api_port|api.port, properties.title, properties.category, properties.difficulty, properties.relation, properties.checkbox"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "api_token" => Some(
                self.api_token
                    .as_ref()
                    .map(|_| "***set***".to_string())
                    .unwrap_or_else(|| "not_set".to_string()),
            ),
            "api_base_url" => Some(self.api_base_url.clone()),
            "notion_version" => Some(self.notion_version.clone()),
            "reference_collection_id" => Some(
                self.reference_collection_id
                    .clone()
                    .unwrap_or_else(|| "not_set".to_string()),
            ),
            "dashboard_collection_id" => Some(
                self.dashboard_collection_id
                    .clone()
                    .unwrap_or_else(|| "not_set".to_string()),
            ),
            "workers" => Some(self.workers.to_string()),
            "timeout_seconds" => Some(self.timeout_seconds.to_string()),
            "page_size" => Some(self.page_size.to_string()),
            "db_path" => Some(self.db_path.display().to_string()),
            "report_dir" => Some(self.report_dir.display().to_string()),
            "api_port" => Some(self.api_port.to_string()),
            "properties.title" => Some(self.properties.title.clone()),
            "properties.category" => Some(self.properties.category.clone()),
            "properties.difficulty" => Some(self.properties.difficulty.clone()),
            "properties.relation" => Some(self.properties.relation.clone()),
            "properties.checkbox" => Some(self.properties.checkbox.clone()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "api_token" | "notion.token" => "api_token",
        "api_base_url" | "notion.base_url" => "api_base_url",
        "notion_version" | "notion.version" => "notion_version",
        "reference_collection_id" | "notion.reference_id" => "reference_collection_id",
        "dashboard_collection_id" | "notion.dashboard_id" => "dashboard_collection_id",
        "workers" | "extract.workers" => "workers",
        "timeout_seconds" | "extract.timeout_seconds" => "timeout_seconds",
        "page_size" | "extract.page_size" => "page_size",
        "db_path" | "db.path" => "db_path",
        "report_dir" | "report.dir" => "report_dir",
        "api_port" | "api.port" => "api_port",
        _ => key,
    }
}

fn required(key: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{key} must not be empty");
    }
    Ok(trimmed.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn non_empty_env(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

pub fn default_report_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("HabitLens")
        .join("reports")
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}
