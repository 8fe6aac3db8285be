use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::llm::ProviderType;

/// Pages the research stage fans out to.
pub const RESEARCH_SOURCE_COUNT: usize = 6;

/// Upper bound on `pipeline.retention_secs` (ten years).
pub const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub synthetic_data: SyntheticDataConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Extra origins allowed by CORS on top of the local ones.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub stdout: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 0 disables the per-stage timeout.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_recent_log_limit")]
    pub recent_log_limit: usize,
    /// How long finished jobs stay queryable. 0 keeps them forever.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    #[serde(default = "default_max_page_chars")]
    pub max_page_chars: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticDataConfig {
    #[serde(default = "default_rows_per_table")]
    pub rows_per_table: usize,
    #[serde(default = "default_max_tables")]
    pub max_tables: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "google" or "anthropic".
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseBackend {
    #[default]
    Memory,
    Bigquery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub backend: WarehouseBackend,
    /// Default target project for submissions that do not name one.
    #[serde(default = "default_project_id")]
    pub project_id: Option<String>,
    #[serde(default = "default_warehouse_location")]
    pub location: String,
    /// Name of the environment variable holding an OAuth access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_warehouse_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentsBackend {
    #[default]
    Memory,
    DataAnalytics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub backend: AgentsBackend,
    #[serde(default = "default_agents_location")]
    pub location: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_agents_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17890
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_stage_timeout_secs() -> u64 {
    600
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_recent_log_limit() -> usize {
    20
}
fn default_retention_secs() -> u64 {
    86_400
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_min_sources() -> usize {
    1
}
fn default_max_page_chars() -> usize {
    6_000
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_rows_per_table() -> usize {
    25
}
fn default_max_tables() -> usize {
    6
}
fn default_llm_provider() -> String {
    "google".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_llm_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    8_192
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    2
}
fn default_project_id() -> Option<String> {
    Some("local-demo".to_string())
}
fn default_warehouse_location() -> String {
    "US".to_string()
}
fn default_access_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}
fn default_warehouse_timeout_secs() -> u64 {
    60
}
fn default_agents_location() -> String {
    "global".to_string()
}
fn default_agents_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            recent_log_limit: default_recent_log_limit(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            min_sources: default_min_sources(),
            max_page_chars: default_max_page_chars(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Default for SyntheticDataConfig {
    fn default() -> Self {
        Self {
            rows_per_table: default_rows_per_table(),
            max_tables: default_max_tables(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::default(),
            project_id: default_project_id(),
            location: default_warehouse_location(),
            access_token_env: default_access_token_env(),
            base_url: None,
            timeout_secs: default_warehouse_timeout_secs(),
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            backend: AgentsBackend::default(),
            location: default_agents_location(),
            base_url: None,
            timeout_secs: default_agents_timeout_secs(),
        }
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Option<Duration> {
        secs_or_none(self.stage_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn retention(&self) -> Option<Duration> {
        secs_or_none(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// `<config dir>/demoforge/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("demoforge").join("config.toml"))
}

impl AppConfig {
    /// Resolve the config file (`explicit`, then `$DEMOFORGE_CONFIG`, then the
    /// platform default), apply environment overrides and validate.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("DEMOFORGE_CONFIG").map(PathBuf::from))
            .or_else(|| default_config_path().filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => Self::from_file(&path).await?,
            None => {
                info!("No config file found, using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `DEMOFORGE_HOST`, `DEMOFORGE_PORT` and `DEMOFORGE_LOG` win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DEMOFORGE_HOST").filter(|h| !h.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(port) = lookup("DEMOFORGE_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("DEMOFORGE_PORT '{}' is not a port number", port))?;
        }
        if let Some(level) = lookup("DEMOFORGE_LOG").filter(|l| !l.trim().is_empty()) {
            self.logging.level = level.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.log_level().is_err() {
            bail!(
                "logging.level '{}' must be one of trace, debug, info, warn, error",
                self.logging.level
            );
        }
        if self.pipeline.retention_secs > MAX_RETENTION_SECS {
            bail!(
                "pipeline.retention_secs ({}) exceeds the maximum of {}",
                self.pipeline.retention_secs,
                MAX_RETENTION_SECS
            );
        }
        if self.pipeline.heartbeat_secs == 0 {
            bail!("pipeline.heartbeat_secs must be non-zero");
        }
        if self.research.min_sources == 0 {
            bail!("research.min_sources must be at least 1");
        }
        if self.research.min_sources > RESEARCH_SOURCE_COUNT {
            bail!(
                "research.min_sources ({}) exceeds the {} research sources",
                self.research.min_sources,
                RESEARCH_SOURCE_COUNT
            );
        }
        if self.synthetic_data.rows_per_table == 0 {
            bail!("synthetic_data.rows_per_table must be non-zero");
        }
        if self.synthetic_data.max_tables == 0 {
            bail!("synthetic_data.max_tables must be non-zero");
        }
        if ProviderType::parse(&self.llm.provider).is_none() {
            bail!(
                "llm.provider '{}' must be 'google' (gemini) or 'anthropic' (claude)",
                self.llm.provider
            );
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be between 0.0 and 2.0");
        }
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .trim()
            .parse::<tracing::Level>()
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
