use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub monitors: MonitorsConfig,
    pub datadog: DatadogSection,
    pub gitlab: GitlabSection,
    pub sourcegraph: SourcegraphSection,
    pub database_investigation: DbInvestigationSection,
    pub llm: LlmSection,
    pub teams: TeamsSection,
    pub cache: CacheSection,
    pub investigation: InvestigationSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// API key expected in the X-API-Key header. Empty disables auth (dev only).
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorsConfig {
    /// Path to the monitors JSON document.
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatadogSection {
    pub api_url: String,
    pub api_key: String,
    pub app_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitlabSection {
    pub api_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcegraphSection {
    pub api_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbInvestigationSection {
    pub enabled: bool,
    /// Read-only MySQL-compatible connection URL.
    pub url: String,
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub response_ttl_secs: u64,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_open_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TeamsSection {
    pub default_webhook_url: String,
    pub api_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub baseline_ttl_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub repo_metadata_ttl_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub code_search_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvestigationSection {
    pub collector_timeout_secs: u64,
    pub commit_window_hours: i64,
    pub recent_deployment_window_hours: i64,
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. Load from config.toml file
    /// 2. Override with environment variables (prefixed with APP_)
    /// 3. Validate the final configuration
    pub fn load(explicit_path: Option<&str>) -> Result<Self, anyhow::Error> {
        let mut config = if let Some(config_path) =
            explicit_path.map(String::from).or_else(Self::find_config_file)
        {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_DATABASE_URL
    /// - APP_API_KEY
    /// - APP_LOG_LEVEL
    /// - APP_MONITORS_FILE
    /// - APP_DATADOG_API_KEY / APP_DATADOG_APP_KEY
    /// - APP_GITLAB_TOKEN
    /// - APP_SOURCEGRAPH_TOKEN
    /// - APP_DB_INVESTIGATION_URL
    /// - APP_LLM_API_KEY
    /// - APP_TEAMS_WEBHOOK_URL
    ///
    /// Secret values are never echoed to the log.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(key) = std::env::var("APP_API_KEY") {
            self.auth.api_key = key;
            tracing::info!("Override auth.api_key from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(file) = std::env::var("APP_MONITORS_FILE") {
            self.monitors.file = file;
            tracing::info!("Override monitors.file from env: {}", self.monitors.file);
        }

        if let Ok(key) = std::env::var("APP_DATADOG_API_KEY") {
            self.datadog.api_key = key;
            tracing::info!("Override datadog.api_key from env");
        }

        if let Ok(key) = std::env::var("APP_DATADOG_APP_KEY") {
            self.datadog.app_key = key;
            tracing::info!("Override datadog.app_key from env");
        }

        if let Ok(token) = std::env::var("APP_GITLAB_TOKEN") {
            self.gitlab.token = token;
            tracing::info!("Override gitlab.token from env");
        }

        if let Ok(token) = std::env::var("APP_SOURCEGRAPH_TOKEN") {
            self.sourcegraph.token = token;
            tracing::info!("Override sourcegraph.token from env");
        }

        if let Ok(url) = std::env::var("APP_DB_INVESTIGATION_URL") {
            self.database_investigation.url = url;
            self.database_investigation.enabled = true;
            tracing::info!("Override database_investigation.url from env");
        }

        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = key;
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(url) = std::env::var("APP_TEAMS_WEBHOOK_URL") {
            self.teams.default_webhook_url = url;
            tracing::info!("Override teams.default_webhook_url from env");
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.auth.api_key.is_empty() {
            tracing::warn!("⚠️  WARNING: auth.api_key is empty, API authentication is DISABLED!");
            tracing::warn!("⚠️  Set APP_API_KEY or auth.api_key for production use");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.monitors.file.is_empty() {
            anyhow::bail!("monitors.file cannot be empty");
        }

        if self.cache.baseline_ttl_secs == 0 {
            anyhow::bail!("cache.baseline_ttl_secs must be > 0");
        }

        if self.llm.breaker_failure_threshold == 0 || self.llm.breaker_success_threshold == 0 {
            anyhow::bail!("llm breaker thresholds must be > 0");
        }

        if self.llm.cost_per_1k_input < 0.0 || self.llm.cost_per_1k_output < 0.0 {
            anyhow::bail!("llm cost rates cannot be negative");
        }

        if self.investigation.collector_timeout_secs == 0 {
            anyhow::bail!("investigation.collector_timeout_secs must be > 0");
        }

        if self.database_investigation.enabled && self.database_investigation.url.is_empty() {
            anyhow::bail!("database_investigation.url required when enabled");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/incident-ops.db".to_string() }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { api_key: String::new() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,incident_ops=debug".to_string(),
            file: Some("logs/incident-ops.log".to_string()),
        }
    }
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self { file: "conf/monitors.json".to_string() }
    }
}

impl Default for DatadogSection {
    fn default() -> Self {
        Self {
            api_url: "https://api.datadoghq.com".to_string(),
            api_key: String::new(),
            app_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for GitlabSection {
    fn default() -> Self {
        Self { api_url: "https://gitlab.com".to_string(), token: String::new(), timeout_secs: 30 }
    }
}

impl Default for SourcegraphSection {
    fn default() -> Self {
        Self {
            api_url: "https://sourcegraph.example.com".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for DbInvestigationSection {
    fn default() -> Self {
        Self { enabled: false, url: String::new(), query_timeout_secs: 10 }
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            temperature: 0.3,
            timeout_secs: 60,
            response_ttl_secs: 3600,
            cost_per_1k_input: 0.003,
            cost_per_1k_output: 0.015,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 2,
            breaker_open_timeout_secs: 60,
        }
    }
}

impl Default for TeamsSection {
    fn default() -> Self {
        Self {
            default_webhook_url: String::new(),
            api_url: "https://graph.microsoft.com/v1.0".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            baseline_ttl_secs: 86_400,
            repo_metadata_ttl_secs: 21_600,
            code_search_ttl_secs: 1_800,
        }
    }
}

impl Default for InvestigationSection {
    fn default() -> Self {
        Self { collector_timeout_secs: 30, commit_window_hours: 24, recent_deployment_window_hours: 24 }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Custom serde deserializer to support numeric or human-friendly string values
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl serde::de::Visitor<'_> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.baseline_ttl_secs, 86_400);
        assert_eq!(config.llm.breaker_failure_threshold, 5);
    }

    #[test]
    fn test_toml_with_human_durations() {
        let raw = r#"
            [cache]
            baseline_ttl_secs = "24h"
            repo_metadata_ttl_secs = "6h"
            code_search_ttl_secs = "30m"

            [llm]
            response_ttl_secs = "1h"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.cache.baseline_ttl_secs, 86_400);
        assert_eq!(config.cache.repo_metadata_ttl_secs, 21_600);
        assert_eq!(config.cache.code_search_ttl_secs, 1_800);
        assert_eq!(config.llm.response_ttl_secs, 3_600);
    }

    #[test]
    fn test_validation_rejects_zero_ttl() {
        let mut config = Config::default();
        config.cache.baseline_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_db_url_when_enabled() {
        let mut config = Config::default();
        config.database_investigation.enabled = true;
        assert!(config.validate().is_err());
        config.database_investigation.url = "mysql://ro@db:3306/app".to_string();
        assert!(config.validate().is_ok());
    }
}
