use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string for both the catalog table and the
    /// transactional letter tables; a single database, per `spec.md` §4.B/§6.2.
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Name of the read-only products table (`spec.md` §6.2).
    pub table: String,
    /// Hard cap on rows returned by one `discover` call (`spec.md` §4.A).
    pub max_candidates: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub extract_model: String,
    pub rerank_model: String,
    pub max_retries: u32,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum `extraction_confidence` on a prior completed letter for the
    /// skip gate to treat it as already-processed (`spec.md` §9).
    pub skip_confidence_threshold: f64,
    /// Minimum post-rerank confidence a candidate needs to survive the
    /// hallucination guard (`spec.md` §4.F).
    pub min_match_confidence: f64,
    pub force_reprocess: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub json_output_root: String,
    pub max_versions_per_document: usize,
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub retention_days: i64,
    pub auto_cleanup_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub json: bool,
}

/// Command line arguments for configuration overrides.
#[derive(Parser, Debug, Clone)]
#[command(name = "se-letters")]
#[command(version, about = "Document-to-catalog obsolescence matching pipeline")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Document (or directory of documents) to process
    #[arg(value_name = "PATH")]
    pub input: Option<String>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// LLM API base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub llm_api_base: Option<String>,

    /// LLM API key (overrides config file)
    #[arg(long, value_name = "KEY")]
    pub llm_api_key: Option<String>,

    /// Logging level (overrides config file, e.g., "info,se_letters_core=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Force reprocessing even if a compliant letter already exists
    #[arg(long)]
    pub force_reprocess: bool,

    /// Output retention in days (overrides config file, e.g., "30d", "4w")
    #[arg(long, value_name = "DAYS")]
    pub retention_days: Option<String>,
}

impl Config {
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with `APP_`)
    /// 3. Configuration file (`config.toml`)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables:
    /// - `APP_DATABASE_URL`
    /// - `APP_LLM_API_BASE`, `APP_LLM_API_KEY`
    /// - `APP_LOG_LEVEL`
    /// - `APP_OUTPUT_RETENTION_DAYS` (accepts "30d", "4w")
    /// - `APP_FORCE_REPROCESS`
    fn apply_env_overrides(&mut self) {
        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("override database.url from env");
        }

        if let Ok(api_base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = api_base;
            tracing::info!("override llm.api_base from env");
        }

        if let Ok(api_key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = api_key;
            tracing::info!("override llm.api_key from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("override logging.level from env: {}", self.logging.level);
        }

        if let Ok(retention) = std::env::var("APP_OUTPUT_RETENTION_DAYS") {
            match parse_days_to_i64(&retention) {
                Ok(val) => {
                    self.output.retention_days = val;
                    tracing::info!("override output.retention_days from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "invalid APP_OUTPUT_RETENTION_DAYS '{}': {} (keep {})",
                    retention,
                    e,
                    self.output.retention_days
                ),
            }
        }

        if let Ok(force) = std::env::var("APP_FORCE_REPROCESS")
            && let Ok(val) = force.parse()
        {
            self.pipeline.force_reprocess = val;
            tracing::info!("override pipeline.force_reprocess from env: {}", val);
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("override database.url from CLI");
        }

        if let Some(api_base) = &args.llm_api_base {
            self.llm.api_base = api_base.clone();
            tracing::info!("override llm.api_base from CLI");
        }

        if let Some(api_key) = &args.llm_api_key {
            self.llm.api_key = api_key.clone();
            tracing::info!("override llm.api_key from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("override logging.level from CLI: {}", self.logging.level);
        }

        if args.force_reprocess {
            self.pipeline.force_reprocess = true;
            tracing::info!("override pipeline.force_reprocess from CLI: true");
        }

        if let Some(retention) = &args.retention_days {
            match parse_days_to_i64(retention) {
                Ok(val) => {
                    self.output.retention_days = val;
                    tracing::info!("override output.retention_days from CLI: {}", val);
                },
                Err(e) => tracing::warn!(
                    "invalid --retention-days '{}': {} (keep {})",
                    retention,
                    e,
                    self.output.retention_days
                ),
            }
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database.url.is_empty() {
            anyhow::bail!("database.url cannot be empty");
        }
        if self.llm.api_base.is_empty() {
            anyhow::bail!("llm.api_base cannot be empty");
        }
        if self.llm.max_retries == 0 {
            anyhow::bail!("llm.max_retries must be > 0");
        }
        if !(0.0..=1.0).contains(&self.pipeline.skip_confidence_threshold) {
            anyhow::bail!("pipeline.skip_confidence_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_match_confidence) {
            anyhow::bail!("pipeline.min_match_confidence must be within [0, 1]");
        }
        if self.output.retention_days <= 0 {
            anyhow::bail!("output.retention_days must be > 0");
        }
        if self.catalog.max_candidates == 0 {
            anyhow::bail!("catalog.max_candidates must be > 0");
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

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "postgres://localhost/se_letters".to_string(), max_connections: 10 }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { table: "products".to_string(), max_candidates: 50 }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.x.ai/v1".to_string(),
            api_key: String::new(),
            extract_model: "grok-4".to_string(),
            rerank_model: "grok-4".to_string(),
            max_retries: 3,
            request_timeout_secs: 120,
            temperature: 0.1,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_confidence_threshold: 0.95,
            min_match_confidence: 0.5,
            force_reprocess: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_output_root: "data/output/json_outputs".to_string(),
            max_versions_per_document: 10,
            retention_days: 30,
            auto_cleanup_enabled: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,se_letters_core=debug".to_string(),
            file: Some("logs/se-letters.log".to_string()),
            json: false,
        }
    }
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
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
        _ => Err(format!("unsupported unit: {unit}")),
    }
}

fn parse_days_to_i64(input: &str) -> Result<i64, String> {
    if let Ok(val) = input.parse::<i64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: i64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "d" | "day" | "days" => Ok(n),
        "w" | "week" | "weeks" => Ok(n * 7),
        _ => Err(format!("unsupported unit: {unit}")),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
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

fn deserialize_days_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = i64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of days or a string like '30d' or '4w'")
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as i64)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
