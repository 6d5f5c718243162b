use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persona::PersonaProfile;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub retrieval: RetrievalConfig,
    pub persona: PersonaConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub busy_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub executable: String,
    pub timeout_secs: u64,
    pub spool_dir: PathBuf,
    pub stderr_truncate_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub context_budget_chars: usize,
    pub rows_per_excerpt: u32,
}

#[derive(Clone, Debug)]
pub struct PersonaConfig {
    pub name: String,
    pub preamble: Option<String>,
}

impl PersonaConfig {
    pub fn profile(&self) -> PersonaProfile {
        let defaults = PersonaProfile::default();
        PersonaProfile {
            name: self.name.clone(),
            preamble: self.preamble.clone().unwrap_or(defaults.preamble),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub analysis_executable: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing config file: {0}")]
    MissingConfigFile(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://penny.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                busy_timeout_ms: 5_000,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "deepseek-r1:latest".to_string(),
                timeout_secs: 30,
                max_retries: 1,
            },
            analysis: AnalysisConfig {
                executable: "csv2api".to_string(),
                timeout_secs: 60,
                spool_dir: PathBuf::from("datasets"),
                stderr_truncate_bytes: 2_048,
            },
            retrieval: RetrievalConfig { top_k: 5, context_budget_chars: 4_000, rows_per_excerpt: 25 },
            persona: PersonaConfig { name: "Penny".to_string(), preamble: None },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("penny.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(busy_timeout_ms) = database.busy_timeout_ms {
                self.database.busy_timeout_ms = busy_timeout_ms;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(api_key_value.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(analysis) = patch.analysis {
            if let Some(executable) = analysis.executable {
                self.analysis.executable = executable;
            }
            if let Some(timeout_secs) = analysis.timeout_secs {
                self.analysis.timeout_secs = timeout_secs;
            }
            if let Some(spool_dir) = analysis.spool_dir {
                self.analysis.spool_dir = PathBuf::from(spool_dir);
            }
            if let Some(stderr_truncate_bytes) = analysis.stderr_truncate_bytes {
                self.analysis.stderr_truncate_bytes = stderr_truncate_bytes;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(context_budget_chars) = retrieval.context_budget_chars {
                self.retrieval.context_budget_chars = context_budget_chars;
            }
            if let Some(rows_per_excerpt) = retrieval.rows_per_excerpt {
                self.retrieval.rows_per_excerpt = rows_per_excerpt;
            }
        }

        if let Some(persona) = patch.persona {
            if let Some(name) = persona.name {
                self.persona.name = name;
            }
            if let Some(preamble) = persona.preamble {
                self.persona.preamble = Some(preamble);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PENNY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PENNY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PENNY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PENNY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PENNY_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PENNY_DATABASE_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_u64("PENNY_DATABASE_BUSY_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("PENNY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PENNY_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("PENNY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PENNY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PENNY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PENNY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PENNY_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("PENNY_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PENNY_ANALYSIS_EXECUTABLE") {
            self.analysis.executable = value;
        }
        if let Some(value) = read_env("PENNY_ANALYSIS_TIMEOUT_SECS") {
            self.analysis.timeout_secs = parse_u64("PENNY_ANALYSIS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PENNY_ANALYSIS_SPOOL_DIR") {
            self.analysis.spool_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("PENNY_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_u32("PENNY_RETRIEVAL_TOP_K", &value)? as usize;
        }

        if let Some(value) = read_env("PENNY_PERSONA_NAME") {
            self.persona.name = value;
        }

        if let Some(value) = read_env("PENNY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PENNY_SERVER_PORT") {
            self.server.port = parse_u32("PENNY_SERVER_PORT", &value)?
                .try_into()
                .map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "PENNY_SERVER_PORT".to_string(),
                    value,
                })?;
        }

        if let Some(value) = read_env("PENNY_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("PENNY_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.database_url {
            self.database.url = url;
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(base_url);
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(executable) = overrides.analysis_executable {
            self.analysis.executable = executable;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Validation("llm.timeout_secs must be positive".to_string()));
        }
        if self.analysis.executable.trim().is_empty() {
            return Err(ConfigError::Validation(
                "analysis.executable must not be empty".to_string(),
            ));
        }
        if self.analysis.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "analysis.timeout_secs must be positive".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Validation("retrieval.top_k must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    analysis: Option<AnalysisPatch>,
    retrieval: Option<RetrievalPatch>,
    persona: Option<PersonaPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisPatch {
    executable: Option<String>,
    timeout_secs: Option<u64>,
    spool_dir: Option<String>,
    stderr_truncate_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    top_k: Option<usize>,
    context_budget_chars: Option<usize>,
    rows_per_excerpt: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PersonaPatch {
    name: Option<String>,
    preamble: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("penny.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

    #[test]
    fn defaults_validate() {
        let config = AppConfig::load(LoadOptions::default()).expect("default config loads");
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.analysis.timeout_secs, 60);
        assert_eq!(config.persona.name, "Penny");
    }

    #[test]
    fn toml_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[llm]\nmodel = \"llama3.1\"\ntimeout_secs = 5\n\n[analysis]\nexecutable = \"/usr/local/bin/csv2api\"\n\n[logging]\nformat = \"json\""
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("config loads");

        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.llm.timeout_secs, 5);
        assert_eq!(config.analysis.executable, "/usr/local/bin/csv2api");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn programmatic_overrides_win() {
        let config = AppConfig::load(LoadOptions {
            config_path: None,
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                analysis_executable: Some("/opt/csv2api".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("config loads");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.analysis.executable, "/opt/csv2api");
    }

    #[test]
    fn persona_config_produces_profile() {
        let config = AppConfig::default();
        let profile = config.persona.profile();
        assert_eq!(profile.name, "Penny");
        assert!(profile.preamble.contains("crypto"));
    }
}
