use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use penny_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let entries: Vec<(&str, &str, String)> = vec![
        ("database.url", "PENNY_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "PENNY_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            "PENNY_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        (
            "database.busy_timeout_ms",
            "PENNY_DATABASE_BUSY_TIMEOUT_MS",
            config.database.busy_timeout_ms.to_string(),
        ),
        ("llm.provider", "PENNY_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        ("llm.model", "PENNY_LLM_MODEL", config.llm.model.clone()),
        (
            "llm.base_url",
            "PENNY_LLM_BASE_URL",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("llm.api_key", "PENNY_LLM_API_KEY", api_key.to_string()),
        ("llm.timeout_secs", "PENNY_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        ("analysis.executable", "PENNY_ANALYSIS_EXECUTABLE", config.analysis.executable.clone()),
        (
            "analysis.timeout_secs",
            "PENNY_ANALYSIS_TIMEOUT_SECS",
            config.analysis.timeout_secs.to_string(),
        ),
        (
            "analysis.spool_dir",
            "PENNY_ANALYSIS_SPOOL_DIR",
            config.analysis.spool_dir.display().to_string(),
        ),
        ("retrieval.top_k", "PENNY_RETRIEVAL_TOP_K", config.retrieval.top_k.to_string()),
        ("persona.name", "PENNY_PERSONA_NAME", config.persona.name.clone()),
        ("server.bind_address", "PENNY_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        ("server.port", "PENNY_SERVER_PORT", config.server.port.to_string()),
        ("logging.level", "PENNY_LOG_LEVEL", config.logging.level.clone()),
        ("logging.format", "PENNY_LOG_FORMAT", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key, value) in entries {
        let source = field_source(
            key_path,
            env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("{key_path} = {value} [{source}]"));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("penny.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/penny.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(doc: &Value, key_path: &str) -> bool {
    let mut current = doc;
    for segment in key_path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::contains_path;
    use toml::Value;

    #[test]
    fn nested_key_paths_resolve() {
        let doc = "[llm]\nmodel = \"llama3.1\"\n".parse::<Value>().expect("toml");
        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.base_url"));
        assert!(!contains_path(&doc, "database.url"));
    }
}
