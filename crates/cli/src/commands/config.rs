use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use signoff_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

/// One rendered setting: dotted key, effective value, and the environment
/// variables that can override it (first match wins).
struct Field<'a> {
    key: &'static str,
    value: String,
    env_keys: &'a [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key: "database.url",
            value: redact_database_url(&config.database.url),
            env_keys: &["SIGNOFF_DATABASE_URL"],
        },
        Field {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
        },
        Field {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
        },
        Field {
            key: "workflow.advance_policy",
            value: format!("{:?}", config.workflow.advance_policy),
            env_keys: &["SIGNOFF_WORKFLOW_ADVANCE_POLICY"],
        },
        Field {
            key: "workflow.notify_on_decision",
            value: config.workflow.notify_on_decision.to_string(),
            env_keys: &["SIGNOFF_WORKFLOW_NOTIFY_ON_DECISION"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in &fields {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// SQLite URLs carry no credentials, but query strings may hold keys for
/// encrypted builds.
fn redact_database_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, query)) if query.contains("key=") => format!("{base}?<redacted>"),
        _ => url.to_string(),
    }
}
