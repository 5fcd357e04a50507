//! Settings loaded from environment variables.
//!
//! Names are matched case-insensitively, so `paperless_token` and
//! `PAPERLESS_TOKEN` are equivalent. Empty values count as unset.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PAPERLESS_URL: &str = "http://paperless-ngx:8000";
pub const DEFAULT_CONVERT_COMMAND: &str = "supernote-tool convert -t pdf -a {input} {output}";
pub const DEFAULT_STATE_DB: &str = "/state/bridge.db";

/// Shortest accepted outbound poll interval, in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    // Paperless connection
    pub paperless_url: String,
    pub paperless_token: String,

    // Supernote paths
    pub note_dir: PathBuf,
    pub doc_dir: PathBuf,
    /// Where the private cloud drops its own PDF renderings, if mounted.
    pub notelib_convert_dir: Option<PathBuf>,
    /// Renderer invoked when no pre-converted PDF exists. Must contain
    /// `{input}` and `{output}` placeholders.
    pub convert_command: String,

    // Metadata applied to uploaded notes
    pub correspondent_override: Option<String>,
    pub document_type: Option<String>,

    // Tags
    pub inbound_tag: String,
    pub superseded_tag: String,
    pub outbound_tag: String,
    pub outbound_subfolder: String,

    // Behavior
    pub poll_interval: Duration,
    pub state_db: PathBuf,
    pub log_level: String,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    /// Load settings through an arbitrary lookup. `lookup` is called with
    /// upper-case variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let poll_interval = match get("POLL_INTERVAL") {
            Some(raw) => {
                let secs = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                    name: "POLL_INTERVAL",
                    reason: e.to_string(),
                })?;
                if secs < MIN_POLL_INTERVAL_SECS {
                    return Err(ConfigError::Invalid {
                        name: "POLL_INTERVAL",
                        reason: format!("must be at least {} seconds", MIN_POLL_INTERVAL_SECS),
                    });
                }
                secs
            }
            None => 60,
        };

        let convert_command =
            get("NOTE_CONVERT_COMMAND").unwrap_or_else(|| DEFAULT_CONVERT_COMMAND.to_string());
        if !convert_command.contains("{input}") || !convert_command.contains("{output}") {
            return Err(ConfigError::Invalid {
                name: "NOTE_CONVERT_COMMAND",
                reason: "must contain {input} and {output} placeholders".to_string(),
            });
        }

        let log_level = get("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string());
        if level_directive(&log_level).is_none() {
            return Err(ConfigError::Invalid {
                name: "LOG_LEVEL",
                reason: format!("unknown level '{}'", log_level),
            });
        }

        Ok(Self {
            paperless_url: get("PAPERLESS_URL").unwrap_or_else(|| DEFAULT_PAPERLESS_URL.to_string()),
            paperless_token: require("PAPERLESS_TOKEN")?,
            note_dir: require("SUPERNOTE_NOTE_DIR")?.into(),
            doc_dir: require("SUPERNOTE_DOC_DIR")?.into(),
            notelib_convert_dir: get("NOTELIB_CONVERT_DIR").map(PathBuf::from),
            convert_command,
            correspondent_override: get("INBOUND_CORRESPONDENT_OVERRIDE"),
            document_type: get("INBOUND_DOCUMENT_TYPE"),
            inbound_tag: get("INBOUND_TAG").unwrap_or_else(|| "paperless-gpt-ocr-auto".to_string()),
            superseded_tag: get("SUPERSEDED_TAG").unwrap_or_else(|| "superseded".to_string()),
            outbound_tag: get("OUTBOUND_TAG").unwrap_or_else(|| "send-to-supernote".to_string()),
            outbound_subfolder: get("OUTBOUND_SUBFOLDER").unwrap_or_else(|| "Paperless".to_string()),
            poll_interval: Duration::from_secs(poll_interval),
            state_db: get("STATE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DB)),
            log_level,
        })
    }

    /// Folder inside `Document/` that outbound sync owns.
    pub fn managed_dir(&self) -> PathBuf {
        self.doc_dir.join(&self.outbound_subfolder)
    }

    /// Filter directive for this crate at the configured level.
    pub fn log_directive(&self) -> String {
        let level = level_directive(&self.log_level).unwrap_or("info");
        format!("supernote_paperless_bridge={}", level)
    }
}

/// Map a conventional level name to a `tracing` level.
fn level_directive(level: &str) -> Option<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" | "CRITICAL" => Some("error"),
        _ => None,
    }
}
