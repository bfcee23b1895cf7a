//! Startup settings parsed from the orchestrator's argv contract.
//!
//! The orchestrator passes flags as single `--name:value` tokens rather
//! than `--name value` pairs, so parsing is a prefix scan. Recognized
//! flags are stripped; whatever remains becomes the handler's residual
//! arguments. Everything here is immutable after startup and passed
//! explicitly, never ambient.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid port in '{0}'")]
    InvalidPort(String),

    #[error("invalid verbosity '{0}', expected silence|minimal|full|0|1|2")]
    InvalidVerbosity(String),

    #[error("invalid config entry '{0}', expected <key>=<value>")]
    InvalidConfig(String),

    #[error("invalid base64 config value for key '{0}'")]
    InvalidConfigB64(String),
}

/// Diagnostic verbosity for the process's own tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Silence,
    #[default]
    Minimal,
    Full,
}

impl Verbosity {
    fn parse(text: &str) -> Result<Self, SettingsError> {
        match text {
            "silence" | "0" => Ok(Self::Silence),
            "minimal" | "1" => Ok(Self::Minimal),
            "full" | "2" => Ok(Self::Full),
            other => Err(SettingsError::InvalidVerbosity(other.to_string())),
        }
    }
}

/// Immutable process configuration, built once from argv.
#[derive(Debug, Clone)]
pub struct GrainSettings {
    /// Oneshot command (`--cmd:'<base64>'`), quotes stripped.
    pub command: Option<String>,
    /// Server mode port (`--port:<n>`); absent means oneshot.
    pub port: Option<u16>,
    /// Orchestrator host (`--server:<host>`).
    pub host: String,
    pub verbosity: Verbosity,
    /// `--config:`/`--config_b64:` entries.
    pub config: HashMap<String, String>,
    /// Residual arguments handed to the handler.
    pub args: Vec<String>,
}

impl Default for GrainSettings {
    fn default() -> Self {
        Self {
            command: None,
            port: None,
            host: DEFAULT_HOST.to_string(),
            verbosity: Verbosity::default(),
            config: HashMap::new(),
            args: Vec::new(),
        }
    }
}

impl GrainSettings {
    /// Parse an argv list (without the program name).
    pub fn from_args<I>(args: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut settings = Self::default();

        for arg in args {
            if let Some(value) = arg.strip_prefix("--cmd:") {
                settings.command = Some(strip_quotes(value).to_string());
            } else if let Some(value) = arg.strip_prefix("--port:") {
                let port = value
                    .parse::<u16>()
                    .map_err(|_| SettingsError::InvalidPort(arg.clone()))?;
                settings.port = Some(port);
            } else if let Some(value) = arg.strip_prefix("--server:") {
                settings.host = value.to_string();
            } else if let Some(value) = arg.strip_prefix("--verbose:") {
                settings.verbosity = Verbosity::parse(value)?;
            } else if let Some(value) = arg.strip_prefix("--config:") {
                let (key, value) = split_config(value, &arg)?;
                settings.config.insert(key.to_string(), value.to_string());
            } else if let Some(value) = arg.strip_prefix("--config_b64:") {
                let (key, encoded) = split_config(value, &arg)?;
                let decoded = BASE64
                    .decode(encoded.as_bytes())
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .ok_or_else(|| SettingsError::InvalidConfigB64(key.to_string()))?;
                settings.config.insert(key.to_string(), decoded);
            } else {
                settings.args.push(arg);
            }
        }

        Ok(settings)
    }

    pub fn is_server_mode(&self) -> bool {
        self.port.is_some()
    }
}

/// The orchestrator wraps the command payload in single quotes.
fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

fn split_config<'a>(value: &'a str, arg: &str) -> Result<(&'a str, &'a str), SettingsError> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| SettingsError::InvalidConfig(arg.to_string()))
}

/// Install the process-wide tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the verbosity flag picks the level.
/// Diagnostics go to stderr: stdout is reserved for the oneshot result
/// line and the server banner/shutdown notices.
pub fn init_tracing(verbosity: Verbosity) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbosity {
            Verbosity::Silence => "error",
            Verbosity::Minimal => "info",
            Verbosity::Full => "trace",
        };
        EnvFilter::new(format!("grainlet={level}"))
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));
    let _ = subscriber.try_init();
}
