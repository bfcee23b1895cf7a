//! Mode selection and process entry points.
//!
//! A grain program supplies its handler and calls [`run`]; `--port` picks
//! server mode, otherwise the process runs the single `--cmd` command and
//! exits. Both modes funnel through the same execution pipeline.

use std::sync::Arc;

use uuid::Uuid;

use crate::connection;
use crate::dispatcher::run_dispatcher;
use crate::envelope::{DecodeError, GrainCommand, GrainResponse, encode_command, encode_response};
use crate::pipeline::{GrainEnv, GrainHandler, LogMode, execute};
use crate::settings::{GrainSettings, SettingsError, init_tracing};

#[derive(Debug, thiserror::Error)]
pub enum GrainletError {
    #[error("command not found, pass it with --cmd:'CMD_JSON_BASE64'")]
    MissingCommand,

    #[error("server mode requires --port:<port>")]
    MissingPort,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse argv, install tracing, and run in whichever mode the flags select.
pub async fn run<H: GrainHandler>(handler: H) -> Result<(), GrainletError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let settings = GrainSettings::from_args(args)?;
    init_tracing(settings.verbosity);

    let handler = Arc::new(handler);
    if settings.is_server_mode() {
        run_server(&settings, handler).await
    } else {
        run_oneshot(&settings, handler.as_ref()).await
    }
}

/// Execute the single `--cmd` command and print the encoded response.
///
/// The stdout contract is one line, `<executionId>:<base64(response JSON)>`.
/// A missing `--cmd` or an undecodable command is fatal and no handler
/// invocation happens.
pub async fn run_oneshot<H: GrainHandler + ?Sized>(
    settings: &GrainSettings,
    handler: &H,
) -> Result<(), GrainletError> {
    let encoded = settings.command.as_deref().ok_or(GrainletError::MissingCommand)?;
    let env = Arc::new(GrainEnv::from_settings(settings));

    let (response, command) = execute(encoded, handler, &env, &LogMode::Local).await?;
    println!("{}:{}", command.execution_id, encode_response(&response)?);
    Ok(())
}

/// Hold a connection to the orchestrator and execute inbound commands
/// until it hangs up.
pub async fn run_server<H: GrainHandler>(
    settings: &GrainSettings,
    handler: Arc<H>,
) -> Result<(), GrainletError> {
    let port = settings.port.ok_or(GrainletError::MissingPort)?;

    let (reader, sink) = connection::connect(&settings.host, port).await?;
    println!("Connected to orchestrator at {}:{}", settings.host, port);

    let env = Arc::new(GrainEnv::from_settings(settings));
    run_dispatcher(reader, sink, handler, env).await?;
    Ok(())
}

/// Run the handler against an arbitrary payload without a connection or
/// stdout contract; development helper for exercising grain logic.
pub async fn dry_run<H: GrainHandler + ?Sized>(
    payload: &str,
    handler: &H,
    settings: &GrainSettings,
) -> Result<GrainResponse, GrainletError> {
    let command = GrainCommand {
        flow_uid: Uuid::new_v4().to_string(),
        execution_id: Uuid::new_v4().to_string(),
        content: payload.to_string(),
    };
    let encoded = encode_command(&command)?;
    let env = Arc::new(GrainEnv::from_settings(settings));

    let (response, _) = execute(&encoded, handler, &env, &LogMode::Local).await?;
    Ok(response)
}
