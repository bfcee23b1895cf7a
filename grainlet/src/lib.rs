//! grainlet: grain-side runtime for the orchestrator remote command protocol.
//!
//! A grain process links this crate, supplies a [`GrainHandler`], and calls
//! [`run`]. Oneshot mode (`--cmd:'...'`) decodes a single command, executes
//! it, and prints the encoded response on stdout; server mode (`--port:<n>`)
//! holds one TCP connection to the orchestrator, executes every inbound
//! command on its own task, and streams results and logs back as frames.
//!
//! ```no_run
//! use grainlet::{GrainCommand, GrainHandler, GrainTools, HandlerError};
//!
//! struct Calculator;
//!
//! #[async_trait::async_trait]
//! impl GrainHandler for Calculator {
//!     async fn handle(
//!         &self,
//!         command: &GrainCommand,
//!         tools: &GrainTools,
//!     ) -> Result<serde_json::Value, HandlerError> {
//!         tools.logger().info("evaluating");
//!         match command.content.as_str() {
//!             "2+2" => Ok(serde_json::json!("4")),
//!             other => Err(HandlerError::new(1, format!("cannot evaluate '{other}'"))),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), grainlet::GrainletError> {
//!     grainlet::run(Calculator).await
//! }
//! ```

pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod frame;
pub mod logger;
pub mod pipeline;
pub mod runtime;
pub mod settings;

pub use connection::{FrameReader, FrameSink, connect, split};
pub use dispatcher::run_dispatcher;
pub use envelope::{
    DecodeError, GrainCommand, GrainResponse, LogEnvelope, decode_command, encode_command,
    encode_response, encode_value_b64,
};
pub use frame::{CORRELATION_ID_LEN, Frame, FrameCodec, MAX_BODY_LEN, MessageType};
pub use logger::{GrainLogger, LogLevel, PrintLogger, RemoteLogger};
pub use pipeline::{GrainEnv, GrainHandler, GrainTools, HandlerError, LogMode, execute};
pub use runtime::{GrainletError, dry_run, run, run_oneshot, run_server};
pub use settings::{DEFAULT_HOST, GrainSettings, SettingsError, Verbosity, init_tracing};
