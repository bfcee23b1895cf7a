//! Execution pipeline: decode a command, run the handler inside a failure
//! boundary, produce the response envelope.
//!
//! Oneshot and server mode both enter through [`execute`]; the only
//! difference between them is the logger placed in the tool bundle.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::connection::FrameSink;
use crate::envelope::{DecodeError, GrainCommand, GrainResponse, decode_command, encode_value_b64};
use crate::logger::{GrainLogger, PrintLogger, RemoteLogger};
use crate::settings::GrainSettings;

/// Read-only per-process state shared by every execution: the residual
/// CLI arguments and the config mapping.
#[derive(Debug, Default)]
pub struct GrainEnv {
    pub args: Vec<String>,
    pub config: HashMap<String, String>,
}

impl GrainEnv {
    pub fn from_settings(settings: &GrainSettings) -> Self {
        Self {
            args: settings.args.clone(),
            config: settings.config.clone(),
        }
    }
}

/// Tool bundle handed to the handler alongside the decoded command.
pub struct GrainTools {
    logger: Arc<dyn GrainLogger>,
    env: Arc<GrainEnv>,
}

impl GrainTools {
    pub fn logger(&self) -> &dyn GrainLogger {
        self.logger.as_ref()
    }

    /// Residual CLI arguments, after protocol flags were stripped.
    pub fn args(&self) -> &[String] {
        &self.env.args
    }

    pub fn config(&self) -> &HashMap<String, String> {
        &self.env.config
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.env.config.get(key).map(String::as_str)
    }
}

/// Fault returned by a handler.
///
/// `code` is the orchestrator-visible error code: handlers pick a
/// non-negative one; faults the pipeline catches itself carry `"-1"`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Internal fault, reported with code `"-1"`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "-1".to_string(),
            message: message.into(),
        }
    }
}

/// User logic invoked once per command. Exactly one handler per process.
#[async_trait::async_trait]
pub trait GrainHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        command: &GrainCommand,
        tools: &GrainTools,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// Which logger executions receive; remote mode carries the connection sink.
#[derive(Clone)]
pub enum LogMode {
    Local,
    Remote(FrameSink),
}

impl LogMode {
    fn logger_for(&self, execution_id: &str) -> Arc<dyn GrainLogger> {
        match self {
            Self::Local => Arc::new(PrintLogger),
            Self::Remote(sink) => Arc::new(RemoteLogger::new(sink.clone(), execution_id)),
        }
    }
}

/// Run one encoded command through the handler.
///
/// A decode failure is escalated to the caller (fatal in oneshot, reported
/// as an ERROR frame in server mode). Handler faults and panics never
/// escape: they become a `success=false` response. The decoded command is
/// returned with the response so the caller can address the reply frame.
pub async fn execute<H: GrainHandler + ?Sized>(
    encoded: &str,
    handler: &H,
    env: &Arc<GrainEnv>,
    log_mode: &LogMode,
) -> Result<(GrainResponse, GrainCommand), DecodeError> {
    let command = decode_command(encoded)?;
    tracing::debug!(
        flow = %command.flow_uid,
        execution = %command.execution_id,
        "Executing command"
    );

    let tools = GrainTools {
        logger: log_mode.logger_for(&command.execution_id),
        env: Arc::clone(env),
    };

    let outcome = AssertUnwindSafe(handler.handle(&command, &tools))
        .catch_unwind()
        .await;

    let response = match outcome {
        Ok(Ok(value)) => GrainResponse::done(&command.execution_id, encode_value_b64(&value)),
        Ok(Err(fault)) => {
            tracing::warn!(
                execution = %command.execution_id,
                code = %fault.code,
                "Handler reported a fault: {}",
                fault.message
            );
            GrainResponse::failed(&command.execution_id, fault.code, fault.message)
        }
        Err(panic) => {
            let message = panic_text(panic);
            tracing::error!(execution = %command.execution_id, "Handler panicked: {message}");
            GrainResponse::failed(&command.execution_id, "-1", message)
        }
    };

    Ok((response, command))
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::encode_command;
    use serde_json::json;

    struct CalcHandler;

    #[async_trait::async_trait]
    impl GrainHandler for CalcHandler {
        async fn handle(
            &self,
            command: &GrainCommand,
            _tools: &GrainTools,
        ) -> Result<serde_json::Value, HandlerError> {
            match command.content.as_str() {
                "2+2" => Ok(json!("4")),
                "nothing" => Ok(json!(null)),
                "fail" => Err(HandlerError::new(7, "no such operation")),
                "panic" => panic!("boom"),
                other => Err(HandlerError::internal(format!("unparseable: {other}"))),
            }
        }
    }

    fn encoded(content: &str) -> String {
        encode_command(&GrainCommand {
            flow_uid: "f1".to_string(),
            execution_id: "e1".to_string(),
            content: content.to_string(),
        })
        .unwrap()
    }

    fn env() -> Arc<GrainEnv> {
        Arc::new(GrainEnv::default())
    }

    #[tokio::test]
    async fn success_produces_code_zero_and_content() {
        let (response, command) = execute(&encoded("2+2"), &CalcHandler, &env(), &LogMode::Local)
            .await
            .unwrap();

        assert_eq!(command.execution_id, "e1");
        assert_eq!(
            response,
            GrainResponse::done("e1", encode_value_b64(&json!("4")))
        );
        assert_eq!(response.error_code, "0");
        assert_eq!(response.message, "");
    }

    #[tokio::test]
    async fn empty_result_has_no_content() {
        let (response, _) = execute(&encoded("nothing"), &CalcHandler, &env(), &LogMode::Local)
            .await
            .unwrap();

        assert!(response.success);
        assert!(response.content.is_none());
    }

    #[tokio::test]
    async fn handler_fault_is_caught() {
        let (response, _) = execute(&encoded("fail"), &CalcHandler, &env(), &LogMode::Local)
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.error_code, "7");
        assert_eq!(response.message, "no such operation");
        assert!(response.content.is_none());
    }

    #[tokio::test]
    async fn handler_panic_is_caught() {
        let (response, _) = execute(&encoded("panic"), &CalcHandler, &env(), &LogMode::Local)
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.error_code, "-1");
        assert!(response.message.contains("boom"));
    }

    #[tokio::test]
    async fn decode_failure_escalates_without_invoking_handler() {
        let result = execute("!!garbage!!", &CalcHandler, &env(), &LogMode::Local).await;
        assert!(matches!(result, Err(DecodeError::Base64(_))));
    }

    #[tokio::test]
    async fn tools_expose_args_and_config() {
        struct Inspect;

        #[async_trait::async_trait]
        impl GrainHandler for Inspect {
            async fn handle(
                &self,
                _command: &GrainCommand,
                tools: &GrainTools,
            ) -> Result<serde_json::Value, HandlerError> {
                assert_eq!(tools.args(), ["residual".to_string()]);
                assert_eq!(tools.config_value("region"), Some("eu-west"));
                tools.logger().info("inspected");
                Ok(json!(null))
            }
        }

        let env = Arc::new(GrainEnv {
            args: vec!["residual".to_string()],
            config: HashMap::from([("region".to_string(), "eu-west".to_string())]),
        });
        let (response, _) = execute(&encoded("x"), &Inspect, &env, &LogMode::Local)
            .await
            .unwrap();
        assert!(response.success);
    }
}
