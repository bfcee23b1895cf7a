//! Reader loop: routes inbound frames by message type.
//!
//! PING is answered inline so keepalives are never delayed behind queued
//! user work; USER frames are handed to a spawned task and the loop moves
//! straight on, which is what lets commands complete out of order. EOF and
//! connection faults end the loop as a normal shutdown, never as an error
//! to propagate.

use std::io;
use std::sync::Arc;

use futures::StreamExt;

use crate::connection::{FrameReader, FrameSink};
use crate::envelope::{GrainResponse, encode_response};
use crate::frame::{Frame, MessageType};
use crate::pipeline::{GrainEnv, GrainHandler, LogMode, execute};

/// Drive the connection until the orchestrator hangs up.
///
/// Every USER frame produces exactly one response frame; once a command is
/// spawned it runs to completion, there is no cancellation.
pub async fn run_dispatcher<H: GrainHandler>(
    mut reader: FrameReader,
    sink: FrameSink,
    handler: Arc<H>,
    env: Arc<GrainEnv>,
) -> io::Result<()> {
    loop {
        match reader.next().await {
            Some(Ok(frame)) => match frame.message_type {
                MessageType::Ping => {
                    tracing::trace!(id = %frame.correlation_id, "Ping");
                    let pong = Frame::empty(MessageType::Pong, frame.correlation_id);
                    if let Err(e) = sink.send(pong).await {
                        tracing::error!(error = %e, "Failed to send pong, stopping");
                        break;
                    }
                }
                MessageType::User => {
                    let handler = Arc::clone(&handler);
                    let env = Arc::clone(&env);
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        handle_user_frame(frame, handler.as_ref(), &env, sink).await;
                    });
                }
                other => {
                    tracing::trace!(?other, id = %frame.correlation_id, "Ignoring frame");
                }
            },
            Some(Err(e)) => {
                // truncated frames land here too; treated the same as EOF
                tracing::info!(error = %e, "Connection fault, stopping");
                break;
            }
            None => {
                tracing::info!("Connection closed by orchestrator");
                break;
            }
        }
    }

    println!("Server stopped");
    Ok(())
}

/// Decode, execute, and answer one USER frame.
///
/// Decode failures come back as an ERROR-type frame so the orchestrator
/// can still correlate them; the connection stays open either way.
async fn handle_user_frame<H: GrainHandler + ?Sized>(
    frame: Frame,
    handler: &H,
    env: &Arc<GrainEnv>,
    sink: FrameSink,
) {
    let correlation_id = frame.correlation_id;
    let encoded = String::from_utf8_lossy(&frame.body).into_owned();

    let (message_type, response) =
        match execute(&encoded, handler, env, &LogMode::Remote(sink.clone())).await {
            Ok((response, _command)) => (MessageType::User, response),
            Err(e) => {
                tracing::error!(id = %correlation_id, error = %e, "Failed to decode inbound command");
                (
                    MessageType::Error,
                    GrainResponse::failed("", "-1", e.to_string()),
                )
            }
        };

    let body = match encode_response(&response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(id = %correlation_id, error = %e, "Failed to encode response");
            return;
        }
    };

    if let Err(e) = sink.send(Frame::new(message_type, correlation_id, body)).await {
        tracing::error!(error = %e, "Failed to send response frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{connect, split};
    use crate::envelope::{GrainCommand, decode_command, encode_command};
    use crate::pipeline::{GrainTools, HandlerError};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use uuid::Uuid;

    /// Echoes the command payload back, slowly enough that a queued PONG
    /// observably beats it onto the wire.
    struct SlowEcho;

    #[async_trait::async_trait]
    impl GrainHandler for SlowEcho {
        async fn handle(
            &self,
            command: &GrainCommand,
            _tools: &GrainTools,
        ) -> Result<serde_json::Value, HandlerError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!(command.content))
        }
    }

    fn user_frame(execution_id: &str, content: &str) -> Frame {
        let body = encode_command(&GrainCommand {
            flow_uid: "flow".to_string(),
            execution_id: execution_id.to_string(),
            content: content.to_string(),
        })
        .unwrap();
        Frame::new(MessageType::User, Uuid::new_v4().to_string(), body)
    }

    fn decode_response(frame: &Frame) -> GrainResponse {
        let document = BASE64
            .decode(String::from_utf8_lossy(&frame.body).as_bytes())
            .unwrap();
        serde_json::from_slice(&document).unwrap()
    }

    async fn start_grain(
        listener: &TcpListener,
    ) -> (tokio::task::JoinHandle<io::Result<()>>, TcpStream) {
        let port = listener.local_addr().unwrap().port();
        let grain = tokio::spawn(async move {
            let (reader, sink) = connect("127.0.0.1", port).await?;
            run_dispatcher(reader, sink, Arc::new(SlowEcho), Arc::new(GrainEnv::default())).await
        });
        let (stream, _) = listener.accept().await.unwrap();
        (grain, stream)
    }

    #[tokio::test]
    async fn ping_yields_pong_before_queued_user_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (grain, stream) = start_grain(&listener).await;
        let (mut reader, sink) = split(stream);

        let user = user_frame("e1", "payload");
        let user_id = user.correlation_id.clone();
        sink.send(user).await.unwrap();

        let ping_id = Uuid::new_v4().to_string();
        sink.send(Frame::empty(MessageType::Ping, ping_id.clone()))
            .await
            .unwrap();

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.message_type, MessageType::Pong);
        assert_eq!(first.correlation_id, ping_id);
        assert!(first.body.is_empty());

        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.message_type, MessageType::User);
        assert_eq!(second.correlation_id, user_id);
        assert!(decode_response(&second).success);

        drop(reader);
        drop(sink);
        grain.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn concurrent_commands_answer_with_their_own_ids() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (grain, stream) = start_grain(&listener).await;
        let (mut reader, sink) = split(stream);

        let first = user_frame("e1", "alpha");
        let second = user_frame("e2", "beta");
        let mut expected = vec![
            (first.correlation_id.clone(), "alpha".to_string()),
            (second.correlation_id.clone(), "beta".to_string()),
        ];
        sink.send(first).await.unwrap();
        sink.send(second).await.unwrap();

        for _ in 0..2 {
            let frame = reader.next().await.unwrap().unwrap();
            assert_eq!(frame.message_type, MessageType::User);
            let response = decode_response(&frame);
            assert!(response.success);

            let position = expected
                .iter()
                .position(|(id, _)| *id == frame.correlation_id)
                .expect("response for unknown correlation id");
            let (_, content) = expected.remove(position);
            let echoed = String::from_utf8(
                BASE64.decode(response.content.unwrap().as_bytes()).unwrap(),
            )
            .unwrap();
            // SlowEcho returns the payload as a JSON string scalar
            assert_eq!(echoed, content);
        }
        assert!(expected.is_empty());

        drop(reader);
        drop(sink);
        grain.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn undecodable_command_reports_error_frame_and_connection_survives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (grain, stream) = start_grain(&listener).await;
        let (mut reader, sink) = split(stream);

        let bad = Frame::new(
            MessageType::User,
            Uuid::new_v4().to_string(),
            "!!not base64!!".to_string(),
        );
        let bad_id = bad.correlation_id.clone();
        sink.send(bad).await.unwrap();

        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.message_type, MessageType::Error);
        assert_eq!(frame.correlation_id, bad_id);
        let response = decode_response(&frame);
        assert!(!response.success);
        assert_eq!(response.error_code, "-1");

        // connection is still serviceable after the failure
        let good = user_frame("e3", "still alive");
        let good_id = good.correlation_id.clone();
        sink.send(good).await.unwrap();
        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.correlation_id, good_id);
        assert!(decode_response(&frame).success);

        drop(reader);
        drop(sink);
        grain.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn peer_close_mid_frame_stops_loop_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (grain, mut stream) = start_grain(&listener).await;

        // length prefix promising 100 bytes, then hang up
        stream.write_all(&[100, 0, 0]).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        grain.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unhandled_message_types_are_ignored() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (grain, stream) = start_grain(&listener).await;
        let (mut reader, sink) = split(stream);

        sink.send(Frame::empty(MessageType::Pong, Uuid::new_v4().to_string()))
            .await
            .unwrap();
        sink.send(Frame::empty(MessageType::Unknown(42), Uuid::new_v4().to_string()))
            .await
            .unwrap();

        // loop is still alive and answering
        let ping_id = Uuid::new_v4().to_string();
        sink.send(Frame::empty(MessageType::Ping, ping_id.clone()))
            .await
            .unwrap();
        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.message_type, MessageType::Pong);
        assert_eq!(frame.correlation_id, ping_id);

        drop(reader);
        drop(sink);
        grain.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn remote_logger_notifications_reach_the_orchestrator() {
        struct Chatty;

        #[async_trait::async_trait]
        impl GrainHandler for Chatty {
            async fn handle(
                &self,
                _command: &GrainCommand,
                tools: &GrainTools,
            ) -> Result<serde_json::Value, HandlerError> {
                tools.logger().info("working on it");
                // give the fire-and-forget send a chance to land first
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!(null))
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let grain = tokio::spawn(async move {
            let (reader, sink) = connect("127.0.0.1", port).await?;
            run_dispatcher(reader, sink, Arc::new(Chatty), Arc::new(GrainEnv::default())).await
        });
        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, sink) = split(stream);

        sink.send(user_frame("e9", "talk")).await.unwrap();

        let mut saw_log = false;
        for _ in 0..2 {
            let frame = reader.next().await.unwrap().unwrap();
            if frame.message_type == MessageType::System {
                let envelope: crate::envelope::LogEnvelope =
                    serde_json::from_slice(&frame.body).unwrap();
                assert_eq!(envelope.kind, "Log");
                assert_eq!(envelope.execution_id, "e9");
                assert_eq!(envelope.level, 2);
                assert_eq!(
                    BASE64.decode(envelope.message.as_bytes()).unwrap(),
                    b"working on it"
                );
                // notification ids are fresh, not the command's correlation id
                assert_eq!(frame.correlation_id.len(), 36);
                saw_log = true;
            } else {
                assert_eq!(frame.message_type, MessageType::User);
                assert!(decode_response(&frame).success);
            }
        }
        assert!(saw_log, "expected a SYSTEM log frame");

        drop(reader);
        drop(sink);
        grain.await.unwrap().unwrap();
    }
}
