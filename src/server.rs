//! Line-protocol front-end
//!
//! Accepts one JSON command per line and answers with JSON replies. Open
//! requests are routed through [`RemoteRouter`]; the reply for a remote
//! channel is sent once its peer is ready or has failed.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};
use crate::peer::RemotePeer;
use crate::router::{RemoteRouter, RouteOptions};

/// Problem reported for a channel whose peer went away without a failure
pub const TERMINATED: &str = "terminated";

/// Replies written to the front-end
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Reply {
    /// The channel is served by a remote peer that is now running
    Ready { channel: String, host: String },
    /// The channel is for this machine and was not routed
    Local { channel: String },
    /// The channel cannot be served
    Close {
        channel: String,
        #[serde(flatten)]
        problem: Map<String, Value>,
    },
}

/// Router front-end
pub struct RouterServer {
    router: RemoteRouter,
    /// Peers by the channel that opened them
    channels: Arc<DashMap<String, Arc<RemotePeer>>>,
    replies: mpsc::UnboundedSender<Reply>,
}

impl RouterServer {
    pub fn new(router: RemoteRouter, replies: mpsc::UnboundedSender<Reply>) -> Self {
        Self {
            router,
            channels: Arc::new(DashMap::new()),
            replies,
        }
    }

    pub fn router(&self) -> &RemoteRouter {
        &self.router
    }

    /// Handle one line of input
    pub async fn handle_line(&self, line: &str) -> Result<()> {
        let message: Value = serde_json::from_str(line)?;
        self.handle_message(message).await
    }

    pub async fn handle_message(&self, message: Value) -> Result<()> {
        let command = message
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| RouterError::protocol("message without a command"))?;
        debug!("Handling {} command", command);

        match command {
            "open" => self.open(&message),
            "kill" => {
                let host = message.get("host").and_then(Value::as_str);
                let group = message.get("group").and_then(Value::as_str);
                self.router.kill(host, group, &message).await;
                Ok(())
            }
            "authorize" => self.peer_for(&message)?.authorize(&message).await,
            "superuser-init-done" => {
                self.peer_for(&message)?.superuser_init_done();
                Ok(())
            }
            "close" => {
                let channel = channel_of(&message)?;
                if let Some((_, peer)) = self.channels.remove(channel) {
                    // Private peers belong to their channel alone
                    if peer.is_private() {
                        peer.close().await;
                    }
                }
                Ok(())
            }
            other => Err(RouterError::protocol(format!("unknown command: {}", other))),
        }
    }

    fn open(&self, message: &Value) -> Result<()> {
        let channel = channel_of(message)?.to_string();
        let options: RouteOptions = serde_json::from_value(message.clone())?;

        let Some(peer) = self.router.route(&options) else {
            self.send(Reply::Local { channel });
            return Ok(());
        };
        self.channels.insert(channel.clone(), Arc::clone(&peer));

        let replies = self.replies.clone();
        let channels = Arc::clone(&self.channels);
        tokio::spawn(async move {
            let reply = match peer.wait_ready().await {
                Ok(()) => Reply::Ready {
                    channel,
                    host: peer.host().to_string(),
                },
                Err(e) => {
                    // A closed channel no longer owns the peer; a reopen may have replaced it
                    channels.remove_if(&channel, |_, open| open.id() == peer.id());
                    Reply::Close {
                        channel,
                        problem: problem_fields(&e),
                    }
                }
            };
            // The receiver is gone only during shutdown
            let _ = replies.send(reply);
        });
        Ok(())
    }

    fn peer_for(&self, message: &Value) -> Result<Arc<RemotePeer>> {
        let channel = channel_of(message)?;
        self.channels
            .get(channel)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RouterError::protocol(format!("unknown channel: {}", channel)))
    }

    fn send(&self, reply: Reply) {
        if self.replies.send(reply).is_err() {
            warn!("Reply dropped, output is closed");
        }
    }

    /// Close every peer
    pub async fn shutdown(&self) {
        info!("Shutting down SSH router...");
        self.channels.clear();
        self.router.shutdown().await;
    }
}

fn channel_of(message: &Value) -> Result<&str> {
    message
        .get("channel")
        .and_then(Value::as_str)
        .ok_or_else(|| RouterError::protocol("message without a channel"))
}

/// Problem fields for a close reply
pub fn problem_fields(error: &RouterError) -> Map<String, Value> {
    match error {
        RouterError::Peer(problem) => problem.to_fields(),
        other => {
            let mut fields = Map::new();
            fields.insert("problem".to_string(), Value::from(TERMINATED));
            fields.insert("message".to_string(), Value::from(other.to_string()));
            fields
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::peer::PeerState;
    use crate::router::RouterConfig;
    use crate::testing::{Outcome, ScriptedTransport};

    fn server(
        outcome: Outcome,
    ) -> (
        RouterServer,
        Arc<ScriptedTransport>,
        mpsc::UnboundedReceiver<Reply>,
    ) {
        let transport = Arc::new(ScriptedTransport::new(outcome));
        let router = RemoteRouter::new(RouterConfig::new("localhost", "me"), transport.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        (RouterServer::new(router, tx), transport, rx)
    }

    #[tokio::test]
    async fn test_open_local() {
        let (server, _, mut rx) = server(Outcome::Connect);
        server
            .handle_line(r#"{"command": "open", "channel": "1"}"#)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Reply::Local {
                channel: "1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_open_remote_ready() {
        let (server, _, mut rx) = server(Outcome::Connect);
        server
            .handle_line(r#"{"command": "open", "channel": "1", "host": "example.com"}"#)
            .await
            .unwrap();
        let reply = rx.recv().await.unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"command": "ready", "channel": "1", "host": "example.com"})
        );
    }

    #[tokio::test]
    async fn test_open_remote_failure_reports_problem() {
        let (server, _, mut rx) = server(Outcome::Auth {
            methods: &["publickey"],
            accept_password: false,
            locked_key: None,
        });
        server
            .handle_line(r#"{"command": "open", "channel": "7", "host": "example.com"}"#)
            .await
            .unwrap();
        let reply = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["command"], "close");
        assert_eq!(reply["channel"], "7");
        assert_eq!(reply["problem"], "authentication-failed");
        assert_eq!(reply["auth-method-results"], json!({"publickey": "not-provided"}));

        // The channel was closed, so it no longer reaches the failed peer
        assert!(matches!(
            server
                .handle_line(r#"{"command": "superuser-init-done", "channel": "7"}"#)
                .await,
            Err(RouterError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_authorize_and_superuser_init_done() {
        let (server, transport, mut rx) = server(Outcome::Connect);
        server
            .handle_message(json!({
                "command": "open",
                "channel": "1",
                "host": "example.com",
                "password": "hunter2",
            }))
            .await
            .unwrap();
        rx.recv().await.unwrap();

        server
            .handle_message(json!({
                "command": "authorize",
                "channel": "1",
                "challenge": "plain1:abc",
                "cookie": "c1",
            }))
            .await
            .unwrap();
        server
            .handle_message(json!({"command": "superuser-init-done", "channel": "1"}))
            .await
            .unwrap();

        let messages = transport.control_messages(0);
        assert_eq!(messages[1]["response"], "hunter2");
    }

    #[tokio::test]
    async fn test_close_private_channel_closes_peer() {
        let (server, _, mut rx) = server(Outcome::Connect);
        server
            .handle_message(json!({
                "command": "open",
                "channel": "1",
                "host": "example.com",
                "session": "private",
            }))
            .await
            .unwrap();
        rx.recv().await.unwrap();
        let peer = server.peer_for(&json!({"channel": "1"})).unwrap();

        server
            .handle_message(json!({"command": "close", "channel": "1"}))
            .await
            .unwrap();
        assert_eq!(peer.state(), PeerState::Closed);
        assert!(server.peer_for(&json!({"channel": "1"})).is_err());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let (server, _, _rx) = server(Outcome::Connect);
        assert!(matches!(
            server.handle_line("not json").await,
            Err(RouterError::Json(_))
        ));
        assert!(matches!(
            server.handle_message(json!({"channel": "1"})).await,
            Err(RouterError::Protocol(_))
        ));
        assert!(matches!(
            server.handle_message(json!({"command": "frobnicate"})).await,
            Err(RouterError::Protocol(_))
        ));
        assert!(matches!(
            server
                .handle_message(json!({"command": "authorize", "channel": "9"}))
                .await,
            Err(RouterError::Protocol(_))
        ));
    }

    #[test]
    fn test_problem_fields_for_closed_peer() {
        let fields = problem_fields(&RouterError::connection("peer closed"));
        assert_eq!(fields["problem"], TERMINATED);
    }
}
