//! Scripted login transport for tests
//!
//! Drives the responder the way a real handshake would, then returns a
//! scripted result. Sessions capture everything written to the bridge.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;

use crate::ssh::quote::quote_argv;
use crate::ssh::{
    ConnectRequest, HostKeySighting, LoginOptions, LoginSession, LoginTransport, RemoteProcess,
    TransportError,
};

pub const TEST_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIA/mf/xhu3/QSvh4/9scogtazfVwXAsEn2fKZoQxFb9V";
pub const TEST_FINGERPRINT: &str = "SHA256:8t/g86saENHk54//DKokfBZccv4R0+3/iKb0P/8YktI";

/// What the next connect attempts do
#[derive(Debug, Clone)]
pub enum Outcome {
    Connect,
    Io(&'static str),
    /// Asks the responder only when the request allows a trust decision
    UnknownHostKey,
    ChangedHostKey,
    Auth {
        methods: &'static [&'static str],
        accept_password: bool,
        locked_key: Option<&'static str>,
    },
    Other(&'static str),
    /// Never completes
    Hang,
}

/// The parts of a [`ConnectRequest`] worth asserting on
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub address: String,
    pub login_name: Option<String>,
    pub port: Option<u16>,
    pub handle_host_key: bool,
    pub options: LoginOptions,
}

#[derive(Default)]
struct Recorded {
    requests: Vec<RecordedRequest>,
    commands: Vec<String>,
    stdin: Vec<SharedBuf>,
    exits: Vec<Option<oneshot::Sender<u32>>>,
}

pub struct ScriptedTransport {
    outcome: Mutex<Outcome>,
    recorded: Arc<Mutex<Recorded>>,
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            recorded: Arc::default(),
            disconnects: Arc::default(),
        }
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn connects(&self) -> usize {
        self.recorded.lock().unwrap().requests.len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.recorded.lock().unwrap().requests.last().cloned()
    }

    pub fn last_command(&self) -> Option<String> {
        self.recorded.lock().unwrap().commands.last().cloned()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Control-channel messages written to the `index`th bridge
    pub fn control_messages(&self, index: usize) -> Vec<Value> {
        let data = self.recorded.lock().unwrap().stdin[index].contents();
        parse_frames(&data)
            .into_iter()
            .filter(|(channel, _)| channel.is_empty())
            .map(|(_, payload)| serde_json::from_slice(&payload).unwrap())
            .collect()
    }

    /// Make the `index`th bridge exit
    pub fn exit_bridge(&self, index: usize, status: u32) {
        if let Some(tx) = self.recorded.lock().unwrap().exits[index].take() {
            let _ = tx.send(status);
        }
    }

    fn session(&self) -> Box<dyn LoginSession> {
        Box::new(FakeSession {
            recorded: self.recorded.clone(),
            disconnected: Arc::default(),
            disconnects: self.disconnects.clone(),
        })
    }
}

fn sighting(reason: &str, host: &str) -> HostKeySighting {
    HostKeySighting {
        reason: reason.to_string(),
        host: host.to_string(),
        algorithm: "ssh-ed25519".to_string(),
        key: TEST_KEY.to_string(),
        fingerprint: TEST_FINGERPRINT.to_string(),
    }
}

#[async_trait]
impl LoginTransport for ScriptedTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn LoginSession>, TransportError> {
        let outcome = self.outcome.lock().unwrap().clone();
        self.recorded.lock().unwrap().requests.push(RecordedRequest {
            address: request.address.clone(),
            login_name: request.login_name.clone(),
            port: request.port,
            handle_host_key: request.handle_host_key,
            options: request.options.clone(),
        });
        let responder = &request.responder;

        match outcome {
            Outcome::Connect => Ok(self.session()),
            Outcome::Io(message) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                message,
            ))),
            Outcome::UnknownHostKey => {
                if request.handle_host_key
                    && responder
                        .do_hostkey(sighting("unknown", &request.address))
                        .await
                {
                    return Ok(self.session());
                }
                Err(TransportError::HostKey { changed: false })
            }
            Outcome::ChangedHostKey => {
                responder
                    .do_hostkey(sighting("changed", &request.address))
                    .await;
                Err(TransportError::HostKey { changed: true })
            }
            Outcome::Auth {
                methods,
                accept_password,
                locked_key,
            } => {
                if let Some(path) = locked_key {
                    let prompt = format!("Enter passphrase for key '{}': ", path);
                    assert!(responder.do_askpass("", &prompt, "").await.is_none());
                }
                if methods.contains(&"password") && request.options.allows_password() {
                    let prompt = format!("{}'s password: ", request.address);
                    let answer = responder.do_askpass("", &prompt, "").await;
                    if answer.is_some() && accept_password {
                        return Ok(self.session());
                    }
                }
                Err(TransportError::Authentication {
                    methods: methods.iter().map(|m| m.to_string()).collect(),
                })
            }
            Outcome::Other(message) => Err(TransportError::other(message)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Session whose bridge writes land in memory
pub struct FakeSession {
    recorded: Arc<Mutex<Recorded>>,
    disconnected: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            recorded: Arc::default(),
            disconnected: Arc::default(),
            disconnects: Arc::default(),
        }
    }

    pub fn disconnected(&self) -> Arc<AtomicBool> {
        self.disconnected.clone()
    }

    pub fn disconnect_count(&self) -> Arc<AtomicUsize> {
        self.disconnects.clone()
    }
}

#[async_trait]
impl LoginSession for FakeSession {
    fn wrap_subprocess_args(&self, argv: &[&str]) -> String {
        quote_argv(argv)
    }

    async fn spawn(&self, command: &str) -> Result<RemoteProcess, TransportError> {
        let buf = SharedBuf::default();
        let (tx, rx) = oneshot::channel();
        {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.commands.push(command.to_string());
            recorded.stdin.push(buf.clone());
            recorded.exits.push(Some(tx));
        }
        Ok(RemoteProcess {
            stdin: Box::pin(buf),
            exit: Box::pin(async move { rx.await.ok() }),
        })
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory writer that can be inspected after being handed out
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl AsyncWrite for SharedBuf {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Split `<length>\n<channel>\n<payload>` frames
pub fn parse_frames(mut data: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut frames = Vec::new();
    while let Some(nl) = data.iter().position(|&b| b == b'\n') {
        let length: usize = std::str::from_utf8(&data[..nl]).unwrap().parse().unwrap();
        let body = &data[nl + 1..nl + 1 + length];
        let split = body.iter().position(|&b| b == b'\n').unwrap();
        let channel = String::from_utf8(body[..split].to_vec()).unwrap();
        frames.push((channel, body[split + 1..].to_vec()));
        data = &data[nl + 1 + length..];
    }
    frames
}

/// Writer that never accepts a byte, like a bridge that stopped reading
pub struct StalledWriter;

impl AsyncWrite for StalledWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}
