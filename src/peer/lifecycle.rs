//! Peer lifecycle and bridge I/O
//!
//! [`PeerCore`] holds the state machine shared by a peer's connect task, its
//! exit watcher and any caller writing control messages. State lives in a
//! `watch` channel so completion can be awaited by any number of observers.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::control::control_frame;
use crate::error::{PeerError, Result, RouterError};
use crate::ssh::{LoginSession, RemoteProcess};

/// Lifecycle of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Created,
    Connecting,
    /// The bridge is running and accepts control messages
    Ready,
    Failed(PeerError),
    Closed,
}

impl PeerState {
    /// `Failed` and `Closed` are final as far as routing is concerned
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Failed(_) | PeerState::Closed)
    }
}

/// A frame for the bridge writer and where to report the outcome
type WriteRequest = (Vec<u8>, oneshot::Sender<io::Result<()>>);

#[derive(Default)]
struct PeerIo {
    /// Frames written before the bridge was running
    pending: Vec<Vec<u8>>,
    writer: Option<mpsc::UnboundedSender<WriteRequest>>,
    writer_task: Option<JoinHandle<()>>,
    session: Option<Box<dyn LoginSession>>,
    exit_task: Option<JoinHandle<()>>,
}

impl PeerIo {
    /// Drop the bridge handles and hand back the session to disconnect
    ///
    /// The exit watcher calls this on itself, so it only aborts that task
    /// when asked to.
    fn teardown(&mut self, abort_exit: bool) -> Option<Box<dyn LoginSession>> {
        self.pending.clear();
        self.writer = None;
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        if let Some(task) = self.exit_task.take() {
            if abort_exit {
                task.abort();
            }
        }
        self.session.take()
    }
}

pub struct PeerCore {
    state: watch::Sender<PeerState>,
    io: Mutex<PeerIo>,
}

impl Default for PeerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerCore {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(PeerState::Created),
            io: Mutex::new(PeerIo::default()),
        }
    }

    pub fn state(&self) -> PeerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PeerState> {
        self.state.subscribe()
    }

    /// `Created` → `Connecting`
    pub fn set_connecting(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == PeerState::Created {
                *state = PeerState::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Record a failure unless the peer already finished
    pub fn fail(&self, error: PeerError) -> bool {
        self.state.send_if_modified(move |state| {
            if state.is_terminal() {
                false
            } else {
                *state = PeerState::Failed(error);
                true
            }
        })
    }

    fn mark_closed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == PeerState::Closed {
                false
            } else {
                *state = PeerState::Closed;
                true
            }
        })
    }

    /// Resolves once the peer is ready or has failed
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| *state == PeerState::Ready || state.is_terminal())
            .await
            .map_err(|_| RouterError::connection("peer state dropped"))?
            .clone();

        match state {
            PeerState::Ready => Ok(()),
            PeerState::Failed(error) => Err(RouterError::Peer(error)),
            _ => Err(RouterError::connection("peer closed")),
        }
    }

    /// Resolves with the first terminal state
    pub async fn wait_done(&self) -> PeerState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(PeerState::is_terminal).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so this cannot happen while we are borrowed
            Err(_) => PeerState::Closed,
        };
        state
    }

    /// Write a control-channel message, queueing it until the bridge runs
    pub async fn write_control<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let frame = control_frame(message)?;
        self.write_frame(frame).await
    }

    /// Write one frame, or queue it while the bridge is not running yet
    ///
    /// Frames go through the bridge writer task, so a stalled bridge never
    /// holds the lock that `close` needs.
    pub async fn write_frame(&self, frame: Vec<u8>) -> Result<()> {
        let ack = {
            let mut io = self.io.lock().await;
            match self.state() {
                PeerState::Failed(error) => return Err(RouterError::Peer(error)),
                PeerState::Closed => return Err(RouterError::connection("peer closed")),
                _ => {}
            }
            let Some(writer) = io.writer.clone() else {
                io.pending.push(frame);
                return Ok(());
            };
            let (tx, rx) = oneshot::channel();
            writer
                .send((frame, tx))
                .map_err(|_| RouterError::connection("bridge stdin closed"))?;
            rx
        };

        ack.await
            .map_err(|_| RouterError::connection("bridge stdin closed"))??;
        Ok(())
    }

    /// Hand the running bridge to the core and move to `Ready`
    ///
    /// `preamble` is written before any queued frame. If the peer was closed
    /// while connecting, the session is torn down instead.
    pub async fn attach(
        self: &Arc<Self>,
        session: Box<dyn LoginSession>,
        process: RemoteProcess,
        preamble: Vec<u8>,
    ) -> Result<()> {
        let RemoteProcess { stdin, exit } = process;

        let ack = {
            let mut io = self.io.lock().await;
            if self.state().is_terminal() {
                drop(io);
                debug!("Peer finished before the bridge started, disconnecting");
                session.disconnect().await;
                return Err(RouterError::connection("peer closed"));
            }

            let mut first = preamble;
            for frame in io.pending.drain(..) {
                first.extend_from_slice(&frame);
            }

            let (writer, requests) = mpsc::unbounded_channel();
            let (tx, ack) = oneshot::channel();
            // The receiver is alive until the writer task below ends
            let _ = writer.send((first, tx));
            io.writer = Some(writer);
            io.writer_task = Some(tokio::spawn(run_writer(stdin, requests)));
            io.session = Some(session);

            let core = Arc::clone(self);
            io.exit_task = Some(tokio::spawn(async move {
                let status = exit.await;
                debug!("Bridge exited with status {:?}", status);
                core.release().await;
            }));
            ack
        };

        match ack.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to write to the bridge: {}", e);
                let session = self.io.lock().await.teardown(true);
                if let Some(session) = session {
                    session.disconnect().await;
                }
                return Err(e.into());
            }
            Err(_) => return Err(RouterError::connection("peer closed")),
        }

        let ready = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = PeerState::Ready;
                true
            }
        });
        if ready {
            Ok(())
        } else {
            Err(RouterError::connection("peer closed"))
        }
    }

    /// Close the bridge and the session; later calls are no-ops
    pub async fn close(&self) {
        self.mark_closed();
        let session = self.io.lock().await.teardown(true);
        if let Some(session) = session {
            session.disconnect().await;
        }
    }

    /// Bridge exit: same as `close`, minus aborting the exit watcher we run in
    async fn release(&self) {
        self.mark_closed();
        let session = self.io.lock().await.teardown(false);
        if let Some(session) = session {
            session.disconnect().await;
        }
    }
}

/// Owns the bridge stdin and writes frames in the order they were sent
async fn run_writer(
    mut stdin: Pin<Box<dyn AsyncWrite + Send>>,
    mut requests: mpsc::UnboundedReceiver<WriteRequest>,
) {
    while let Some((frame, ack)) = requests.recv().await {
        let result = write_all_flush(&mut stdin, &frame).await;
        let failed = result.is_err();
        let _ = ack.send(result);
        if failed {
            break;
        }
    }
}

async fn write_all_flush(
    stdin: &mut Pin<Box<dyn AsyncWrite + Send>>,
    frame: &[u8],
) -> io::Result<()> {
    stdin.write_all(frame).await?;
    stdin.flush().await
}
