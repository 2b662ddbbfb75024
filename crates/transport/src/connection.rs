use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use snafu::IntoError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::error::{ChannelClosedSnafu, ConnectSnafu, NotOpenSnafu, TransportResult};
use crate::frame::{InboundEvent, OutboundFrame, decode_inbound};
use crate::reconnect::ReconnectPolicy;

/// Lifecycle of the single transport owned by a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Typed notifications delivered to the consumer of a connection.
///
/// Raw payloads are decoded before they get here; malformed ones never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Frame(InboundEvent),
    Failed { detail: String },
    Reconnecting { attempt: u32, delay: Duration },
    Closed,
}

pub type ConnectionWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A manager plus the worker future that drives its transport.
///
/// The caller decides which executor runs the worker.
pub struct ConnectionHandle {
    pub manager: ConnectionManager,
    pub worker: ConnectionWorker,
}

/// Owns one bidirectional message connection.
pub struct ConnectionManager {
    url: String,
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: mpsc::UnboundedSender<String>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ConnectionManager {
    /// Builds a websocket connection to `url`; nothing happens until the
    /// returned worker is polled.
    pub fn connect(url: impl Into<String>, policy: ReconnectPolicy) -> ConnectionHandle {
        let url = url.into();
        let (manager_side, worker_side) = channel_pair();
        let manager = Self::from_side(url.clone(), manager_side);
        let worker: ConnectionWorker = Box::pin(run_connection_worker(
            url,
            policy,
            worker_side.link,
            worker_side.outbound_rx,
            worker_side.shutdown_rx,
        ));

        ConnectionHandle { manager, worker }
    }

    /// Builds an in-process connection whose remote side is driven by the
    /// returned [`LoopbackPeer`]. Used by headless hosts and tests.
    pub fn loopback(url: impl Into<String>) -> (Self, LoopbackPeer) {
        let (manager_side, worker_side) = channel_pair();
        let manager = Self::from_side(url.into(), manager_side);
        let peer = LoopbackPeer {
            link: worker_side.link,
            outbound_rx: worker_side.outbound_rx,
            shutdown_rx: worker_side.shutdown_rx,
        };

        (manager, peer)
    }

    fn from_side(url: String, side: ManagerSide) -> Self {
        Self {
            url,
            state_rx: side.state_rx,
            outbound_tx: side.outbound_tx,
            events_rx: side.events_rx,
            shutdown_tx: Some(side.shutdown_tx),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queues one frame for the remote side.
    ///
    /// Never panics and never blocks: when the transport is not open the frame
    /// is dropped, the failure is logged and returned for the caller to report.
    pub fn send(&self, frame: &OutboundFrame) -> TransportResult<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            tracing::error!(
                url = %self.url,
                state = ?state,
                "connection is not open, dropping frame"
            );
            return NotOpenSnafu {
                stage: "send-frame",
                state,
            }
            .fail();
        }

        let payload = frame.encode()?;
        self.outbound_tx.send(payload).map_err(|_| {
            tracing::error!(url = %self.url, "connection worker stopped, dropping frame");
            ChannelClosedSnafu {
                stage: "send-frame",
            }
            .build()
        })
    }

    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events_rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Asks the worker to close the transport. Returns false if it was already
    /// asked or is gone.
    pub fn close(&mut self) -> bool {
        self.shutdown_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.close() {
            tracing::debug!(url = %self.url, "connection closed on teardown");
        }
    }
}

/// Remote end of a [`ConnectionManager::loopback`] connection.
pub struct LoopbackPeer {
    link: EventLink,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl LoopbackPeer {
    pub fn open(&self) {
        self.link
            .transition(ConnectionState::Open, ConnectionEvent::Opened);
    }

    /// Delivers one raw payload as if it arrived on the wire.
    pub fn push_text(&self, payload: &str) -> bool {
        self.link.deliver_raw(payload)
    }

    pub fn fail(&self, detail: impl Into<String>) {
        self.link.transition(
            ConnectionState::Errored,
            ConnectionEvent::Failed {
                detail: detail.into(),
            },
        );
    }

    pub fn close(&self) {
        self.link
            .transition(ConnectionState::Closed, ConnectionEvent::Closed);
    }

    pub fn try_recv_sent(&mut self) -> Option<String> {
        self.outbound_rx.try_recv().ok()
    }

    pub async fn recv_sent(&mut self) -> Option<String> {
        self.outbound_rx.recv().await
    }

    /// True once the manager asked for closure or was dropped.
    pub fn host_closed(&mut self) -> bool {
        !matches!(
            self.shutdown_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

struct ManagerSide {
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: mpsc::UnboundedSender<String>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    shutdown_tx: oneshot::Sender<()>,
}

struct WorkerSide {
    link: EventLink,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: oneshot::Receiver<()>,
}

fn channel_pair() -> (ManagerSide, WorkerSide) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    (
        ManagerSide {
            state_rx,
            outbound_tx,
            events_rx,
            shutdown_tx,
        },
        WorkerSide {
            link: EventLink {
                events_tx,
                state_tx,
            },
            outbound_rx,
            shutdown_rx,
        },
    )
}

/// Worker-side half: publishes state changes and decoded events.
struct EventLink {
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl EventLink {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) -> bool {
        self.events_tx.send(event).is_ok()
    }

    fn transition(&self, state: ConnectionState, event: ConnectionEvent) -> bool {
        self.set_state(state);
        self.emit(event)
    }

    /// Decodes and forwards one payload. Malformed payloads are logged and
    /// dropped. Returns false once nobody is listening.
    fn deliver_raw(&self, payload: &str) -> bool {
        match decode_inbound(payload) {
            Ok(event) => {
                tracing::debug!(kind = event.kind(), "inbound frame decoded");
                self.emit(ConnectionEvent::Frame(event))
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    payload_len = payload.len(),
                    "dropping malformed inbound frame"
                );
                !self.events_tx.is_closed()
            }
        }
    }
}

enum SocketExit {
    Shutdown,
    ReceiverGone,
    ClosedByPeer,
    Failed(String),
}

async fn run_connection_worker(
    url: String,
    policy: ReconnectPolicy,
    link: EventLink,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut attempt = 0u32;

    loop {
        link.set_state(ConnectionState::Connecting);
        tracing::info!(url = %url, attempt, "connecting");

        let connected = tokio::select! {
            _ = &mut shutdown_rx => {
                link.transition(ConnectionState::Closed, ConnectionEvent::Closed);
                return;
            }
            result = connect_async(url.as_str()) => result,
        };

        let exit = match connected {
            Ok((socket, _response)) => {
                attempt = 0;
                tracing::info!(url = %url, "connection open");
                if !link.transition(ConnectionState::Open, ConnectionEvent::Opened) {
                    return;
                }
                pump_socket(socket, &link, &mut outbound_rx, &mut shutdown_rx).await
            }
            Err(source) => {
                let error = ConnectSnafu {
                    stage: "connect",
                    url: url.clone(),
                }
                .into_error(source);
                tracing::warn!(error = %error, "connection attempt failed");
                SocketExit::Failed(error.to_string())
            }
        };

        match exit {
            SocketExit::Shutdown | SocketExit::ReceiverGone => {
                tracing::info!(url = %url, "connection closed by host");
                link.transition(ConnectionState::Closed, ConnectionEvent::Closed);
                return;
            }
            SocketExit::ClosedByPeer => {
                tracing::info!(url = %url, "connection closed by peer");
                link.transition(ConnectionState::Closed, ConnectionEvent::Closed);
            }
            SocketExit::Failed(detail) => {
                link.transition(ConnectionState::Errored, ConnectionEvent::Failed { detail });
            }
        }

        attempt = attempt.saturating_add(1);
        let Some(delay) = policy.delay_for(attempt) else {
            return;
        };

        tracing::info!(
            url = %url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        if !link.emit(ConnectionEvent::Reconnecting { attempt, delay }) {
            return;
        }

        tokio::select! {
            _ = &mut shutdown_rx => {
                link.transition(ConnectionState::Closed, ConnectionEvent::Closed);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn pump_socket<S>(
    mut socket: S,
    link: &EventLink,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SocketExit
where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                let _ = socket.close().await;
                return SocketExit::Shutdown;
            }
            outbound = outbound_rx.recv() => {
                let Some(payload) = outbound else {
                    let _ = socket.close().await;
                    return SocketExit::Shutdown;
                };

                if let Err(error) = socket.send(WsMessage::Text(payload.into())).await {
                    tracing::warn!(error = %error, "failed to write outbound frame");
                    return SocketExit::Failed(error.to_string());
                }
            }
            incoming = socket.next() => {
                let delivered = match incoming {
                    Some(Ok(WsMessage::Text(text))) => link.deliver_raw(text.as_str()),
                    Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => link.deliver_raw(text),
                        Err(error) => {
                            tracing::warn!(error = %error, "dropping non-utf8 binary frame");
                            true
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => return SocketExit::ClosedByPeer,
                    Some(Ok(_)) => true,
                    Some(Err(error)) => {
                        tracing::warn!(error = %error, "connection dropped");
                        return SocketExit::Failed(error.to_string());
                    }
                };

                if !delivered {
                    let _ = socket.close().await;
                    return SocketExit::ReceiverGone;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_before_open_reports_not_open() {
        let (manager, mut peer) = ConnectionManager::loopback("ws://loopback");

        let error = manager
            .send(&OutboundFrame::new("print(1)"))
            .expect_err("connection is still connecting");

        assert!(matches!(
            error,
            crate::TransportError::NotOpen {
                state: ConnectionState::Connecting,
                ..
            }
        ));
        assert_eq!(peer.try_recv_sent(), None);
    }

    #[test]
    fn open_loopback_carries_frames_both_ways() {
        let (mut manager, mut peer) = ConnectionManager::loopback("ws://loopback");
        peer.open();

        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.try_recv(), Some(ConnectionEvent::Opened));

        manager
            .send(&OutboundFrame::new("x = 1"))
            .expect("open connection accepts frames");
        assert_eq!(peer.try_recv_sent().as_deref(), Some(r#"{"code":"x = 1"}"#));

        assert!(peer.push_text(r#"{"final_fixed_code":"x = 2"}"#));
        assert_eq!(
            manager.try_recv(),
            Some(ConnectionEvent::Frame(InboundEvent::Final {
                code: "x = 2".to_string()
            }))
        );
    }

    #[test]
    fn malformed_payloads_never_reach_the_consumer() {
        let (mut manager, peer) = ConnectionManager::loopback("ws://loopback");
        peer.open();
        let _ = manager.try_recv();

        assert!(peer.push_text("{not json"));
        assert_eq!(manager.try_recv(), None);
    }

    #[test]
    fn failure_sets_errored_state() {
        let (mut manager, peer) = ConnectionManager::loopback("ws://loopback");
        peer.fail("refused");

        assert_eq!(manager.state(), ConnectionState::Errored);
        assert_eq!(
            manager.try_recv(),
            Some(ConnectionEvent::Failed {
                detail: "refused".to_string()
            })
        );
    }

    #[test]
    fn dropping_the_manager_signals_closure() {
        let (manager, mut peer) = ConnectionManager::loopback("ws://loopback");
        assert!(!peer.host_closed());

        drop(manager);

        assert!(peer.host_closed());
    }

    #[tokio::test]
    async fn worker_reports_failure_once_without_retry() {
        // Port 9 on localhost is reserved (discard) and expected to refuse.
        let ConnectionHandle {
            mut manager,
            worker,
        } = ConnectionManager::connect("ws://127.0.0.1:9/ws", ReconnectPolicy::Never);

        worker.await;

        assert_eq!(manager.state(), ConnectionState::Errored);
        assert!(matches!(
            manager.try_recv(),
            Some(ConnectionEvent::Failed { .. })
        ));
        assert_eq!(manager.try_recv(), None);
    }
}
