use std::time::Duration;

use fixstream_transport::ConnectionManager;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::repair::error::{ControllerGoneSnafu, SubmitResult};
use crate::repair::events::{RepairCommand, TickFired, ViewEvent};
use crate::repair::reveal::RevealToken;
use crate::repair::scroll_manager::ScrollMetrics;
use crate::repair::view::{RepairView, ViewSnapshot};
use crate::settings::Settings;

/// Repeating timer bound to one reveal token. Aborted when dropped.
struct TickTask {
    token: RevealToken,
    handle: JoinHandle<()>,
}

impl TickTask {
    fn spawn(token: RevealToken, period: Duration, ticks_tx: mpsc::Sender<TickFired>) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if ticks_tx.send(TickFired { token }).await.is_err() {
                    break;
                }
            }
        });

        Self { token, handle }
    }
}

impl Drop for TickTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Caller side of a running [`RepairController`].
pub struct RepairHandle {
    commands_tx: mpsc::UnboundedSender<RepairCommand>,
    snapshots: watch::Receiver<ViewSnapshot>,
    events_rx: mpsc::UnboundedReceiver<ViewEvent>,
}

impl RepairHandle {
    /// Queues a submission. Validation happens in the controller; rejections
    /// show up as an [`ViewEvent::ErrorRaised`] and in the snapshot.
    pub fn submit(&self, code: impl Into<String>) -> SubmitResult<()> {
        self.send(RepairCommand::Submit(code.into()))
    }

    pub fn scrolled(&self, metrics: ScrollMetrics) -> SubmitResult<()> {
        self.send(RepairCommand::Scrolled(metrics))
    }

    pub fn jump_to_bottom(&self) -> SubmitResult<()> {
        self.send(RepairCommand::JumpToBottom)
    }

    /// Asks the controller to stop. Returns false if it already stopped.
    pub fn shutdown(&self) -> bool {
        self.commands_tx.send(RepairCommand::Shutdown).is_ok()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.clone()
    }

    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ViewEvent> {
        self.events_rx.try_recv().ok()
    }

    fn send(&self, command: RepairCommand) -> SubmitResult<()> {
        self.commands_tx.send(command).map_err(|_| {
            ControllerGoneSnafu {
                stage: "queue-repair-command",
            }
            .build()
        })
    }
}

/// Drives one [`RepairView`] from user commands, connection events, and
/// reveal ticks on a single task.
pub struct RepairController {
    view: RepairView,
    connection: ConnectionManager,
    tick_interval: Duration,
    commands_rx: mpsc::UnboundedReceiver<RepairCommand>,
    ticks_tx: mpsc::Sender<TickFired>,
    ticks_rx: mpsc::Receiver<TickFired>,
    tick_task: Option<TickTask>,
    snapshots_tx: watch::Sender<ViewSnapshot>,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
}

impl RepairController {
    pub fn new(settings: &Settings, connection: ConnectionManager) -> (Self, RepairHandle) {
        let mut view = RepairView::new(settings);
        view.set_connection_state(connection.state());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (ticks_tx, ticks_rx) = mpsc::channel(1);
        let (snapshots_tx, snapshots) = watch::channel(view.snapshot());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let controller = Self {
            view,
            connection,
            tick_interval: settings.tick_interval(),
            commands_rx,
            ticks_tx,
            ticks_rx,
            tick_task: None,
            snapshots_tx,
            events_tx,
        };
        let handle = RepairHandle {
            commands_tx,
            snapshots,
            events_rx,
        };

        (controller, handle)
    }

    /// Runs until shutdown is requested or every handle is dropped, then
    /// closes the connection.
    pub async fn run(mut self) {
        tracing::info!(url = %self.connection.url(), "repair controller started");
        let mut connection_live = true;

        loop {
            // Commands first so a resubmission is applied before any frame or
            // tick that is already waiting.
            tokio::select! {
                biased;

                command = self.commands_rx.recv() => match command {
                    Some(RepairCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = self.connection.recv(), if connection_live => match event {
                    Some(event) => self.view.handle_connection_event(event),
                    None => {
                        tracing::debug!("connection event stream ended");
                        connection_live = false;
                    }
                },
                Some(tick) = self.ticks_rx.recv() => {
                    self.view.handle_tick(tick.token);
                }
            }

            self.sync_tick_task();
            self.publish();
        }

        self.tick_task = None;
        if self.connection.close() {
            tracing::info!(url = %self.connection.url(), "connection closed on shutdown");
        }
        tracing::info!("repair controller stopped");
    }

    fn handle_command(&mut self, command: RepairCommand) {
        match command {
            RepairCommand::Submit(code) => self.submit(&code),
            RepairCommand::Scrolled(metrics) => {
                self.view.handle_scroll(metrics);
            }
            RepairCommand::JumpToBottom => {
                self.view.jump_to_bottom();
            }
            RepairCommand::Shutdown => {}
        }
    }

    fn submit(&mut self, code: &str) {
        let frame = match self.view.begin_submission(code) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::info!(error = %error, "submission rejected");
                return;
            }
        };

        // The old scheduler is gone; stop its timer before anything else runs.
        self.tick_task = None;

        if let Err(error) = self.connection.send(&frame) {
            self.view.report_send_failure(&error);
        }
    }

    /// Keeps exactly one timer running for the active token, or none.
    fn sync_tick_task(&mut self) {
        match (self.tick_task.as_ref(), self.view.active_token()) {
            (Some(task), Some(token)) if task.token == token => {}
            (_, Some(token)) => {
                self.tick_task = Some(TickTask::spawn(
                    token,
                    self.tick_interval,
                    self.ticks_tx.clone(),
                ));
            }
            (_, None) => self.tick_task = None,
        }
    }

    fn publish(&mut self) {
        for event in self.view.take_events() {
            if self.events_tx.send(event).is_err() {
                break;
            }
        }

        let next = self.view.snapshot();
        self.snapshots_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
