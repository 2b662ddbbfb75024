use std::sync::Arc;

use fixstream_transport::{
    ConnectionEvent, ConnectionState, InboundEvent, OutboundFrame, TransportError,
};

use crate::repair::backlog::{AppendRejection, Backlog, BacklogEntry, EntrySequence, RevealState};
use crate::repair::error::{EmptySubmissionSnafu, SubmitResult};
use crate::repair::events::ViewEvent;
use crate::repair::ingest::{StatusIndicator, StatusTone, ingest};
use crate::repair::reveal::{
    RevealPolicy, RevealSchedulerState, RevealToken, RevealUpdate, TickOutcome,
};
use crate::repair::scroll_manager::{ScrollDecision, ScrollManager, ScrollMetrics};
use crate::repair::session::{SessionId, SessionState, SessionTransition};
use crate::settings::Settings;

pub const EMPTY_SUBMISSION_MESSAGE: &str = "Code cannot be empty.";
pub const NOT_CONNECTED_MESSAGE: &str = "WebSocket is not connected.";
pub const CONNECTION_ERROR_MESSAGE: &str = "WebSocket connection error.";
pub const CONNECTION_CLOSED_MESSAGE: &str = "WebSocket connection closed.";
pub const FINAL_ENTRY_LABEL: &str = "Final Fixed Output";

/// Label shown above an entry.
pub fn entry_label(sequence: EntrySequence, is_final: bool) -> String {
    if is_final {
        FINAL_ENTRY_LABEL.to_string()
    } else {
        format!("Code Fix - Iteration {}", sequence.0)
    }
}

/// One line of the per-session status history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub id: u64,
    pub text: String,
    pub tone: StatusTone,
}

/// An entry the cursor has reached, with its visible prefix.
///
/// The full text is shared with the backlog, so publishing a snapshot costs
/// the same however much code has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    pub sequence: EntrySequence,
    pub label: String,
    source: Arc<str>,
    revealed_bytes: usize,
    pub revealed_len: usize,
    pub total_len: usize,
    pub is_final: bool,
    pub state: RevealState,
}

impl EntryView {
    fn from_entry(entry: &BacklogEntry) -> Self {
        Self {
            sequence: entry.sequence,
            label: entry_label(entry.sequence, entry.is_final),
            source: entry.shared_text(),
            revealed_bytes: entry.revealed_text().len(),
            revealed_len: entry.revealed_len(),
            total_len: entry.total_len(),
            is_final: entry.is_final,
            state: entry.reveal_state(),
        }
    }

    /// The visible prefix.
    pub fn text(&self) -> &str {
        &self.source[..self.revealed_bytes]
    }
}

/// Skeleton for the next block waiting behind the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPlaceholder {
    pub label: String,
    pub is_final: bool,
    pub queued: usize,
}

/// Everything a presentation needs to draw the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub session: Option<SessionId>,
    pub entries: Vec<EntryView>,
    pub pending: Option<PendingPlaceholder>,
    pub loading: bool,
    pub error: Option<String>,
    pub status: Option<StatusIndicator>,
    pub status_log: Vec<StatusLine>,
    pub connection: ConnectionState,
    pub scroll: ScrollDecision,
    pub final_code: Option<Arc<str>>,
}

impl Default for ViewSnapshot {
    fn default() -> Self {
        Self {
            session: None,
            entries: Vec::new(),
            pending: None,
            loading: false,
            error: None,
            status: None,
            status_log: Vec::new(),
            connection: ConnectionState::Connecting,
            scroll: ScrollDecision::FOLLOW,
            final_code: None,
        }
    }
}

/// Synchronous core of the repair flow.
///
/// Owns the session lifecycle, the backlog, and the reveal scheduler. Every
/// mutation goes through one of the `handle_*`/`begin_*` methods; callers
/// drain [`ViewEvent`]s with [`RepairView::take_events`] afterwards.
pub struct RepairView {
    session_state: SessionState,
    next_session_id: u64,
    backlog: Backlog,
    scheduler: RevealSchedulerState,
    reveal_policy: RevealPolicy,
    chars_per_tick: usize,
    error: Option<String>,
    status_log: Vec<StatusLine>,
    next_status_id: u64,
    connection: ConnectionState,
    scroll: ScrollManager,
    events: Vec<ViewEvent>,
}

impl RepairView {
    pub fn new(settings: &Settings) -> Self {
        let idle_session = SessionId::new(0);
        Self {
            session_state: SessionState::Idle,
            next_session_id: 1,
            backlog: Backlog::new(),
            scheduler: RevealSchedulerState::new(
                idle_session,
                settings.reveal_policy,
                settings.chars_per_tick,
            ),
            reveal_policy: settings.reveal_policy,
            chars_per_tick: settings.chars_per_tick,
            error: None,
            status_log: Vec::new(),
            next_status_id: 1,
            connection: ConnectionState::Connecting,
            scroll: ScrollManager::new(
                settings.scroll.follow_threshold,
                settings.scroll.min_entries_for_jump,
            ),
            events: Vec::new(),
        }
    }

    pub fn session_state(&self) -> &SessionState {
        &self.session_state
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    pub fn is_loading(&self) -> bool {
        self.session_state.is_loading()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Token the tick source must carry right now, if anything is animating.
    pub fn active_token(&self) -> Option<RevealToken> {
        self.scheduler.active_token()
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    /// Validates `code` and, if accepted, replaces the backlog and scheduler
    /// with fresh ones for a new session in a single step.
    ///
    /// An empty submission surfaces the validation error and leaves every
    /// other piece of state untouched.
    pub fn begin_submission(&mut self, code: &str) -> SubmitResult<OutboundFrame> {
        if code.trim().is_empty() {
            tracing::info!("rejecting empty submission");
            self.raise_error(EMPTY_SUBMISSION_MESSAGE);
            return EmptySubmissionSnafu {
                stage: "validate-submission",
            }
            .fail();
        }

        let session = SessionId::new(self.next_session_id);
        self.next_session_id += 1;
        self.transition(SessionTransition::Begin(session));

        self.backlog = Backlog::new();
        self.scheduler =
            RevealSchedulerState::new(session, self.reveal_policy, self.chars_per_tick);
        self.error = None;
        self.status_log.clear();
        self.scroll.reset();
        self.events.push(ViewEvent::SessionStarted { session });

        tracing::info!(session = ?session, code_len = code.len(), "submission started");
        Ok(OutboundFrame::new(code))
    }

    /// Records that the submission frame never left.
    pub fn report_send_failure(&mut self, error: &TransportError) {
        tracing::error!(error = %error, "submission was not sent");
        self.raise_error(NOT_CONNECTED_MESSAGE);
        self.stall_current(NOT_CONNECTED_MESSAGE);
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.connection = ConnectionState::Open;
            }
            ConnectionEvent::Frame(frame) => self.handle_frame(frame),
            ConnectionEvent::Failed { detail } => {
                tracing::warn!(detail = %detail, "connection failed");
                self.connection = ConnectionState::Errored;
                if !self.backlog.is_sealed() {
                    self.raise_error(CONNECTION_ERROR_MESSAGE);
                    self.stall_current(&detail);
                }
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "waiting to reconnect"
                );
                self.connection = ConnectionState::Connecting;
            }
            ConnectionEvent::Closed => {
                self.connection = ConnectionState::Closed;
                if self.awaiting_results() {
                    self.raise_error(CONNECTION_CLOSED_MESSAGE);
                    self.stall_current(CONNECTION_CLOSED_MESSAGE);
                }
            }
        }
    }

    /// Applies one reveal tick. Returns false for a stale token.
    pub fn handle_tick(&mut self, token: RevealToken) -> bool {
        match self.scheduler.tick(token, &mut self.backlog) {
            TickOutcome::Stale => {
                tracing::debug!(?token, "ignoring stale reveal tick");
                false
            }
            TickOutcome::Applied(update) => {
                self.apply_reveal_update(update);
                true
            }
        }
    }

    pub fn handle_scroll(&mut self, metrics: ScrollMetrics) -> ScrollDecision {
        self.scroll.on_scroll(metrics)
    }

    pub fn jump_to_bottom(&mut self) -> ScrollDecision {
        self.events.push(ViewEvent::ScrollToBottom);
        self.scroll.jump_to_bottom()
    }

    pub fn take_events(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let entries = self
            .backlog
            .entries()
            .iter()
            .filter(|entry| entry.reveal_state() != RevealState::Pending)
            .map(EntryView::from_entry)
            .collect();

        let pending = self.scheduler.next_pending(&self.backlog).and_then(|index| {
            let entry = self.backlog.get(index)?;
            Some(PendingPlaceholder {
                label: entry_label(entry.sequence, entry.is_final),
                is_final: entry.is_final,
                queued: self.backlog.len() - index,
            })
        });

        let final_code = self
            .backlog
            .final_entry()
            .filter(|entry| entry.reveal_state() == RevealState::Revealed)
            .map(BacklogEntry::shared_text);

        ViewSnapshot {
            session: self.session_state.session_id(),
            entries,
            pending,
            loading: self.session_state.is_loading(),
            error: self.error.clone(),
            status: self
                .status_log
                .last()
                .map(|line| StatusIndicator::new(line.text.clone(), line.tone)),
            status_log: self.status_log.clone(),
            connection: self.connection,
            scroll: self.scroll.decision(),
            final_code,
        }
    }

    fn handle_frame(&mut self, frame: InboundEvent) {
        let session = match &self.session_state {
            SessionState::Loading(session) => *session,
            state => {
                tracing::debug!(
                    kind = frame.kind(),
                    ?state,
                    "dropping frame outside an active session"
                );
                return;
            }
        };

        let outcome = ingest(frame);
        if let Some(status) = outcome.status {
            self.push_status(status);
        }

        let Some(entry) = outcome.entry else {
            return;
        };

        match self.backlog.append(entry.code_text, entry.is_final) {
            Ok(sequence) => {
                tracing::debug!(
                    session = ?session,
                    sequence = sequence.0,
                    is_final = entry.is_final,
                    "entry appended"
                );
                let update = self.scheduler.advance(&mut self.backlog);
                self.apply_reveal_update(update);
                if self.scroll.on_backlog_mutation(self.backlog.len()).follow {
                    self.events.push(ViewEvent::ScrollToBottom);
                }
            }
            Err(AppendRejection::AfterFinal { final_sequence }) => {
                tracing::warn!(
                    session = ?session,
                    final_sequence = final_sequence.0,
                    "dropping result received after the final entry"
                );
            }
        }
    }

    fn apply_reveal_update(&mut self, update: RevealUpdate) {
        let session = self.scheduler.session();
        for completion in update.completions {
            self.events.push(ViewEvent::EntryRevealed {
                session,
                sequence: completion.sequence,
                is_final: completion.is_final,
            });

            if completion.is_final && self.transition(SessionTransition::Complete(session)) {
                tracing::info!(session = ?session, "session completed");
                self.events.push(ViewEvent::SessionCompleted { session });
            }
        }
    }

    /// A loading session still expecting frames. Once the final entry is in,
    /// losing the socket only ends the stream; the reveal finishes locally.
    fn awaiting_results(&self) -> bool {
        matches!(self.session_state, SessionState::Loading(_)) && !self.backlog.is_sealed()
    }

    fn push_status(&mut self, status: StatusIndicator) {
        let id = self.next_status_id;
        self.next_status_id += 1;
        self.status_log.push(StatusLine {
            id,
            text: status.text,
            tone: status.tone,
        });
    }

    /// Sets the error banner, announcing it only when it changes.
    fn raise_error(&mut self, message: &str) {
        if self.error.as_deref() == Some(message) {
            return;
        }
        self.error = Some(message.to_string());
        self.events.push(ViewEvent::ErrorRaised {
            message: message.to_string(),
        });
    }

    fn stall_current(&mut self, message: &str) {
        let Some(session) = self.session_state.session_id() else {
            return;
        };
        if !self.session_state.is_loading() {
            return;
        }
        self.transition(SessionTransition::Stall {
            session,
            message: message.to_string(),
        });
    }

    fn transition(&mut self, transition: SessionTransition) -> bool {
        match self.session_state.apply(transition) {
            Ok(next) => {
                self.session_state = next;
                true
            }
            Err(rejection) => {
                tracing::warn!(?rejection, "rejected session transition");
                false
            }
        }
    }
}
