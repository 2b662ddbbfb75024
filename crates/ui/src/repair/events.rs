use crate::repair::backlog::EntrySequence;
use crate::repair::reveal::RevealToken;
use crate::repair::scroll_manager::ScrollMetrics;
use crate::repair::session::SessionId;

/// User intent delivered to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairCommand {
    /// Starts a new session with the given snippet, discarding the current one.
    Submit(String),
    Scrolled(ScrollMetrics),
    JumpToBottom,
    Shutdown,
}

/// Emitted by the interval task driving the active reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickFired {
    pub token: RevealToken,
}

/// One-shot notifications for the presentation layer.
///
/// Level state lives in the snapshot; these carry edges that must not be
/// coalesced away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    SessionStarted {
        session: SessionId,
    },
    /// Completion signal for one entry. Fires once per entry.
    EntryRevealed {
        session: SessionId,
        sequence: EntrySequence,
        is_final: bool,
    },
    SessionCompleted {
        session: SessionId,
    },
    /// New content arrived while following; scroll to the newest entry.
    ScrollToBottom,
    ErrorRaised {
        message: String,
    },
}

impl ViewEvent {
    /// Session the event belongs to, if it is session-scoped.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Self::SessionStarted { session }
            | Self::EntryRevealed { session, .. }
            | Self::SessionCompleted { session } => Some(*session),
            Self::ScrollToBottom | Self::ErrorRaised { .. } => None,
        }
    }
}
