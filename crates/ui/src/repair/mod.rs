//! Reveal sequencing for a live repair session.
//!
//! Inbound results are appended to a session-scoped [`Backlog`] in arrival
//! order and revealed one at a time by the [`RevealSchedulerState`]. A new
//! submission replaces both in one step; tick timers carry a [`RevealToken`]
//! so a timer belonging to a replaced session can never touch the new one.

pub mod backlog;
pub mod controller;
pub mod error;
/// Commands in, notifications out.
pub mod events;
pub mod ingest;
pub mod reveal;
pub mod scroll_manager;
/// Session lifecycle with stale-session rejection.
pub mod session;
pub mod view;

pub use backlog::{AppendRejection, Backlog, BacklogEntry, EntrySequence, RevealState};
pub use controller::{RepairController, RepairHandle};
pub use error::{SubmitError, SubmitResult};
pub use events::{RepairCommand, TickFired, ViewEvent};
pub use ingest::{
    IngestOutcome, IngestedEntry, StatusIndicator, StatusTone, extract_code, ingest,
};
pub use reveal::{
    RevealCompletion, RevealPolicy, RevealSchedulerState, RevealToken, RevealUpdate, TickOutcome,
};
pub use scroll_manager::{
    DEFAULT_FOLLOW_THRESHOLD, DEFAULT_MIN_ENTRIES_FOR_JUMP, ScrollDecision, ScrollManager,
    ScrollMetrics,
};
pub use session::{
    SessionId, SessionState, SessionTransition, SessionTransitionRejection,
    SessionTransitionResult,
};
pub use view::{
    CONNECTION_CLOSED_MESSAGE, CONNECTION_ERROR_MESSAGE, EMPTY_SUBMISSION_MESSAGE,
    EntryView, FINAL_ENTRY_LABEL, NOT_CONNECTED_MESSAGE, PendingPlaceholder, RepairView,
    StatusLine, ViewSnapshot, entry_label,
};
