/// Identifier for one submission session.
///
/// Changes on every submission so work belonging to a discarded session can be
/// recognised and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Creates a typed session identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Lifecycle of the current repair session as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Submitted; results may still arrive or be revealing.
    Loading(SessionId),
    /// The final entry has been fully revealed.
    Completed(SessionId),
    /// A transport fault interrupted the session. Nothing more will arrive
    /// unless the user resubmits, but the session is not considered finished.
    Stalled { session: SessionId, message: String },
}

/// State transition input for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    Begin(SessionId),
    Complete(SessionId),
    Stall { session: SessionId, message: String },
}

/// Rejection reason for illegal session transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransitionRejection {
    /// A new session id must be strictly newer than the current one.
    StaleBegin {
        active: SessionId,
        attempted: SessionId,
    },
    NoActiveSession,
    SessionMismatch {
        active: SessionId,
        attempted: SessionId,
    },
}

pub type SessionTransitionResult = Result<SessionState, SessionTransitionRejection>;

impl SessionState {
    /// Returns the session id if any session has been started.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Idle => None,
            Self::Loading(session) | Self::Completed(session) => Some(*session),
            Self::Stalled { session, .. } => Some(*session),
        }
    }

    /// True from submission until the final entry is revealed. A stalled
    /// session keeps loading: only resubmission recovers it.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_) | Self::Stalled { .. })
    }

    /// Applies one transition deterministically.
    ///
    /// `Begin` supersedes whatever session is current, as long as the new id
    /// is newer. `Complete` and `Stall` must name the current session.
    pub fn apply(&self, transition: SessionTransition) -> SessionTransitionResult {
        match transition {
            SessionTransition::Begin(session) => self.apply_begin(session),
            SessionTransition::Complete(session) => self.apply_complete(session),
            SessionTransition::Stall { session, message } => self.apply_stall(session, message),
        }
    }

    fn apply_begin(&self, session: SessionId) -> SessionTransitionResult {
        match self.session_id() {
            Some(active) if active >= session => Err(SessionTransitionRejection::StaleBegin {
                active,
                attempted: session,
            }),
            Some(_) | None => Ok(Self::Loading(session)),
        }
    }

    fn apply_complete(&self, session: SessionId) -> SessionTransitionResult {
        match self {
            // A final entry received before the fault can still finish revealing.
            Self::Loading(active) | Self::Stalled { session: active, .. } if *active == session => {
                Ok(Self::Completed(session))
            }
            Self::Loading(active) | Self::Stalled { session: active, .. } => {
                Err(SessionTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: session,
                })
            }
            Self::Idle | Self::Completed(_) => Err(SessionTransitionRejection::NoActiveSession),
        }
    }

    fn apply_stall(&self, session: SessionId, message: String) -> SessionTransitionResult {
        match self {
            Self::Loading(active) if *active == session => Ok(Self::Stalled { session, message }),
            // A second fault on an already stalled session keeps the first message.
            Self::Stalled {
                session: active, ..
            } if *active == session => Ok(self.clone()),
            Self::Loading(active) | Self::Stalled { session: active, .. } => {
                Err(SessionTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: session,
                })
            }
            Self::Idle | Self::Completed(_) => Err(SessionTransitionRejection::NoActiveSession),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: SessionId = SessionId::new(1);
    const SECOND: SessionId = SessionId::new(2);

    #[test]
    fn resubmission_supersedes_a_loading_session() {
        let state = SessionState::Idle
            .apply(SessionTransition::Begin(FIRST))
            .expect("first begin");
        let state = state
            .apply(SessionTransition::Begin(SECOND))
            .expect("newer session supersedes");

        assert_eq!(state, SessionState::Loading(SECOND));
        assert_eq!(
            state.apply(SessionTransition::Complete(FIRST)),
            Err(SessionTransitionRejection::SessionMismatch {
                active: SECOND,
                attempted: FIRST,
            })
        );
    }

    #[test]
    fn older_session_cannot_begin_again() {
        let state = SessionState::Loading(SECOND);
        assert_eq!(
            state.apply(SessionTransition::Begin(FIRST)),
            Err(SessionTransitionRejection::StaleBegin {
                active: SECOND,
                attempted: FIRST,
            })
        );
    }

    #[test]
    fn completion_must_match_active_session() {
        let state = SessionState::Loading(SECOND);
        assert_eq!(
            state.apply(SessionTransition::Complete(FIRST)),
            Err(SessionTransitionRejection::SessionMismatch {
                active: SECOND,
                attempted: FIRST,
            })
        );

        let completed = state
            .apply(SessionTransition::Complete(SECOND))
            .expect("matching session completes");
        assert!(!completed.is_loading());
    }

    #[test]
    fn stalled_session_keeps_loading() {
        let state = SessionState::Loading(FIRST)
            .apply(SessionTransition::Stall {
                session: FIRST,
                message: "connection lost".to_string(),
            })
            .expect("stall active session");

        assert!(state.is_loading());
        assert_eq!(state.session_id(), Some(FIRST));
        assert_eq!(
            state.apply(SessionTransition::Complete(SECOND)),
            Err(SessionTransitionRejection::SessionMismatch {
                active: FIRST,
                attempted: SECOND,
            })
        );
        assert_eq!(
            state.apply(SessionTransition::Complete(FIRST)),
            Ok(SessionState::Completed(FIRST))
        );
    }
}
