use serde::{Deserialize, Serialize};

use crate::repair::backlog::{Backlog, EntrySequence, RevealState};
use crate::repair::session::SessionId;

/// How entries are revealed once the cursor reaches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealPolicy {
    /// Only the newest arrival animates; entries that were overtaken while
    /// queued render at full length when their turn comes.
    #[default]
    AnimateNewest,
    AnimateAll,
    Instant,
}

/// Identifies one scheduled tick stream.
///
/// A new token is minted every time an entry starts animating, so a tick
/// carrying an older token can never touch the current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevealToken {
    pub session: SessionId,
    pub generation: u64,
}

/// Signal emitted exactly once when an entry becomes `Revealed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevealCompletion {
    pub sequence: EntrySequence,
    pub is_final: bool,
}

/// What one scheduler step changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RevealUpdate {
    pub completions: Vec<RevealCompletion>,
    /// Characters added to the active entry's prefix during this step.
    pub advanced_chars: usize,
}

impl RevealUpdate {
    pub fn is_empty(&self) -> bool {
        self.completions.is_empty() && self.advanced_chars == 0
    }

    fn merge(&mut self, other: RevealUpdate) {
        self.completions.extend(other.completions);
        self.advanced_chars += other.advanced_chars;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The token does not belong to the entry being revealed.
    Stale,
    Applied(RevealUpdate),
}

/// Cursor and cancellation state for one session's reveal flow.
///
/// Owned by the view next to the backlog it drives and replaced together with
/// it, so nothing from a discarded session survives a resubmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealSchedulerState {
    session: SessionId,
    policy: RevealPolicy,
    chars_per_tick: usize,
    /// Index of the entry currently `Revealing`.
    cursor: Option<usize>,
    /// Index of the first entry that has not reached `Revealed`.
    next_index: usize,
    generation: u64,
    active: Option<RevealToken>,
}

impl RevealSchedulerState {
    pub fn new(session: SessionId, policy: RevealPolicy, chars_per_tick: usize) -> Self {
        Self {
            session,
            policy,
            chars_per_tick: chars_per_tick.max(1),
            cursor: None,
            next_index: 0,
            generation: 0,
            active: None,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn policy(&self) -> RevealPolicy {
        self.policy
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Token the tick source must carry, if an entry is animating.
    pub fn active_token(&self) -> Option<RevealToken> {
        self.active
    }

    /// Index of the next entry waiting behind the cursor, if any.
    pub fn next_pending(&self, backlog: &Backlog) -> Option<usize> {
        let start = match self.cursor {
            Some(cursor) => cursor + 1,
            None => self.next_index,
        };
        (start < backlog.len()).then_some(start)
    }

    /// Moves the cursor forward as far as possible without waiting on a tick.
    ///
    /// Call after every append. Entries that do not animate are flashed to
    /// full length and completed here; the first one that animates becomes
    /// the cursor and gets a fresh token.
    pub fn advance(&mut self, backlog: &mut Backlog) -> RevealUpdate {
        let mut update = RevealUpdate::default();

        if self.cursor.is_some() {
            return update;
        }

        loop {
            let index = self.next_index;
            let is_newest = index + 1 == backlog.len();
            let Some(entry) = backlog.get_mut(index) else {
                break;
            };

            if !entry.begin_reveal() {
                // Already past Pending; only possible if the backlog was not
                // driven exclusively by this scheduler.
                tracing::warn!(
                    session = ?self.session,
                    sequence = entry.sequence.0,
                    state = ?entry.reveal_state(),
                    "skipping entry not pending at cursor"
                );
                self.next_index += 1;
                continue;
            }

            let animate = entry.total_len() > 0
                && match self.policy {
                    RevealPolicy::AnimateNewest => is_newest,
                    RevealPolicy::AnimateAll => true,
                    RevealPolicy::Instant => false,
                };

            if animate {
                self.generation += 1;
                self.cursor = Some(index);
                self.active = Some(RevealToken {
                    session: self.session,
                    generation: self.generation,
                });
                tracing::debug!(
                    session = ?self.session,
                    sequence = entry.sequence.0,
                    generation = self.generation,
                    "entry reveal started"
                );
                return update;
            }

            let before = entry.revealed_len();
            entry.reveal_all();
            update.advanced_chars += entry.revealed_len() - before;
            if entry.finish_reveal() {
                tracing::debug!(
                    session = ?self.session,
                    sequence = entry.sequence.0,
                    "entry revealed without animation"
                );
                update.completions.push(RevealCompletion {
                    sequence: entry.sequence,
                    is_final: entry.is_final,
                });
            }
            self.next_index += 1;
        }

        update
    }

    /// Applies one tick to the entry at the cursor.
    pub fn tick(&mut self, token: RevealToken, backlog: &mut Backlog) -> TickOutcome {
        if self.active != Some(token) {
            return TickOutcome::Stale;
        }
        let Some(index) = self.cursor else {
            return TickOutcome::Stale;
        };
        let Some(entry) = backlog.get_mut(index) else {
            tracing::warn!(session = ?self.session, index, "cursor points past the backlog");
            self.cursor = None;
            self.active = None;
            return TickOutcome::Stale;
        };

        let mut update = RevealUpdate {
            advanced_chars: entry.advance_prefix(self.chars_per_tick),
            ..RevealUpdate::default()
        };

        if !entry.finish_reveal() {
            return TickOutcome::Applied(update);
        }

        tracing::debug!(
            session = ?self.session,
            sequence = entry.sequence.0,
            "entry reveal finished"
        );
        update.completions.push(RevealCompletion {
            sequence: entry.sequence,
            is_final: entry.is_final,
        });
        self.cursor = None;
        self.active = None;
        self.next_index = index + 1;

        update.merge(self.advance(backlog));
        TickOutcome::Applied(update)
    }

    /// True once every appended entry has been revealed.
    pub fn is_idle(&self, backlog: &Backlog) -> bool {
        self.cursor.is_none()
            && backlog
                .entries()
                .iter()
                .all(|entry| entry.reveal_state() == RevealState::Revealed)
    }
}
