use std::sync::Arc;

/// Position of an entry in its session's arrival order, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntrySequence(pub u64);

impl EntrySequence {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Per-entry reveal lifecycle: `Pending -> Revealing -> Revealed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RevealState {
    #[default]
    Pending,
    Revealing,
    Revealed,
}

/// One result awaiting or undergoing reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub sequence: EntrySequence,
    pub code_text: Arc<str>,
    pub is_final: bool,
    reveal_state: RevealState,
    revealed_chars: usize,
    revealed_bytes: usize,
    total_chars: usize,
}

impl BacklogEntry {
    fn new(sequence: EntrySequence, code_text: Arc<str>, is_final: bool) -> Self {
        let total_chars = code_text.chars().count();
        Self {
            sequence,
            code_text,
            is_final,
            reveal_state: RevealState::Pending,
            revealed_chars: 0,
            revealed_bytes: 0,
            total_chars,
        }
    }

    pub fn reveal_state(&self) -> RevealState {
        self.reveal_state
    }

    /// Revealed prefix length, in characters.
    pub fn revealed_len(&self) -> usize {
        self.revealed_chars
    }

    /// Full length, in characters.
    pub fn total_len(&self) -> usize {
        self.total_chars
    }

    pub fn revealed_text(&self) -> &str {
        &self.code_text[..self.revealed_bytes]
    }

    /// Shared handle to the full text; cloning it never copies the code.
    pub fn shared_text(&self) -> Arc<str> {
        Arc::clone(&self.code_text)
    }

    pub fn is_fully_revealed(&self) -> bool {
        self.revealed_chars == self.total_chars
    }

    pub(crate) fn begin_reveal(&mut self) -> bool {
        if self.reveal_state != RevealState::Pending {
            return false;
        }
        self.reveal_state = RevealState::Revealing;
        true
    }

    /// Grows the revealed prefix by up to `chars` characters. Only a revealing
    /// entry can grow; the prefix never shrinks.
    pub(crate) fn advance_prefix(&mut self, chars: usize) -> usize {
        if self.reveal_state != RevealState::Revealing {
            return 0;
        }

        let mut advanced = 0;
        for ch in self.code_text[self.revealed_bytes..].chars().take(chars) {
            self.revealed_bytes += ch.len_utf8();
            advanced += 1;
        }
        self.revealed_chars += advanced;
        advanced
    }

    /// Jumps the prefix to the full text without animating.
    pub(crate) fn reveal_all(&mut self) {
        if self.reveal_state != RevealState::Revealing {
            return;
        }
        self.revealed_bytes = self.code_text.len();
        self.revealed_chars = self.total_chars;
    }

    /// `Revealing -> Revealed`. Returns true only on the transition itself, so
    /// the caller can fire completion exactly once.
    pub(crate) fn finish_reveal(&mut self) -> bool {
        if self.reveal_state != RevealState::Revealing || !self.is_fully_revealed() {
            return false;
        }
        self.reveal_state = RevealState::Revealed;
        true
    }
}

/// Why an append was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendRejection {
    /// The session already holds its final entry.
    AfterFinal { final_sequence: EntrySequence },
}

/// Ordered, append-only results for one session.
///
/// Sequences strictly increase; at most one entry is final and it is last.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Backlog {
    entries: Vec<BacklogEntry>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[BacklogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BacklogEntry> {
        self.entries.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut BacklogEntry> {
        self.entries.get_mut(index)
    }

    pub fn final_entry(&self) -> Option<&BacklogEntry> {
        self.entries.last().filter(|entry| entry.is_final)
    }

    pub fn is_sealed(&self) -> bool {
        self.final_entry().is_some()
    }

    pub fn append(
        &mut self,
        code_text: impl Into<Arc<str>>,
        is_final: bool,
    ) -> Result<EntrySequence, AppendRejection> {
        if let Some(final_entry) = self.final_entry() {
            return Err(AppendRejection::AfterFinal {
                final_sequence: final_entry.sequence,
            });
        }

        let sequence = EntrySequence::new(self.entries.len() as u64 + 1);
        self.entries
            .push(BacklogEntry::new(sequence, code_text.into(), is_final));
        Ok(sequence)
    }

    pub fn revealing_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.reveal_state == RevealState::Revealing)
            .count()
    }
}
