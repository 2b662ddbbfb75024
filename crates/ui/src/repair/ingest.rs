use fixstream_transport::InboundEvent;

const FENCE: &str = "```";
/// Tags recognised even when they share a line with the code.
const INLINE_LANGUAGE_TAGS: [&str; 3] = ["python", "python3", "py"];

pub const FIXING_STATUS_TEXT: &str = "Fixing Code...";
pub const SUCCESS_STATUS_TEXT: &str = "Code Executed Successfully";

/// Colour class of a transient status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTone {
    Progress,
    Success,
    Error,
}

/// Status-only update; never enters the backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIndicator {
    pub text: String,
    pub tone: StatusTone,
}

impl StatusIndicator {
    pub fn new(text: impl Into<String>, tone: StatusTone) -> Self {
        Self {
            text: text.into(),
            tone,
        }
    }
}

/// Cleaned code destined for the backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedEntry {
    pub code_text: String,
    pub is_final: bool,
}

/// Zero or one backlog append plus an optional status update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IngestOutcome {
    pub entry: Option<IngestedEntry>,
    pub status: Option<StatusIndicator>,
}

impl IngestOutcome {
    pub fn is_empty(&self) -> bool {
        self.entry.is_none() && self.status.is_none()
    }
}

/// Classifies one inbound event.
pub fn ingest(event: InboundEvent) -> IngestOutcome {
    match event {
        InboundEvent::Incremental { code } => IngestOutcome {
            entry: Some(IngestedEntry {
                code_text: extract_code(&code),
                is_final: false,
            }),
            status: Some(StatusIndicator::new(
                FIXING_STATUS_TEXT,
                StatusTone::Progress,
            )),
        },
        InboundEvent::Final { code } => IngestOutcome {
            entry: Some(IngestedEntry {
                code_text: extract_code(&code),
                is_final: true,
            }),
            status: None,
        },
        InboundEvent::StatusError { detail } => IngestOutcome {
            entry: None,
            status: Some(StatusIndicator::new(
                format!("Error: {detail}"),
                StatusTone::Error,
            )),
        },
        InboundEvent::StatusSuccess => IngestOutcome {
            entry: None,
            status: Some(StatusIndicator::new(
                SUCCESS_STATUS_TEXT,
                StatusTone::Success,
            )),
        },
        InboundEvent::Unrecognized => IngestOutcome::default(),
    }
}

/// Strips a leading fence (with its language tag) and a trailing fence, plus
/// surrounding whitespace.
pub fn extract_code(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(body) = text.strip_suffix(FENCE) {
        text = body.trim_end();
    }

    if let Some(body) = text.strip_prefix(FENCE) {
        text = match body.split_once('\n') {
            Some((tag, rest)) if is_language_tag(tag) => rest,
            Some(_) | None => strip_inline_tag(body),
        };
    }

    text.trim().to_string()
}

/// Drops a known tag that is followed by a space or by nothing at all, as in
/// `python print(1)` or a lone `python`.
fn strip_inline_tag(body: &str) -> &str {
    let word_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let (word, rest) = body.split_at(word_end);
    if INLINE_LANGUAGE_TAGS
        .iter()
        .any(|tag| word.eq_ignore_ascii_case(tag))
    {
        rest
    } else {
        body
    }
}

fn is_language_tag(candidate: &str) -> bool {
    let candidate = candidate.trim();
    candidate.is_empty()
        || candidate
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '+' | '#' | '.'))
}
