use serde::Serialize;
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{DecodeFrameSnafu, EncodeFrameSnafu, TransportResult};

/// Submission frame sent to the repair backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    pub code: String,
}

impl OutboundFrame {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    pub fn encode(&self) -> TransportResult<String> {
        serde_json::to_string(self).context(EncodeFrameSnafu {
            stage: "encode-outbound-frame",
        })
    }
}

/// Closed set of inbound frame shapes understood by the reveal pipeline.
///
/// Untyped JSON never crosses this boundary: anything that does not match a
/// known shape becomes `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Intermediate fix attempt (`"type": "fixer"`). Any `output` carried
    /// alongside is the runner's business and is not decoded.
    Incremental { code: String },
    /// Terminal result of the session.
    Final { code: String },
    /// Runner reported a failed execution; `detail` is the error kind.
    StatusError { detail: String },
    /// Runner reported a successful execution.
    StatusSuccess,
    Unrecognized,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Incremental { .. } => "incremental",
            Self::Final { .. } => "final",
            Self::StatusError { .. } => "status-error",
            Self::StatusSuccess => "status-success",
            Self::Unrecognized => "unrecognized",
        }
    }
}

const RUNNER_TYPE: &str = "runner";
const ERROR_TYPE_MARKER: &str = "\"error_type\"";
pub const UNKNOWN_ERROR_KIND: &str = "Unknown Error";

/// Decodes one raw text payload.
///
/// Only payloads that are not JSON at all fail; well-formed JSON of an unknown
/// shape decodes to [`InboundEvent::Unrecognized`].
pub fn decode_inbound(payload: &str) -> TransportResult<InboundEvent> {
    let value: Value = serde_json::from_str(payload).context(DecodeFrameSnafu {
        stage: "decode-inbound-frame",
    })?;

    Ok(classify(&value))
}

fn classify(value: &Value) -> InboundEvent {
    let Some(object) = value.as_object() else {
        return InboundEvent::Unrecognized;
    };

    let text_field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    };

    // A terminal frame wins over any incremental payload carried alongside it.
    if let Some(code) = text_field("final_fixed_code") {
        return InboundEvent::Final {
            code: code.to_string(),
        };
    }

    if let Some(code) = text_field("fixed_code") {
        return InboundEvent::Incremental {
            code: code.to_string(),
        };
    }

    match text_field("type") {
        Some(RUNNER_TYPE) => classify_runner(text_field("status"), text_field("output")),
        _ => InboundEvent::Unrecognized,
    }
}

fn classify_runner(status: Option<&str>, output: Option<&str>) -> InboundEvent {
    let Some(status) = status else {
        return InboundEvent::Unrecognized;
    };

    if status.contains("Error") {
        let detail = output
            .and_then(extract_error_kind)
            .unwrap_or_else(|| UNKNOWN_ERROR_KIND.to_string());
        return InboundEvent::StatusError { detail };
    }

    if status.contains("success") {
        return InboundEvent::StatusSuccess;
    }

    InboundEvent::Unrecognized
}

/// Pulls `<kind>` out of an embedded `"error_type": "<kind>"` marker.
fn extract_error_kind(output: &str) -> Option<String> {
    let start = output.find(ERROR_TYPE_MARKER)?;
    let tail = output[start + ERROR_TYPE_MARKER.len()..].trim_start();
    let tail = tail.strip_prefix(':')?.trim_start();
    let tail = tail.strip_prefix('"')?;
    let end = tail.find('"')?;

    Some(tail[..end].to_string())
}
