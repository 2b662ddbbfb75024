use snafu::Snafu;

use crate::connection::ConnectionState;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("failed to connect to '{url}' on `{stage}`: {source}"))]
    Connect {
        stage: &'static str,
        url: String,
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[snafu(display("connection is {state:?}, cannot send on `{stage}`"))]
    NotOpen {
        stage: &'static str,
        state: ConnectionState,
    },
    #[snafu(display("failed to encode outbound frame on `{stage}`: {source}"))]
    EncodeFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to decode inbound frame on `{stage}`: {source}"))]
    DecodeFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("connection worker is gone on `{stage}`"))]
    ChannelClosed { stage: &'static str },
}

pub type TransportResult<T> = Result<T, TransportError>;
