use fixstream_transport::TransportError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubmitError {
    #[snafu(display("submission is empty on `{stage}`"))]
    EmptySubmission { stage: &'static str },
    #[snafu(display("failed to send submission on `{stage}`: {source}"))]
    Send {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("repair controller is gone on `{stage}`"))]
    ControllerGone { stage: &'static str },
}

pub type SubmitResult<T> = Result<T, SubmitError>;
