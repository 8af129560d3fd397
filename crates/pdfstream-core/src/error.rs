use thiserror::Error;

/// Errors surfaced by the streaming writer and merger.
///
/// Sink failures are sticky: once the underlying output has failed, every
/// later write keeps failing until the writer is discarded.
#[derive(Error, Debug)]
pub enum PdfStreamError {
    #[error("operation is not valid in the writer's current state")]
    NotOpen,

    #[error("write to output sink failed: {0}")]
    Sink(#[from] std::io::Error),

    #[error("reserved object {0} was never written")]
    UnfulfilledReservation(u32),

    #[error("object {0} does not name an open reservation")]
    InvalidReservation(u32),

    #[error("object cannot be serialized: {0}")]
    Structural(String),

    #[error("failed to parse document: {0}")]
    Parse(String),

    #[error("failed to commit output file: {0}")]
    FileCommit(String),

    #[error("unsupported option: {0}")]
    UnsupportedOption(&'static str),
}
