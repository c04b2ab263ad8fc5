use thiserror::Error;

/// Error taxonomy for the briefing pipeline and background jobs.
///
/// `Canceled` is not a failure: the profile analysis job returns it when the
/// user flipped the status away from `analyzing` while the job was running,
/// and callers must exit cleanly without overwriting the status.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("store error: {0}")]
    Store(#[from] diesel::result::Error),

    #[error("upstream fetch error: {0}")]
    Upstream(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("run {0} is not pending, refusing to re-execute")]
    InvalidRunState(String),

    #[error("not enough messages for analysis: found {found}, need at least {needed}")]
    NotEnoughData { found: usize, needed: usize },

    #[error("analysis canceled")]
    Canceled,
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Upstream(e.to_string())
    }
}
