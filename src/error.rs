use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The change feed request failed or returned a non-success status.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
    },

    /// A page body did not match the shape of its feed.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Returned by collaborators that were never wired up.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A preload global that is not a plain identifier.
    #[error("invalid global name: {0:?}")]
    InvalidGlobalName(String),
}

impl Error {
    pub fn transport(message: impl Into<String>, status: Option<u16>) -> Self {
        Error::Transport {
            message: message.into(),
            status,
        }
    }

    /// HTTP status carried by a transport error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }
}
