use thiserror::Error;

/// All errors produced by myoscope-core.
#[derive(Debug, Error)]
pub enum MyoscopeError {
    #[error("device error: {0}")]
    Device(String),

    #[error("can not connect to address {address}")]
    Connect { address: String },

    #[error("no device connected")]
    NotConnected,

    #[error("acquisition is already running")]
    AlreadyRunning,

    #[error("acquisition is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown action id {0}")]
    UnknownAction(u8),

    #[error("motion schedule is exhausted")]
    ScheduleExhausted,

    #[error("action not allowed while {0}")]
    InvalidTransition(&'static str),

    #[error("recording error: {0}")]
    Recording(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MyoscopeError>;
