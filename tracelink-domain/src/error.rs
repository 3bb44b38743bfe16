use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum UplinkError {
    // ---
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("unable to send span: {0}")]
    Send(String),

    #[error("uplink shut down forever, no longer accepting connections")]
    ShutdownForever,

    #[error("span queue closed")]
    QueueClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

pub type Result<T> = std::result::Result<T, UplinkError>;
