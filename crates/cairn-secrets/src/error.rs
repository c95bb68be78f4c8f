use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device store: {0}")]
    Store(String),

    /// Stored identity is unreadable or its halves do not match.
    #[error("corrupt device identity: {0}")]
    CorruptIdentity(String),

    #[error("request timestamp {timestamp} is outside ±{max_skew_secs}s of {now}")]
    StaleTimestamp {
        timestamp: u64,
        now: u64,
        max_skew_secs: u64,
    },

    #[error("request signature invalid")]
    InvalidSignature,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
