use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing receiver_id")]
    MissingReceiver,

    #[error("Unknown message status: {0}")]
    UnknownStatus(String),
}
