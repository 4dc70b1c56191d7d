#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid listen arguments: {0}")]
    Config(String),
    #[error("A subscription is already active")]
    AlreadyListening,
    #[error("Failed to register {source_name}: {reason}")]
    Registration { source_name: String, reason: String },
    #[error("Audio backend error: {0}")]
    Backend(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
