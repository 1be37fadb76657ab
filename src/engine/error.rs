use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: inverted or empty stay, zero code length, bad guest count.
    InvalidArgument(&'static str),
    NotFound(Ulid),
    /// No booking carries this confirmation code.
    CodeNotFound(String),
    AlreadyExists(Ulid),
    EmailTaken(String),
    /// The proposed stay collides with this existing booking.
    Conflict(Ulid),
    InvalidCredentials,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::CodeNotFound(code) => {
                write!(f, "no booking with confirmation code {code}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::EmailTaken(email) => write!(f, "{email} already exists"),
            EngineError::Conflict(id) => {
                write!(f, "room not available for the selected dates (conflicts with booking {id})")
            }
            EngineError::InvalidCredentials => write!(f, "invalid email or password"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
