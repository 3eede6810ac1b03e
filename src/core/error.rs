use thiserror::Error;

#[derive(Error, Debug)]
pub enum TmcoError {
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Incompatible cache: {component} {found} cannot run on {expected}")]
    IncompatibleCache {
        component: String,
        expected: String,
        found: String,
    },

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Syntax error in {filename}: {message}")]
    Syntax { filename: String, message: String },

    #[error("Execution error in {filename}: {message}")]
    Execution { filename: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unable to capture compiled cache data: {0}")]
    CacheUnavailable(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Target does not exist: {0}")]
    TargetNotFound(String),

    #[error("Storage is closed")]
    StoreClosed,
}

impl TmcoError {
    /// True for failures raised by the source parser rather than by module code
    pub fn is_syntax(&self) -> bool {
        matches!(self, TmcoError::Syntax { .. })
    }
}

pub type Result<T> = std::result::Result<T, TmcoError>;
