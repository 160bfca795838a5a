use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Trying to use a gene that is not initialized: {0}")]
    UninitializedGene(String),

    #[error("Gene already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Invalid gene: {0}")]
    InvalidGene(String),

    #[error("Leaf mutation is not implemented for {0}")]
    UnimplementedLeafMutation(String),

    #[error("With {strategy} strategy and {candidates} candidates, none is selected to mutate")]
    EmptySelection { strategy: String, candidates: usize },

    #[error("Missing impact info: {0}")]
    MissingImpact(String),

    #[error("Structure mutation {0} cannot be applied to this individual")]
    InapplicableMutation(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Archive is empty")]
    EmptyArchive,

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
