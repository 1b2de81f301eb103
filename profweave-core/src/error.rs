use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilingError {
    #[error("Malformed correlation metadata on event {event_id}: {reason}")]
    MalformedCorrelation { event_id: String, reason: String },

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),
}

pub type Result<T> = std::result::Result<T, ProfilingError>;
