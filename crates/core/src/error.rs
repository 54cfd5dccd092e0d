/// Malformed persona import payload. Nothing was inserted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("payload is not valid JSON: {0}")]
    Parse(String),
    #[error("element {index} is not an object")]
    NotAnObject { index: usize },
    #[error("duplicate agent id: {0}")]
    DuplicateId(String),
    #[error("payload contains no agents")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    NotFound(String),
}

/// Storage failure. Never leaves the store; logged and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("backend poisoned")]
    Poisoned,
}

/// An effect value that does not parse for its kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EffectError {
    #[error("unknown effect kind: {0}")]
    UnknownKind(String),
    #[error("invalid value for {kind}: {value}")]
    InvalidValue { kind: &'static str, value: String },
}
