//! Error type for packing operations.

/// Errors raised by the packer, its configuration, and key flattening.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("Field '{field}' is not declared in the field spec")]
    FieldNotDeclared { field: String },

    #[error("Packer is closed: submit called after drain")]
    PackerClosed,

    #[error("Example has no tokens in any field")]
    EmptyExample,

    #[error("Invalid packer config: {0}")]
    InvalidConfig(String),

    #[error("Key '{key}' is produced by more than one feature")]
    KeyConflict { key: String },

    #[error("Failed to parse packer config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PackError>;
