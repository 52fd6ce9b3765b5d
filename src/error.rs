//! Error taxonomy for the bridge.
//!
//! Structured failures (text parse, name resolution, validation, binary
//! read) carry the diagnostic text accumulated by the native error handler.
//! Unstructured failures (name generation/application, emitters) carry a
//! fixed message only.

use thiserror::Error;

use crate::memory::Address;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The arena allocator returned a null address.
    #[error("out of memory (requested {requested} bytes)")]
    OutOfMemory { requested: u32 },

    /// A read or write fell outside the arena heap.
    #[error("invalid memory access: {size} bytes at {address:#x}")]
    InvalidAccess { address: Address, size: u32 },

    #[error("unable to create lexer")]
    LexerCreation,

    #[error("parseWast failed:\n{0}")]
    ParseWast(String),

    #[error("readWasm failed:\n{0}")]
    ReadWasm(String),

    #[error("resolveNames failed:\n{0}")]
    ResolveNames(String),

    #[error("validate failed:\n{0}")]
    Validate(String),

    #[error("generateNames failed.")]
    GenerateNames,

    #[error("applyNames failed.")]
    ApplyNames,

    #[error("toText failed.")]
    ToText,

    #[error("toBinary failed.")]
    ToBinary,

    #[error("Script has no module.")]
    NoModule,

    #[error("invalid config: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Diagnostic text carried by a structured failure.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::ParseWast(text)
            | Self::ReadWasm(text)
            | Self::ResolveNames(text)
            | Self::Validate(text) => Some(text),
            _ => None,
        }
    }

    /// Whether the failure came from the arena rather than from a stage.
    pub fn is_memory_error(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::InvalidAccess { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_messages_are_prefixed() {
        let err = BridgeError::ParseWast("a.wast:1:2\nunexpected token\n".into());
        assert_eq!(err.to_string(), "parseWast failed:\na.wast:1:2\nunexpected token\n");
        assert_eq!(err.diagnostics(), Some("a.wast:1:2\nunexpected token\n"));

        let err = BridgeError::ReadWasm("@0x0: bad magic\n".into());
        assert!(err.to_string().starts_with("readWasm failed:\n"));
    }

    #[test]
    fn unstructured_messages_are_fixed() {
        assert_eq!(BridgeError::GenerateNames.to_string(), "generateNames failed.");
        assert_eq!(BridgeError::ApplyNames.to_string(), "applyNames failed.");
        assert_eq!(BridgeError::ToText.to_string(), "toText failed.");
        assert_eq!(BridgeError::ToBinary.to_string(), "toBinary failed.");
        assert!(BridgeError::ToBinary.diagnostics().is_none());
    }
}
