//! Options accepted by the reader and the emitters.
//!
//! Every field is optional when deserialized; missing fields take the
//! defaults below. Both snake_case and camelCase field names are accepted.

use serde::{Deserialize, Serialize};

/// Options for [`NativeRuntime::read_binary`](crate::NativeRuntime::read_binary).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadBinaryOptions {
    /// Decode the `name` custom section instead of discarding it.
    #[serde(alias = "readDebugNames")]
    pub read_debug_names: bool,
}

/// Options for [`Module::to_text`](crate::Module::to_text).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteTextOptions {
    /// Print instructions in folded (s-expression) form.
    #[serde(alias = "foldExprs")]
    pub fold_exprs: bool,
    /// Print exports inline on the exported definition.
    #[serde(alias = "inlineExport")]
    pub inline_export: bool,
}

/// Options for [`Module::to_binary`](crate::Module::to_binary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBinaryOptions {
    /// Produce a human-readable trace of the encoding.
    pub log: bool,
    /// Write LEB128 section sizes in their shortest form.
    #[serde(alias = "canonicalizeLebs")]
    pub canonicalize_lebs: bool,
    /// Emit linking metadata for a relocatable object.
    pub relocatable: bool,
    /// Emit the `name` custom section.
    #[serde(alias = "writeDebugNames")]
    pub write_debug_names: bool,
}

impl Default for WriteBinaryOptions {
    fn default() -> Self {
        Self {
            log: false,
            canonicalize_lebs: true,
            relocatable: false,
            write_debug_names: false,
        }
    }
}

/// Result of a binary emit: the encoded module and the optional trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryOutput {
    pub buffer: Vec<u8>,
    /// Empty unless `log` was requested.
    pub log: String,
}
