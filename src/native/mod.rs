//! Native call interface
//!
//! The bridge never touches a parser, validator or encoder directly. It
//! talks to a [`NativeLibrary`]: an identifier-based call table in the
//! shape of a C ABI. Constructors hand out opaque ids, operations take ids
//! and report a [`Status`], destructors release ids. Diagnostics never
//! travel through the status code; they accumulate in error handlers and
//! are read back out of arena memory.
//!
//! [`WasmTools`] is the default implementation, backed by the `wast`,
//! `wasmparser`, `wasm-encoder` and `wasmprinter` crates.

mod tools;

pub use tools::WasmTools;

use crate::error::Result;
use crate::memory::{Address, ManagedBuffer, Memory};
use crate::options::{ReadBinaryOptions, WriteBinaryOptions, WriteTextOptions};

/// Result code of a native operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn is_error(self) -> bool {
        self == Status::Error
    }
}

impl From<u32> for Status {
    fn from(code: u32) -> Self {
        if code == 0 {
            Status::Ok
        } else {
            Status::Error
        }
    }
}

macro_rules! native_ids {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn raw(self) -> u32 {
                    self.0
                }
            }
        )*
    };
}

native_ids! {
    /// A text lexer bound to a filename buffer and a source buffer.
    LexerId;
    /// A diagnostic accumulator.
    ErrorHandlerId;
    /// Transient outcome of a text parse.
    ParseResultId;
    /// Transient outcome of a binary read.
    ReadResultId;
    /// Transient outcome of an emit.
    WriteResultId;
    /// A parsed script (one or more modules plus directives).
    ScriptId;
    /// A single module.
    ModuleId;
    /// Emitter output held in arena memory.
    OutputBufferId;
}

/// Which kind of diagnostics an error handler formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorHandlerKind {
    /// Text diagnostics with file, line, column and a caret line.
    Source,
    /// Binary diagnostics with a byte offset.
    Binary,
}

/// The underlying format library, reached through opaque ids.
///
/// Callers own every id they receive and must hand it back to the matching
/// destructor exactly once. Operations on unknown ids report
/// [`Status::Error`] (or `None`) rather than panicking.
pub trait NativeLibrary {
    // Lexer -----------------------------------------------------------------

    /// Create a lexer over `source`; `filename` is a nul-terminated string.
    /// Returns `None` if the lexer cannot be created.
    fn new_wast_buffer_lexer(
        &mut self,
        memory: &Memory,
        filename: ManagedBuffer,
        source: ManagedBuffer,
    ) -> Option<LexerId>;

    fn destroy_wast_lexer(&mut self, lexer: LexerId);

    // Error handlers --------------------------------------------------------

    fn new_error_handler(&mut self, kind: ErrorHandlerKind) -> ErrorHandlerId;

    /// Copy the accumulated text into a length-prefixed arena region owned
    /// by the handler and return its address.
    fn error_handler_buffer(
        &mut self,
        memory: &mut Memory,
        handler: ErrorHandlerId,
    ) -> Result<Address>;

    fn destroy_error_handler(&mut self, memory: &mut Memory, handler: ErrorHandlerId);

    // Text parsing ----------------------------------------------------------

    fn parse_wast(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        errors: ErrorHandlerId,
    ) -> ParseResultId;

    fn parse_wast_result_status(&self, result: ParseResultId) -> Status;

    /// Move the script out of a successful parse result.
    fn parse_wast_result_release_script(&mut self, result: ParseResultId) -> Option<ScriptId>;

    fn destroy_parse_wast_result(&mut self, result: ParseResultId);

    // Binary reading --------------------------------------------------------

    fn read_binary(
        &mut self,
        memory: &Memory,
        data: ManagedBuffer,
        options: ReadBinaryOptions,
        errors: ErrorHandlerId,
    ) -> ReadResultId;

    fn read_binary_result_status(&self, result: ReadResultId) -> Status;

    /// Move the module out of a successful read result.
    fn read_binary_result_release_module(&mut self, result: ReadResultId) -> Option<ModuleId>;

    fn destroy_read_binary_result(&mut self, result: ReadResultId);

    // Scripts ---------------------------------------------------------------

    fn resolve_names_script(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        script: ScriptId,
        errors: ErrorHandlerId,
    ) -> Status;

    fn validate_script(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        script: ScriptId,
        errors: ErrorHandlerId,
    ) -> Status;

    fn script_module_count(&self, script: ScriptId) -> usize;

    /// An independently owned copy of the script's first module, or `None`
    /// when the script has no module (or it cannot be encoded).
    fn get_first_module(&mut self, memory: &Memory, lexer: LexerId, script: ScriptId)
        -> Option<ModuleId>;

    fn destroy_script(&mut self, script: ScriptId);

    // Modules ---------------------------------------------------------------

    fn generate_names_module(&mut self, module: ModuleId) -> Status;

    fn apply_names_module(&mut self, module: ModuleId) -> Status;

    fn write_text_module(
        &mut self,
        memory: &mut Memory,
        module: ModuleId,
        options: WriteTextOptions,
    ) -> Result<WriteResultId>;

    fn write_binary_module(
        &mut self,
        memory: &mut Memory,
        module: ModuleId,
        options: WriteBinaryOptions,
    ) -> Result<WriteResultId>;

    fn destroy_module(&mut self, module: ModuleId);

    // Write results and output buffers ---------------------------------------

    fn write_result_status(&self, result: WriteResultId) -> Status;

    fn write_result_release_output_buffer(&mut self, result: WriteResultId)
        -> Option<OutputBufferId>;

    fn write_result_release_log_output_buffer(
        &mut self,
        result: WriteResultId,
    ) -> Option<OutputBufferId>;

    /// Destroying a write result also destroys any buffer not yet released.
    fn destroy_write_result(&mut self, memory: &mut Memory, result: WriteResultId);

    fn output_buffer_data(&self, buffer: OutputBufferId) -> Option<ManagedBuffer>;

    fn destroy_output_buffer(&mut self, memory: &mut Memory, buffer: OutputBufferId);

    /// Native objects currently alive. Implementations that do not track
    /// this report 0.
    fn live_objects(&self) -> usize {
        0
    }
}
