//! Scoped guards for native resources.
//!
//! Each guard owns exactly one arena allocation or native id and releases
//! it in `Drop`. Guards never release inside a runtime borrow; drop them
//! only outside [`NativeRuntime::with`].

use crate::error::{BridgeError, Result};
use crate::memory::{BufferSource, ManagedBuffer};
use crate::native::{
    ErrorHandlerId, ErrorHandlerKind, LexerId, ModuleId, OutputBufferId, ParseResultId,
    ReadResultId, ScriptId, Status, WriteResultId,
};
use crate::runtime::NativeRuntime;

// ============================================================================
// Arena buffers
// ============================================================================

/// A host copy in arena memory.
pub(crate) struct Buffer {
    runtime: NativeRuntime,
    buffer: ManagedBuffer,
}

impl Buffer {
    pub fn copy_into<'a>(
        runtime: &NativeRuntime,
        source: impl Into<BufferSource<'a>>,
    ) -> Result<Self> {
        let source = source.into();
        let buffer = runtime.with_memory(|memory| memory.copy_into(source))?;
        Ok(Self {
            runtime: runtime.clone(),
            buffer,
        })
    }

    /// Nul-terminated copy of `text`.
    pub fn copy_cstr(runtime: &NativeRuntime, text: &str) -> Result<Self> {
        let buffer = runtime.with_memory(|memory| memory.copy_cstr(text))?;
        Ok(Self {
            runtime: runtime.clone(),
            buffer,
        })
    }

    pub fn managed(&self) -> ManagedBuffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let address = self.buffer.address;
        self.runtime.with_memory(|memory| memory.release(address));
    }
}

// ============================================================================
// Lexer
// ============================================================================

/// A lexer together with the buffers it reads. The lexer is destroyed
/// before its buffers are freed.
pub(crate) struct Lexer {
    runtime: NativeRuntime,
    id: LexerId,
    _filename: Buffer,
    _source: Buffer,
}

impl Lexer {
    /// # Errors
    ///
    /// [`BridgeError::LexerCreation`] if the library refuses; both buffers
    /// are freed.
    pub fn new(runtime: &NativeRuntime, filename: Buffer, source: Buffer) -> Result<Self> {
        let id = runtime
            .with(|memory, library| {
                library.new_wast_buffer_lexer(memory, filename.managed(), source.managed())
            })
            .ok_or(BridgeError::LexerCreation)?;
        Ok(Self {
            runtime: runtime.clone(),
            id,
            _filename: filename,
            _source: source,
        })
    }

    pub fn id(&self) -> LexerId {
        self.id
    }
}

impl Drop for Lexer {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime.with(|_, library| library.destroy_wast_lexer(id));
    }
}

// ============================================================================
// Error handlers
// ============================================================================

pub(crate) struct ErrorHandler {
    runtime: NativeRuntime,
    id: ErrorHandlerId,
}

impl ErrorHandler {
    pub fn new(runtime: &NativeRuntime, kind: ErrorHandlerKind) -> Self {
        let id = runtime.with(|_, library| library.new_error_handler(kind));
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    pub fn id(&self) -> ErrorHandlerId {
        self.id
    }

    /// The accumulated diagnostics. Only meaningful after a failed
    /// operation.
    pub fn message(&self) -> Result<String> {
        let id = self.id;
        self.runtime.with(|memory, library| {
            let address = library.error_handler_buffer(memory, id)?;
            let bytes = memory.read_length_prefixed(address)?;
            Ok(String::from_utf8_lossy(bytes).into_owned())
        })
    }
}

impl Drop for ErrorHandler {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime
            .with(|memory, library| library.destroy_error_handler(memory, id));
    }
}

// ============================================================================
// Transient results
// ============================================================================

pub(crate) struct ParseResult {
    runtime: NativeRuntime,
    id: ParseResultId,
}

impl ParseResult {
    pub fn new(runtime: &NativeRuntime, id: ParseResultId) -> Self {
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    pub fn status(&self) -> Status {
        let id = self.id;
        self.runtime.with(|_, library| library.parse_wast_result_status(id))
    }

    pub fn release_script(&self) -> Option<ScriptId> {
        let id = self.id;
        self.runtime
            .with(|_, library| library.parse_wast_result_release_script(id))
    }
}

impl Drop for ParseResult {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime.with(|_, library| library.destroy_parse_wast_result(id));
    }
}

pub(crate) struct ReadResult {
    runtime: NativeRuntime,
    id: ReadResultId,
}

impl ReadResult {
    pub fn new(runtime: &NativeRuntime, id: ReadResultId) -> Self {
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    pub fn status(&self) -> Status {
        let id = self.id;
        self.runtime.with(|_, library| library.read_binary_result_status(id))
    }

    pub fn release_module(&self) -> Option<ModuleId> {
        let id = self.id;
        self.runtime
            .with(|_, library| library.read_binary_result_release_module(id))
    }
}

impl Drop for ReadResult {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime.with(|_, library| library.destroy_read_binary_result(id));
    }
}

/// Outcome of an emit. Buffers released from it become [`OutputBuffer`]s;
/// anything still held is freed along with the result.
pub(crate) struct WriteResult {
    runtime: NativeRuntime,
    id: WriteResultId,
}

impl WriteResult {
    pub fn new(runtime: &NativeRuntime, id: WriteResultId) -> Self {
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    pub fn status(&self) -> Status {
        let id = self.id;
        self.runtime.with(|_, library| library.write_result_status(id))
    }

    pub fn release_output(&self) -> Option<OutputBuffer> {
        let id = self.id;
        self.runtime
            .with(|_, library| library.write_result_release_output_buffer(id))
            .map(|buffer| OutputBuffer::new(&self.runtime, buffer))
    }

    pub fn release_log(&self) -> Option<OutputBuffer> {
        let id = self.id;
        self.runtime
            .with(|_, library| library.write_result_release_log_output_buffer(id))
            .map(|buffer| OutputBuffer::new(&self.runtime, buffer))
    }
}

impl Drop for WriteResult {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime
            .with(|memory, library| library.destroy_write_result(memory, id));
    }
}

// ============================================================================
// Output buffers
// ============================================================================

pub(crate) struct OutputBuffer {
    runtime: NativeRuntime,
    id: OutputBufferId,
}

impl OutputBuffer {
    fn new(runtime: &NativeRuntime, id: OutputBufferId) -> Self {
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let id = self.id;
        self.runtime.with(|memory, library| {
            let Some(data) = library.output_buffer_data(id) else {
                return Ok(Vec::new());
            };
            Ok(memory.read(data)?.to_vec())
        })
    }

    pub fn to_text(&self) -> Result<String> {
        let bytes = self.to_bytes()?;
        Ok(String::from_utf8(bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime
            .with(|memory, library| library.destroy_output_buffer(memory, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_freed_on_drop() {
        let runtime = NativeRuntime::default();
        {
            let buffer = Buffer::copy_into(&runtime, "hello").unwrap();
            assert_eq!(buffer.managed().size, 5);
            let cstr = Buffer::copy_cstr(&runtime, "a.wat").unwrap();
            assert_eq!(cstr.managed().size, 6);
            assert_eq!(runtime.memory_stats().live, 2);
        }
        assert!(runtime.memory_stats().is_balanced());
    }

    #[test]
    fn lexer_releases_itself_and_its_buffers() {
        let runtime = NativeRuntime::default();
        {
            let filename = Buffer::copy_cstr(&runtime, "a.wat").unwrap();
            let source = Buffer::copy_into(&runtime, "(module)").unwrap();
            let _lexer = Lexer::new(&runtime, filename, source).unwrap();
            assert_eq!(runtime.live_native_objects(), 1);
        }
        assert_eq!(runtime.live_native_objects(), 0);
        assert!(runtime.memory_stats().is_balanced());
    }

    #[test]
    fn error_handler_message_is_empty_without_diagnostics() {
        let runtime = NativeRuntime::default();
        {
            let handler = ErrorHandler::new(&runtime, ErrorHandlerKind::Source);
            assert_eq!(handler.message().unwrap(), "");
            // Asking twice replaces the region instead of leaking it.
            assert_eq!(handler.message().unwrap(), "");
            assert_eq!(runtime.memory_stats().live, 1);
        }
        assert!(runtime.memory_stats().is_balanced());
    }
}
