//! The runtime context
//!
//! A [`NativeRuntime`] bundles the memory arena and the native library. It
//! is created once, cloned into every handle it produces, and torn down
//! when the last clone is dropped. There is no process-wide state.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handle::{Buffer, ErrorHandler, Lexer, ParseResult, ReadResult};
use crate::memory::{AllocationStats, Allocator, BufferSource, LinearMemory, Memory};
use crate::module::Module;
use crate::native::{ErrorHandlerKind, NativeLibrary, WasmTools};
use crate::options::ReadBinaryOptions;
use crate::script::Script;

struct RuntimeState {
    memory: Memory,
    library: Box<dyn NativeLibrary>,
}

/// Shared, single-threaded runtime context. Cloning is cheap; every clone
/// refers to the same arena and library.
#[derive(Clone)]
pub struct NativeRuntime {
    state: Rc<RefCell<RuntimeState>>,
}

impl NativeRuntime {
    /// A runtime over a [`LinearMemory`] arena and [`WasmTools`].
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let allocator = LinearMemory::new(config.memory.initial_pages, config.memory.max_pages);
        Self::with_allocator(config, Box::new(allocator))
    }

    /// A runtime over a caller-supplied allocator and [`WasmTools`].
    pub fn with_allocator(config: BridgeConfig, allocator: Box<dyn Allocator>) -> Result<Self> {
        config.validate()?;
        let library = WasmTools::new(config.source_line_max_length);
        Ok(Self::with_library(Memory::new(allocator), Box::new(library)))
    }

    /// A runtime over an arbitrary memory and native library.
    pub fn with_library(memory: Memory, library: Box<dyn NativeLibrary>) -> Self {
        Self {
            state: Rc::new(RefCell::new(RuntimeState { memory, library })),
        }
    }

    /// Run `f` against the arena and the library.
    ///
    /// Handles must not be dropped inside `f`: their destructors re-enter
    /// the runtime.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Memory, &mut dyn NativeLibrary) -> R) -> R {
        let mut state = self.state.borrow_mut();
        let RuntimeState { memory, library } = &mut *state;
        f(memory, library.as_mut())
    }

    pub(crate) fn with_memory<R>(&self, f: impl FnOnce(&mut Memory) -> R) -> R {
        self.with(|memory, _| f(memory))
    }

    pub fn memory_stats(&self) -> AllocationStats {
        self.state.borrow().memory.stats()
    }

    /// Native objects currently alive, as reported by the library.
    pub fn live_native_objects(&self) -> usize {
        self.state.borrow().library.live_objects()
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Parse WebAssembly text (a module or a script) into a [`Script`].
    ///
    /// `filename` only appears in diagnostics.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ParseWast`] with the accumulated diagnostics when the
    ///   text is malformed
    /// - [`BridgeError::LexerCreation`] if the library rejects the buffers
    /// - [`BridgeError::OutOfMemory`] if the arena cannot hold the input
    pub fn parse_text<'a>(
        &self,
        filename: &str,
        buffer: impl Into<BufferSource<'a>>,
    ) -> Result<Script> {
        let filename_buffer = Buffer::copy_cstr(self, filename)?;
        let source_buffer = Buffer::copy_into(self, buffer)?;
        debug!("parse_text {filename}: copied {} bytes", source_buffer.managed().size);

        let lexer = Lexer::new(self, filename_buffer, source_buffer)?;
        let errors = ErrorHandler::new(self, ErrorHandlerKind::Source);
        let result = ParseResult::new(
            self,
            self.with(|memory, library| library.parse_wast(memory, lexer.id(), errors.id())),
        );

        let status = result.status();
        debug!("parse_text {filename}: {status:?}");
        if status.is_error() {
            return Err(BridgeError::ParseWast(errors.message()?));
        }
        let script = result
            .release_script()
            .ok_or_else(|| BridgeError::ParseWast(String::new()))?;
        Ok(Script::new(self.clone(), script, lexer))
    }

    /// Decode a WebAssembly binary into a [`Module`].
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ReadWasm`] with the accumulated diagnostics when the
    ///   binary is malformed
    /// - [`BridgeError::OutOfMemory`] if the arena cannot hold the input
    pub fn read_binary<'a>(
        &self,
        buffer: impl Into<BufferSource<'a>>,
        options: ReadBinaryOptions,
    ) -> Result<Module> {
        let data = Buffer::copy_into(self, buffer)?;
        debug!("read_binary: copied {} bytes", data.managed().size);

        let errors = ErrorHandler::new(self, ErrorHandlerKind::Binary);
        let result = ReadResult::new(
            self,
            self.with(|memory, library| {
                library.read_binary(memory, data.managed(), options, errors.id())
            }),
        );

        let status = result.status();
        debug!("read_binary: {status:?}");
        if status.is_error() {
            return Err(BridgeError::ReadWasm(errors.message()?));
        }
        let module = result
            .release_module()
            .ok_or_else(|| BridgeError::ReadWasm(String::new()))?;
        Ok(Module::new(self.clone(), module))
    }
}

impl Default for NativeRuntime {
    fn default() -> Self {
        let config = BridgeConfig::default();
        let allocator = LinearMemory::new(config.memory.initial_pages, config.memory.max_pages);
        Self::with_library(
            Memory::new(Box::new(allocator)),
            Box::new(WasmTools::new(config.source_line_max_length)),
        )
    }
}

impl fmt::Debug for NativeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRuntime")
            .field("memory", &self.memory_stats())
            .field("live_native_objects", &self.live_native_objects())
            .finish()
    }
}
