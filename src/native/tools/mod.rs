//! Default [`NativeLibrary`] backed by the `wast`, `wasmparser`,
//! `wasm-encoder` and `wasmprinter` crates.

mod diagnostics;
mod module;
mod names;
mod script;
mod text;
mod writer;

use std::collections::HashMap;

use log::{debug, trace, warn};

use self::diagnostics::{BinaryError, ErrorHandlerState, SourceError};
use self::module::ModuleAst;
use self::script::ScriptAst;
use super::{
    ErrorHandlerId, ErrorHandlerKind, LexerId, ModuleId, NativeLibrary, OutputBufferId,
    ParseResultId, ReadResultId, ScriptId, Status, WriteResultId,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::memory::{Address, ManagedBuffer, Memory};
use crate::options::{ReadBinaryOptions, WriteBinaryOptions, WriteTextOptions};

// ============================================================================
// Id tables
// ============================================================================

/// Objects of one kind, keyed by the raw id handed to the caller. Ids start
/// at 1 and are never reused.
#[derive(Debug)]
struct Table<T> {
    next: u32,
    entries: HashMap<u32, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }
}

impl<T> Table<T> {
    fn insert(&mut self, value: T) -> u32 {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, value);
        id
    }

    fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Native objects
// ============================================================================

#[derive(Debug)]
struct LexerState {
    filename: String,
    source: ManagedBuffer,
}

#[derive(Debug)]
struct ParseOutcome {
    status: Status,
    script: Option<ScriptAst>,
}

#[derive(Debug)]
struct ReadOutcome {
    status: Status,
    module: Option<ModuleAst>,
}

#[derive(Debug)]
struct WriteOutcome {
    status: Status,
    output: Option<OutputBufferId>,
    log: Option<OutputBufferId>,
}

/// The default native library.
#[derive(Debug)]
pub struct WasmTools {
    source_line_max_length: usize,
    lexers: Table<LexerState>,
    error_handlers: Table<ErrorHandlerState>,
    parse_results: Table<ParseOutcome>,
    read_results: Table<ReadOutcome>,
    write_results: Table<WriteOutcome>,
    scripts: Table<ScriptAst>,
    modules: Table<ModuleAst>,
    output_buffers: Table<ManagedBuffer>,
}

impl Default for WasmTools {
    fn default() -> Self {
        Self::new(BridgeConfig::default().source_line_max_length)
    }
}

impl WasmTools {
    /// `source_line_max_length` bounds the source line echoed in text
    /// diagnostics.
    pub fn new(source_line_max_length: usize) -> Self {
        Self {
            source_line_max_length,
            lexers: Table::default(),
            error_handlers: Table::default(),
            parse_results: Table::default(),
            read_results: Table::default(),
            write_results: Table::default(),
            scripts: Table::default(),
            modules: Table::default(),
            output_buffers: Table::default(),
        }
    }

    /// The lexer's source text, or a diagnostic explaining why it is
    /// unavailable.
    fn lexer_source<'m>(
        &self,
        memory: &'m Memory,
        lexer: LexerId,
    ) -> std::result::Result<(String, &'m str), SourceError> {
        let state = self
            .lexers
            .get(lexer.raw())
            .ok_or_else(|| SourceError::new(0, format!("unknown lexer {}", lexer.raw())))?;
        let bytes = memory
            .read(state.source)
            .map_err(|e| SourceError::new(0, e.to_string()))?;
        let source = std::str::from_utf8(bytes).map_err(|e| {
            SourceError::new(e.valid_up_to(), "malformed UTF-8 encoding")
        })?;
        Ok((state.filename.clone(), source))
    }

    fn report_source(
        &mut self,
        errors: ErrorHandlerId,
        filename: &str,
        source: &str,
        diagnostics: &[SourceError],
    ) {
        let max = self.source_line_max_length;
        match self.error_handlers.get_mut(errors.raw()) {
            Some(handler) => {
                for error in diagnostics {
                    handler.on_source_error(filename, source, error, max);
                }
            }
            None => warn!("dropping diagnostics for unknown error handler {}", errors.raw()),
        }
    }

    fn report_binary(&mut self, errors: ErrorHandlerId, error: &BinaryError) {
        match self.error_handlers.get_mut(errors.raw()) {
            Some(handler) => handler.on_binary_error(error),
            None => warn!("dropping diagnostics for unknown error handler {}", errors.raw()),
        }
    }

    /// Run a script pass that reports text diagnostics.
    fn script_pass(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        script: ScriptId,
        errors: ErrorHandlerId,
        pass: impl FnOnce(&mut ScriptAst, &str) -> std::result::Result<(), Vec<SourceError>>,
    ) -> Status {
        let (filename, source) = match self.lexer_source(memory, lexer) {
            Ok(found) => found,
            Err(err) => {
                self.report_source(errors, "", "", &[err]);
                return Status::Error;
            }
        };
        let outcome = match self.scripts.get_mut(script.raw()) {
            Some(ast) => pass(ast, source),
            None => Err(vec![SourceError::new(
                0,
                format!("unknown script {}", script.raw()),
            )]),
        };
        match outcome {
            Ok(()) => Status::Ok,
            Err(diagnostics) => {
                self.report_source(errors, &filename, source, &diagnostics);
                Status::Error
            }
        }
    }

    fn store_output(&mut self, memory: &mut Memory, bytes: &[u8]) -> Result<OutputBufferId> {
        let buffer = memory.copy_into(bytes)?;
        Ok(OutputBufferId(self.output_buffers.insert(buffer)))
    }

    fn release_output(&mut self, memory: &mut Memory, id: Option<OutputBufferId>) {
        if let Some(id) = id {
            self.destroy_output_buffer(memory, id);
        }
    }

    fn write_outcome(
        &mut self,
        memory: &mut Memory,
        output: Option<&[u8]>,
        log: Option<&str>,
    ) -> Result<WriteResultId> {
        let Some(output) = output else {
            let id = self.write_results.insert(WriteOutcome {
                status: Status::Error,
                output: None,
                log: None,
            });
            return Ok(WriteResultId(id));
        };

        let output = self.store_output(memory, output)?;
        let log = match log.map(|log| self.store_output(memory, log.as_bytes())).transpose() {
            Ok(log) => log,
            Err(err) => {
                self.release_output(memory, Some(output));
                return Err(err);
            }
        };
        let id = self.write_results.insert(WriteOutcome {
            status: Status::Ok,
            output: Some(output),
            log,
        });
        Ok(WriteResultId(id))
    }
}

// ============================================================================
// NativeLibrary
// ============================================================================

impl NativeLibrary for WasmTools {
    fn new_wast_buffer_lexer(
        &mut self,
        memory: &Memory,
        filename: ManagedBuffer,
        source: ManagedBuffer,
    ) -> Option<LexerId> {
        let bytes = memory.read(filename).ok()?;
        let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        let filename = String::from_utf8_lossy(bytes).into_owned();
        memory.read(source).ok()?;
        let id = self.lexers.insert(LexerState { filename, source });
        trace!("lexer {id} created");
        Some(LexerId(id))
    }

    fn destroy_wast_lexer(&mut self, lexer: LexerId) {
        self.lexers.remove(lexer.raw());
    }

    fn new_error_handler(&mut self, kind: ErrorHandlerKind) -> ErrorHandlerId {
        ErrorHandlerId(self.error_handlers.insert(ErrorHandlerState::new(kind)))
    }

    fn error_handler_buffer(
        &mut self,
        memory: &mut Memory,
        handler: ErrorHandlerId,
    ) -> Result<Address> {
        let Some(state) = self.error_handlers.get_mut(handler.raw()) else {
            return Err(BridgeError::InvalidAccess {
                address: 0,
                size: 0,
            });
        };
        if let Some(previous) = state.buffer.take() {
            memory.release(previous);
        }
        let address = memory.write_length_prefixed(state.text.as_bytes())?;
        state.buffer = Some(address);
        Ok(address)
    }

    fn destroy_error_handler(&mut self, memory: &mut Memory, handler: ErrorHandlerId) {
        if let Some(state) = self.error_handlers.remove(handler.raw()) {
            if let Some(buffer) = state.buffer {
                memory.release(buffer);
            }
        }
    }

    fn parse_wast(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        errors: ErrorHandlerId,
    ) -> ParseResultId {
        let outcome = match self.lexer_source(memory, lexer) {
            Ok((filename, source)) => match ScriptAst::parse(source) {
                Ok(script) => {
                    debug!("parsed {filename}: {} module(s)", script.modules.len());
                    ParseOutcome {
                        status: Status::Ok,
                        script: Some(script),
                    }
                }
                Err(err) => {
                    self.report_source(errors, &filename, source, &[err]);
                    ParseOutcome {
                        status: Status::Error,
                        script: None,
                    }
                }
            },
            Err(err) => {
                self.report_source(errors, "", "", &[err]);
                ParseOutcome {
                    status: Status::Error,
                    script: None,
                }
            }
        };
        ParseResultId(self.parse_results.insert(outcome))
    }

    fn parse_wast_result_status(&self, result: ParseResultId) -> Status {
        self.parse_results
            .get(result.raw())
            .map_or(Status::Error, |r| r.status)
    }

    fn parse_wast_result_release_script(&mut self, result: ParseResultId) -> Option<ScriptId> {
        let script = self.parse_results.get_mut(result.raw())?.script.take()?;
        Some(ScriptId(self.scripts.insert(script)))
    }

    fn destroy_parse_wast_result(&mut self, result: ParseResultId) {
        self.parse_results.remove(result.raw());
    }

    fn read_binary(
        &mut self,
        memory: &Memory,
        data: ManagedBuffer,
        options: ReadBinaryOptions,
        errors: ErrorHandlerId,
    ) -> ReadResultId {
        let decoded = memory
            .read(data)
            .map_err(|e| BinaryError::new(0, e.to_string()))
            .and_then(|bytes| ModuleAst::read(bytes, options.read_debug_names));
        let outcome = match decoded {
            Ok(module) => {
                debug!("read binary module: {} section(s)", module.sections.len());
                ReadOutcome {
                    status: Status::Ok,
                    module: Some(module),
                }
            }
            Err(err) => {
                self.report_binary(errors, &err);
                ReadOutcome {
                    status: Status::Error,
                    module: None,
                }
            }
        };
        ReadResultId(self.read_results.insert(outcome))
    }

    fn read_binary_result_status(&self, result: ReadResultId) -> Status {
        self.read_results
            .get(result.raw())
            .map_or(Status::Error, |r| r.status)
    }

    fn read_binary_result_release_module(&mut self, result: ReadResultId) -> Option<ModuleId> {
        let module = self.read_results.get_mut(result.raw())?.module.take()?;
        Some(ModuleId(self.modules.insert(module)))
    }

    fn destroy_read_binary_result(&mut self, result: ReadResultId) {
        self.read_results.remove(result.raw());
    }

    fn resolve_names_script(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        script: ScriptId,
        errors: ErrorHandlerId,
    ) -> Status {
        self.script_pass(memory, lexer, script, errors, |ast, source| {
            ast.resolve_names(source)
        })
    }

    fn validate_script(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        script: ScriptId,
        errors: ErrorHandlerId,
    ) -> Status {
        self.script_pass(memory, lexer, script, errors, |ast, source| {
            ast.validate(source)
        })
    }

    fn script_module_count(&self, script: ScriptId) -> usize {
        self.scripts.get(script.raw()).map_or(0, |s| s.modules.len())
    }

    fn get_first_module(
        &mut self,
        memory: &Memory,
        lexer: LexerId,
        script: ScriptId,
    ) -> Option<ModuleId> {
        let (_, source) = self.lexer_source(memory, lexer).ok()?;
        let binary = match self.scripts.get(script.raw())?.first_module(source) {
            Ok(binary) => binary?,
            Err(err) => {
                debug!("first module failed to encode: {}", err.message);
                return None;
            }
        };
        match ModuleAst::read(&binary, true) {
            Ok(module) => Some(ModuleId(self.modules.insert(module))),
            Err(err) => {
                debug!("first module failed to decode: {}", err.message);
                None
            }
        }
    }

    fn destroy_script(&mut self, script: ScriptId) {
        self.scripts.remove(script.raw());
    }

    fn generate_names_module(&mut self, module: ModuleId) -> Status {
        let Some(ast) = self.modules.get_mut(module.raw()) else {
            return Status::Error;
        };
        let generated = ast.names.generate(&ast.index);
        ast.generated = Some(generated);
        Status::Ok
    }

    fn apply_names_module(&mut self, module: ModuleId) -> Status {
        let Some(ast) = self.modules.get_mut(module.raw()) else {
            return Status::Error;
        };
        if let Some(generated) = ast.generated.take() {
            ast.names.absorb(&generated);
        }
        Status::Ok
    }

    fn write_text_module(
        &mut self,
        memory: &mut Memory,
        module: ModuleId,
        options: WriteTextOptions,
    ) -> Result<WriteResultId> {
        let text = match self.modules.get(module.raw()) {
            Some(ast) => text::write_text(ast, &options)
                .map_err(|err| warn!("text emission failed: {err:#}"))
                .ok(),
            None => None,
        };
        self.write_outcome(memory, text.as_deref().map(str::as_bytes), None)
    }

    fn write_binary_module(
        &mut self,
        memory: &mut Memory,
        module: ModuleId,
        options: WriteBinaryOptions,
    ) -> Result<WriteResultId> {
        let emitted = self
            .modules
            .get(module.raw())
            .map(|ast| writer::write_binary(ast, &options));
        match emitted {
            Some(Ok(emitted)) => {
                let log = options.log.then(|| emitted.log.unwrap_or_default());
                self.write_outcome(memory, Some(&emitted.bytes), log.as_deref())
            }
            Some(Err(err)) => {
                warn!("binary emission failed: {}", err.message);
                self.write_outcome(memory, None, None)
            }
            None => self.write_outcome(memory, None, None),
        }
    }

    fn destroy_module(&mut self, module: ModuleId) {
        self.modules.remove(module.raw());
    }

    fn write_result_status(&self, result: WriteResultId) -> Status {
        self.write_results
            .get(result.raw())
            .map_or(Status::Error, |r| r.status)
    }

    fn write_result_release_output_buffer(
        &mut self,
        result: WriteResultId,
    ) -> Option<OutputBufferId> {
        self.write_results.get_mut(result.raw())?.output.take()
    }

    fn write_result_release_log_output_buffer(
        &mut self,
        result: WriteResultId,
    ) -> Option<OutputBufferId> {
        self.write_results.get_mut(result.raw())?.log.take()
    }

    fn destroy_write_result(&mut self, memory: &mut Memory, result: WriteResultId) {
        if let Some(outcome) = self.write_results.remove(result.raw()) {
            self.release_output(memory, outcome.output);
            self.release_output(memory, outcome.log);
        }
    }

    fn output_buffer_data(&self, buffer: OutputBufferId) -> Option<ManagedBuffer> {
        self.output_buffers.get(buffer.raw()).copied()
    }

    fn destroy_output_buffer(&mut self, memory: &mut Memory, buffer: OutputBufferId) {
        if let Some(data) = self.output_buffers.remove(buffer.raw()) {
            memory.release(data.address);
        }
    }

    fn live_objects(&self) -> usize {
        self.lexers.len()
            + self.error_handlers.len()
            + self.parse_results.len()
            + self.read_results.len()
            + self.write_results.len()
            + self.scripts.len()
            + self.modules.len()
            + self.output_buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexer(tools: &mut WasmTools, memory: &mut Memory, source: &str) -> LexerId {
        let filename = memory.copy_cstr("test.wast").unwrap();
        let source = memory.copy_into(source).unwrap();
        tools.new_wast_buffer_lexer(memory, filename, source).unwrap()
    }

    fn handler_text(tools: &mut WasmTools, memory: &mut Memory, id: ErrorHandlerId) -> String {
        let address = tools.error_handler_buffer(memory, id).unwrap();
        String::from_utf8_lossy(memory.read_length_prefixed(address).unwrap()).into_owned()
    }

    #[test]
    fn ids_start_at_one_and_are_not_reused() {
        let mut table = Table::default();
        assert_eq!(table.insert('a'), 1);
        assert_eq!(table.insert('b'), 2);
        table.remove(1);
        assert_eq!(table.insert('c'), 3);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn parse_result_hands_over_the_script_once() {
        let mut tools = WasmTools::default();
        let mut memory = Memory::default();
        let lexer = lexer(&mut tools, &mut memory, "(module)");
        let errors = tools.new_error_handler(ErrorHandlerKind::Source);

        let result = tools.parse_wast(&memory, lexer, errors);
        assert_eq!(tools.parse_wast_result_status(result), Status::Ok);
        let script = tools.parse_wast_result_release_script(result).unwrap();
        assert!(tools.parse_wast_result_release_script(result).is_none());
        assert_eq!(tools.script_module_count(script), 1);
        tools.destroy_parse_wast_result(result);
        tools.destroy_script(script);
        tools.destroy_wast_lexer(lexer);
        tools.destroy_error_handler(&mut memory, errors);
        assert_eq!(tools.live_objects(), 0);
    }

    #[test]
    fn parse_errors_accumulate_in_the_handler() {
        let mut tools = WasmTools::default();
        let mut memory = Memory::default();
        let lexer = lexer(&mut tools, &mut memory, "(module (fnc))");
        let errors = tools.new_error_handler(ErrorHandlerKind::Source);

        let result = tools.parse_wast(&memory, lexer, errors);
        assert_eq!(tools.parse_wast_result_status(result), Status::Error);
        assert!(tools.parse_wast_result_release_script(result).is_none());
        let text = handler_text(&mut tools, &mut memory, errors);
        assert!(text.starts_with("test.wast:1:"));
        assert!(text.contains("(module (fnc))\n"));
    }

    #[test]
    fn binary_errors_use_offsets() {
        let mut tools = WasmTools::default();
        let mut memory = Memory::default();
        let data = memory.copy_into(&[0u8, 0x61, 0x73, 0x6d, 2, 0, 0, 0]).unwrap();
        let errors = tools.new_error_handler(ErrorHandlerKind::Binary);

        let result = tools.read_binary(&memory, data, ReadBinaryOptions::default(), errors);
        assert_eq!(tools.read_binary_result_status(result), Status::Error);
        let text = handler_text(&mut tools, &mut memory, errors);
        assert!(text.starts_with("@0x"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn destroying_a_write_result_frees_unreleased_buffers() {
        let mut tools = WasmTools::default();
        let mut memory = Memory::default();
        let wasm = wat::parse_str("(module (func))").unwrap();
        let data = memory.copy_into(&wasm).unwrap();
        let errors = tools.new_error_handler(ErrorHandlerKind::Binary);
        let read = tools.read_binary(&memory, data, ReadBinaryOptions::default(), errors);
        let module = tools.read_binary_result_release_module(read).unwrap();

        let live_before = memory.stats().live;
        let options = WriteBinaryOptions {
            log: true,
            ..WriteBinaryOptions::default()
        };
        let write = tools.write_binary_module(&mut memory, module, options).unwrap();
        assert_eq!(tools.write_result_status(write), Status::Ok);
        assert_eq!(memory.stats().live, live_before + 2);

        let output = tools.write_result_release_output_buffer(write).unwrap();
        tools.destroy_write_result(&mut memory, write);
        assert_eq!(memory.stats().live, live_before + 1);

        let bytes = memory.read(tools.output_buffer_data(output).unwrap()).unwrap();
        assert_eq!(bytes, wasm.as_slice());
        tools.destroy_output_buffer(&mut memory, output);
        assert_eq!(memory.stats().live, live_before);
    }

    #[test]
    fn generated_names_only_show_once_applied() {
        let mut tools = WasmTools::default();
        let mut memory = Memory::default();
        let wasm = wat::parse_str("(module (func (param i32)))").unwrap();
        let data = memory.copy_into(&wasm).unwrap();
        let errors = tools.new_error_handler(ErrorHandlerKind::Binary);
        let read = tools.read_binary(&memory, data, ReadBinaryOptions::default(), errors);
        let module = tools.read_binary_result_release_module(read).unwrap();

        let text = |tools: &mut WasmTools, memory: &mut Memory| {
            let write = tools
                .write_text_module(memory, module, WriteTextOptions::default())
                .unwrap();
            let output = tools.write_result_release_output_buffer(write).unwrap();
            let text = String::from_utf8(
                memory.read(tools.output_buffer_data(output).unwrap()).unwrap().to_vec(),
            )
            .unwrap();
            tools.destroy_output_buffer(memory, output);
            tools.destroy_write_result(memory, write);
            text
        };

        assert_eq!(tools.generate_names_module(module), Status::Ok);
        assert!(!text(&mut tools, &mut memory).contains("$f0"));
        assert_eq!(tools.apply_names_module(module), Status::Ok);
        let named = text(&mut tools, &mut memory);
        assert!(named.contains("$f0"));
        assert!(named.contains("$p0"));
    }

    #[test]
    fn unknown_ids_report_errors() {
        let mut tools = WasmTools::default();
        assert_eq!(tools.generate_names_module(ModuleId(42)), Status::Error);
        assert_eq!(tools.parse_wast_result_status(ParseResultId(42)), Status::Error);
        assert_eq!(tools.script_module_count(ScriptId(42)), 0);
        assert!(tools.output_buffer_data(OutputBufferId(42)).is_none());
    }
}
