//! Binary emitter.
//!
//! Sections are written back verbatim from the module AST; the emitter
//! owns only the framing (section ids and sizes), the optional `linking`
//! and `name` sections, and the annotated log.

use wasm_encoder::{Encode, LinkingSection, Section, SymbolTable};
use wasmparser::{BinaryReader, BinaryReaderError};

use super::diagnostics::BinaryError;
use super::module::{EntityKind, ModuleAst, RawSection};
use crate::options::WriteBinaryOptions;

const MAGIC: [u8; 4] = *b"\0asm";
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Bytes per row of section contents in the log.
const LOG_ROW: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Emitted {
    pub bytes: Vec<u8>,
    /// Annotated hex dump, when requested.
    pub log: Option<String>,
}

pub(super) fn write_binary(
    module: &ModuleAst,
    options: &WriteBinaryOptions,
) -> Result<Emitted, BinaryError> {
    let mut emitter = Emitter::new(options.canonicalize_lebs, options.log);
    emitter.emit(&MAGIC, "WASM_BINARY_MAGIC");
    emitter.emit(&VERSION, "WASM_BINARY_VERSION");

    for section in &module.sections {
        let label = section.name.as_deref().unwrap_or(section.kind_name());
        emitter.section(section.id, label, &section.data);
    }

    if options.relocatable && !module.has_custom_section("linking") {
        let data = custom_contents(&linking_section(module))?;
        emitter.section(RawSection::CUSTOM, "linking", &data);
    }

    if options.write_debug_names && !module.names.is_empty() {
        let data = custom_contents(&module.names.encode())?;
        emitter.section(RawSection::CUSTOM, "name", &data);
    }

    Ok(emitter.finish())
}

/// Symbol table listing every function. Imports are undefined symbols;
/// defined functions that are not exported bind locally.
fn linking_section(module: &ModuleAst) -> LinkingSection {
    let mut symbols = SymbolTable::new();
    for (i, func) in module.index.funcs.iter().enumerate() {
        let index = i as u32;
        if func.import.is_some() {
            symbols.function(SymbolTable::WASM_SYM_UNDEFINED, index, None);
            continue;
        }
        let exported = module.index.is_exported(EntityKind::Func, index);
        let flags = if exported {
            SymbolTable::WASM_SYM_EXPORTED
        } else {
            SymbolTable::WASM_SYM_BINDING_LOCAL
        };
        let name = module
            .names
            .functions
            .get(&index)
            .cloned()
            .or_else(|| {
                module
                    .index
                    .exports
                    .iter()
                    .find(|e| e.kind == EntityKind::Func && e.index == index)
                    .map(|e| e.name.clone())
            })
            .unwrap_or_else(|| format!("f{index}"));
        symbols.function(flags, index, Some(&name));
    }

    let mut linking = LinkingSection::new();
    linking.symbol_table(&symbols);
    linking
}

/// Contents of an encoded custom section: its name followed by its payload,
/// without the section id and size.
fn custom_contents(section: &impl Section) -> Result<Vec<u8>, BinaryReaderError> {
    let mut encoded = Vec::new();
    section.encode(&mut encoded);
    let mut reader = BinaryReader::new(&encoded, 0);
    let size = reader.read_var_u32()? as usize;
    let contents = reader.read_bytes(size)?;
    Ok(contents.to_vec())
}

fn write_leb_u32(value: u32, canonical: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    if canonical {
        value.encode(&mut out);
    } else {
        let mut rest = value;
        for i in 0..5 {
            let mut byte = (rest & 0x7f) as u8;
            rest >>= 7;
            if i < 4 {
                byte |= 0x80;
            }
            out.push(byte);
        }
    }
    out
}

struct Emitter {
    out: Vec<u8>,
    canonicalize_lebs: bool,
    log: Option<String>,
}

impl Emitter {
    fn new(canonicalize_lebs: bool, log: bool) -> Self {
        Self {
            out: Vec::new(),
            canonicalize_lebs,
            log: log.then(String::new),
        }
    }

    fn emit(&mut self, bytes: &[u8], comment: &str) {
        let offset = self.out.len();
        self.out.extend_from_slice(bytes);
        if let Some(log) = &mut self.log {
            log.push_str(&log_row(offset, bytes, comment));
        }
    }

    fn heading(&mut self, text: &str) {
        if let Some(log) = &mut self.log {
            log.push_str(&format!("; {text}\n"));
        }
    }

    fn section(&mut self, id: u8, label: &str, data: &[u8]) {
        self.heading(&format!("section \"{label}\" ({id})"));
        self.emit(&[id], "section code");
        let size = write_leb_u32(data.len() as u32, self.canonicalize_lebs);
        self.emit(&size, "section size");
        for row in data.chunks(LOG_ROW) {
            self.emit(row, "section contents");
        }
    }

    fn finish(self) -> Emitted {
        Emitted {
            bytes: self.out,
            log: self.log,
        }
    }
}

/// One log line: offset, bytes grouped in pairs, comment.
fn log_row(offset: usize, bytes: &[u8], comment: &str) -> String {
    let mut hex = String::new();
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 && i % 2 == 0 {
            hex.push(' ');
        }
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{offset:07x}: {hex:<40} ; {comment}\n")
}
