//! Module AST: the raw sections of a core module plus the index-space
//! summary the name passes need.

use wasmparser::{
    DataSectionReader, ElementItems, ElementSectionReader, Encoding,
    ExportSectionReader, FunctionBody, FunctionSectionReader, GlobalSectionReader,
    ImportSectionReader, MemorySectionReader, Parser, Payload, TableSectionReader,
    TagSectionReader, TypeSectionReader,
};

use super::diagnostics::BinaryError;
use super::names::{read_name_section, NameTable};

/// A section of the module, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RawSection {
    pub id: u8,
    /// Name of a custom section.
    pub name: Option<String>,
    /// Section contents (after the size field). Custom sections include
    /// their name.
    pub data: Vec<u8>,
}

impl RawSection {
    pub const CUSTOM: u8 = 0;

    pub fn kind_name(&self) -> &'static str {
        Self::id_name(self.id)
    }

    fn id_name(id: u8) -> &'static str {
        match id {
            0 => "Custom",
            1 => "Type",
            2 => "Import",
            3 => "Function",
            4 => "Table",
            5 => "Memory",
            6 => "Global",
            7 => "Export",
            8 => "Start",
            9 => "Elem",
            10 => "Code",
            11 => "Data",
            12 => "DataCount",
            13 => "Tag",
            _ => "Unknown",
        }
    }

    /// Position of a known non-custom section in the required order. Tags
    /// sit between memories and globals; data count precedes code.
    fn order(id: u8) -> Option<u8> {
        let order = match id {
            1..=5 => id,
            13 => 6,
            6..=9 => id + 1,
            12 => 11,
            10 => 12,
            11 => 13,
            _ => return None,
        };
        Some(order)
    }
}

/// One entry of the function index space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct FuncEntry {
    pub type_index: u32,
    /// `(module, field)` for imported functions.
    pub import: Option<(String, String)>,
    pub params: u32,
    /// Declared locals, excluding parameters.
    pub locals: u32,
}

/// Which index space an export refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EntityKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ExportEntry {
    pub name: String,
    pub kind: EntityKind,
    pub index: u32,
}

/// Summary of the module's index spaces. Imported entries carry their
/// `(module, field)` origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct IndexSpace {
    /// Parameter count per type index; `None` for non-function types.
    pub types: Vec<Option<u32>>,
    pub funcs: Vec<FuncEntry>,
    pub tables: Vec<Option<(String, String)>>,
    pub memories: Vec<Option<(String, String)>>,
    pub globals: Vec<Option<(String, String)>>,
    pub tags: u32,
    pub elements: u32,
    pub data: u32,
    pub exports: Vec<ExportEntry>,
    pub imported_funcs: u32,
    /// Next function index whose body has not been read yet.
    pub next_body: u32,
}

impl IndexSpace {
    fn params_of(&self, type_index: u32) -> u32 {
        self.types
            .get(type_index as usize)
            .copied()
            .flatten()
            .unwrap_or(0)
    }

    pub fn is_exported(&self, kind: EntityKind, index: u32) -> bool {
        self.exports.iter().any(|e| e.kind == kind && e.index == index)
    }
}

/// A decoded core module.
#[derive(Debug, Clone, Default)]
pub(super) struct ModuleAst {
    /// Every section except `name`, in binary order.
    pub sections: Vec<RawSection>,
    /// Names the emitters use.
    pub names: NameTable,
    /// Names produced by `generate_names` and not yet applied.
    pub generated: Option<NameTable>,
    pub index: IndexSpace,
}

impl ModuleAst {
    /// Decode every section of `wasm`, including all items and every
    /// function body's operators.
    ///
    /// The `name` section is decoded into [`ModuleAst::names`] when
    /// `read_debug_names` is set and dropped otherwise.
    pub fn read(wasm: &[u8], read_debug_names: bool) -> Result<Self, BinaryError> {
        let mut module = Self::default();
        let mut last_order = 0;
        for payload in Parser::new(0).parse_all(wasm) {
            let payload = payload?;
            if let Some((id, range)) = payload.as_section() {
                let data = wasm.get(range.clone()).ok_or_else(|| {
                    BinaryError::new(range.start, "section extends past the end of the module")
                })?;
                if let Some(order) = RawSection::order(id) {
                    if order <= last_order {
                        return Err(Self::misplaced(id, order == last_order, range.start));
                    }
                    last_order = order;
                }

                let name = match &payload {
                    Payload::CustomSection(reader) => Some(reader.name().to_string()),
                    _ => None,
                };
                if name.as_deref() != Some("name") {
                    module.sections.push(RawSection {
                        id,
                        name,
                        data: data.to_vec(),
                    });
                }
            }
            module.process_payload(payload, read_debug_names)?;
        }
        Ok(module)
    }

    fn misplaced(id: u8, repeated: bool, offset: usize) -> BinaryError {
        let kind = RawSection::id_name(id);
        if repeated {
            BinaryError::new(offset, format!("multiple {kind} sections"))
        } else {
            BinaryError::new(offset, format!("section {kind} out of order"))
        }
    }

    fn process_payload(
        &mut self,
        payload: Payload<'_>,
        read_debug_names: bool,
    ) -> Result<(), BinaryError> {
        match payload {
            Payload::Version {
                num,
                encoding,
                range,
            } => {
                if encoding != Encoding::Module {
                    return Err(BinaryError::new(range.start, "components are not supported"));
                }
                if num != 1 {
                    return Err(BinaryError::new(
                        range.start,
                        format!("bad wasm file version: {num:#x} (expected 0x1)"),
                    ));
                }
            }
            Payload::TypeSection(reader) => self.read_types(reader)?,
            Payload::ImportSection(reader) => self.read_imports(reader)?,
            Payload::FunctionSection(reader) => self.read_functions(reader)?,
            Payload::TableSection(reader) => self.read_tables(reader)?,
            Payload::MemorySection(reader) => self.read_memories(reader)?,
            Payload::TagSection(reader) => self.read_tags(reader)?,
            Payload::GlobalSection(reader) => self.read_globals(reader)?,
            Payload::ExportSection(reader) => self.read_exports(reader)?,
            Payload::ElementSection(reader) => self.read_elements(reader)?,
            Payload::DataSection(reader) => self.read_data(reader)?,
            Payload::CodeSectionStart { count, range, .. } => {
                let defined = self.index.funcs.len() as u32 - self.index.imported_funcs;
                if count != defined {
                    return Err(BinaryError::new(
                        range.start,
                        "function and code section have inconsistent lengths",
                    ));
                }
            }
            Payload::CodeSectionEntry(body) => self.read_body(body)?,
            Payload::CustomSection(reader) => {
                if reader.name() == "name" && read_debug_names {
                    if let Some(names) = read_name_section(&reader) {
                        self.names = names?;
                    }
                }
            }
            Payload::UnknownSection { id, range, .. } => {
                return Err(BinaryError::new(range.start, format!("unknown section id {id}")));
            }
            Payload::End(offset) => {
                if (self.index.next_body as usize) < self.index.funcs.len() {
                    return Err(BinaryError::new(
                        offset,
                        "function and code section have inconsistent lengths",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn read_types(&mut self, reader: TypeSectionReader<'_>) -> Result<(), BinaryError> {
        for rec_group in reader {
            for ty in rec_group?.into_types() {
                let params = match &ty.composite_type.inner {
                    wasmparser::CompositeInnerType::Func(func) => Some(func.params().len() as u32),
                    _ => None,
                };
                self.index.types.push(params);
            }
        }
        Ok(())
    }

    fn read_imports(&mut self, reader: ImportSectionReader<'_>) -> Result<(), BinaryError> {
        for import in reader {
            let import = import?;
            let origin = Some((import.module.to_string(), import.name.to_string()));
            match import.ty {
                wasmparser::TypeRef::Func(type_index) => {
                    self.index.funcs.push(FuncEntry {
                        type_index,
                        import: origin,
                        params: self.index.params_of(type_index),
                        locals: 0,
                    });
                    self.index.imported_funcs += 1;
                }
                wasmparser::TypeRef::Table(_) => self.index.tables.push(origin),
                wasmparser::TypeRef::Memory(_) => self.index.memories.push(origin),
                wasmparser::TypeRef::Global(_) => self.index.globals.push(origin),
                wasmparser::TypeRef::Tag(_) => self.index.tags += 1,
            }
        }
        self.index.next_body = self.index.imported_funcs;
        Ok(())
    }

    fn read_functions(&mut self, reader: FunctionSectionReader<'_>) -> Result<(), BinaryError> {
        for type_index in reader {
            let type_index = type_index?;
            self.index.funcs.push(FuncEntry {
                type_index,
                import: None,
                params: self.index.params_of(type_index),
                locals: 0,
            });
        }
        Ok(())
    }

    fn read_tables(&mut self, reader: TableSectionReader<'_>) -> Result<(), BinaryError> {
        for table in reader {
            table?;
            self.index.tables.push(None);
        }
        Ok(())
    }

    fn read_memories(&mut self, reader: MemorySectionReader<'_>) -> Result<(), BinaryError> {
        for memory in reader {
            memory?;
            self.index.memories.push(None);
        }
        Ok(())
    }

    fn read_tags(&mut self, reader: TagSectionReader<'_>) -> Result<(), BinaryError> {
        for tag in reader {
            tag?;
            self.index.tags += 1;
        }
        Ok(())
    }

    fn read_globals(&mut self, reader: GlobalSectionReader<'_>) -> Result<(), BinaryError> {
        for global in reader {
            let global = global?;
            for op in global.init_expr.get_operators_reader() {
                op?;
            }
            self.index.globals.push(None);
        }
        Ok(())
    }

    fn read_exports(&mut self, reader: ExportSectionReader<'_>) -> Result<(), BinaryError> {
        for export in reader {
            let export = export?;
            let kind = match export.kind {
                wasmparser::ExternalKind::Func => EntityKind::Func,
                wasmparser::ExternalKind::Table => EntityKind::Table,
                wasmparser::ExternalKind::Memory => EntityKind::Memory,
                wasmparser::ExternalKind::Global => EntityKind::Global,
                wasmparser::ExternalKind::Tag => EntityKind::Tag,
            };
            self.index.exports.push(ExportEntry {
                name: export.name.to_string(),
                kind,
                index: export.index,
            });
        }
        Ok(())
    }

    fn read_elements(&mut self, reader: ElementSectionReader<'_>) -> Result<(), BinaryError> {
        for element in reader {
            match element?.items {
                ElementItems::Functions(funcs) => {
                    for func in funcs {
                        func?;
                    }
                }
                ElementItems::Expressions(_, exprs) => {
                    for expr in exprs {
                        expr?;
                    }
                }
            }
            self.index.elements += 1;
        }
        Ok(())
    }

    fn read_data(&mut self, reader: DataSectionReader<'_>) -> Result<(), BinaryError> {
        for data in reader {
            data?;
            self.index.data += 1;
        }
        Ok(())
    }

    fn read_body(&mut self, body: FunctionBody<'_>) -> Result<(), BinaryError> {
        let mut locals = 0u32;
        for local in body.get_locals_reader()? {
            let (count, _ty) = local?;
            locals = locals.saturating_add(count);
        }
        for op in body.get_operators_reader()? {
            op?;
        }

        let index = self.index.next_body as usize;
        let entry = self.index.funcs.get_mut(index).ok_or_else(|| {
            BinaryError::new(body.range().start, "function body count exceeds function count")
        })?;
        entry.locals = locals;
        self.index.next_body += 1;
        Ok(())
    }

    pub fn has_custom_section(&self, name: &str) -> bool {
        self.sections
            .iter()
            .any(|s| s.id == RawSection::CUSTOM && s.name.as_deref() == Some(name))
    }
}
