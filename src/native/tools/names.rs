//! Debug-name tables: decoding the `name` section, generating names for
//! unnamed entities, and encoding the section back out.

use std::collections::{BTreeMap, HashSet};

use wasm_encoder::{IndirectNameMap as EncIndirectNameMap, NameMap as EncNameMap, NameSection};
use wasmparser::{
    BinaryReaderError, CustomSectionReader, IndirectNameMap, KnownCustom, Name, NameMap,
    NameSectionReader,
};

use super::module::IndexSpace;

type Names = BTreeMap<u32, String>;
type IndirectNames = BTreeMap<u32, Names>;

/// Names for every index space the bridge tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct NameTable {
    pub module: Option<String>,
    pub functions: Names,
    pub locals: IndirectNames,
    pub labels: IndirectNames,
    pub types: Names,
    pub tables: Names,
    pub memories: Names,
    pub globals: Names,
    pub elements: Names,
    pub data: Names,
}

impl NameTable {
    pub fn read(reader: NameSectionReader<'_>) -> Result<Self, BinaryReaderError> {
        let mut table = Self::default();
        for subsection in reader {
            match subsection? {
                Name::Module { name, .. } => table.module = Some(name.to_string()),
                Name::Function(map) => read_map(map, &mut table.functions)?,
                Name::Local(map) => read_indirect(map, &mut table.locals)?,
                Name::Label(map) => read_indirect(map, &mut table.labels)?,
                Name::Type(map) => read_map(map, &mut table.types)?,
                Name::Table(map) => read_map(map, &mut table.tables)?,
                Name::Memory(map) => read_map(map, &mut table.memories)?,
                Name::Global(map) => read_map(map, &mut table.globals)?,
                Name::Element(map) => read_map(map, &mut table.elements)?,
                Name::Data(map) => read_map(map, &mut table.data)?,
                // Field, tag and unknown subsections are not tracked.
                _ => {}
            }
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.module.is_none()
            && self.functions.is_empty()
            && self.locals.values().all(BTreeMap::is_empty)
            && self.labels.values().all(BTreeMap::is_empty)
            && self.types.is_empty()
            && self.tables.is_empty()
            && self.memories.is_empty()
            && self.globals.is_empty()
            && self.elements.is_empty()
            && self.data.is_empty()
    }

    /// Copy every entry of `other` that this table does not name yet.
    pub fn absorb(&mut self, other: &NameTable) {
        if self.module.is_none() {
            self.module.clone_from(&other.module);
        }
        absorb_map(&mut self.functions, &other.functions);
        absorb_indirect(&mut self.locals, &other.locals);
        absorb_indirect(&mut self.labels, &other.labels);
        absorb_map(&mut self.types, &other.types);
        absorb_map(&mut self.tables, &other.tables);
        absorb_map(&mut self.memories, &other.memories);
        absorb_map(&mut self.globals, &other.globals);
        absorb_map(&mut self.elements, &other.elements);
        absorb_map(&mut self.data, &other.data);
    }

    /// Names for every entity in `index` that `self` leaves unnamed.
    ///
    /// Imported functions, tables, memories and globals are named
    /// `module.field`; everything else gets a kind prefix and its index.
    /// Parameters are `p<i>` and locals `l<i>` over the function's whole
    /// local index space.
    pub fn generate(&self, index: &IndexSpace) -> NameTable {
        let mut out = NameTable::default();

        let mut taken = used(&self.functions);
        for (i, func) in index.funcs.iter().enumerate() {
            let i = i as u32;
            if !self.functions.contains_key(&i) {
                let base = match &func.import {
                    Some((module, field)) => format!("{module}.{field}"),
                    None => format!("f{i}"),
                };
                out.functions.insert(i, unique(base, &mut taken));
            }

            if func.import.is_some() {
                continue;
            }
            let existing = self.locals.get(&i);
            let mut taken = existing.map(used).unwrap_or_default();
            let mut locals = Names::new();
            for local in 0..func.params + func.locals {
                if existing.is_some_and(|names| names.contains_key(&local)) {
                    continue;
                }
                let prefix = if local < func.params { "p" } else { "l" };
                locals.insert(local, unique(format!("{prefix}{local}"), &mut taken));
            }
            if !locals.is_empty() {
                out.locals.insert(i, locals);
            }
        }

        generate_space(&self.types, index.types.len(), "t", |_| None, &mut out.types);
        generate_space(&self.tables, index.tables.len(), "T", |i| index.tables[i].clone(), &mut out.tables);
        generate_space(
            &self.memories,
            index.memories.len(),
            "M",
            |i| index.memories[i].clone(),
            &mut out.memories,
        );
        generate_space(
            &self.globals,
            index.globals.len(),
            "g",
            |i| index.globals[i].clone(),
            &mut out.globals,
        );
        out
    }

    pub fn encode(&self) -> NameSection {
        let mut section = NameSection::new();
        if let Some(name) = &self.module {
            section.module(name);
        }
        if !self.functions.is_empty() {
            section.functions(&encode_map(&self.functions));
        }
        if !self.locals.is_empty() {
            section.locals(&encode_indirect(&self.locals));
        }
        if !self.labels.is_empty() {
            section.labels(&encode_indirect(&self.labels));
        }
        if !self.types.is_empty() {
            section.types(&encode_map(&self.types));
        }
        if !self.tables.is_empty() {
            section.tables(&encode_map(&self.tables));
        }
        if !self.memories.is_empty() {
            section.memories(&encode_map(&self.memories));
        }
        if !self.globals.is_empty() {
            section.globals(&encode_map(&self.globals));
        }
        if !self.elements.is_empty() {
            section.elements(&encode_map(&self.elements));
        }
        if !self.data.is_empty() {
            section.data(&encode_map(&self.data));
        }
        section
    }
}

/// Decode `reader` if it is a `name` section.
pub(super) fn read_name_section(
    reader: &CustomSectionReader<'_>,
) -> Option<Result<NameTable, BinaryReaderError>> {
    match reader.as_known() {
        KnownCustom::Name(names) => Some(NameTable::read(names)),
        _ => None,
    }
}

fn read_map(map: NameMap<'_>, out: &mut Names) -> Result<(), BinaryReaderError> {
    for naming in map {
        let naming = naming?;
        out.insert(naming.index, naming.name.to_string());
    }
    Ok(())
}

fn read_indirect(map: IndirectNameMap<'_>, out: &mut IndirectNames) -> Result<(), BinaryReaderError> {
    for indirect in map {
        let indirect = indirect?;
        let mut names = Names::new();
        read_map(indirect.names, &mut names)?;
        out.insert(indirect.index, names);
    }
    Ok(())
}

fn encode_map(names: &Names) -> EncNameMap {
    let mut map = EncNameMap::new();
    for (index, name) in names {
        map.append(*index, name);
    }
    map
}

fn encode_indirect(names: &IndirectNames) -> EncIndirectNameMap {
    let mut map = EncIndirectNameMap::new();
    for (index, inner) in names.iter().filter(|(_, inner)| !inner.is_empty()) {
        map.append(*index, &encode_map(inner));
    }
    map
}

fn absorb_map(dst: &mut Names, src: &Names) {
    for (index, name) in src {
        dst.entry(*index).or_insert_with(|| name.clone());
    }
}

fn absorb_indirect(dst: &mut IndirectNames, src: &IndirectNames) {
    for (index, inner) in src {
        absorb_map(dst.entry(*index).or_default(), inner);
    }
}

fn used(names: &Names) -> HashSet<String> {
    names.values().cloned().collect()
}

fn unique(base: String, taken: &mut HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 1;
    while taken.contains(&candidate) {
        candidate = format!("{base}.{n}");
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

fn generate_space(
    existing: &Names,
    count: usize,
    prefix: &str,
    import: impl Fn(usize) -> Option<(String, String)>,
    out: &mut Names,
) {
    let mut taken = used(existing);
    for i in 0..count {
        let index = i as u32;
        if existing.contains_key(&index) {
            continue;
        }
        let base = match import(i) {
            Some((module, field)) => format!("{module}.{field}"),
            None => format!("{prefix}{i}"),
        };
        out.insert(index, unique(base, &mut taken));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::tools::module::FuncEntry;

    fn index_space() -> IndexSpace {
        IndexSpace {
            types: vec![Some(2)],
            funcs: vec![
                FuncEntry {
                    type_index: 0,
                    import: Some(("env".into(), "log".into())),
                    params: 2,
                    locals: 0,
                },
                FuncEntry {
                    type_index: 0,
                    import: None,
                    params: 2,
                    locals: 1,
                },
            ],
            memories: vec![None],
            globals: vec![Some(("env".into(), "base".into()))],
            ..IndexSpace::default()
        }
    }

    #[test]
    fn generates_names_for_unnamed_entities() {
        let names = NameTable::default().generate(&index_space());
        assert_eq!(names.functions[&0], "env.log");
        assert_eq!(names.functions[&1], "f1");
        assert_eq!(names.types[&0], "t0");
        assert_eq!(names.memories[&0], "M0");
        assert_eq!(names.globals[&0], "env.base");

        let locals = &names.locals[&1];
        assert_eq!(locals[&0], "p0");
        assert_eq!(locals[&1], "p1");
        assert_eq!(locals[&2], "l2");
        assert!(!names.locals.contains_key(&0));
    }

    #[test]
    fn keeps_existing_names_and_avoids_collisions() {
        let mut existing = NameTable::default();
        existing.functions.insert(0, "f1".into());

        let generated = existing.generate(&index_space());
        assert!(!generated.functions.contains_key(&0));
        assert_eq!(generated.functions[&1], "f1.1");

        existing.absorb(&generated);
        assert_eq!(existing.functions[&0], "f1");
        assert_eq!(existing.functions[&1], "f1.1");
    }

    #[test]
    fn encoded_section_decodes_to_the_same_table() {
        let mut table = NameTable::default().generate(&index_space());
        table.module = Some("demo".into());

        let mut module = wasm_encoder::Module::new();
        module.section(&table.encode());
        let bytes = module.finish();

        let decoded = wasmparser::Parser::new(0)
            .parse_all(&bytes)
            .find_map(|payload| match payload.unwrap() {
                wasmparser::Payload::CustomSection(reader) => read_name_section(&reader),
                _ => None,
            })
            .unwrap()
            .unwrap();
        assert_eq!(decoded, table);
    }
}
