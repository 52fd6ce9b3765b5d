//! Text emitter.

use anyhow::Result;
use wasmprinter::PrintFmtWrite;

use super::module::ModuleAst;
use super::writer::write_binary;
use crate::options::{WriteBinaryOptions, WriteTextOptions};

/// Render `module` as text. Applied names are printed; generated names
/// that were never applied are not.
pub(super) fn write_text(module: &ModuleAst, options: &WriteTextOptions) -> Result<String> {
    let binary = write_binary(
        module,
        &WriteBinaryOptions {
            write_debug_names: true,
            ..WriteBinaryOptions::default()
        },
    )
    .map_err(|err| anyhow::anyhow!("@0x{:x}: {}", err.offset, err.message))?;

    let mut config = wasmprinter::Config::new();
    config.fold_instructions(options.fold_exprs);
    let mut out = PrintFmtWrite(String::new());
    config.print(&binary.bytes, &mut out)?;

    let mut text = out.0;
    if options.inline_export {
        text = inline_exports(&text);
    }
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

/// An `(export "name" (kind target))` field.
struct ExportLine<'a> {
    name: &'a str,
    kind: &'a str,
    target: &'a str,
}

fn parse_export(line: &str) -> Option<ExportLine<'_>> {
    let rest = line.trim_start().strip_prefix("(export \"")?;
    let (name, item) = rest.rsplit_once("\" (")?;
    let item = item.strip_suffix("))")?;
    let (kind, target) = item.split_once(' ')?;
    Some(ExportLine { name, kind, target })
}

/// Whether `line` defines entity `target` of `kind`. `target` is either a
/// `$name` or a bare index, matched against the `(;N;)` index comment.
fn defines(line: &str, kind: &str, target: &str) -> bool {
    let Some(rest) = line
        .trim_start()
        .strip_prefix('(')
        .and_then(|r| r.strip_prefix(kind))
        .and_then(|r| r.strip_prefix(' '))
    else {
        return false;
    };
    if target.starts_with('$') {
        rest.split_whitespace().next() == Some(target)
    } else {
        rest.contains(&format!("(;{target};)"))
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Move top-level export fields into the definitions they export, e.g.
/// `(func $f (;0;) (export "f") (type 0)`. Exports of imports stay where
/// they are.
fn inline_exports(text: &str) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let mut removed = vec![false; lines.len()];

    for i in 0..lines.len() {
        let Some(export) = parse_export(&lines[i]) else {
            continue;
        };
        let indent = indent_of(&lines[i]);
        let inline = format!(" (export \"{}\")", export.name);
        let (kind, target) = (export.kind.to_string(), export.target.to_string());

        let Some(def) = (0..lines.len()).find(|&j| {
            !removed[j] && indent_of(&lines[j]) == indent && defines(&lines[j], &kind, &target)
        }) else {
            continue;
        };

        let line = &mut lines[def];
        let Some(insert_at) = line.find(";)").map(|pos| pos + 2) else {
            continue;
        };
        // Keep every inline export in source order after earlier ones.
        let insert_at = insert_at + inlined_len(&line[insert_at..]);
        line.insert_str(insert_at, &inline);
        removed[i] = true;
    }

    lines
        .into_iter()
        .zip(removed)
        .filter(|(_, removed)| !removed)
        .map(|(line, _)| line + "\n")
        .collect()
}

/// Length of the ` (export "..")` fields already inlined at the start of
/// `rest`.
fn inlined_len(rest: &str) -> usize {
    let mut len = 0;
    while let Some(after) = rest[len..].strip_prefix(" (export \"") {
        match after.find("\")") {
            Some(end) => len += " (export \"".len() + end + 2,
            None => break,
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(wat: &str) -> ModuleAst {
        ModuleAst::read(&wat::parse_str(wat).unwrap(), true).unwrap()
    }

    #[test]
    fn prints_named_functions() {
        let text = write_text(
            &module("(module (func $answer (result i32) i32.const 42))"),
            &WriteTextOptions::default(),
        )
        .unwrap();
        assert!(text.starts_with("(module"));
        assert!(text.contains("(func $answer"));
        assert!(text.contains("i32.const 42"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn folds_expressions_on_request() {
        let source = "(module (func (result i32) i32.const 1 i32.const 2 i32.add))";
        let flat = write_text(&module(source), &WriteTextOptions::default()).unwrap();
        assert!(!flat.contains("(i32.add"));

        let options = WriteTextOptions {
            fold_exprs: true,
            ..WriteTextOptions::default()
        };
        let folded = write_text(&module(source), &options).unwrap();
        assert!(folded.contains("(i32.add"));
    }

    #[test]
    fn inlines_exports_into_definitions() {
        let source = r#"(module
            (import "env" "f" (func $imported))
            (func $run (export "run") (export "main"))
            (memory (export "mem") 1)
            (export "imported" (func $imported)))"#;
        let options = WriteTextOptions {
            inline_export: true,
            ..WriteTextOptions::default()
        };
        let text = write_text(&module(source), &options).unwrap();

        let run = text.lines().find(|l| l.contains("(func $run")).unwrap();
        assert!(run.contains("(export \"run\") (export \"main\")"));
        let memory = text.lines().find(|l| l.trim_start().starts_with("(memory")).unwrap();
        assert!(memory.contains("(export \"mem\")"));
        assert!(text.contains("(export \"imported\" (func $imported))"));
        assert!(!text.contains("(export \"run\" (func"));

        wat::parse_str(&text).unwrap();
    }

    #[test]
    fn parses_export_fields() {
        let export = parse_export("  (export \"a b\" (func 3))").unwrap();
        assert_eq!(export.name, "a b");
        assert_eq!(export.kind, "func");
        assert_eq!(export.target, "3");
        assert!(parse_export("  (func $f (;0;) (type 0))").is_none());
    }

    #[test]
    fn matches_definitions_by_name_or_index() {
        let line = "  (func $f (;2;) (type 0)";
        assert!(defines(line, "func", "$f"));
        assert!(defines(line, "func", "2"));
        assert!(!defines(line, "func", "1"));
        assert!(!defines(line, "memory", "2"));
    }
}
