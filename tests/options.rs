//! Emitter and reader options, as passed in by callers.

mod common;

use common::{call_i32_i32, runtime, ADD_WAT, KITCHEN_SINK_WAT};
use wabt_bridge::{Module, NativeRuntime, ReadBinaryOptions, WriteBinaryOptions, WriteTextOptions};

fn custom_sections(wasm: &[u8]) -> Vec<String> {
    wasmparser::Parser::new(0)
        .parse_all(wasm)
        .filter_map(|payload| match payload {
            Ok(wasmparser::Payload::CustomSection(reader)) => Some(reader.name().to_string()),
            _ => None,
        })
        .collect()
}

fn exports(wasm: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    for payload in wasmparser::Parser::new(0).parse_all(wasm) {
        if let Ok(wasmparser::Payload::ExportSection(reader)) = payload {
            for export in reader {
                names.push(export.unwrap().name.to_string());
            }
        }
    }
    names
}

fn kitchen_sink(runtime: &NativeRuntime) -> Module {
    let wasm = wat::parse_str(KITCHEN_SINK_WAT).unwrap();
    runtime.read_binary(&wasm, ReadBinaryOptions::default()).unwrap()
}

#[test]
fn options_from_json() {
    let runtime = runtime();
    let module = kitchen_sink(&runtime);

    let options: WriteTextOptions =
        serde_json::from_str(r#"{"foldExprs": true, "inlineExport": true}"#).unwrap();
    let text = module.to_text(options).unwrap();
    assert!(text.contains("(i32.mul"));

    let options: WriteBinaryOptions = serde_json::from_str(r#"{"log": true}"#).unwrap();
    assert!(options.canonicalize_lebs);
    let output = module.to_binary(options).unwrap();
    assert!(!output.log.is_empty());
}

#[test]
fn inline_exports_move_onto_definitions() {
    let runtime = runtime();
    let module = kitchen_sink(&runtime);
    let text = module
        .to_text(WriteTextOptions {
            inline_export: true,
            ..Default::default()
        })
        .unwrap();

    assert!(
        !text.lines().any(|line| line.trim_start().starts_with("(export \"mul\"")),
        "standalone export left in\n{text}"
    );
    assert!(text.contains("(export \"mul\")"));
    assert!(text.contains("(export \"memory\")"));

    let rebuilt = wat::parse_str(&text).unwrap();
    let mut names = exports(&rebuilt);
    names.sort();
    assert_eq!(names, ["bump", "memory", "mul"]);
}

#[test]
fn standalone_exports_by_default() {
    let runtime = runtime();
    let module = kitchen_sink(&runtime);
    let text = module.to_text(WriteTextOptions::default()).unwrap();
    assert!(text
        .lines()
        .any(|line| line.trim_start().starts_with("(export \"mul\"")));
}

#[test]
fn folded_and_flat_text_build_the_same_module() {
    let runtime = runtime();
    let wasm = wat::parse_str(ADD_WAT).unwrap();
    let module = runtime.read_binary(&wasm, ReadBinaryOptions::default()).unwrap();

    let flat = module.to_text(WriteTextOptions::default()).unwrap();
    let folded = module
        .to_text(WriteTextOptions {
            fold_exprs: true,
            ..Default::default()
        })
        .unwrap();
    assert_ne!(flat, folded);
    assert_eq!(wat::parse_str(&flat).unwrap(), wat::parse_str(&folded).unwrap());
}

#[test]
fn log_is_empty_unless_requested() {
    let runtime = runtime();
    let module = kitchen_sink(&runtime);

    let quiet = module.to_binary(WriteBinaryOptions::default()).unwrap();
    assert_eq!(quiet.log, "");

    let logged = module
        .to_binary(WriteBinaryOptions {
            log: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(logged.buffer, quiet.buffer);
    assert!(logged.log.starts_with("0000000: "));
    assert!(logged.log.contains("; section \"Code\" (10)"));
}

#[test]
fn relocatable_output_carries_linking_metadata() {
    let runtime = runtime();
    let module = kitchen_sink(&runtime);

    let plain = module.to_binary(WriteBinaryOptions::default()).unwrap();
    assert!(!custom_sections(&plain.buffer).contains(&"linking".to_string()));

    let relocatable = module
        .to_binary(WriteBinaryOptions {
            relocatable: true,
            ..Default::default()
        })
        .unwrap();
    assert!(custom_sections(&relocatable.buffer).contains(&"linking".to_string()));
}

#[test]
fn padded_lebs_are_longer_but_equivalent() {
    let runtime = runtime();
    let wasm = wat::parse_str(ADD_WAT).unwrap();
    let module = runtime.read_binary(&wasm, ReadBinaryOptions::default()).unwrap();

    let canonical = module.to_binary(WriteBinaryOptions::default()).unwrap();
    let padded = module
        .to_binary(WriteBinaryOptions {
            canonicalize_lebs: false,
            ..Default::default()
        })
        .unwrap();
    assert!(padded.buffer.len() > canonical.buffer.len());
    assert_eq!(call_i32_i32(&padded.buffer, "add", 7, 8), 15);
}
