//! wabt-bridge: host-side orchestration for WebAssembly text/binary
//! conversion
//!
//! The bridge moves buffers into a managed arena, drives a native format
//! library through opaque ids, and turns its status codes and accumulated
//! diagnostics into Rust results. Every buffer and native object it acquires
//! is released exactly once, on success and failure alike.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              NativeRuntime              │
//! │                                         │
//! │  parse_text  -> Script                  │
//! │  read_binary -> Module                  │
//! │  handle      - scoped release guards    │
//! │  memory      - managed arena            │
//! │                                         │
//! ├─────────────────────────────────────────┤
//! │    NativeLibrary (WasmTools: wast,      │
//! │    wasmparser, wasm-encoder, wasmprinter)│
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use wabt_bridge::{NativeRuntime, WriteBinaryOptions, WriteTextOptions};
//!
//! let runtime = NativeRuntime::default();
//! let mut script = runtime.parse_text("add.wat", r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             local.get 0
//!             local.get 1
//!             i32.add))
//! "#)?;
//! script.resolve_names()?;
//! script.validate()?;
//! let binary = script.to_binary(WriteBinaryOptions::default())?;
//!
//! let module = runtime.read_binary(&binary.buffer, Default::default())?;
//! let text = module.to_text(WriteTextOptions::default())?;
//! assert!(text.contains("i32.add"));
//! # Ok::<(), wabt_bridge::BridgeError>(())
//! ```

pub mod config;
pub mod error;
mod handle;
pub mod memory;
mod module;
pub mod native;
pub mod options;
mod runtime;
mod script;

pub use config::{BridgeConfig, MemoryConfig};
pub use error::{BridgeError, Result};
pub use memory::{
    AllocationStats, Allocator, BufferSource, LinearMemory, ManagedBuffer, Memory,
};
pub use module::Module;
pub use native::{NativeLibrary, Status, WasmTools};
pub use options::{BinaryOutput, ReadBinaryOptions, WriteBinaryOptions, WriteTextOptions};
pub use runtime::NativeRuntime;
pub use script::Script;
