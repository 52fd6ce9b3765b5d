//! Module handles.

use std::fmt;

use log::debug;

use crate::error::{BridgeError, Result};
use crate::handle::WriteResult;
use crate::native::ModuleId;
use crate::options::{BinaryOutput, WriteBinaryOptions, WriteTextOptions};
use crate::runtime::NativeRuntime;

/// A decoded WebAssembly module, owned by the native library.
///
/// Produced by [`NativeRuntime::read_binary`] or
/// [`Script::first_module`](crate::Script::first_module). The native module
/// is destroyed when the handle is dropped or [`destroyed`](Module::destroy).
pub struct Module {
    runtime: NativeRuntime,
    id: ModuleId,
}

impl Module {
    pub(crate) fn new(runtime: NativeRuntime, id: ModuleId) -> Self {
        Self { runtime, id }
    }

    /// Generate a name for every unnamed function, type, table, memory,
    /// global, parameter and local. The names take effect once
    /// [`apply_names`](Module::apply_names) runs.
    pub fn generate_names(&mut self) -> Result<()> {
        let id = self.id;
        let status = self
            .runtime
            .with(|_, library| library.generate_names_module(id));
        if status.is_error() {
            return Err(BridgeError::GenerateNames);
        }
        Ok(())
    }

    /// Bind generated names into the module so emitters use them.
    pub fn apply_names(&mut self) -> Result<()> {
        let id = self.id;
        let status = self.runtime.with(|_, library| library.apply_names_module(id));
        if status.is_error() {
            return Err(BridgeError::ApplyNames);
        }
        Ok(())
    }

    /// Render the module in the text format.
    pub fn to_text(&self, options: WriteTextOptions) -> Result<String> {
        let id = self.id;
        let result = WriteResult::new(
            &self.runtime,
            self.runtime
                .with(|memory, library| library.write_text_module(memory, id, options))?,
        );
        debug!("to_text: {:?}", result.status());
        if result.status().is_error() {
            return Err(BridgeError::ToText);
        }

        let output = result.release_output().ok_or(BridgeError::ToText)?;
        output.to_text()
    }

    /// Encode the module in the binary format.
    pub fn to_binary(&self, options: WriteBinaryOptions) -> Result<BinaryOutput> {
        let id = self.id;
        let result = WriteResult::new(
            &self.runtime,
            self.runtime
                .with(|memory, library| library.write_binary_module(memory, id, options))?,
        );
        debug!("to_binary: {:?}", result.status());
        if result.status().is_error() {
            return Err(BridgeError::ToBinary);
        }

        let output = result.release_output();
        let log = result.release_log();
        let buffer = match &output {
            Some(output) => output.to_bytes()?,
            None => return Err(BridgeError::ToBinary),
        };
        let log = match &log {
            Some(log) => log.to_text()?,
            None => String::new(),
        };
        Ok(BinaryOutput { buffer, log })
    }

    /// Destroy the native module now instead of at the end of scope.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime.with(|_, library| library.destroy_module(id));
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("id", &self.id.raw()).finish()
    }
}
