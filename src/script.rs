//! Script handles.

use std::fmt;

use crate::error::{BridgeError, Result};
use crate::handle::{ErrorHandler, Lexer};
use crate::module::Module;
use crate::native::{ErrorHandlerKind, ScriptId};
use crate::options::{BinaryOutput, WriteBinaryOptions};
use crate::runtime::NativeRuntime;

/// A parsed text script: one or more modules plus any other commands.
///
/// The script owns the lexer it was parsed with, since later passes report
/// diagnostics against that source. Dropping or
/// [`destroying`](Script::destroy) the script destroys the native script
/// first, then the lexer.
pub struct Script {
    runtime: NativeRuntime,
    id: ScriptId,
    lexer: Lexer,
}

impl Script {
    pub(crate) fn new(runtime: NativeRuntime, id: ScriptId, lexer: Lexer) -> Self {
        Self { runtime, id, lexer }
    }

    /// Resolve symbolic identifiers in every module.
    pub fn resolve_names(&mut self) -> Result<()> {
        let errors = ErrorHandler::new(&self.runtime, ErrorHandlerKind::Source);
        let (id, lexer, handler) = (self.id, self.lexer.id(), errors.id());
        let status = self.runtime.with(|memory, library| {
            library.resolve_names_script(memory, lexer, id, handler)
        });
        if status.is_error() {
            return Err(BridgeError::ResolveNames(errors.message()?));
        }
        Ok(())
    }

    /// Validate every module. Names are resolved first if
    /// [`resolve_names`](Script::resolve_names) has not run.
    pub fn validate(&mut self) -> Result<()> {
        let errors = ErrorHandler::new(&self.runtime, ErrorHandlerKind::Source);
        let (id, lexer, handler) = (self.id, self.lexer.id(), errors.id());
        let status = self
            .runtime
            .with(|memory, library| library.validate_script(memory, lexer, id, handler));
        if status.is_error() {
            return Err(BridgeError::Validate(errors.message()?));
        }
        Ok(())
    }

    /// Number of module commands in the script.
    pub fn module_count(&self) -> usize {
        let id = self.id;
        self.runtime.with(|_, library| library.script_module_count(id))
    }

    /// An independently owned copy of the first module.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NoModule`] when the script has no module;
    /// [`BridgeError::ToBinary`] when the module cannot be encoded.
    pub fn first_module(&self) -> Result<Module> {
        if self.module_count() == 0 {
            return Err(BridgeError::NoModule);
        }
        let (id, lexer) = (self.id, self.lexer.id());
        let module = self
            .runtime
            .with(|memory, library| library.get_first_module(memory, lexer, id))
            .ok_or(BridgeError::ToBinary)?;
        Ok(Module::new(self.runtime.clone(), module))
    }

    /// Encode the script's first module.
    pub fn to_binary(&self, options: WriteBinaryOptions) -> Result<BinaryOutput> {
        let module = self.first_module()?;
        module.to_binary(options)
    }

    /// Destroy the script and its lexer now instead of at the end of scope.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for Script {
    fn drop(&mut self) {
        let id = self.id;
        self.runtime.with(|_, library| library.destroy_script(id));
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("id", &self.id.raw())
            .field("lexer", &self.lexer.id().raw())
            .finish()
    }
}
