//! Script AST.
//!
//! `wast` ASTs borrow their source text, so a script keeps only what
//! outlives a parse: where each module sits in the source and, once names
//! are resolved, each module's encoded binary. Later passes re-parse the
//! lexer's source.

use wast::lexer::{Lexer, TokenKind};
use wast::parser::{self, ParseBuffer};
use wast::{QuoteWat, Wast, WastDirective, Wat};

use super::diagnostics::SourceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ScriptModule {
    /// Byte offset of the module directive.
    pub offset: usize,
    /// Encoded module, present once names are resolved.
    pub binary: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct ScriptAst {
    pub modules: Vec<ScriptModule>,
}

fn module_of<'a, 'b>(directive: &'b mut WastDirective<'a>) -> Option<&'b mut QuoteWat<'a>> {
    match directive {
        WastDirective::Module(wat)
            if matches!(wat, QuoteWat::Wat(Wat::Module(_)) | QuoteWat::QuoteModule(..)) =>
        {
            Some(wat)
        }
        _ => None,
    }
}

/// Whether `source` holds anything besides whitespace and comments.
///
/// `wast` reads a blank source as a module with no fields and rejects it;
/// a blank script is valid and has no directives.
fn has_tokens(source: &str) -> Result<bool, SourceError> {
    for token in Lexer::new(source).iter(0) {
        match token?.kind {
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment => {}
            _ => return Ok(true),
        }
    }
    Ok(false)
}

/// Parse `source` and hand every module directive to `visit`, in order.
fn with_modules(
    source: &str,
    mut visit: impl FnMut(usize, &mut QuoteWat<'_>),
) -> Result<(), SourceError> {
    if !has_tokens(source)? {
        return Ok(());
    }
    let buf = ParseBuffer::new(source)?;
    let mut wast = parser::parse::<Wast>(&buf)?;
    for directive in wast.directives.iter_mut() {
        let offset = directive.span().offset();
        if let Some(wat) = module_of(directive) {
            visit(offset, wat);
        }
    }
    Ok(())
}

impl ScriptAst {
    /// Syntax-only parse. Identifiers are left unresolved.
    pub fn parse(source: &str) -> Result<Self, SourceError> {
        let mut modules = Vec::new();
        with_modules(source, |offset, _| {
            modules.push(ScriptModule {
                offset,
                binary: None,
            })
        })?;
        Ok(Self { modules })
    }

    pub fn is_resolved(&self) -> bool {
        self.modules.iter().all(|m| m.binary.is_some())
    }

    /// Resolve identifiers in every module, keeping each encoded result.
    /// Every module is attempted; all failures are returned.
    pub fn resolve_names(&mut self, source: &str) -> Result<(), Vec<SourceError>> {
        let mut errors = Vec::new();
        let mut binaries = Vec::new();
        with_modules(source, |_, wat| match wat.encode() {
            Ok(binary) => binaries.push(Some(binary)),
            Err(err) => {
                errors.push(SourceError::from(err));
                binaries.push(None);
            }
        })
        .map_err(|e| vec![e])?;

        if binaries.len() != self.modules.len() {
            return Err(vec![SourceError::new(0, "script source changed since parsing")]);
        }
        for (module, binary) in self.modules.iter_mut().zip(binaries) {
            module.binary = binary;
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate every module, resolving names first if needed.
    pub fn validate(&mut self, source: &str) -> Result<(), Vec<SourceError>> {
        if !self.is_resolved() {
            self.resolve_names(source)?;
        }

        let errors: Vec<SourceError> = self
            .modules
            .iter()
            .filter_map(|module| {
                let binary = module.binary.as_deref()?;
                let err = wasmparser::Validator::new().validate_all(binary).err()?;
                Some(SourceError::new(
                    module.offset,
                    format!("{} (at byte offset {:#x})", err.message(), err.offset()),
                ))
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Encoded copy of the first module.
    pub fn first_module(&self, source: &str) -> Result<Option<Vec<u8>>, SourceError> {
        let Some(first) = self.modules.first() else {
            return Ok(None);
        };
        if let Some(binary) = &first.binary {
            return Ok(Some(binary.clone()));
        }

        let mut encoded = None;
        with_modules(source, |_, wat| {
            if encoded.is_none() {
                encoded = Some(wat.encode().map_err(SourceError::from));
            }
        })?;
        encoded.transpose()
    }
}
