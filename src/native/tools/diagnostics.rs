//! Diagnostic accumulation and formatting.

use crate::memory::Address;
use crate::native::ErrorHandlerKind;

/// A text-level error: a byte offset into the source plus a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SourceError {
    pub offset: usize,
    pub message: String,
}

impl SourceError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl From<wast::Error> for SourceError {
    fn from(err: wast::Error) -> Self {
        Self::new(err.span().offset(), err.message())
    }
}

/// A binary-level error: a byte offset into the module plus a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct BinaryError {
    pub offset: usize,
    pub message: String,
}

impl BinaryError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl From<wasmparser::BinaryReaderError> for BinaryError {
    fn from(err: wasmparser::BinaryReaderError) -> Self {
        Self::new(err.offset(), err.message())
    }
}

/// State behind an error-handler id.
#[derive(Debug)]
pub(super) struct ErrorHandlerState {
    pub kind: ErrorHandlerKind,
    pub text: String,
    /// Length-prefixed copy of `text` handed out to the host, if any.
    pub buffer: Option<Address>,
}

impl ErrorHandlerState {
    pub fn new(kind: ErrorHandlerKind) -> Self {
        Self {
            kind,
            text: String::new(),
            buffer: None,
        }
    }

    pub fn on_source_error(
        &mut self,
        filename: &str,
        source: &str,
        error: &SourceError,
        source_line_max_length: usize,
    ) {
        let text = match self.kind {
            ErrorHandlerKind::Source => {
                format_source_error(filename, source, error, source_line_max_length)
            }
            // A binary handler reports positions as raw offsets.
            ErrorHandlerKind::Binary => {
                format_binary_error(&BinaryError::new(error.offset, error.message.as_str()))
            }
        };
        self.text.push_str(&text);
    }

    pub fn on_binary_error(&mut self, error: &BinaryError) {
        self.text.push_str(&format_binary_error(error));
    }
}

/// 1-based line and column of a byte offset.
pub(super) fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
    (line, offset - line_start + 1)
}

/// Formats one text diagnostic:
///
/// ```text
/// file.wast:1:9
/// unexpected token
/// (module (fnc))
///         ^
/// ```
pub(super) fn format_source_error(
    filename: &str,
    source: &str,
    error: &SourceError,
    source_line_max_length: usize,
) -> String {
    let (line, first_column) = line_col(source, error.offset);
    let mut out = format!("{filename}:{line}:{first_column}\n{}\n", error.message);

    let line_text = source
        .lines()
        .nth(line - 1)
        .unwrap_or("")
        .trim_end_matches('\r');
    let (clipped, column_offset) = clip_line(line_text, first_column, source_line_max_length);
    if !clipped.is_empty() {
        let spaces = (first_column - 1).saturating_sub(column_offset);
        out.push_str(clipped);
        out.push('\n');
        out.push_str(&" ".repeat(spaces));
        out.push('^');
        out.push('\n');
    }
    out
}

/// Clip `line` to at most `max` bytes, keeping `column` (1-based) in view.
/// Returns the clipped text and the byte offset it starts at.
fn clip_line(line: &str, column: usize, max: usize) -> (&str, usize) {
    if line.len() <= max {
        return (line, 0);
    }
    let center = column.saturating_sub(1);
    let mut start = center.saturating_sub(max / 2).min(line.len() - max);
    while !line.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + max).min(line.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    (&line[start..end], start)
}

pub(super) fn format_binary_error(error: &BinaryError) -> String {
    format!("@0x{:x}: {}\n", error.offset, error.message)
}
