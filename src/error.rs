//! Shared error utilities used across the compilation pipeline.
//!
//! Diagnostics are kept lightweight on purpose – parse-stage errors point at
//! the offending byte with a caret under the source line, later stages carry
//! whatever context they have. Every error is fatal to the compilation.

use snafu::Snafu;

use crate::grammar::Rule;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  /// The grammar itself is defective; detected before any input is read.
  #[snafu(display("grammar error: {message}"))]
  Grammar { message: String },

  /// The input does not match the grammar.
  #[snafu(display(
    "parse error at line {line}, column {column}: {message}\n{source_line}\n{marker}"
  ))]
  Parse {
    line: usize,
    column: usize,
    message: String,
    source_line: String,
    marker: String,
  },

  /// A memory operand whose offset is not 8-byte aligned.
  #[snafu(display("line {line}, column {column}: memory offset {offset} is not a multiple of 8"))]
  Alignment {
    line: usize,
    column: usize,
    offset: i64,
  },

  /// A runtime call with an argument count the runtime does not provide.
  #[snafu(display("runtime call '{name}' does not accept {count} arguments"))]
  Arity { name: String, count: i64 },

  /// A parse-tree node kind that cannot occur in the position being lowered,
  /// or a register reaching an emission path it has no encoding for.
  #[snafu(display("internal error: {message}"))]
  Internal { message: String },

  /// The assembly file could not be written.
  #[snafu(display("cannot write '{path}': {source}"))]
  Output {
    path: String,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Construct a parse error anchored at a specific byte offset in the source.
  pub fn parse_at(source: &str, offset: usize, message: impl Into<String>) -> Self {
    let (line, column, source_line) = locate(source, offset);
    let marker = format!("{}^", " ".repeat(column.saturating_sub(1)));
    Self::Parse {
      line,
      column,
      message: message.into(),
      source_line,
      marker,
    }
  }

  /// Construct an alignment error anchored at a specific byte offset.
  pub fn alignment_at(source: &str, offset: usize, value: i64) -> Self {
    let (line, column, _) = locate(source, offset);
    Self::Alignment {
      line,
      column,
      offset: value,
    }
  }

  pub fn internal_node(rule: Rule, context: &str) -> Self {
    Self::Internal {
      message: format!("unexpected {rule:?} node while lowering {context}"),
    }
  }
}

/// Resolve a byte offset into a 1-based line/column pair plus the line text.
fn locate(source: &str, offset: usize) -> (usize, usize, String) {
  let offset = offset.min(source.len());
  let before = &source[..offset];
  let line = before.bytes().filter(|b| *b == b'\n').count() + 1;
  let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
  let column = source[line_start..offset].chars().count() + 1;
  let line_end = source[line_start..]
    .find('\n')
    .map(|i| line_start + i)
    .unwrap_or(source.len());
  (line, column, source[line_start..line_end].to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_error_points_at_offending_column() {
    let source = "(@main\n(@main 0 0\nreturn x))";
    let offset = source.find('x').unwrap();
    let err = CompileError::parse_at(source, offset, "unexpected input");
    let rendered = err.to_string();
    assert!(rendered.contains("line 3, column 8"));
    assert!(rendered.contains("return x))"));
    assert!(rendered.contains("       ^"));
  }

  #[test]
  fn locate_clamps_past_the_end() {
    let (line, column, text) = locate("ab", 99);
    assert_eq!((line, column), (1, 3));
    assert_eq!(text, "ab");
  }

  #[test]
  fn alignment_error_reports_offset_value() {
    let err = CompileError::alignment_at("mem rsp 12", 8, 12);
    assert!(err.to_string().contains("12 is not a multiple of 8"));
  }
}
