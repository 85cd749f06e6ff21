//! The PEG matcher and parse-tree builder.
//!
//! This stage owns no syntactic knowledge of its own: it drives the grammar
//! of [`crate::grammar`] over the raw input and records a node for every
//! kept production it accepts. Suppressed productions still participate in
//! matching but their kept descendants bubble up to the nearest kept
//! ancestor, and lookahead sub-matches never contribute nodes at all.
//!
//! On failure the matcher reports the furthest byte it managed to reach,
//! which in practice points at the first token the grammar could not make
//! sense of. There is no recovery; one error ends the parse.

use log::debug;

use crate::error::{CompileError, CompileResult};
use crate::grammar::{Expr, Grammar, Rule};

/// A parse-tree node: which production matched, the span it covered, and the
/// kept nodes produced inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
  pub rule: Rule,
  pub start: usize,
  pub end: usize,
  pub children: Vec<Node>,
}

impl Node {
  /// The slice of the source this node matched.
  pub fn text<'a>(&self, source: &'a str) -> &'a str {
    &source[self.start..self.end]
  }
}

/// Parse an L1 source file into its parse tree.
pub fn parse(source: &str) -> CompileResult<Node> {
  let grammar = Grammar::l1();
  grammar.analyze()?;

  let mut matcher = Matcher {
    grammar: &grammar,
    input: source,
    furthest: 0,
  };
  let mut nodes = Vec::new();
  match matcher.match_expr(&Expr::Ref(Rule::Program), 0, &mut nodes) {
    Some(_) => {
      let root = nodes.pop().ok_or_else(|| CompileError::Internal {
        message: "the program rule matched but produced no node".to_string(),
      })?;
      debug!(
        "parse tree built: {} function(s)",
        root.children.len().saturating_sub(1)
      );
      Ok(root)
    }
    None => Err(CompileError::parse_at(
      source,
      matcher.furthest,
      "unexpected input",
    )),
  }
}

/// Render a parse tree as an indented listing, one node per line. Leaf nodes
/// show their matched text.
pub fn dump(node: &Node, source: &str) -> String {
  let mut out = String::new();
  dump_into(node, source, 0, &mut out);
  out
}

fn dump_into(node: &Node, source: &str, depth: usize, out: &mut String) {
  out.push_str(&"  ".repeat(depth));
  if node.children.is_empty() {
    out.push_str(&format!("{:?} |{}|\n", node.rule, node.text(source)));
  } else {
    out.push_str(&format!("{:?}\n", node.rule));
    for child in &node.children {
      dump_into(child, source, depth + 1, out);
    }
  }
}

struct Matcher<'a> {
  grammar: &'a Grammar,
  input: &'a str,
  furthest: usize,
}

impl<'a> Matcher<'a> {
  /// Try to match `expr` at byte `pos`, appending kept nodes to `nodes`.
  /// Returns the end position on success. On failure `nodes` is left exactly
  /// as it was.
  fn match_expr(&mut self, expr: &Expr, pos: usize, nodes: &mut Vec<Node>) -> Option<usize> {
    match expr {
      Expr::Literal(text) => {
        if self.input[pos..].starts_with(text) {
          Some(pos + text.len())
        } else {
          self.fail(pos)
        }
      }
      Expr::Range(low, high) => match self.input[pos..].chars().next() {
        Some(c) if c >= *low && c <= *high => Some(pos + c.len_utf8()),
        _ => self.fail(pos),
      },
      Expr::AnyChar => match self.input[pos..].chars().next() {
        Some(c) => Some(pos + c.len_utf8()),
        None => self.fail(pos),
      },
      Expr::Seq(items) => {
        let saved = nodes.len();
        let mut cursor = pos;
        for item in items {
          match self.match_expr(item, cursor, nodes) {
            Some(next) => cursor = next,
            None => {
              nodes.truncate(saved);
              return None;
            }
          }
        }
        Some(cursor)
      }
      Expr::Choice(alternatives) => {
        for alternative in alternatives {
          let saved = nodes.len();
          if let Some(end) = self.match_expr(alternative, pos, nodes) {
            return Some(end);
          }
          nodes.truncate(saved);
        }
        None
      }
      Expr::Star(body) => {
        let mut cursor = pos;
        loop {
          let saved = nodes.len();
          match self.match_expr(body, cursor, nodes) {
            // The analyzer rejects nullable repetition bodies, so a
            // zero-width iteration here means a grammar bug; stop anyway.
            Some(next) if next > cursor => cursor = next,
            Some(_) | None => {
              nodes.truncate(saved);
              return Some(cursor);
            }
          }
        }
      }
      Expr::Plus(body) => {
        let first = self.match_expr(body, pos, nodes)?;
        let mut cursor = first;
        loop {
          let saved = nodes.len();
          match self.match_expr(body, cursor, nodes) {
            Some(next) if next > cursor => cursor = next,
            Some(_) | None => {
              nodes.truncate(saved);
              return Some(cursor);
            }
          }
        }
      }
      Expr::Opt(body) => {
        let saved = nodes.len();
        match self.match_expr(body, pos, nodes) {
          Some(end) => Some(end),
          None => {
            nodes.truncate(saved);
            Some(pos)
          }
        }
      }
      Expr::Check(body) => {
        let mut scratch = Vec::new();
        match self.match_expr(body, pos, &mut scratch) {
          Some(_) => Some(pos),
          None => None,
        }
      }
      Expr::Reject(body) => {
        let mut scratch = Vec::new();
        match self.match_expr(body, pos, &mut scratch) {
          Some(_) => None,
          None => Some(pos),
        }
      }
      Expr::Ref(target) => {
        // analyze() verified every reference resolves before we got here.
        let body = self.grammar.body(*target)?;
        if target.kept() {
          let mut children = Vec::new();
          let end = self.match_expr(body, pos, &mut children)?;
          nodes.push(Node {
            rule: *target,
            start: pos,
            end,
            children,
          });
          Some(end)
        } else {
          let saved = nodes.len();
          match self.match_expr(body, pos, nodes) {
            Some(end) => Some(end),
            None => {
              nodes.truncate(saved);
              None
            }
          }
        }
      }
      Expr::EndOfInput => {
        if pos == self.input.len() {
          Some(pos)
        } else {
          self.fail(pos)
        }
      }
    }
  }

  fn fail(&mut self, pos: usize) -> Option<usize> {
    if pos > self.furthest {
      self.furthest = pos;
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rules_of(nodes: &[Node]) -> Vec<Rule> {
    nodes.iter().map(|n| n.rule).collect()
  }

  #[test]
  fn smallest_program_produces_the_expected_tree() {
    let source = "(@main (@main 0 0 return))";
    let tree = parse(source).expect("parse");
    assert_eq!(tree.rule, Rule::Program);
    assert_eq!(
      rules_of(&tree.children),
      vec![Rule::FunctionName, Rule::Function]
    );

    let function = &tree.children[1];
    assert_eq!(
      rules_of(&function.children),
      vec![Rule::FunctionName, Rule::Number, Rule::Number, Rule::Return]
    );
    assert_eq!(function.children[0].text(source), "@main");
  }

  #[test]
  fn function_count_matches_the_source() {
    let source = "(@main\n(@main 0 0 return)\n(@f 2 1 return)\n(@g 0 0 return))";
    let tree = parse(source).expect("parse");
    let functions = tree
      .children
      .iter()
      .filter(|n| n.rule == Rule::Function)
      .count();
    assert_eq!(functions, 3);
  }

  #[test]
  fn operand_class_wrappers_leave_plain_register_leaves() {
    let source = "(@main (@main 0 0 rdi <- rsp return))";
    let tree = parse(source).expect("parse");
    let assignment = &tree.children[1].children[3];
    assert_eq!(assignment.rule, Rule::Assignment);
    assert_eq!(
      rules_of(&assignment.children),
      vec![Rule::Register, Rule::Register]
    );
    assert_eq!(assignment.children[0].text(source), "rdi");
    assert_eq!(assignment.children[1].text(source), "rsp");
  }

  #[test]
  fn compare_assignment_wins_over_plain_assignment() {
    let source = "(@main (@main 0 0 rdi <- rax < 5 return))";
    let tree = parse(source).expect("parse");
    let instruction = &tree.children[1].children[3];
    assert_eq!(instruction.rule, Rule::CompareAssignment);
    assert_eq!(
      rules_of(&instruction.children),
      vec![
        Rule::Register,
        Rule::Register,
        Rule::ComparisonOperator,
        Rule::Number
      ]
    );
  }

  #[test]
  fn memory_forms_are_distinguished() {
    let source =
      "(@main (@main 0 0\nrdi <- mem rsp 8\nmem rsp 16 <- rax\nrdi += mem rsp 0\nmem rsp 0 -= 3\nreturn))";
    let tree = parse(source).expect("parse");
    let instructions = rules_of(&tree.children[1].children[3..]);
    assert_eq!(
      instructions,
      vec![
        Rule::MemoryRead,
        Rule::MemoryWrite,
        Rule::AddMemory,
        Rule::MemorySubtract,
        Rule::Return
      ]
    );
  }

  #[test]
  fn labels_parse_in_instruction_and_operand_position() {
    let source = "(@main (@main 0 0\n:loop\nrdi <- :loop\ngoto :loop\nreturn))";
    let tree = parse(source).expect("parse");
    let instructions = rules_of(&tree.children[1].children[3..]);
    assert_eq!(
      instructions,
      vec![Rule::Label, Rule::Assignment, Rule::Goto, Rule::Return]
    );
  }

  #[test]
  fn comments_and_blank_lines_are_separators() {
    let source =
      "// leading comment\n(@main // entry\n(@main 0 0\n\n// body\nreturn // done\n))";
    parse(source).expect("comments should be skipped");
  }

  #[test]
  fn shift_by_register_requires_rcx() {
    let good = "(@main (@main 0 0 rax <<= rcx return))";
    assert_eq!(
      parse(good).expect("parse").children[1].children[3].rule,
      Rule::ShiftByRegister
    );

    let bad = "(@main (@main 0 0 rax <<= rbx return))";
    parse(bad).expect_err("only rcx can be a shift count");
  }

  #[test]
  fn rsp_is_rejected_as_an_assignment_destination() {
    let source = "(@main (@main 0 0 rsp <- 4 return))";
    parse(source).expect_err("rsp is not writable");
  }

  #[test]
  fn parse_error_reports_the_failure_location() {
    let source = "(@main\n(@main 0 0\nbogus!\nreturn))";
    let err = parse(source).expect_err("must fail");
    let rendered = err.to_string();
    assert!(rendered.contains("line 3"), "got: {rendered}");
  }

  #[test]
  fn trailing_garbage_is_rejected() {
    let source = "(@main (@main 0 0 return)) trailing";
    parse(source).expect_err("input past the closing paren must fail");
  }

  #[test]
  fn dump_lists_leaf_text() {
    let source = "(@main (@main 0 0 return))";
    let tree = parse(source).expect("parse");
    let listing = dump(&tree, source);
    assert!(listing.contains("Program"));
    assert!(listing.contains("FunctionName |@main|"));
    assert!(listing.contains("Return |return|"));
  }
}
