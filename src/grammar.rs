//! The L1 grammar, expressed as data.
//!
//! Each production is named by a [`Rule`] tag and bound to a parsing
//! expression. The parser drives these expressions generically; rules marked
//! as kept contribute nodes to the parse tree, everything else (separators,
//! keywords, operand-class wrappers) is matched silently. Register subsets
//! follow the lookahead-then-general shape: the restricted alternatives are
//! checked without consuming, then the general rule consumes, so the tree
//! only ever carries plain `Register` and `Number` leaves.
//!
//! `Grammar::analyze` runs before any input is parsed and rejects grammars
//! that could loop forever (repetition over a possibly-empty expression,
//! left recursion through nullable prefixes).

use std::collections::{HashMap, HashSet};

use crate::error::{CompileError, CompileResult};

/// Identity of every production in the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
  Whitespace,
  Comment,
  Name,
  Number,
  Register,
  ShiftRegister,
  ArgumentRegister,
  WritableRegister,
  AnyRegister,
  TensorErrorArity,
  LeaScale,
  Label,
  FunctionName,
  ArithmeticOperator,
  ShiftOperator,
  ComparisonOperator,
  ArithmeticValue,
  SourceValue,
  CallDest,
  Return,
  CompareAssignment,
  Assignment,
  MemoryRead,
  MemoryWrite,
  Arithmetic,
  ShiftByRegister,
  ShiftByImmediate,
  MemoryAdd,
  AddMemory,
  MemorySubtract,
  SubtractMemory,
  CompareJump,
  Goto,
  CallPrint,
  CallInput,
  CallAllocate,
  CallTupleError,
  CallTensorError,
  Call,
  Increment,
  Decrement,
  Leaq,
  Instruction,
  Function,
  Program,
}

impl Rule {
  /// Whether a successful match of this rule produces a parse-tree node.
  pub(crate) fn kept(self) -> bool {
    matches!(
      self,
      Rule::Number
        | Rule::Register
        | Rule::Label
        | Rule::FunctionName
        | Rule::ArithmeticOperator
        | Rule::ShiftOperator
        | Rule::ComparisonOperator
        | Rule::Return
        | Rule::CompareAssignment
        | Rule::Assignment
        | Rule::MemoryRead
        | Rule::MemoryWrite
        | Rule::Arithmetic
        | Rule::ShiftByRegister
        | Rule::ShiftByImmediate
        | Rule::MemoryAdd
        | Rule::AddMemory
        | Rule::MemorySubtract
        | Rule::SubtractMemory
        | Rule::CompareJump
        | Rule::Goto
        | Rule::CallPrint
        | Rule::CallInput
        | Rule::CallAllocate
        | Rule::CallTupleError
        | Rule::CallTensorError
        | Rule::Call
        | Rule::Increment
        | Rule::Decrement
        | Rule::Leaq
        | Rule::Function
        | Rule::Program
    )
  }
}

/// A parsing expression. Ordered choice and the lookaheads give the grammar
/// its PEG semantics; everything backtracks within the enclosing choice.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
  Literal(&'static str),
  Range(char, char),
  AnyChar,
  Seq(Vec<Expr>),
  Choice(Vec<Expr>),
  Star(Box<Expr>),
  Plus(Box<Expr>),
  Opt(Box<Expr>),
  /// Positive lookahead: succeeds without consuming.
  Check(Box<Expr>),
  /// Negative lookahead: succeeds without consuming iff the body fails.
  Reject(Box<Expr>),
  Ref(Rule),
  EndOfInput,
}

fn lit(text: &'static str) -> Expr {
  Expr::Literal(text)
}

fn seq(items: Vec<Expr>) -> Expr {
  Expr::Seq(items)
}

fn choice(items: Vec<Expr>) -> Expr {
  Expr::Choice(items)
}

fn star(body: Expr) -> Expr {
  Expr::Star(Box::new(body))
}

fn plus(body: Expr) -> Expr {
  Expr::Plus(Box::new(body))
}

fn opt(body: Expr) -> Expr {
  Expr::Opt(Box::new(body))
}

fn check(body: Expr) -> Expr {
  Expr::Check(Box::new(body))
}

fn reject(body: Expr) -> Expr {
  Expr::Reject(Box::new(body))
}

fn rule(target: Rule) -> Expr {
  Expr::Ref(target)
}

/// Restricted-subset helper: verify the specific alternatives with a
/// lookahead, then consume through the general rule so the parse tree only
/// records the general node.
fn upcast(specific: Expr, general: Rule) -> Expr {
  seq(vec![check(specific), rule(general)])
}

fn ws() -> Expr {
  rule(Rule::Whitespace)
}

pub struct Grammar {
  rules: HashMap<Rule, Expr>,
}

impl Grammar {
  /// Build the L1 grammar.
  pub fn l1() -> Self {
    let mut rules = HashMap::new();
    let mut def = |tag: Rule, body: Expr| {
      rules.insert(tag, body);
    };

    // Separators: spaces, tabs, newlines and //-comments are interchangeable.
    def(
      Rule::Whitespace,
      star(choice(vec![
        lit(" "),
        lit("\t"),
        lit("\r"),
        lit("\n"),
        rule(Rule::Comment),
      ])),
    );
    def(
      Rule::Comment,
      seq(vec![
        lit("//"),
        star(seq(vec![reject(lit("\n")), Expr::AnyChar])),
      ]),
    );

    // Lexical leaves.
    def(
      Rule::Name,
      seq(vec![
        choice(vec![Expr::Range('A', 'Z'), Expr::Range('a', 'z'), lit("_")]),
        star(choice(vec![
          Expr::Range('A', 'Z'),
          Expr::Range('a', 'z'),
          Expr::Range('0', '9'),
          lit("_"),
        ])),
      ]),
    );
    def(
      Rule::Number,
      choice(vec![
        seq(vec![
          opt(choice(vec![lit("-"), lit("+")])),
          Expr::Range('1', '9'),
          star(Expr::Range('0', '9')),
        ]),
        lit("0"),
      ]),
    );
    def(Rule::Label, seq(vec![lit(":"), rule(Rule::Name)]));
    def(Rule::FunctionName, seq(vec![lit("@"), rule(Rule::Name)]));

    // Registers and their syntactic subsets.
    def(
      Rule::Register,
      choice(vec![
        lit("rax"),
        lit("rbx"),
        lit("rcx"),
        lit("rdx"),
        lit("rdi"),
        lit("rsi"),
        lit("r8"),
        lit("r9"),
        lit("r10"),
        lit("r11"),
        lit("r12"),
        lit("r13"),
        lit("r14"),
        lit("r15"),
        lit("rbp"),
        lit("rsp"),
      ]),
    );
    def(Rule::ShiftRegister, upcast(lit("rcx"), Rule::Register));
    def(
      Rule::ArgumentRegister,
      upcast(
        choice(vec![
          lit("rdi"),
          lit("rsi"),
          lit("rdx"),
          rule(Rule::ShiftRegister),
          lit("r8"),
          lit("r9"),
        ]),
        Rule::Register,
      ),
    );
    def(
      Rule::WritableRegister,
      upcast(
        choice(vec![
          rule(Rule::ArgumentRegister),
          lit("rax"),
          lit("rbx"),
          lit("rbp"),
          lit("r10"),
          lit("r11"),
          lit("r12"),
          lit("r13"),
          lit("r14"),
          lit("r15"),
        ]),
        Rule::Register,
      ),
    );
    def(
      Rule::AnyRegister,
      upcast(
        choice(vec![rule(Rule::WritableRegister), lit("rsp")]),
        Rule::Register,
      ),
    );

    // Value classes.
    def(
      Rule::ArithmeticValue,
      choice(vec![rule(Rule::AnyRegister), rule(Rule::Number)]),
    );
    def(
      Rule::SourceValue,
      choice(vec![
        rule(Rule::ArithmeticValue),
        rule(Rule::Label),
        rule(Rule::FunctionName),
      ]),
    );
    def(
      Rule::CallDest,
      choice(vec![rule(Rule::WritableRegister), rule(Rule::FunctionName)]),
    );

    // Restricted literals that still parse as full numbers; only the first
    // digit is pinned, the lowering validates the rest.
    def(
      Rule::TensorErrorArity,
      seq(vec![
        check(choice(vec![lit("1"), lit("3"), lit("4")])),
        rule(Rule::Number),
      ]),
    );
    def(
      Rule::LeaScale,
      seq(vec![
        check(choice(vec![lit("1"), lit("2"), lit("4"), lit("8")])),
        rule(Rule::Number),
      ]),
    );

    // Operators. Longer spellings come before their single-char prefixes.
    def(
      Rule::ArithmeticOperator,
      choice(vec![lit("+="), lit("-="), lit("*="), lit("&=")]),
    );
    def(Rule::ShiftOperator, choice(vec![lit("<<="), lit(">>=")]));
    def(
      Rule::ComparisonOperator,
      choice(vec![lit("<="), lit("<"), lit("=")]),
    );

    // Instructions.
    def(Rule::Return, lit("return"));
    def(
      Rule::CompareAssignment,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        lit("<-"),
        ws(),
        rule(Rule::ArithmeticValue),
        ws(),
        rule(Rule::ComparisonOperator),
        ws(),
        rule(Rule::ArithmeticValue),
      ]),
    );
    def(
      Rule::Assignment,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        lit("<-"),
        ws(),
        rule(Rule::SourceValue),
      ]),
    );
    def(
      Rule::MemoryRead,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        lit("<-"),
        ws(),
        lit("mem"),
        ws(),
        rule(Rule::AnyRegister),
        ws(),
        rule(Rule::Number),
      ]),
    );
    def(
      Rule::MemoryWrite,
      seq(vec![
        lit("mem"),
        ws(),
        rule(Rule::AnyRegister),
        ws(),
        rule(Rule::Number),
        ws(),
        lit("<-"),
        ws(),
        rule(Rule::WritableRegister),
      ]),
    );
    def(
      Rule::Arithmetic,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        rule(Rule::ArithmeticOperator),
        ws(),
        rule(Rule::ArithmeticValue),
      ]),
    );
    def(
      Rule::ShiftByRegister,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        rule(Rule::ShiftOperator),
        ws(),
        rule(Rule::ShiftRegister),
      ]),
    );
    def(
      Rule::ShiftByImmediate,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        rule(Rule::ShiftOperator),
        ws(),
        rule(Rule::Number),
      ]),
    );
    def(
      Rule::MemoryAdd,
      seq(vec![
        lit("mem"),
        ws(),
        rule(Rule::AnyRegister),
        ws(),
        rule(Rule::Number),
        ws(),
        lit("+="),
        ws(),
        rule(Rule::ArithmeticValue),
      ]),
    );
    def(
      Rule::AddMemory,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        lit("+="),
        ws(),
        lit("mem"),
        ws(),
        rule(Rule::AnyRegister),
        ws(),
        rule(Rule::Number),
      ]),
    );
    def(
      Rule::MemorySubtract,
      seq(vec![
        lit("mem"),
        ws(),
        rule(Rule::AnyRegister),
        ws(),
        rule(Rule::Number),
        ws(),
        lit("-="),
        ws(),
        rule(Rule::ArithmeticValue),
      ]),
    );
    def(
      Rule::SubtractMemory,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        lit("-="),
        ws(),
        lit("mem"),
        ws(),
        rule(Rule::AnyRegister),
        ws(),
        rule(Rule::Number),
      ]),
    );
    def(
      Rule::CompareJump,
      seq(vec![
        lit("cjump"),
        ws(),
        rule(Rule::ArithmeticValue),
        ws(),
        rule(Rule::ComparisonOperator),
        ws(),
        rule(Rule::ArithmeticValue),
        ws(),
        rule(Rule::Label),
      ]),
    );
    def(Rule::Goto, seq(vec![lit("goto"), ws(), rule(Rule::Label)]));
    def(
      Rule::CallPrint,
      seq(vec![lit("call"), ws(), lit("print"), ws(), lit("1")]),
    );
    def(
      Rule::CallInput,
      seq(vec![lit("call"), ws(), lit("input"), ws(), lit("0")]),
    );
    def(
      Rule::CallAllocate,
      seq(vec![lit("call"), ws(), lit("allocate"), ws(), lit("2")]),
    );
    def(
      Rule::CallTupleError,
      seq(vec![lit("call"), ws(), lit("tuple-error"), ws(), lit("3")]),
    );
    def(
      Rule::CallTensorError,
      seq(vec![
        lit("call"),
        ws(),
        lit("tensor-error"),
        ws(),
        rule(Rule::TensorErrorArity),
      ]),
    );
    def(
      Rule::Call,
      seq(vec![
        lit("call"),
        ws(),
        rule(Rule::CallDest),
        ws(),
        rule(Rule::Number),
      ]),
    );
    def(
      Rule::Increment,
      seq(vec![rule(Rule::WritableRegister), ws(), lit("++")]),
    );
    def(
      Rule::Decrement,
      seq(vec![rule(Rule::WritableRegister), ws(), lit("--")]),
    );
    def(
      Rule::Leaq,
      seq(vec![
        rule(Rule::WritableRegister),
        ws(),
        lit("@"),
        ws(),
        rule(Rule::WritableRegister),
        ws(),
        rule(Rule::WritableRegister),
        ws(),
        rule(Rule::LeaScale),
      ]),
    );

    // Tie-break order between overlapping productions: more specific first.
    def(
      Rule::Instruction,
      choice(vec![
        rule(Rule::Return),
        rule(Rule::CompareAssignment),
        rule(Rule::Assignment),
        rule(Rule::MemoryRead),
        rule(Rule::MemoryWrite),
        rule(Rule::Arithmetic),
        rule(Rule::ShiftByRegister),
        rule(Rule::ShiftByImmediate),
        rule(Rule::MemoryAdd),
        rule(Rule::AddMemory),
        rule(Rule::MemorySubtract),
        rule(Rule::SubtractMemory),
        rule(Rule::CompareJump),
        rule(Rule::Label),
        rule(Rule::Goto),
        rule(Rule::CallPrint),
        rule(Rule::CallInput),
        rule(Rule::CallAllocate),
        rule(Rule::CallTupleError),
        rule(Rule::CallTensorError),
        rule(Rule::Call),
        rule(Rule::Increment),
        rule(Rule::Decrement),
        rule(Rule::Leaq),
      ]),
    );

    def(
      Rule::Function,
      seq(vec![
        lit("("),
        ws(),
        rule(Rule::FunctionName),
        ws(),
        rule(Rule::Number),
        ws(),
        rule(Rule::Number),
        plus(seq(vec![ws(), rule(Rule::Instruction)])),
        ws(),
        lit(")"),
      ]),
    );
    def(
      Rule::Program,
      seq(vec![
        ws(),
        lit("("),
        ws(),
        rule(Rule::FunctionName),
        plus(seq(vec![ws(), rule(Rule::Function)])),
        ws(),
        lit(")"),
        ws(),
        Expr::EndOfInput,
      ]),
    );

    Self { rules }
  }

  pub(crate) fn body(&self, tag: Rule) -> Option<&Expr> {
    self.rules.get(&tag)
  }

  /// Sanity-check the grammar before parsing anything with it.
  ///
  /// Rejects undefined rule references, repetitions whose body can match
  /// empty input, and left-recursive cycles reachable through nullable
  /// prefixes. All of these would send the matcher into an infinite loop on
  /// some input, so they are reported as grammar-definition errors up front.
  pub fn analyze(&self) -> CompileResult<()> {
    for body in self.rules.values() {
      self.check_references(body)?;
    }

    let nullable = self.nullable_rules();
    for (tag, body) in &self.rules {
      self.check_repetitions(*tag, body, &nullable)?;
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    for tag in self.rules.keys() {
      self.check_left_recursion(*tag, &nullable, &mut visiting, &mut done)?;
    }
    Ok(())
  }

  fn check_references(&self, expr: &Expr) -> CompileResult<()> {
    match expr {
      Expr::Seq(items) | Expr::Choice(items) => {
        for item in items {
          self.check_references(item)?;
        }
        Ok(())
      }
      Expr::Star(body) | Expr::Plus(body) | Expr::Opt(body) | Expr::Check(body)
      | Expr::Reject(body) => self.check_references(body),
      Expr::Ref(target) => {
        if self.rules.contains_key(target) {
          Ok(())
        } else {
          Err(CompileError::Grammar {
            message: format!("rule {target:?} is referenced but never defined"),
          })
        }
      }
      _ => Ok(()),
    }
  }

  /// Fixpoint over the rule set: which rules can succeed without consuming.
  fn nullable_rules(&self) -> HashSet<Rule> {
    let mut nullable = HashSet::new();
    loop {
      let mut changed = false;
      for (tag, body) in &self.rules {
        if !nullable.contains(tag) && self.is_nullable(body, &nullable) {
          nullable.insert(*tag);
          changed = true;
        }
      }
      if !changed {
        return nullable;
      }
    }
  }

  fn is_nullable(&self, expr: &Expr, nullable: &HashSet<Rule>) -> bool {
    match expr {
      Expr::Literal(text) => text.is_empty(),
      Expr::Range(..) | Expr::AnyChar => false,
      Expr::Seq(items) => items.iter().all(|item| self.is_nullable(item, nullable)),
      Expr::Choice(items) => items.iter().any(|item| self.is_nullable(item, nullable)),
      Expr::Star(_) | Expr::Opt(_) | Expr::Check(_) | Expr::Reject(_) => true,
      Expr::Plus(body) => self.is_nullable(body, nullable),
      Expr::Ref(target) => nullable.contains(target),
      Expr::EndOfInput => true,
    }
  }

  fn check_repetitions(
    &self,
    tag: Rule,
    expr: &Expr,
    nullable: &HashSet<Rule>,
  ) -> CompileResult<()> {
    match expr {
      Expr::Seq(items) | Expr::Choice(items) => {
        for item in items {
          self.check_repetitions(tag, item, nullable)?;
        }
        Ok(())
      }
      Expr::Star(body) | Expr::Plus(body) => {
        if self.is_nullable(body, nullable) {
          return Err(CompileError::Grammar {
            message: format!("rule {tag:?} repeats a possibly-empty expression"),
          });
        }
        self.check_repetitions(tag, body, nullable)
      }
      Expr::Opt(body) | Expr::Check(body) | Expr::Reject(body) => {
        self.check_repetitions(tag, body, nullable)
      }
      _ => Ok(()),
    }
  }

  fn check_left_recursion(
    &self,
    tag: Rule,
    nullable: &HashSet<Rule>,
    visiting: &mut HashSet<Rule>,
    done: &mut HashSet<Rule>,
  ) -> CompileResult<()> {
    if done.contains(&tag) {
      return Ok(());
    }
    if !visiting.insert(tag) {
      return Err(CompileError::Grammar {
        message: format!("rule {tag:?} is left-recursive"),
      });
    }
    if let Some(body) = self.rules.get(&tag) {
      let mut heads = Vec::new();
      self.collect_heads(body, nullable, &mut heads);
      for head in heads {
        self.check_left_recursion(head, nullable, visiting, done)?;
      }
    }
    visiting.remove(&tag);
    done.insert(tag);
    Ok(())
  }

  /// Gather the rules reachable at the current position before any input is
  /// guaranteed to have been consumed. Returns whether the whole expression
  /// can itself succeed without consuming.
  fn collect_heads(&self, expr: &Expr, nullable: &HashSet<Rule>, out: &mut Vec<Rule>) -> bool {
    match expr {
      Expr::Literal(text) => text.is_empty(),
      Expr::Range(..) | Expr::AnyChar => false,
      Expr::Seq(items) => {
        for item in items {
          if !self.collect_heads(item, nullable, out) {
            return false;
          }
        }
        true
      }
      Expr::Choice(items) => {
        let mut any_nullable = false;
        for item in items {
          if self.collect_heads(item, nullable, out) {
            any_nullable = true;
          }
        }
        any_nullable
      }
      Expr::Star(body) | Expr::Opt(body) | Expr::Check(body) | Expr::Reject(body) => {
        self.collect_heads(body, nullable, out);
        true
      }
      Expr::Plus(body) => {
        self.collect_heads(body, nullable, out);
        self.is_nullable(body, nullable)
      }
      Expr::Ref(target) => {
        out.push(*target);
        nullable.contains(target)
      }
      Expr::EndOfInput => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn l1_grammar_passes_analysis() {
    Grammar::l1().analyze().expect("the L1 grammar is well-formed");
  }

  #[test]
  fn every_instruction_alternative_is_defined() {
    let grammar = Grammar::l1();
    let body = grammar.body(Rule::Instruction).expect("instruction rule");
    let Expr::Choice(alternatives) = body else {
      panic!("instruction rule should be an ordered choice");
    };
    assert_eq!(alternatives.len(), 24);
  }

  #[test]
  fn analysis_rejects_undefined_references() {
    let mut rules = HashMap::new();
    rules.insert(Rule::Program, rule(Rule::Function));
    let grammar = Grammar { rules };
    let err = grammar.analyze().expect_err("missing rule must be caught");
    assert!(err.to_string().contains("never defined"));
  }

  #[test]
  fn analysis_rejects_empty_repetition() {
    let mut rules = HashMap::new();
    rules.insert(Rule::Program, star(opt(lit("x"))));
    let grammar = Grammar { rules };
    let err = grammar.analyze().expect_err("nullable star must be caught");
    assert!(err.to_string().contains("possibly-empty"));
  }

  #[test]
  fn analysis_rejects_left_recursion() {
    let mut rules = HashMap::new();
    rules.insert(
      Rule::Program,
      seq(vec![rule(Rule::Function), lit(")")]),
    );
    rules.insert(
      Rule::Function,
      seq(vec![opt(lit("(")), rule(Rule::Program)]),
    );
    let grammar = Grammar { rules };
    let err = grammar.analyze().expect_err("cycle must be caught");
    assert!(err.to_string().contains("left-recursive"));
  }
}
