//! The L1 abstract syntax tree.
//!
//! Everything is a tagged variant: values and instructions are enums the
//! later stages dispatch over exhaustively, and ownership is tree-shaped
//! (program owns functions own instructions own values). The `Display`
//! impls reproduce L1 surface syntax, so a lowered program can be printed
//! and re-parsed; the driver uses the same rendering for `--dump-ast`.

use std::fmt;

/// The sixteen general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
  Rax,
  Rbx,
  Rcx,
  Rdx,
  Rdi,
  Rsi,
  R8,
  R9,
  R10,
  R11,
  R12,
  R13,
  R14,
  R15,
  Rbp,
  Rsp,
}

impl Register {
  pub fn from_name(name: &str) -> Option<Register> {
    match name {
      "rax" => Some(Register::Rax),
      "rbx" => Some(Register::Rbx),
      "rcx" => Some(Register::Rcx),
      "rdx" => Some(Register::Rdx),
      "rdi" => Some(Register::Rdi),
      "rsi" => Some(Register::Rsi),
      "r8" => Some(Register::R8),
      "r9" => Some(Register::R9),
      "r10" => Some(Register::R10),
      "r11" => Some(Register::R11),
      "r12" => Some(Register::R12),
      "r13" => Some(Register::R13),
      "r14" => Some(Register::R14),
      "r15" => Some(Register::R15),
      "rbp" => Some(Register::Rbp),
      "rsp" => Some(Register::Rsp),
      _ => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Register::Rax => "rax",
      Register::Rbx => "rbx",
      Register::Rcx => "rcx",
      Register::Rdx => "rdx",
      Register::Rdi => "rdi",
      Register::Rsi => "rsi",
      Register::R8 => "r8",
      Register::R9 => "r9",
      Register::R10 => "r10",
      Register::R11 => "r11",
      Register::R12 => "r12",
      Register::R13 => "r13",
      Register::R14 => "r14",
      Register::R15 => "r15",
      Register::Rbp => "rbp",
      Register::Rsp => "rsp",
    }
  }

  /// The 8-bit alias used by `set*`/`movzbq`. `rsp` has none.
  pub fn low_byte(self) -> Option<&'static str> {
    match self {
      Register::Rax => Some("al"),
      Register::Rbx => Some("bl"),
      Register::Rcx => Some("cl"),
      Register::Rdx => Some("dl"),
      Register::Rdi => Some("dil"),
      Register::Rsi => Some("sil"),
      Register::R8 => Some("r8b"),
      Register::R9 => Some("r9b"),
      Register::R10 => Some("r10b"),
      Register::R11 => Some("r11b"),
      Register::R12 => Some("r12b"),
      Register::R13 => Some("r13b"),
      Register::R14 => Some("r14b"),
      Register::R15 => Some("r15b"),
      Register::Rbp => Some("bpl"),
      Register::Rsp => None,
    }
  }
}

impl fmt::Display for Register {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Register(Register),
  Memory { base: Register, offset: i64 },
  Number(i64),
  /// A label or function-name reference; both collapse into this shape and
  /// the stored name carries no sigil. In source position it means
  /// "address of".
  Location(String),
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Register(register) => write!(f, "{register}"),
      Value::Memory { base, offset } => write!(f, "mem {base} {offset}"),
      Value::Number(value) => write!(f, "{value}"),
      Value::Location(name) => write!(f, ":{name}"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOperation {
  Pure,
  Add,
  Subtract,
  Multiply,
  BitwiseAnd,
  LeftShift,
  RightShift,
}

impl AssignOperation {
  pub fn from_symbol(symbol: &str) -> Option<AssignOperation> {
    match symbol {
      "<-" => Some(AssignOperation::Pure),
      "+=" => Some(AssignOperation::Add),
      "-=" => Some(AssignOperation::Subtract),
      "*=" => Some(AssignOperation::Multiply),
      "&=" => Some(AssignOperation::BitwiseAnd),
      "<<=" => Some(AssignOperation::LeftShift),
      ">>=" => Some(AssignOperation::RightShift),
      _ => None,
    }
  }

  pub fn symbol(self) -> &'static str {
    match self {
      AssignOperation::Pure => "<-",
      AssignOperation::Add => "+=",
      AssignOperation::Subtract => "-=",
      AssignOperation::Multiply => "*=",
      AssignOperation::BitwiseAnd => "&=",
      AssignOperation::LeftShift => "<<=",
      AssignOperation::RightShift => ">>=",
    }
  }

  pub fn is_shift(self) -> bool {
    matches!(self, AssignOperation::LeftShift | AssignOperation::RightShift)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
  Less,
  LessEqual,
  Equal,
}

impl ComparisonOperator {
  pub fn from_symbol(symbol: &str) -> Option<ComparisonOperator> {
    match symbol {
      "<" => Some(ComparisonOperator::Less),
      "<=" => Some(ComparisonOperator::LessEqual),
      "=" => Some(ComparisonOperator::Equal),
      _ => None,
    }
  }

  pub fn symbol(self) -> &'static str {
    match self {
      ComparisonOperator::Less => "<",
      ComparisonOperator::LessEqual => "<=",
      ComparisonOperator::Equal => "=",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
  /// A local jump target.
  Label { name: String },
  Return,
  Assignment {
    destination: Value,
    op: AssignOperation,
    source: Value,
  },
  CompareAssignment {
    destination: Register,
    op: ComparisonOperator,
    lhs: Value,
    rhs: Value,
  },
  CompareJump {
    op: ComparisonOperator,
    lhs: Value,
    rhs: Value,
    target: String,
  },
  Goto { target: String },
  CallFunction {
    name: String,
    is_runtime: bool,
    num_arguments: i64,
  },
  CallRegister {
    register: Register,
    num_arguments: i64,
  },
  Leaq {
    destination: Register,
    base: Register,
    index: Register,
    scale: i64,
  },
  Increment { register: Register },
  Decrement { register: Register },
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Instruction::Label { name } => write!(f, ":{name}"),
      Instruction::Return => f.write_str("return"),
      Instruction::Assignment {
        destination,
        op,
        source,
      } => write!(f, "{destination} {} {source}", op.symbol()),
      Instruction::CompareAssignment {
        destination,
        op,
        lhs,
        rhs,
      } => write!(f, "{destination} <- {lhs} {} {rhs}", op.symbol()),
      Instruction::CompareJump {
        op,
        lhs,
        rhs,
        target,
      } => write!(f, "cjump {lhs} {} {rhs} :{target}", op.symbol()),
      Instruction::Goto { target } => write!(f, "goto :{target}"),
      Instruction::CallFunction {
        name,
        is_runtime,
        num_arguments,
      } => {
        if *is_runtime {
          write!(f, "call {name} {num_arguments}")
        } else {
          write!(f, "call @{name} {num_arguments}")
        }
      }
      Instruction::CallRegister {
        register,
        num_arguments,
      } => write!(f, "call {register} {num_arguments}"),
      Instruction::Leaq {
        destination,
        base,
        index,
        scale,
      } => write!(f, "{destination} @ {base} {index} {scale}"),
      Instruction::Increment { register } => write!(f, "{register}++"),
      Instruction::Decrement { register } => write!(f, "{register}--"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
  /// Function name without the `@` sigil.
  pub name: String,
  pub num_arguments: i64,
  pub num_locals: i64,
  pub instructions: Vec<Instruction>,
}

impl fmt::Display for Function {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "  (@{} {} {}", self.name, self.num_arguments, self.num_locals)?;
    for instruction in &self.instructions {
      writeln!(f, "    {instruction}")?;
    }
    write!(f, "  )")
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  /// Entry-point function name without the `@` sigil.
  pub entry_point: String,
  pub functions: Vec<Function>,
}

impl fmt::Display for Program {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "(@{}", self.entry_point)?;
    for function in &self.functions {
      writeln!(f, "{function}")?;
    }
    write!(f, ")")
  }
}
