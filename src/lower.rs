//! Lowering: collapse the concrete parse tree into the AST.
//!
//! One total function over rule tags. The many surface forms of assignment
//! (plain, memory read, memory write, the four `±=` memory variants, the
//! two shift spellings) all land in the single `Assignment` variant; labels
//! and function names collapse into `Value::Location`. This is also where
//! the semantic checks that are not expressible in the grammar live: offset
//! alignment, number overflow, the full tensor-error arity and lea scale
//! values.

use log::debug;

use crate::ast::{
  AssignOperation, ComparisonOperator, Function, Instruction, Program, Register, Value,
};
use crate::error::{CompileError, CompileResult};
use crate::grammar::Rule;
use crate::parser::Node;

/// Lower a parse tree rooted at a `Program` node.
pub fn lower(tree: &Node, source: &str) -> CompileResult<Program> {
  if tree.rule != Rule::Program {
    return Err(CompileError::internal_node(tree.rule, "a program"));
  }

  let entry = child(tree, 0)?;
  let entry_point = function_name(entry, source)?;

  let mut functions = Vec::new();
  for node in &tree.children[1..] {
    if node.rule != Rule::Function {
      return Err(CompileError::internal_node(node.rule, "a function list"));
    }
    functions.push(lower_function(node, source)?);
  }

  debug!("lowered program with {} function(s)", functions.len());
  Ok(Program {
    entry_point,
    functions,
  })
}

fn lower_function(node: &Node, source: &str) -> CompileResult<Function> {
  let name = function_name(child(node, 0)?, source)?;
  let num_arguments = counted(child(node, 1)?, source, "argument")?;
  let num_locals = counted(child(node, 2)?, source, "locals")?;

  let mut instructions = Vec::new();
  for instruction in &node.children[3..] {
    instructions.push(lower_instruction(instruction, source)?);
  }

  Ok(Function {
    name,
    num_arguments,
    num_locals,
    instructions,
  })
}

fn lower_instruction(node: &Node, source: &str) -> CompileResult<Instruction> {
  match node.rule {
    Rule::Label => Ok(Instruction::Label {
      name: unsigiled(node, source),
    }),
    Rule::Return => Ok(Instruction::Return),
    Rule::Assignment => Ok(Instruction::Assignment {
      destination: Value::Register(register(child(node, 0)?, source)?),
      op: AssignOperation::Pure,
      source: value(child(node, 1)?, source)?,
    }),
    Rule::MemoryRead => Ok(Instruction::Assignment {
      destination: Value::Register(register(child(node, 0)?, source)?),
      op: AssignOperation::Pure,
      source: memory(child(node, 1)?, child(node, 2)?, source)?,
    }),
    Rule::MemoryWrite => Ok(Instruction::Assignment {
      destination: memory(child(node, 0)?, child(node, 1)?, source)?,
      op: AssignOperation::Pure,
      source: Value::Register(register(child(node, 2)?, source)?),
    }),
    Rule::Arithmetic | Rule::ShiftByRegister | Rule::ShiftByImmediate => {
      Ok(Instruction::Assignment {
        destination: Value::Register(register(child(node, 0)?, source)?),
        op: assign_operation(child(node, 1)?, source)?,
        source: value(child(node, 2)?, source)?,
      })
    }
    Rule::MemoryAdd => Ok(Instruction::Assignment {
      destination: memory(child(node, 0)?, child(node, 1)?, source)?,
      op: AssignOperation::Add,
      source: value(child(node, 2)?, source)?,
    }),
    Rule::MemorySubtract => Ok(Instruction::Assignment {
      destination: memory(child(node, 0)?, child(node, 1)?, source)?,
      op: AssignOperation::Subtract,
      source: value(child(node, 2)?, source)?,
    }),
    Rule::AddMemory => Ok(Instruction::Assignment {
      destination: Value::Register(register(child(node, 0)?, source)?),
      op: AssignOperation::Add,
      source: memory(child(node, 1)?, child(node, 2)?, source)?,
    }),
    Rule::SubtractMemory => Ok(Instruction::Assignment {
      destination: Value::Register(register(child(node, 0)?, source)?),
      op: AssignOperation::Subtract,
      source: memory(child(node, 1)?, child(node, 2)?, source)?,
    }),
    Rule::CompareAssignment => Ok(Instruction::CompareAssignment {
      destination: register(child(node, 0)?, source)?,
      lhs: value(child(node, 1)?, source)?,
      op: comparison_operator(child(node, 2)?, source)?,
      rhs: value(child(node, 3)?, source)?,
    }),
    Rule::CompareJump => Ok(Instruction::CompareJump {
      lhs: value(child(node, 0)?, source)?,
      op: comparison_operator(child(node, 1)?, source)?,
      rhs: value(child(node, 2)?, source)?,
      target: unsigiled(child(node, 3)?, source),
    }),
    Rule::Goto => Ok(Instruction::Goto {
      target: unsigiled(child(node, 0)?, source),
    }),
    Rule::CallPrint => Ok(runtime_call("print", 1)),
    Rule::CallInput => Ok(runtime_call("input", 0)),
    Rule::CallAllocate => Ok(runtime_call("allocate", 2)),
    Rule::CallTupleError => Ok(runtime_call("tuple-error", 3)),
    Rule::CallTensorError => {
      let count = number(child(node, 0)?, source)?;
      // The grammar only pins the first digit of the arity.
      if !matches!(count, 1 | 3 | 4) {
        return Err(CompileError::Arity {
          name: "tensor-error".to_string(),
          count,
        });
      }
      Ok(runtime_call("tensor-error", count))
    }
    Rule::Call => {
      let dest = child(node, 0)?;
      let num_arguments = number(child(node, 1)?, source)?;
      match dest.rule {
        Rule::Register => Ok(Instruction::CallRegister {
          register: register(dest, source)?,
          num_arguments,
        }),
        Rule::FunctionName => Ok(Instruction::CallFunction {
          name: function_name(dest, source)?,
          is_runtime: false,
          num_arguments,
        }),
        other => Err(CompileError::internal_node(other, "a call destination")),
      }
    }
    Rule::Increment => Ok(Instruction::Increment {
      register: register(child(node, 0)?, source)?,
    }),
    Rule::Decrement => Ok(Instruction::Decrement {
      register: register(child(node, 0)?, source)?,
    }),
    Rule::Leaq => {
      let scale_node = child(node, 3)?;
      let scale = number(scale_node, source)?;
      if !matches!(scale, 1 | 2 | 4 | 8) {
        return Err(CompileError::parse_at(
          source,
          scale_node.start,
          format!("address scale must be 1, 2, 4, or 8, not {scale}"),
        ));
      }
      Ok(Instruction::Leaq {
        destination: register(child(node, 0)?, source)?,
        base: register(child(node, 1)?, source)?,
        index: register(child(node, 2)?, source)?,
        scale,
      })
    }
    other => Err(CompileError::internal_node(other, "an instruction position")),
  }
}

// ----- Leaf helpers -----

fn child<'a>(node: &'a Node, index: usize) -> CompileResult<&'a Node> {
  node.children.get(index).ok_or_else(|| CompileError::Internal {
    message: format!("{:?} node is missing child {index}", node.rule),
  })
}

fn register(node: &Node, source: &str) -> CompileResult<Register> {
  if node.rule != Rule::Register {
    return Err(CompileError::internal_node(node.rule, "a register position"));
  }
  Register::from_name(node.text(source)).ok_or_else(|| CompileError::Internal {
    message: format!("unknown register spelling '{}'", node.text(source)),
  })
}

fn number(node: &Node, source: &str) -> CompileResult<i64> {
  if node.rule != Rule::Number {
    return Err(CompileError::internal_node(node.rule, "a number position"));
  }
  let text = node.text(source);
  text.parse::<i64>().map_err(|_| {
    CompileError::parse_at(source, node.start, format!("number '{text}' is out of range"))
  })
}

/// An argument or locals count in a function header; never negative.
fn counted(node: &Node, source: &str, what: &str) -> CompileResult<i64> {
  let count = number(node, source)?;
  if count < 0 {
    return Err(CompileError::parse_at(
      source,
      node.start,
      format!("{what} count cannot be negative"),
    ));
  }
  Ok(count)
}

/// Strip the `:` or `@` sigil from a label or function-name node.
fn unsigiled(node: &Node, source: &str) -> String {
  node.text(source)[1..].to_string()
}

fn function_name(node: &Node, source: &str) -> CompileResult<String> {
  if node.rule != Rule::FunctionName {
    return Err(CompileError::internal_node(node.rule, "a function name"));
  }
  Ok(unsigiled(node, source))
}

fn memory(base: &Node, offset: &Node, source: &str) -> CompileResult<Value> {
  let offset_value = number(offset, source)?;
  if offset_value % 8 != 0 {
    return Err(CompileError::alignment_at(source, offset.start, offset_value));
  }
  Ok(Value::Memory {
    base: register(base, source)?,
    offset: offset_value,
  })
}

fn value(node: &Node, source: &str) -> CompileResult<Value> {
  match node.rule {
    Rule::Register => Ok(Value::Register(register(node, source)?)),
    Rule::Number => Ok(Value::Number(number(node, source)?)),
    Rule::Label | Rule::FunctionName => Ok(Value::Location(unsigiled(node, source))),
    other => Err(CompileError::internal_node(other, "a value position")),
  }
}

fn assign_operation(node: &Node, source: &str) -> CompileResult<AssignOperation> {
  if !matches!(node.rule, Rule::ArithmeticOperator | Rule::ShiftOperator) {
    return Err(CompileError::internal_node(node.rule, "an assignment operator"));
  }
  let symbol = node.text(source);
  AssignOperation::from_symbol(symbol).ok_or_else(|| CompileError::Internal {
    message: format!("unknown assignment operator '{symbol}'"),
  })
}

fn comparison_operator(node: &Node, source: &str) -> CompileResult<ComparisonOperator> {
  if node.rule != Rule::ComparisonOperator {
    return Err(CompileError::internal_node(node.rule, "a comparison operator"));
  }
  let symbol = node.text(source);
  ComparisonOperator::from_symbol(symbol).ok_or_else(|| CompileError::Internal {
    message: format!("unknown comparison operator '{symbol}'"),
  })
}

fn runtime_call(name: &str, num_arguments: i64) -> Instruction {
  Instruction::CallFunction {
    name: name.to_string(),
    is_runtime: true,
    num_arguments,
  }
}
