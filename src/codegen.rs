//! Code generation: lower the AST into AT&T x86-64 assembly.
//!
//! Every L1 name is emitted behind a `_` prefix to keep the program's
//! namespace apart from the runtime's C symbols. User calls follow the
//! jump-call convention: the caller makes room for stack-passed arguments
//! plus a synthesized return slot and `jmp`s, and the callee's `return`
//! pops the whole frame (`retq` itself pops the return address, so the
//! return adjustment never counts that slot).

use log::debug;

use crate::ast::{
  AssignOperation, ComparisonOperator, Function, Instruction, Program, Register, Value,
};
use crate::error::{CompileError, CompileResult};

const CALLEE_SAVED: [&str; 6] = ["rbx", "rbp", "r12", "r13", "r14", "r15"];

/// Emit assembly for a whole program.
pub fn generate(program: &Program) -> CompileResult<String> {
  let mut asm = String::new();
  write_entry_wrapper(&mut asm, &program.entry_point);
  for function in &program.functions {
    write_function(&mut asm, function)?;
  }
  debug!("emitted {} bytes of assembly", asm.len());
  Ok(asm)
}

/// The global `go` wrapper: save the callee-saved registers, enter the
/// program, restore them in reverse.
fn write_entry_wrapper(asm: &mut String, entry_point: &str) {
  asm.push_str(".text\n");
  push_line(asm, ".globl go");
  asm.push_str("go:\n");
  for register in CALLEE_SAVED {
    push_line(asm, &format!("pushq %{register}"));
  }
  push_line(asm, &format!("call {}", mangle(entry_point)));
  for register in CALLEE_SAVED.iter().rev() {
    push_line(asm, &format!("popq %{register}"));
  }
  push_line(asm, "retq");
}

fn write_function(asm: &mut String, function: &Function) -> CompileResult<()> {
  asm.push_str(&format!("{}:\n", mangle(&function.name)));
  push_line(asm, &format!("subq ${}, %rsp", 8 * function.num_locals));
  for instruction in &function.instructions {
    write_instruction(asm, function, instruction)?;
  }
  Ok(())
}

fn write_instruction(
  asm: &mut String,
  function: &Function,
  instruction: &Instruction,
) -> CompileResult<()> {
  match instruction {
    Instruction::Label { name } => {
      asm.push_str(&format!("{}:\n", mangle(name)));
    }
    Instruction::Return => {
      // Locals plus stack-passed arguments; retq pops the return address.
      let bytes = 8 * (stack_arguments(function.num_arguments) + function.num_locals);
      push_line(asm, &format!("addq ${bytes}, %rsp"));
      push_line(asm, "retq");
    }
    Instruction::Assignment {
      destination,
      op,
      source,
    } => {
      let source_text = if op.is_shift() {
        shift_source(source)?
      } else {
        operand(source)
      };
      push_line(
        asm,
        &format!("{} {source_text}, {}", mnemonic(*op), operand(destination)),
      );
    }
    Instruction::CompareAssignment {
      destination,
      op,
      lhs,
      rhs,
    } => match plan_comparison(*op, lhs, rhs)? {
      Comparison::Constant(holds) => {
        push_line(
          asm,
          &format!("movq ${}, %{}", i64::from(holds), destination.name()),
        );
      }
      Comparison::Test {
        register,
        operand: against,
        flipped,
      } => {
        let low = low_byte(register)?;
        push_line(asm, &format!("cmpq {}, %{}", operand(&against), register.name()));
        push_line(asm, &format!("set{} {low}", condition_suffix(*op, flipped)));
        push_line(asm, &format!("movzbq {low}, %{}", destination.name()));
      }
    },
    Instruction::CompareJump {
      op,
      lhs,
      rhs,
      target,
    } => match plan_comparison(*op, lhs, rhs)? {
      Comparison::Constant(true) => {
        push_line(asm, &format!("jmp {}", mangle(target)));
      }
      Comparison::Constant(false) => {
        // The jump can never be taken; fall through.
      }
      Comparison::Test {
        register,
        operand: against,
        flipped,
      } => {
        push_line(asm, &format!("cmpq {}, %{}", operand(&against), register.name()));
        push_line(
          asm,
          &format!("j{} {}", condition_suffix(*op, flipped), mangle(target)),
        );
      }
    },
    Instruction::Goto { target } => {
      push_line(asm, &format!("jmp {}", mangle(target)));
    }
    Instruction::CallFunction {
      name,
      is_runtime,
      num_arguments,
    } => {
      if *is_runtime {
        push_line(asm, &format!("call {}", runtime_symbol(name, *num_arguments)?));
      } else {
        push_line(asm, &format!("subq ${}, %rsp", call_adjustment(*num_arguments)));
        push_line(asm, &format!("jmp {}", mangle(name)));
      }
    }
    Instruction::CallRegister {
      register,
      num_arguments,
    } => {
      push_line(asm, &format!("subq ${}, %rsp", call_adjustment(*num_arguments)));
      push_line(asm, &format!("jmp *%{}", register.name()));
    }
    Instruction::Leaq {
      destination,
      base,
      index,
      scale,
    } => {
      push_line(
        asm,
        &format!(
          "leaq (%{},%{},{scale}), %{}",
          base.name(),
          index.name(),
          destination.name()
        ),
      );
    }
    Instruction::Increment { register } => {
      push_line(asm, &format!("incq %{}", register.name()));
    }
    Instruction::Decrement { register } => {
      push_line(asm, &format!("decq %{}", register.name()));
    }
  }
  Ok(())
}

// ----- Operand and mnemonic helpers -----

fn push_line(asm: &mut String, line: &str) {
  asm.push_str("    ");
  asm.push_str(line);
  asm.push('\n');
}

fn mangle(name: &str) -> String {
  format!("_{name}")
}

fn operand(value: &Value) -> String {
  match value {
    Value::Register(register) => format!("%{}", register.name()),
    Value::Memory { base, offset } => format!("{offset}(%{})", base.name()),
    Value::Number(value) => format!("${value}"),
    Value::Location(name) => format!("${}", mangle(name)),
  }
}

fn mnemonic(op: AssignOperation) -> &'static str {
  match op {
    AssignOperation::Pure => "movq",
    AssignOperation::Add => "addq",
    AssignOperation::Subtract => "subq",
    AssignOperation::Multiply => "imulq",
    AssignOperation::BitwiseAnd => "andq",
    AssignOperation::LeftShift => "salq",
    AssignOperation::RightShift => "sarq",
  }
}

/// A register shift count lives in %cl; the grammar only lets rcx through.
fn shift_source(source: &Value) -> CompileResult<String> {
  match source {
    Value::Register(Register::Rcx) => Ok("%cl".to_string()),
    Value::Register(other) => Err(CompileError::Internal {
      message: format!("shift count in {} instead of rcx", other.name()),
    }),
    other => Ok(operand(other)),
  }
}

fn low_byte(register: Register) -> CompileResult<String> {
  match register.low_byte() {
    Some(name) => Ok(format!("%{name}")),
    None => Err(CompileError::Internal {
      message: "rsp has no 8-bit form".to_string(),
    }),
  }
}

/// How many arguments arrive on the stack rather than in registers.
fn stack_arguments(num_arguments: i64) -> i64 {
  (num_arguments - 6).max(0)
}

/// Room made before a jump-call: stack arguments plus the return slot.
fn call_adjustment(num_arguments: i64) -> i64 {
  8 * (stack_arguments(num_arguments) + 1)
}

enum Comparison {
  /// Both sides were immediates; the answer is known now.
  Constant(bool),
  /// Compare `register` against `operand`; `flipped` records that the
  /// operands were swapped to put a register on the left.
  Test {
    register: Register,
    operand: Value,
    flipped: bool,
  },
}

fn plan_comparison(
  op: ComparisonOperator,
  lhs: &Value,
  rhs: &Value,
) -> CompileResult<Comparison> {
  match (lhs, rhs) {
    (Value::Number(a), Value::Number(b)) => Ok(Comparison::Constant(evaluate(op, *a, *b))),
    (Value::Register(register), rhs) => Ok(Comparison::Test {
      register: *register,
      operand: rhs.clone(),
      flipped: false,
    }),
    (Value::Number(value), Value::Register(register)) => Ok(Comparison::Test {
      register: *register,
      operand: Value::Number(*value),
      flipped: true,
    }),
    (lhs, rhs) => Err(CompileError::Internal {
      message: format!("comparison between '{lhs}' and '{rhs}'"),
    }),
  }
}

fn evaluate(op: ComparisonOperator, lhs: i64, rhs: i64) -> bool {
  match op {
    ComparisonOperator::Less => lhs < rhs,
    ComparisonOperator::LessEqual => lhs <= rhs,
    ComparisonOperator::Equal => lhs == rhs,
  }
}

/// Condition suffix for `set*`/`j*`. Swapping the operands of an ordering
/// comparison flips its direction; equality is its own mirror.
fn condition_suffix(op: ComparisonOperator, flipped: bool) -> &'static str {
  match (op, flipped) {
    (ComparisonOperator::Less, false) => "l",
    (ComparisonOperator::Less, true) => "g",
    (ComparisonOperator::LessEqual, false) => "le",
    (ComparisonOperator::LessEqual, true) => "ge",
    (ComparisonOperator::Equal, _) => "e",
  }
}

fn runtime_symbol(name: &str, num_arguments: i64) -> CompileResult<&'static str> {
  match name {
    "print" => Ok("print"),
    "input" => Ok("input"),
    "allocate" => Ok("allocate"),
    "tuple-error" => Ok("tuple_error"),
    "tensor-error" => match num_arguments {
      1 => Ok("array_tensor_error_null"),
      3 => Ok("array_tensor"),
      4 => Ok("tensor_error"),
      other => Err(CompileError::Arity {
        name: name.to_string(),
        count: other,
      }),
    },
    other => Err(CompileError::Internal {
      message: format!("unknown runtime function '{other}'"),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{lower, parser};

  fn assemble(source: &str) -> String {
    let tree = parser::parse(source).expect("parse");
    let program = lower::lower(&tree, source).expect("lower");
    generate(&program).expect("generate")
  }

  fn lines(asm: &str) -> Vec<&str> {
    asm.lines().map(str::trim).collect()
  }

  fn assert_sequence(asm: &str, expected: &[&str]) {
    let all = lines(asm);
    let found = all
      .windows(expected.len())
      .any(|window| window == expected);
    assert!(found, "expected {expected:?} in:\n{asm}");
  }

  #[test]
  fn identity_program_has_wrapper_frame_and_return() {
    let asm = assemble("(@main (@main 0 0 return))");
    assert_sequence(&asm, &["_main:", "subq $0, %rsp", "addq $0, %rsp", "retq"]);
    assert_sequence(
      &asm,
      &[
        "go:",
        "pushq %rbx",
        "pushq %rbp",
        "pushq %r12",
        "pushq %r13",
        "pushq %r14",
        "pushq %r15",
        "call _main",
        "popq %r15",
        "popq %r14",
        "popq %r13",
        "popq %r12",
        "popq %rbp",
        "popq %rbx",
        "retq",
      ],
    );
  }

  #[test]
  fn memory_loads_and_stores() {
    let asm = assemble("(@main (@main 0 0\nrdi <- mem rsp 8\nmem rsp 16 <- rax\nreturn))");
    assert_sequence(&asm, &["movq 8(%rsp), %rdi", "movq %rax, 16(%rsp)"]);
  }

  #[test]
  fn shift_by_rcx_uses_cl() {
    let asm = assemble("(@main (@main 0 0\nrax <<= rcx\nrbx >>= rcx\nrdx <<= 3\nreturn))");
    assert_sequence(&asm, &["salq %cl, %rax", "sarq %cl, %rbx", "salq $3, %rdx"]);
  }

  #[test]
  fn arithmetic_mnemonics() {
    let asm = assemble(
      "(@main (@main 0 0\nrax += rbx\nrax -= 4\nrax *= rbx\nrax &= rbx\nmem rsp 0 += 8\nrdi -= mem rsp 0\nreturn))",
    );
    assert_sequence(&asm, &["addq %rbx, %rax", "subq $4, %rax", "imulq %rbx, %rax"]);
    assert_sequence(&asm, &["andq %rbx, %rax", "addq $8, 0(%rsp)", "subq 0(%rsp), %rdi"]);
  }

  #[test]
  fn compare_assignment_folds_constants() {
    let asm = assemble("(@main (@main 0 0\nrdi <- 3 < 5\nrsi <- 5 < 3\nreturn))");
    assert_sequence(&asm, &["movq $1, %rdi", "movq $0, %rsi"]);
  }

  #[test]
  fn compare_assignment_swaps_an_immediate_lhs() {
    let asm = assemble("(@main (@main 0 0 rdi <- 5 < rax return))");
    assert_sequence(&asm, &["cmpq $5, %rax", "setg %al", "movzbq %al, %rdi"]);
  }

  #[test]
  fn compare_assignment_keeps_a_register_lhs() {
    let asm = assemble("(@main (@main 0 0\nrdi <- rax <= 5\nrsi <- rbx = rcx\nreturn))");
    assert_sequence(&asm, &["cmpq $5, %rax", "setle %al", "movzbq %al, %rdi"]);
    assert_sequence(&asm, &["cmpq %rcx, %rbx", "sete %bl", "movzbq %bl, %rsi"]);
  }

  #[test]
  fn compare_jump_emits_cmp_and_jcc() {
    let asm = assemble("(@main (@main 0 0\ncjump rax < rbx :less\n:less\nreturn))");
    assert_sequence(&asm, &["cmpq %rbx, %rax", "jl _less", "_less:"]);
  }

  #[test]
  fn compare_jump_folds_constants() {
    let asm = assemble("(@main (@main 0 0\ncjump 1 < 2 :yes\ncjump 2 < 1 :no\n:yes\n:no\nreturn))");
    assert!(asm.contains("jmp _yes"));
    assert!(!asm.contains("jmp _no"));
    assert!(!asm.contains("jl"));
  }

  #[test]
  fn compare_jump_flips_when_lhs_is_immediate() {
    let asm = assemble("(@main (@main 0 0\ncjump 5 <= rax :big\n:big\nreturn))");
    assert_sequence(&asm, &["cmpq $5, %rax", "jge _big"]);
  }

  #[test]
  fn runtime_calls_dispatch_to_their_symbols() {
    let asm = assemble(
      "(@main (@main 0 0\ncall print 1\ncall input 0\ncall allocate 2\ncall tuple-error 3\nreturn))",
    );
    assert_sequence(&asm, &["call print", "call input", "call allocate", "call tuple_error"]);
  }

  #[test]
  fn tensor_error_routes_by_arity() {
    let asm = assemble(
      "(@main (@main 0 0\ncall tensor-error 1\ncall tensor-error 3\ncall tensor-error 4\nreturn))",
    );
    assert_sequence(
      &asm,
      &["call array_tensor_error_null", "call array_tensor", "call tensor_error"],
    );
  }

  #[test]
  fn user_calls_adjust_the_stack_and_jump() {
    let asm = assemble("(@main (@main 0 0\ncall @f 8\nreturn)\n(@f 8 0 return))");
    // Two stack arguments plus the return slot.
    assert_sequence(&asm, &["subq $24, %rsp", "jmp _f"]);
  }

  #[test]
  fn register_calls_jump_indirect() {
    let asm = assemble("(@main (@main 0 0\ncall rax 2\nreturn))");
    assert_sequence(&asm, &["subq $8, %rsp", "jmp *%rax"]);
  }

  #[test]
  fn return_counts_stack_arguments_past_six() {
    let six = assemble("(@main (@main 0 0 return)\n(@six 6 2 return))");
    assert_sequence(&six, &["_six:", "subq $16, %rsp", "addq $16, %rsp", "retq"]);

    let seven = assemble("(@main (@main 0 0 return)\n(@seven 7 2 return))");
    assert_sequence(&seven, &["_seven:", "subq $16, %rsp", "addq $24, %rsp", "retq"]);
  }

  #[test]
  fn label_addresses_load_as_immediates() {
    let asm = assemble("(@main (@main 0 0\n:spot\nrdi <- :spot\nrsi <- @main\nreturn))");
    assert_sequence(&asm, &["_spot:", "movq $_spot, %rdi", "movq $_main, %rsi"]);
  }

  #[test]
  fn goto_and_increment_forms() {
    let asm = assemble("(@main (@main 0 0\n:top\nrdi++\nrsi--\nrdi @ rsi rdx 8\ngoto :top\nreturn))");
    assert_sequence(
      &asm,
      &["incq %rdi", "decq %rsi", "leaq (%rsi,%rdx,8), %rdi", "jmp _top"],
    );
  }

  #[test]
  fn rsp_cannot_reach_the_low_byte_path() {
    let source = "(@main (@main 0 0 rdi <- rsp < 5 return))";
    let tree = parser::parse(source).expect("parse");
    let program = lower::lower(&tree, source).expect("lower");
    let err = generate(&program).expect_err("rsp has no 8-bit form");
    assert!(err.to_string().contains("8-bit"));
  }

  #[test]
  fn mangling_keeps_distinct_names_distinct() {
    let asm = assemble("(@main (@main 0 0\n:done\ngoto :done\nreturn)\n(@helper 0 0 return))");
    assert!(asm.contains("_main:"));
    assert!(asm.contains("_done:"));
    assert!(asm.contains("_helper:"));
    assert_eq!(asm.matches("_done:").count(), 1);
  }
}
