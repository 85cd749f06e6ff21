use std::path::PathBuf;
use std::process;

use clap::Parser;

/// Compile an L1 source file to x86-64 assembly.
#[derive(Parser)]
#[command(name = "l1c", version, about)]
struct Args {
  /// Path to the L1 source file.
  input: PathBuf,

  /// Print the concrete parse tree to stdout.
  #[arg(long)]
  dump_tree: bool,

  /// Print the lowered program to stdout.
  #[arg(long)]
  dump_ast: bool,

  /// Where to write the generated assembly.
  #[arg(short, long, default_value = "prog.S")]
  output: PathBuf,
}

fn main() {
  env_logger::init();
  let args = Args::parse();
  if let Err(message) = run(&args) {
    eprintln!("{message}");
    process::exit(1);
  }
}

fn run(args: &Args) -> Result<(), String> {
  let source = std::fs::read_to_string(&args.input)
    .map_err(|err| format!("cannot read '{}': {err}", args.input.display()))?;

  let tree = l1c::parser::parse(&source).map_err(|err| err.to_string())?;
  if args.dump_tree {
    print!("{}", l1c::parser::dump(&tree, &source));
  }

  let program = l1c::lower::lower(&tree, &source).map_err(|err| err.to_string())?;
  if args.dump_ast {
    println!("{program}");
  }

  let assembly = l1c::render_assembly(&program).map_err(|err| err.to_string())?;
  l1c::write_assembly(&assembly, &args.output).map_err(|err| err.to_string())
}
