//! Golden tests: whole emitted assembly files compared byte for byte.

fn check_golden(base: &str) {
  let src_path = format!("tests/golden/{base}.l1");
  let asm_path = format!("tests/golden/{base}.S");
  let source = std::fs::read_to_string(&src_path).expect("read .l1");
  let expected = std::fs::read_to_string(&asm_path).expect("read .S");
  let got = l1c::generate_assembly(&source).expect("compile");
  if got != expected {
    panic!("{}", format_diff(&expected, &got));
  }
}

fn format_diff(expected: &str, got: &str) -> String {
  let mut out = String::new();
  out.push_str(&format!(
    "golden mismatch: expected {} lines, got {} lines\n",
    expected.lines().count(),
    got.lines().count()
  ));
  let mut mismatches = 0usize;
  for (index, (want, have)) in expected.lines().zip(got.lines()).enumerate() {
    if want != have {
      out.push_str(&format!("  line {}: expected `{want}`, got `{have}`\n", index + 1));
      mismatches += 1;
      if mismatches >= 16 {
        out.push_str("  ... more mismatches omitted\n");
        break;
      }
    }
  }
  let (shorter, longer, whose) = if expected.lines().count() > got.lines().count() {
    (got.lines().count(), expected, "expected")
  } else {
    (expected.lines().count(), got, "got")
  };
  for line in longer.lines().skip(shorter).take(8) {
    out.push_str(&format!("  only in {whose}: `{line}`\n"));
  }
  out
}

#[test]
fn golden_smallest() {
  check_golden("smallest");
}

#[test]
fn golden_countdown() {
  check_golden("countdown");
}

#[test]
fn golden_calls() {
  check_golden("calls");
}
