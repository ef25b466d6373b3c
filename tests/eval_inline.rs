use std::io::Write;
use std::process::{Command, Output};

fn exprvm() -> Command {
    Command::new(env!("CARGO_BIN_EXE_exprvm"))
}

fn run(args: &[&str]) -> Output {
    exprvm().args(args).output().expect("failed to run exprvm")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).trim_end().to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

fn json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).expect("valid JSON on stdout")
}

// --- Evaluation ---

#[test]
fn inline_precedence() {
    let out = run(&["2+3*4"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "14");
    assert_eq!(stdout(&run(&["(2+3)*4"])), "20");
}

#[test]
fn inline_positional_args() {
    let out = run(&["$0 * $1", "6", "7"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "42");
    assert_eq!(stdout(&run(&["$0 + 1", "-5"])), "-4");
    assert_eq!(stdout(&run(&["$0 : '!'", "hi"])), "hi!");
}

#[test]
fn inline_named_slots() {
    assert_eq!(stdout(&run(&["--slot", "X", "--slot", "Y", "X / Y", "7", "2"])), "3");
    assert_eq!(stdout(&run(&["--slot", "X", "--slot", "Y", "X / Y", "7.0", "2"])), "3.5");
}

#[test]
fn inline_missing_arg_fails() {
    let out = run(&["$0 + $1", "1"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("EXP-E006"), "stderr: {}", stderr(&out));
}

#[test]
fn inline_bindings_resolve_paths() {
    let out = run(&["--set", "order.price=9.5", "--set", "qty=2", "order.price * qty"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "19.0");
}

#[test]
fn inline_bad_binding_is_rejected_by_clap() {
    let out = run(&["--set", "novalue", "1"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("NAME=VALUE"), "stderr: {}", stderr(&out));
}

#[test]
fn inline_failed_lookup_is_false_in_boolean_context() {
    assert_eq!(stdout(&run(&["missing && true"])), "false");
    assert_eq!(stdout(&run(&["missing || 1 < 2"])), "true");
    let out = run(&["missing + 1"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("error[EXP-E007]"), "stderr: {}", stderr(&out));
}

#[test]
fn inline_failed_lookup_as_result_fails() {
    let out = run(&["missing"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("error[EXP-E007]"), "stderr: {}", stderr(&out));
    assert!(stdout(&out).is_empty());

    let out = run(&["--json", "missing"]);
    assert_eq!(out.status.code(), Some(1));
    let v = json(&out);
    assert_eq!(v["ok"], false);
    assert_eq!(v["error"]["code"], "EXP-E007");
}

#[test]
fn inline_short_circuit_skips_division() {
    let out = run(&["false && (1/0)"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "false");
    let out = run(&["1/0"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("division by zero"));
}

#[test]
fn inline_string_predicates() {
    assert_eq!(stdout(&run(&["'hello' ?starts 'he' && 'hello' ?ends 'lo'"])), "true");
}

// --- Special syntax ---

#[test]
fn special_syntax_rejects_greater() {
    let out = run(&["--special", "--no-color", "a > b"]);
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("error[EXP-P001]"), "stderr: {err}");
    assert!(err.contains("?gt"), "stderr: {err}");
    assert!(run(&["--special", "2 ?gt 1"]).status.success());
}

// --- Diagnostics ---

#[test]
fn parse_error_shows_snippet() {
    let out = run(&["--no-color", "(1 + 2"]);
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("error[EXP-P002]"), "stderr: {err}");
    assert!(err.contains("--> 1:1"), "stderr: {err}");
    assert!(err.contains("(1 + 2"), "stderr: {err}");
    assert!(err.contains("input ends before the matching ')'"), "stderr: {err}");
    assert!(!err.contains("\x1b["), "unexpected ANSI codes: {err}");
}

#[test]
fn json_result() {
    let out = run(&["--json", "1 + 2.0"]);
    assert!(out.status.success());
    let v = json(&out);
    assert_eq!(v["ok"], true);
    assert_eq!(v["type"], "double");
    assert_eq!(v["value"], 3.0);
}

#[test]
fn json_error() {
    let out = run(&["--json", "1/0"]);
    assert!(!out.status.success());
    let v = json(&out);
    assert_eq!(v["ok"], false);
    assert_eq!(v["error"]["code"], "EXP-E002");
    assert!(v["error"]["suggestion"].as_str().is_some());
}

#[test]
fn json_parse_error_has_location() {
    let v = json(&run(&["--json", "1 + 12x"]));
    assert_eq!(v["error"]["code"], "EXP-P004");
    assert_eq!(v["error"]["labels"][0]["col"], 5);
}

#[test]
fn explain_known_code() {
    let out = run(&["--explain", "EXP-E007"]);
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("## EXP-E007"));
}

#[test]
fn explain_unknown_code_fails() {
    let out = run(&["--explain", "EXP-Z999"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("unknown error code"));
}

// --- Emit ---

#[test]
fn emit_rpn_listing() {
    let out = run(&["--emit", "rpn", "2+3*4"]);
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8_lossy(&out.stdout),
        "  0  set 2\n  1  set 3\n  2  * 4\n  3  + <stack>\n"
    );
}

#[test]
fn emit_rpn_shows_jump_targets() {
    let out = run(&["--emit", "rpn", "a && b || c"]);
    let listing = String::from_utf8_lossy(&out.stdout).to_string();
    assert!(listing.contains("checkAnd -> 3"), "listing:\n{listing}");
    assert!(listing.contains("checkOr -> 5"), "listing:\n{listing}");
}

#[test]
fn emit_json_program() {
    let out = run(&["--emit", "json", "$0 + 1"]);
    assert!(out.status.success());
    let v = json(&out);
    assert_eq!(v["source"], "$0 + 1");
    assert_eq!(v["ops"][0]["operand"]["ArgSlot"], 0);
    assert_eq!(v["ops"][1]["operator"], "Add");
}

// --- Files and logging ---

#[test]
fn expression_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "$0 > 10 &&\n  $0 < 20").expect("write");
    let arg = format!("@{}", file.path().display());
    assert_eq!(stdout(&run(&[&arg, "15"])), "true");
    assert_eq!(stdout(&run(&[&arg, "25"])), "false");
}

#[test]
fn missing_file_fails() {
    let out = run(&["@/definitely/not/here.expr"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("cannot read"));
}

#[test]
fn log_level_from_env() {
    let out = exprvm().env("EXPRVM_LOG", "debug").args(["1 + 1"]).output().expect("failed to run exprvm");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "2");
    assert!(stderr(&out).contains("compiled"), "stderr: {}", stderr(&out));

    let quiet = run(&["1 + 1"]);
    assert!(!stderr(&quiet).contains("compiled"));
}
