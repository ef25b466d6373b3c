use std::io::IsTerminal;
use std::process;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use exprvm::diagnostic::{Diagnostic, ansi::AnsiRenderer, json, registry};
use exprvm::{EvalError, MapResolver, Operand, OperatorId, Program, Value};

#[derive(Parser, Debug)]
#[command(name = "exprvm")]
#[command(about = "Compile an infix expression to RPN and evaluate it")]
#[command(version)]
struct Args {
    /// Expression to evaluate, or @FILE to read it from a file
    #[arg(value_name = "EXPR", required_unless_present = "explain")]
    expr: Option<String>,

    /// Arguments bound to $0, $1, ... and to the --slot names in order
    #[arg(value_name = "ARGS", allow_negative_numbers = true)]
    args: Vec<String>,

    /// Name an argument slot (repeatable)
    #[arg(long = "slot", value_name = "NAME")]
    slots: Vec<String>,

    /// Bind a name for lookups (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_binding)]
    bindings: Vec<(String, String)>,

    /// Reject bare `>` and `>=`; use ?gt / ?ge instead
    #[arg(long)]
    special: bool,

    /// Print the compiled program instead of evaluating it
    #[arg(long, value_enum, value_name = "FORMAT")]
    emit: Option<Emit>,

    /// Print results and errors as JSON
    #[arg(long)]
    json: bool,

    /// Explain an error code, e.g. EXP-E002
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,

    /// Disable colored diagnostics
    #[arg(long)]
    no_color: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Emit {
    Rpn,
    Json,
}

fn parse_binding(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

/// Read a command-line value as a literal (`12`, `-3.5F`, `'text'`,
/// `true`, `null`); anything else is taken as a plain string.
fn parse_value(text: &str) -> Value {
    let Ok(program) = exprvm::compile(text, false) else {
        return Value::Str(text.to_string());
    };
    match program.operations() {
        [op] if op.operator == OperatorId::Set && op.unary_chain.is_empty() => match &op.operand {
            Some(Operand::Literal(v)) => v.clone(),
            _ => Value::Str(text.to_string()),
        },
        _ => Value::Str(text.to_string()),
    }
}

struct Output {
    json: bool,
    use_color: bool,
}

impl Output {
    fn fail(&self, d: Diagnostic) -> ! {
        if self.json {
            println!("{}", serde_json::json!({ "ok": false, "error": json::to_value(&d) }));
        } else {
            eprint!("{}", AnsiRenderer { use_color: self.use_color }.render(&d));
        }
        process::exit(1);
    }

    fn value(&self, v: &Value) {
        if self.json {
            println!("{}", serde_json::json!({ "ok": true, "type": v.expr_type().name(), "value": v.to_json() }));
        } else {
            println!("{v}");
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("EXPRVM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn read_source(expr: &str, out: &Output) -> String {
    let Some(path) = expr.strip_prefix('@') else {
        return expr.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(s) => s.trim_end().to_string(),
        Err(e) => out.fail(Diagnostic::error(format!("cannot read {path}: {e}"))),
    }
}

fn emit(program: &Program, format: Emit, out: &Output) {
    match format {
        Emit::Rpn => print!("{program}"),
        Emit::Json => match serde_json::to_string_pretty(program) {
            Ok(s) => println!("{s}"),
            Err(e) => out.fail(Diagnostic::error(format!("cannot serialize program: {e}"))),
        },
    }
}

fn main() {
    let args = Args::parse();
    init_logging();

    let out = Output {
        json: args.json,
        use_color: !args.no_color && std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal(),
    };

    if let Some(code) = &args.explain {
        match registry::lookup(code) {
            Some(entry) => {
                print!("{}", entry.long);
                return;
            }
            None => out.fail(Diagnostic::error(format!("unknown error code '{code}'"))),
        }
    }

    let Some(expr) = args.expr.as_deref() else {
        out.fail(Diagnostic::error("no expression given"));
    };
    let source = read_source(expr, &out);

    let slots: Vec<&str> = args.slots.iter().map(String::as_str).collect();
    let program = match exprvm::compile_with_options(&source, args.special, &slots) {
        Ok(p) => p,
        Err(e) => out.fail(Diagnostic::from(&e).with_source(source.as_str())),
    };

    if let Some(format) = args.emit {
        emit(&program, format, &out);
        return;
    }

    let mut resolver = MapResolver::new();
    for (name, value) in &args.bindings {
        resolver.set(name.as_str(), parse_value(value));
    }
    let values: Vec<Value> = args.args.iter().map(|a| parse_value(a)).collect();
    tracing::debug!(args = values.len(), bindings = resolver.len(), "evaluating");

    match exprvm::evaluate(&program, &values, Some(&resolver)) {
        Ok(Value::Error(e)) => {
            let err = EvalError::from_lookup(&e);
            out.fail(Diagnostic::from(&err).with_source(source.as_str()))
        }
        Ok(v) => out.value(&v),
        Err(e) => out.fail(Diagnostic::from(&e).with_source(source.as_str())),
    }
}
