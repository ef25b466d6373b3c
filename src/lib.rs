//! Compile infix expressions into a flat operation list and evaluate them.
//!
//! ```
//! use exprvm::{Value, compile, evaluate};
//!
//! let program = compile("(2 + 3) * $0", false).unwrap();
//! assert_eq!(evaluate(&program, &[Value::Int(4)], None), Ok(Value::Int(20)));
//! ```

pub mod diagnostic;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod program;
pub mod resolver;
pub mod value;
pub mod vm;

pub use ops::OperatorId;
pub use parser::ParseError;
pub use program::{Operand, Operation, PathRef, Program};
pub use resolver::{LookupError, MapResolver, Resolver};
pub use value::{ExpressionType, HostObject, Opaque, Value};
pub use vm::{EvalError, evaluate, evaluate_bool, evaluate_grouped, evaluate_scalar_f64};

/// Compile `source`. With `special_syntax` the bare `>` / `>=` operators are
/// rejected, for embedding where those characters are reserved.
pub fn compile(source: &str, special_syntax: bool) -> Result<Program, ParseError> {
    compile_with_options(source, special_syntax, &[])
}

/// Compile with named argument slots: an identifier equal to
/// `slot_names[i]` reads argument `i`.
pub fn compile_with_slots(source: &str, slot_names: &[&str]) -> Result<Program, ParseError> {
    compile_with_options(source, false, slot_names)
}

/// Compile with both special syntax and named slots.
#[tracing::instrument(level = "debug", skip_all, fields(len = source.len(), special_syntax = special_syntax))]
pub fn compile_with_options(source: &str, special_syntax: bool, slot_names: &[&str]) -> Result<Program, ParseError> {
    let result = parser::parse(source, special_syntax, slot_names);
    match &result {
        Ok(program) => tracing::debug!(ops = program.len(), "compiled"),
        Err(e) => tracing::debug!(code = e.code(), error = %e, "compile failed"),
    }
    result
}
