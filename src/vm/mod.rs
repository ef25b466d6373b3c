use crate::ops::{self, OperatorId, Step};
use crate::program::{Operand, Operation, PathRef, Program};
use crate::resolver::{LookupError, Resolver};
use crate::parser::MAX_DEPTH;
use crate::value::{ExpressionType, Value, promote};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("operator '{operator}' does not accept {operand_type}")]
    TypeMismatch { operator: &'static str, operand_type: ExpressionType },
    #[error("division by zero")]
    DivideByZero,
    #[error("'{operator}' overflowed a 64-bit integer")]
    Overflow { operator: &'static str },
    #[error("operand stack empty at operation {ip}")]
    StackUnderflow { ip: usize },
    #[error("operation {ip} short-circuits but has no jump target")]
    MissingJumpTarget { ip: usize },
    #[error("argument slot {index} was not supplied")]
    ArgumentOutOfRange { index: usize },
    #[error("lookup of '{name}' failed and its value was used")]
    PropagatedLookupFailure { name: String },
    #[error("invoking '{path}' failed: {cause}")]
    ResolverInvocationFailed { path: String, cause: String },
    #[error("sub-expressions nested deeper than {} levels", MAX_DEPTH)]
    RecursionLimit,
}

impl EvalError {
    /// The error raised when a carried lookup failure is consumed.
    pub fn from_lookup(e: &LookupError) -> Self {
        match e {
            LookupError::InvocationFailed { path, cause } => {
                EvalError::ResolverInvocationFailed { path: path.clone(), cause: cause.clone() }
            }
            other => EvalError::PropagatedLookupFailure { name: other.name().to_string() },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EvalError::TypeMismatch { .. } => "EXP-E001",
            EvalError::DivideByZero => "EXP-E002",
            EvalError::Overflow { .. } => "EXP-E003",
            EvalError::StackUnderflow { .. } => "EXP-E004",
            EvalError::MissingJumpTarget { .. } => "EXP-E005",
            EvalError::ArgumentOutOfRange { .. } => "EXP-E006",
            EvalError::PropagatedLookupFailure { .. } => "EXP-E007",
            EvalError::ResolverInvocationFailed { .. } => "EXP-E008",
            EvalError::RecursionLimit => "EXP-E009",
        }
    }
}

type EvalResult<T> = Result<T, EvalError>;

/// Evaluate `program` with one flat argument array.
pub fn evaluate(program: &Program, args: &[Value], resolver: Option<&dyn Resolver>) -> EvalResult<Value> {
    evaluate_grouped(program, &[args], resolver)
}

/// Evaluate with arguments split over several arrays. Slot indices run
/// across the groups in order: with groups `[a, b]` and `[c]`, slot 2 is `c`.
#[tracing::instrument(level = "debug", skip_all, fields(ops = program.len()))]
pub fn evaluate_grouped(
    program: &Program,
    groups: &[&[Value]],
    resolver: Option<&dyn Resolver>,
) -> EvalResult<Value> {
    let mut machine = Machine { groups, resolver, depth: 0 };
    let result = machine.run(program, ExpressionType::Unset);
    match &result {
        Ok(v) => tracing::debug!(result = %v, "evaluated"),
        Err(e) => tracing::debug!(error = %e, "evaluation failed"),
    }
    result
}

/// Evaluate and coerce the result with the `bool` operator.
pub fn evaluate_bool(program: &Program, args: &[Value], resolver: Option<&dyn Resolver>) -> EvalResult<bool> {
    Ok(evaluate(program, args, resolver)?.truthy())
}

/// Evaluate a single-variable program with `x` in slot 0. Any error, or a
/// non-numeric result, gives `NaN`.
pub fn evaluate_scalar_f64(program: &Program, x: f64) -> f64 {
    match evaluate(program, &[Value::Double(x)], None) {
        Ok(v) => v.as_f64().unwrap_or(f64::NAN),
        Err(e) => {
            tracing::debug!(error = %e, "scalar evaluation failed");
            f64::NAN
        }
    }
}

/// Per-evaluation context. Accumulator and operand stack live in
/// [`Machine::run`] frames, so nothing here is shared between calls.
struct Machine<'a> {
    groups: &'a [&'a [Value]],
    resolver: Option<&'a dyn Resolver>,
    depth: usize,
}

impl<'a> Machine<'a> {
    /// Run `program` with `seed` as the type its first term starts from.
    fn run(&mut self, program: &Program, seed: ExpressionType) -> EvalResult<Value> {
        let ops = program.operations();
        let mut acc = Value::Unset;
        let mut stack: Vec<Value> = Vec::new();
        // Type a fresh term starts from after `set` pushed the accumulator.
        let mut seed = seed;
        let mut determined = false;
        let mut ip = 0;

        while ip < ops.len() {
            let op = &ops[ip];
            tracing::trace!(ip, operator = ?op.operator, acc = %acc, "step");

            // A nested operand starts from the type of the term it joins.
            let outer = if op.operator == OperatorId::Set && !determined { seed } else { acc.expr_type() };
            let mut rhs = match &op.operand {
                None => Value::Unset,
                Some(Operand::StackTop) => {
                    let left = stack.pop().ok_or(EvalError::StackUnderflow { ip })?;
                    std::mem::replace(&mut acc, left)
                }
                Some(operand) => self.fetch(operand, outer)?,
            };
            apply_unary_chain(op, &mut rhs)?;

            let step = if op.operator == OperatorId::Set {
                if determined {
                    let outer = std::mem::replace(&mut acc, Value::Unset);
                    seed = outer.expr_type();
                    stack.push(outer);
                }
                if seed.is_numeric() && rhs.expr_type().is_numeric() {
                    promote(seed, &mut rhs);
                }
                seed = ExpressionType::Unset;
                (op.operator.def().apply)(&mut acc, &rhs)?
            } else {
                combine(op, &mut acc, rhs)?
            };
            determined = true;

            ip = match step {
                Step::Continue => ip + 1,
                Step::ShortCircuit => {
                    let target = op.short_circuit_target.ok_or(EvalError::MissingJumpTarget { ip })?;
                    if target > ops.len() {
                        return Err(EvalError::MissingJumpTarget { ip });
                    }
                    target
                }
            };
        }

        Ok(acc)
    }

    fn fetch(&mut self, operand: &Operand, outer: ExpressionType) -> EvalResult<Value> {
        match operand {
            Operand::Literal(v) => Ok(v.clone()),
            Operand::ArgSlot(index) => self.slot(*index),
            Operand::External(path) => self.external(path),
            Operand::Nested(program) => self.nested(program, outer),
            Operand::StackTop => unreachable!("stack operands are popped by run"),
        }
    }

    fn slot(&self, index: usize) -> EvalResult<Value> {
        let mut rest = index;
        for group in self.groups {
            if rest < group.len() {
                return Ok(group[rest].clone());
            }
            rest -= group.len();
        }
        Err(EvalError::ArgumentOutOfRange { index })
    }

    fn nested(&mut self, program: &Program, outer: ExpressionType) -> EvalResult<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::RecursionLimit);
        }
        self.depth += 1;
        let result = self.run(program, outer);
        self.depth -= 1;
        result
    }

    /// Look up or invoke a path. Resolver failures come back as
    /// `Value::Error`; only errors inside call arguments abort here.
    fn external(&mut self, path: &PathRef) -> EvalResult<Value> {
        let Some(resolver) = self.resolver else {
            return Ok(self.soft_fail(LookupError::NotFound { name: path.path.clone() }));
        };
        let result = match &path.call {
            None => resolver.resolve(&path.path),
            Some(arg_programs) => {
                let mut args = Vec::with_capacity(arg_programs.len());
                for p in arg_programs {
                    args.push(self.nested(p, ExpressionType::Unset)?);
                }
                resolver.invoke(&path.path, &args)
            }
        };
        Ok(result.unwrap_or_else(|e| self.soft_fail(e)))
    }

    fn soft_fail(&self, e: LookupError) -> Value {
        tracing::debug!(error = %e, "lookup failed, carrying error value");
        Value::Error(e)
    }
}

/// Run a non-`set` operator: raise carried lookup failures it cannot
/// tolerate, promote, then apply.
fn combine(op: &Operation, acc: &mut Value, mut rhs: Value) -> EvalResult<Step> {
    let def = op.operator.def();
    for side in [&*acc, &rhs] {
        if ops::consumes(def, side.expr_type()) {
            if let Some(e) = side.lookup_failure() {
                return Err(EvalError::from_lookup(e));
            }
        }
    }
    if def.promotes {
        let before = acc.expr_type();
        let after = promote(before, &mut rhs);
        if after != before {
            acc.convert_to(after);
        }
    }
    (def.apply)(acc, &rhs)
}

/// Apply prefix operators innermost first, i.e. the last one written runs
/// first.
fn apply_unary_chain(op: &Operation, rhs: &mut Value) -> EvalResult<()> {
    for u in op.unary_chain.iter().rev() {
        let def = u.def();
        if ops::consumes(def, rhs.expr_type()) {
            if let Some(e) = rhs.lookup_failure() {
                return Err(EvalError::from_lookup(e));
            }
        }
        (def.apply)(rhs, &Value::Unset)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::resolver::MapResolver;

    fn eval(src: &str) -> EvalResult<Value> {
        let program = parser::parse(src, false, &[]).unwrap();
        evaluate(&program, &[], None)
    }

    fn eval_with(src: &str, resolver: &MapResolver) -> EvalResult<Value> {
        let program = parser::parse(src, false, &[]).unwrap();
        evaluate(&program, &[], Some(resolver))
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("2+3*4"), Ok(Value::Int(14)));
        assert_eq!(eval("(2+3)*4"), Ok(Value::Int(20)));
        assert_eq!(eval("2-3*4"), Ok(Value::Int(-10)));
        assert_eq!(eval("20/(2+3)"), Ok(Value::Int(4)));
        assert_eq!(eval("10-2-3"), Ok(Value::Int(5)));
        assert_eq!(eval("2*3+4*5"), Ok(Value::Int(26)));
    }

    #[test]
    fn short_circuit_skips_division_by_zero() {
        assert_eq!(eval("false && (1/0)"), Ok(Value::Bool(false)));
        assert_eq!(eval("true || (1/0)"), Ok(Value::Bool(true)));
        assert_eq!(eval("true && (1/0)"), Err(EvalError::DivideByZero));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(eval("false && true || true"), Ok(Value::Bool(true)));
        assert_eq!(eval("true || false && false"), Ok(Value::Bool(true)));
        assert_eq!(eval("false || true && false"), Ok(Value::Bool(false)));
        assert_eq!(eval("1 < 2 && 3 < 4"), Ok(Value::Bool(true)));
        assert_eq!(eval("1 > 2 || 3 > 4 || 5 > 4"), Ok(Value::Bool(true)));
    }

    #[test]
    fn short_circuit_inside_a_group_returns_to_outer_term() {
        assert_eq!(eval("(false && 1/0) || true"), Ok(Value::Bool(true)));
        assert_eq!(eval("'r:' : (false && x)"), Ok(Value::Str("r:false".into())));
    }

    #[test]
    fn promotion() {
        assert_eq!(eval("1 + 2.0"), Ok(Value::Double(3.0)));
        assert_eq!(eval("1 + 2.5F"), Ok(Value::Float(3.5)));
        assert_eq!(eval("'n=' + 4"), Ok(Value::Str("n=4".into())));
        assert_eq!(eval("4 + 'x'"), Ok(Value::Str("4x".into())));
    }

    #[test]
    fn numeric_term_inherits_outer_type() {
        // the parenthesised term starts from the accumulator's double type
        assert_eq!(eval("1.0 + (7/2)"), Ok(Value::Double(4.5)));
        assert_eq!(eval("1 + (7/2)"), Ok(Value::Int(4)));
        // a unary prefix turns the group into a nested program; it still
        // starts from the outer type
        assert_eq!(eval("1.0 + +(7/2)"), Ok(Value::Double(4.5)));
        assert_eq!(eval("1.0 + -(7/2)"), Ok(Value::Double(-2.5)));
        assert_eq!(eval("2.0 * -(7/2)"), Ok(Value::Double(-7.0)));
        assert_eq!(eval("1 + -(7/2)"), Ok(Value::Int(-2)));
        assert_eq!(eval("'n' : -(7/2)"), Ok(Value::Str("n-3".into())));
    }

    #[test]
    fn float_tolerance() {
        assert_eq!(eval("1.0000001 == 1.0000002"), Ok(Value::Bool(true)));
        assert_eq!(eval("1.0 == 1.1"), Ok(Value::Bool(false)));
        assert_eq!(eval("3 == 3.0"), Ok(Value::Bool(true)));
    }

    #[test]
    fn string_predicates() {
        assert_eq!(eval("'hello' ?starts 'he'"), Ok(Value::Bool(true)));
        assert_eq!(eval("'hello' ?ends 'lo'"), Ok(Value::Bool(true)));
        assert_eq!(eval("'hello' ?contains 'ell'"), Ok(Value::Bool(true)));
        assert_eq!(eval("'hello' ?contains 'xyz'"), Ok(Value::Bool(false)));
    }

    #[test]
    fn string_ge_is_starts_with() {
        assert_eq!(eval("'apple' >= 'app'"), Ok(Value::Bool(true)));
        assert_eq!(eval("'banana' >= 'apple'"), Ok(Value::Bool(false)));
        assert_eq!(eval("'banana' ?gt 'apple'"), Ok(Value::Bool(true)));
        assert_eq!(eval("'apple' <= 'banana'"), Ok(Value::Bool(true)));
    }

    #[test]
    fn unary_operators_apply_to_operand() {
        assert_eq!(eval("-(2+3)"), Ok(Value::Int(-5)));
        assert_eq!(eval("10 - -3"), Ok(Value::Int(13)));
        assert_eq!(eval("!true || !false"), Ok(Value::Bool(true)));
        assert_eq!(eval("~0"), Ok(Value::Int(-1)));
        assert_eq!(eval("!!1"), Ok(Value::Bool(true)));
        assert_eq!(eval("2 * -(1 + 1)"), Ok(Value::Int(-4)));
    }

    #[test]
    fn instanceof_uses_compatibility_table() {
        assert_eq!(eval("5 ?instanceof Long"), Ok(Value::Bool(true)));
        assert_eq!(eval("5L ?instanceof Integer"), Ok(Value::Bool(false)));
        assert_eq!(eval("'s' ?instanceof java.lang.String"), Ok(Value::Bool(true)));
        assert_eq!(eval("2.0 ?instanceof 'Number'"), Ok(Value::Bool(true)));
    }

    #[test]
    fn resolver_soft_failure() {
        let r = MapResolver::new();
        assert_eq!(eval_with("missing && true", &r), Ok(Value::Bool(false)));
        assert_eq!(eval_with("!missing", &r), Ok(Value::Bool(true)));
        assert_eq!(
            eval_with("missing + 1", &r),
            Err(EvalError::PropagatedLookupFailure { name: "missing".into() })
        );
        assert_eq!(
            eval_with("1 + missing", &r),
            Err(EvalError::PropagatedLookupFailure { name: "missing".into() })
        );
        assert_eq!(
            eval("missing == 1"),
            Err(EvalError::PropagatedLookupFailure { name: "missing".into() })
        );
    }

    #[test]
    fn resolver_values_and_invocations() {
        let mut r = MapResolver::new().with("order.total", Value::Double(40.0)).with("qty", Value::Int(3));
        r.register("max", |args| {
            args.iter().filter_map(Value::as_i64).max().map(Value::Long).ok_or_else(|| "empty".to_string())
        });
        assert_eq!(eval_with("order.total / qty", &r), Ok(Value::Double(40.0 / 3.0)));
        assert_eq!(eval_with("max(qty, 10, 2*3) + 1", &r), Ok(Value::Long(11)));
        assert_eq!(
            eval_with("max() + 1", &r),
            Err(EvalError::ResolverInvocationFailed { path: "max".into(), cause: "empty".into() })
        );
        assert_eq!(eval_with("max() || true", &r), Ok(Value::Bool(true)));
    }

    #[derive(Default)]
    struct CountingResolver {
        calls: std::cell::Cell<usize>,
    }

    impl Resolver for CountingResolver {
        fn resolve(&self, _: &str) -> Result<Value, LookupError> {
            self.calls.set(self.calls.get() + 1);
            Ok(Value::Bool(true))
        }

        fn invoke(&self, path: &str, _: &[Value]) -> Result<Value, LookupError> {
            Err(LookupError::NotFound { name: path.to_string() })
        }
    }

    #[test]
    fn skipped_operands_are_never_resolved() {
        let r = CountingResolver::default();
        let program = parser::parse("a || b || c", false, &[]).unwrap();
        assert_eq!(evaluate(&program, &[], Some(&r)), Ok(Value::Bool(true)));
        assert_eq!(r.calls.get(), 1);
    }

    #[test]
    fn argument_slots_flatten_across_groups() {
        let program = parser::parse("$0 + $2 * $3", false, &[]).unwrap();
        let first = [Value::Int(1), Value::Int(100)];
        let second = [Value::Int(2), Value::Int(5)];
        assert_eq!(evaluate_grouped(&program, &[&first, &second], None), Ok(Value::Int(11)));
        assert_eq!(
            evaluate(&program, &first, None),
            Err(EvalError::ArgumentOutOfRange { index: 2 })
        );
    }

    #[test]
    fn named_slots() {
        let program = parser::parse("X * X + 1", false, &["X"]).unwrap();
        assert_eq!(evaluate_scalar_f64(&program, 3.0), 10.0);
        let program = parser::parse("X / 0", false, &["X"]).unwrap();
        assert!(evaluate_scalar_f64(&program, 3.0).is_infinite());
        let program = parser::parse("'a' : X", false, &["X"]).unwrap();
        assert!(evaluate_scalar_f64(&program, 3.0).is_nan());
    }

    #[test]
    fn evaluate_bool_coerces() {
        let program = parser::parse("$0 + 1", false, &[]).unwrap();
        assert_eq!(evaluate_bool(&program, &[Value::Int(0)], None), Ok(true));
        assert_eq!(evaluate_bool(&program, &[Value::Int(-1)], None), Ok(false));
    }

    #[test]
    fn malformed_programs_report_instead_of_panicking() {
        let pop = Program::new(
            "",
            vec![Operation::new(OperatorId::Add, Some(Operand::StackTop))],
        );
        assert_eq!(evaluate(&pop, &[], None), Err(EvalError::StackUnderflow { ip: 0 }));

        let jump = Program::new(
            "",
            vec![
                Operation::set(Operand::Literal(Value::Bool(false))),
                Operation::new(OperatorId::CheckAnd, None),
            ],
        );
        assert_eq!(evaluate(&jump, &[], None), Err(EvalError::MissingJumpTarget { ip: 1 }));
    }

    fn nest(levels: usize) -> Program {
        let mut program = Program::new("1", vec![Operation::set(Operand::Literal(Value::Int(1)))]);
        for _ in 0..levels {
            program = Program::new("-(1)", vec![Operation::set(Operand::Nested(program))]);
        }
        program
    }

    #[test]
    fn nested_evaluation_depth_is_bounded() {
        assert_eq!(evaluate(&nest(MAX_DEPTH), &[], None), Ok(Value::Int(1)));
        let deep = nest(MAX_DEPTH + 1);
        assert_eq!(evaluate(&deep, &[], None), Err(EvalError::RecursionLimit));
        assert_eq!(EvalError::RecursionLimit.code(), "EXP-E009");
    }

    #[test]
    fn literals_are_not_mutated_by_unary_chain() {
        let program = parser::parse("-$0 + -(5)", false, &[]).unwrap();
        assert_eq!(evaluate(&program, &[Value::Int(1)], None), Ok(Value::Int(-6)));
        assert_eq!(evaluate(&program, &[Value::Int(1)], None), Ok(Value::Int(-6)));
    }

    #[test]
    fn concurrent_evaluation_of_one_program() {
        let program = parser::parse("$0 * 2 + 1", false, &[]).unwrap();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let program = &program;
                    s.spawn(move || evaluate(program, &[Value::Int(i)], None))
                })
                .collect();
            for (i, h) in handles.into_iter().enumerate() {
                assert_eq!(h.join().unwrap(), Ok(Value::Int(i as i32 * 2 + 1)));
            }
        });
    }
}
