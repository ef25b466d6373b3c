use std::cmp::Ordering;

use serde::Serialize;

use crate::value::{ExpressionType, Value, is_instance_of};
use crate::vm::EvalError;

/// Identifies an entry in [`OPERATORS`]. Discriminants are table indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperatorId {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    Starts,
    Ends,
    InstanceOf,
    And,
    Or,
    CheckAnd,
    CheckOr,
    Not,
    BitNot,
    Neg,
    Plus,
    Bool,
}

impl OperatorId {
    pub fn def(self) -> &'static Operator {
        &OPERATORS[self as usize]
    }

    pub fn symbol(self) -> &'static str {
        self.def().symbol
    }
}

/// What the evaluator does after an operator has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The boolean chain's result is already known; jump past it.
    ShortCircuit,
}

pub type Apply = fn(&mut Value, &Value) -> Result<Step, EvalError>;

pub struct Operator {
    pub id: OperatorId,
    pub symbol: &'static str,
    /// `?word` spelling accepted by the parser, if any.
    pub word: Option<&'static str>,
    /// Run type promotion on both sides before `apply`.
    pub promotes: bool,
    /// May consume an in-band `Error` value without raising it.
    pub tolerates_error: bool,
    /// Mutates the accumulator (first argument). Unary operators ignore the
    /// second argument.
    pub apply: Apply,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("id", &self.id)
            .field("symbol", &self.symbol)
            .field("word", &self.word)
            .finish()
    }
}

const fn binary(id: OperatorId, symbol: &'static str, promotes: bool, apply: Apply) -> Operator {
    Operator {
        id,
        symbol,
        word: None,
        promotes,
        tolerates_error: false,
        apply,
    }
}

const fn compare(id: OperatorId, symbol: &'static str, word: &'static str, apply: Apply) -> Operator {
    Operator { word: Some(word), ..binary(id, symbol, true, apply) }
}

const fn unary(id: OperatorId, symbol: &'static str, tolerates_error: bool, apply: Apply) -> Operator {
    Operator {
        id,
        symbol,
        word: None,
        promotes: false,
        tolerates_error,
        apply,
    }
}

/// Every operator, indexed by `OperatorId as usize`. Built at compile time
/// and never mutated.
pub static OPERATORS: &[Operator] = &[
    Operator { tolerates_error: true, ..binary(OperatorId::Set, "set", false, op_set) },
    binary(OperatorId::Add, "+", true, op_add),
    binary(OperatorId::Sub, "-", true, op_sub),
    binary(OperatorId::Mul, "*", true, op_mul),
    binary(OperatorId::Div, "/", true, op_div),
    binary(OperatorId::Rem, "%", true, op_rem),
    binary(OperatorId::Concat, ":", false, op_concat),
    compare(OperatorId::Eq, "==", "eq", op_eq),
    compare(OperatorId::Ne, "!=", "ne", op_ne),
    compare(OperatorId::Lt, "<", "lt", op_lt),
    compare(OperatorId::Le, "<=", "le", op_le),
    compare(OperatorId::Gt, ">", "gt", op_gt),
    compare(OperatorId::Ge, ">=", "ge", op_ge),
    Operator { word: Some("contains"), ..binary(OperatorId::Contains, "contains", false, op_contains) },
    Operator { word: Some("starts"), ..binary(OperatorId::Starts, "starts", false, op_starts) },
    Operator { word: Some("ends"), ..binary(OperatorId::Ends, "ends", false, op_ends) },
    Operator { word: Some("instanceof"), ..binary(OperatorId::InstanceOf, "instanceof", false, op_instanceof) },
    Operator { tolerates_error: true, ..binary(OperatorId::And, "and", false, op_and) },
    Operator { tolerates_error: true, ..binary(OperatorId::Or, "or", false, op_or) },
    unary(OperatorId::CheckAnd, "checkAnd", true, op_check_and),
    unary(OperatorId::CheckOr, "checkOr", true, op_check_or),
    unary(OperatorId::Not, "!", true, op_not),
    unary(OperatorId::BitNot, "~", false, op_bit_not),
    unary(OperatorId::Neg, "neg", false, op_neg),
    unary(OperatorId::Plus, "pos", false, op_plus),
    unary(OperatorId::Bool, "bool", true, op_bool),
];

/// Look up a comparison by its `?word` spelling (without the `?`).
pub fn by_word(word: &str) -> Option<OperatorId> {
    OPERATORS.iter().find(|op| op.word == Some(word)).map(|op| op.id)
}

type EvalResult = Result<Step, EvalError>;

fn mismatch(operator: OperatorId, value: &Value) -> EvalError {
    EvalError::TypeMismatch { operator: operator.symbol(), operand_type: value.expr_type() }
}

fn op_set(acc: &mut Value, rhs: &Value) -> EvalResult {
    *acc = rhs.clone();
    Ok(Step::Continue)
}

// ── Arithmetic ───────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Arith {
    fn id(self) -> OperatorId {
        match self {
            Arith::Add => OperatorId::Add,
            Arith::Sub => OperatorId::Sub,
            Arith::Mul => OperatorId::Mul,
            Arith::Div => OperatorId::Div,
            Arith::Rem => OperatorId::Rem,
        }
    }
}

/// Exact i32 arithmetic; a result outside the i32 range is recomputed as
/// i64 rather than wrapped.
fn int_arith(op: Arith, a: i32, b: i32) -> Result<Value, EvalError> {
    let r = match op {
        Arith::Add => a.checked_add(b),
        Arith::Sub => a.checked_sub(b),
        Arith::Mul => a.checked_mul(b),
        Arith::Div | Arith::Rem if b == 0 => return Err(EvalError::DivideByZero),
        Arith::Div => a.checked_div(b),
        Arith::Rem => a.checked_rem(b),
    };
    match r {
        Some(n) => Ok(Value::Int(n)),
        None => long_arith(op, a as i64, b as i64),
    }
}

fn long_arith(op: Arith, a: i64, b: i64) -> Result<Value, EvalError> {
    let r = match op {
        Arith::Add => a.checked_add(b),
        Arith::Sub => a.checked_sub(b),
        Arith::Mul => a.checked_mul(b),
        Arith::Div | Arith::Rem if b == 0 => return Err(EvalError::DivideByZero),
        Arith::Div => a.checked_div(b),
        Arith::Rem => a.checked_rem(b),
    };
    r.map(Value::Long).ok_or(EvalError::Overflow { operator: op.id().symbol() })
}

fn float_arith(op: Arith, a: f64, b: f64) -> f64 {
    match op {
        Arith::Add => a + b,
        Arith::Sub => a - b,
        Arith::Mul => a * b,
        Arith::Div => a / b,
        Arith::Rem => a % b,
    }
}

fn arith(op: Arith, acc: &mut Value, rhs: &Value) -> EvalResult {
    let (l, r) = numeric_pair(acc, rhs);
    let result = match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b)?,
        (Value::Long(a), Value::Long(b)) => long_arith(op, *a, *b)?,
        (Value::Float(a), Value::Float(b)) => {
            Value::Float(float_arith(op, *a as f64, *b as f64) as f32)
        }
        (Value::Double(a), Value::Double(b)) => Value::Double(float_arith(op, *a, *b)),
        (Value::Str(a), Value::Str(b)) if matches!(op, Arith::Add) => Value::Str(format!("{a}{b}")),
        (Value::Str(_) | Value::Unset | Value::Bool(_) | Value::Opaque(_) | Value::Error(_), _) => {
            return Err(mismatch(op.id(), acc));
        }
        _ => return Err(mismatch(op.id(), rhs)),
    };
    *acc = result;
    Ok(Step::Continue)
}

/// Copies of both sides brought to their common numeric type. Non-numeric
/// pairs come back unchanged.
fn numeric_pair(acc: &Value, rhs: &Value) -> (Value, Value) {
    let (mut l, mut r) = (acc.clone(), rhs.clone());
    let (lt, rt) = (l.expr_type(), r.expr_type());
    if lt.is_numeric() && rt.is_numeric() && lt != rt {
        let wider = lt.max(rt);
        l.convert_to(wider);
        r.convert_to(wider);
    }
    (l, r)
}

fn op_add(acc: &mut Value, rhs: &Value) -> EvalResult {
    arith(Arith::Add, acc, rhs)
}

fn op_sub(acc: &mut Value, rhs: &Value) -> EvalResult {
    arith(Arith::Sub, acc, rhs)
}

fn op_mul(acc: &mut Value, rhs: &Value) -> EvalResult {
    arith(Arith::Mul, acc, rhs)
}

fn op_div(acc: &mut Value, rhs: &Value) -> EvalResult {
    arith(Arith::Div, acc, rhs)
}

fn op_rem(acc: &mut Value, rhs: &Value) -> EvalResult {
    arith(Arith::Rem, acc, rhs)
}

fn op_concat(acc: &mut Value, rhs: &Value) -> EvalResult {
    *acc = Value::Str(format!("{acc}{rhs}"));
    Ok(Step::Continue)
}

// ── Comparison ───────────────────────────────────────────────────────

/// Relative tolerance used for floating-point equality.
fn floats_equal(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() < a.abs() / 1e5
}

fn equals(acc: &Value, rhs: &Value) -> bool {
    let (l, r) = numeric_pair(acc, rhs);
    match (&l, &r) {
        (Value::Float(a), Value::Float(b)) => floats_equal(*a as f64, *b as f64),
        (Value::Double(a), Value::Double(b)) => floats_equal(*a, *b),
        _ => l == r,
    }
}

fn ordering(id: OperatorId, acc: &Value, rhs: &Value) -> Result<Option<Ordering>, EvalError> {
    let (l, r) = numeric_pair(acc, rhs);
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
        (Value::Long(a), Value::Long(b)) => Ok(Some(a.cmp(b))),
        (Value::Float(a), Value::Float(b)) => Ok(a.partial_cmp(b)),
        (Value::Double(a), Value::Double(b)) => Ok(a.partial_cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
        (Value::Opaque(_) | Value::Unset | Value::Error(_), _) => Err(mismatch(id, acc)),
        _ => Err(mismatch(id, rhs)),
    }
}

fn op_eq(acc: &mut Value, rhs: &Value) -> EvalResult {
    *acc = Value::Bool(equals(acc, rhs));
    Ok(Step::Continue)
}

fn op_ne(acc: &mut Value, rhs: &Value) -> EvalResult {
    *acc = Value::Bool(!equals(acc, rhs));
    Ok(Step::Continue)
}

fn op_lt(acc: &mut Value, rhs: &Value) -> EvalResult {
    let ord = ordering(OperatorId::Lt, acc, rhs)?;
    *acc = Value::Bool(ord == Some(Ordering::Less));
    Ok(Step::Continue)
}

fn op_le(acc: &mut Value, rhs: &Value) -> EvalResult {
    let ord = ordering(OperatorId::Le, acc, rhs)?;
    *acc = Value::Bool(matches!(ord, Some(Ordering::Less | Ordering::Equal)));
    Ok(Step::Continue)
}

fn op_gt(acc: &mut Value, rhs: &Value) -> EvalResult {
    let ord = ordering(OperatorId::Gt, acc, rhs)?;
    *acc = Value::Bool(ord == Some(Ordering::Greater));
    Ok(Step::Continue)
}

/// On strings `>=` tests whether the accumulator starts with the operand.
fn op_ge(acc: &mut Value, rhs: &Value) -> EvalResult {
    if let (Value::Str(a), Value::Str(b)) = (&*acc, rhs) {
        *acc = Value::Bool(a.starts_with(b.as_str()));
        return Ok(Step::Continue);
    }
    let ord = ordering(OperatorId::Ge, acc, rhs)?;
    *acc = Value::Bool(matches!(ord, Some(Ordering::Greater | Ordering::Equal)));
    Ok(Step::Continue)
}

// ── String predicates ────────────────────────────────────────────────

fn string_predicate(acc: &mut Value, rhs: &Value, test: fn(&str, &str) -> bool) -> EvalResult {
    let haystack = acc.to_string();
    let needle = rhs.to_string();
    *acc = Value::Bool(test(&haystack, &needle));
    Ok(Step::Continue)
}

fn op_contains(acc: &mut Value, rhs: &Value) -> EvalResult {
    string_predicate(acc, rhs, |h, n| h.contains(n))
}

fn op_starts(acc: &mut Value, rhs: &Value) -> EvalResult {
    string_predicate(acc, rhs, |h, n| h.starts_with(n))
}

fn op_ends(acc: &mut Value, rhs: &Value) -> EvalResult {
    string_predicate(acc, rhs, |h, n| h.ends_with(n))
}

fn op_instanceof(acc: &mut Value, rhs: &Value) -> EvalResult {
    let Value::Str(category) = rhs else {
        return Err(mismatch(OperatorId::InstanceOf, rhs));
    };
    *acc = Value::Bool(is_instance_of(acc, category));
    Ok(Step::Continue)
}

// ── Boolean ──────────────────────────────────────────────────────────

fn op_and(acc: &mut Value, rhs: &Value) -> EvalResult {
    *acc = Value::Bool(acc.truthy() && rhs.truthy());
    Ok(Step::Continue)
}

fn op_or(acc: &mut Value, rhs: &Value) -> EvalResult {
    *acc = Value::Bool(acc.truthy() || rhs.truthy());
    Ok(Step::Continue)
}

fn op_check_and(acc: &mut Value, _: &Value) -> EvalResult {
    let b = acc.truthy();
    *acc = Value::Bool(b);
    Ok(if b { Step::Continue } else { Step::ShortCircuit })
}

fn op_check_or(acc: &mut Value, _: &Value) -> EvalResult {
    let b = acc.truthy();
    *acc = Value::Bool(b);
    Ok(if b { Step::ShortCircuit } else { Step::Continue })
}

// ── Unary ────────────────────────────────────────────────────────────

fn op_not(v: &mut Value, _: &Value) -> EvalResult {
    *v = Value::Bool(!v.truthy());
    Ok(Step::Continue)
}

fn op_bit_not(v: &mut Value, _: &Value) -> EvalResult {
    *v = match &*v {
        Value::Int(n) => Value::Int(!n),
        Value::Long(n) => Value::Long(!n),
        Value::Bool(b) => Value::Bool(!b),
        other => return Err(mismatch(OperatorId::BitNot, other)),
    };
    Ok(Step::Continue)
}

fn op_neg(v: &mut Value, _: &Value) -> EvalResult {
    *v = match &*v {
        Value::Int(n) => n.checked_neg().map_or(Value::Long(-(*n as i64)), Value::Int),
        Value::Long(n) => Value::Long(
            n.checked_neg().ok_or(EvalError::Overflow { operator: OperatorId::Neg.symbol() })?,
        ),
        Value::Float(x) => Value::Float(-x),
        Value::Double(x) => Value::Double(-x),
        other => return Err(mismatch(OperatorId::Neg, other)),
    };
    Ok(Step::Continue)
}

fn op_plus(v: &mut Value, _: &Value) -> EvalResult {
    if v.expr_type().is_numeric() {
        Ok(Step::Continue)
    } else {
        Err(mismatch(OperatorId::Plus, v))
    }
}

fn op_bool(v: &mut Value, _: &Value) -> EvalResult {
    *v = Value::Bool(v.truthy());
    Ok(Step::Continue)
}

/// Whether an operator with this type on either side needs the value's
/// content, i.e. would have to raise a carried lookup failure.
pub fn consumes(op: &Operator, ty: ExpressionType) -> bool {
    ty == ExpressionType::Error && !op.tolerates_error
}
