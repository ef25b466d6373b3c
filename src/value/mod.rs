use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::resolver::LookupError;

/// Promotion tag of a value.
///
/// Numeric variants are declared narrowest first so that `Ord` gives the
/// widening order `Int < Long < Float < Double`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ExpressionType {
    Unset,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Str,
    Opaque,
    Error,
}

impl ExpressionType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ExpressionType::Int | ExpressionType::Long | ExpressionType::Float | ExpressionType::Double
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ExpressionType::Unset => "unset",
            ExpressionType::Int => "int",
            ExpressionType::Long => "long",
            ExpressionType::Float => "float",
            ExpressionType::Double => "double",
            ExpressionType::Bool => "bool",
            ExpressionType::Str => "string",
            ExpressionType::Opaque => "object",
            ExpressionType::Error => "error",
        }
    }
}

impl fmt::Display for ExpressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An object owned by the embedding application.
///
/// The evaluator never looks inside one; it only asks for its category,
/// a printable form, and equality with another host object.
pub trait HostObject: fmt::Debug + Send + Sync {
    /// Category name used by `?instanceof`.
    fn category(&self) -> &str;

    /// Text used whenever the object is stringified.
    fn describe(&self) -> String;

    fn is_instance_of(&self, category: &str) -> bool {
        category == self.category() || category == "Object"
    }

    fn host_eq(&self, _other: &dyn HostObject) -> bool {
        false
    }
}

/// Shared handle to a [`HostObject`].
#[derive(Debug, Clone)]
pub struct Opaque(Arc<dyn HostObject>);

impl Opaque {
    pub fn new(object: impl HostObject + 'static) -> Self {
        Opaque(Arc::new(object))
    }

    pub fn from_arc(object: Arc<dyn HostObject>) -> Self {
        Opaque(object)
    }

    pub fn object(&self) -> &dyn HostObject {
        self.0.as_ref()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.host_eq(other.0.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    Opaque(Opaque),
    /// A failed lookup carried in-band. Falsy; raised only when an
    /// operator that needs its content consumes it.
    Error(LookupError),
    Unset,
}

impl Value {
    pub fn expr_type(&self) -> ExpressionType {
        match self {
            Value::Int(_) => ExpressionType::Int,
            Value::Long(_) => ExpressionType::Long,
            Value::Float(_) => ExpressionType::Float,
            Value::Double(_) => ExpressionType::Double,
            Value::Bool(_) => ExpressionType::Bool,
            Value::Str(_) => ExpressionType::Str,
            Value::Opaque(_) => ExpressionType::Opaque,
            Value::Error(_) => ExpressionType::Error,
            Value::Unset => ExpressionType::Unset,
        }
    }

    /// Boolean coercion. Strings are true only when they spell `true`.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Long(n) => *n != 0,
            Value::Float(x) => *x != 0.0 && !x.is_nan(),
            Value::Double(x) => *x != 0.0 && !x.is_nan(),
            Value::Str(s) => s.eq_ignore_ascii_case("true"),
            Value::Opaque(_) => true,
            Value::Error(_) | Value::Unset => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Long(n) => Some(*n as f64),
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n as i64),
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn lookup_failure(&self) -> Option<&LookupError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Convert in place to `target`.
    ///
    /// Numeric targets only widen; a value that is not numeric, or already
    /// wider than `target`, is left alone. `Bool` coerces and `Str`
    /// stringifies. `Error` and `Unset` never change.
    pub fn convert_to(&mut self, target: ExpressionType) {
        if matches!(self, Value::Error(_) | Value::Unset) || self.expr_type() == target {
            return;
        }
        let converted = match (target, &*self) {
            (ExpressionType::Long, Value::Int(n)) => Value::Long(*n as i64),
            (ExpressionType::Float, Value::Int(n)) => Value::Float(*n as f32),
            (ExpressionType::Float, Value::Long(n)) => Value::Float(*n as f32),
            (ExpressionType::Double, Value::Int(n)) => Value::Double(*n as f64),
            (ExpressionType::Double, Value::Long(n)) => Value::Double(*n as f64),
            (ExpressionType::Double, Value::Float(x)) => Value::Double(*x as f64),
            (ExpressionType::Bool, v) => Value::Bool(v.truthy()),
            (ExpressionType::Str, v) => Value::Str(v.to_string()),
            _ => return,
        };
        *self = converted;
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Long(n) => serde_json::Value::from(*n),
            Value::Float(x) => serde_json::Value::from(*x as f64),
            Value::Double(x) => serde_json::Value::from(*x),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Opaque(o) => serde_json::Value::String(o.object().describe()),
            Value::Error(e) => serde_json::Value::String(e.to_string()),
            Value::Unset => serde_json::Value::Null,
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64, shortest: &dyn fmt::Display) -> fmt::Result {
    if x.is_nan() {
        f.write_str("NaN")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "Infinity" } else { "-Infinity" })
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        write!(f, "{x:.1}")
    } else {
        write!(f, "{shortest}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::Float(x) => write_float(f, *x as f64, x),
            Value::Double(x) => write_float(f, *x, x),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => f.write_str(s),
            Value::Opaque(o) => f.write_str(&o.object().describe()),
            Value::Error(e) => write!(f, "error({e})"),
            Value::Unset => f.write_str("null"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(n) => serializer.serialize_newtype_variant("Value", 0, "Int", n),
            Value::Long(n) => serializer.serialize_newtype_variant("Value", 1, "Long", n),
            Value::Float(x) => serializer.serialize_newtype_variant("Value", 2, "Float", x),
            Value::Double(x) => serializer.serialize_newtype_variant("Value", 3, "Double", x),
            Value::Bool(b) => serializer.serialize_newtype_variant("Value", 4, "Bool", b),
            Value::Str(s) => serializer.serialize_newtype_variant("Value", 5, "Str", s),
            Value::Opaque(o) => {
                serializer.serialize_newtype_variant("Value", 6, "Opaque", &o.object().describe())
            }
            Value::Error(e) => serializer.serialize_newtype_variant("Value", 7, "Error", &e.to_string()),
            Value::Unset => serializer.serialize_unit_variant("Value", 8, "Unset"),
        }
    }
}

/// Bring `incoming` to the type it shares with an accumulator of type `acc`.
///
/// Returns the accumulator's new type; when it differs from `acc` the caller
/// must convert the accumulator with [`Value::convert_to`].
pub fn promote(acc: ExpressionType, incoming: &mut Value) -> ExpressionType {
    use ExpressionType as T;

    let inc = incoming.expr_type();
    match (acc, inc) {
        (a, b) if a == b => a,
        (T::Unset | T::Error, b) => b,
        (a, T::Unset | T::Error) => a,
        (T::Opaque, _) | (_, T::Opaque) => {
            incoming.convert_to(T::Str);
            T::Str
        }
        (T::Bool, _) => {
            incoming.convert_to(T::Bool);
            T::Bool
        }
        (T::Str, _) => {
            incoming.convert_to(T::Str);
            T::Str
        }
        (a, b) if a.is_numeric() && b.is_numeric() => {
            let wider = a.max(b);
            incoming.convert_to(wider);
            wider
        }
        _ => {
            incoming.convert_to(T::Str);
            T::Str
        }
    }
}

/// Categories accepted by `?instanceof`, with every stored type that may
/// stand in for them. Numeric entries list the types that widen to them.
fn categories() -> &'static [(&'static str, &'static [ExpressionType])] {
    use ExpressionType::*;
    &[
        ("int", &[Int]),
        ("Integer", &[Int]),
        ("long", &[Int, Long]),
        ("Long", &[Int, Long]),
        ("float", &[Int, Long, Float]),
        ("Float", &[Int, Long, Float]),
        ("double", &[Int, Long, Float, Double]),
        ("Double", &[Int, Long, Float, Double]),
        ("Number", &[Int, Long, Float, Double]),
        ("boolean", &[Bool]),
        ("Boolean", &[Bool]),
        ("String", &[Str]),
        ("CharSequence", &[Str]),
        ("Object", &[Int, Long, Float, Double, Bool, Str]),
    ]
}

pub fn is_instance_of(value: &Value, category: &str) -> bool {
    if let Value::Opaque(o) = value {
        return o.object().is_instance_of(category)
            || category.rsplit('.').next() == Some("Object");
    }
    let short = category.rsplit('.').next().unwrap_or(category);
    let ty = value.expr_type();
    categories()
        .iter()
        .find(|(name, _)| *name == short)
        .is_some_and(|(_, accepted)| accepted.contains(&ty))
}
