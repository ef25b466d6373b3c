use std::collections::HashMap;
use std::fmt;

use crate::value::Value;

/// Why a name or path could not be turned into a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("'{name}' not found")]
    NotFound { name: String },
    #[error("'{name}' is ambiguous")]
    Ambiguous { name: String },
    #[error("invoking '{path}' failed: {cause}")]
    InvocationFailed { path: String, cause: String },
}

impl LookupError {
    pub fn name(&self) -> &str {
        match self {
            LookupError::NotFound { name } | LookupError::Ambiguous { name } => name,
            LookupError::InvocationFailed { path, .. } => path,
        }
    }
}

/// Host capability the evaluator calls for `External` operands.
///
/// `resolve` handles bare names and dotted paths (`order.total`);
/// `invoke` handles paths followed by an argument list (`math.max(a, b)`).
/// Failures are returned, never panicked: the evaluator carries them as
/// in-band [`Value::Error`] values.
pub trait Resolver {
    fn resolve(&self, name_or_path: &str) -> Result<Value, LookupError>;
    fn invoke(&self, path: &str, args: &[Value]) -> Result<Value, LookupError>;
}

type HostFn = Box<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A [`Resolver`] backed by two hash maps: named values and callable paths.
#[derive(Default)]
pub struct MapResolver {
    values: HashMap<String, Value>,
    functions: HashMap<String, HostFn>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn register<F>(&mut self, path: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(path.into(), Box::new(f));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MapResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        f.debug_struct("MapResolver")
            .field("values", &self.values)
            .field("functions", &functions)
            .finish()
    }
}

impl Resolver for MapResolver {
    fn resolve(&self, name_or_path: &str) -> Result<Value, LookupError> {
        self.values
            .get(name_or_path)
            .cloned()
            .ok_or_else(|| LookupError::NotFound { name: name_or_path.to_string() })
    }

    fn invoke(&self, path: &str, args: &[Value]) -> Result<Value, LookupError> {
        let f = self
            .functions
            .get(path)
            .ok_or_else(|| LookupError::NotFound { name: path.to_string() })?;
        f(args).map_err(|cause| LookupError::InvocationFailed { path: path.to_string(), cause })
    }
}
