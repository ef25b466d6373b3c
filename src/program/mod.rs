use std::fmt;

use serde::Serialize;

use crate::ops::OperatorId;
use crate::value::Value;

/// Where an operation's right-hand value comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Literal(Value),
    /// Index into the caller's arguments, flattened across argument groups.
    ArgSlot(usize),
    /// Pop the value pushed when the current term started.
    StackTop,
    External(PathRef),
    Nested(Program),
}

/// A dotted path handed to the [`Resolver`](crate::Resolver). When `call` is
/// set the path is invoked with the values of the argument programs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathRef {
    pub path: String,
    pub call: Option<Vec<Program>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub operator: OperatorId,
    pub operand: Option<Operand>,
    /// Prefix operators applied to the operand, in source order.
    pub unary_chain: Vec<OperatorId>,
    /// Jump target taken when a check operator short-circuits.
    pub short_circuit_target: Option<usize>,
}

impl Operation {
    pub fn new(operator: OperatorId, operand: Option<Operand>) -> Self {
        Operation { operator, operand, unary_chain: Vec::new(), short_circuit_target: None }
    }

    pub fn set(operand: Operand) -> Self {
        Self::new(OperatorId::Set, Some(operand))
    }

    pub fn check(operator: OperatorId) -> Self {
        Self::new(operator, None)
    }

    pub fn with_unary(mut self, chain: Vec<OperatorId>) -> Self {
        self.unary_chain = chain;
        self
    }
}

/// A compiled expression: an ordered operation list plus the source it was
/// compiled from. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    source: String,
    ops: Vec<Operation>,
}

impl Program {
    pub(crate) fn new(source: &str, ops: Vec<Operation>) -> Self {
        Program { source: source.to_string(), ops }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn write_listing(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for (ip, op) in self.ops.iter().enumerate() {
            write!(f, "{:indent$}{ip:>3}  {}", "", op.operator.symbol())?;
            for u in &op.unary_chain {
                write!(f, " {}", u.symbol())?;
            }
            match &op.operand {
                None => {}
                Some(Operand::Nested(inner)) => {
                    writeln!(f, " {{")?;
                    inner.write_listing(f, indent + 5)?;
                    write!(f, "{:indent$}     }}", "")?;
                }
                Some(operand) => write!(f, " {operand}")?,
            }
            if let Some(target) = op.short_circuit_target {
                write!(f, " -> {target}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Numbered RPN listing, one operation per line.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_listing(f, 0)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(Value::Str(s)) => write!(f, "'{}'", s.escape_default()),
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::ArgSlot(i) => write!(f, "${i}"),
            Operand::StackTop => f.write_str("<stack>"),
            Operand::External(p) => match &p.call {
                None => f.write_str(&p.path),
                Some(args) => {
                    let args: Vec<&str> = args.iter().map(Program::source).collect();
                    write!(f, "{}({})", p.path, args.join(", "))
                }
            },
            Operand::Nested(p) => write!(f, "({})", p.source()),
        }
    }
}
