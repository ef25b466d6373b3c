/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    /// One-line description.
    pub short: &'static str,
    /// Full explanation printed by `--explain`.
    pub long: &'static str,
}

/// All stable error codes. `EXP-P` codes come from compiling, `EXP-E` codes
/// from evaluating.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Compile ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "EXP-P001",
        short: "unexpected token",
        long: r#"## EXP-P001: unexpected token

A token appeared where the grammar does not allow it, or the expression
ended where an operand was expected.

**Examples:**

    1 +          -- nothing after the operator
    (1))         -- one closing parenthesis too many
    a > b        -- with --special, `>` is reserved; write `a ?gt b`
"#,
    },
    ErrorEntry {
        code: "EXP-P002",
        short: "unterminated parenthesis",
        long: r#"## EXP-P002: unterminated parenthesis

A `(` was opened and the expression ended before the matching `)`.
The error points at the opening parenthesis.

**Example:**

    (1 + 2 * 3
"#,
    },
    ErrorEntry {
        code: "EXP-P003",
        short: "unknown operator",
        long: r#"## EXP-P003: unknown operator

A `?word` operator that does not exist, or a lone `&`, `|` or `=`.

The word operators are `?lt ?le ?gt ?ge ?eq ?ne ?contains ?starts ?ends
?instanceof`. Logical operators are doubled (`&&`, `||`) and equality is
`==`.
"#,
    },
    ErrorEntry {
        code: "EXP-P004",
        short: "malformed literal",
        long: r#"## EXP-P004: malformed literal

A number or string literal could not be read.

Numbers are decimal digits with an optional fraction and an optional
suffix: `F` (single precision), `D` (double precision) or `L` (64-bit
integer). Integers that do not fit in 32 bits become 64-bit; ones that
do not fit in 64 bits are malformed.

Strings are quoted with `'` and support the escapes `\n \t \r \0 \\ \'`
and `\uXXXX`.

**Examples:**

    12x          -- stray letter
    1.5L         -- fractional long
    'open        -- missing closing quote
"#,
    },
    ErrorEntry {
        code: "EXP-P005",
        short: "expression nested too deeply",
        long: r#"## EXP-P005: expression nested too deeply

Parentheses and call arguments may nest at most 128 levels. Deeper
expressions are rejected at compile time instead of exhausting the stack.
"#,
    },

    // ── Evaluate ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "EXP-E001",
        short: "operator does not accept this type",
        long: r#"## EXP-E001: operator does not accept this type

The operator has no meaning for the operand's type after promotion.

**Examples:**

    'ab' - 'b'   -- strings only support `+` and `:`
    -'x'         -- negation needs a number
    null < 1     -- null has no ordering
"#,
    },
    ErrorEntry {
        code: "EXP-E002",
        short: "integer division by zero",
        long: r#"## EXP-E002: integer division by zero

`/` or `%` with an integer (int or long) divisor of zero. Floating-point
division by zero is not an error and yields Infinity or NaN.

**Fix:** make one side floating point, e.g. `x / 0.0`.
"#,
    },
    ErrorEntry {
        code: "EXP-E003",
        short: "64-bit integer overflow",
        long: r#"## EXP-E003: 64-bit integer overflow

32-bit results that overflow are recomputed as 64-bit. A 64-bit result
that overflows has no wider integer type and is reported instead of
wrapping.
"#,
    },
    ErrorEntry {
        code: "EXP-E004",
        short: "operand stack empty",
        long: r#"## EXP-E004: operand stack empty

An operation tried to pop a value that was never pushed. Programs built
by the compiler never do this; the program was assembled by hand.
"#,
    },
    ErrorEntry {
        code: "EXP-E005",
        short: "short-circuit without jump target",
        long: r#"## EXP-E005: short-circuit without jump target

A `checkAnd`/`checkOr` operation decided the result of its chain but has
no valid target to jump to. Like EXP-E004 this only happens for programs
not produced by the compiler.
"#,
    },
    ErrorEntry {
        code: "EXP-E006",
        short: "argument slot not supplied",
        long: r#"## EXP-E006: argument slot not supplied

The expression reads `$N` (or a named slot) beyond the arguments given.
Slots are numbered from 0 across all argument groups.
"#,
    },
    ErrorEntry {
        code: "EXP-E007",
        short: "failed lookup used as a value",
        long: r#"## EXP-E007: failed lookup used as a value

A name could not be resolved. Failed lookups are carried as error values:
`&&`, `||`, `!` and `bool` treat them as false, every other operator
reports this error.

**Example:**

    missing && x     -- false
    missing + 1      -- EXP-E007
"#,
    },
    ErrorEntry {
        code: "EXP-E008",
        short: "resolver call failed",
        long: r#"## EXP-E008: resolver call failed

A call such as `math.max(a, b)` reached the resolver, which reported a
failure, and the result was then used by an operator that needs a value.
"#,
    },
    ErrorEntry {
        code: "EXP-E009",
        short: "nested evaluation too deep",
        long: r#"## EXP-E009: nested evaluation too deep

Nested sub-programs are evaluated recursively up to 128 levels.
"#,
    },
];

/// Look up an error entry by code (e.g. `"EXP-E002"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParseError;
    use crate::value::ExpressionType;
    use crate::vm::EvalError;

    #[test]
    fn lookup_known_code() {
        let e = lookup("EXP-E002").expect("EXP-E002 should be in registry");
        assert_eq!(e.code, "EXP-E002");
        assert!(e.long.contains("EXP-E002"));
        assert!(lookup("exp-p001").is_some());
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("EXP-X999").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique_and_documented() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let n = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), n, "duplicate codes in registry");
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(entry.long.starts_with(&format!("## {}", entry.code)), "{} bad heading", entry.code);
        }
    }

    #[test]
    fn every_error_code_is_registered() {
        let parse = [
            ParseError::UnexpectedToken { pos: 0, found: String::new() },
            ParseError::UnterminatedParenthesis { pos: 0, end: 0 },
            ParseError::UnknownOperator { pos: 0, op: String::new() },
            ParseError::MalformedLiteral { pos: 0, text: String::new() },
            ParseError::RecursionLimit,
        ];
        let eval = [
            EvalError::TypeMismatch { operator: "+", operand_type: ExpressionType::Str },
            EvalError::DivideByZero,
            EvalError::Overflow { operator: "*" },
            EvalError::StackUnderflow { ip: 0 },
            EvalError::MissingJumpTarget { ip: 0 },
            EvalError::ArgumentOutOfRange { index: 0 },
            EvalError::PropagatedLookupFailure { name: String::new() },
            EvalError::ResolverInvocationFailed { path: String::new(), cause: String::new() },
            EvalError::RecursionLimit,
        ];
        let codes = parse.iter().map(ParseError::code).chain(eval.iter().map(EvalError::code));
        for code in codes {
            assert!(lookup(code).is_some(), "{code} not in registry");
        }
    }
}
