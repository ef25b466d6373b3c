use crate::lexer::{self, LexError, Span, Token};
use crate::ops::{self, OperatorId};
use crate::program::{Operand, Operation, PathRef, Program};
use crate::value::Value;

/// Deepest parenthesis / call-argument nesting accepted by the parser.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected {found} at {pos}")]
    UnexpectedToken { pos: usize, found: String },
    #[error("parenthesis opened at {pos} is never closed")]
    UnterminatedParenthesis { pos: usize, end: usize },
    #[error("unknown operator '{op}' at {pos}")]
    UnknownOperator { pos: usize, op: String },
    #[error("malformed literal {text} at {pos}")]
    MalformedLiteral { pos: usize, text: String },
    #[error("expression nested deeper than {} levels", MAX_DEPTH)]
    RecursionLimit,
}

impl ParseError {
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::UnexpectedToken { .. } => "EXP-P001",
            ParseError::UnterminatedParenthesis { .. } => "EXP-P002",
            ParseError::UnknownOperator { .. } => "EXP-P003",
            ParseError::MalformedLiteral { .. } => "EXP-P004",
            ParseError::RecursionLimit => "EXP-P005",
        }
    }

    /// Byte offset into the source, when the error has one.
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::UnexpectedToken { pos, .. }
            | ParseError::UnterminatedParenthesis { pos, .. }
            | ParseError::UnknownOperator { pos, .. }
            | ParseError::MalformedLiteral { pos, .. } => Some(*pos),
            ParseError::RecursionLimit => None,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::UnexpectedToken { pos: e.position, found: format!("'{}'", e.snippet) }
    }
}

type Result<T> = std::result::Result<T, ParseError>;

/// Compile `source` into a [`Program`].
///
/// `slots` names argument slots: a bare identifier equal to `slots[i]`
/// compiles to argument slot `i`. With `special_syntax` the bare `>` and
/// `>=` operators are rejected in favour of `?gt` / `?ge`.
pub fn parse(source: &str, special_syntax: bool, slots: &[&str]) -> Result<Program> {
    let tokens = lexer::lex(source)?;
    let mut parser = Parser { source, tokens, pos: 0, depth: 0, special_syntax, slots };
    let ops = parser.parse_or()?;
    if parser.peek().is_some() {
        return Err(parser.unexpected());
    }
    Ok(Program::new(source, ops))
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, Span)>,
    pos: usize,
    depth: usize,
    special_syntax: bool,
    slots: &'a [&'a str],
}

/// A parsed `primary`: parenthesised groups are kept apart so a unary prefix
/// can wrap them as a nested program.
enum Primary {
    Group(Vec<Operation>, Span),
    Operand(Operand),
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn token_at(&self, idx: usize) -> Option<&(Token, Span)> {
        self.tokens.get(idx)
    }

    /// Byte offset of the current token, or the end of the source.
    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.source.len(), |(_, s)| s.start)
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.tokens.get(self.pos) {
            None => ParseError::UnexpectedToken { pos: self.source.len(), found: "end of input".into() },
            Some((Token::Stray(s), span)) => ParseError::UnknownOperator { pos: span.start, op: s.clone() },
            Some((Token::WordOp(w), span)) => {
                ParseError::UnknownOperator { pos: span.start, op: format!("?{w}") }
            }
            Some((_, span)) => ParseError::UnexpectedToken {
                pos: span.start,
                found: format!("'{}'", &self.source[span.clone()]),
            },
        }
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::RecursionLimit);
        }
        self.depth += 1;
        Ok(())
    }

    // ---- Precedence levels ----

    fn parse_or(&mut self) -> Result<Vec<Operation>> {
        let mut ops = self.parse_and()?;
        let mut checks = Vec::new();
        while self.eat(&Token::OrOr) {
            checks.push(ops.len());
            ops.push(Operation::check(OperatorId::CheckOr));
            let rhs = self.parse_and()?;
            combine(&mut ops, OperatorId::Or, rhs);
        }
        close_chain(&mut ops, &checks);
        Ok(ops)
    }

    fn parse_and(&mut self) -> Result<Vec<Operation>> {
        let mut ops = self.parse_cmp()?;
        let mut checks = Vec::new();
        while self.eat(&Token::AndAnd) {
            checks.push(ops.len());
            ops.push(Operation::check(OperatorId::CheckAnd));
            let rhs = self.parse_cmp()?;
            combine(&mut ops, OperatorId::And, rhs);
        }
        close_chain(&mut ops, &checks);
        Ok(ops)
    }

    fn parse_cmp(&mut self) -> Result<Vec<Operation>> {
        let mut ops = self.parse_add()?;
        if let Some(op) = self.comparison_op()? {
            let rhs = if op == OperatorId::InstanceOf && matches!(self.peek(), Some(Token::Ident(_))) {
                let category = self.parse_category()?;
                vec![Operation::set(Operand::Literal(Value::Str(category)))]
            } else {
                self.parse_add()?
            };
            combine(&mut ops, op, rhs);
        }
        Ok(ops)
    }

    /// Consume a comparison operator if one is next.
    fn comparison_op(&mut self) -> Result<Option<OperatorId>> {
        let Some((tok, span)) = self.tokens.get(self.pos) else {
            return Ok(None);
        };
        let op = match tok {
            Token::EqEq => OperatorId::Eq,
            Token::NotEq => OperatorId::Ne,
            Token::Less => OperatorId::Lt,
            Token::LessEq => OperatorId::Le,
            Token::Greater | Token::GreaterEq if self.special_syntax => return Err(self.unexpected()),
            Token::Greater => OperatorId::Gt,
            Token::GreaterEq => OperatorId::Ge,
            Token::WordOp(word) => ops::by_word(word).ok_or_else(|| ParseError::UnknownOperator {
                pos: span.start,
                op: format!("?{word}"),
            })?,
            _ => return Ok(None),
        };
        self.pos += 1;
        Ok(Some(op))
    }

    /// `java.lang.String` on the right of `?instanceof`, read as a name.
    fn parse_category(&mut self) -> Result<String> {
        let mut segments = Vec::new();
        loop {
            let Some(Token::Ident(name)) = self.peek().cloned() else {
                return Err(self.unexpected());
            };
            self.pos += 1;
            segments.push(name);
            if !self.eat(&Token::Dot) {
                return Ok(segments.join("."));
            }
        }
    }

    fn parse_add(&mut self) -> Result<Vec<Operation>> {
        let mut ops = self.parse_mult()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => OperatorId::Add,
                Some(Token::Minus) => OperatorId::Sub,
                Some(Token::Colon) => OperatorId::Concat,
                _ => return Ok(ops),
            };
            self.pos += 1;
            let rhs = self.parse_mult()?;
            combine(&mut ops, op, rhs);
        }
    }

    fn parse_mult(&mut self) -> Result<Vec<Operation>> {
        let mut ops = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => OperatorId::Mul,
                Some(Token::Slash) => OperatorId::Div,
                Some(Token::Percent) => OperatorId::Rem,
                _ => return Ok(ops),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            combine(&mut ops, op, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Vec<Operation>> {
        let mut chain = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Bang) => OperatorId::Not,
                Some(Token::Tilde) => OperatorId::BitNot,
                Some(Token::Minus) if self.negative_literal_follows() => break,
                Some(Token::Minus) => OperatorId::Neg,
                Some(Token::Plus) => OperatorId::Plus,
                _ => break,
            };
            self.pos += 1;
            chain.push(op);
        }

        let primary = if self.negative_literal_follows() {
            let start = self.offset();
            self.pos += 1;
            let Some((Token::Number(text), _)) = self.advance() else {
                return Err(self.unexpected());
            };
            Primary::Operand(Operand::Literal(number_literal(&text, true, start)?))
        } else {
            self.parse_primary()?
        };

        Ok(match primary {
            Primary::Operand(operand) => vec![Operation::set(operand).with_unary(chain)],
            Primary::Group(ops, _) if chain.is_empty() => ops,
            Primary::Group(ops, span) => {
                let nested = Program::new(&self.source[span], ops);
                vec![Operation::set(Operand::Nested(nested)).with_unary(chain)]
            }
        })
    }

    /// A `-` written directly against a number literal belongs to the literal.
    fn negative_literal_follows(&self) -> bool {
        match (self.token_at(self.pos), self.token_at(self.pos + 1)) {
            (Some((Token::Minus, minus)), Some((Token::Number(_), number))) => minus.end == number.start,
            _ => false,
        }
    }

    fn parse_primary(&mut self) -> Result<Primary> {
        let Some((tok, span)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.unexpected());
        };
        let operand = match tok {
            Token::LParen => {
                self.enter()?;
                self.pos += 1;
                let ops = self.parse_or()?;
                let end = self.close_paren(span.start)?;
                self.depth -= 1;
                return Ok(Primary::Group(ops, span.start..end));
            }
            Token::Str(raw) => {
                let text = unescape(&raw).ok_or_else(|| ParseError::MalformedLiteral {
                    pos: span.start,
                    text: self.source[span.clone()].to_string(),
                })?;
                Operand::Literal(Value::Str(text))
            }
            Token::UnterminatedStr => {
                return Err(ParseError::MalformedLiteral {
                    pos: span.start,
                    text: self.source[span].to_string(),
                });
            }
            Token::Number(text) => Operand::Literal(number_literal(&text, false, span.start)?),
            Token::True => Operand::Literal(Value::Bool(true)),
            Token::False => Operand::Literal(Value::Bool(false)),
            Token::Null => Operand::Literal(Value::Unset),
            Token::Slot(index) => Operand::ArgSlot(index),
            Token::Ident(name) => {
                self.pos += 1;
                return Ok(Primary::Operand(self.parse_path(name)?));
            }
            _ => return Err(self.unexpected()),
        };
        self.pos += 1;
        Ok(Primary::Operand(operand))
    }

    /// Expect `)` for the parenthesis opened at `open`; returns the end offset.
    fn close_paren(&mut self, open: usize) -> Result<usize> {
        match self.tokens.get(self.pos) {
            Some((Token::RParen, span)) => {
                let end = span.end;
                self.pos += 1;
                Ok(end)
            }
            Some(_) => Err(self.unexpected()),
            None => Err(ParseError::UnterminatedParenthesis { pos: open, end: self.source.len() }),
        }
    }

    /// Rest of a path after its first identifier, plus an optional call.
    fn parse_path(&mut self, first: String) -> Result<Operand> {
        let mut path = first;
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            let Some(Token::Ident(seg)) = self.peek().cloned() else {
                return Err(self.unexpected());
            };
            self.pos += 1;
            path.push('.');
            path.push_str(&seg);
        }

        let Some((Token::LParen, open)) = self.tokens.get(self.pos).cloned() else {
            if let Some(index) = self.slots.iter().position(|s| *s == path) {
                return Ok(Operand::ArgSlot(index));
            }
            return Ok(Operand::External(PathRef { path, call: None }));
        };

        self.enter()?;
        self.pos += 1;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                let start = self.offset();
                let ops = self.parse_or()?;
                let end = self.tokens[self.pos - 1].1.end;
                args.push(Program::new(&self.source[start..end], ops));
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.close_paren(open.start)?;
                break;
            }
        }
        self.depth -= 1;
        Ok(Operand::External(PathRef { path, call: Some(args) }))
    }
}

/// Append `rhs` to `ops` as the right side of binary `operator`.
///
/// A right side that is a single `set` becomes the operator's own operand.
/// Anything longer is spliced in whole and combined through the stack.
fn combine(ops: &mut Vec<Operation>, operator: OperatorId, mut rhs: Vec<Operation>) {
    if rhs.len() == 1 && rhs[0].operator == OperatorId::Set {
        if let Some(mut op) = rhs.pop() {
            op.operator = operator;
            ops.push(op);
        }
        return;
    }
    let base = ops.len();
    ops.extend(rhs.into_iter().map(|mut op| {
        if let Some(target) = op.short_circuit_target.as_mut() {
            *target += base;
        }
        op
    }));
    ops.push(Operation::new(operator, Some(Operand::StackTop)));
}

/// Point every check of a finished chain just past it.
fn close_chain(ops: &mut [Operation], checks: &[usize]) {
    let end = ops.len();
    for &i in checks {
        ops[i].short_circuit_target = Some(end);
    }
}

/// Type a number literal. Suffixes: `F` float, `D` double, `L` long.
/// Unsuffixed integers are `Int` when they fit in 32 bits.
fn number_literal(text: &str, negative: bool, pos: usize) -> Result<Value> {
    let malformed = || ParseError::MalformedLiteral {
        pos,
        text: if negative { format!("-{text}") } else { text.to_string() },
    };

    let (body, suffix) = match text.char_indices().last() {
        Some((i, c)) if matches!(c, 'F' | 'f' | 'D' | 'd' | 'L' | 'l') => (&text[..i], Some(c.to_ascii_uppercase())),
        _ => (text, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let fractional = match body.split_once('.') {
        None if all_digits(body) => false,
        Some((int, frac)) if all_digits(int) && all_digits(frac) => true,
        _ => return Err(malformed()),
    };
    let signed = if negative { format!("-{body}") } else { body.to_string() };

    let value = match suffix {
        Some('F') => signed.parse::<f32>().ok().map(Value::Float),
        Some('D') => signed.parse::<f64>().ok().map(Value::Double),
        Some(_) if fractional => None,
        Some(_) => signed.parse::<i64>().ok().map(Value::Long),
        None if fractional => signed.parse::<f64>().ok().map(Value::Double),
        None => signed
            .parse::<i32>()
            .map(Value::Int)
            .ok()
            .or_else(|| signed.parse::<i64>().ok().map(Value::Long)),
    };
    value.ok_or_else(malformed)
}

/// Process backslash escapes. `None` for a bad `\u` sequence.
fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return None;
                }
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code)?);
            }
            other => out.push(other),
        }
    }
    Some(out)
}
