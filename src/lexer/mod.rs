use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token(":")]
    Colon,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    /// `?lt`, `?contains`, ... The parser decides whether the word exists.
    #[regex(r"\?[A-Za-z]+", |lex| lex.slice()[1..].to_string())]
    WordOp(String),
    /// Lone `&`, `|` or `=`: always an error, reported by the parser.
    #[regex(r"[&|=]", |lex| lex.slice().to_string())]
    Stray(String),

    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // Literals. Numbers are matched loosely (suffixes, stray letters) so that
    // `12x` is one malformed literal rather than a number and a path.
    #[regex(r"[0-9][0-9A-Za-z_]*(\.[0-9A-Za-z_]+)*", |lex| lex.slice().to_string())]
    Number(String),

    /// Raw string content between the quotes, escapes not yet processed.
    #[regex(r"'([^'\\]|\\.)*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),
    #[regex(r"'([^'\\]|\\.)*\\?", priority = 1)]
    UnterminatedStr,

    #[regex(r"\$[0-9]+", |lex| lex.slice()[1..].parse::<usize>().ok())]
    Slot(usize),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

pub type Span = std::ops::Range<usize>;

/// Lex an expression into tokens with byte ranges.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    position: span.start,
                    snippet: source[span].to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unexpected character(s) '{snippet}' at {position}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
}
