//! Lexer for Lua source text
//!
//! Turns a source buffer into a lazy, restartable sequence of tokens that
//! always ends with an explicit `EOF` token. Every token carries its raw
//! lexeme, its decoded literal (for numbers and strings) and a source span.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::lua::coerce::parse_number;
use crate::lua::error::{LuaResult, SyntaxError, SyntaxErrorKind};
use crate::lua::value::LuaString;

/// A location in the source code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    /// Chunk (file) identity
    pub chunk: Arc<str>,

    /// 1-based line of the first character
    pub line: u32,

    /// 1-based column of the first character
    pub column: u32,

    /// Column just past the last character (on the token's final line)
    pub end_column: u32,
}

impl SourceSpan {
    pub fn new(chunk: Arc<str>, line: u32, column: u32) -> Self {
        SourceSpan {
            chunk,
            line,
            column,
            end_column: column,
        }
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chunk, self.line)
    }
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Literals
    Number(f64),
    String(LuaString),
    Identifier(String),

    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // Operators
    Plus,         // +
    Minus,        // -
    Multiply,     // *
    Divide,       // /
    Modulo,       // %
    Power,        // ^
    Length,       // #
    Equal,        // ==
    NotEqual,     // ~=
    Less,         // <
    Greater,      // >
    LessEqual,    // <=
    GreaterEqual, // >=
    Assign,       // =
    Concat,       // ..
    Vararg,       // ...

    // Punctuation
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    LeftBrace,    // {
    RightBrace,   // }
    Semicolon,    // ;
    Colon,        // :
    DoubleColon,  // ::
    Comma,        // ,
    Dot,          // .

    // End of file
    EOF,
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, TokenType> = {
        let mut m = HashMap::new();
        m.insert("and", TokenType::And);
        m.insert("break", TokenType::Break);
        m.insert("do", TokenType::Do);
        m.insert("else", TokenType::Else);
        m.insert("elseif", TokenType::Elseif);
        m.insert("end", TokenType::End);
        m.insert("false", TokenType::False);
        m.insert("for", TokenType::For);
        m.insert("function", TokenType::Function);
        m.insert("goto", TokenType::Goto);
        m.insert("if", TokenType::If);
        m.insert("in", TokenType::In);
        m.insert("local", TokenType::Local);
        m.insert("nil", TokenType::Nil);
        m.insert("not", TokenType::Not);
        m.insert("or", TokenType::Or);
        m.insert("repeat", TokenType::Repeat);
        m.insert("return", TokenType::Return);
        m.insert("then", TokenType::Then);
        m.insert("true", TokenType::True);
        m.insert("until", TokenType::Until);
        m.insert("while", TokenType::While);
        m
    };
}

impl TokenType {
    /// Fixed source text of a symbol or keyword token, used in
    /// "expected X" diagnostics.
    pub fn symbol(&self) -> &'static str {
        match self {
            TokenType::Number(_) => "<number>",
            TokenType::String(_) => "<string>",
            TokenType::Identifier(_) => "<name>",
            TokenType::And => "and",
            TokenType::Break => "break",
            TokenType::Do => "do",
            TokenType::Else => "else",
            TokenType::Elseif => "elseif",
            TokenType::End => "end",
            TokenType::False => "false",
            TokenType::For => "for",
            TokenType::Function => "function",
            TokenType::Goto => "goto",
            TokenType::If => "if",
            TokenType::In => "in",
            TokenType::Local => "local",
            TokenType::Nil => "nil",
            TokenType::Not => "not",
            TokenType::Or => "or",
            TokenType::Repeat => "repeat",
            TokenType::Return => "return",
            TokenType::Then => "then",
            TokenType::True => "true",
            TokenType::Until => "until",
            TokenType::While => "while",
            TokenType::Plus => "+",
            TokenType::Minus => "-",
            TokenType::Multiply => "*",
            TokenType::Divide => "/",
            TokenType::Modulo => "%",
            TokenType::Power => "^",
            TokenType::Length => "#",
            TokenType::Equal => "==",
            TokenType::NotEqual => "~=",
            TokenType::Less => "<",
            TokenType::Greater => ">",
            TokenType::LessEqual => "<=",
            TokenType::GreaterEqual => ">=",
            TokenType::Assign => "=",
            TokenType::Concat => "..",
            TokenType::Vararg => "...",
            TokenType::LeftParen => "(",
            TokenType::RightParen => ")",
            TokenType::LeftBracket => "[",
            TokenType::RightBracket => "]",
            TokenType::LeftBrace => "{",
            TokenType::RightBrace => "}",
            TokenType::Semicolon => ";",
            TokenType::Colon => ":",
            TokenType::DoubleColon => "::",
            TokenType::Comma => ",",
            TokenType::Dot => ".",
            TokenType::EOF => "<eof>",
        }
    }
}

/// A token with its lexeme and position information
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub span: SourceSpan,
}

impl Token {
    /// Text used when this token shows up in an error message
    pub fn describe(&self) -> String {
        match self.token_type {
            TokenType::EOF => "<eof>".to_string(),
            _ => self.lexeme.clone(),
        }
    }
}

/// The lexer
pub struct Lexer<'a> {
    /// Raw source bytes
    source: &'a [u8],

    /// Chunk name attached to every span
    chunk: Arc<str>,

    /// Byte offset of the next unread character
    pos: usize,

    /// Offset the lexer starts from (past a shebang line)
    start: usize,

    /// Current position
    line: u32,
    column: u32,

    /// Set once EOF (or an error) has been yielded through `Iterator`
    finished: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer over `source`, naming spans after `chunk_name`
    pub fn new(source: &'a str, chunk_name: &str) -> Self {
        let bytes = source.as_bytes();

        // A leading `#` line (shebang) is not Lua
        let start = if bytes.first() == Some(&b'#') {
            bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len())
        } else {
            0
        };

        Lexer {
            source: bytes,
            chunk: Arc::from(chunk_name),
            pos: start,
            start,
            line: 1,
            column: 1,
            finished: false,
        }
    }

    /// Chunk name used in spans
    pub fn chunk(&self) -> &Arc<str> {
        &self.chunk
    }

    /// Rewind to the beginning of the source
    pub fn restart(&mut self) {
        self.pos = self.start;
        self.line = 1;
        self.column = 1;
        self.finished = false;
    }

    /// Get the next token
    pub fn next_token(&mut self) -> LuaResult<Token> {
        self.skip_whitespace_and_comments()?;

        let start = self.pos;
        let mut span = SourceSpan::new(Arc::clone(&self.chunk), self.line, self.column);

        let ch = match self.peek() {
            Some(ch) => ch,
            None => {
                return Ok(Token {
                    token_type: TokenType::EOF,
                    lexeme: String::new(),
                    span,
                });
            }
        };

        let token_type = match ch {
            b'(' => self.single(TokenType::LeftParen),
            b')' => self.single(TokenType::RightParen),
            b']' => self.single(TokenType::RightBracket),
            b'{' => self.single(TokenType::LeftBrace),
            b'}' => self.single(TokenType::RightBrace),
            b';' => self.single(TokenType::Semicolon),
            b',' => self.single(TokenType::Comma),
            b'#' => self.single(TokenType::Length),
            b'+' => self.single(TokenType::Plus),
            b'-' => self.single(TokenType::Minus),
            b'*' => self.single(TokenType::Multiply),
            b'/' => self.single(TokenType::Divide),
            b'%' => self.single(TokenType::Modulo),
            b'^' => self.single(TokenType::Power),
            b'[' => match self.long_bracket_level() {
                Some(level) => {
                    let bytes = self.read_long_bracket(level, &span, "string")?;
                    TokenType::String(LuaString::from(bytes))
                }
                // `[=` only ever opens a long string
                None if self.peek_at(1) == Some(b'=') => {
                    return Err(self.error(SyntaxErrorKind::InvalidLongDelimiter, &span));
                }
                None => self.single(TokenType::LeftBracket),
            },
            b'=' => self.one_or_two(b'=', TokenType::Assign, TokenType::Equal),
            b'<' => self.one_or_two(b'=', TokenType::Less, TokenType::LessEqual),
            b'>' => self.one_or_two(b'=', TokenType::Greater, TokenType::GreaterEqual),
            b':' => self.one_or_two(b':', TokenType::Colon, TokenType::DoubleColon),
            b'~' => {
                if self.peek_at(1) == Some(b'=') {
                    self.bump();
                    self.bump();
                    TokenType::NotEqual
                } else {
                    return Err(self.error(SyntaxErrorKind::UnexpectedCharacter('~'), &span));
                }
            }
            b'.' => {
                if self.peek_at(1) == Some(b'.') {
                    if self.peek_at(2) == Some(b'.') {
                        self.bump();
                        self.bump();
                        self.bump();
                        TokenType::Vararg
                    } else {
                        self.bump();
                        self.bump();
                        TokenType::Concat
                    }
                } else if self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
                    self.read_number(&span)?
                } else {
                    self.single(TokenType::Dot)
                }
            }
            b'"' | b'\'' => self.read_string(ch, &span)?,
            _ if ch.is_ascii_digit() => self.read_number(&span)?,
            _ if ch.is_ascii_alphabetic() || ch == b'_' => self.read_identifier(),
            _ => {
                let shown = std::str::from_utf8(&self.source[self.pos..])
                    .ok()
                    .and_then(|s| s.chars().next())
                    .unwrap_or(ch as char);
                return Err(self.error(SyntaxErrorKind::UnexpectedCharacter(shown), &span));
            }
        };

        span.end_column = self.column;
        Ok(Token {
            token_type,
            lexeme: String::from_utf8_lossy(&self.source[start..self.pos]).into_owned(),
            span,
        })
    }

    /// Peek at the next byte without consuming it
    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    /// Consume one byte, keeping line/column current
    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn single(&mut self, token_type: TokenType) -> TokenType {
        self.bump();
        token_type
    }

    fn one_or_two(&mut self, second: u8, one: TokenType, two: TokenType) -> TokenType {
        self.bump();
        if self.peek() == Some(second) {
            self.bump();
            two
        } else {
            one
        }
    }

    fn error(&self, kind: SyntaxErrorKind, span: &SourceSpan) -> crate::lua::error::LuaError {
        SyntaxError::new(kind, span).into()
    }

    fn error_here(&self, kind: SyntaxErrorKind) -> crate::lua::error::LuaError {
        SyntaxError {
            kind,
            chunk: Arc::clone(&self.chunk),
            line: self.line,
            column: self.column,
        }
        .into()
    }

    /// Consume a newline sequence (`\n`, `\r`, `\r\n` or `\n\r`)
    fn skip_newline(&mut self) {
        let first = self.peek();
        if first == Some(b'\r') {
            // `\r` alone does not advance the line counter in `bump`
            self.pos += 1;
            self.line += 1;
            self.column = 1;
            if self.peek() == Some(b'\n') {
                self.pos += 1;
            }
            return;
        }
        self.bump();
        if first == Some(b'\n') && self.peek() == Some(b'\r') {
            self.pos += 1;
        }
    }

    /// Skip whitespace and comments
    fn skip_whitespace_and_comments(&mut self) -> LuaResult<()> {
        loop {
            match self.peek() {
                Some(b'\r') => self.skip_newline(),
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(0x0B) | Some(0x0C) => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    let span = SourceSpan::new(Arc::clone(&self.chunk), self.line, self.column);
                    self.bump();
                    self.bump();
                    self.skip_comment(&span)?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Skip a comment body (the `--` is already consumed)
    fn skip_comment(&mut self, span: &SourceSpan) -> LuaResult<()> {
        if self.peek() == Some(b'[') {
            if let Some(level) = self.long_bracket_level() {
                self.read_long_bracket(level, span, "comment")?;
                return Ok(());
            }
        }

        // Short comment - skip to end of line
        while let Some(ch) = self.peek() {
            if ch == b'\n' || ch == b'\r' {
                break;
            }
            self.bump();
        }
        Ok(())
    }

    /// At a `[`: return the level of a long bracket opener (`[==[`), or
    /// `None` when this is a plain `[`. Consumes nothing.
    fn long_bracket_level(&self) -> Option<usize> {
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        if self.peek_at(1 + level) == Some(b'[') {
            Some(level)
        } else {
            None
        }
    }

    /// Read a long bracket body. The opener has not been consumed yet.
    fn read_long_bracket(&mut self, level: usize, span: &SourceSpan, what: &str) -> LuaResult<Vec<u8>> {
        // `[`, `=`*level, `[`
        for _ in 0..level + 2 {
            self.bump();
        }

        // A newline right after the opener is not part of the content
        if matches!(self.peek(), Some(b'\n') | Some(b'\r')) {
            self.skip_newline();
        }

        let mut content = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(
                        SyntaxErrorKind::UnexpectedEof {
                            context: format!("in long {}", what),
                        },
                        span,
                    ));
                }
                Some(b']') => {
                    let closes = (1..=level).all(|i| self.peek_at(i) == Some(b'='))
                        && self.peek_at(level + 1) == Some(b']');
                    if closes {
                        for _ in 0..level + 2 {
                            self.bump();
                        }
                        return Ok(content);
                    }
                    content.push(b']');
                    self.bump();
                }
                Some(b'\n') | Some(b'\r') => {
                    self.skip_newline();
                    content.push(b'\n');
                }
                Some(ch) => {
                    content.push(ch);
                    self.bump();
                }
            }
        }
    }

    /// Read a numeral. Anything that looks like part of the number is
    /// consumed first and validated afterwards, so `3x` and `1..2` are
    /// reported as one malformed number.
    fn read_number(&mut self, span: &SourceSpan) -> LuaResult<TokenType> {
        let start = self.pos;
        let mut exponent = (b'e', b'E');

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.bump();
            self.bump();
            exponent = (b'p', b'P');
        }

        loop {
            match self.peek() {
                Some(ch) if ch == exponent.0 || ch == exponent.1 => {
                    self.bump();
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.bump();
                    }
                }
                Some(ch) if ch.is_ascii_hexdigit() || ch == b'.' => {
                    self.bump();
                }
                _ => break,
            }
        }

        while matches!(self.peek(), Some(ch) if ch.is_ascii_alphanumeric() || ch == b'_') {
            self.bump();
        }

        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        match parse_number(&text) {
            Some(n) => Ok(TokenType::Number(n)),
            None => Err(self.error(SyntaxErrorKind::MalformedNumber(text), span)),
        }
    }

    /// Read a short string literal
    fn read_string(&mut self, quote: u8, span: &SourceSpan) -> LuaResult<TokenType> {
        self.bump();
        let mut string = Vec::new();

        loop {
            match self.peek() {
                None => {
                    return Err(self.error(
                        SyntaxErrorKind::UnexpectedEof {
                            context: "in string".to_string(),
                        },
                        span,
                    ));
                }
                Some(b'\n') | Some(b'\r') => {
                    return Err(self.error_here(SyntaxErrorKind::UnfinishedString));
                }
                Some(ch) if ch == quote => {
                    self.bump();
                    return Ok(TokenType::String(LuaString::from(string)));
                }
                Some(b'\\') => {
                    self.bump();
                    self.read_escape(&mut string, span)?;
                }
                Some(ch) => {
                    string.push(ch);
                    self.bump();
                }
            }
        }
    }

    /// Decode one escape sequence (the backslash is consumed)
    fn read_escape(&mut self, out: &mut Vec<u8>, span: &SourceSpan) -> LuaResult<()> {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => {
                return Err(self.error(
                    SyntaxErrorKind::UnexpectedEof {
                        context: "in string".to_string(),
                    },
                    span,
                ));
            }
        };

        let simple = match ch {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0B),
            b'\\' => Some(b'\\'),
            b'"' => Some(b'"'),
            b'\'' => Some(b'\''),
            _ => None,
        };
        if let Some(byte) = simple {
            self.bump();
            out.push(byte);
            return Ok(());
        }

        match ch {
            b'\n' | b'\r' => {
                self.skip_newline();
                out.push(b'\n');
            }
            b'z' => {
                // Line splice: drop the following run of whitespace
                self.bump();
                loop {
                    match self.peek() {
                        Some(b'\n') | Some(b'\r') => self.skip_newline(),
                        Some(c) if c.is_ascii_whitespace() || c == 0x0B => {
                            self.bump();
                        }
                        _ => break,
                    }
                }
            }
            b'x' => {
                self.bump();
                let mut value = 0u8;
                for _ in 0..2 {
                    match self.peek() {
                        Some(c) if c.is_ascii_hexdigit() => {
                            value = value * 16 + (c as char).to_digit(16).unwrap_or(0) as u8;
                            self.bump();
                        }
                        other => {
                            let shown = other.map(|c| (c as char).to_string()).unwrap_or_default();
                            return Err(self.error_here(SyntaxErrorKind::InvalidEscape(format!("x{}", shown))));
                        }
                    }
                }
                out.push(value);
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                let mut digits = String::new();
                while digits.len() < 3 {
                    match self.peek() {
                        Some(c) if c.is_ascii_digit() => {
                            value = value * 10 + (c - b'0') as u32;
                            digits.push(c as char);
                            self.bump();
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    return Err(self.error_here(SyntaxErrorKind::InvalidEscape(digits)));
                }
                out.push(value as u8);
            }
            other => {
                return Err(self.error_here(SyntaxErrorKind::InvalidEscape((other as char).to_string())));
            }
        }
        Ok(())
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self) -> TokenType {
        let start = self.pos;
        while matches!(self.peek(), Some(ch) if ch.is_ascii_alphanumeric() || ch == b'_') {
            self.bump();
        }

        // Identifiers are ASCII by construction
        let ident = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        match KEYWORDS.get(ident.as_str()) {
            Some(keyword) => keyword.clone(),
            None => TokenType::Identifier(ident),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LuaResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) if token.token_type == TokenType::EOF => self.finished = true,
            Err(_) => self.finished = true,
            _ => {}
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::error::LuaError;

    fn lex(source: &str) -> Vec<TokenType> {
        Lexer::new(source, "test")
            .map(|t| t.unwrap().token_type)
            .collect()
    }

    fn lex_error(source: &str) -> SyntaxError {
        match Lexer::new(source, "test").find_map(|t| t.err()) {
            Some(LuaError::Syntax(e)) => e,
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    fn string_of(source: &str) -> Vec<u8> {
        match &lex(source)[0] {
            TokenType::String(s) => s.as_bytes().to_vec(),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            lex("+ - * / % ^ # == ~= <= >= < > = .. ... :: :"),
            vec![
                TokenType::Plus,
                TokenType::Minus,
                TokenType::Multiply,
                TokenType::Divide,
                TokenType::Modulo,
                TokenType::Power,
                TokenType::Length,
                TokenType::Equal,
                TokenType::NotEqual,
                TokenType::LessEqual,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::Greater,
                TokenType::Assign,
                TokenType::Concat,
                TokenType::Vararg,
                TokenType::DoubleColon,
                TokenType::Colon,
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            lex("local goto_ goto"),
            vec![
                TokenType::Local,
                TokenType::Identifier("goto_".to_string()),
                TokenType::Goto,
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex("42 3.14 .5 1e10 1.5e-5 0xff 0x1p4 0x.8"),
            vec![
                TokenType::Number(42.0),
                TokenType::Number(3.14),
                TokenType::Number(0.5),
                TokenType::Number(1e10),
                TokenType::Number(1.5e-5),
                TokenType::Number(255.0),
                TokenType::Number(16.0),
                TokenType::Number(0.5),
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_malformed_number() {
        let err = lex_error("x = 3x");
        assert_eq!(err.kind, SyntaxErrorKind::MalformedNumber("3x".to_string()));
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 5);

        let err = lex_error("1..2");
        assert_eq!(err.kind, SyntaxErrorKind::MalformedNumber("1..2".to_string()));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(string_of(r#"'a\tb\n'"#), b"a\tb\n");
        assert_eq!(string_of(r#""\65\066\x43""#), b"ABC");
        assert_eq!(string_of("'one\\z   \n    two'"), b"onetwo");
        assert_eq!(string_of("'line\\\nnext'"), b"line\nnext");
        assert_eq!(string_of(r#"'\255'"#), vec![255u8]);
    }

    #[test]
    fn test_invalid_escape() {
        let err = lex_error(r#"'\q'"#);
        assert_eq!(err.kind, SyntaxErrorKind::InvalidEscape("q".to_string()));
    }

    #[test]
    fn test_long_strings() {
        assert_eq!(string_of("[[long string]]"), b"long string");
        assert_eq!(string_of("[==[a]]b]=]c]==]"), b"a]]b]=]c");
        assert_eq!(string_of("[[\nskip first newline]]"), b"skip first newline");
    }

    #[test]
    fn test_unterminated_long_string() {
        let err = lex_error("x = [==[ never closed ]=]");
        assert_eq!(
            err.kind,
            SyntaxErrorKind::UnexpectedEof {
                context: "in long string".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_long_delimiter() {
        let err = lex_error("x = [=x");
        assert_eq!(err.kind, SyntaxErrorKind::InvalidLongDelimiter);
        assert_eq!((err.line, err.column), (1, 5));

        // Plain brackets and short comments are unaffected
        assert_eq!(lex("t[1]")[1], TokenType::LeftBracket);
        assert_eq!(lex("--[=x\nreturn")[0], TokenType::Return);
    }

    #[test]
    fn test_unterminated_long_comment() {
        let err = lex_error("--[[ comment");
        assert!(matches!(err.kind, SyntaxErrorKind::UnexpectedEof { .. }));
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            lex("a -- line comment\n--[==[ long\n comment ]==] b"),
            vec![
                TokenType::Identifier("a".to_string()),
                TokenType::Identifier("b".to_string()),
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = lex_error("a = @");
        assert_eq!(err.kind, SyntaxErrorKind::UnexpectedCharacter('@'));
        assert_eq!(err.column, 5);
    }

    #[test]
    fn test_spans_and_lexemes() {
        let tokens: Vec<Token> = Lexer::new("local x\n  = 0x10", "chunk.lua")
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(tokens[0].lexeme, "local");
        assert_eq!(tokens[2].span.line, 2);
        assert_eq!(tokens[2].span.column, 3);
        assert_eq!(tokens[3].lexeme, "0x10");
        assert_eq!(tokens[3].span.end_column, 9);
        assert_eq!(&*tokens[3].span.chunk, "chunk.lua");
    }

    #[test]
    fn test_restart_and_single_eof() {
        let mut lexer = Lexer::new("a b", "test");
        assert_eq!(lexer.by_ref().count(), 3);
        assert!(lexer.next().is_none());

        lexer.restart();
        let first = lexer.next().unwrap().unwrap();
        assert_eq!(first.token_type, TokenType::Identifier("a".to_string()));
    }

    #[test]
    fn test_shebang_skipped() {
        assert_eq!(
            lex("#!/usr/bin/lua\nreturn"),
            vec![TokenType::Return, TokenType::EOF]
        );
    }
}
