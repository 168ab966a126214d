// Expression Lexer
// Tokenizes sandboxed expressions used by captures, scenarios and scripts

use std::fmt;

/// Token types for the expression language
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    Identifier(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Dot,
    Comma,
    Colon,
    Question,
    Semicolon,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Null => "null",
            Token::True => "true",
            Token::False => "false",
            Token::Number(n) => return write!(f, "{}", n),
            Token::String(s) => return write!(f, "'{}'", s),
            Token::Identifier(s) => return write!(f, "{}", s),
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Eq => "==",
            Token::Ne => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::And => "&&",
            Token::Or => "||",
            Token::Not => "!",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Question => "?",
            Token::Semicolon => ";",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Eof => "end of input",
        };
        f.write_str(text)
    }
}

/// Lexer error
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl LexError {
    fn at(position: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for LexError {}

/// Lexer over a character buffer
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input, always ending with `Token::Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let Some(ch) = self.current() else {
            return Ok(Token::Eof);
        };
        let start = self.pos;

        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '?' => Some(Token::Question),
            ';' => Some(Token::Semicolon),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            _ => None,
        };
        if let Some(token) = single {
            self.pos += 1;
            return Ok(token);
        }

        match ch {
            '=' => {
                self.pos += 1;
                if !self.eat('=') {
                    return Err(LexError::at(start, "expected '==' operator"));
                }
                // `===` is accepted as an alias
                self.eat('=');
                Ok(Token::Eq)
            }
            '!' => {
                self.pos += 1;
                if self.eat('=') {
                    self.eat('=');
                    Ok(Token::Ne)
                } else {
                    Ok(Token::Not)
                }
            }
            '<' => {
                self.pos += 1;
                Ok(if self.eat('=') { Token::Le } else { Token::Lt })
            }
            '>' => {
                self.pos += 1;
                Ok(if self.eat('=') { Token::Ge } else { Token::Gt })
            }
            '&' => {
                self.pos += 1;
                if self.eat('&') {
                    Ok(Token::And)
                } else {
                    Err(LexError::at(start, "expected '&&' operator"))
                }
            }
            '|' => {
                self.pos += 1;
                if self.eat('|') {
                    Ok(Token::Or)
                } else {
                    Err(LexError::at(start, "expected '||' operator"))
                }
            }
            '\'' | '"' => self.read_string(ch),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_alphabetic() || c == '_' || c == '$' => Ok(self.read_identifier()),
            _ => Err(LexError::at(start, format!("unexpected character: '{}'", ch))),
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.current() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.current().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// Single-quoted strings escape a quote by doubling it (`'it''s'`);
    /// both quote styles accept backslash escapes.
    fn read_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();

        loop {
            let Some(ch) = self.current() else {
                return Err(LexError::at(start, "unterminated string"));
            };
            self.pos += 1;

            if ch == quote {
                if quote == '\'' && self.current() == Some('\'') {
                    value.push('\'');
                    self.pos += 1;
                    continue;
                }
                return Ok(Token::String(value));
            }

            if ch == '\\' {
                let Some(escaped) = self.current() else {
                    return Err(LexError::at(start, "unterminated string"));
                };
                self.pos += 1;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                continue;
            }

            value.push(ch);
        }
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        while self.current().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }

        // A dot only belongs to the number when a digit follows it
        if self.current() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            while self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| LexError::at(start, format!("invalid number: {}", text)))
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.pos;
        while self
            .current()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.pos += 1;
        }

        let ident: String = self.chars[start..self.pos].iter().collect();
        match ident.as_str() {
            "null" | "undefined" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(ident),
        }
    }
}
