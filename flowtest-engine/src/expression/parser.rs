// Expression Parser
// Recursive descent parser producing an AST for sandboxed expressions

use crate::expression::lexer::{LexError, Lexer, Token};

use std::fmt;

/// Abstract syntax tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    String(String),

    /// Bare name looked up in the evaluation context
    Identifier(String),

    /// Function call: `length(body.items)`, or a method call with the receiver as
    /// first argument: `token.startsWith('ey')`
    Call { name: String, args: Vec<Expr> },

    /// Index access: `items[0]`, `headers['content-type']`
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Member access: `body.id`
    Member { object: Box<Expr>, property: String },

    Unary { op: UnaryOp, expr: Box<Expr> },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `condition ? then : else`
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },

    Array(Vec<Expr>),

    Object(Vec<(String, Expr)>),
}

impl Expr {
    /// Dotted path for plain identifier/member chains (`auth.token`)
    pub fn as_path(&self) -> Option<String> {
        match self {
            Expr::Identifier(name) => Some(name.clone()),
            Expr::Member { object, property } => {
                object.as_path().map(|base| format!("{}.{}", base, property))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn from_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Mod,
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::And => BinaryOp::And,
            Token::Or => BinaryOp::Or,
            _ => return None,
        })
    }

    /// Binding strength; higher binds tighter
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(symbol)
    }
}

/// Parser error
#[derive(Debug, Clone)]
pub struct ParseExprError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at token {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseExprError {}

impl From<LexError> for ParseExprError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            position: err.position,
        }
    }
}

/// Recursive descent parser over a token stream
pub struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse a single expression
    pub fn parse_str(input: &str) -> Result<Expr, ParseExprError> {
        let tokens = Lexer::new(input).tokenize()?;
        Self::new(tokens).parse()
    }

    /// Parse a script: expressions separated by `;` or by juxtaposition across lines
    pub fn parse_program(input: &str) -> Result<Vec<Expr>, ParseExprError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self::new(tokens);
        let mut statements = Vec::new();

        loop {
            while parser.check(&Token::Semicolon) {
                parser.advance();
            }
            if parser.is_at_end() {
                return Ok(statements);
            }
            statements.push(parser.parse_ternary()?);
        }
    }

    pub fn parse(&mut self) -> Result<Expr, ParseExprError> {
        let expr = self.parse_ternary()?;
        if !self.is_at_end() {
            return Err(self.error(&format!("unexpected token: {}", self.peek())));
        }
        Ok(expr)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseExprError> {
        let condition = self.parse_binary(1)?;
        if !self.check(&Token::Question) {
            return Ok(condition);
        }
        self.advance();
        let then_expr = self.parse_ternary()?;
        self.expect(&Token::Colon, "expected ':' in conditional expression")?;
        let else_expr = self.parse_ternary()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    /// Precedence climbing over left-associative binary operators
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseExprError> {
        let mut left = self.parse_unary()?;

        while let Some(op) = BinaryOp::from_token(self.peek()) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseExprError> {
        let op = match self.peek() {
            Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseExprError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let Token::Identifier(property) = self.advance().clone() else {
                        return Err(self.error("expected property name after '.'"));
                    };
                    expr = if self.check(&Token::LParen) {
                        let args = self.parse_args()?;
                        Expr::Call {
                            name: property,
                            args: std::iter::once(expr).chain(args).collect(),
                        }
                    } else {
                        Expr::Member {
                            object: Box::new(expr),
                            property,
                        }
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_ternary()?;
                    self.expect(&Token::RBracket, "expected ']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseExprError> {
        let token = self.advance().clone();
        match token {
            Token::Null => Ok(Expr::Null),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::String(s) => Ok(Expr::String(s)),
            Token::Identifier(name) => {
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Identifier(name))
                }
            }
            Token::LParen => {
                let expr = self.parse_ternary()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                let items = self.parse_list(&Token::RBracket, Self::parse_ternary)?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => {
                let pairs = self.parse_list(&Token::RBrace, |parser| {
                    let key = match parser.advance().clone() {
                        Token::Identifier(s) | Token::String(s) => s,
                        _ => return Err(parser.error("expected object key")),
                    };
                    parser.expect(&Token::Colon, "expected ':' after object key")?;
                    Ok((key, parser.parse_ternary()?))
                })?;
                Ok(Expr::Object(pairs))
            }
            other => Err(self.error(&format!("unexpected token: {}", other))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseExprError> {
        self.expect(&Token::LParen, "expected '('")?;
        self.parse_list(&Token::RParen, Self::parse_ternary)
    }

    /// Comma separated items up to `close`, allowing a trailing comma
    fn parse_list<T>(
        &mut self,
        close: &Token,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseExprError>,
    ) -> Result<Vec<T>, ParseExprError> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(item(self)?);
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close, &format!("expected '{}'", close))?;
        Ok(items)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> &Token {
        let token = self.tokens.get(self.position).unwrap_or(&Token::Eof);
        self.position += 1;
        token
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token, msg: &str) -> Result<(), ParseExprError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(msg))
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn error(&self, message: &str) -> ParseExprError {
        ParseExprError {
            message: message.to_string(),
            position: self.position,
        }
    }
}
