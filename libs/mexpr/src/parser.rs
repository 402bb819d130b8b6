//! Recursive descent parser producing the measure AST.

use arcstr::ArcStr;

use crate::error::ParseError;
use crate::lexer::{Spanned, Token};

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Exponentiation.
    Pow,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal.
    Number(f64),
    /// A string literal.
    Str(ArcStr),
    /// A variable reference.
    Var(ArcStr),
    /// A list literal `[a, b, ...]`.
    List(Vec<Expr>),
    /// Unary negation.
    Neg(Box<Expr>),
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinOp,
        /// The left operand.
        lhs: Box<Expr>,
        /// The right operand.
        rhs: Box<Expr>,
    },
    /// A function call `name(args...)`.
    Call {
        /// The function name.
        name: ArcStr,
        /// The call arguments.
        args: Vec<Expr>,
    },
    /// An indexing operation `target[index]`.
    Index {
        /// The indexed value.
        target: Box<Expr>,
        /// The index.
        index: Box<Expr>,
    },
}

/// A script statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `name = expr`
    Assign(ArcStr, Expr),
    /// A bare expression, evaluated for its side effects.
    Expr(Expr),
}

/// Removes separators inside parentheses and brackets so that grouped
/// constructs may span several lines.
fn strip_grouped_separators(tokens: Vec<Spanned>) -> Vec<Spanned> {
    let mut depth = 0usize;
    tokens
        .into_iter()
        .filter(|t| {
            match t.token {
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
                Token::Separator if depth > 0 => return false,
                _ => {}
            }
            true
        })
        .collect()
}

/// Parses the tokens as a single expression.
pub(crate) fn parse_expression(tokens: Vec<Spanned>, len: usize) -> Result<Expr, ParseError> {
    let mut tokens = strip_grouped_separators(tokens);
    while matches!(tokens.last(), Some(t) if t.token == Token::Separator) {
        tokens.pop();
    }
    let start = tokens
        .iter()
        .position(|t| t.token != Token::Separator)
        .unwrap_or(tokens.len());
    let mut parser = Parser {
        tokens: &tokens[start..],
        pos: 0,
        len,
    };
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parses the tokens as a sequence of statements.
pub(crate) fn parse_script(tokens: Vec<Spanned>, len: usize) -> Result<Vec<Stmt>, ParseError> {
    let tokens = strip_grouped_separators(tokens);
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        len,
    };
    let mut stmts = Vec::new();
    loop {
        while parser.eat(&Token::Separator) {}
        if parser.at_end() {
            break;
        }
        stmts.push(parser.stmt()?);
        if !parser.at_end() && !parser.eat(&Token::Separator) {
            return Err(parser.unexpected());
        }
    }
    if stmts.is_empty() {
        return Err(ParseError::new(0, "empty script"));
    }
    Ok(stmts)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    len: usize,
}

impl Parser<'_> {
    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.peek_nth(1) == Some(&Token::Equals) {
            if let Some(Token::Ident(name)) = self.peek().cloned() {
                self.pos += 2;
                return Ok(Stmt::Assign(name, self.expr()?));
            }
        }
        Ok(Stmt::Expr(self.expr()?))
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat(&Token::Caret) {
            // Right associative, binds tighter than unary minus on its left.
            let exp = self.unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exp),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.expr()?;
            self.expect(&Token::RBracket, "`]`")?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(ParseError::new(self.len, "unexpected end of input"));
        };
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.list(&Token::RParen, "`)`")?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.list(&Token::RBracket, "`]`")?)),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    /// Parses comma separated expressions up to and including `close`.
    fn list(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma, what)?;
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ParseError::new(self.offset(), format!("expected {what}")))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(tok) => ParseError::new(tok.offset, format!("unexpected token {:?}", tok.token)),
            None => ParseError::new(self.len, "unexpected end of input"),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.offset).unwrap_or(self.len)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}
