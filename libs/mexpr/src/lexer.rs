//! Tokenizer for measure sources.

use arcstr::ArcStr;

use crate::error::ParseError;

/// A measure-language token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal, with any engineering suffix already applied.
    Number(f64),
    /// An identifier.
    Ident(ArcStr),
    /// A quoted string literal.
    Str(ArcStr),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `^`
    Caret,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `=`
    Equals,
    /// A statement separator (`;` or a line break).
    Separator,
}

/// A token along with the byte offset at which it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// The byte offset of the token's first character.
    pub offset: usize,
}

pub(crate) struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Tokenizes the entire input.
    pub(crate) fn tokenize(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.get()? {
            tokens.push(tok);
        }
        Ok(tokens)
    }

    fn get(&mut self) -> Result<Option<Spanned>, ParseError> {
        loop {
            self.take_while(|c| c == ' ' || c == '\t' || c == '\r');
            let Some(c) = self.peek() else {
                return Ok(None);
            };
            if c == '#' {
                self.take_while(|c| c != '\n');
                continue;
            }
            let offset = self.pos;
            let token = match c {
                '\n' | ';' => {
                    self.take1();
                    Token::Separator
                }
                '+' => self.single(Token::Plus),
                '-' => self.single(Token::Minus),
                '*' => self.single(Token::Star),
                '/' => self.single(Token::Slash),
                '^' => self.single(Token::Caret),
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                ',' => self.single(Token::Comma),
                '=' => self.single(Token::Equals),
                '"' | '\'' => self.string(c)?,
                c if c.is_ascii_digit() || c == '.' => self.number()?,
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let ident = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                    Token::Ident(ArcStr::from(ident))
                }
                c => return Err(ParseError::new(offset, format!("unexpected character `{c}`"))),
            };
            return Ok(Some(Spanned { token, offset }));
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.take1();
        token
    }

    fn string(&mut self, quote: char) -> Result<Token, ParseError> {
        let start = self.pos;
        self.take1();
        let mut value = String::new();
        loop {
            match self.take1() {
                None => return Err(ParseError::new(start, "unterminated string literal")),
                Some(c) if c == quote => break,
                Some('\\') => match self.take1() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => value.push(c),
                    None => return Err(ParseError::new(start, "unterminated string literal")),
                },
                Some(c) => value.push(c),
            }
        }
        Ok(Token::Str(ArcStr::from(value)))
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.take1();
            self.take_while(|c| c.is_ascii_digit());
        }
        let rest = &self.src[self.pos..];
        let mut chars = rest.chars();
        if let Some('e' | 'E') = chars.next() {
            let exp_follows = match chars.next() {
                Some(d) if d.is_ascii_digit() => true,
                Some('+' | '-') => chars.next().is_some_and(|d| d.is_ascii_digit()),
                _ => false,
            };
            if exp_follows {
                self.take1();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.take1();
                }
                self.take_while(|c| c.is_ascii_digit());
            }
        }
        let literal = &self.src[start..self.pos];
        let mantissa: f64 = literal
            .parse()
            .map_err(|_| ParseError::new(start, format!("invalid number `{literal}`")))?;

        let suffix = self.take_while(|c| c.is_ascii_alphabetic()).to_ascii_lowercase();
        let scale = if suffix.is_empty() {
            1.0
        } else if suffix.starts_with("meg") {
            1e6
        } else {
            match suffix.as_bytes()[0] {
                b't' => 1e12,
                b'g' => 1e9,
                b'k' => 1e3,
                b'm' => 1e-3,
                b'u' => 1e-6,
                b'n' => 1e-9,
                b'p' => 1e-12,
                b'f' => 1e-15,
                _ => {
                    return Err(ParseError::new(
                        start,
                        format!("unknown numeric suffix `{suffix}`"),
                    ))
                }
            }
        };
        Ok(Token::Number(mantissa * scale))
    }

    fn take1(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }
}
