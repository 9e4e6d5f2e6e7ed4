use std::fmt;

use super::ExpressionError;

/// Token types for condition and hook expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    Str(String),

    Ident(String),

    // Operators
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    EqEq,      // ==
    NotEq,     // !=
    EqEqEq,    // ===
    NotEqEq,   // !==
    Lt,        // <
    Le,        // <=
    Gt,        // >
    Ge,        // >=
    AndAnd,    // &&
    OrOr,      // ||
    Bang,      // !
    Dot,       // .
    Comma,     // ,
    Colon,     // :
    Question,  // ?

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
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::EqEqEq => write!(f, "==="),
            Token::NotEqEq => write!(f, "!=="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Bang => write!(f, "!"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Question => write!(f, "?"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// A token plus the byte offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ExpressionError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, ExpressionError> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }

        let Some((pos, c)) = self.chars.next() else {
            return Ok(Spanned { token: Token::Eof, pos: self.src.len() });
        };

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '.' => Token::Dot,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '?' => Token::Question,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '=' => {
                if !self.eat('=') {
                    return Err(ExpressionError::lex(pos, "assignment is not supported"));
                }
                if self.eat('=') { Token::EqEqEq } else { Token::EqEq }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') { Token::NotEqEq } else { Token::NotEq }
                } else {
                    Token::Bang
                }
            }
            '<' => if self.eat('=') { Token::Le } else { Token::Lt },
            '>' => if self.eat('=') { Token::Ge } else { Token::Gt },
            '&' => {
                if !self.eat('&') {
                    return Err(ExpressionError::lex(pos, "expected '&&'"));
                }
                Token::AndAnd
            }
            '|' => {
                if !self.eat('|') {
                    return Err(ExpressionError::lex(pos, "expected '||'"));
                }
                Token::OrOr
            }
            '"' | '\'' => Token::Str(self.read_string(pos, c)?),
            c if c.is_ascii_digit() => self.read_number(pos)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_ident(pos),
            other => {
                return Err(ExpressionError::lex(pos, format!("unexpected character '{}'", other)))
            }
        };

        Ok(Spanned { token, pos })
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn read_string(&mut self, start: usize, quote: char) -> Result<String, ExpressionError> {
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(out),
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, other)) => out.push(other),
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(ExpressionError::lex(start, "unterminated string literal"))
    }

    fn read_number(&mut self, start: usize) -> Result<Token, ExpressionError> {
        let mut end = start + 1;
        let mut seen_dot = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + 1;
                self.chars.next();
            } else if c == '.' && !seen_dot {
                // A dot only continues the number when a digit follows
                let next_is_digit = self.src[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|d| d.is_ascii_digit());
                if !next_is_digit {
                    break;
                }
                seen_dot = true;
                end = i + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end]
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|e| ExpressionError::lex(start, format!("invalid number: {}", e)))
    }

    fn read_ident(&mut self, start: usize) -> Token {
        let mut end = start + self.src[start..].chars().next().map_or(1, char::len_utf8);
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        match &self.src[start..end] {
            "null" | "undefined" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            ident => Token::Ident(ident.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_strict_equality_operators() {
        assert_eq!(
            kinds("a === b !== c == d != e"),
            vec![
                Token::Ident("a".into()),
                Token::EqEqEq,
                Token::Ident("b".into()),
                Token::NotEqEq,
                Token::Ident("c".into()),
                Token::EqEq,
                Token::Ident("d".into()),
                Token::NotEq,
                Token::Ident("e".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            kinds(r#"null undefined true false 42 3.5 'x' "y\"z""#),
            vec![
                Token::Null,
                Token::Null,
                Token::True,
                Token::False,
                Token::Number(42.0),
                Token::Number(3.5),
                Token::Str("x".into()),
                Token::Str("y\"z".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_member_access_after_number_index() {
        assert_eq!(
            kinds("a[0].b"),
            vec![
                Token::Ident("a".into()),
                Token::LBracket,
                Token::Number(0.0),
                Token::RBracket,
                Token::Dot,
                Token::Ident("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_assignment_rejected() {
        let err = Lexer::new("a = 1").tokenize().unwrap_err();
        assert!(err.to_string().contains("assignment"));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Lexer::new("'abc").tokenize().is_err());
    }

    #[test]
    fn test_single_ampersand_rejected() {
        assert!(Lexer::new("a & b").tokenize().is_err());
    }
}
