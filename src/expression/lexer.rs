//! Tokenizer for the expression language.
//!
//! One lexical grammar serves all five expression contexts; keywords are
//! plain identifiers here and get their meaning from the parser.

use crate::error::{PdbError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare identifier or keyword.
    Ident(String),
    /// `#name` attribute-name placeholder, without the `#`.
    NamePlaceholder(String),
    /// `:name` value placeholder, without the `:`.
    ValuePlaceholder(String),
    /// Unsigned integer literal, only valid as a list index.
    Number(u32),
    Comma,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
}

impl Token {
    /// Whether this is the given keyword, case-insensitively.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        match self {
            Token::Ident(text) => text.eq_ignore_ascii_case(keyword),
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Token::Ident(text) => format!("identifier {text:?}"),
            Token::NamePlaceholder(name) => format!("#{name}"),
            Token::ValuePlaceholder(name) => format!(":{name}"),
            Token::Number(n) => format!("number {n}"),
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Eq => "=".into(),
            Token::Ne => "<>".into(),
            Token::Lt => "<".into(),
            Token::Le => "<=".into(),
            Token::Gt => ">".into(),
            Token::Ge => ">=".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
        }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            b'[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            b']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            b'+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            b'#' | b':' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_ident_continue(bytes[end]) {
                    end += 1;
                }
                if end == start {
                    return Err(PdbError::validation(format!(
                        "dangling {} in expression",
                        c as char
                    )));
                }
                let name = input[start..end].to_string();
                tokens.push(if c == b'#' {
                    Token::NamePlaceholder(name)
                } else {
                    Token::ValuePlaceholder(name)
                });
                i = end;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let number: u32 = input[start..i].parse().map_err(|_| {
                    PdbError::validation(format!("index out of range: {}", &input[start..i]))
                })?;
                tokens.push(Token::Number(number));
            }
            _ if is_ident_start(c) => {
                let start = i;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(input[start..i].to_string()));
            }
            _ => {
                return Err(PdbError::validation(format!(
                    "unexpected character {:?} in expression",
                    c as char
                )));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_condition() {
        let tokens = tokenize("#status = :s AND size(tags) >= :min").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::NamePlaceholder("status".into()),
                Token::Eq,
                Token::ValuePlaceholder("s".into()),
                Token::Ident("AND".into()),
                Token::Ident("size".into()),
                Token::LParen,
                Token::Ident("tags".into()),
                Token::RParen,
                Token::Ge,
                Token::ValuePlaceholder("min".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_path_with_index() {
        let tokens = tokenize("a.b[3]").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::LBracket,
                Token::Number(3),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_tokenize_comparators() {
        let tokens = tokenize("< <= > >= = <>").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Lt, Token::Le, Token::Gt, Token::Ge, Token::Eq, Token::Ne]
        );
    }

    #[test]
    fn test_rejects_bad_characters() {
        assert!(tokenize("a @ b").is_err());
        assert!(tokenize("#").is_err());
        assert!(tokenize(":").is_err());
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let tokens = tokenize("and").unwrap();
        assert!(tokens[0].is_keyword("AND"));
    }
}
