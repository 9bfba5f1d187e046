use crate::error::ParseError;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(q) if *q == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(n) if n == name)
    }
}

// Longest first so that `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+=", "-=", "++",
    "--", "+", "-", "*", "/", "%", "!", "=", "<", ">", "(", ")", "[", "]", "{", "}", ",", ".",
    ":", ";", "?",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if c == b'/' && bytes.get(pos + 1) == Some(&b'/') {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }

        if c == b'/' && bytes.get(pos + 1) == Some(&b'*') {
            let close = source[pos + 2..]
                .find("*/")
                .ok_or_else(|| ParseError::new("unterminated comment", pos))?;
            pos += close + 4;
            continue;
        }

        let start = pos;

        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            pos = scan_number(bytes, pos);
            let text = &source[start..pos];
            let value = text
                .parse::<f64>()
                .map_err(|_| ParseError::new(format!("invalid number {}", text), start))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                start,
                end: pos,
            });
            continue;
        }

        if c == b'"' || c == b'\'' || c == b'`' {
            let (value, next) = scan_string(source, pos)?;
            pos = next;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                start,
                end: pos,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80 {
            let rest = &source[pos..];
            let len = rest
                .char_indices()
                .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_' || *ch == '$'))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            if len == 0 {
                let ch = rest.chars().next().unwrap_or('?');
                return Err(ParseError::new(format!("unexpected character '{}'", ch), pos));
            }
            pos += len;
            tokens.push(Token {
                kind: TokenKind::Ident(source[start..pos].to_string()),
                start,
                end: pos,
            });
            continue;
        }

        let rest = &source[pos..];
        match PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                // `a?.5:1` is a conditional, not optional chaining.
                let p = if *p == "?." && bytes.get(pos + 2).is_some_and(u8::is_ascii_digit) {
                    "?"
                } else {
                    *p
                };
                pos += p.len();
                tokens.push(Token {
                    kind: TokenKind::Punct(p),
                    start,
                    end: pos,
                });
            }
            None => {
                let ch = rest.chars().next().unwrap_or('?');
                return Err(ParseError::new(format!("unexpected character '{}'", ch), pos));
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        start: source.len(),
        end: source.len(),
    });
    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    pos
}

/// Scans a quoted string starting at `start`; returns the unescaped text and the end offset.
///
/// Backtick strings are accepted as plain strings; `${}` interpolation is not supported.
fn scan_string(source: &str, start: usize) -> Result<(String, usize), ParseError> {
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars
        .next()
        .ok_or_else(|| ParseError::new("expected string", start))?;
    let mut value = String::new();

    while let Some((i, ch)) = chars.next() {
        if ch == quote {
            return Ok((value, start + i + ch.len_utf8()));
        }
        if quote == '`' && ch == '$' && source[start + i..].starts_with("${") {
            return Err(ParseError::new(
                "template literal interpolation is not supported",
                start + i,
            ));
        }
        if ch == '\\' {
            let (_, escaped) = chars
                .next()
                .ok_or_else(|| ParseError::new("unterminated string", start))?;
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                'u' => {
                    let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| ParseError::new("invalid unicode escape", start + i))?;
                    value.push(code);
                }
                other => value.push(other),
            }
            continue;
        }
        if ch == '\n' && quote != '`' {
            return Err(ParseError::new("unterminated string", start));
        }
        value.push(ch);
    }
    Err(ParseError::new("unterminated string", start))
}
