//! Literal values printed by a test run or written in a question's expected
//! output, and the semantic equality used to compare them.
//!
//! Accepts the common subset of Python and JavaScript literal syntax:
//! numbers, quoted strings (either quote style), booleans, null-likes,
//! lists, tuples, dicts/objects and sets. Text that is not a literal is
//! compared as a bare string.

use std::fmt;

const MAX_DEPTH: usize = 128;
const FLOAT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Map(Vec<(Literal, Literal)>),
    Set(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralError {
    pub message: String,
    pub offset: usize,
}

impl fmt::Display for LiteralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for LiteralError {}

pub fn parse_literal(text: &str) -> Result<Literal, LiteralError> {
    let mut parser = LiteralParser::new(text);
    let value = parser.parse_value(0)?;
    parser.skip_whitespace();
    if parser.peek().is_some() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

/// Parses `text`, falling back to a bare string of the trimmed text.
pub fn canonical(text: &str) -> Literal {
    parse_literal(text).unwrap_or_else(|_| Literal::Str(text.trim().to_string()))
}

pub fn values_match(actual: &str, expected: &str) -> bool {
    canonical(actual).matches(&canonical(expected))
}

impl Literal {
    pub fn matches(&self, other: &Literal) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Int(a), Literal::Int(b)) => a == b,
            (Literal::Int(a), Literal::Float(b)) | (Literal::Float(b), Literal::Int(a)) => {
                floats_match(*a as f64, *b)
            }
            (Literal::Float(a), Literal::Float(b)) => floats_match(*a, *b),
            (Literal::Str(a), Literal::Str(b)) => a == b,
            (Literal::List(a), Literal::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
            }
            (Literal::Map(a), Literal::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter()
                            .find(|(other_key, _)| key.matches(other_key))
                            .is_some_and(|(_, other_value)| value.matches(other_value))
                    })
            }
            (Literal::Set(a), Literal::Set(b)) => unordered_match(a, b),
            // `{}` is both an empty dict and an empty JS Set.
            (Literal::Set(a), Literal::Map(b)) | (Literal::Map(b), Literal::Set(a)) => {
                a.is_empty() && b.is_empty()
            }
            _ => false,
        }
    }
}

fn floats_match(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    let scale = 1.0_f64.max(a.abs()).max(b.abs());
    (a - b).abs() <= FLOAT_TOLERANCE * scale
}

fn unordered_match(a: &[Literal], b: &[Literal]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|item| {
        match b
            .iter()
            .enumerate()
            .find(|(i, other)| !used[*i] && item.matches(other))
        {
            Some((i, _)) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

struct LiteralParser {
    chars: Vec<char>,
    idx: usize,
}

impl LiteralParser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            idx: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.idx += 1;
        Some(ch)
    }

    fn error(&self, message: &str) -> LiteralError {
        LiteralError {
            message: message.to_string(),
            offset: self.idx,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.idx += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
        self.skip_whitespace();
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{expected}'"))),
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('[') => {
                self.bump();
                let items = self.parse_items(']', depth)?;
                Ok(Literal::List(items))
            }
            Some('(') => {
                self.bump();
                let items = self.parse_items(')', depth)?;
                Ok(Literal::List(items))
            }
            Some('{') => {
                self.bump();
                self.parse_braced(depth)
            }
            Some('"') | Some('\'') => self.parse_string().map(Literal::Str),
            Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '+' || ch == '.' => {
                self.parse_number()
            }
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.parse_word(),
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    fn parse_items(&mut self, close: char, depth: usize) -> Result<Vec<Literal>, LiteralError> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(items);
            }
            items.push(self.parse_value(depth + 1)?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(ch) if ch == close => return Ok(items),
                _ => return Err(self.error(&format!("expected ',' or '{close}'"))),
            }
        }
    }

    /// `{}` and `{k: v, ...}` are maps; `{a, b}` is a set.
    fn parse_braced(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Literal::Map(Vec::new()));
        }

        let first = self.parse_key(depth)?;
        self.skip_whitespace();
        if self.peek() != Some(':') {
            let mut items = vec![first];
            match self.bump() {
                Some('}') => return Ok(Literal::Set(items)),
                Some(',') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
            items.extend(self.parse_items('}', depth)?);
            return Ok(Literal::Set(items));
        }

        let mut entries = Vec::new();
        let mut key = first;
        loop {
            self.expect(':')?;
            let value = self.parse_value(depth + 1)?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.bump() {
                Some('}') => return Ok(Literal::Map(entries)),
                Some(',') => {
                    self.skip_whitespace();
                    if self.peek() == Some('}') {
                        self.bump();
                        return Ok(Literal::Map(entries));
                    }
                    key = self.parse_key(depth)?;
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    /// Object keys may be bare identifiers in JavaScript (`{a: 1}`).
    fn parse_key(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        self.skip_whitespace();
        let start = self.idx;
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$') {
            let word = self.read_word();
            self.skip_whitespace();
            if self.peek() == Some(':') {
                return Ok(Literal::Str(word));
            }
            self.idx = start;
        }
        self.parse_value(depth + 1)
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                word.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn parse_word(&mut self) -> Result<Literal, LiteralError> {
        let start = self.idx;
        let word = self.read_word();
        let literal = match word.as_str() {
            "true" | "True" => Literal::Bool(true),
            "false" | "False" => Literal::Bool(false),
            "null" | "None" | "undefined" | "nil" => Literal::Null,
            "inf" | "Infinity" => Literal::Float(f64::INFINITY),
            "nan" | "NaN" => Literal::Float(f64::NAN),
            "set" if self.chars.get(self.idx..self.idx + 2) == Some(&['(', ')'][..]) => {
                self.idx += 2;
                Literal::Set(Vec::new())
            }
            _ => {
                self.idx = start;
                return Err(self.error("unknown word"));
            }
        };
        Ok(literal)
    }

    fn parse_number(&mut self) -> Result<Literal, LiteralError> {
        let start = self.idx;
        let mut text = String::new();
        if let Some(sign @ ('-' | '+')) = self.peek() {
            text.push(sign);
            self.bump();
            if self.peek().is_some_and(|c| c.is_alphabetic()) {
                let word = self.read_word();
                return match word.as_str() {
                    "inf" | "Infinity" if sign == '-' => Ok(Literal::Float(f64::NEG_INFINITY)),
                    "inf" | "Infinity" => Ok(Literal::Float(f64::INFINITY)),
                    _ => {
                        self.idx = start;
                        Err(self.error("invalid number"))
                    }
                };
            }
        }

        let mut is_float = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    if ch != '_' {
                        text.push(ch);
                    }
                }
                '.' => {
                    is_float = true;
                    text.push(ch);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(ch);
                    if let Some(sign @ ('-' | '+')) = self.chars.get(self.idx + 1).copied() {
                        text.push(sign);
                        self.bump();
                    }
                }
                // BigInt suffix in JavaScript.
                'n' if !is_float => {
                    self.bump();
                    break;
                }
                _ => break,
            }
            self.bump();
        }

        if !is_float {
            if let Ok(value) = text.parse::<i128>() {
                return Ok(Literal::Int(value));
            }
        }
        text.parse::<f64>().map(Literal::Float).map_err(|_| {
            self.idx = start;
            self.error("invalid number")
        })
    }

    fn parse_string(&mut self) -> Result<String, LiteralError> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            let ch = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            if ch == quote {
                return Ok(out);
            }
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            let escaped = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                'x' => out.push(self.parse_hex_escape(2)?),
                'u' => out.push(self.parse_hex_escape(4)?),
                'U' => out.push(self.parse_hex_escape(8)?),
                other => out.push(other),
            }
        }
    }

    fn parse_hex_escape(&mut self, len: usize) -> Result<char, LiteralError> {
        let digits: String = self
            .chars
            .get(self.idx..self.idx + len)
            .ok_or_else(|| self.error("truncated escape"))?
            .iter()
            .collect();
        let code = u32::from_str_radix(&digits, 16).map_err(|_| self.error("invalid escape"))?;
        self.idx += len;
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }
}
