//! Filter expressions used by cascading lookup rules and visibility rules.
//!
//! A small boolean language over column comparisons:
//!
//! ```text
//! country_code = '{country}' AND (active = TRUE OR kind IN ('a', 'b'))
//! ```
//!
//! `{name}` placeholders, bare or inside a string literal, are substituted
//! at evaluation time. Expressions are parsed once into a [`FilterExpr`]
//! tree; the engine compiles that tree into parameterised SQL, and the
//! visibility layer evaluates it directly against record JSON.

use serde_json::{Map, Value};
use std::fmt;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// A piece of a string literal that may contain placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Placeholder(String),
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    /// A bare `{name}` placeholder.
    Placeholder(String),
    /// A string literal containing at least one placeholder.
    Template(Vec<Segment>),
}

/// Concrete value of an operand after placeholder substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Operand {
    /// Substitutes placeholders. Unbound placeholders are an error.
    pub fn resolve(&self, bindings: &dyn Fn(&str) -> Option<String>) -> Result<Scalar, String> {
        let bind = |name: &str| {
            bindings(name).ok_or_else(|| format!("no value bound for placeholder '{{{name}}}'"))
        };
        Ok(match self {
            Self::Null => Scalar::Null,
            Self::Bool(b) => Scalar::Bool(*b),
            Self::Integer(i) => Scalar::Integer(*i),
            Self::Real(r) => Scalar::Real(*r),
            Self::Text(s) => Scalar::Text(s.clone()),
            Self::Placeholder(name) => Scalar::Text(bind(name)?),
            Self::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Placeholder(name) => out.push_str(&bind(name)?),
                    }
                }
                Scalar::Text(out)
            }
        })
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Compare {
        column: String,
        op: CompareOp,
        value: Operand,
    },
    In {
        column: String,
        values: Vec<Operand>,
        negated: bool,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

/// Error returned when an expression does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParseError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for FilterParseError {}

impl FilterExpr {
    /// Parses an expression.
    pub fn parse(input: &str) -> Result<Self, FilterParseError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(parser.error_at(tok.pos, "unexpected trailing input")),
        }
    }

    /// Column names referenced anywhere in the expression, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Self::Not(inner) => inner.collect_columns(out),
            Self::Compare { column, .. } | Self::In { column, .. } | Self::IsNull { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
        }
    }

    /// Placeholder names referenced anywhere in the expression.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit_operands(&mut |operand| match operand {
            Operand::Placeholder(name) => out.push(name.as_str()),
            Operand::Template(segments) => {
                for segment in segments {
                    if let Segment::Placeholder(name) = segment {
                        out.push(name.as_str());
                    }
                }
            }
            _ => {}
        });
        out.dedup();
        out
    }

    fn visit_operands<'a>(&'a self, f: &mut dyn FnMut(&'a Operand)) {
        match self {
            Self::And(a, b) | Self::Or(a, b) => {
                a.visit_operands(f);
                b.visit_operands(f);
            }
            Self::Not(inner) => inner.visit_operands(f),
            Self::Compare { value, .. } => f(value),
            Self::In { values, .. } => values.iter().for_each(|v| f(v)),
            Self::IsNull { .. } => {}
        }
    }

    /// Evaluates the expression against a JSON record.
    ///
    /// Comparisons involving a missing or null value are false, as in SQL.
    pub fn evaluate(
        &self,
        record: &Map<String, Value>,
        bindings: &dyn Fn(&str) -> Option<String>,
    ) -> Result<bool, String> {
        Ok(match self {
            Self::And(a, b) => a.evaluate(record, bindings)? && b.evaluate(record, bindings)?,
            Self::Or(a, b) => a.evaluate(record, bindings)? || b.evaluate(record, bindings)?,
            Self::Not(inner) => !inner.evaluate(record, bindings)?,
            Self::IsNull { column, negated } => {
                let is_null = matches!(record.get(column), None | Some(Value::Null));
                is_null != *negated
            }
            Self::Compare { column, op, value } => {
                let left = record.get(column).map(scalar_from_json).unwrap_or(Scalar::Null);
                let right = value.resolve(bindings)?;
                compare(&left, *op, &right)
            }
            Self::In {
                column,
                values,
                negated,
            } => {
                let left = record.get(column).map(scalar_from_json).unwrap_or(Scalar::Null);
                if left == Scalar::Null {
                    return Ok(false);
                }
                let mut found = false;
                for v in values {
                    if compare(&left, CompareOp::Eq, &v.resolve(bindings)?) {
                        found = true;
                        break;
                    }
                }
                found != *negated
            }
        })
    }
}

fn scalar_from_json(value: &Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null,
        Value::Bool(b) => Scalar::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Scalar::Integer(i),
            None => Scalar::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Scalar::Text(s.clone()),
        other => Scalar::Text(other.to_string()),
    }
}

fn as_number(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::Integer(i) => Some(*i as f64),
        Scalar::Real(r) => Some(*r),
        Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn compare(left: &Scalar, op: CompareOp, right: &Scalar) -> bool {
    use std::cmp::Ordering;

    if *left == Scalar::Null || *right == Scalar::Null {
        return false;
    }
    if op == CompareOp::Like {
        return match (left, right) {
            (Scalar::Text(value), Scalar::Text(pattern)) => like_matches(value, pattern),
            _ => false,
        };
    }
    let ordering = match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
        CompareOp::Like => false,
    }
}

/// SQL `LIKE` semantics: `%` any run, `_` any single char, ASCII case-insensitive.
fn like_matches(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().map(|c| c.to_ascii_lowercase()).collect();
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut vi, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == v[vi]) {
            vi += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, vi));
            pi += 1;
        } else if let Some((sp, sv)) = star {
            pi = sp + 1;
            vi = sv + 1;
            star = Some((sp, sv + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

// ── Tokenizer ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Keyword(Keyword),
    Str(String),
    Number(String),
    Placeholder(String),
    Op(CompareOp),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    And,
    Or,
    Not,
    In,
    Is,
    Null,
    Like,
    True,
    False,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn keyword(word: &str) -> Option<Keyword> {
    Some(match word.to_ascii_uppercase().as_str() {
        "AND" => Keyword::And,
        "OR" => Keyword::Or,
        "NOT" => Keyword::Not,
        "IN" => Keyword::In,
        "IS" => Keyword::Is,
        "NULL" => Keyword::Null,
        "LIKE" => Keyword::Like,
        "TRUE" => Keyword::True,
        "FALSE" => Keyword::False,
        _ => return None,
    })
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterParseError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let err = |pos: usize, message: &str| FilterParseError {
        position: pos,
        message: message.to_string(),
    };
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, pos });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, pos });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, pos });
                i += 1;
            }
            '=' => {
                tokens.push(Token { kind: TokenKind::Op(CompareOp::Eq), pos });
                i += 1;
            }
            '!' | '<' | '>' => {
                let next = chars.get(i + 1).map(|(_, n)| *n);
                let (op, width) = match (c, next) {
                    ('!', Some('=')) => (CompareOp::NotEq, 2),
                    ('<', Some('>')) => (CompareOp::NotEq, 2),
                    ('<', Some('=')) => (CompareOp::LtEq, 2),
                    ('>', Some('=')) => (CompareOp::GtEq, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    ('>', _) => (CompareOp::Gt, 1),
                    _ => return Err(err(pos, "expected '=' after '!'")),
                };
                tokens.push(Token { kind: TokenKind::Op(op), pos });
                i += width;
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err(pos, "unterminated string literal")),
                        Some((_, '\'')) if matches!(chars.get(i + 1), Some((_, '\''))) => {
                            value.push('\'');
                            i += 2;
                        }
                        Some((_, '\'')) => {
                            i += 1;
                            break;
                        }
                        Some((_, ch)) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token { kind: TokenKind::Str(value), pos });
            }
            '{' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err(pos, "unterminated placeholder")),
                        Some((_, '}')) => {
                            i += 1;
                            break;
                        }
                        Some((_, ch)) if ch.is_ascii_alphanumeric() || *ch == '_' => {
                            name.push(*ch);
                            i += 1;
                        }
                        Some((p, _)) => return Err(err(*p, "invalid character in placeholder")),
                    }
                }
                if name.is_empty() {
                    return Err(err(pos, "empty placeholder"));
                }
                tokens.push(Token { kind: TokenKind::Placeholder(name), pos });
            }
            c if c.is_ascii_digit() || (c == '-' && matches!(chars.get(i + 1), Some((_, d)) if d.is_ascii_digit())) => {
                let mut text = String::from(c);
                i += 1;
                let mut seen_dot = false;
                while let Some((_, ch)) = chars.get(i) {
                    if ch.is_ascii_digit() {
                        text.push(*ch);
                    } else if *ch == '.' && !seen_dot {
                        seen_dot = true;
                        text.push('.');
                    } else {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token { kind: TokenKind::Number(text), pos });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some((_, ch)) = chars.get(i) {
                    if ch.is_ascii_alphanumeric() || *ch == '_' {
                        word.push(*ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                let kind = match keyword(&word) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident(word),
                };
                tokens.push(Token { kind, pos });
            }
            _ => return Err(err(pos, &format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

// ── Parser ───────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn end_pos(&self) -> usize {
        self.tokens.last().map(|t| t.pos + 1).unwrap_or(0)
    }

    fn error_at(&self, position: usize, message: &str) -> FilterParseError {
        FilterParseError {
            position,
            message: message.to_string(),
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if matches!(self.peek(), Some(Token { kind: TokenKind::Keyword(k), .. }) if *k == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, FilterParseError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, FilterParseError> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_unary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, FilterParseError> {
        if self.eat_keyword(Keyword::Not) {
            return Ok(FilterExpr::Not(Box::new(self.parse_unary()?)));
        }
        if matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. })) {
            self.pos += 1;
            let inner = self.parse_or()?;
            match self.next() {
                Some(Token { kind: TokenKind::RParen, .. }) => return Ok(inner),
                Some(tok) => return Err(self.error_at(tok.pos, "expected ')'")),
                None => return Err(self.error_at(self.end_pos(), "expected ')'")),
            }
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<FilterExpr, FilterParseError> {
        let column = match self.next() {
            Some(Token { kind: TokenKind::Ident(name), .. }) => name,
            Some(tok) => return Err(self.error_at(tok.pos, "expected column name")),
            None => return Err(self.error_at(self.end_pos(), "expected column name")),
        };

        if self.eat_keyword(Keyword::Is) {
            let negated = self.eat_keyword(Keyword::Not);
            if !self.eat_keyword(Keyword::Null) {
                return Err(self.error_at(self.end_pos(), "expected NULL after IS"));
            }
            return Ok(FilterExpr::IsNull { column, negated });
        }

        let negated = self.eat_keyword(Keyword::Not);
        if self.eat_keyword(Keyword::In) {
            match self.next() {
                Some(Token { kind: TokenKind::LParen, .. }) => {}
                Some(tok) => return Err(self.error_at(tok.pos, "expected '(' after IN")),
                None => return Err(self.error_at(self.end_pos(), "expected '(' after IN")),
            }
            let mut values = vec![self.parse_operand()?];
            loop {
                match self.next() {
                    Some(Token { kind: TokenKind::Comma, .. }) => values.push(self.parse_operand()?),
                    Some(Token { kind: TokenKind::RParen, .. }) => break,
                    Some(tok) => return Err(self.error_at(tok.pos, "expected ',' or ')'")),
                    None => return Err(self.error_at(self.end_pos(), "expected ')'")),
                }
            }
            return Ok(FilterExpr::In {
                column,
                values,
                negated,
            });
        }
        if self.eat_keyword(Keyword::Like) {
            let value = self.parse_operand()?;
            let expr = FilterExpr::Compare {
                column,
                op: CompareOp::Like,
                value,
            };
            return Ok(if negated { FilterExpr::Not(Box::new(expr)) } else { expr });
        }
        if negated {
            return Err(self.error_at(self.end_pos(), "expected IN or LIKE after NOT"));
        }

        let op = match self.next() {
            Some(Token { kind: TokenKind::Op(op), .. }) => op,
            Some(tok) => return Err(self.error_at(tok.pos, "expected comparison operator")),
            None => return Err(self.error_at(self.end_pos(), "expected comparison operator")),
        };
        let value = self.parse_operand()?;
        Ok(FilterExpr::Compare { column, op, value })
    }

    fn parse_operand(&mut self) -> Result<Operand, FilterParseError> {
        let tok = match self.next() {
            Some(tok) => tok,
            None => return Err(self.error_at(self.end_pos(), "expected value")),
        };
        match tok.kind {
            TokenKind::Str(s) => Ok(string_operand(&s)),
            TokenKind::Placeholder(name) => Ok(Operand::Placeholder(name)),
            TokenKind::Number(text) => {
                if text.contains('.') {
                    text.parse()
                        .map(Operand::Real)
                        .map_err(|_| self.error_at(tok.pos, "invalid number"))
                } else {
                    text.parse()
                        .map(Operand::Integer)
                        .map_err(|_| self.error_at(tok.pos, "invalid number"))
                }
            }
            TokenKind::Keyword(Keyword::Null) => Ok(Operand::Null),
            TokenKind::Keyword(Keyword::True) => Ok(Operand::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Ok(Operand::Bool(false)),
            _ => Err(self.error_at(tok.pos, "expected value")),
        }
    }
}

/// Splits a string literal into text and `{placeholder}` segments.
fn string_operand(s: &str) -> Operand {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = s;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end)
                if end > 0
                    && after[..end]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                text.push_str(&rest[..start]);
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Placeholder(after[..end].to_string()));
                rest = &after[end + 1..];
            }
            _ => {
                text.push_str(&rest[..=start]);
                rest = after;
            }
        }
    }
    text.push_str(rest);
    if segments.is_empty() {
        return Operand::Text(text);
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    match segments.as_slice() {
        [Segment::Placeholder(name)] => Operand::Placeholder(name.clone()),
        _ => Operand::Template(segments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards() {
        assert!(like_matches("California", "cal%"));
        assert!(like_matches("Texas", "%XA%"));
        assert!(like_matches("abc", "a_c"));
        assert!(!like_matches("abc", "a_d"));
        assert!(like_matches("", "%"));
        assert!(!like_matches("abc", "ab"));
    }

    #[test]
    fn quoted_placeholder_is_a_placeholder() {
        assert_eq!(string_operand("{country}"), Operand::Placeholder("country".into()));
        assert_eq!(string_operand("plain"), Operand::Text("plain".into()));
        assert_eq!(
            string_operand("{country}-%"),
            Operand::Template(vec![
                Segment::Placeholder("country".into()),
                Segment::Text("-%".into()),
            ])
        );
        assert_eq!(string_operand("a{b"), Operand::Text("a{b".into()));
    }
}
