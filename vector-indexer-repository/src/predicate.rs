//! Row filter predicates for tabular sources.
//!
//! A filter is a list of `field op literal` clauses joined by `AND`, e.g.
//! `level = 'Beginner' AND price >= 10`. Supported operators are `=`, `!=`,
//! `<`, `<=`, `>` and `>=`. Literals are quoted strings, numbers, `true`,
//! `false` or `null`. An empty filter matches every row.

use std::cmp::Ordering;

use serde_json::Value;

use crate::errors::ServiceError;
use vector_indexer_shared::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    field: String,
    op: Op,
    literal: Value,
}

/// A parsed filter predicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Parse a filter expression.
    ///
    /// # Returns
    ///
    /// * `Err(ServiceError::InvalidRequest)` - If the expression is malformed
    pub fn parse(filter: &str) -> Result<Self, ServiceError> {
        let tokens = tokenize(filter)?;
        let mut clauses = Vec::new();
        let mut iter = tokens.into_iter().peekable();

        while iter.peek().is_some() {
            let field = match iter.next() {
                Some(Token::Ident(name)) => name,
                other => return Err(invalid(filter, format!("expected field, got {:?}", other))),
            };
            let op = match iter.next() {
                Some(Token::Op(op)) => op,
                other => {
                    return Err(invalid(filter, format!("expected operator, got {:?}", other)))
                }
            };
            let literal = match iter.next() {
                Some(Token::Literal(value)) => value,
                Some(Token::Ident(word)) => keyword_literal(&word)
                    .ok_or_else(|| invalid(filter, format!("unknown literal '{}'", word)))?,
                other => return Err(invalid(filter, format!("expected literal, got {:?}", other))),
            };
            clauses.push(Clause { field, op, literal });

            match iter.next() {
                None => break,
                Some(Token::Ident(word)) if word.eq_ignore_ascii_case("and") => {
                    if iter.peek().is_none() {
                        return Err(invalid(filter, "dangling AND"));
                    }
                }
                other => return Err(invalid(filter, format!("expected AND, got {:?}", other))),
            }
        }

        Ok(Self { clauses })
    }

    /// Whether the predicate selects every row.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the predicate against a row.
    pub fn matches(&self, row: &RawRecord) -> bool {
        self.clauses.iter().all(|clause| clause.matches(row))
    }
}

impl Clause {
    fn matches(&self, row: &RawRecord) -> bool {
        let value = row.get(&self.field).unwrap_or(&Value::Null);

        if self.literal.is_null() || value.is_null() {
            let both_null = self.literal.is_null() && value.is_null();
            return match self.op {
                Op::Eq => both_null,
                Op::Ne => !both_null,
                _ => false,
            };
        }

        match compare(value, &self.literal) {
            Some(ordering) => match self.op {
                Op::Eq => ordering == Ordering::Equal,
                Op::Ne => ordering != Ordering::Equal,
                Op::Lt => ordering == Ordering::Less,
                Op::Le => ordering != Ordering::Greater,
                Op::Gt => ordering == Ordering::Greater,
                Op::Ge => ordering != Ordering::Less,
            },
            // Incomparable types only satisfy `!=`.
            None => self.op == Op::Ne,
        }
    }
}

fn compare(value: &Value, literal: &Value) -> Option<Ordering> {
    match (value, literal) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::Number(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

fn keyword_literal(word: &str) -> Option<Value> {
    match word.to_ascii_lowercase().as_str() {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => None,
    }
}

fn invalid(filter: &str, msg: impl std::fmt::Display) -> ServiceError {
    ServiceError::invalid_request(format!("invalid filter '{}': {}", filter, msg))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(Op),
    Literal(Value),
}

fn tokenize(filter: &str) -> Result<Vec<Token>, ServiceError> {
    let chars: Vec<char> = filter.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' || c == '"' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(invalid(filter, "unterminated string")),
                    // Doubled quote is an escaped quote.
                    Some(&q) if q == c && chars.get(i + 1) == Some(&c) => {
                        text.push(c);
                        i += 2;
                    }
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some(&other) => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Literal(Value::String(text)));
        } else if matches!(c, '=' | '!' | '<' | '>') {
            let next = chars.get(i + 1).copied();
            let (op, width) = match (c, next) {
                ('=', _) => (Op::Eq, 1),
                ('!', Some('=')) => (Op::Ne, 2),
                ('<', Some('>')) => (Op::Ne, 2),
                ('<', Some('=')) => (Op::Le, 2),
                ('<', _) => (Op::Lt, 1),
                ('>', Some('=')) => (Op::Ge, 2),
                ('>', _) => (Op::Gt, 1),
                _ => return Err(invalid(filter, format!("unexpected '{}'", c))),
            };
            tokens.push(Token::Op(op));
            i += width;
        } else if c.is_ascii_digit() || c == '-' || c == '.' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '.' | '+' | '-')) {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number: serde_json::Number = text
                .parse::<i64>()
                .map(serde_json::Number::from)
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(serde_json::Number::from_f64))
                .ok_or_else(|| invalid(filter, format!("bad number '{}'", text)))?;
            tokens.push(Token::Literal(Value::Number(number)));
        } else if c.is_alphabetic() || c == '_' || c == '`' {
            let quoted = c == '`';
            let start = if quoted { i + 1 } else { i };
            i += 1;
            while i < chars.len()
                && (if quoted { chars[i] != '`' } else { chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.') })
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if quoted {
                if i >= chars.len() {
                    return Err(invalid(filter, "unterminated identifier"));
                }
                i += 1;
            }
            tokens.push(Token::Ident(text));
        } else {
            return Err(invalid(filter, format!("unexpected '{}'", c)));
        }
    }

    Ok(tokens)
}
