//! Filter expressions used as query criteria.
//!
//! Supports expressions like:
//! - `rating > 3`
//! - `director == 'Stanley Kubrick'`
//! - `rating >= 4 AND genre != 'action'`
//! - `(rating IS NULL) OR (genre IN ('horror', 'thriller'))`
//! - `title CONTAINS 'royale'` (case-insensitive substring)

use crate::column::ColumnValue;
use crate::error::ExprError;

/// A parsed expression that can be evaluated against an object.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Compare column to a literal value
    Compare {
        column: String,
        op: CompareOp,
        value: ColumnValue,
    },
    /// Column equals one of the listed values
    In { column: String, values: Vec<ColumnValue> },
    /// Case-insensitive substring match on a string column
    Contains { column: String, needle: String },
    IsNull { column: String },
    IsNotNull { column: String },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn equals(column: impl Into<String>, value: impl Into<ColumnValue>) -> Expr {
        Expr::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<ColumnValue>) -> Expr {
        Expr::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn any_of(column: impl Into<String>, values: Vec<ColumnValue>) -> Expr {
        Expr::In {
            column: column.into(),
            values,
        }
    }

    pub fn contains(column: impl Into<String>, needle: impl Into<String>) -> Expr {
        Expr::Contains {
            column: column.into(),
            needle: needle.into(),
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq, // ==
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(ColumnValue),
    Op(CompareOp),
    And,
    Or,
    Not,
    Is,
    In,
    Contains,
    Comma,
    LParen,
    RParen,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Literal(value) => format!("literal {:?}", value),
            Token::Eof => "end of input".to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// Splits the input into tokens up front, keeping the position of each one.
fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        let token = match c {
            '(' => {
                pos += 1;
                Token::LParen
            }
            ')' => {
                pos += 1;
                Token::RParen
            }
            ',' => {
                pos += 1;
                Token::Comma
            }
            '=' => {
                // `=` and `==` both mean equality
                pos += if chars.get(pos + 1) == Some(&'=') { 2 } else { 1 };
                Token::Op(CompareOp::Eq)
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    pos += 2;
                    Token::Op(CompareOp::Ne)
                } else {
                    pos += 1;
                    Token::Not
                }
            }
            '<' | '>' => {
                let or_equal = chars.get(pos + 1) == Some(&'=');
                pos += if or_equal { 2 } else { 1 };
                Token::Op(match (c, or_equal) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                })
            }
            '\'' | '"' => {
                let (text, next) = read_string(&chars, pos)?;
                pos = next;
                Token::Literal(ColumnValue::String(text))
            }
            '-' if chars.get(pos + 1).is_some_and(|n| n.is_ascii_digit() || *n == '.') => {
                let (value, next) = read_number(&chars, pos + 1);
                pos = next;
                Token::Literal(match value {
                    ColumnValue::Int64(v) => ColumnValue::Int64(-v),
                    ColumnValue::Float64(v) => ColumnValue::Float64(-v),
                    other => other,
                })
            }
            _ if c.is_ascii_digit() => {
                let (value, next) = read_number(&chars, pos);
                pos = next;
                Token::Literal(value)
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut end = pos;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let ident: String = chars[pos..end].iter().collect();
                pos = end;
                match ident.to_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "IN" => Token::In,
                    "CONTAINS" => Token::Contains,
                    "NULL" => Token::Literal(ColumnValue::Null),
                    "TRUE" => Token::Literal(ColumnValue::Bool(true)),
                    "FALSE" => Token::Literal(ColumnValue::Bool(false)),
                    _ => Token::Ident(ident),
                }
            }
            _ => return Err(ExprError::UnexpectedChar { ch: c, pos }),
        };
        tokens.push((token, start));
    }

    tokens.push((Token::Eof, chars.len()));
    Ok(tokens)
}

fn read_number(chars: &[char], mut pos: usize) -> (ColumnValue, usize) {
    let mut text = String::new();
    let mut is_float = false;

    while let Some(&c) = chars.get(pos) {
        if c.is_ascii_digit() {
            text.push(c);
        } else if c == '.' && !is_float {
            is_float = true;
            text.push(c);
        } else {
            break;
        }
        pos += 1;
    }

    let value = if is_float {
        ColumnValue::Float64(text.parse().unwrap_or(0.0))
    } else {
        ColumnValue::Int64(text.parse().unwrap_or(0))
    };
    (value, pos)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExprError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut pos = start + 1;

    while let Some(&c) = chars.get(pos) {
        pos += 1;
        if c == quote {
            return Ok((text, pos));
        }
        if c == '\\' {
            if let Some(&escaped) = chars.get(pos) {
                pos += 1;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
            }
        } else {
            text.push(c);
        }
    }

    Err(ExprError::UnterminatedString { pos: start })
}

/// Recursive descent parser over a token list.
struct Parser {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // tokenize always terminates the list with Eof
        &self.tokens[self.cursor.min(self.tokens.len() - 1)].0
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        if *self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(ExprError::Expected {
                expected: expected.describe(),
                found: self.current().describe(),
            })
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while *self.current() == Token::Or {
            self.advance();
            left = left.or(self.parse_and()?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while *self.current() == Token::And {
            self.advance();
            left = left.and(self.parse_not()?);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if *self.current() == Token::Not {
            self.advance();
            return Ok(self.parse_not()?.negate());
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, ExprError> {
        if *self.current() == Token::LParen {
            self.advance();
            let expr = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(expr);
        }

        let column = match self.advance() {
            Token::Ident(name) => name,
            other => {
                return Err(ExprError::Expected {
                    expected: "column name".to_string(),
                    found: other.describe(),
                })
            }
        };

        match self.advance() {
            Token::Is => {
                let negated = *self.current() == Token::Not;
                if negated {
                    self.advance();
                }
                self.expect(Token::Literal(ColumnValue::Null))?;
                Ok(if negated {
                    Expr::IsNotNull { column }
                } else {
                    Expr::IsNull { column }
                })
            }
            Token::In => {
                self.expect(Token::LParen)?;
                let mut values = vec![self.parse_literal()?];
                while *self.current() == Token::Comma {
                    self.advance();
                    values.push(self.parse_literal()?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::In { column, values })
            }
            Token::Contains => match self.parse_literal()? {
                ColumnValue::String(needle) => Ok(Expr::Contains { column, needle }),
                other => Err(ExprError::Expected {
                    expected: "string after CONTAINS".to_string(),
                    found: format!("literal {:?}", other),
                }),
            },
            Token::Op(op) => {
                let value = self.parse_literal()?;
                Ok(Expr::Compare { column, op, value })
            }
            other => Err(ExprError::Expected {
                expected: "comparison operator".to_string(),
                found: other.describe(),
            }),
        }
    }

    fn parse_literal(&mut self) -> Result<ColumnValue, ExprError> {
        match self.advance() {
            Token::Literal(value) => Ok(value),
            other => Err(ExprError::Expected {
                expected: "literal value".to_string(),
                found: other.describe(),
            }),
        }
    }
}

/// Parse an expression string into an Expr AST.
pub fn parse_expr(input: &str) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        cursor: 0,
    };
    let expr = parser.parse_or()?;

    if *parser.current() != Token::Eof {
        return Err(ExprError::TrailingInput {
            found: parser.current().describe(),
        });
    }

    Ok(expr)
}

/// Evaluate an expression using a column lookup function.
///
/// A column the lookup does not know evaluates like NULL.
pub fn eval_expr<F>(expr: &Expr, get_column: &F) -> bool
where
    F: Fn(&str) -> Option<ColumnValue>,
{
    match expr {
        Expr::Compare { column, op, value } => match get_column(column) {
            Some(col_val) => compare_values(&col_val, *op, value),
            None => false,
        },
        Expr::In { column, values } => match get_column(column) {
            Some(col_val) => values.iter().any(|v| compare_values(&col_val, CompareOp::Eq, v)),
            None => false,
        },
        Expr::Contains { column, needle } => match get_column(column) {
            Some(ColumnValue::String(s)) => s.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        Expr::IsNull { column } => matches!(get_column(column), Some(ColumnValue::Null) | None),
        Expr::IsNotNull { column } => !matches!(get_column(column), Some(ColumnValue::Null) | None),
        Expr::And(left, right) => eval_expr(left, get_column) && eval_expr(right, get_column),
        Expr::Or(left, right) => eval_expr(left, get_column) || eval_expr(right, get_column),
        Expr::Not(inner) => !eval_expr(inner, get_column),
    }
}

/// Compare a column value to a literal value.
fn compare_values(col_val: &ColumnValue, op: CompareOp, literal: &ColumnValue) -> bool {
    // Any comparison involving NULL is unknown, treated as false.
    if col_val.is_null() || literal.is_null() {
        return false;
    }

    let comparable = match (col_val, literal) {
        (ColumnValue::String(_), ColumnValue::String(_)) | (ColumnValue::Bool(_), ColumnValue::Bool(_)) => true,
        (a, b) => a.as_f64().is_some() && b.as_f64().is_some(),
    };
    if !comparable {
        return false;
    }

    if matches!(col_val, ColumnValue::Bool(_)) && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
        return false;
    }

    let ordering = col_val.total_cmp(literal);
    match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Ne => ordering.is_ne(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
    }
}

/// Extract all column names referenced in an expression.
pub fn extract_columns(expr: &Expr) -> Vec<String> {
    let mut columns = Vec::new();
    extract_columns_recursive(expr, &mut columns);
    columns.sort();
    columns.dedup();
    columns
}

fn extract_columns_recursive(expr: &Expr, columns: &mut Vec<String>) {
    match expr {
        Expr::Compare { column, .. }
        | Expr::In { column, .. }
        | Expr::Contains { column, .. }
        | Expr::IsNull { column }
        | Expr::IsNotNull { column } => columns.push(column.clone()),
        Expr::And(left, right) | Expr::Or(left, right) => {
            extract_columns_recursive(left, columns);
            extract_columns_recursive(right, columns);
        }
        Expr::Not(inner) => extract_columns_recursive(inner, columns),
    }
}
