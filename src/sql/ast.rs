//! Two independent pieces of SQL-generation support: the `formula_mode`
//! arithmetic evaluator below, and a typed predicate/expression AST that
//! `sql::emit` renders instead of concatenating `WHERE`-clause strings at
//! the call site.

use std::collections::HashMap;

use crate::error::RapoError;
use crate::model::FieldValue;

/// A leaf a `Predicate` can compare: a column reference or a bound literal.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(String),
    Literal(Literal),
}

#[derive(Debug, Clone)]
pub enum Literal {
    Text(String),
    Int(i64),
    Real(f64),
}

/// How `Predicate::Eq` treats a `NULL` on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullMode {
    /// `a = b`; `NULL` on either side makes the predicate false.
    Strict,
    /// `a = b OR (a IS NULL AND b IS NULL)`.
    NullEqualsNull,
}

/// A composable `WHERE`-clause predicate. `sql::emit::render_predicate`
/// is the only place that turns one of these into SQL text.
#[derive(Debug, Clone)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Eq(Expr, Expr, NullMode),
    /// `date(field) >= from AND date(field) < to`.
    InWindow(Expr, Expr, Expr),
    InTolerance(Expr, Expr, f64, f64),
    /// A pre-validated SQL boolean expression (a trusted `source_filter_*`
    /// entry out of the control catalogue) inserted verbatim.
    Raw(String),
}

/// Evaluate a `Formula` expression against a row's fields. Supports
/// `+ - * /`, parentheses, bare column names, and numeric literals — enough
/// for the determinant formulas a reconciliation rule typically needs
/// (e.g. `amount_usd - fee_usd`), without building a full SQL expression
/// engine.
pub fn eval_formula(formula: &str, fields: &HashMap<String, FieldValue>) -> Result<f64, RapoError> {
    let tokens = tokenize(formula)?;
    let mut pos = 0;
    let value = parse_expr(&tokens, &mut pos, fields)?;
    if pos != tokens.len() {
        return Err(RapoError::ConfigInvalid(format!(
            "trailing tokens in formula '{}'",
            formula
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(s: &str) -> Result<Vec<Token>, RapoError> {
    let mut out = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => {
                i += 1;
            }
            '+' => {
                out.push(Token::Plus);
                i += 1;
            }
            '-' => {
                out.push(Token::Minus);
                i += 1;
            }
            '*' => {
                out.push(Token::Star);
                i += 1;
            }
            '/' => {
                out.push(Token::Slash);
                i += 1;
            }
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| RapoError::ConfigInvalid(format!("bad number '{}'", text)))?;
                out.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                out.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(RapoError::ConfigInvalid(format!(
                    "unexpected character '{}' in formula",
                    other
                )))
            }
        }
    }
    Ok(out)
}

fn parse_expr(
    tokens: &[Token],
    pos: &mut usize,
    fields: &HashMap<String, FieldValue>,
) -> Result<f64, RapoError> {
    let mut value = parse_term(tokens, pos, fields)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Plus) => {
                *pos += 1;
                value += parse_term(tokens, pos, fields)?;
            }
            Some(Token::Minus) => {
                *pos += 1;
                value -= parse_term(tokens, pos, fields)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_term(
    tokens: &[Token],
    pos: &mut usize,
    fields: &HashMap<String, FieldValue>,
) -> Result<f64, RapoError> {
    let mut value = parse_factor(tokens, pos, fields)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Star) => {
                *pos += 1;
                value *= parse_factor(tokens, pos, fields)?;
            }
            Some(Token::Slash) => {
                *pos += 1;
                let rhs = parse_factor(tokens, pos, fields)?;
                value /= rhs;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_factor(
    tokens: &[Token],
    pos: &mut usize,
    fields: &HashMap<String, FieldValue>,
) -> Result<f64, RapoError> {
    match tokens.get(*pos) {
        Some(Token::Minus) => {
            *pos += 1;
            Ok(-parse_factor(tokens, pos, fields)?)
        }
        Some(Token::Number(n)) => {
            *pos += 1;
            Ok(*n)
        }
        Some(Token::Ident(name)) => {
            *pos += 1;
            fields
                .get(name)
                .and_then(FieldValue::as_f64)
                .ok_or_else(|| RapoError::ConfigInvalid(format!("unknown column '{}' in formula", name)))
        }
        Some(Token::LParen) => {
            *pos += 1;
            let v = parse_expr(tokens, pos, fields)?;
            match tokens.get(*pos) {
                Some(Token::RParen) => {
                    *pos += 1;
                    Ok(v)
                }
                _ => Err(RapoError::ConfigInvalid("unbalanced parentheses in formula".into())),
            }
        }
        other => Err(RapoError::ConfigInvalid(format!(
            "unexpected token {:?} in formula",
            other
        ))),
    }
}
