//! SQLite emitter: the only module allowed to produce SQL text for a Source
//! Fetcher. Walks a `sql::ast::Predicate` and renders it to a `WHERE` clause
//! plus positional bind parameters, rather than inlining string
//! concatenation at the call site.

use rusqlite::types::Value;

use crate::sql::ast::{Expr, Literal, NullMode, Predicate};
use crate::window::Window;

/// A rendered fragment plus its positional bind parameters.
pub struct Rendered {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Builds the predicate for a Source Fetcher: the date field coerced to
/// DATE falls inside the half-open window, conjoined with an optional raw
/// `source_filter_*` predicate from the trusted control catalogue.
pub fn source_where_clause(date_field: &str, window: &Window, filter: Option<&str>) -> Rendered {
    let mut clauses = vec![Predicate::InWindow(
        Expr::Column(date_field.to_string()),
        Expr::Literal(Literal::Text(window.date_from.to_string())),
        Expr::Literal(Literal::Text(window.date_to.to_string())),
    )];
    if let Some(filter) = filter {
        if !filter.trim().is_empty() {
            clauses.push(Predicate::Raw(filter.to_string()));
        }
    }
    render_predicate(&Predicate::And(clauses))
}

/// Render a `Predicate` tree into SQL text plus its positional bind
/// parameters, in traversal order.
pub fn render_predicate(pred: &Predicate) -> Rendered {
    let mut params = Vec::new();
    let sql = render_inner(pred, &mut params);
    Rendered { sql, params }
}

fn render_inner(pred: &Predicate, params: &mut Vec<Value>) -> String {
    match pred {
        Predicate::And(items) => join_predicates(items, "AND", "1", params),
        Predicate::Or(items) => join_predicates(items, "OR", "0", params),
        Predicate::Eq(a, b, NullMode::Strict) => {
            format!("{} = {}", render_expr(a, params), render_expr(b, params))
        }
        Predicate::Eq(a, b, NullMode::NullEqualsNull) => {
            let a_sql = render_expr(a, params);
            let b_sql = render_expr(b, params);
            format!("({a_sql} = {b_sql} OR ({a_sql} IS NULL AND {b_sql} IS NULL))")
        }
        Predicate::InWindow(field, from, to) => {
            let field_sql = render_expr(field, params);
            let from_sql = render_expr(from, params);
            let to_sql = render_expr(to, params);
            format!("date({field_sql}) >= {from_sql} AND date({field_sql}) < {to_sql}")
        }
        Predicate::InTolerance(a, b, lo, hi) => {
            let a_sql = render_expr(a, params);
            let b_sql = render_expr(b, params);
            params.push(Value::Real(*lo));
            params.push(Value::Real(*hi));
            format!("({a_sql} - {b_sql}) BETWEEN ? AND ?")
        }
        Predicate::Raw(text) => format!("({})", text),
    }
}

fn join_predicates(items: &[Predicate], op: &str, identity: &str, params: &mut Vec<Value>) -> String {
    if items.is_empty() {
        return identity.to_string();
    }
    let rendered: Vec<String> = items.iter().map(|p| render_inner(p, params)).collect();
    format!("({})", rendered.join(&format!(" {} ", op)))
}

fn render_expr(expr: &Expr, params: &mut Vec<Value>) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        Expr::Literal(lit) => {
            params.push(match lit {
                Literal::Text(s) => Value::Text(s.clone()),
                Literal::Int(i) => Value::Integer(*i),
                Literal::Real(r) => Value::Real(*r),
            });
            "?".to_string()
        }
    }
}
