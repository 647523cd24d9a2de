pub mod ast;
pub mod emit;

pub use ast::{eval_formula, Expr, Literal, NullMode, Predicate};
pub use emit::{render_predicate, source_where_clause, Rendered};
