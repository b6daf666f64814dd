use crate::helpers::{collapse_placeholders, squish, strip_comments};
use crate::QueryError;
use core::ops::ControlFlow;
use sha1::{Digest, Sha1};
use sqlparser::ast::{
    visit_expressions_mut, Expr, Statement, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Span;

/// Turns a squished SQL statement into its canonical shape.
///
/// Implementations replace literal constants with placeholders so that
/// statements differing only in their values produce the same output. A
/// statement that cannot be understood is reported as a [`QueryError`] and
/// the caller skips it.
pub trait Normalizer {
    fn normalize(&self, statement: &str) -> Result<String, QueryError>;
}

/// [`Normalizer`] backed by `sqlparser`'s PostgreSQL dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresNormalizer;

impl Normalizer for PostgresNormalizer {
    fn normalize(&self, statement: &str) -> Result<String, QueryError> {
        format_query(statement)
    }
}

impl<N: Normalizer + ?Sized> Normalizer for &N {
    fn normalize(&self, statement: &str) -> Result<String, QueryError> {
        (**self).normalize(statement)
    }
}

fn placeholder() -> ValueWithSpan {
    ValueWithSpan {
        value: Value::Placeholder("?".to_string()),
        span: Span::empty(),
    }
}

fn replace_value(value: &mut ValueWithSpan) {
    // NULL is kept as a keyword
    if !matches!(value.value, Value::Null) {
        *value = placeholder();
    }
}

fn replace_values_in_expr(expr: &mut Expr) {
    match expr {
        Expr::Value(value) => replace_value(value),
        // signed numbers are a single constant
        Expr::UnaryOp {
            op: UnaryOperator::Minus | UnaryOperator::Plus,
            expr: operand,
        } if matches!(operand.as_ref(), Expr::Value(v) if !matches!(v.value, Value::Null)) => {
            *expr = Expr::Value(placeholder());
        }
        // `DATE '2024-01-01'` keeps its type and loses its value
        Expr::TypedString(typed) => replace_value(&mut typed.value),
        _ => {}
    }
}

fn replace_values_with_placeholders(statements: &mut [Statement]) {
    for statement in statements {
        let _ = visit_expressions_mut(statement, |expr| {
            replace_values_in_expr(expr);
            ControlFlow::<()>::Continue(())
        });
    }
}

/// Formats a SQL query by replacing all literal values with placeholders.
///
/// Numbers, strings, booleans and bind parameters (`$1`) all become `?`.
/// Every statement in the input is kept, joined with `; `.
///
/// Returns `QueryError::ParseError` if the SQL cannot be parsed.
/// Returns `QueryError::InvalidQuery` if no SQL statement is found.
pub(crate) fn format_query(input: &str) -> Result<String, QueryError> {
    let mut ast = Parser::parse_sql(&PostgreSqlDialect {}, input)?;
    if ast.is_empty() {
        return Err(QueryError::InvalidQuery);
    }

    replace_values_with_placeholders(&mut ast);
    Ok(ast
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; "))
}

/// Builds the grouping key and display sample for a raw logged statement.
///
/// The sample is the statement with its trailing comment removed and its
/// whitespace squished; the key is the sample run through `normalizer` with
/// placeholder lists collapsed.
pub(crate) fn canonicalize<N: Normalizer + ?Sized>(
    raw: &str,
    normalizer: &N,
) -> Result<(String, String), QueryError> {
    let sample = squish(&strip_comments(raw));
    let key = collapse_placeholders(&normalizer.normalize(&sample)?);
    Ok((key, sample))
}

/// Calculates SHA1 hash fingerprint of a query
pub(crate) fn fingerprint_query(query: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(query.as_bytes());
    let result = hasher.finalize();
    format!("{result:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_with_operators() {
        let input = "select * from tablename where id = 1 and name like 'test' and age > 10 and age < 20 and age != 30 and age <> 40";
        let expected = "SELECT * FROM tablename WHERE id = ? AND name LIKE ? AND age > ? AND age < ? AND age <> ? AND age <> ?";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_select_with_in() {
        let input = "select * from tablename where id in (1,2,3) and name not in ('a','b')";
        let expected = "SELECT * FROM tablename WHERE id IN (?, ?, ?) AND name NOT IN (?, ?)";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_select_with_between() {
        let input = "select * from tablename where age between 10 and 20";
        let expected = "SELECT * FROM tablename WHERE age BETWEEN ? AND ?";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_select_with_join() {
        let input = "SELECT * FROM a JOIN b ON a.id = b.a_id WHERE b.x = 5";
        let expected = "SELECT * FROM a JOIN b ON a.id = b.a_id WHERE b.x = ?";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_select_with_cte() {
        let input = "WITH recent AS (SELECT id FROM orders WHERE total > 100) SELECT * FROM recent";
        let expected = "WITH recent AS (SELECT id FROM orders WHERE total > ?) SELECT * FROM recent";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_select_with_subquery() {
        let input = "select (SELECT id FROM foobar WHERE id=1) from tablename";
        let expected = "SELECT (SELECT id FROM foobar WHERE id = ?) FROM tablename";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_bind_parameters() {
        let input = "SELECT * FROM users WHERE id = $1 AND name = $2";
        let expected = "SELECT * FROM users WHERE id = ? AND name = ?";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_update_keeps_null() {
        let input = "UPDATE users SET deleted_at = NULL WHERE id = 7";
        let expected = "UPDATE users SET deleted_at = NULL WHERE id = ?";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_insert() {
        let input = "INSERT INTO users (name, age) VALUES ('test', 20)";
        let expected = "INSERT INTO users (name, age) VALUES (?, ?)";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_delete() {
        let input =
            "DELETE FROM users WHERE age > 18 AND name LIKE '%test%' AND age BETWEEN 18 AND 100";
        let expected = "DELETE FROM users WHERE age > ? AND name LIKE ? AND age BETWEEN ? AND ?";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_multiple_statements() {
        assert_eq!(format_query("SELECT 1; SELECT 2").unwrap(), "SELECT ?; SELECT ?");
    }

    #[test]
    fn test_signed_numbers() {
        let input = "SELECT * FROM points WHERE x = -1 AND y > +2.5 AND z < -(3)";
        let expected = "SELECT * FROM points WHERE x = ? AND y > ? AND z < -(?)";
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_signed_numbers_share_key() {
        let (positive, _) = canonicalize("SELECT * FROM t WHERE x = 1", &PostgresNormalizer).unwrap();
        let (negative, _) = canonicalize("SELECT * FROM t WHERE x = -1", &PostgresNormalizer).unwrap();
        assert_eq!(positive, negative);

        let (list, _) =
            canonicalize("SELECT * FROM t WHERE id IN (1, -2)", &PostgresNormalizer).unwrap();
        assert_eq!(list, "SELECT * FROM t WHERE id IN (?)");
    }

    #[test]
    fn test_typed_string() {
        let first = format_query("SELECT * FROM events WHERE day = DATE '2024-01-01'").unwrap();
        let second = format_query("SELECT * FROM events WHERE day = DATE '2024-02-02'").unwrap();
        assert_eq!(first, "SELECT * FROM events WHERE day = DATE ?");
        assert_eq!(first, second);
    }

    #[test]
    fn test_unary_not_is_kept() {
        let input = "SELECT * FROM t WHERE NOT active AND x = -NULL";
        let expected = input;
        assert_eq!(format_query(input).unwrap(), expected);
    }

    #[test]
    fn test_invalid_query() {
        let result = format_query("select * from");
        assert!(matches!(result, Err(QueryError::ParseError(_))));
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(format_query(""), Err(QueryError::InvalidQuery));
    }

    #[test]
    fn test_canonicalize() {
        let raw = "SELECT *\n  FROM users\n  WHERE id IN (1, 2, 3) /* app:web */\n";
        let (key, sample) = canonicalize(raw, &PostgresNormalizer).unwrap();
        assert_eq!(key, "SELECT * FROM users WHERE id IN (?)");
        assert_eq!(sample, "SELECT * FROM users WHERE id IN (1, 2, 3)");
    }

    #[test]
    fn test_canonicalize_literals_share_key() {
        let (first, _) = canonicalize("SELECT * FROM users WHERE id = 1", &PostgresNormalizer).unwrap();
        let (second, _) =
            canonicalize("SELECT  *  FROM users\nWHERE id = 2", &PostgresNormalizer).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "SELECT * FROM users WHERE id = ?");
    }

    #[test]
    fn test_canonicalize_invalid() {
        let result = canonicalize("SELECT * FROM users WHERE", &PostgresNormalizer);
        assert!(matches!(result, Err(QueryError::ParseError(_))));
    }

    #[test]
    fn test_fingerprint_query() {
        let query = "SELECT * FROM table WHERE id = 1";
        let fingerprint = fingerprint_query(query);
        assert_eq!(fingerprint, "a0b2ab83e88b7d55eec3d242dd27ff2bbb0e06cf");
    }
}
