//! SQL translation of query descriptors.
//!
//! Records are stored as JSON bodies next to an integer `id` column. Filter
//! and sort keys address body fields through `json_extract`, except `id`,
//! which maps to the column. Field paths are bound as parameters; only the
//! table name is ever interpolated, and it is validated first. `SQLite` paths
//! have no escape for `"` inside a quoted key, so such field names are
//! rejected.

use crate::models::{Filter, FilterType, SortingMode};
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Checks that `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "'{name}' is not a valid table name"
        )))
    }
}

/// Builds the JSON path for a body field, quoting the key.
fn json_path(field: &str) -> Result<String> {
    if field.contains('"') {
        return Err(Error::InvalidInput(format!(
            "field name '{field}' must not contain '\"'"
        )));
    }
    Ok(format!("$.\"{field}\""))
}

/// Converts a JSON value into a bound SQL parameter.
///
/// Mirrors what `json_extract` yields: booleans become 0/1, nested values
/// compare as their JSON text.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)), SqlValue::Integer),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Appends the SQL expression for `field` and returns it.
///
/// `id` resolves to the column; anything else binds its JSON path.
fn field_expr(field: &str, params: &mut Vec<SqlValue>) -> Result<String> {
    if field == "id" {
        return Ok("id".to_string());
    }
    params.push(SqlValue::Text(json_path(field)?));
    Ok(format!("json_extract(body, ?{})", params.len()))
}

/// Builds a `WHERE` clause from `filter`, appending its parameters.
///
/// Returns an empty string for an empty filter. `null` comparisons use
/// `IS NULL` / `IS NOT NULL`; other operators against `null` match nothing.
pub fn build_where_clause(filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String> {
    if filter.is_empty() {
        return Ok(String::new());
    }

    let conditions = filter
        .iter()
        .map(|(field, condition)| {
            let expr = field_expr(field, params)?;
            Ok(match (&condition.value, condition.filter_type) {
                (Value::Null, FilterType::Equal) => format!("{expr} IS NULL"),
                (Value::Null, FilterType::NotEqual) => format!("{expr} IS NOT NULL"),
                (Value::Null, _) => "0".to_string(),
                (value, filter_type) => {
                    params.push(to_sql_value(value));
                    format!("{expr} {} ?{}", filter_type.as_sql(), params.len())
                },
            })
        })
        .collect::<Result<Vec<String>>>()?;

    Ok(format!(" WHERE {}", conditions.join(" AND ")))
}

/// Builds an `ORDER BY` clause from `sort`, appending its parameters.
///
/// Missing fields sort last in either direction.
pub fn build_order_clause(sort: &SortingMode, params: &mut Vec<SqlValue>) -> Result<String> {
    if sort.is_unordered() {
        return Ok(String::new());
    }

    let terms = sort
        .entries()
        .iter()
        .map(|(field, sort_type)| {
            let expr = field_expr(field, params)?;
            Ok(format!("{expr} {} NULLS LAST", sort_type.as_sql()))
        })
        .collect::<Result<Vec<String>>>()?;

    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

/// Builds the full `SELECT` for a filtered, sorted read.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if a filter or sort key contains `"`.
pub fn build_select(
    table: &str,
    filter: &Filter,
    sort: &SortingMode,
    limit: Option<usize>,
) -> Result<(String, Vec<SqlValue>)> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT body FROM {table}");
    sql.push_str(&build_where_clause(filter, &mut params)?);
    sql.push_str(&build_order_clause(sort, &mut params)?);
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok((sql, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortType;
    use test_case::test_case;

    #[test_case("records" ; "lowercase")]
    #[test_case("_docs_2" ; "underscore and digits")]
    fn test_validate_identifier_accepts(name: &str) {
        assert!(validate_identifier(name).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("2docs" ; "leading digit")]
    #[test_case("docs; DROP TABLE x" ; "injection")]
    #[test_case("my-docs" ; "dash")]
    fn test_validate_identifier_rejects(name: &str) {
        assert!(matches!(validate_identifier(name), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_build_where_clause_empty() {
        let mut params = Vec::new();
        assert_eq!(build_where_clause(&Filter::new(), &mut params).unwrap(), "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_where_clause_numbers_params() {
        let filter = Filter::equal("name", "bob").and("age", FilterType::GreaterThan, 30);
        let mut params = Vec::new();
        let clause = build_where_clause(&filter, &mut params).unwrap();
        // BTreeMap iteration: age before name
        assert_eq!(
            clause,
            " WHERE json_extract(body, ?1) > ?2 AND json_extract(body, ?3) = ?4"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("$.\"age\"".to_string()),
                SqlValue::Integer(30),
                SqlValue::Text("$.\"name\"".to_string()),
                SqlValue::Text("bob".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_where_clause_id_column_and_null() {
        let filter = Filter::by_id(7).and_eq("deleted", Value::Null);
        let mut params = Vec::new();
        let clause = build_where_clause(&filter, &mut params).unwrap();
        assert_eq!(clause, " WHERE json_extract(body, ?1) IS NULL AND id = ?2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_build_order_clause() {
        let sort = SortingMode::with("id", SortType::Descending).and("name", SortType::Ascending);
        let mut params = Vec::new();
        let clause = build_order_clause(&sort, &mut params).unwrap();
        assert_eq!(
            clause,
            " ORDER BY id DESC NULLS LAST, json_extract(body, ?1) ASC NULLS LAST"
        );
        assert_eq!(
            build_order_clause(&SortingMode::unordered(), &mut params).unwrap(),
            ""
        );
    }

    #[test]
    fn test_build_select_with_limit() {
        let (sql, params) = build_select(
            "docs",
            &Filter::equal("kind", "note"),
            &SortingMode::default(),
            Some(1),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT body FROM docs WHERE json_extract(body, ?1) = ?2 ORDER BY id ASC NULLS LAST LIMIT 1"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_quoted_field_names_rejected() {
        let filter = Filter::equal("say \"hi\"", 1);
        let result = build_select("docs", &filter, &SortingMode::default(), None);
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let sort = SortingMode::with("a\"b", SortType::Ascending);
        let result = build_select("docs", &Filter::new(), &sort, None);
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let mut params = Vec::new();
        let clause = build_where_clause(&Filter::equal("it's", 1), &mut params).unwrap();
        assert_eq!(clause, " WHERE json_extract(body, ?1) = ?2");
        assert_eq!(params[0], SqlValue::Text("$.\"it's\"".to_string()));
    }

    #[test]
    fn test_to_sql_value() {
        assert_eq!(to_sql_value(&Value::Bool(true)), SqlValue::Integer(1));
        assert_eq!(to_sql_value(&serde_json::json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(
            to_sql_value(&serde_json::json!([1, 2])),
            SqlValue::Text("[1,2]".to_string())
        );
    }
}
