//! SQL fragments for lookup queries.
//!
//! Everything user-supplied goes through positional parameters; identifiers
//! are validated on the way into the metadata store and quoted here.

use metaschema_model::{FilterExpr, Scalar};
use rusqlite::types::{Value, ValueRef};

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn scalar_value(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Integer(i64::from(b)),
        Scalar::Integer(i) => Value::Integer(i),
        Scalar::Real(r) => Value::Real(r),
        Scalar::Text(s) => Value::Text(s),
    }
}

/// Renders a filter as a WHERE fragment, pushing its parameters.
pub fn filter_sql(
    expr: &FilterExpr,
    bindings: &dyn Fn(&str) -> Option<String>,
    params: &mut Vec<Value>,
) -> Result<String, String> {
    Ok(match expr {
        FilterExpr::And(a, b) => format!(
            "({} AND {})",
            filter_sql(a, bindings, params)?,
            filter_sql(b, bindings, params)?
        ),
        FilterExpr::Or(a, b) => format!(
            "({} OR {})",
            filter_sql(a, bindings, params)?,
            filter_sql(b, bindings, params)?
        ),
        FilterExpr::Not(inner) => format!("(NOT {})", filter_sql(inner, bindings, params)?),
        FilterExpr::Compare { column, op, value } => {
            params.push(scalar_value(value.resolve(bindings)?));
            format!("{} {} ?", quote(column), op.as_sql())
        }
        FilterExpr::In {
            column,
            values,
            negated,
        } => {
            for value in values {
                params.push(scalar_value(value.resolve(bindings)?));
            }
            format!(
                "{} {}IN ({})",
                quote(column),
                if *negated { "NOT " } else { "" },
                placeholders(values.len())
            )
        }
        FilterExpr::IsNull { column, negated } => format!(
            "{} IS {}NULL",
            quote(column),
            if *negated { "NOT " } else { "" }
        ),
    })
}

/// `?, ?, ?`
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `%term%` with LIKE wildcards in `term` escaped by `\`.
pub fn contains_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Text form of a column value as shown to users.
pub fn text_of(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(r) => r.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

/// Accumulates `AND`-ed conditions with their parameters.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    pub fn push(&mut self, clause: String, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause);
        self.params.extend(params);
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// ` WHERE a AND b`, or nothing.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_binds_parent_value() {
        let expr = FilterExpr::parse("country_code = '{country}' AND active = true").unwrap();
        let mut params = Vec::new();
        let sql = filter_sql(&expr, &|_| Some("US".into()), &mut params).unwrap();
        assert_eq!(sql, "(\"country_code\" = ? AND \"active\" = ?)");
        assert_eq!(params, vec![Value::Text("US".into()), Value::Integer(1)]);
    }

    #[test]
    fn in_and_null_checks() {
        let expr = FilterExpr::parse("kind NOT IN ('a', 'b') OR parent_id IS NULL").unwrap();
        let mut params = Vec::new();
        let sql = filter_sql(&expr, &|_| None, &mut params).unwrap();
        assert_eq!(sql, "(\"kind\" NOT IN (?, ?) OR \"parent_id\" IS NULL)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
    }
}
