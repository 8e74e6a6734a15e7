//! Programmatic selector tree — a typed WHERE-clause builder with a closed
//! operator set.

use crate::error::{Error, Result};
use crate::types::Value;

/// Closed recursive selector variant: no stringly-typed operator keys reach
/// callers.
#[derive(Debug, Clone)]
pub enum Selector {
    Not(Box<Selector>),
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Lt(String, Value),
    Ge(String, Value),
    Le(String, Value),
    In(String, Vec<Value>),
    Instr(String, Value),
    Between(String, Value, Value),
    Like(String, String),
    Glob(String, String),
}

/// Render a selector into a parameterised SQL fragment plus its bound
/// values, in left-to-right evaluation order. No value is ever interpolated
/// into the SQL string.
pub fn selector_to_sql(selector: &Selector) -> Result<(String, Vec<Value>)> {
    Ok(match selector {
        Selector::Not(inner) => {
            let (sql, values) = selector_to_sql(inner)?;
            (format!("not ({sql})"), values)
        }
        Selector::And(children) => fold(children, "and")?,
        Selector::Or(children) => fold(children, "or")?,
        Selector::Eq(field, value) => (format!("{field} = ?"), vec![value.clone()]),
        Selector::Ne(field, value) => (format!("{field} != ?"), vec![value.clone()]),
        Selector::Gt(field, value) => (format!("{field} > ?"), vec![value.clone()]),
        Selector::Lt(field, value) => (format!("{field} < ?"), vec![value.clone()]),
        Selector::Ge(field, value) => (format!("{field} >= ?"), vec![value.clone()]),
        Selector::Le(field, value) => (format!("{field} <= ?"), vec![value.clone()]),
        Selector::In(field, values) => {
            let placeholders = vec!["?"; values.len()].join(",");
            (format!("{field} in ({placeholders})"), values.clone())
        }
        Selector::Instr(field, value) => (format!("instr({field}, ?)"), vec![value.clone()]),
        Selector::Between(field, lo, hi) => (
            format!("{field} between ? and ?"),
            vec![lo.clone(), hi.clone()],
        ),
        Selector::Like(field, value) => (format!("{field} like ?"), vec![Value::Text(value.clone())]),
        Selector::Glob(field, value) => (format!("{field} glob ?"), vec![Value::Text(value.clone())]),
    })
}

/// The closed set of operator tags a dynamic (e.g. deserialised) selector
/// tree is allowed to carry before being lifted into [`Selector`]. Used by
/// callers that build selectors from an external representation instead of
/// constructing the enum directly.
pub const KNOWN_OPERATORS: &[&str] = &[
    "NOT", "AND", "OR", "EQ", "NE", "GT", "LT", "GE", "LE", "IN", "INSTR", "BETWEEN", "LIKE", "GLOB",
];

/// Validate an operator tag against the closed set, raising
/// [`Error::UnknownSelector`] for anything outside it.
pub fn validate_operator(tag: &str) -> Result<()> {
    if KNOWN_OPERATORS.contains(&tag) {
        Ok(())
    } else {
        Err(Error::UnknownSelector(tag.to_string()))
    }
}

fn fold(children: &[Selector], logic: &str) -> Result<(String, Vec<Value>)> {
    if children.is_empty() {
        return Err(Error::UnknownSelector(format!(
            "empty {logic} selector list"
        )));
    }
    let mut fragments = Vec::with_capacity(children.len());
    let mut values = Vec::new();
    for child in children {
        let (sql, mut child_values) = selector_to_sql(child)?;
        fragments.push(sql);
        values.append(&mut child_values);
    }
    Ok((format!("({})", fragments.join(&format!(" {logic} "))), values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_emits_parameterised_fragment() {
        let (sql, values) = selector_to_sql(&Selector::Eq("AUTHOR".into(), "alice".into())).unwrap();
        assert_eq!(sql, "AUTHOR = ?");
        assert_eq!(values, vec![Value::Text("alice".into())]);
    }

    #[test]
    fn and_or_fold_and_flatten_values() {
        let selector = Selector::And(vec![
            Selector::Eq("A".into(), 1i64.into()),
            Selector::Or(vec![
                Selector::Eq("B".into(), 2i64.into()),
                Selector::Eq("C".into(), 3i64.into()),
            ]),
        ]);
        let (sql, values) = selector_to_sql(&selector).unwrap();
        assert_eq!(sql, "(A = ? and (B = ? or C = ?))");
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn not_wraps_child() {
        let (sql, _) = selector_to_sql(&Selector::Not(Box::new(Selector::Eq(
            "A".into(),
            1i64.into(),
        ))))
        .unwrap();
        assert_eq!(sql, "not (A = ?)");
    }

    #[test]
    fn between_uses_first_two_values() {
        let (sql, values) =
            selector_to_sql(&Selector::Between("DATE".into(), "2024-01-01".into(), "2024-12-31".into()))
                .unwrap();
        assert_eq!(sql, "DATE between ? and ?");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(validate_operator("EQ").is_ok());
        assert!(matches!(
            validate_operator("XOR"),
            Err(Error::UnknownSelector(_))
        ));
    }

    #[test]
    fn in_emits_one_placeholder_per_value() {
        let (sql, values) = selector_to_sql(&Selector::In(
            "ID".into(),
            vec![1i64.into(), 2i64.into(), 3i64.into()],
        ))
        .unwrap();
        assert_eq!(sql, "ID in (?,?,?)");
        assert_eq!(values.len(), 3);
    }
}
