//! Value conversion from SeaQuery to `may_postgres` parameters.
//!
//! Two passes: values are first collected into typed vectors, then references into
//! those vectors are handed to the closure, so every reference outlives the call.

use crate::executor::StoreError;
use may_postgres::types::ToSql;
use sea_query::{Value, Values};

/// Convert SeaQuery values to `ToSql` parameters and run `f` with them.
///
/// Record queries only bind booleans, integers and text; anything else is rejected.
///
/// # Errors
///
/// Returns `StoreError::QueryError` for an unsupported value type, or the closure's error.
pub fn with_converted_params<F, R>(values: &Values, f: F) -> Result<R, StoreError>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R, StoreError>,
{
    let mut bools: Vec<bool> = Vec::new();
    let mut ints: Vec<i32> = Vec::new();
    let mut big_ints: Vec<i64> = Vec::new();
    let mut strings: Vec<String> = Vec::new();
    let mut nulls: Vec<Option<String>> = Vec::new();

    for value in values.iter() {
        match value {
            Value::Bool(Some(b)) => bools.push(*b),
            Value::Int(Some(i)) => ints.push(*i),
            Value::BigInt(Some(i)) => big_ints.push(*i),
            Value::String(Some(s)) => strings.push(s.to_string()),
            Value::Bool(None) | Value::Int(None) | Value::BigInt(None) | Value::String(None) => {
                nulls.push(None);
            }
            other => {
                return Err(StoreError::QueryError(format!(
                    "Unsupported value type in query: {other:?}"
                )));
            }
        }
    }

    let (mut bool_idx, mut int_idx, mut big_int_idx, mut string_idx, mut null_idx) =
        (0, 0, 0, 0, 0);
    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(values.iter().count());

    for value in values.iter() {
        match value {
            Value::Bool(Some(_)) => {
                params.push(&bools[bool_idx] as &dyn ToSql);
                bool_idx += 1;
            }
            Value::Int(Some(_)) => {
                params.push(&ints[int_idx] as &dyn ToSql);
                int_idx += 1;
            }
            Value::BigInt(Some(_)) => {
                params.push(&big_ints[big_int_idx] as &dyn ToSql);
                big_int_idx += 1;
            }
            Value::String(Some(_)) => {
                params.push(&strings[string_idx] as &dyn ToSql);
                string_idx += 1;
            }
            _ => {
                params.push(&nulls[null_idx] as &dyn ToSql);
                null_idx += 1;
            }
        }
    }

    f(&params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_supported_values_in_order() {
        let values = Values(vec![
            Value::BigInt(Some(7)),
            Value::Bool(Some(false)),
            Value::String(None),
        ]);
        let count = with_converted_params(&values, |params| Ok(params.len())).expect("converted");
        assert_eq!(count, 3);
    }

    #[test]
    fn test_rejects_unsupported_values() {
        let values = Values(vec![Value::Double(Some(1.5))]);
        let result = with_converted_params(&values, |_| Ok(()));
        assert!(matches!(result, Err(StoreError::QueryError(_))));
    }
}
