//! Structural JSON comparison.
//!
//! Query results carry no ordering guarantee for list values or for
//! objects returned by a multi-uid function, so the canonical mode sorts
//! every array by the serialized form of its (canonicalized) elements
//! before comparing. Object keys are compared as sets in both modes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// How strictly two JSON documents are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// Arrays must match element by element, in order.
    Exact,
    /// Arrays are compared as sorted multisets.
    #[default]
    Canonical,
}

/// One point where two documents disagree. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct Difference {
    pub path: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.expected, &self.actual) {
            (Some(expected), Some(actual)) => {
                write!(f, "{}: expected {expected}, got {actual}", self.path)
            }
            (Some(expected), None) => write!(f, "{}: missing, expected {expected}", self.path),
            (None, Some(actual)) => write!(f, "{}: unexpected {actual}", self.path),
            (None, None) => write!(f, "{}: differs", self.path),
        }
    }
}

/// Every difference between two documents, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonDiff {
    pub differences: Vec<Difference>,
}

impl JsonDiff {
    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.differences.len()
    }
}

impl fmt::Display for JsonDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, difference) in self.differences.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {difference}")?;
        }
        Ok(())
    }
}

/// Compares `actual` against `expected`.
pub fn compare_json(expected: &Value, actual: &Value, mode: CompareMode) -> JsonDiff {
    let mut diff = JsonDiff::default();
    match mode {
        CompareMode::Exact => walk("$", expected, actual, &mut diff.differences),
        CompareMode::Canonical => walk(
            "$",
            &canonicalize(expected),
            &canonicalize(actual),
            &mut diff.differences,
        ),
    }
    diff
}

/// Returns `value` with every array sorted by its elements' serialization.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(canonicalize).collect();
            items.sort_by_cached_key(Value::to_string);
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), canonicalize(value)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

fn walk(path: &str, expected: &Value, actual: &Value, out: &mut Vec<Difference>) {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            let keys: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
            for key in keys {
                let child = format!("{path}.{key}");
                match (expected.get(key), actual.get(key)) {
                    (Some(e), Some(a)) => walk(&child, e, a, out),
                    (e, a) => out.push(Difference {
                        path: child,
                        expected: e.cloned(),
                        actual: a.cloned(),
                    }),
                }
            }
        }
        (Value::Array(expected), Value::Array(actual)) => {
            for i in 0..expected.len().max(actual.len()) {
                let child = format!("{path}[{i}]");
                match (expected.get(i), actual.get(i)) {
                    (Some(e), Some(a)) => walk(&child, e, a, out),
                    (e, a) => out.push(Difference {
                        path: child,
                        expected: e.cloned(),
                        actual: a.cloned(),
                    }),
                }
            }
        }
        (expected, actual) if expected != actual => out.push(Difference {
            path: path.to_string(),
            expected: Some(expected.clone()),
            actual: Some(actual.clone()),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_identical_documents() {
        let doc = json!({ "q": [{ "name": "abc", "number": 99 }] });
        assert!(compare_json(&doc, &doc, CompareMode::Exact).is_empty());
        assert!(compare_json(&doc, &doc, CompareMode::Canonical).is_empty());
    }

    #[test_case(CompareMode::Exact, 2 ; "exact sees reordering")]
    #[test_case(CompareMode::Canonical, 0 ; "canonical ignores reordering")]
    fn test_list_order(mode: CompareMode, differences: usize) {
        let expected = json!({ "list": ["second", "first"] });
        let actual = json!({ "list": ["first", "second"] });

        assert_eq!(compare_json(&expected, &actual, mode).len(), differences);
    }

    #[test]
    fn test_object_order_in_result_list() {
        let expected = json!({ "q": [{ "name": "abcd" }, { "name@hi": "abc_hi" }] });
        let actual = json!({ "q": [{ "name@hi": "abc_hi" }, { "name": "abcd" }] });

        assert!(compare_json(&expected, &actual, CompareMode::Canonical).is_empty());
        assert!(!compare_json(&expected, &actual, CompareMode::Exact).is_empty());
    }

    #[test]
    fn test_language_tags_do_not_collide_with_lists() {
        let expected = json!({ "list": ["first", "second"], "list@en": "first_en" });
        let actual = json!({ "list": ["first", "second", "first_en"] });

        let diff = compare_json(&expected, &actual, CompareMode::Canonical);
        let paths: Vec<&str> = diff.differences.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, ["$.list[1]", "$.list[2]", "$.list@en"]);
    }

    #[test]
    fn test_missing_and_unexpected_keys() {
        let expected = json!({ "name": "abc", "number": 99 });
        let actual = json!({ "name": "abc", "extra": true });

        let diff = compare_json(&expected, &actual, CompareMode::Exact);
        assert_eq!(
            diff.differences,
            vec![
                Difference {
                    path: "$.extra".to_string(),
                    expected: None,
                    actual: Some(json!(true)),
                },
                Difference {
                    path: "$.number".to_string(),
                    expected: Some(json!(99)),
                    actual: None,
                },
            ]
        );
    }

    #[test]
    fn test_scalar_type_mismatch() {
        let diff = compare_json(&json!({ "n": 99 }), &json!({ "n": "99" }), CompareMode::Canonical);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.to_string(), r#"  $.n: expected 99, got "99""#);
    }

    #[test]
    fn test_nested_arrays_are_canonicalized() {
        let value = json!([[3, 1], [2]]);
        assert_eq!(canonicalize(&value), json!([[1, 3], [2]]));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z@]{0,6}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z@]{1,5}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_canonical_ignores_array_reversal(value in arb_json()) {
            fn reverse(value: &Value) -> Value {
                match value {
                    Value::Array(items) => Value::Array(items.iter().rev().map(reverse).collect()),
                    Value::Object(map) => Value::Object(
                        map.iter().map(|(k, v)| (k.clone(), reverse(v))).collect(),
                    ),
                    scalar => scalar.clone(),
                }
            }

            let reversed = reverse(&value);
            prop_assert!(compare_json(&value, &reversed, CompareMode::Canonical).is_empty());
        }
    }
}
