//! Internal (`_`-prefixed) keys.
//!
//! Keys starting with `_` are reserved for values the platform injects.
//! They are stripped before values are shown to users and rejected when
//! users try to set them.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSON;
use serde_json::Value;

use crate::error::{Result, ValuesError};
use crate::merge::object_of;
use crate::Map;

fn is_internal(key: &str) -> bool {
    key.starts_with('_')
}

/// Drop every internal key from `map`, including inside nested objects
/// and objects held in arrays.
pub fn remove_underscore_fields_from_map(map: &mut Map) {
    map.retain(|key, _| !is_internal(key));

    for value in map.values_mut() {
        match value {
            Value::Object(nested) => remove_underscore_fields_from_map(nested),
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        remove_underscore_fields_from_map(nested);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Copy of `values` without internal keys.
///
/// An emptied tree, or an explicit JSON `null`, comes back as `{}`.
pub fn remove_underscore_fields(values: Option<&JSON>) -> Result<Option<JSON>> {
    if values.is_none() {
        return Ok(None);
    }

    let mut map = object_of(values, "user")?;
    remove_underscore_fields_from_map(&mut map);
    Ok(Some(JSON(Value::Object(map))))
}

fn find_underscore_field(map: &Map, prefix: &str) -> Option<String> {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if is_internal(key) {
            return Some(path);
        }

        let found = match value {
            Value::Object(nested) => find_underscore_field(nested, &path),
            Value::Array(items) => items.iter().enumerate().find_map(|(index, item)| match item {
                Value::Object(nested) => find_underscore_field(nested, &format!("{path}[{index}]")),
                _ => None,
            }),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }

    None
}

/// Reject user values that set any internal key
pub fn check_underscore_fields(values: Option<&JSON>) -> Result<()> {
    let map = object_of(values, "user")?;

    match find_underscore_field(&map, "") {
        Some(path) => Err(ValuesError::UnderscoreField { path }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remove_strips_nested_and_array_items() {
        let values = JSON(json!({
            "_cozystack": { "bundle": "paas" },
            "size": "small",
            "resources": { "_hidden": 1, "cpu": "1" },
            "users": [{ "name": "admin", "_token": "x" }, "plain"]
        }));

        let cleaned = remove_underscore_fields(Some(&values)).unwrap();

        assert_eq!(
            cleaned,
            Some(JSON(json!({
                "size": "small",
                "resources": { "cpu": "1" },
                "users": [{ "name": "admin" }, "plain"]
            })))
        );
    }

    #[test]
    fn test_remove_returns_empty_object_not_null() {
        let values = JSON(json!({ "_cozystack": {}, "_namespace": {} }));

        assert_eq!(
            remove_underscore_fields(Some(&values)).unwrap(),
            Some(JSON(json!({})))
        );
    }

    #[test]
    fn test_remove_keeps_absent_absent() {
        assert_eq!(remove_underscore_fields(None).unwrap(), None);
    }

    #[test]
    fn test_remove_turns_null_into_empty_object() {
        assert_eq!(
            remove_underscore_fields(Some(&JSON(Value::Null))).unwrap(),
            Some(JSON(json!({})))
        );
    }

    #[test]
    fn test_check_accepts_clean_values() {
        let values = JSON(json!({ "size": "small", "list": [{ "name": "a" }] }));
        assert!(check_underscore_fields(Some(&values)).is_ok());
        assert!(check_underscore_fields(None).is_ok());
    }

    #[test]
    fn test_check_reports_path_of_internal_key() {
        let top = JSON(json!({ "_cozystack": {} }));
        assert_eq!(
            check_underscore_fields(Some(&top)).unwrap_err(),
            ValuesError::UnderscoreField {
                path: "_cozystack".to_string()
            }
        );

        let nested = JSON(json!({ "users": [{ "name": "a" }, { "_admin": true }] }));
        assert_eq!(
            check_underscore_fields(Some(&nested)).unwrap_err(),
            ValuesError::UnderscoreField {
                path: "users[1]._admin".to_string()
            }
        );
    }
}
