//! Deep merging of values trees.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSON;
use serde_json::Value;

use crate::error::{Result, ValuesError};
use crate::{Map, COZYSTACK_KEY, NAMESPACE_KEY};

/// Merge `overrides` into a copy of `base`.
///
/// Nested objects present on both sides are merged recursively; anything
/// else in `overrides` (scalars, arrays, new keys) replaces the base entry.
#[must_use]
pub fn deep_merge(base: &Map, overrides: &Map) -> Map {
    let mut result = base.clone();

    for (key, value) in overrides {
        let merged = match (result.get(key), value) {
            (Some(Value::Object(base_map)), Value::Object(override_map)) => {
                Value::Object(deep_merge(base_map, override_map))
            }
            _ => value.clone(),
        };
        result.insert(key.clone(), merged);
    }

    result
}

pub(crate) fn is_absent(values: Option<&JSON>) -> bool {
    matches!(values, None | Some(JSON(Value::Null)))
}

/// Object behind `values`, empty when absent
pub(crate) fn object_of(values: Option<&JSON>, which: &'static str) -> Result<Map> {
    match values {
        None | Some(JSON(Value::Null)) => Ok(Map::new()),
        Some(JSON(Value::Object(map))) => Ok(map.clone()),
        Some(_) => Err(ValuesError::NotAnObject { which }),
    }
}

/// Deep merge of `base` and `overrides`, `overrides` winning
pub fn merge_values(base: Option<&JSON>, overrides: Option<&JSON>) -> Result<JSON> {
    let base = object_of(base, "base")?;
    let overrides = object_of(overrides, "override")?;

    Ok(JSON(Value::Object(deep_merge(&base, &overrides))))
}

/// Merge values declared on a resource (`crd`) with what a release
/// currently carries (`existing`).
///
/// The resource side is laid over the existing values, and
/// `_cozystack`/`_namespace` are then copied verbatim from the resource so
/// platform-owned keys never keep stale nested entries. When either side is
/// absent the other is returned untouched.
pub fn merge_values_with_crd_priority(
    crd: Option<&JSON>,
    existing: Option<&JSON>,
) -> Result<Option<JSON>> {
    if is_absent(crd) {
        return Ok(existing.cloned());
    }
    if is_absent(existing) {
        return Ok(crd.cloned());
    }

    let crd = object_of(crd, "CRD")?;
    let existing = object_of(existing, "existing")?;

    let mut merged = deep_merge(&existing, &crd);
    for key in [COZYSTACK_KEY, NAMESPACE_KEY] {
        if let Some(value) = crd.get(key) {
            merged.insert(key.to_string(), value.clone());
        }
    }

    Ok(Some(JSON(Value::Object(merged))))
}
