//! Namespace annotations exposed to charts as `_namespace`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSON;
use serde_json::Value;

use crate::error::Result;
use crate::merge::object_of;
use crate::NAMESPACE_KEY;

pub const NAMESPACE_ANNOTATION_PREFIX: &str = "namespace.cozystack.io/";

/// `namespace.cozystack.io/*` annotations of `namespace`, prefix removed
#[must_use]
pub fn extract_namespace_annotations(namespace: &Namespace) -> BTreeMap<String, String> {
    namespace
        .metadata
        .annotations
        .iter()
        .flatten()
        .filter_map(|(key, value)| {
            key.strip_prefix(NAMESPACE_ANNOTATION_PREFIX)
                .map(|short| (short.to_string(), value.clone()))
        })
        .collect()
}

/// Replace `_namespace` in `values` with the namespace's annotations.
///
/// Values are returned unchanged when there is no namespace or it carries
/// no matching annotation.
pub fn inject_namespace_annotations(
    values: Option<&JSON>,
    namespace: Option<&Namespace>,
) -> Result<Option<JSON>> {
    let Some(namespace) = namespace else {
        return Ok(values.cloned());
    };

    let annotations = extract_namespace_annotations(namespace);
    if annotations.is_empty() {
        return Ok(values.cloned());
    }

    let mut map = object_of(values, "release")?;
    map.insert(
        NAMESPACE_KEY.to_string(),
        Value::Object(
            annotations
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect(),
        ),
    );

    Ok(Some(JSON(Value::Object(map))))
}
