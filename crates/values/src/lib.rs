/*
 * Values - Helm values merging and namespace metadata library
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc)]

//! Helm values handling
//!
//! Pure transforms over JSON value trees used when rendering release values:
//! - deep merging of defaults and user values
//! - priority merging where platform-owned keys always come from the source
//! - stripping and rejecting internal (`_`-prefixed) keys
//! - copying `namespace.cozystack.io/*` annotations into `_namespace`
//!
//! Absent values and JSON `null` are treated as an empty object on input.

pub mod error;
pub mod merge;
pub mod namespace;
pub mod underscore;

pub use error::{Result, ValuesError};
pub use merge::{deep_merge, merge_values, merge_values_with_crd_priority};
pub use namespace::{
    extract_namespace_annotations, inject_namespace_annotations, NAMESPACE_ANNOTATION_PREFIX,
};
pub use underscore::{
    check_underscore_fields, remove_underscore_fields, remove_underscore_fields_from_map,
};

/// A JSON object
pub type Map = serde_json::Map<String, serde_json::Value>;

/// Top-level key holding platform metadata
pub const COZYSTACK_KEY: &str = "_cozystack";

/// Top-level key holding namespace metadata
pub const NAMESPACE_KEY: &str = "_namespace";
