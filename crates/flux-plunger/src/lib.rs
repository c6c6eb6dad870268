/*
 * Flux Plunger - HelmRelease remediation controller
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

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Flux Plunger core library
//!
//! Watches Flux `HelmRelease` objects that are stuck with a
//! "has no deployed releases" error and unwedges them by suspending the
//! release, deleting its latest Helm history secret, recording the version
//! that was handled and resuming the release.

pub mod config;
pub mod controller;
pub mod crds;
pub mod error;
pub mod filter;
pub mod health;
pub mod history;
pub mod leader;
pub mod reconcile;
pub mod release;

// Re-export commonly used types
pub use config::PlungerConfig;
pub use controller::run_controller;
pub use crds::{HelmRelease, HelmReleaseSpec, HelmReleaseStatus};
pub use error::{Error, Result, StoreError};
pub use reconcile::{Outcome, Plunger};
