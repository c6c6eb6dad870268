//! Custom Resource Definitions watched by the plunger

pub mod helmrelease;

pub use helmrelease::{HelmRelease, HelmReleaseSpec, HelmReleaseStatus, ReleaseCondition};
