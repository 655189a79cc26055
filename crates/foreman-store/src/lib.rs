//! # foreman-store
//!
//! File-backed feature storage.
//!
//! Each project keeps its records under `<project>/.foreman/`:
//!
//! ```text
//! .foreman/
//!   features/<id>/feature.json
//!   features/<id>/agent-output.md
//!   archive/<id>/...
//! ```
//!
//! Status changes are validated against the feature lifecycle and serialized
//! per project, so concurrent loops never lose each other's writes.

pub mod feature_io;
mod store;

pub use store::{FeaturePatch, FeatureStore, NewFeature, StatusChange};
