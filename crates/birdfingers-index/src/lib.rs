//! Read-only lookups against a PyPI-compatible JSON API.

mod client;
mod version;

pub use client::{parse_project_json, IndexClient, ProjectInfo, DEFAULT_INDEX_URL};
pub use version::{compare_versions, sort_versions_newest_first};
