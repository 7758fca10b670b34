mod audit;
mod fs_utils;
mod layout;
mod snapshot;

pub use audit::{AuditLog, AuditRecord};
pub use layout::DataLayout;
pub use snapshot::{
    is_valid_snapshot_id, safe_snapshot_name, SnapshotMeta, SnapshotStore, StoredSnapshot,
};

#[cfg(test)]
mod tests;
