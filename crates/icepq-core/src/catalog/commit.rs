//! Commit requirements, metadata updates and the retry loop.
//!
//! A commit is described as a list of [`TableRequirement`]s that must hold
//! for the metadata the caller loaded, plus a list of [`TableUpdate`]s that
//! turn it into the next metadata document. Updates are applied in order to
//! a copy; any violation aborts the commit before anything is written.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::warn;
use snafu::prelude::*;
use uuid::Uuid;

use crate::catalog::{CatalogError, InvalidUpdateSnafu, RequirementFailedSnafu};
use crate::metadata::{
    MAIN_BRANCH, Snapshot, SnapshotLogEntry, SnapshotReference, TableMetadata,
};

/// A precondition checked against the metadata the commit is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRequirement {
    /// The table identity must not have changed.
    AssertTableUuid {
        /// Expected table UUID.
        uuid: Uuid,
    },
    /// A named reference must point at the given snapshot (`None`: must not
    /// exist).
    AssertRefSnapshotId {
        /// Reference name, usually `main`.
        ref_name: String,
        /// Expected snapshot id.
        snapshot_id: Option<i64>,
    },
}

impl TableRequirement {
    /// Requirement that `main` still points where it pointed in `metadata`.
    pub fn main_unchanged(metadata: &TableMetadata) -> Self {
        TableRequirement::AssertRefSnapshotId {
            ref_name: MAIN_BRANCH.to_string(),
            snapshot_id: metadata.refs.get(MAIN_BRANCH).map(|r| r.snapshot_id),
        }
    }

    /// Check the requirement against `metadata`.
    pub fn check(&self, metadata: &TableMetadata) -> Result<(), CatalogError> {
        match self {
            TableRequirement::AssertTableUuid { uuid } => {
                ensure!(
                    metadata.table_uuid == *uuid,
                    RequirementFailedSnafu {
                        msg: format!(
                            "table uuid is {}, expected {uuid}",
                            metadata.table_uuid
                        ),
                    }
                );
            }
            TableRequirement::AssertRefSnapshotId {
                ref_name,
                snapshot_id,
            } => {
                let actual = metadata.refs.get(ref_name).map(|r| r.snapshot_id);
                ensure!(
                    actual == *snapshot_id,
                    RequirementFailedSnafu {
                        msg: format!(
                            "ref {ref_name:?} points at {actual:?}, expected {snapshot_id:?}"
                        ),
                    }
                );
            }
        }
        Ok(())
    }
}

/// A change applied to the metadata being committed.
#[derive(Debug, Clone, PartialEq)]
pub enum TableUpdate {
    /// Register a new snapshot. Its sequence number must follow the table's
    /// last one and its parent, if any, must exist.
    AddSnapshot {
        /// The snapshot to add.
        snapshot: Snapshot,
    },
    /// Point a reference at an existing snapshot. Moving `main` also makes
    /// the snapshot current and records it in the snapshot log.
    SetSnapshotRef {
        /// Reference name.
        ref_name: String,
        /// New target.
        reference: SnapshotReference,
    },
    /// Insert or overwrite table properties.
    SetProperties {
        /// Properties to set.
        updates: HashMap<String, String>,
    },
}

impl TableUpdate {
    /// Apply the update to `metadata`.
    pub fn apply(self, metadata: &mut TableMetadata) -> Result<(), CatalogError> {
        match self {
            TableUpdate::AddSnapshot { snapshot } => add_snapshot(metadata, snapshot),
            TableUpdate::SetSnapshotRef {
                ref_name,
                reference,
            } => set_snapshot_ref(metadata, ref_name, reference),
            TableUpdate::SetProperties { updates } => {
                metadata.properties.extend(updates);
                Ok(())
            }
        }
    }
}

fn add_snapshot(metadata: &mut TableMetadata, snapshot: Snapshot) -> Result<(), CatalogError> {
    let expected_seq = metadata.next_sequence_number();
    ensure!(
        snapshot.sequence_number == expected_seq,
        InvalidUpdateSnafu {
            msg: format!(
                "snapshot {} has sequence number {}, expected {expected_seq}",
                snapshot.snapshot_id, snapshot.sequence_number
            ),
        }
    );
    ensure!(
        metadata.snapshot_by_id(snapshot.snapshot_id).is_none(),
        InvalidUpdateSnafu {
            msg: format!("snapshot id {} already exists", snapshot.snapshot_id),
        }
    );
    if let Some(parent) = snapshot.parent_snapshot_id {
        ensure!(
            metadata.snapshot_by_id(parent).is_some(),
            InvalidUpdateSnafu {
                msg: format!(
                    "parent snapshot {parent} of snapshot {} does not exist",
                    snapshot.snapshot_id
                ),
            }
        );
    }
    if let Some(schema_id) = snapshot.schema_id {
        ensure!(
            metadata.schemas.iter().any(|s| s.schema_id == schema_id),
            InvalidUpdateSnafu {
                msg: format!("snapshot references unknown schema {schema_id}"),
            }
        );
    }

    metadata.last_sequence_number = snapshot.sequence_number;
    metadata.snapshots.push(snapshot);
    Ok(())
}

fn set_snapshot_ref(
    metadata: &mut TableMetadata,
    ref_name: String,
    reference: SnapshotReference,
) -> Result<(), CatalogError> {
    let Some(snapshot) = metadata.snapshot_by_id(reference.snapshot_id) else {
        return InvalidUpdateSnafu {
            msg: format!(
                "ref {ref_name:?} targets unknown snapshot {}",
                reference.snapshot_id
            ),
        }
        .fail();
    };
    let timestamp_ms = snapshot.timestamp_ms;

    if ref_name == MAIN_BRANCH {
        metadata.current_snapshot_id = Some(reference.snapshot_id);
        metadata.snapshot_log.push(SnapshotLogEntry {
            snapshot_id: reference.snapshot_id,
            timestamp_ms,
        });
    }
    metadata.refs.insert(ref_name, reference);
    Ok(())
}

// ====================
// Retry
// ====================

/// Errors that can tell whether re-running the failed operation may succeed.
pub trait RetryableError {
    /// True when a fresh attempt (reload, re-plan, re-commit) may succeed.
    fn is_retryable(&self) -> bool;
}

/// Retry policy for [`do_commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRetryConfig {
    /// Total attempts allowed; `None` retries until success or a
    /// non-retryable error.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay.
    pub max_backoff: Duration,
}

impl Default for CommitRetryConfig {
    fn default() -> Self {
        CommitRetryConfig {
            max_attempts: None,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds or fails with a non-retryable error.
///
/// `op` must perform the whole load / mutate / commit cycle so every attempt
/// starts from freshly loaded metadata. When `max_attempts` is reached the
/// last retryable error is returned.
pub async fn do_commit<T, E, F, Fut>(config: &CommitRetryConfig, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Display,
{
    let mut attempt: u32 = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt = attempt.saturating_add(1);
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && config.max_attempts.is_none_or(|max| attempt < max) => {
                warn!("commit attempt {attempt} conflicted, retrying in {backoff:?}: {err}");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(config.max_backoff);
            }
            Err(err) => return Err(err),
        }
    }
}
