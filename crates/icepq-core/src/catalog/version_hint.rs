//! Catalog backed by `metadata/version-hint.text`.
//!
//! ## Commit protocol
//!
//! 1. Check every requirement against the metadata the caller loaded.
//! 2. Apply the updates to a copy of it.
//! 3. Write the new document create-only as
//!    `metadata/<seq:012>-<uuid>.metadata.json`. An existing file is a
//!    [`CatalogError::MetadataCollision`], never an overwrite.
//! 4. Read the hint and compare it with the caller's metadata file name. A
//!    mismatch is a [`CatalogError::ConcurrentCommit`]; the document written
//!    in step 3 stays behind unreferenced.
//! 5. Overwrite the hint with the new file name.
//!
//! Steps 4 and 5 are a read followed by a write, not a conditional write:
//! two committers that both pass step 4 before either reaches step 5 will
//! both succeed and the later hint write wins. Stores offering conditional
//! overwrites could close that window; the generic storage layer only offers
//! create-only writes.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use log::{debug, info, warn};
use snafu::prelude::*;

use crate::catalog::{
    CatalogError, ConcurrentCommitSnafu, CorruptStateSnafu, MetadataCollisionSnafu,
    SerializeMetadataSnafu, StorageSnafu, TableAlreadyExistsSnafu, TableNotFoundSnafu,
    TableRequirement, TableUpdate,
};
use crate::metadata::{MetadataLogEntry, Schema, TableMetadata};
use crate::storage::{self, StorageLocation, TableLocation, layout};
use crate::table::Table;

/// Catalog for a single table root.
#[derive(Debug, Clone)]
pub struct VersionHintCatalog {
    location: TableLocation,
}

impl VersionHintCatalog {
    /// Catalog for the table rooted at `location`.
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    /// The table root.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    fn storage(&self) -> &StorageLocation {
        self.location.storage()
    }

    /// Create a table with `schema` (re-numbered as schema 0) and no
    /// snapshot.
    ///
    /// Fails with [`CatalogError::TableAlreadyExists`] when a version hint is
    /// present, including when another creator wins the race for it.
    pub async fn create_table(
        &self,
        schema: Schema,
        properties: HashMap<String, String>,
    ) -> Result<Table, CatalogError> {
        let hint_rel = layout::version_hint_rel_path();
        let exists = storage::exists(self.storage(), &hint_rel)
            .await
            .context(StorageSnafu)?;
        ensure!(
            !exists,
            TableAlreadyExistsSnafu {
                location: self.location.uri(),
            }
        );

        let metadata = TableMetadata::new(
            self.location.uri(),
            schema,
            properties,
            Utc::now().timestamp_millis(),
        );
        let file_name = layout::metadata_file_name(0, layout::new_file_id());
        self.write_metadata(&file_name, &metadata).await?;

        match storage::write_new(self.storage(), &hint_rel, file_name.as_bytes()).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                // Lost the race for the hint: our metadata document is unreachable.
                let orphan = layout::metadata_rel_path(&file_name);
                if let Err(e) = storage::delete(self.storage(), &orphan).await {
                    warn!("failed to remove orphaned {}: {e}", orphan.display());
                }
                return TableAlreadyExistsSnafu {
                    location: self.location.uri(),
                }
                .fail();
            }
            Err(source) => return Err(CatalogError::Storage { source }),
        }

        info!(
            "created table {} ({}) at {file_name}",
            self.location.uri(),
            metadata.table_uuid
        );
        Ok(Table::new(self.location.clone(), metadata, file_name))
    }

    /// Load the metadata named by the version hint.
    ///
    /// - No hint: [`CatalogError::TableNotFound`].
    /// - Empty hint, missing metadata file or unparsable JSON:
    ///   [`CatalogError::CorruptState`].
    pub async fn load_table(&self) -> Result<Table, CatalogError> {
        let file_name = self.read_version_hint().await?;
        let rel = layout::metadata_rel_path(&file_name);

        let json = match storage::read_to_string(self.storage(), &rel).await {
            Ok(json) => json,
            Err(e) if e.is_not_found() => {
                return CorruptStateSnafu {
                    msg: format!("version hint names missing metadata file {file_name}"),
                }
                .fail();
            }
            Err(source) => return Err(CatalogError::Storage { source }),
        };

        let metadata: TableMetadata = serde_json::from_str(&json).map_err(|e| {
            CorruptStateSnafu {
                msg: format!("failed to parse metadata file {file_name}: {e}"),
            }
            .build()
        })?;

        debug!(
            "loaded {} at {file_name} (sequence {})",
            self.location.uri(),
            metadata.last_sequence_number
        );
        Ok(Table::new(self.location.clone(), metadata, file_name))
    }

    /// Commit `updates` on top of `current`. See the module documentation
    /// for the protocol and its conflict errors.
    pub async fn commit_table(
        &self,
        current: &Table,
        requirements: &[TableRequirement],
        updates: Vec<TableUpdate>,
    ) -> Result<Table, CatalogError> {
        let base = current.metadata();
        for requirement in requirements {
            requirement.check(base)?;
        }

        let mut metadata = base.clone();
        for update in updates {
            update.apply(&mut metadata)?;
        }

        metadata.metadata_log.push(MetadataLogEntry {
            metadata_file: current.metadata_uri(),
            timestamp_ms: base.last_updated_ms,
        });
        metadata.last_updated_ms = Utc::now().timestamp_millis().max(base.last_updated_ms);

        let file_name =
            layout::metadata_file_name(metadata.last_sequence_number, layout::new_file_id());
        self.write_metadata(&file_name, &metadata).await?;
        self.write_version_hint(current.metadata_file_name(), &file_name)
            .await?;

        info!(
            "committed {} at {file_name} (sequence {}, snapshot {:?})",
            self.location.uri(),
            metadata.last_sequence_number,
            metadata.current_snapshot_id
        );
        Ok(Table::new(self.location.clone(), metadata, file_name))
    }

    /// Swap the hint from `expected` to `new_file_name` (read, compare,
    /// overwrite).
    pub async fn write_version_hint(
        &self,
        expected: &str,
        new_file_name: &str,
    ) -> Result<(), CatalogError> {
        let found = self.read_version_hint().await?;
        ensure!(
            found == expected,
            ConcurrentCommitSnafu {
                expected,
                found,
            }
        );

        storage::write_atomic(
            self.storage(),
            &layout::version_hint_rel_path(),
            new_file_name.as_bytes(),
        )
        .await
        .context(StorageSnafu)
    }

    /// Current content of the version hint: a metadata file name.
    async fn read_version_hint(&self) -> Result<String, CatalogError> {
        let contents =
            match storage::read_to_string(self.storage(), &layout::version_hint_rel_path()).await {
                Ok(s) => s,
                Err(e) if e.is_not_found() => {
                    return TableNotFoundSnafu {
                        location: self.location.uri(),
                    }
                    .fail();
                }
                Err(source) => return Err(CatalogError::Storage { source }),
            };

        let name = contents.trim();
        ensure!(
            !name.is_empty(),
            CorruptStateSnafu {
                msg: "version hint is empty".to_string(),
            }
        );
        ensure!(
            !name.contains('/') && !name.contains('\\'),
            CorruptStateSnafu {
                msg: format!("version hint {name:?} is not a file name"),
            }
        );
        Ok(name.to_string())
    }

    async fn write_metadata(
        &self,
        file_name: &str,
        metadata: &TableMetadata,
    ) -> Result<PathBuf, CatalogError> {
        let rel = layout::metadata_rel_path(file_name);
        let json = serde_json::to_vec(metadata).context(SerializeMetadataSnafu)?;

        match storage::write_new(self.storage(), &rel, &json).await {
            Ok(()) => Ok(rel),
            Err(e) if e.is_already_exists() => MetadataCollisionSnafu {
                path: rel.display().to_string(),
            }
            .fail(),
            Err(source) => Err(CatalogError::Storage { source }),
        }
    }
}
