//! Table-scoped locations: a storage backend plus the root URI recorded in
//! table metadata.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use object_store::{ObjectStore, path::Path as ObjectPath};

use crate::storage::{StorageLocation, StorageResult, layout};

/// Table root location with table-scoped semantics.
///
/// Wraps a [`StorageLocation`] together with the root URI that is recorded in
/// table metadata. Every absolute path written into metadata, manifests or
/// manifest lists is `<uri>/<relative path>`, so this type is also where
/// absolute URIs are turned back into backend-relative paths.
#[derive(Debug, Clone)]
pub struct TableLocation {
    storage: StorageLocation,
    uri: String,
}

impl AsRef<StorageLocation> for TableLocation {
    fn as_ref(&self) -> &StorageLocation {
        &self.storage
    }
}

impl From<TableLocation> for StorageLocation {
    fn from(t: TableLocation) -> Self {
        t.storage
    }
}

fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem directory.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let uri = normalize_uri(&root.display().to_string());
        TableLocation {
            storage: StorageLocation::Local(root),
            uri,
        }
    }

    /// Creates a `TableLocation` on an existing `object_store` handle.
    ///
    /// `uri` is the string recorded in metadata (for example
    /// `s3://bucket/warehouse/t1`); `prefix` is the same location expressed
    /// as a path inside `store`.
    pub fn with_object_store(
        uri: impl AsRef<str>,
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<ObjectPath>,
    ) -> Self {
        TableLocation {
            storage: StorageLocation::ObjectStore {
                store,
                prefix: prefix.into(),
            },
            uri: normalize_uri(uri.as_ref()),
        }
    }

    /// Parse a user-facing table location string.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let storage = StorageLocation::parse(spec)?;
        Ok(TableLocation {
            storage,
            uri: normalize_uri(spec),
        })
    }

    /// Return the underlying StorageLocation.
    pub fn storage(&self) -> &StorageLocation {
        &self.storage
    }

    /// Root URI without a trailing slash.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Absolute URI for a path relative to the table root.
    pub fn uri_for(&self, rel_path: &Path) -> String {
        let rel: Vec<String> = rel_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if self.uri == "/" {
            format!("/{}", rel.join("/"))
        } else {
            format!("{}/{}", self.uri, rel.join("/"))
        }
    }

    /// Absolute prefix every data file URI must start with (`<uri>/data/`).
    pub fn data_prefix(&self) -> String {
        format!("{}/", self.uri_for(&layout::data_rel_dir()))
    }

    /// True when `uri` names a file under the `data/` prefix.
    pub fn is_data_uri(&self, uri: &str) -> bool {
        uri.strip_prefix(&self.data_prefix())
            .is_some_and(|rest| is_plain_relative(Path::new(rest)))
    }

    /// Map an absolute URI under this table back to a root-relative path.
    ///
    /// Returns `None` for URIs outside the table root.
    pub fn relative_path(&self, uri: &str) -> Option<PathBuf> {
        let root = if self.uri == "/" {
            "/".to_string()
        } else {
            format!("{}/", self.uri)
        };
        let rest = uri.strip_prefix(&root)?;
        let rel = PathBuf::from(rest);
        is_plain_relative(&rel).then_some(rel)
    }

    /// Resolve a caller-supplied data file path (relative to `data/`) into a
    /// root-relative path.
    ///
    /// Returns `None` when the path is absolute, empty, or escapes the data
    /// directory through `..`.
    pub fn data_file_path(&self, rel_to_data: &str) -> Option<PathBuf> {
        let rel = Path::new(rel_to_data);
        is_plain_relative(rel).then(|| layout::data_rel_dir().join(rel))
    }
}

/// A non-empty relative path made only of normal components.
fn is_plain_relative(path: &Path) -> bool {
    let mut any = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => any = true,
            Component::CurDir => {}
            _ => return false,
        }
    }
    any
}
