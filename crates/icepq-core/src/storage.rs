//! Object storage abstraction.
//!
//! Every table lives under a root location on one of two backends:
//!
//! - the local filesystem (`/path/to/table` or `file:///path/to/table`), driven
//!   through `tokio::fs`;
//! - any store supported by the `object_store` crate (`s3://`, `gs://`,
//!   `az://`, `memory://`, `http(s)://`).
//!
//! All functions in this module take a [`StorageLocation`] plus a path
//! *relative* to it and expose the small set of primitives the table engine
//! needs: read whole object, read a byte range, head, create-only write,
//! overwrite, list by prefix and delete.
//!
//! "Not found" and "already exists" are always surfaced as distinguished
//! [`StorageError`] variants, regardless of backend, because the catalog
//! protocol is built on them.

pub mod error;
pub mod layout;
pub mod table_location;

use std::{
    io::SeekFrom,
    ops::Range,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, path::Path as ObjectPath};
use snafu::prelude::*;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use url::Url;
use uuid::Uuid;

pub use error::{BackendError, StorageError};
pub(crate) use error::{
    AlreadyExistsNoSourceSnafu, InvalidLocationSnafu, from_local_io, from_object_store,
};
pub use table_location::TableLocation;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend-level location: where bytes live, without any table semantics.
#[derive(Clone, Debug)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
    /// A prefix inside an `object_store` backend.
    ObjectStore {
        /// The store handle, shared between clones of the location.
        store: Arc<dyn ObjectStore>,
        /// Prefix under which all relative paths are resolved.
        prefix: ObjectPath,
    },
}

impl StorageLocation {
    /// Parse a user-facing location string.
    ///
    /// Plain paths and `file://` URIs map to [`StorageLocation::Local`]; any
    /// other URL scheme is handed to `object_store::parse_url`.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let trimmed = spec.trim();
        ensure!(
            !trimmed.is_empty(),
            InvalidLocationSnafu {
                location: spec.to_string(),
                msg: "location is empty".to_string(),
            }
        );

        if !trimmed.contains("://") {
            return Ok(StorageLocation::Local(PathBuf::from(trimmed)));
        }

        let url = Url::parse(trimmed).map_err(|e| {
            InvalidLocationSnafu {
                location: spec.to_string(),
                msg: e.to_string(),
            }
            .build()
        })?;

        if url.scheme() == "file" {
            let path = url.to_file_path().map_err(|()| {
                InvalidLocationSnafu {
                    location: spec.to_string(),
                    msg: "file URL does not name a local path".to_string(),
                }
                .build()
            })?;
            return Ok(StorageLocation::Local(path));
        }

        let (store, prefix) = object_store::parse_url(&url).map_err(|e| {
            InvalidLocationSnafu {
                location: spec.to_string(),
                msg: e.to_string(),
            }
            .build()
        })?;

        Ok(StorageLocation::ObjectStore {
            store: Arc::from(store),
            prefix,
        })
    }
}

/// Size and modification time of a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Path relative to the location the listing or probe was made against.
    pub rel_path: PathBuf,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Join a local location with a relative path into an absolute local path.
fn join_local(root: &Path, rel: &Path) -> PathBuf {
    root.join(rel)
}

/// Join an object-store prefix with a relative path.
fn join_object(prefix: &ObjectPath, rel: &Path) -> ObjectPath {
    let mut path = prefix.clone();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            path = path.child(&*part.to_string_lossy());
        }
    }
    path
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| from_local_io(parent.display().to_string(), e))?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Call after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup while another error is already propagating.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Unique temporary sibling of `abs`, so concurrent overwrites of the same
/// object never share (or remove) each other's staging file.
fn tmp_sibling(abs: &Path) -> PathBuf {
    let mut name = abs.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", Uuid::now_v7().simple()));
    abs.with_file_name(name)
}

/// Overwrite (or create) the object at `rel_path`.
///
/// On the local backend this is write-then-rename: the payload goes to a
/// temporary sibling file, is synced, and is then renamed over the target so
/// readers never observe a partially written object. Object stores provide
/// the same guarantee for a single `put`.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = join_local(root, rel_path);
            create_parent_dir(&abs).await?;

            let tmp_path = tmp_sibling(&abs);
            let tmp_str = tmp_path.display().to_string();
            let mut guard = TempFileGuard::new(tmp_path.clone());

            {
                let mut file = fs::File::create(&tmp_path)
                    .await
                    .map_err(|e| from_local_io(tmp_str.clone(), e))?;
                file.write_all(contents)
                    .await
                    .map_err(|e| from_local_io(tmp_str.clone(), e))?;
                file.sync_all()
                    .await
                    .map_err(|e| from_local_io(tmp_str.clone(), e))?;
            }

            fs::rename(&tmp_path, &abs)
                .await
                .map_err(|e| from_local_io(abs.display().to_string(), e))?;

            guard.disarm();
            Ok(())
        }
        StorageLocation::ObjectStore { store, prefix } => {
            let path = join_object(prefix, rel_path);
            store
                .put(&path, PutPayload::from(Bytes::copy_from_slice(contents)))
                .await
                .map_err(|e| from_object_store(path.to_string(), e))?;
            Ok(())
        }
    }
}

/// Create a *new* object at `rel_path`, failing if it already exists.
///
/// The local backend relies on `O_CREAT | O_EXCL`. Object stores use a
/// conditional `put`; stores that do not implement conditional writes fall
/// back to a head probe followed by a plain `put`, which leaves a small race
/// window between the probe and the write.
pub async fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = join_local(root, rel_path);
            create_parent_dir(&abs).await?;
            let path_str = abs.display().to_string();

            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&abs)
                .await
                .map_err(|e| from_local_io(path_str.clone(), e))?;

            file.write_all(contents)
                .await
                .map_err(|e| from_local_io(path_str.clone(), e))?;
            file.sync_all()
                .await
                .map_err(|e| from_local_io(path_str, e))?;
            Ok(())
        }
        StorageLocation::ObjectStore { store, prefix } => {
            let path = join_object(prefix, rel_path);
            let payload = PutPayload::from(Bytes::copy_from_slice(contents));

            match store
                .put_opts(&path, payload.clone(), PutOptions::from(PutMode::Create))
                .await
            {
                Ok(_) => Ok(()),
                Err(object_store::Error::NotImplemented) => {
                    match store.head(&path).await {
                        Ok(_) => {
                            return AlreadyExistsNoSourceSnafu {
                                path: path.to_string(),
                            }
                            .fail();
                        }
                        Err(object_store::Error::NotFound { .. }) => {}
                        Err(e) => return Err(from_object_store(path.to_string(), e)),
                    }
                    store
                        .put(&path, payload)
                        .await
                        .map_err(|e| from_object_store(path.to_string(), e))?;
                    Ok(())
                }
                Err(e) => Err(from_object_store(path.to_string(), e)),
            }
        }
    }
}

/// Read the full contents of the object at `rel_path`.
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Bytes> {
    match location {
        StorageLocation::Local(root) => {
            let abs = join_local(root, rel_path);
            fs::read(&abs)
                .await
                .map(Bytes::from)
                .map_err(|e| from_local_io(abs.display().to_string(), e))
        }
        StorageLocation::ObjectStore { store, prefix } => {
            let path = join_object(prefix, rel_path);
            let result = store
                .get(&path)
                .await
                .map_err(|e| from_object_store(path.to_string(), e))?;
            result
                .bytes()
                .await
                .map_err(|e| from_object_store(path.to_string(), e))
        }
    }
}

/// Read the object at `rel_path` as UTF-8 text.
pub async fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    let bytes = read_all_bytes(location, rel_path).await?;
    String::from_utf8(bytes.to_vec()).map_err(|e| StorageError::OtherIo {
        path: rel_path.display().to_string(),
        source: BackendError::Local(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        backtrace: snafu::Backtrace::capture(),
    })
}

/// Read `range` (byte offsets, end exclusive) from the object at `rel_path`.
pub async fn read_range(
    location: &StorageLocation,
    rel_path: &Path,
    range: Range<u64>,
) -> StorageResult<Bytes> {
    match location {
        StorageLocation::Local(root) => {
            let abs = join_local(root, rel_path);
            let path_str = abs.display().to_string();

            let mut file = fs::File::open(&abs)
                .await
                .map_err(|e| from_local_io(path_str.clone(), e))?;
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| from_local_io(path_str.clone(), e))?;

            let len = range.end.saturating_sub(range.start) as usize;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)
                .await
                .map_err(|e| from_local_io(path_str, e))?;
            Ok(Bytes::from(buf))
        }
        StorageLocation::ObjectStore { store, prefix } => {
            let path = join_object(prefix, rel_path);
            store
                .get_range(&path, range.start as usize..range.end as usize)
                .await
                .map_err(|e| from_object_store(path.to_string(), e))
        }
    }
}

/// Probe the size and modification time of the object at `rel_path`.
pub async fn head(location: &StorageLocation, rel_path: &Path) -> StorageResult<ObjectInfo> {
    match location {
        StorageLocation::Local(root) => {
            let abs = join_local(root, rel_path);
            let path_str = abs.display().to_string();
            let meta = fs::metadata(&abs)
                .await
                .map_err(|e| from_local_io(path_str.clone(), e))?;

            if !meta.is_file() {
                return Err(from_local_io(
                    path_str,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "not a regular file"),
                ));
            }

            Ok(ObjectInfo {
                rel_path: rel_path.to_path_buf(),
                size: meta.len(),
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            })
        }
        StorageLocation::ObjectStore { store, prefix } => {
            let path = join_object(prefix, rel_path);
            let meta = store
                .head(&path)
                .await
                .map_err(|e| from_object_store(path.to_string(), e))?;
            Ok(ObjectInfo {
                rel_path: rel_path.to_path_buf(),
                size: meta.size as u64,
                last_modified: Some(meta.last_modified),
            })
        }
    }
}

/// True when an object exists at `rel_path`.
pub async fn exists(location: &StorageLocation, rel_path: &Path) -> StorageResult<bool> {
    match head(location, rel_path).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// List every object under `rel_dir`, recursively, sorted by path.
///
/// A missing directory yields an empty listing, matching object-store
/// semantics where prefixes do not exist on their own.
pub async fn list_prefix(
    location: &StorageLocation,
    rel_dir: &Path,
) -> StorageResult<Vec<ObjectInfo>> {
    let mut out = match location {
        StorageLocation::Local(root) => list_local(root, rel_dir).await?,
        StorageLocation::ObjectStore { store, prefix } => {
            let dir = join_object(prefix, rel_dir);
            let metas: Vec<object_store::ObjectMeta> = store
                .list(Some(&dir))
                .try_collect()
                .await
                .map_err(|e| from_object_store(dir.to_string(), e))?;

            metas
                .into_iter()
                .filter_map(|meta| {
                    let rel: PathBuf = meta
                        .location
                        .prefix_match(prefix)?
                        .map(|part| part.as_ref().to_string())
                        .collect();
                    Some(ObjectInfo {
                        rel_path: rel,
                        size: meta.size as u64,
                        last_modified: Some(meta.last_modified),
                    })
                })
                .collect()
        }
    };
    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}

async fn list_local(root: &Path, rel_dir: &Path) -> StorageResult<Vec<ObjectInfo>> {
    let mut out = Vec::new();
    let mut pending = vec![join_local(root, rel_dir)];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(from_local_io(dir.display().to_string(), e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| from_local_io(dir.display().to_string(), e))?
        {
            let abs = entry.path();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| from_local_io(abs.display().to_string(), e))?;

            if meta.is_dir() {
                pending.push(abs);
                continue;
            }
            // Temporary files from an in-flight write_atomic are not objects yet.
            if abs.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            if let Ok(rel) = abs.strip_prefix(root) {
                out.push(ObjectInfo {
                    rel_path: rel.to_path_buf(),
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }
    }

    Ok(out)
}

/// Delete the object at `rel_path`.
pub async fn delete(location: &StorageLocation, rel_path: &Path) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = join_local(root, rel_path);
            fs::remove_file(&abs)
                .await
                .map_err(|e| from_local_io(abs.display().to_string(), e))
        }
        StorageLocation::ObjectStore { store, prefix } => {
            let path = join_object(prefix, rel_path);
            store
                .delete(&path)
                .await
                .map_err(|e| from_object_store(path.to_string(), e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn memory_location() -> StorageLocation {
        StorageLocation::ObjectStore {
            store: Arc::new(InMemory::new()),
            prefix: ObjectPath::from("warehouse/t1"),
        }
    }

    #[tokio::test]
    async fn write_atomic_overwrites_and_leaves_no_tmp_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::Local(tmp.path().to_path_buf());
        let rel_path = Path::new("metadata/version-hint.text");

        write_atomic(&location, rel_path, b"first").await?;
        write_atomic(&location, rel_path, b"second").await?;

        let read_back = read_to_string(&location, rel_path).await?;
        assert_eq!(read_back, "second");
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("metadata"))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overwrites_each_stage_their_own_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::Local(tmp.path().to_path_buf());
        let rel_path = Path::new("metadata/version-hint.text");

        let writes = (0..16).map(|i| {
            let location = location.clone();
            tokio::spawn(async move {
                write_atomic(&location, rel_path, format!("{i}").as_bytes()).await
            })
        });
        for result in futures::future::join_all(writes).await {
            result??;
        }

        let read_back: u32 = read_to_string(&location, rel_path).await?.parse()?;
        assert!(read_back < 16);
        Ok(())
    }

    #[tokio::test]
    async fn read_to_string_returns_not_found_for_missing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::Local(tmp.path().to_path_buf());

        let err = read_to_string(&location, Path::new("missing.txt"))
            .await
            .expect_err("expected NotFound");
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn write_new_refuses_to_overwrite_local_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::Local(tmp.path().to_path_buf());
        let rel_path = Path::new("nested/path/once.json");

        write_new(&location, rel_path, b"first").await?;
        let err = write_new(&location, rel_path, b"second")
            .await
            .expect_err("expected AlreadyExists");
        assert!(err.is_already_exists());

        assert_eq!(read_to_string(&location, rel_path).await?, "first");
        Ok(())
    }

    #[tokio::test]
    async fn write_new_refuses_to_overwrite_object() -> TestResult {
        let location = memory_location();
        let rel_path = Path::new("metadata/00000-a.metadata.json");

        write_new(&location, rel_path, b"{}").await?;
        let err = write_new(&location, rel_path, b"{\"x\":1}")
            .await
            .expect_err("expected AlreadyExists");
        assert!(err.is_already_exists());
        Ok(())
    }

    #[tokio::test]
    async fn read_range_returns_requested_slice() -> TestResult {
        let tmp = TempDir::new()?;
        let local = StorageLocation::Local(tmp.path().to_path_buf());
        let memory = memory_location();

        for location in [local, memory] {
            write_atomic(&location, Path::new("data/blob.bin"), b"0123456789").await?;
            let tail = read_range(&location, Path::new("data/blob.bin"), 6..10).await?;
            assert_eq!(&tail[..], b"6789");

            let info = head(&location, Path::new("data/blob.bin")).await?;
            assert_eq!(info.size, 10);
        }
        Ok(())
    }

    #[tokio::test]
    async fn list_prefix_is_recursive_and_relative() -> TestResult {
        let tmp = TempDir::new()?;
        let local = StorageLocation::Local(tmp.path().to_path_buf());
        let memory = memory_location();

        for location in [local, memory] {
            write_new(&location, Path::new("metadata/b.json"), b"b").await?;
            write_new(&location, Path::new("metadata/a.json"), b"a").await?;
            write_new(&location, Path::new("metadata/sub/c.avro"), b"c").await?;
            write_new(&location, Path::new("data/x.parquet"), b"x").await?;

            let listed: Vec<PathBuf> = list_prefix(&location, Path::new("metadata"))
                .await?
                .into_iter()
                .map(|info| info.rel_path)
                .collect();
            assert_eq!(
                listed,
                vec![
                    PathBuf::from("metadata/a.json"),
                    PathBuf::from("metadata/b.json"),
                    PathBuf::from("metadata/sub/c.avro"),
                ]
            );

            assert!(list_prefix(&location, Path::new("nope")).await?.is_empty());
        }
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_object() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::Local(tmp.path().to_path_buf());
        let rel_path = Path::new("data/gone.parquet");

        write_new(&location, rel_path, b"x").await?;
        assert!(exists(&location, rel_path).await?);
        delete(&location, rel_path).await?;
        assert!(!exists(&location, rel_path).await?);
        Ok(())
    }

    #[test]
    fn parse_distinguishes_local_and_object_store() -> TestResult {
        assert!(matches!(
            StorageLocation::parse("/tmp/tables/t1")?,
            StorageLocation::Local(p) if p == Path::new("/tmp/tables/t1")
        ));
        assert!(matches!(
            StorageLocation::parse("file:///tmp/tables/t1")?,
            StorageLocation::Local(p) if p == Path::new("/tmp/tables/t1")
        ));
        match StorageLocation::parse("memory:///warehouse/t1")? {
            StorageLocation::ObjectStore { prefix, .. } => {
                assert_eq!(prefix.as_ref(), "warehouse/t1");
            }
            other => panic!("expected object store location, got {other:?}"),
        }
        assert!(StorageLocation::parse("   ").is_err());
        Ok(())
    }
}
