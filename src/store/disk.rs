use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use crate::store::{StorageEngine, StorePath, TouchToken};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const TMP_SUFFIX: &str = ".tmp";

/// Encodes one path segment into a filesystem-safe name.
///
/// Alphanumerics, `_` and `-` pass through; every other byte becomes `%XX`.
/// `.` is escaped too, so no encoded name can end in the temp-file suffix.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

/// Reverses [encode_segment]. Malformed escapes pass through literally.
fn decode_segment(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Durable storage engine: one file per blob under a root directory.
///
/// Layout: `<root>/<database>/<collection>/<blob>`, with every segment
/// URL-safe-encoded. `put` writes `<file>.tmp` in the target directory and
/// renames over the destination, so the canonical path never holds a partial
/// file. Durability is whatever the host filesystem's rename gives; no
/// explicit fsync is issued.
pub struct DiskEngine {
    root: PathBuf,
}

impl DiskEngine {
    /// Opens (creating if needed) a disk engine rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> FerriteResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            log::error!("Cannot create storage root {:?}: {}", root, err);
            FerriteError::with_cause(
                "Cannot create storage root",
                ErrorKind::StorageIo,
                err.into(),
            )
        })?;
        log::info!("Disk engine opened at {:?}", root);
        Ok(DiskEngine { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, database: &str, collection: &str) -> PathBuf {
        self.root
            .join(encode_segment(database))
            .join(encode_segment(collection))
    }

    fn blob_file(&self, path: &StorePath) -> PathBuf {
        self.collection_dir(&path.database, &path.collection)
            .join(encode_segment(&path.blob))
    }

    fn list_dir_names(dir: &Path, dirs_only: bool) -> FerriteResult<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        let mut names = vec![];
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if dirs_only != file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !dirs_only && name.ends_with(TMP_SUFFIX) {
                continue;
            }
            names.push(decode_segment(&name));
        }
        names.sort();
        Ok(names)
    }
}

impl StorageEngine for DiskEngine {
    fn get(&self, path: &StorePath) -> FerriteResult<Option<Vec<u8>>> {
        match fs::read(self.blob_file(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
            Err(err) => {
                log::error!("Cannot read blob {}: {}", path, err);
                Err(err.into())
            }
        }
    }

    fn put(&self, path: &StorePath, bytes: &[u8]) -> FerriteResult<()> {
        let target = self.blob_file(path);
        let parent = target.parent().ok_or_else(|| {
            FerriteError::new("Blob path has no parent directory", ErrorKind::Internal)
        })?;
        fs::create_dir_all(parent)?;

        let mut tmp = target.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, bytes)?;
        if let Err(err) = fs::rename(&tmp, &target) {
            log::error!("Cannot replace blob {}: {}", path, err);
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn delete(&self, path: &StorePath) -> FerriteResult<bool> {
        match fs::remove_file(self.blob_file(path)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(false),
            Err(err) => {
                log::error!("Cannot delete blob {}: {}", path, err);
                Err(err.into())
            }
        }
    }

    fn touch(&self, path: &StorePath) -> FerriteResult<Option<TouchToken>> {
        match fs::metadata(self.blob_file(path)) {
            Ok(meta) => {
                let mtime_ns = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                Ok(Some(TouchToken::file_stat(mtime_ns, meta.len())))
            }
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn list_blobs(&self, database: &str, collection: &str) -> FerriteResult<Vec<String>> {
        Self::list_dir_names(&self.collection_dir(database, collection), false)
    }

    fn list_databases(&self) -> FerriteResult<Vec<String>> {
        Self::list_dir_names(&self.root, true)
    }

    fn list_collections(&self, database: &str) -> FerriteResult<Vec<String>> {
        Self::list_dir_names(&self.root.join(encode_segment(database)), true)
    }

    fn drop_collection(&self, database: &str, collection: &str) -> FerriteResult<bool> {
        let dir = self.collection_dir(database, collection);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(false),
            Err(err) => {
                log::error!("Cannot drop collection dir {:?}: {}", dir, err);
                Err(err.into())
            }
        }
    }

    fn drop_database(&self, database: &str) -> FerriteResult<bool> {
        let dir = self.root.join(encode_segment(database));
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(false),
            Err(err) => {
                log::error!("Cannot drop database dir {:?}: {}", dir, err);
                Err(err.into())
            }
        }
    }
}
