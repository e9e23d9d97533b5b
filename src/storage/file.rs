//! Directory-backed storage that can be shared between processes.
//!
//! Each key `k` owns three siblings in the storage directory:
//!
//! - `k.dat` holds the value,
//! - `k.lock` is locked shared by readers and exclusive by writers,
//! - `k.<pid>.<seq>.tmp` is written and then renamed over `k.dat`.
//!
//! Readers therefore always see a complete value. A writer that dies between
//! creating its temp file and renaming it leaves an orphan behind; orphans
//! older than [`FileStorageOptions::temp_max_age`] are purged when the storage
//! is opened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use super::StorageAdapter;
use crate::error::StorageError;

const DATA_EXT: &str = "dat";
const LOCK_EXT: &str = "lock";
const TEMP_EXT: &str = "tmp";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Options for [`FileStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStorageOptions {
    /// Temp files older than this are deleted when the storage is opened.
    pub temp_max_age: Duration,
}

impl Default for FileStorageOptions {
    fn default() -> Self {
        Self {
            temp_max_age: Duration::from_secs(3_600),
        }
    }
}

/// Stores each key as a file in one directory. TTLs are ignored.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Opens (creating if needed) a storage directory with default options.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_options(dir, FileStorageOptions::default())
    }

    /// Opens (creating if needed) a storage directory.
    pub fn with_options(
        dir: impl Into<PathBuf>,
        options: FileStorageOptions,
    ) -> Result<Self, StorageError> {
        let storage = Self { dir: dir.into() };
        fs::create_dir_all(&storage.dir)
            .map_err(|e| StorageError::write("file", &storage.dir.display().to_string(), e))?;

        let purged = storage.purge_temp_files(options.temp_max_age)?;
        if purged > 0 {
            tracing::info!(dir = %storage.dir.display(), purged, "Removed orphaned temp files");
        }

        Ok(storage)
    }

    /// The storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deletes temp files last modified more than `max_age` ago.
    ///
    /// Only files named like this storage's own temp files
    /// (`<key>.<pid>.<seq>.tmp`) are touched. Returns how many were removed.
    pub fn purge_temp_files(&self, max_age: Duration) -> Result<usize, StorageError> {
        let now = SystemTime::now();
        let mut purged = 0;

        let temp_files = self
            .files_with_ext(TEMP_EXT)
            .map_err(|e| self.clear_error(e))?
            .into_iter()
            .filter(|path| is_own_temp_file(path));

        for path in temp_files {
            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(|modified| now.duration_since(modified).unwrap_or(Duration::ZERO));

            if age.is_some_and(|age| age >= max_age) && remove_if_present(&path).is_ok() {
                purged += 1;
            }
        }

        Ok(purged)
    }

    fn sibling(&self, key: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ext}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{key}.{}.{seq}.{TEMP_EXT}", std::process::id()))
    }

    fn open_lock(&self, key: &str) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.sibling(key, LOCK_EXT))
    }

    fn files_with_ext(&self, ext: &str) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == ext) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn clear_error(&self, source: io::Error) -> StorageError {
        StorageError::clear(self.name(), source)
    }

    fn read_locked(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let data = self.sibling(key, DATA_EXT);
        if !data.try_exists()? {
            return Ok(None);
        }

        let lock = self.open_lock(key)?;
        lock.lock_shared()?;

        let mut file = match File::open(&data) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    fn write_locked(&self, key: &str, value: &[u8]) -> io::Result<()> {
        let lock = self.open_lock(key)?;
        lock.lock()?;

        let temp = self.temp_path(key);
        let result = write_and_sync(&temp, value)
            .and_then(|()| fs::rename(&temp, self.sibling(key, DATA_EXT)));
        if result.is_err() {
            let _ = remove_if_present(&temp);
        }
        result
    }

    fn delete_locked(&self, key: &str) -> io::Result<()> {
        let lock = self.open_lock(key)?;
        lock.lock()?;
        remove_if_present(&self.sibling(key, DATA_EXT))
    }
}

fn write_and_sync(path: &Path, value: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(value)?;
    file.sync_all()
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Keys become file names, so they must not be able to escape the directory.
/// Matches the names produced by `temp_path`: `<key>.<pid>.<seq>.tmp`.
fn is_own_temp_file(path: &Path) -> bool {
    let Some(stem) = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(TEMP_EXT))
        .and_then(|name| name.strip_suffix('.'))
    else {
        return false;
    };

    let mut parts = stem.rsplitn(3, '.');
    let (Some(seq), Some(pid), Some(key)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    seq.parse::<u64>().is_ok() && pid.parse::<u32>().is_ok() && check_key(key).is_ok()
}

fn check_key(key: &str) -> io::Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0'])
        && !key.contains("..");
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("`{key}` is not a valid file storage key"),
        ))
    }
}

impl StorageAdapter for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        check_key(key)
            .and_then(|()| self.read_locked(key))
            .map_err(|e| StorageError::read(self.name(), key, e))
    }

    fn write(&self, key: &str, value: &[u8], _ttl: Option<Duration>) -> Result<(), StorageError> {
        check_key(key)
            .and_then(|()| self.write_locked(key, value))
            .map_err(|e| StorageError::write(self.name(), key, e))
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        check_key(key)
            .and_then(|()| self.sibling(key, DATA_EXT).try_exists())
            .map_err(|e| StorageError::exists(self.name(), key, e))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        check_key(key)
            .and_then(|()| self.delete_locked(key))
            .map_err(|e| StorageError::delete(self.name(), key, e))
    }

    fn clear(&self) -> Result<(), StorageError> {
        let data_files = self.files_with_ext(DATA_EXT).map_err(|e| self.clear_error(e))?;

        for path in data_files {
            let key = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if check_key(key).is_ok() {
                self.delete_locked(key).map_err(|e| self.clear_error(e))?;
            } else {
                remove_if_present(&path).map_err(|e| self.clear_error(e))?;
            }
        }

        Ok(())
    }
}
