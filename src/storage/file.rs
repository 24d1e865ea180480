// src/storage/file.rs
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::traits::{PersistentStore, StorageError};

/// Extension used for stored blobs.
const BLOB_EXTENSION: &str = "blob";

/// Length of the checksum header: 8 hex digits and a newline.
const HEADER_LEN: usize = 9;

/// File-backed persistent store.
///
/// Each key is stored in its own file as `CRC32\n<bytes>`. Writes go to a
/// temp file which is synced and then renamed over the target, so a reader
/// sees either the old or the new value, never a torn one.
#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `directory`, creating it if needed.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        Ok(FileStore { directory })
    }

    /// Get the store directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.directory.join(format!("{}.{}", key, BLOB_EXTENSION)))
    }

    fn sync_directory(&self) {
        // Not every platform allows opening a directory for sync.
        if let Ok(dir) = File::open(&self.directory) {
            let _ = dir.sync_all();
        }
    }
}

impl PersistentStore for FileStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;
        let temp_path = self.directory.join(format!(".{}.tmp", key));
        let checksum = crc32fast::hash(value);

        {
            let mut file = File::create(&temp_path)?;
            writeln!(file, "{:08x}", checksum)?;
            file.write_all(value)?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &path)?;
        self.sync_directory();

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(key)?;

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        if contents.len() < HEADER_LEN || contents[HEADER_LEN - 1] != b'\n' {
            return Err(StorageError::Corrupt {
                key: key.to_string(),
                expected: 0,
                actual: crc32fast::hash(&contents),
            });
        }

        let value = contents.split_off(HEADER_LEN);
        let actual = crc32fast::hash(&value);
        let expected = std::str::from_utf8(&contents[..HEADER_LEN - 1])
            .ok()
            .and_then(|hex| u32::from_str_radix(hex, 16).ok());

        match expected {
            Some(expected) if expected == actual => Ok(Some(value)),
            Some(expected) => Err(StorageError::Corrupt {
                key: key.to_string(),
                expected,
                actual,
            }),
            None => Err(StorageError::Corrupt {
                key: key.to_string(),
                expected: 0,
                actual,
            }),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;

        match fs::remove_file(&path) {
            Ok(()) => {
                self.sync_directory();
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();

            if path.extension().map(|e| e == BLOB_EXTENSION).unwrap_or(false) {
                fs::remove_file(path)?;
            }
        }

        self.sync_directory();
        Ok(())
    }
}
