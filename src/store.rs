use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use log::info;
use thiserror::Error;

use crate::chart::ChartData;

pub const RECORD_EXTENSION: &str = "dat";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record '{0}' not found")]
    NotFound(String),
    #[error("invalid record name '{0}': must be non-empty and contain no path separators")]
    InvalidName(String),
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record file {} is not a valid chart record: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Validates a record name used as a persistence key.
pub fn validate_record_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(StoreError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Record key named by a command-line argument that may be a file path.
pub fn key_from_argument(raw: &str) -> String {
    let file_name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    file_name
        .strip_suffix(".dat")
        .unwrap_or(file_name)
        .to_owned()
}

/// One `<name>.dat` JSON file per chart record under a fixed directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_record_name(name)?;
        Ok(self.root.join(format!("{name}.{RECORD_EXTENSION}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|path| path.is_file())
    }

    pub fn read(&self, name: &str) -> Result<ChartData, StoreError> {
        let path = self.path_for(name)?;
        let contents = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                StoreError::NotFound(name.to_owned())
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        serde_json::from_str(&contents).map_err(|source| StoreError::Format { path, source })
    }

    pub fn write(&self, data: &ChartData) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&data.name)?;
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        let bytes = serde_json::to_vec_pretty(data).map_err(|source| StoreError::Format {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        info!("saved record '{}' to {}", data.name, path.display());
        Ok(path)
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                StoreError::NotFound(name.to_owned())
            } else {
                StoreError::Io { path, source }
            }
        })
    }

    /// Stored record names, sorted case-insensitively.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_owned());
            }
        }
        names.sort_by_key(|name| name.to_lowercase());
        Ok(names)
    }
}
