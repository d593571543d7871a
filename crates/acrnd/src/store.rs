//! Persistence of machine definitions.
//!
//! Definitions are stored one per file as pretty-printed JSON under the
//! configuration directory. Autostart markers live in a sibling directory
//! and are only ever removed here; creating them is an operator concern.

use std::fs;
use std::io;
use std::sync::Arc;

use acrn_domain::MachineDefinition;
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::files::atomic_write;

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// File extension of persisted definitions.
const DEFINITION_EXTENSION: &str = "json";

/// Persists machine definitions.
pub trait DefinitionStore: Send + Sync {
    /// Loads every persisted definition.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be enumerated. Individual unreadable
    /// entries are skipped.
    fn load_all(&self) -> Result<Vec<MachineDefinition>, StoreError>;

    /// Writes or replaces a definition.
    ///
    /// # Errors
    ///
    /// Fails when the definition cannot be serialised or written.
    fn save(&self, def: &MachineDefinition) -> Result<(), StoreError>;

    /// Removes a definition and its autostart marker. Missing entries are
    /// not an error.
    ///
    /// # Errors
    ///
    /// Fails when an existing entry cannot be removed.
    fn delete(&self, name: &str) -> Result<(), StoreError>;
}

impl<T> DefinitionStore for Arc<T>
where
    T: DefinitionStore + ?Sized,
{
    fn load_all(&self) -> Result<Vec<MachineDefinition>, StoreError> {
        (**self).load_all()
    }

    fn save(&self, def: &MachineDefinition) -> Result<(), StoreError> {
        (**self).save(def)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        (**self).delete(name)
    }
}

/// Store writing JSON files.
#[derive(Debug, Clone)]
pub struct FileDefinitionStore {
    config_dir: Utf8PathBuf,
    autostart_dir: Utf8PathBuf,
}

impl FileDefinitionStore {
    /// Builds a store over the given directories.
    #[must_use]
    pub fn new(config_dir: impl Into<Utf8PathBuf>, autostart_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            autostart_dir: autostart_dir.into(),
        }
    }

    fn entry(dir: &Utf8Path, name: &str) -> Utf8PathBuf {
        dir.join(format!("{name}.{DEFINITION_EXTENSION}"))
    }

    fn read_entry(path: &Utf8Path) -> Result<MachineDefinition, StoreError> {
        let contents = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| StoreError::Decode {
            path: path.to_owned(),
            source,
        })
    }
}

impl DefinitionStore for FileDefinitionStore {
    fn load_all(&self) -> Result<Vec<MachineDefinition>, StoreError> {
        let entries = match fs::read_dir(&self.config_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::List {
                    path: self.config_dir.clone(),
                    source,
                });
            }
        };

        let mut paths = entries
            .filter_map(Result::ok)
            .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
            .filter(|path| path.is_file() && path.extension() == Some(DEFINITION_EXTENSION))
            .collect::<Vec<_>>();
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::read_entry(&path) {
                Ok(def) => definitions.push(def),
                Err(error) => warn!(
                    target: STORE_TARGET,
                    path = %path,
                    error = %error,
                    "skipping unreadable definition"
                ),
            }
        }
        debug!(target: STORE_TARGET, count = definitions.len(), "loaded definitions");
        Ok(definitions)
    }

    fn save(&self, def: &MachineDefinition) -> Result<(), StoreError> {
        let path = Self::entry(&self.config_dir, &def.name);
        let payload = serde_json::to_vec_pretty(def).map_err(|source| StoreError::Encode {
            name: def.name.clone(),
            source,
        })?;
        fs::create_dir_all(&self.config_dir)
            .and_then(|()| atomic_write(path.as_std_path(), &payload))
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        debug!(target: STORE_TARGET, machine = %def.name, path = %path, "definition saved");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        for path in [
            Self::entry(&self.config_dir, name),
            Self::entry(&self.autostart_dir, name),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(target: STORE_TARGET, path = %path, "removed"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::Remove { path, source }),
            }
        }
        Ok(())
    }
}

/// Errors raised by definition stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store directory could not be listed.
    #[error("failed to list definitions in '{path}': {source}")]
    List {
        /// Directory.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An entry could not be read.
    #[error("failed to read definition '{path}': {source}")]
    Read {
        /// Entry path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An entry did not contain a valid definition.
    #[error("failed to decode definition '{path}': {source}")]
    Decode {
        /// Entry path.
        path: Utf8PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// A definition could not be serialised.
    #[error("failed to encode definition '{name}': {source}")]
    Encode {
        /// Machine name.
        name: String,
        /// Underlying encode error.
        #[source]
        source: serde_json::Error,
    },
    /// An entry could not be written.
    #[error("failed to write definition '{path}': {source}")]
    Write {
        /// Entry path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An entry could not be removed.
    #[error("failed to remove '{path}': {source}")]
    Remove {
        /// Entry path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A test or in-memory store refused the operation.
    #[error("definition store unavailable: {message}")]
    Unavailable {
        /// Reason.
        message: String,
    },
}
