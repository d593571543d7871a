use std::os::fd::{AsFd, BorrowedFd};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use super::{Pty, RESOURCE_TARGET, ResourceError};

/// Pseudo-terminals a single machine may hold.
pub const MAX_PTYS: usize = 4;

#[derive(Debug)]
struct PtyEntry {
    owner: u32,
    pty: Pty,
}

/// Bounded, allocation-ordered pseudo-terminals of one machine.
///
/// Entries are only ever cleared together by [`PtyRegistry::reset`].
#[derive(Debug, Default)]
pub struct PtyRegistry {
    entries: Vec<PtyEntry>,
}

impl PtyRegistry {
    /// Errors when the registry cannot take another entry.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::TooManyChannels`] when full.
    pub fn ensure_capacity(&self) -> Result<(), ResourceError> {
        if self.entries.len() >= MAX_PTYS {
            return Err(ResourceError::TooManyChannels { max: MAX_PTYS });
        }
        Ok(())
    }

    /// Registers a pseudo-terminal opened for serial port `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::TooManyChannels`] when full; the pty is
    /// dropped.
    pub fn push(&mut self, owner: u32, pty: Pty) -> Result<Utf8PathBuf, ResourceError> {
        self.ensure_capacity()?;
        let path = pty.path.clone();
        debug!(
            target: RESOURCE_TARGET,
            port = owner,
            path = %pty.path,
            "registered pseudo-terminal"
        );
        self.entries.push(PtyEntry { owner, pty });
        Ok(path)
    }

    /// Master end registered for serial port `owner`.
    #[must_use]
    pub fn master_for(&self, owner: u32) -> Option<BorrowedFd<'_>> {
        self.entries
            .iter()
            .find(|entry| entry.owner == owner)
            .map(|entry| entry.pty.master.as_fd())
    }

    /// Slave paths in allocation order.
    pub fn paths(&self) -> impl Iterator<Item = &Utf8Path> {
        self.entries.iter().map(|entry| entry.pty.path.as_path())
    }

    /// Number of held pseudo-terminals.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pseudo-terminal is held.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closes every held pseudo-terminal. Idempotent.
    pub fn reset(&mut self) {
        while let Some(entry) = self.entries.pop() {
            debug!(
                target: RESOURCE_TARGET,
                port = entry.owner,
                path = %entry.pty.path,
                "closing pseudo-terminal"
            );
        }
    }
}
