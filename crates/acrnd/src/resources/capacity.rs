//! Fixed pool of capacity identifiers.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

/// Pre-registered capacity identifiers and their current holders.
///
/// Identifiers are handed out in priority order. A running machine holds at
/// most one; acquiring again for the same machine returns its existing
/// identifier.
#[derive(Debug, Clone, Default)]
pub struct CapacityPool {
    ids: Vec<Uuid>,
    holders: HashMap<Uuid, Uuid>,
}

impl CapacityPool {
    /// Builds a pool from identifiers in priority order.
    #[must_use]
    pub fn new(ids: Vec<Uuid>) -> Self {
        Self {
            ids,
            holders: HashMap::new(),
        }
    }

    /// Parses textual identifiers into a pool.
    ///
    /// # Errors
    ///
    /// Fails on the first identifier that is not a UUID.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self, InvalidCapacityId> {
        let parsed = ids
            .iter()
            .map(|id| {
                Uuid::parse_str(id.as_ref()).map_err(|source| InvalidCapacityId {
                    value: id.as_ref().to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(parsed))
    }

    /// Acquires an identifier for `machine`.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExhausted`] when every identifier is held by another
    /// machine. This is a ceiling, not a transient condition.
    pub fn acquire(&mut self, machine: Uuid) -> Result<Uuid, CapacityExhausted> {
        if let Some(held) = self.held_by(machine) {
            return Ok(held);
        }
        let free = self
            .ids
            .iter()
            .copied()
            .find(|id| !self.holders.contains_key(id))
            .ok_or(CapacityExhausted {
                pool_size: self.ids.len(),
            })?;
        self.holders.insert(free, machine);
        Ok(free)
    }

    /// Releases whatever identifier `machine` holds. Idempotent.
    pub fn release(&mut self, machine: Uuid) -> Option<Uuid> {
        let held = self.held_by(machine)?;
        self.holders.remove(&held);
        Some(held)
    }

    /// Identifier currently held by `machine`.
    #[must_use]
    pub fn held_by(&self, machine: Uuid) -> Option<Uuid> {
        self.holders
            .iter()
            .find_map(|(id, holder)| (*holder == machine).then_some(*id))
    }

    /// Number of identifiers in the pool.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the pool has no identifiers at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identifiers not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.ids.len() - self.holders.len()
    }
}

/// Every capacity identifier is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no capacity identifier available (pool of {pool_size})")]
pub struct CapacityExhausted {
    /// Size of the exhausted pool.
    pub pool_size: usize,
}

/// A configured capacity identifier was not a UUID.
#[derive(Debug, Error)]
#[error("invalid capacity identifier '{value}': {source}")]
pub struct InvalidCapacityId {
    /// Offending value.
    pub value: String,
    /// Parse failure.
    #[source]
    pub source: uuid::Error,
}
