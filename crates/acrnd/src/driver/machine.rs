//! Tracked machine records and the table that owns them.
//!
//! Lock order: a machine's lock is always taken before the table lock.
//! Table lookups clone the record handle and release the table before
//! locking the record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use acrn_domain::{MachineDefinition, MachineState};
use uuid::Uuid;

use crate::monitor::Monitor;
use crate::resources::{CapacityPool, MachineResources};

pub(crate) type MachineHandle = Arc<Mutex<MachineRecord>>;

/// Everything the driver knows about one machine.
pub(crate) struct MachineRecord {
    /// Definition the machine runs with.
    pub(crate) def: MachineDefinition,
    /// Replacement definition applied at the next shutoff.
    pub(crate) next_def: Option<MachineDefinition>,
    pub(crate) persistent: bool,
    pub(crate) state: MachineState,
    /// Capacity pool holder key, fixed for the record's life.
    pub(crate) id: Uuid,
    pub(crate) capacity_id: Option<Uuid>,
    pub(crate) resources: MachineResources,
    pub(crate) monitor: Option<Monitor>,
    /// Identifies the current run so a late exit from an earlier run, or
    /// from a record that reused the name, is ignored.
    pub(crate) generation: u64,
    /// Set once the record has left the table.
    pub(crate) removed: bool,
}

impl MachineRecord {
    pub(crate) fn new(def: MachineDefinition, persistent: bool) -> Self {
        Self {
            def,
            next_def: None,
            persistent,
            state: MachineState::default(),
            id: Uuid::new_v4(),
            capacity_id: None,
            resources: MachineResources::default(),
            monitor: None,
            generation: 0,
            removed: false,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.def.name
    }
}

struct Entry {
    handle: MachineHandle,
    uuid: Uuid,
}

pub(crate) struct MachineTable {
    machines: HashMap<String, Entry>,
    pub(crate) capacity: CapacityPool,
}

impl MachineTable {
    pub(crate) fn new(capacity: CapacityPool) -> Self {
        Self {
            machines: HashMap::new(),
            capacity,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<MachineHandle> {
        self.machines.get(name).map(|entry| Arc::clone(&entry.handle))
    }

    /// Name of another machine whose newest definition uses `uuid`.
    pub(crate) fn uuid_owner(&self, uuid: Uuid, except: &str) -> Option<&str> {
        self.machines
            .iter()
            .find(|(name, entry)| entry.uuid == uuid && name.as_str() != except)
            .map(|(name, _)| name.as_str())
    }

    /// Records the identifier of a machine's newest definition.
    pub(crate) fn set_uuid(&mut self, name: &str, uuid: Uuid) {
        if let Some(entry) = self.machines.get_mut(name) {
            entry.uuid = uuid;
        }
    }

    /// Inserts a record for `def` unless the name is taken. Returns the
    /// handle and whether it was inserted.
    pub(crate) fn insert_if_absent(
        &mut self,
        def: &MachineDefinition,
        persistent: bool,
    ) -> (MachineHandle, bool) {
        if let Some(existing) = self.get(&def.name) {
            return (existing, false);
        }
        let handle = Arc::new(Mutex::new(MachineRecord::new(def.clone(), persistent)));
        self.machines.insert(
            def.name.clone(),
            Entry {
                handle: Arc::clone(&handle),
                uuid: def.uuid,
            },
        );
        (handle, true)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<MachineHandle> {
        self.machines.remove(name).map(|entry| entry.handle)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names = self.machines.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub(crate) fn handles(&self) -> Vec<MachineHandle> {
        self.machines
            .values()
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.machines.len()
    }
}

pub(crate) fn lock(handle: &MachineHandle) -> MutexGuard<'_, MachineRecord> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
