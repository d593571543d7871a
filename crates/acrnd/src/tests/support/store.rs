//! In-memory definition store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use acrn_domain::MachineDefinition;

use crate::store::{DefinitionStore, StoreError};

/// Store keeping definitions in a map, with switchable write failures.
#[derive(Clone, Default)]
pub struct MemoryDefinitionStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    definitions: BTreeMap<String, MachineDefinition>,
    fail_writes: bool,
    deleted: Vec<String>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store already holding `definitions`.
    pub fn with(definitions: impl IntoIterator<Item = MachineDefinition>) -> Self {
        let store = Self::new();
        store.state().definitions = definitions
            .into_iter()
            .map(|def| (def.name.clone(), def))
            .collect();
        store
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("store state mutex poisoned")
    }

    pub fn fail_writes(&self) {
        self.state().fail_writes = true;
    }

    pub fn get(&self, name: &str) -> Option<MachineDefinition> {
        self.state().definitions.get(name).cloned()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }
}

impl DefinitionStore for MemoryDefinitionStore {
    fn load_all(&self) -> Result<Vec<MachineDefinition>, StoreError> {
        Ok(self.state().definitions.values().cloned().collect())
    }

    fn save(&self, def: &MachineDefinition) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StoreError::Unavailable {
                message: "read-only store".to_owned(),
            });
        }
        state.definitions.insert(def.name.clone(), def.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StoreError::Unavailable {
                message: "read-only store".to_owned(),
            });
        }
        state.definitions.remove(name);
        state.deleted.push(name.to_owned());
        Ok(())
    }
}
