//! Object store schema and the upgrade callback surface

use otter_idb::{IdbError, IdbResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How an object store derives keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreOptions {
    /// Dotted path of the key inside stored values (in-line keys)
    pub key_path: Option<String>,
    /// Generate numeric keys when none is supplied
    pub auto_increment: bool,
}

impl ObjectStoreOptions {
    /// Out-of-line keys, no generator
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SchemaChange {
    Create {
        name: String,
        options: ObjectStoreOptions,
    },
    Delete {
        name: String,
    },
}

/// Schema editor handed to the upgrade callback of [`crate::IndexedDb::open`]
#[derive(Debug)]
pub struct DatabaseUpgrade {
    name: String,
    stores: BTreeMap<String, ObjectStoreOptions>,
    changes: Vec<SchemaChange>,
}

impl DatabaseUpgrade {
    pub(crate) fn new(name: String, stores: BTreeMap<String, ObjectStoreOptions>) -> Self {
        Self {
            name,
            stores,
            changes: Vec::new(),
        }
    }

    pub(crate) fn into_changes(self) -> Vec<SchemaChange> {
        self.changes
    }

    /// Database being upgraded
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_object_store(
        &mut self,
        name: impl Into<String>,
        options: ObjectStoreOptions,
    ) -> IdbResult<()> {
        let name = name.into();
        if self.stores.contains_key(&name) {
            return Err(IdbError::constraint(format!(
                "An object store with the name '{name}' already exists."
            )));
        }
        if options.auto_increment && options.key_path.as_deref() == Some("") {
            return Err(IdbError::invalid_state(
                "autoIncrement requires a non-empty key path.",
            ));
        }
        self.stores.insert(name.clone(), options.clone());
        self.changes.push(SchemaChange::Create { name, options });
        Ok(())
    }

    pub fn delete_object_store(&mut self, name: &str) -> IdbResult<()> {
        if self.stores.remove(name).is_none() {
            return Err(IdbError::not_found(format!(
                "No object store named '{name}' was found."
            )));
        }
        self.changes.push(SchemaChange::Delete {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn contains_object_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_idb::DomErrorName;

    #[test]
    fn test_create_and_delete() {
        let mut upgrade = DatabaseUpgrade::new("db".into(), BTreeMap::new());
        upgrade
            .create_object_store("kv", ObjectStoreOptions::new())
            .unwrap();
        assert!(upgrade.contains_object_store("kv"));

        let err = upgrade
            .create_object_store("kv", ObjectStoreOptions::new())
            .unwrap_err();
        assert_eq!(err.dom_name(), Some(DomErrorName::Constraint));

        upgrade.delete_object_store("kv").unwrap();
        assert!(upgrade.object_store_names().is_empty());
        assert_eq!(
            upgrade.delete_object_store("kv").unwrap_err().dom_name(),
            Some(DomErrorName::NotFound)
        );
        assert_eq!(upgrade.into_changes().len(), 2);
    }
}
