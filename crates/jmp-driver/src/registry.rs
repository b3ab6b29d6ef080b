use std::collections::HashMap;
use std::sync::Arc;

use jmp_proto::DriverInstanceReport;
use uuid::Uuid;

use crate::driver::{Driver, LABEL_NAME};

/// One entry of a pre-order enumeration of a driver tree.
pub struct DriverEntry {
    pub uuid: Uuid,
    pub parent_uuid: Option<Uuid>,
    pub name_under_parent: Option<String>,
    pub driver: Arc<dyn Driver>,
}

impl DriverEntry {
    pub fn to_report(&self) -> DriverInstanceReport {
        let mut labels = self.driver.labels().clone();
        if let Some(name) = &self.name_under_parent {
            labels.insert(LABEL_NAME.to_owned(), name.clone());
        }
        DriverInstanceReport {
            uuid: self.uuid.to_string(),
            parent_uuid: self.parent_uuid.map(|u| u.to_string()).unwrap_or_default(),
            labels: labels.into_iter().collect(),
            description: self.driver.description().unwrap_or_default().to_owned(),
            methods_description: self.driver.methods().descriptions().clone().into_iter().collect(),
        }
    }
}

/// Pre-order traversal of a driver tree: the root first, then every descendant exactly once,
/// with `parent_uuid` always referencing a prior entry's `uuid`.
pub fn enumerate(root: Arc<dyn Driver>) -> Vec<DriverEntry> {
    let mut out = Vec::new();
    visit(root, None, None, &mut out);
    out
}

fn visit(driver: Arc<dyn Driver>, parent_uuid: Option<Uuid>, name_under_parent: Option<String>, out: &mut Vec<DriverEntry>) {
    let uuid = driver.uuid();
    let children: Vec<(String, Arc<dyn Driver>)> = driver.children().to_vec();
    out.push(DriverEntry {
        uuid,
        parent_uuid,
        name_under_parent,
        driver,
    });
    for (name, child) in children {
        visit(child, Some(uuid), Some(name), out);
    }
}

/// Per-session index over a driver tree: O(1) UUID lookup plus the enumerated entries used to
/// answer `GetReport`.
pub struct Registry {
    entries: Vec<DriverEntry>,
    by_uuid: HashMap<Uuid, Arc<dyn Driver>>,
}

impl Registry {
    pub fn build(root: Arc<dyn Driver>) -> Self {
        let entries = enumerate(root);
        let by_uuid = entries.iter().map(|entry| (entry.uuid, entry.driver.clone())).collect();
        Self { entries, by_uuid }
    }

    pub fn root_uuid(&self) -> Uuid {
        self.entries[0].uuid
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Arc<dyn Driver>> {
        self.by_uuid.get(&uuid)
    }

    pub fn entries(&self) -> &[DriverEntry] {
        &self.entries
    }

    pub fn reports(&self) -> Vec<DriverInstanceReport> {
        self.entries.iter().map(DriverEntry::to_report).collect()
    }

    /// Resets every driver, children before parents (see [`Self::close`] for why reversing the
    /// pre-order sequence gives that order).
    pub async fn reset(&self) {
        for entry in self.entries.iter().rev() {
            entry.driver.reset().await;
        }
    }

    /// Closes every driver, children before parents. Reversing a pre-order DFS sequence always
    /// places a node after all of its descendants, which is the only ordering constraint the
    /// lifecycle requires — sibling subtrees need not close in any particular relative order.
    pub async fn close(&self) {
        for entry in self.entries.iter().rev() {
            entry.driver.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use jmp_value::Value;

    use super::*;
    use crate::driver::LabelMap;
    use crate::error::DriverError;
    use crate::method::MethodTable;

    struct Leaf {
        uuid: Uuid,
        labels: LabelMap,
    }

    #[async_trait]
    impl Driver for Leaf {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
        fn labels(&self) -> &LabelMap {
            &self.labels
        }
        fn children(&self) -> &[(String, Arc<dyn Driver>)] {
            &[]
        }
        fn methods(&self) -> &MethodTable {
            static EMPTY: std::sync::OnceLock<MethodTable> = std::sync::OnceLock::new();
            EMPTY.get_or_init(MethodTable::new)
        }
        async fn call(&self, _method: &str, _args: Vec<Value>) -> Result<Value, DriverError> {
            Err(DriverError::NotImplemented)
        }
    }

    struct Composite {
        uuid: Uuid,
        labels: LabelMap,
        children: Vec<(String, Arc<dyn Driver>)>,
    }

    #[async_trait]
    impl Driver for Composite {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
        fn labels(&self) -> &LabelMap {
            &self.labels
        }
        fn children(&self) -> &[(String, Arc<dyn Driver>)] {
            &self.children
        }
        fn methods(&self) -> &MethodTable {
            static EMPTY: std::sync::OnceLock<MethodTable> = std::sync::OnceLock::new();
            EMPTY.get_or_init(MethodTable::new)
        }
    }

    #[test]
    fn enumerate_is_pre_order_with_valid_parent_links() {
        let power: Arc<dyn Driver> = Arc::new(Leaf {
            uuid: Uuid::new_v4(),
            labels: BTreeMap::new(),
        });
        let serial: Arc<dyn Driver> = Arc::new(Leaf {
            uuid: Uuid::new_v4(),
            labels: BTreeMap::new(),
        });
        let root: Arc<dyn Driver> = Arc::new(Composite {
            uuid: Uuid::new_v4(),
            labels: BTreeMap::new(),
            children: vec![("power".to_owned(), power.clone()), ("serial".to_owned(), serial.clone())],
        });

        let entries = enumerate(root.clone());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].uuid, root.uuid());
        assert!(entries[0].parent_uuid.is_none());

        let seen: Vec<Uuid> = entries.iter().map(|e| e.uuid).collect();
        for entry in &entries[1..] {
            assert!(entry.parent_uuid.is_some());
            assert!(seen.contains(&entry.parent_uuid.unwrap()));
        }
    }

    #[test]
    fn registry_looks_up_by_uuid() {
        let leaf_uuid = Uuid::new_v4();
        let leaf: Arc<dyn Driver> = Arc::new(Leaf {
            uuid: leaf_uuid,
            labels: BTreeMap::new(),
        });
        let root: Arc<dyn Driver> = Arc::new(Composite {
            uuid: Uuid::new_v4(),
            labels: BTreeMap::new(),
            children: vec![("leaf".to_owned(), leaf)],
        });

        let registry = Registry::build(root);
        assert!(registry.get(leaf_uuid).is_some());
        assert!(registry.get(Uuid::new_v4()).is_none());
        assert_eq!(registry.reports().len(), 2);
    }
}
