use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::driver::{Driver, LabelMap};
use crate::method::MethodTable;

/// A driver whose only role is to group children under stable names. Per spec, composition is
/// a property of the tree (a non-empty `children()`), not a base-class relationship — this is
/// simply the concrete driver used when a node in an export tree has no operations of its own.
pub struct CompositeDriver {
    uuid: Uuid,
    labels: LabelMap,
    children: Vec<(String, Arc<dyn Driver>)>,
    methods: MethodTable,
}

impl CompositeDriver {
    pub fn new(labels: LabelMap, children: Vec<(String, Arc<dyn Driver>)>) -> Arc<dyn Driver> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            labels,
            children,
            methods: MethodTable::new(),
        })
    }
}

#[async_trait]
impl Driver for CompositeDriver {
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
        &self.methods
    }
}
