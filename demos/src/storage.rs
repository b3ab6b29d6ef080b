use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jmp_driver::{Driver, DriverError, LabelMap, MethodTable, ResourceHandle, ResourceTable, LABEL_CLIENT_CLASS};
use jmp_transport::ByteStream as _;
use jmp_value::Value;
use uuid::Uuid;

/// Consumes a resource handle argument: reads the attached pipe to EOF and reports the byte
/// count. Exercises the resource-upload path (spec §4.4 "Resource transfer").
pub struct MockStorage {
    uuid: Uuid,
    labels: LabelMap,
    methods: MethodTable,
    resources: Arc<ResourceTable>,
}

impl MockStorage {
    pub fn new(resources: Arc<ResourceTable>) -> Arc<dyn Driver> {
        let mut labels = BTreeMap::new();
        labels.insert(
            LABEL_CLIENT_CLASS.to_owned(),
            "jumpstarter.drivers.storage.MockStorageClient".to_owned(),
        );

        Arc::new(Self {
            uuid: Uuid::new_v4(),
            labels,
            methods: MethodTable::new()
                .unary("write")
                .help("write", "Drain the attached resource stream, returning the byte count read"),
            resources,
        })
    }
}

#[async_trait]
impl Driver for MockStorage {
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
        &self.methods
    }

    fn description(&self) -> Option<&str> {
        Some("Mock storage sink backed by the session's resource arena")
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        if method != "write" {
            return Err(DriverError::NotImplemented);
        }

        let handle = args
            .first()
            .and_then(ResourceHandle::from_value)
            .ok_or_else(|| DriverError::InvalidArgument("expected a resource handle argument".to_owned()))?;

        let ResourceHandle::ClientStream { uuid, .. } = handle else {
            return Err(DriverError::InvalidArgument("presigned requests are not supported by this mock".to_owned()));
        };

        let mut pipe = self
            .resources
            .take(uuid)
            .ok_or_else(|| DriverError::InvalidArgument("resource handle refers to an unknown or already-consumed uuid".to_owned()))?;

        let mut total = 0u64;
        loop {
            match pipe.receive().await {
                Ok(Some(chunk)) => total += chunk.len() as u64,
                Ok(None) => break,
                Err(error) => return Err(DriverError::Other(error.to_string())),
            }
        }

        Ok(Value::Number(total.into()))
    }
}
