use std::sync::Arc;

use jmp_transport::BoxedByteStream;
use jmp_value::Value;

use crate::driver::{Driver, ServerStreamResult};
use crate::error::DriverError;
use crate::method::MethodTag;

/// Invokes a unary operation, refusing the call if `method` is unknown or tagged differently.
/// An unknown method name and a mistagged method name fail identically — never silently falling
/// through to the wrong call kind.
pub async fn dispatch_call(driver: &Arc<dyn Driver>, method: &str, args: Vec<Value>) -> Result<Value, DriverError> {
    match driver.methods().tag_of(method) {
        Some(MethodTag::Unary) => driver.call(method, args).await,
        _ => Err(DriverError::NotImplemented),
    }
}

pub async fn dispatch_streaming_call(
    driver: &Arc<dyn Driver>,
    method: &str,
    args: Vec<Value>,
) -> Result<ServerStreamResult, DriverError> {
    match driver.methods().tag_of(method) {
        Some(MethodTag::ServerStream) => driver.call_streaming(method, args).await,
        _ => Err(DriverError::NotImplemented),
    }
}

pub async fn dispatch_open_stream(driver: &Arc<dyn Driver>, method: &str) -> Result<BoxedByteStream, DriverError> {
    match driver.methods().tag_of(method) {
        Some(MethodTag::ByteStream) => driver.open_stream(method).await,
        _ => Err(DriverError::NotImplemented),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;

    use super::*;
    use crate::driver::LabelMap;
    use crate::method::MethodTable;

    struct OnlyUnary {
        uuid: uuid::Uuid,
        labels: LabelMap,
        methods: MethodTable,
    }

    #[async_trait]
    impl Driver for OnlyUnary {
        fn uuid(&self) -> uuid::Uuid {
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
        async fn call(&self, _method: &str, _args: Vec<Value>) -> Result<Value, DriverError> {
            Ok(Value::String("ok".to_owned()))
        }
    }

    fn driver() -> Arc<dyn Driver> {
        Arc::new(OnlyUnary {
            uuid: uuid::Uuid::new_v4(),
            labels: BTreeMap::new(),
            methods: MethodTable::new().unary("on"),
        })
    }

    #[tokio::test]
    async fn unknown_method_fails_not_implemented() {
        let driver = driver();
        let result = dispatch_call(&driver, "off", vec![]).await;
        assert_eq!(result, Err(DriverError::NotImplemented));
    }

    #[tokio::test]
    async fn mistagged_method_fails_not_implemented() {
        let driver = driver();
        let result = dispatch_streaming_call(&driver, "on", vec![]).await;
        assert!(result.is_err());
        assert_eq!(result.err().unwrap(), DriverError::NotImplemented);
    }

    #[tokio::test]
    async fn correctly_tagged_call_succeeds() {
        let driver = driver();
        let result = dispatch_call(&driver, "on", vec![]).await.unwrap();
        assert_eq!(result, Value::String("ok".to_owned()));
    }
}
