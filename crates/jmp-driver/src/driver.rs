use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use jmp_transport::BoxedByteStream;
use jmp_value::Value;
use uuid::Uuid;

use crate::error::DriverError;
use crate::method::MethodTable;

/// Label map attached to a driver instance. Two keys are reserved: [`LABEL_CLIENT_CLASS`] names
/// the client-side stub class, [`LABEL_NAME`] is the child's name under its parent (absent on
/// the root).
pub type LabelMap = BTreeMap<String, String>;

pub const LABEL_CLIENT_CLASS: &str = "jumpstarter.dev/client";
pub const LABEL_NAME: &str = "jumpstarter.dev/name";

pub type ServerStreamResult = Pin<Box<dyn Stream<Item = Result<Value, DriverError>> + Send>>;

/// A typed device object exposing unary, server-streaming and byte-stream operations.
///
/// `Composite` is not a base class relationship: any driver may carry children, and a composite
/// is simply a driver whose [`children`](Driver::children) is non-empty. Identity (`uuid`) is
/// assigned once at construction and never changes for the lifetime of the instance.
#[async_trait]
pub trait Driver: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn labels(&self) -> &LabelMap;

    /// Ordered name→driver mapping. Empty for a leaf driver.
    fn children(&self) -> &[(String, Arc<dyn Driver>)];

    fn methods(&self) -> &MethodTable;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Called on every lease entry, children first is handled by the caller (the registry), not
    /// by this method recursing into `children()` itself.
    async fn reset(&self) {}

    /// Called on every lease exit, children first is handled by the caller.
    async fn close(&self) {}

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        let _ = (method, args);
        Err(DriverError::NotImplemented)
    }

    async fn call_streaming(&self, method: &str, args: Vec<Value>) -> Result<ServerStreamResult, DriverError> {
        let _ = (method, args);
        Err(DriverError::NotImplemented)
    }

    async fn open_stream(&self, method: &str) -> Result<BoxedByteStream, DriverError> {
        let _ = method;
        Err(DriverError::NotImplemented)
    }
}
