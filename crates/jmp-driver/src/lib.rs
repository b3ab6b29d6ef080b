//! Driver trait, method dispatch table, registry and per-session resource arena.
//!
//! This is the exported-device half of the protocol: [`Driver`] is the typed object a session
//! wraps, [`dispatch`] enforces the unary/server-stream/byte-stream tag discipline, and
//! [`registry`] turns a tree of driver instances into the flat report list `GetReport` answers
//! with.

mod composite;
mod dispatch;
mod driver;
mod error;
mod method;
mod registry;
mod resource;

pub use self::composite::CompositeDriver;
pub use self::dispatch::{dispatch_call, dispatch_open_stream, dispatch_streaming_call};
pub use self::driver::{Driver, LabelMap, ServerStreamResult, LABEL_CLIENT_CLASS, LABEL_NAME};
pub use self::error::DriverError;
pub use self::method::{MethodTable, MethodTag};
pub use self::registry::{enumerate, DriverEntry, Registry};
pub use self::resource::{PresignedMethod, ResourceHandle, ResourceTable};
