use std::collections::HashMap;

use jmp_transport::BoxedByteStream;
use jmp_value::Value;
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignedMethod {
    Get,
    Put,
}

/// Value handed to a driver when a client attaches a resource.
pub enum ResourceHandle {
    /// Read/write via the resource pipe held under `uuid` in the session's [`ResourceTable`].
    ClientStream { uuid: Uuid, content_encoding: Option<String> },
    /// Fetch/push directly against object storage; the driver performs the HTTP itself.
    PresignedRequest {
        method: PresignedMethod,
        url: String,
        headers: Vec<(String, String)>,
    },
}

/// Map key marking a [`Value`] as a resource handle rather than a plain argument, so a driver
/// can tell the two apart when scanning its call arguments.
const RESOURCE_HANDLE_TAG: &str = "$jmp_resource";

impl ResourceHandle {
    /// Encodes this handle as the `Value` a client passes as a driver-call argument.
    pub fn to_value(&self) -> Value {
        let inner = match self {
            ResourceHandle::ClientStream { uuid, content_encoding } => Value::Map(vec![
                ("kind".to_owned(), Value::String("client_stream".to_owned())),
                ("uuid".to_owned(), Value::String(uuid.to_string())),
                (
                    "content_encoding".to_owned(),
                    content_encoding.clone().map(Value::String).unwrap_or(Value::Null),
                ),
            ]),
            ResourceHandle::PresignedRequest { method, url, headers } => Value::Map(vec![
                ("kind".to_owned(), Value::String("presigned_request".to_owned())),
                (
                    "method".to_owned(),
                    Value::String(
                        match method {
                            PresignedMethod::Get => "GET",
                            PresignedMethod::Put => "PUT",
                        }
                        .to_owned(),
                    ),
                ),
                ("url".to_owned(), Value::String(url.clone())),
                (
                    "headers".to_owned(),
                    Value::List(
                        headers
                            .iter()
                            .map(|(k, v)| Value::List(vec![Value::String(k.clone()), Value::String(v.clone())]))
                            .collect(),
                    ),
                ),
            ]),
        };
        Value::Map(vec![(RESOURCE_HANDLE_TAG.to_owned(), inner)])
    }

    /// Recognizes and decodes a value produced by [`Self::to_value`]; any other shape (including
    /// an ordinary map that merely happens to be a map) is not a resource handle.
    pub fn from_value(value: &Value) -> Option<ResourceHandle> {
        let inner = value.get(RESOURCE_HANDLE_TAG)?;
        match inner.get("kind")? {
            Value::String(kind) if kind == "client_stream" => {
                let uuid = match inner.get("uuid")? {
                    Value::String(s) => Uuid::parse_str(s).ok()?,
                    _ => return None,
                };
                let content_encoding = match inner.get("content_encoding") {
                    Some(Value::String(s)) => Some(s.clone()),
                    _ => None,
                };
                Some(ResourceHandle::ClientStream { uuid, content_encoding })
            }
            _ => None,
        }
    }
}

/// Per-session arena of in-flight resource pipes, keyed by UUID. Only the session task that owns
/// it mutates this table; an entry is unlinked by whichever driver call consumed it once that
/// call returns, never left for a background sweep.
#[derive(Default)]
pub struct ResourceTable {
    pipes: Mutex<HashMap<Uuid, BoxedByteStream>>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a UUID for a newly opened resource stream and stashes its pipe end.
    pub fn insert(&self, pipe: BoxedByteStream) -> Uuid {
        let uuid = Uuid::new_v4();
        self.pipes.lock().insert(uuid, pipe);
        uuid
    }

    /// Removes and returns the pipe for a driver call to consume. Returns `None` if the UUID is
    /// unknown or was already taken.
    pub fn take(&self, uuid: Uuid) -> Option<BoxedByteStream> {
        self.pipes.lock().remove(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.pipes.lock().contains_key(&uuid)
    }

    pub fn len(&self) -> usize {
        self.pipes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use jmp_transport::memory_pipe;

    use super::*;

    #[test]
    fn insert_then_take_removes_the_entry() {
        let table = ResourceTable::new();
        let (server_end, _client_end) = memory_pipe(4096);
        let uuid = table.insert(server_end);

        assert!(table.contains(uuid));
        assert!(table.take(uuid).is_some());
        assert!(!table.contains(uuid));
        assert!(table.take(uuid).is_none());
    }

    #[test]
    fn client_stream_handle_round_trips_through_value() {
        let handle = ResourceHandle::ClientStream {
            uuid: Uuid::new_v4(),
            content_encoding: Some("gzip".to_owned()),
        };
        let value = handle.to_value();
        let decoded = ResourceHandle::from_value(&value).unwrap();
        match (handle, decoded) {
            (
                ResourceHandle::ClientStream { uuid: a, content_encoding: ca },
                ResourceHandle::ClientStream { uuid: b, content_encoding: cb },
            ) => {
                assert_eq!(a, b);
                assert_eq!(ca, cb);
            }
            _ => panic!("expected ClientStream"),
        }
    }

    #[test]
    fn ordinary_map_is_not_mistaken_for_a_resource_handle() {
        let value = Value::Map(vec![("uuid".to_owned(), Value::String("not-a-handle".to_owned()))]);
        assert!(ResourceHandle::from_value(&value).is_none());
    }
}
