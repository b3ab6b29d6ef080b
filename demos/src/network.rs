use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jmp_driver::{Driver, DriverError, LabelMap, MethodTable, LABEL_CLIENT_CLASS};
use jmp_transport::{memory_pipe, BoxedByteStream, ByteStream as _};
use jmp_value::Value;
use uuid::Uuid;

/// Echoes every chunk it receives back to the caller, half-closing its send direction once the
/// caller half-closes theirs. Used to exercise the router relay's half-close propagation (`send_eof`
/// on one side must surface as exactly one end-of-stream on the other).
pub struct EchoNetwork {
    uuid: Uuid,
    labels: LabelMap,
    methods: MethodTable,
}

impl EchoNetwork {
    pub fn new() -> Arc<dyn Driver> {
        let mut labels = BTreeMap::new();
        labels.insert(
            LABEL_CLIENT_CLASS.to_owned(),
            "jumpstarter.drivers.network.EchoNetworkClient".to_owned(),
        );

        Arc::new(Self {
            uuid: Uuid::new_v4(),
            labels,
            methods: MethodTable::new()
                .byte_stream("connect")
                .help("connect", "Open a byte-stream that echoes everything it reads"),
        })
    }
}

#[async_trait]
impl Driver for EchoNetwork {
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
        Some("Mock network peer that echoes bytes")
    }

    async fn call(&self, _method: &str, _args: Vec<Value>) -> Result<Value, DriverError> {
        Err(DriverError::NotImplemented)
    }

    async fn open_stream(&self, method: &str) -> Result<BoxedByteStream, DriverError> {
        if method != "connect" {
            return Err(DriverError::NotImplemented);
        }

        // One end is handed back to the caller (the session's `Stream` handler), the other end
        // is driven by the echo task below.
        let (ours, theirs) = memory_pipe(4096);
        tokio::spawn(run_echo(ours));
        Ok(theirs)
    }
}

async fn run_echo(mut stream: BoxedByteStream) {
    loop {
        match stream.receive().await {
            Ok(Some(chunk)) => {
                if stream.send(chunk).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = stream.send_eof().await;
                break;
            }
            Err(_) => break,
        }
    }
}
