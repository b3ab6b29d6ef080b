use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jmp_driver::{Driver, DriverError, LabelMap, MethodTable, ServerStreamResult, LABEL_CLIENT_CLASS};
use jmp_value::Value;
use parking_lot::Mutex;
use uuid::Uuid;

/// A two-state power switch. `on()`/`off()` return `"ok"`; `state()` reports the latch.
pub struct MockPower {
    uuid: Uuid,
    labels: LabelMap,
    methods: MethodTable,
    on: Mutex<bool>,
}

impl MockPower {
    pub fn new() -> Arc<dyn Driver> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_CLIENT_CLASS.to_owned(), "jumpstarter.drivers.power.MockPowerClient".to_owned());

        Arc::new(Self {
            uuid: Uuid::new_v4(),
            labels,
            methods: MethodTable::new()
                .unary("on")
                .unary("off")
                .unary("state")
                .server_stream("read")
                .help("on", "Turn the switch on")
                .help("off", "Turn the switch off")
                .help("state", "Return \"on\" or \"off\"")
                .help("read", "Stream two readings of {voltage, current} then end"),
            on: Mutex::new(false),
        })
    }
}

#[async_trait]
impl Driver for MockPower {
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
        Some("Mock power switch")
    }

    async fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, DriverError> {
        match method {
            "on" => {
                *self.on.lock() = true;
                Ok(Value::String("ok".to_owned()))
            }
            "off" => {
                *self.on.lock() = false;
                Ok(Value::String("ok".to_owned()))
            }
            "state" => Ok(Value::String(if *self.on.lock() { "on" } else { "off" }.to_owned())),
            _ => Err(DriverError::NotImplemented),
        }
    }

    async fn call_streaming(&self, method: &str, _args: Vec<Value>) -> Result<ServerStreamResult, DriverError> {
        match method {
            "read" => {
                let readings = [(0.0_f64, 0.0_f64), (5.0, 2.0)];
                let stream = async_stream::stream! {
                    for (voltage, current) in readings {
                        let mut map = Vec::new();
                        map.push(("voltage".to_owned(), Value::Number(voltage.into())));
                        map.push(("current".to_owned(), Value::Number(current.into())));
                        yield Ok(Value::Map(map));
                    }
                };
                Ok(Box::pin(stream))
            }
            _ => Err(DriverError::NotImplemented),
        }
    }
}
