#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crmsync_core::models::AssignmentEvent;
use crmsync_core::AppError;
use crmsync_db::test_helpers::MemoryTenantStore;
use crmsync_worker::{AssignmentEventHandler, EventStream, StreamMessage};
use serde_json::Value;
use tokio::sync::watch;

pub const TENANT: &str = "t1";

pub fn fields(kind: &str, data: Value) -> HashMap<String, String> {
    HashMap::from([
        ("type".to_string(), format!("organization.assignment.{}", kind)),
        ("tenantId".to_string(), TENANT.to_string()),
        ("data".to_string(), data.to_string()),
    ])
}

pub fn event(kind: &str, data: Value) -> AssignmentEvent {
    AssignmentEvent::from_fields(&fields(kind, data)).unwrap()
}

pub fn message(id: &str, kind: &str, data: Value) -> StreamMessage {
    let event_type = format!("organization.assignment.{}", kind);
    let data = data.to_string();
    StreamMessage::new(
        id,
        &[("type", event_type.as_str()), ("tenantId", TENANT), ("data", data.as_str())],
    )
}

/// Store with tenant `t1`, organization `SALES` and user `u-1`.
pub fn seeded_store() -> MemoryTenantStore {
    let store = MemoryTenantStore::new();
    store.seed_organization(TENANT, "SALES");
    store.seed_user(TENANT, "u-1");
    store
}

pub fn handler(store: &MemoryTenantStore) -> AssignmentEventHandler {
    AssignmentEventHandler::new(Arc::new(store.clone()), Duration::ZERO)
}

/// One scripted reply to `read_batch`.
pub enum Read {
    Batch(Vec<StreamMessage>),
    Fail,
}

#[derive(Default)]
struct StreamState {
    reads: VecDeque<Read>,
    acked: Vec<String>,
    ensure_group_calls: usize,
    ensure_group_failures: usize,
    reconnects: usize,
}

/// Event stream double. Signals shutdown once every scripted read was served.
#[derive(Clone)]
pub struct ScriptedStream {
    state: Arc<Mutex<StreamState>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ScriptedStream {
    pub fn new(reads: Vec<Read>) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let stream = Self {
            state: Arc::new(Mutex::new(StreamState {
                reads: reads.into(),
                ..Default::default()
            })),
            shutdown: Arc::new(tx),
        };
        (stream, rx)
    }

    pub fn failing_ensure_group(self, times: usize) -> Self {
        self.state.lock().unwrap().ensure_group_failures = times;
        self
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn reconnects(&self) -> usize {
        self.state.lock().unwrap().reconnects
    }

    pub fn ensure_group_calls(&self) -> usize {
        self.state.lock().unwrap().ensure_group_calls
    }
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn ensure_group(&mut self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.ensure_group_calls += 1;
        if state.ensure_group_failures > 0 {
            state.ensure_group_failures -= 1;
            return Err(AppError::Network {
                code: Some("ECONNREFUSED".to_string()),
                message: "broker unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn read_batch(&mut self) -> Result<Vec<StreamMessage>, AppError> {
        let next = self.state.lock().unwrap().reads.pop_front();
        match next {
            Some(Read::Batch(messages)) => Ok(messages),
            Some(Read::Fail) => Err(AppError::Network {
                code: Some("ECONNRESET".to_string()),
                message: "connection reset".to_string(),
            }),
            None => {
                let _ = self.shutdown.send(true);
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }

    async fn ack(&mut self, message_id: &str) -> Result<(), AppError> {
        self.state.lock().unwrap().acked.push(message_id.to_string());
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), AppError> {
        self.state.lock().unwrap().reconnects += 1;
        Ok(())
    }
}
