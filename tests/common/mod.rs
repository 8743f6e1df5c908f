//! Shared transports and telemetry sinks for integration tests.

use async_trait::async_trait;
use resilient_http::telemetry::{AttemptOutcome, AttemptRecord};
use resilient_http::{HttpMethod, HttpRequest, HttpResponse, Telemetry, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub type Outcome = Result<HttpResponse, TransportError>;

pub fn connection_error() -> Outcome {
    Err(TransportError::Connect("connection refused".to_string()))
}

pub fn ok(status: u16) -> Outcome {
    Ok(HttpResponse::new(status).with_body(r#"{"data":"test"}"#))
}

/// Replays a script of outcomes, repeating the last one forever
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Outcome>) -> Arc<Self> {
        assert!(!script.is_empty(), "script needs at least one outcome");
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn always(outcome: Outcome) -> Arc<Self> {
        Self::new(vec![outcome])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Replace the remaining script
    #[allow(dead_code)]
    pub fn set_script(&self, script: Vec<Outcome>) {
        *self.script.lock().unwrap() = script.into();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _request: &HttpRequest) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }
}

/// Answers 200 only after [`GatedTransport::open_gate`] is called
#[allow(dead_code)]
pub struct GatedTransport {
    gate: Notify,
    calls: AtomicU32,
}

#[allow(dead_code)]
impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn open_gate(&self) {
        self.gate.notify_waiters();
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _request: &HttpRequest) -> Outcome {
        let notified = self.gate.notified();
        self.calls.fetch_add(1, Ordering::SeqCst);
        notified.await;
        Ok(HttpResponse::new(200))
    }
}

/// Telemetry sink remembering every event
#[derive(Default)]
pub struct RecordingTelemetry {
    requests: Mutex<Vec<(HttpMethod, u16)>>,
    retries: Mutex<Vec<HttpMethod>>,
    attempts: Mutex<Vec<AttemptRecord>>,
}

#[allow(dead_code)]
impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<(HttpMethod, u16)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn retries(&self) -> usize {
        self.retries.lock().unwrap().len()
    }

    pub fn outcomes(&self) -> Vec<AttemptOutcome> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.outcome)
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn record_request(&self, method: HttpMethod, status_code: u16, _elapsed: Duration) {
        self.requests.lock().unwrap().push((method, status_code));
    }

    fn record_retry(&self, method: HttpMethod) {
        self.retries.lock().unwrap().push(method);
    }

    fn record_attempt(&self, record: &AttemptRecord) {
        self.attempts.lock().unwrap().push(*record);
    }
}
