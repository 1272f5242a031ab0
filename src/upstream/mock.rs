//! Scripted in-memory upstream for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::upstream::types::{RequestDescriptor, TransportError};
use crate::upstream::Upstream;

/// Replays queued responses in order, then repeats `fallback`.
pub struct ScriptedUpstream {
    script: Mutex<VecDeque<Result<Value, TransportError>>>,
    fallback: Result<Value, TransportError>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
    seen: Mutex<Vec<(Instant, RequestDescriptor)>>,
    closed: AtomicBool,
}

impl ScriptedUpstream {
    pub fn always(fallback: Result<Value, TransportError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Mutex::new(None),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn then(self, response: Result<Value, TransportError>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.seen.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.seen.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn send(&self, request: &RequestDescriptor) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((Instant::now(), request.clone()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
