// Scripted stand-in for the bridge CLI.
//
// Replies to `call()` come from a queue (then a fallback reply), and
// `subscribe()` streams a fixed list of lines. Every invocation is recorded
// so tests can assert on the exact arguments the bridge client produced.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver};

use super::adapter::IntegrationAdapter;
use super::error::IntegrationResult;

pub struct MockAdapter {
    name: String,
    /// Consumed front to back, one per `call()`
    queued_responses: Mutex<VecDeque<IntegrationResult<String>>>,
    /// Used once the queue is empty
    fallback_response: Mutex<IntegrationResult<String>>,
    subscribe_lines: Mutex<Vec<String>>,
    is_healthy: AtomicBool,
    call_count: AtomicUsize,
    subscribe_count: AtomicUsize,
    stop_count: AtomicUsize,
    calls: Mutex<Vec<Vec<String>>>,
    last_subscribe_args: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queued_responses: Mutex::new(VecDeque::new()),
            fallback_response: Mutex::new(Ok(r#"{"ok": true}"#.to_string())),
            subscribe_lines: Mutex::new(Vec::new()),
            is_healthy: AtomicBool::new(true),
            call_count: AtomicUsize::new(0),
            subscribe_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            last_subscribe_args: Mutex::new(Vec::new()),
        }
    }

    /// Reply used whenever no queued reply is left
    pub fn set_call_response(&self, response: IntegrationResult<String>) {
        *self
            .fallback_response
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = response;
    }

    /// Reply for the next `call()` only
    pub fn push_call_response(&self, response: IntegrationResult<String>) {
        self.queued_responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn set_subscribe_lines(&self, lines: Vec<String>) {
        *self
            .subscribe_lines
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = lines;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::Relaxed)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::Relaxed)
    }

    /// Arguments of every `call()`, oldest first
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last_call_args(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
            .unwrap_or_default()
    }

    pub fn last_subscribe_args(&self) -> Vec<String> {
        self.last_subscribe_args
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn reset(&self) {
        self.call_count.store(0, Ordering::Relaxed);
        self.subscribe_count.store(0, Ordering::Relaxed);
        self.stop_count.store(0, Ordering::Relaxed);
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.last_subscribe_args
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl IntegrationAdapter for MockAdapter {
    async fn call(&self, args: &[&str]) -> IntegrationResult<String> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(args.iter().map(|s| s.to_string()).collect());

        let queued = self
            .queued_responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match queued {
            Some(response) => response,
            None => self
                .fallback_response
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    async fn subscribe(&self, args: &[&str]) -> IntegrationResult<Receiver<String>> {
        self.subscribe_count.fetch_add(1, Ordering::Relaxed);
        *self
            .last_subscribe_args
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = args.iter().map(|s| s.to_string()).collect();

        let (tx, rx) = mpsc::channel(100);
        let lines = self
            .subscribe_lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        tokio::spawn(async move {
            for line in lines {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn stop(&self) -> IntegrationResult<()> {
        self.stop_count.fetch_add(1, Ordering::Relaxed);
        self.is_healthy.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
