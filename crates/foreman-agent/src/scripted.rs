//! Scripted provider for tests and dry runs
//!
//! Replays a fixed list of events per query. Scripts can be chosen by a
//! substring of the prompt, and a gate can hold every query before its final
//! event until the test releases it.

use async_trait::async_trait;
use foreman_core::{ForemanError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use crate::provider::{Provider, ProviderStream};
use crate::types::{ProviderEvent, QueryOptions};

/// One scripted step; `Err` becomes a transport failure
pub type ScriptItem = std::result::Result<ProviderEvent, String>;

struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(in_flight: Arc<AtomicUsize>, max: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Provider that replays scripted events
pub struct ScriptedProvider {
    name: String,
    default: Vec<ScriptItem>,
    rules: Vec<(String, Vec<ScriptItem>)>,
    gate: Option<Arc<Semaphore>>,
    queries: Arc<Mutex<Vec<QueryOptions>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
    started_notify: Arc<Notify>,
    auth_error: Option<String>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::named("scripted")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: vec![Ok(ProviderEvent::success("done"))],
            rules: Vec::new(),
            gate: None,
            queries: Arc::default(),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
            started: Arc::default(),
            started_notify: Arc::default(),
            auth_error: None,
        }
    }

    /// Script used when no prompt rule matches
    pub fn with_default(mut self, script: Vec<ScriptItem>) -> Self {
        self.default = script;
        self
    }

    /// Script used when the prompt contains `needle` (first match wins)
    pub fn on_prompt(mut self, needle: impl Into<String>, script: Vec<ScriptItem>) -> Self {
        self.rules.push((needle.into(), script));
        self
    }

    /// Hold every query before its final event until [`release`](Self::release)
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Fail [`Provider::check_auth`] with `message`
    pub fn without_credentials(mut self, message: impl Into<String>) -> Self {
        self.auth_error = Some(message.into());
        self
    }

    /// Let `n` held queries finish
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<QueryOptions> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// Streams currently being consumed
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous streams seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Streams that have started replaying
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` streams have started; false on timeout
    pub async fn wait_for_started(&self, n: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.started_notify.notified();
                if self.started() >= n {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn script_for(&self, prompt: &str) -> Vec<ScriptItem> {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_auth(&self) -> Result<()> {
        match &self.auth_error {
            Some(message) => Err(ForemanError::Auth(message.clone())),
            None => Ok(()),
        }
    }

    async fn execute_query(&self, options: QueryOptions) -> Result<ProviderStream> {
        let script = self.script_for(&options.prompt.text());
        let cancel = options.cancel.clone();
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(options);
        }

        let gate = self.gate.clone();
        let in_flight = self.in_flight.clone();
        let max_in_flight = self.max_in_flight.clone();
        let started = self.started.clone();
        let started_notify = self.started_notify.clone();

        Ok(Box::pin(async_stream::stream! {
            let _guard = InFlightGuard::enter(in_flight, &max_in_flight);
            started.fetch_add(1, Ordering::SeqCst);
            started_notify.notify_waiters();

            let last = script.len().saturating_sub(1);
            for (i, item) in script.into_iter().enumerate() {
                if i == last {
                    if let Some(gate) = &gate {
                        let opened = tokio::select! {
                            _ = cancel.cancelled() => false,
                            permit = gate.acquire() => match permit {
                                Ok(permit) => {
                                    permit.forget();
                                    true
                                }
                                Err(_) => false,
                            },
                        };
                        if !opened {
                            return;
                        }
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }

                match item {
                    Ok(event) => {
                        yield Ok(event);
                    }
                    Err(message) => {
                        yield Err(ForemanError::ProviderTransport(message));
                        return;
                    }
                }
            }
        }))
    }
}
