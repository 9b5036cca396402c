//! Deterministic fakes for fetch and completion in unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use sitemind_fetch::{FetchStrategy, FetchedPage};
use sitemind_shared::{FetchOptions, Result, RetryPolicy, SitemindError};

use crate::completion::Completion;

/// Options that skip the remote strategies and never retry.
pub fn direct_only_options() -> FetchOptions {
    FetchOptions {
        use_reader: false,
        use_browser: false,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::none(),
        ..FetchOptions::default()
    }
}

/// Returns generated text for any URL and logs when each call happened.
#[derive(Clone, Default)]
pub struct CannedStrategy {
    log: Arc<Mutex<Vec<(String, Instant)>>>,
    fail_with: Option<String>,
}

impl CannedStrategy {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchStrategy for CannedStrategy {
    fn name(&self) -> &'static str {
        "canned"
    }

    fn is_enabled(&self, _options: &FetchOptions) -> bool {
        true
    }

    async fn attempt(&self, url: &str, _options: &FetchOptions) -> Result<FetchedPage> {
        self.log.lock().unwrap().push((url.to_string(), Instant::now()));
        if let Some(message) = &self.fail_with {
            return Err(SitemindError::fetch(message.clone()));
        }
        Ok(FetchedPage {
            display_name: format!("Page {url}"),
            text: format!("Canned text for {url}."),
        })
    }
}

/// Answers every prompt with the same text and counts calls.
#[derive(Clone)]
pub struct CountingCompletion {
    answer: Option<String>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<Instant>>>,
}

impl CountingCompletion {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            latency: Duration::ZERO,
            calls: Arc::default(),
            log: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            ..Self::new("")
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completion for CountingCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.answer
            .clone()
            .ok_or_else(|| SitemindError::Completion("model unavailable".into()))
    }
}
