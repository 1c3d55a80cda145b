// src/registry.rs

//! Named limiter instances shared across a process.
//!
//! We use `DashMap` so lookups from many threads never contend on a single
//! lock, and creation of a missing entry happens at most once per name.

// dependencies
use crate::bulkhead::ConcurrencyLimiter;
use crate::config::{BulkheadConfig, RateLimiterConfig};
use crate::errors::AdmissionError;
use crate::rate_limiter::TokenRateLimiter;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

/// A limiter that can be built by name from a configuration.
pub trait Registrable: Sized + Send + Sync {
    type Config: Clone + Send + Sync;

    fn create(name: &str, config: Self::Config) -> Result<Self, AdmissionError>;
}

impl Registrable for ConcurrencyLimiter {
    type Config = BulkheadConfig;

    fn create(name: &str, config: BulkheadConfig) -> Result<Self, AdmissionError> {
        ConcurrencyLimiter::with_config(name, config)
    }
}

impl Registrable for TokenRateLimiter {
    type Config = RateLimiterConfig;

    fn create(name: &str, config: RateLimiterConfig) -> Result<Self, AdmissionError> {
        TokenRateLimiter::new(name, config)
    }
}

/// In-memory registry of limiters keyed by name.
#[derive(Debug)]
pub struct Registry<L: Registrable> {
    entries: Arc<DashMap<String, Arc<L>>>,
    default_config: L::Config,
}

pub type BulkheadRegistry = Registry<ConcurrencyLimiter>;
pub type RateLimiterRegistry = Registry<TokenRateLimiter>;

impl<L: Registrable> Registry<L> {
    pub fn new(default_config: L::Config) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_config,
        }
    }

    pub fn default_config(&self) -> &L::Config {
        &self.default_config
    }

    /// Return the limiter registered under `name`, creating it from the
    /// default configuration if missing.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<L>, AdmissionError> {
        self.get_or_create_with_config(name, self.default_config.clone())
    }

    /// Return the limiter registered under `name`, creating it from `config`
    /// if missing. An existing limiter keeps its own configuration.
    pub fn get_or_create_with_config(&self, name: &str, config: L::Config) -> Result<Arc<L>, AdmissionError> {
        if let Some(existing) = self.entries.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let limiter = Arc::new(L::create(name, config)?);
                debug!(name, "limiter registered");
                entry.insert(Arc::clone(&limiter));
                Ok(limiter)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<L>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Forget a limiter. Holders of its `Arc` keep using it.
    pub fn remove(&self, name: &str) -> Option<Arc<L>> {
        self.entries.remove(name).map(|(_, limiter)| limiter)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L> Default for Registry<L>
where
    L: Registrable,
    L::Config: Default,
{
    fn default() -> Self {
        Self::new(L::Config::default())
    }
}
