//! Concurrency limiter for transport calls
//!
//! A semaphore caps how many HTTP calls one client keeps in flight. It never
//! orders calls relative to each other: independent operations still run
//! concurrently up to the permit count.

use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::api::error::{DynamicsError, Result};

/// Concurrency limiting configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent HTTP requests to the API
    pub max_concurrent_requests: usize,
    /// Whether concurrency limiting is enabled
    pub enabled: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 20, // Conservative (Dataverse allows 52)
            enabled: true,
        }
    }
}

impl ConcurrencyConfig {
    pub fn disabled() -> Self {
        Self {
            max_concurrent_requests: usize::MAX,
            enabled: false,
        }
    }
}

/// Semaphore-based concurrency limiter for controlling concurrent API requests
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
    requests_acquired: Arc<AtomicU64>,
    requests_waited: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_requests.max(1)
        } else {
            // Tokio Semaphore max is 2^61-1
            1_000_000
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            requests_acquired: Arc::new(AtomicU64::new(0)),
            requests_waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire a permit for one transport call, waiting while at capacity.
    /// The permit is released when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.config.enabled && self.semaphore.available_permits() == 0 {
            self.requests_waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for permit ({} in use)",
                self.config.max_concurrent_requests
            );
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DynamicsError::Transport("concurrency limiter closed".into()))?;

        if self.config.enabled {
            self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        }
        Ok(permit)
    }

    /// Try to acquire a permit without waiting.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        if self.config.enabled {
            self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        }
        Some(permit)
    }

    pub fn available_permits(&self) -> usize {
        if !self.config.enabled {
            return usize::MAX;
        }
        self.semaphore.available_permits()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            available_permits: self.available_permits(),
            max_concurrent_requests: self.config.max_concurrent_requests,
            requests_acquired: self.requests_acquired.load(Ordering::Relaxed),
            requests_waited: self.requests_waited.load(Ordering::Relaxed),
            enabled: self.config.enabled,
        }
    }
}

/// Statistics for the concurrency limiter
#[derive(Debug, Clone)]
pub struct ConcurrencyStats {
    pub available_permits: usize,
    pub max_concurrent_requests: usize,
    /// Total permits acquired since creation
    pub requests_acquired: u64,
    /// Number of times a call had to wait for a permit
    pub requests_waited: u64,
    pub enabled: bool,
}

impl ConcurrencyStats {
    pub fn in_use(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        self.max_concurrent_requests
            .saturating_sub(self.available_permits)
    }
}
