pub mod api;
pub mod booking;
pub mod chat;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::booking::BookingPolicy;
use crate::context::{Clock, RequestContext, SystemClock};
use crate::db::Storage;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub storage: Storage,
    pub clock: Arc<dyn Clock>,
    pub policy: BookingPolicy,
}

impl AppState {
    pub fn new(config: Config, storage: Storage) -> Self {
        let clock = Arc::new(SystemClock::new(config.server.utc_offset()));
        let policy = BookingPolicy::from(&config.booking);
        Self {
            db: storage.pool().clone(),
            storage,
            clock,
            policy,
            config,
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn anonymous_context(&self) -> RequestContext {
        RequestContext::anonymous(self.clock.clone())
    }
}
