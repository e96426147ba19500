//! Request-scoped context and the injectable clock.
//!
//! Every operation that depends on "who is asking" or "what day is it"
//! receives a [`RequestContext`] instead of reading global state, so the
//! same code runs against the wall clock in production and a fixed
//! instant in tests.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;

use crate::db::Role;

/// Source of the current instant and the server's calendar day.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day in the server's configured offset.
    fn today(&self) -> NaiveDate;
}

/// Wall clock, with "today" evaluated at a fixed UTC offset.
#[derive(Debug, Clone)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Midday UTC on the given date, so the day never drifts under an offset of up to +/-12h.
    pub fn on(date: NaiveDate) -> Self {
        let now = date
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

/// Identity and clock for one request.
#[derive(Clone)]
pub struct RequestContext {
    pub user_id: Option<i64>,
    pub role: Role,
    pub clock: Arc<dyn Clock>,
}

impl RequestContext {
    pub fn anonymous(clock: Arc<dyn Clock>) -> Self {
        Self {
            user_id: None,
            role: Role::Guest,
            clock,
        }
    }

    pub fn for_user(user_id: i64, role: Role, clock: Arc<dyn Clock>) -> Self {
        Self {
            user_id: Some(user_id),
            role,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("now", &self.clock.now())
            .finish()
    }
}
