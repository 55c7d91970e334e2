//! Connect/read/total timeouts resolved per request.

use crate::base::error::PoolError;
use std::time::Duration;
use tokio::time::Instant;

/// A single timeout setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutValue {
    /// Leave the connection's own default in place.
    #[default]
    Default,
    /// Block indefinitely.
    Infinite,
    Finite(Duration),
}

impl TimeoutValue {
    /// The concrete limit, if any. `Default` and `Infinite` both mean "no limit".
    pub fn duration(self) -> Option<Duration> {
        match self {
            TimeoutValue::Finite(d) => Some(d),
            TimeoutValue::Default | TimeoutValue::Infinite => None,
        }
    }
}

impl From<Duration> for TimeoutValue {
    fn from(d: Duration) -> Self {
        TimeoutValue::Finite(d)
    }
}

/// Timeout configuration for one request.
///
/// `total` caps connect and read together: whatever the connect phase spends is
/// subtracted from the read allowance.
#[derive(Debug, Clone, Default)]
pub struct Timeout {
    connect: TimeoutValue,
    read: TimeoutValue,
    total: Option<Duration>,
    started: Option<Instant>,
}

impl Timeout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same limit for connect and read.
    pub fn from_duration(d: Duration) -> Self {
        Self { connect: d.into(), read: d.into(), ..Self::default() }
    }

    pub fn with_connect(mut self, connect: impl Into<TimeoutValue>) -> Self {
        self.connect = connect.into();
        self
    }

    pub fn with_read(mut self, read: impl Into<TimeoutValue>) -> Self {
        self.read = read.into();
        self
    }

    pub fn with_total(mut self, total: Duration) -> Self {
        self.total = Some(total);
        self
    }

    pub fn total(&self) -> Option<Duration> {
        self.total
    }

    /// Reject zero durations. Runs before any I/O.
    pub fn validate(&self) -> Result<(), PoolError> {
        let fields = [("connect", self.connect.duration()), ("read", self.read.duration()), ("total", self.total)];
        for (name, value) in fields {
            if value == Some(Duration::ZERO) {
                return Err(PoolError::InvalidTimeout(format!(
                    "attempted to set {name} timeout to 0, but the timeout cannot be set to a value less than or equal to 0"
                )));
            }
        }
        Ok(())
    }

    /// A copy with the connect clock reset, for a new attempt.
    pub fn clone_fresh(&self) -> Self {
        Self { started: None, ..self.clone() }
    }

    /// Start the connect clock. Later calls keep the first start time.
    pub fn start_connect(&mut self) -> Instant {
        *self.started.get_or_insert_with(Instant::now)
    }

    /// Time elapsed since [`start_connect`](Self::start_connect), zero if never started.
    pub fn connect_duration(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> TimeoutValue {
        let Some(total) = self.total else {
            return self.connect;
        };
        match self.connect {
            TimeoutValue::Finite(connect) => TimeoutValue::Finite(connect.min(total)),
            TimeoutValue::Default | TimeoutValue::Infinite => TimeoutValue::Finite(total),
        }
    }

    /// Read allowance left after the connect phase. May be zero when `total` is spent.
    pub fn read_timeout(&self) -> TimeoutValue {
        let Some(total) = self.total else {
            return self.read;
        };
        let remaining = total.saturating_sub(self.connect_duration());
        match self.read {
            TimeoutValue::Finite(read) if self.started.is_none() => TimeoutValue::Finite(read),
            TimeoutValue::Finite(read) => TimeoutValue::Finite(remaining.min(read)),
            TimeoutValue::Default | TimeoutValue::Infinite => TimeoutValue::Finite(remaining),
        }
    }
}
