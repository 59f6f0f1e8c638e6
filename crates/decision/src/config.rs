//! Decision engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default grace period before a lost peer is treated as gone.
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between periodic cluster checks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval between polls while waiting for the cluster to form.
pub const DEFAULT_GATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_BUFFER: usize = 16;

/// Configuration for a node's decision loop.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Grace period before declaring the peer (and possibly ourselves) isolated.
    pub decision_timeout: Duration,

    /// Interval between periodic cluster checks.
    pub tick_interval: Duration,

    /// Interval between polls while waiting for all members to appear.
    pub gate_poll_interval: Duration,

    /// Capacity of the inbound advice queue.
    pub advice_buffer: usize,

    /// Capacity of the outbound command queue.
    pub command_buffer: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            decision_timeout: DEFAULT_DECISION_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            gate_poll_interval: DEFAULT_GATE_POLL_INTERVAL,
            advice_buffer: DEFAULT_BUFFER,
            command_buffer: DEFAULT_BUFFER,
        }
    }
}

impl DecisionConfig {
    /// Sets the decision timeout.
    #[must_use]
    pub const fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }

    /// Sets the tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the startup poll interval.
    #[must_use]
    pub const fn with_gate_poll_interval(mut self, interval: Duration) -> Self {
        self.gate_poll_interval = interval;
        self
    }

    /// Sets the advice queue capacity.
    #[must_use]
    pub const fn with_advice_buffer(mut self, capacity: usize) -> Self {
        self.advice_buffer = capacity;
        self
    }

    // Tokio channels panic on a zero capacity.
    pub(crate) fn advice_capacity(&self) -> usize {
        self.advice_buffer.max(1)
    }

    pub(crate) fn command_capacity(&self) -> usize {
        self.command_buffer.max(1)
    }
}
