//! Service configuration.
use crate::error::ConfigError;
use crate::protocol::transport::pdu::StMin;
use crate::protocol::transport::{ACK_RUN_PERIOD_MS, DOCAN_RUN_PERIOD_MS, LOCK_TIMEOUT_MS};
use alloc::collections::BTreeSet;
use embassy_time::Duration;

/// Default shared memory budget (bytes).
pub const DEFAULT_MEMORY_BUDGET: usize = 64 * 1024;

//==================================================================================SERVICE_CONFIG
/// Construction parameters of a [`DoCanService`](super::DoCanService).
///
/// ```
/// use korri_docan::protocol::service::ServiceConfig;
/// use korri_docan::protocol::transport::pdu::StMin;
///
/// let config = ServiceConfig::new(0x10)
///     .with_functional_address(0x33)
///     .with_block_size(8)
///     .with_st_min(StMin::millis(5));
/// assert_eq!(config.source_address(), 0x10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub(crate) source_address: u8,
    pub(crate) functional_addresses: BTreeSet<u8>,
    pub(crate) block_size: u8,
    pub(crate) st_min: StMin,
    pub(crate) memory_budget: usize,
    pub(crate) run_period: Duration,
    pub(crate) ack_period: Duration,
    pub(crate) lock_timeout: Duration,
    pub(crate) wait_frame_limit: Option<u8>,
}

impl ServiceConfig {
    /// Defaults for a node answering at `source_address`.
    pub fn new(source_address: u8) -> Self {
        Self {
            source_address,
            functional_addresses: BTreeSet::new(),
            block_size: 0,
            st_min: StMin::ZERO,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            run_period: Duration::from_millis(DOCAN_RUN_PERIOD_MS as u64),
            ack_period: Duration::from_millis(ACK_RUN_PERIOD_MS as u64),
            lock_timeout: Duration::from_millis(LOCK_TIMEOUT_MS as u64),
            wait_frame_limit: None,
        }
    }

    /// Accept functional requests addressed to `target`.
    pub fn with_functional_address(mut self, target: u8) -> Self {
        self.functional_addresses.insert(target);
        self
    }

    /// Block size advertised in our Flow Control frames (0 = no further FC).
    pub fn with_block_size(mut self, block_size: u8) -> Self {
        self.block_size = block_size;
        self
    }

    /// STmin advertised in our Flow Control frames. Checked by the service.
    pub fn with_st_min(mut self, st_min: StMin) -> Self {
        self.st_min = st_min;
        self
    }

    /// Bytes shared by all runners (message buffers plus per-runner tags).
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Minimum spacing between two scheduler ticks.
    pub fn with_run_period(mut self, period: Duration) -> Self {
        self.run_period = period;
        self
    }

    /// Acknowledgement polling cadence used by the async driver.
    pub fn with_ack_period(mut self, period: Duration) -> Self {
        self.ack_period = period;
        self
    }

    /// Bounded wait applied to every internal lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Consecutive WAIT flow controls a sender tolerates; `None` for no limit.
    pub fn with_wait_frame_limit(mut self, limit: Option<u8>) -> Self {
        self.wait_frame_limit = limit;
        self
    }

    #[inline]
    pub fn source_address(&self) -> u8 {
        self.source_address
    }

    #[inline]
    pub fn functional_addresses(&self) -> &BTreeSet<u8> {
        &self.functional_addresses
    }

    #[inline]
    pub fn block_size(&self) -> u8 {
        self.block_size
    }

    #[inline]
    pub fn st_min(&self) -> StMin {
        self.st_min
    }

    #[inline]
    pub fn memory_budget(&self) -> usize {
        self.memory_budget
    }

    #[inline]
    pub fn run_period(&self) -> Duration {
        self.run_period
    }

    #[inline]
    pub fn ack_period(&self) -> Duration {
        self.ack_period
    }

    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    #[inline]
    pub fn wait_frame_limit(&self) -> Option<u8> {
        self.wait_frame_limit
    }

    /// Reject values the wire format cannot carry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.st_min.validate()
    }
}

//==================================================================================SETTINGS
/// Runtime-mutable part of the configuration, guarded by the service.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub source_address: u8,
    pub functional_addresses: BTreeSet<u8>,
    pub block_size: u8,
    pub st_min: StMin,
}

impl From<&ServiceConfig> for Settings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            source_address: config.source_address,
            functional_addresses: config.functional_addresses.clone(),
            block_size: config.block_size,
            st_min: config.st_min,
        }
    }
}
