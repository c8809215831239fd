use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::types::{PoolError, Result};

/// Configuration for [`super::BufferPool`].
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes:
///
/// ```toml
/// block_count = 4096
/// evict_inner_nodes = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolOptions {
    /// Number of usable frames.
    pub block_count: usize,
    /// Page size in bytes; a power of two between 4 KiB and 64 KiB.
    pub page_size: u32,
    /// Whether fixes rewrite parent slots to the swizzled form.
    pub swizzling: bool,
    /// Frames to reclaim per eviction batch, as a percentage of the pool.
    pub evict_batch_percent: u32,
    /// Sweep rounds allowed above `Normal` urgency.
    pub evict_max_rounds: u32,
    /// Pause between escalation steps when a sweep freed nothing.
    pub evict_retry_sleep_ms: u64,
    /// Allow inner nodes without swizzled children to be evicted at
    /// `Urgent` and above.
    pub evict_inner_nodes: bool,
    /// Verify page checksums on read.
    pub verify_checksums: bool,
    /// Background cleaner period; zero means wakeups only.
    pub cleaner_interval_ms: u64,
    /// Most pages a single cleaner write may carry.
    pub cleaner_batch_pages: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            block_count: 1024,
            page_size: DEFAULT_PAGE_SIZE,
            swizzling: true,
            evict_batch_percent: 1,
            evict_max_rounds: 20,
            evict_retry_sleep_ms: 100,
            evict_inner_nodes: false,
            verify_checksums: true,
            cleaner_interval_ms: 1000,
            cleaner_batch_pages: 64,
        }
    }
}

impl PoolOptions {
    /// Sets `block_count`.
    pub fn with_block_count(mut self, block_count: usize) -> Self {
        self.block_count = block_count;
        self
    }

    /// Sets `page_size`.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets `swizzling`.
    pub fn with_swizzling(mut self, swizzling: bool) -> Self {
        self.swizzling = swizzling;
        self
    }

    /// Sets `evict_batch_percent`.
    pub fn with_evict_batch_percent(mut self, percent: u32) -> Self {
        self.evict_batch_percent = percent;
        self
    }

    /// Sets `evict_max_rounds`.
    pub fn with_evict_max_rounds(mut self, rounds: u32) -> Self {
        self.evict_max_rounds = rounds;
        self
    }

    /// Sets `evict_retry_sleep_ms`.
    pub fn with_evict_retry_sleep_ms(mut self, ms: u64) -> Self {
        self.evict_retry_sleep_ms = ms;
        self
    }

    /// Sets `evict_inner_nodes`.
    pub fn with_evict_inner_nodes(mut self, enabled: bool) -> Self {
        self.evict_inner_nodes = enabled;
        self
    }

    /// Sets `verify_checksums`.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Sets `cleaner_interval_ms`.
    pub fn with_cleaner_interval_ms(mut self, ms: u64) -> Self {
        self.cleaner_interval_ms = ms;
        self
    }

    /// Sets `cleaner_batch_pages`.
    pub fn with_cleaner_batch_pages(mut self, pages: usize) -> Self {
        self.cleaner_batch_pages = pages;
        self
    }

    /// Rejects values the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.block_count == 0 {
            return Err(PoolError::Config("block_count must be positive".into()));
        }
        if self.block_count >= crate::types::SWIZZLED_PID_BIT as usize {
            return Err(PoolError::Config(
                "block_count does not fit a frame index".into(),
            ));
        }
        validate_page_size(self.page_size)?;
        if !(1..=100).contains(&self.evict_batch_percent) {
            return Err(PoolError::Config(
                "evict_batch_percent must be within 1..=100".into(),
            ));
        }
        if self.evict_max_rounds == 0 {
            return Err(PoolError::Config("evict_max_rounds must be positive".into()));
        }
        if self.cleaner_batch_pages == 0 {
            return Err(PoolError::Config(
                "cleaner_batch_pages must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text).map_err(|err| PoolError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| PoolError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serializes to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| PoolError::Config(err.to_string()))
    }
}

pub(crate) fn validate_page_size(page_size: u32) -> Result<()> {
    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(PoolError::Config(format!(
            "page_size {page_size} must be a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(())
}
