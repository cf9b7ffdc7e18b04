use crate::error::{Error, Result};
use byte_unit::Byte;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_PAGE_SIZE: usize = 1024;
pub const MAX_PAGE_SIZE: usize = 64 * 1024;
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;
pub const DEFAULT_LEAF_RESERVE_RATIO: f64 = 0.1;
pub const DEFAULT_NONLEAF_RESERVE_RATIO: f64 = 0.1;
pub const DEFAULT_SORT_BUFFER_SIZE: Byte = Byte::from_u64(16 * 1024 * 1024);
pub const DEFAULT_ONLINE_WORKERS: usize = 4;
pub const DEFAULT_ONLINE_UNIT_SIZE: Byte = Byte::from_u64(64 * 1024);
pub const DEFAULT_ONLINE_QUEUE_DEPTH: usize = 16;
pub const DEFAULT_ONLINE_POLL_INTERVAL_US: u64 = 1000;
pub const MAX_RESERVE_RATIO: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    // Page size of index file, power of two.
    pub page_size: usize,
    // Fraction of leaf page kept free at build time, so later inserts
    // do not split every page immediately.
    pub leaf_reserve_ratio: f64,
    // Same as above, for non-leaf pages.
    pub nonleaf_reserve_ratio: f64,
    // Memory budget of the sorter. Runs are spilled once buffered
    // records exceed this size.
    pub sort_buffer_size: Byte,
    // Directory of spilled sort runs.
    pub sort_dir: PathBuf,
    // Worker threads of online build.
    pub online_workers: usize,
    // Byte budget of keys batched in one work unit.
    pub online_unit_size: Byte,
    // Bounded capacity of the work unit queue.
    pub online_queue_depth: usize,
    // Sleep interval of dispatcher waiting for workers.
    pub online_poll_interval_us: u64,
}

impl Default for LoadConfig {
    #[inline]
    fn default() -> Self {
        LoadConfig {
            page_size: DEFAULT_PAGE_SIZE,
            leaf_reserve_ratio: DEFAULT_LEAF_RESERVE_RATIO,
            nonleaf_reserve_ratio: DEFAULT_NONLEAF_RESERVE_RATIO,
            sort_buffer_size: DEFAULT_SORT_BUFFER_SIZE,
            sort_dir: std::env::temp_dir(),
            online_workers: DEFAULT_ONLINE_WORKERS,
            online_unit_size: DEFAULT_ONLINE_UNIT_SIZE,
            online_queue_depth: DEFAULT_ONLINE_QUEUE_DEPTH,
            online_poll_interval_us: DEFAULT_ONLINE_POLL_INTERVAL_US,
        }
    }
}

impl LoadConfig {
    #[inline]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[inline]
    pub fn leaf_reserve_ratio(mut self, ratio: f64) -> Self {
        self.leaf_reserve_ratio = ratio;
        self
    }

    #[inline]
    pub fn nonleaf_reserve_ratio(mut self, ratio: f64) -> Self {
        self.nonleaf_reserve_ratio = ratio;
        self
    }

    #[inline]
    pub fn sort_buffer_size(mut self, sort_buffer_size: impl Into<Byte>) -> Self {
        self.sort_buffer_size = sort_buffer_size.into();
        self
    }

    #[inline]
    pub fn sort_dir(mut self, sort_dir: impl Into<PathBuf>) -> Self {
        self.sort_dir = sort_dir.into();
        self
    }

    #[inline]
    pub fn online_workers(mut self, online_workers: usize) -> Self {
        self.online_workers = online_workers;
        self
    }

    #[inline]
    pub fn online_unit_size(mut self, online_unit_size: impl Into<Byte>) -> Self {
        self.online_unit_size = online_unit_size.into();
        self
    }

    #[inline]
    pub fn online_queue_depth(mut self, online_queue_depth: usize) -> Self {
        self.online_queue_depth = online_queue_depth;
        self
    }

    #[inline]
    pub fn online_poll_interval_us(mut self, interval: u64) -> Self {
        self.online_poll_interval_us = interval;
        self
    }

    /// Validate the configuration before any page is allocated.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(Error::InvalidConfig("page_size"));
        }
        if !(0.0..MAX_RESERVE_RATIO).contains(&self.leaf_reserve_ratio) {
            return Err(Error::InvalidConfig("leaf_reserve_ratio"));
        }
        if !(0.0..MAX_RESERVE_RATIO).contains(&self.nonleaf_reserve_ratio) {
            return Err(Error::InvalidConfig("nonleaf_reserve_ratio"));
        }
        if self.sort_buffer_size.as_u64() < self.page_size as u64 {
            return Err(Error::InvalidConfig("sort_buffer_size"));
        }
        if self.online_workers == 0 {
            return Err(Error::InvalidConfig("online_workers"));
        }
        if self.online_unit_size.as_u64() == 0 {
            return Err(Error::InvalidConfig("online_unit_size"));
        }
        if self.online_queue_depth == 0 {
            return Err(Error::InvalidConfig("online_queue_depth"));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn leaf_reserve(&self) -> usize {
        (self.page_size as f64 * self.leaf_reserve_ratio) as usize
    }

    #[inline]
    pub(crate) fn nonleaf_reserve(&self) -> usize {
        (self.page_size as f64 * self.nonleaf_reserve_ratio) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        let config = LoadConfig::default()
            .page_size(4096)
            .sort_buffer_size(1024u64 * 1024)
            .online_workers(2);
        config.validate().unwrap();
        let config_str = toml::to_string(&config).unwrap();
        println!("{}", config_str);
        let decoded: LoadConfig = toml::from_str(&config_str).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_load_config_validate() {
        assert!(LoadConfig::default().validate().is_ok());
        assert!(LoadConfig::default().page_size(3000).validate().is_err());
        assert!(LoadConfig::default().page_size(512).validate().is_err());
        assert!(LoadConfig::default()
            .leaf_reserve_ratio(0.5)
            .validate()
            .is_err());
        assert!(LoadConfig::default()
            .nonleaf_reserve_ratio(-0.1)
            .validate()
            .is_err());
        assert!(LoadConfig::default().online_workers(0).validate().is_err());
    }
}
