/*
 * This file is a part of dscached, a disk-store object cache core
 * derived in the spirit of Skytable (https://github.com/skytable/skytable).
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Configuration: a YAML file (`--config <path>`) layered under environment
//! overrides prefixed `DSC_`, falling back to sane defaults when neither is
//! present.

use crate::util::error::{DscResult, Error};
use serde::Deserialize;
use std::{env, fs, path::Path};

#[cfg(test)]
mod tests;

/// Number of on-disk databases addressable by a small integer id (§3).
pub const DEFAULT_DB_COUNT: usize = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// soft memory budget polled by the cache cron (C9)
    pub cache_max_memory: u64,
    /// seconds between a SAVE op's creation and its earliest dispatch
    pub cache_flush_delay: u64,
    /// upper bound on the I/O worker pool size
    pub io_threads_max: usize,
    /// master switch for disk-store mode; when false the object cache
    /// behaves as a plain in-memory map with no scheduled I/O
    pub ds_enabled: bool,
    /// directory holding one file per resident-on-disk key
    pub data_dir: String,
    /// address the debug line protocol listens on
    pub bind_addr: String,
    /// cache cron tick interval
    pub cron_interval_ms: u64,
    /// number of logical databases
    pub db_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_max_memory: 64 * 1024 * 1024,
            cache_flush_delay: 1,
            io_threads_max: 4,
            ds_enabled: true,
            data_dir: "dscached_data".into(),
            bind_addr: "127.0.0.1:7878".into(),
            cron_interval_ms: 100,
            db_count: DEFAULT_DB_COUNT,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> DscResult<Self> {
        let mut cfg = match path {
            Some(p) => {
                let raw = fs::read_to_string(p)
                    .map_err(|e| Error::io_extra(e, format!("reading config file {p:?}")))?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| Error::Config(format!("invalid config file: {e}")))?
            }
            None => Config::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> DscResult<()> {
        macro_rules! override_num {
            ($field:ident, $env:literal) => {
                if let Ok(v) = env::var($env) {
                    self.$field = v
                        .parse()
                        .map_err(|_| Error::Config(format!("{} must be a number", $env)))?;
                }
            };
        }
        override_num!(cache_max_memory, "DSC_CACHE_MAX_MEMORY");
        override_num!(cache_flush_delay, "DSC_CACHE_FLUSH_DELAY");
        override_num!(io_threads_max, "DSC_IO_THREADS_MAX");
        override_num!(cron_interval_ms, "DSC_CRON_INTERVAL_MS");
        override_num!(db_count, "DSC_DB_COUNT");
        if let Ok(v) = env::var("DSC_DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = env::var("DSC_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = env::var("DSC_DS_ENABLED") {
            self.ds_enabled = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        Ok(())
    }

    fn validate(&self) -> DscResult<()> {
        if self.db_count == 0 {
            return Err(Error::Config("db_count must be at least 1".into()));
        }
        if self.io_threads_max == 0 {
            return Err(Error::Config("io_threads_max must be at least 1".into()));
        }
        Ok(())
    }
}
