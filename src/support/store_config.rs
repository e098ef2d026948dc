//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mboxstore.
//
// Mboxstore is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mboxstore is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mboxstore. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Configuration for a message store.
///
/// This is stored in a file named `mboxstore.toml`, by default directly under
/// the store root. Every field is optional.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How far apart, in seconds, the modification time recorded in a folder
    /// summary and the actual modification time of the mbox file may be while
    /// still considering the summary valid.
    ///
    /// This absorbs coarse file system timestamps. A value of 0 requires an
    /// exact match.
    pub timestamp_leeway_secs: u32,

    /// If false, refuse to let any mbox file grow beyond 4GiB minus 4MiB.
    ///
    /// This only matters for interoperating with tools that still use 32-bit
    /// file offsets.
    pub allow_mbox_over_4gb: bool,

    /// If set, reading a single message which decodes to more than this many
    /// bytes fails instead of continuing.
    pub max_message_size: Option<u64>,

    /// Whether compaction rewrites the `X-Mozilla-Status`, `-Status2`, and
    /// `-Keys` headers of surviving messages by default.
    pub patch_headers_on_compact: bool,

    /// The number of background tasks (scans and compactions) that may be
    /// queued before new submissions are run synchronously instead.
    pub background_queue_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            timestamp_leeway_secs: 60,
            allow_mbox_over_4gb: true,
            max_message_size: None,
            patch_headers_on_compact: true,
            background_queue_limit: 256,
        }
    }
}

impl StoreConfig {
    /// Load the configuration from the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: StoreConfig = toml::from_str(
            "timestamp_leeway_secs = 0\n\
             max_message_size = 1048576\n",
        )
        .unwrap();
        assert_eq!(0, config.timestamp_leeway_secs);
        assert_eq!(Some(1048576), config.max_message_size);
        assert!(config.allow_mbox_over_4gb);
        assert!(config.patch_headers_on_compact);
        assert_eq!(256, config.background_queue_limit);
    }

    #[test]
    fn empty_config_is_default() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(60, config.timestamp_leeway_secs);
        assert_eq!(None, config.max_message_size);
    }
}
