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


//! A local message store which keeps each folder as a single mbox file.
//!
//! See the `store` module for the on-disk layout and the operations the
//! store supports.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

macro_rules! die {
    ($ex:expr, $($stuff:tt)*) => {{
        eprintln!($($stuff)*);
        $ex.exit()
    }}
}

pub mod cli;
pub mod mbox;
pub mod mime;
pub mod model;
pub mod store;
pub mod support;

pub use crate::store::Store;
pub use crate::support::error::Error;
pub use crate::support::store_config::StoreConfig;

const LOG_PATTERN: &str = "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}";

fn stderr_log_config(
    level: log::LevelFilter,
) -> Result<log4rs::config::Config, log4rs::config::Errors> {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
}

/// Send `INFO` and higher log messages to standard error.
///
/// This is what the command-line tool does when run interactively.
pub fn init_simple_log() {
    match stderr_log_config(log::LevelFilter::Info) {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Failed to initialise logging: {}", e);
            }
        }
        Err(e) => eprintln!("Bad logging configuration: {}", e),
    }
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        let config = stderr_log_config(log::LevelFilter::Debug).unwrap();
        log4rs::init_config(config).unwrap();
    })
}
