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


use std::path::PathBuf;

use structopt::StructOpt;

use crate::model::MessageFlags;
use crate::store::Store;
use crate::support::error::Error;
use crate::support::store_config::StoreConfig;
use crate::support::sysexits::*;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
pub(super) struct Options {
    /// The root directory of the store.
    #[structopt(long, parse(from_os_str), default_value = ".")]
    pub(super) root: PathBuf,

    /// The store configuration file [default: ROOT/mboxstore.toml]
    ///
    /// A missing file at the default location is fine; the defaults are used
    /// then.
    #[structopt(long, parse(from_os_str))]
    pub(super) config: Option<PathBuf>,

    #[structopt(subcommand)]
    pub(super) command: Command,
}

#[derive(StructOpt)]
pub(super) enum Command {
    /// List all folders in the store.
    List,
    /// Create a new folder.
    ///
    /// FOLDER is a `/`-separated path; everything but the last component must
    /// already exist.
    Create(FolderArg),
    /// Delete a folder along with all its subfolders and messages.
    Delete(FolderArg),
    /// Rename a folder, keeping it under the same parent.
    Rename(RenameSubcommand),
    /// Copy or move a folder and its subfolders under another parent.
    Copy(CopySubcommand),
    Append(AppendSubcommand),
    /// Write the message with the given token to standard output.
    Extract(ExtractSubcommand),
    /// List the messages in a folder.
    Scan(FolderArg),
    /// Change the flags of messages in place.
    Flags(FlagsSubcommand),
    /// Drop expunged messages from a folder.
    ///
    /// Messages whose `X-Mozilla-Status` header has the expunged bit set are
    /// removed; all others are kept with their current flags and keywords.
    Compact(CompactSubcommand),
}

#[derive(StructOpt)]
pub(super) struct FolderArg {
    /// The `/`-separated path of the folder.
    pub(super) folder: String,
}

#[derive(StructOpt)]
pub(super) struct RenameSubcommand {
    pub(super) folder: String,
    /// The new name, which must not contain `/`.
    pub(super) new_name: String,
}

#[derive(StructOpt)]
pub(super) struct CopySubcommand {
    pub(super) folder: String,
    /// The folder to copy into. An empty string means the top level.
    pub(super) dest_parent: String,
    /// Give the copy this name instead of that of the source.
    #[structopt(long)]
    pub(super) name: Option<String>,
    /// Delete the source once the copy is complete.
    #[structopt(long = "move")]
    pub(super) is_move: bool,
}

/// Append messages to a folder.
///
/// Each input is stored as one message, byte for byte, except that lines
/// which could be mistaken for an envelope line are quoted. Unless `--raw` is
/// given, status headers are added in front of the message's own headers so
/// that its flags can later be changed in place.
#[derive(StructOpt)]
pub(super) struct AppendSubcommand {
    pub(super) folder: String,

    /// The envelope sender to record.
    #[structopt(long, short, default_value = "")]
    pub(super) sender: String,

    /// Set this flag on the new message(s). Can be passed multiple times.
    #[structopt(parse(try_from_str = parse_flag), short, long,
                number_of_values(1))]
    pub(super) flag: Vec<MessageFlags>,

    /// Do not add status headers.
    #[structopt(long)]
    pub(super) raw: bool,

    /// The files to append. "-" will read from stdin.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) inputs: Vec<PathBuf>,
}

#[derive(StructOpt)]
pub(super) struct ExtractSubcommand {
    pub(super) folder: String,
    pub(super) token: String,
    /// Also print the envelope line.
    #[structopt(long)]
    pub(super) envelope: bool,
}

#[derive(StructOpt)]
pub(super) struct FlagsSubcommand {
    pub(super) folder: String,

    /// Set these flags.
    #[structopt(parse(try_from_str = parse_flag), long, number_of_values(1))]
    pub(super) set: Vec<MessageFlags>,

    /// Clear these flags.
    #[structopt(parse(try_from_str = parse_flag), long, number_of_values(1))]
    pub(super) clear: Vec<MessageFlags>,

    /// Add this keyword. Can be passed multiple times.
    #[structopt(long, number_of_values(1))]
    pub(super) add_keyword: Vec<String>,

    /// Remove this keyword. Can be passed multiple times.
    #[structopt(long, number_of_values(1))]
    pub(super) remove_keyword: Vec<String>,

    /// The tokens of the messages to change.
    #[structopt(required = true)]
    pub(super) tokens: Vec<String>,
}

#[derive(StructOpt)]
pub(super) struct CompactSubcommand {
    pub(super) folder: String,
    /// Copy messages without regenerating their status headers.
    #[structopt(long)]
    pub(super) no_patch: bool,
}

pub(super) fn parse_flag(s: &str) -> Result<MessageFlags, String> {
    Ok(match &*s.to_ascii_lowercase() {
        "read" | "seen" => MessageFlags::READ,
        "replied" | "answered" => MessageFlags::REPLIED,
        "marked" | "flagged" => MessageFlags::MARKED,
        "expunged" | "deleted" => MessageFlags::EXPUNGED,
        "watched" => MessageFlags::WATCHED,
        "forwarded" => MessageFlags::FORWARDED,
        "new" => MessageFlags::NEW,
        "ignored" => MessageFlags::IGNORED,
        "template" => MessageFlags::TEMPLATE,
        "attachment" => MessageFlags::ATTACHMENT,
        _ => return Err(format!("Unknown flag: {}", s)),
    })
}

/// Choose the exit status for a failed operation.
pub(super) fn exit_code(e: &Error) -> Sysexit {
    match *e {
        Error::NxFolder => EX_NOINPUT,
        Error::FolderExists | Error::UnsafeName => EX_CANTCREAT,
        Error::FolderBusy => EX_TEMPFAIL,
        Error::RootFolder | Error::FolderIntoItself => EX_USAGE,
        Error::MalformedMbox(..)
        | Error::MessageTooLarge(..)
        | Error::BadStoreToken => EX_DATAERR,
        Error::Io(..)
        | Error::Nix(..)
        | Error::NoSpace
        | Error::FileTooBig => EX_IOERR,
        Error::Toml(..) => EX_CONFIG,
        _ => EX_SOFTWARE,
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    init_logging(&options);

    let config_path = options
        .config
        .clone()
        .unwrap_or_else(|| options.root.join("mboxstore.toml"));
    let config = if options.config.is_none() && !config_path.is_file() {
        StoreConfig::default()
    } else {
        match StoreConfig::load(&config_path) {
            Ok(config) => config,
            Err(e) => die!(
                EX_CONFIG,
                "Error in config file at '{}': {}",
                config_path.display(),
                e
            ),
        }
    };

    let store = match Store::open(options.root.clone(), config) {
        Ok(store) => store,
        Err(e) => die!(
            exit_code(&e),
            "Failed to open store at '{}': {}",
            options.root.display(),
            e
        ),
    };

    let result = match options.command {
        Command::List => super::folder::list(&store),
        Command::Create(cmd) => super::folder::create(&store, cmd),
        Command::Delete(cmd) => super::folder::delete(&store, cmd),
        Command::Rename(cmd) => super::folder::rename(&store, cmd),
        Command::Copy(cmd) => super::folder::copy(&store, cmd),
        Command::Append(cmd) => super::message::append(&store, cmd),
        Command::Extract(cmd) => super::message::extract(&store, cmd),
        Command::Scan(cmd) => super::message::scan(&store, cmd),
        Command::Flags(cmd) => super::message::flags(&store, cmd),
        Command::Compact(cmd) => super::message::compact(&store, cmd),
    };

    if let Err(e) = result {
        die!(exit_code(&e), "{}", e);
    }
}

fn init_logging(options: &Options) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    // log4rs *or* syslog, since there is no maintained log4rs appender for
    // syslog.
    let log_config_file = options.root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };
        // Having no syslog is not a reason to refuse to work
        if let Ok(logger) = syslog::unix(formatter) {
            let _ = log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
                logger,
            )))
            .map(|_| log::set_max_level(log::LevelFilter::Info));
        }
    }
}
