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
use std::io::{self, Read, Write};
use std::path::Path;

use chrono::prelude::*;

use super::main::{
    AppendSubcommand, CompactSubcommand, ExtractSubcommand, FlagsSubcommand,
    FolderArg,
};
use crate::mbox::envelope::Envelope;
use crate::mbox::status::status_header_lines;
use crate::mime::parse::{parse_headers, MessageHeaders};
use crate::model::{FolderId, MessageFlags, MessageRef, StoreToken};
use crate::store::{
    CompactListener, Retention, ScanListener, ScannedMessage, Store,
};
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::threading::TaskHandle;

fn combine(flags: &[MessageFlags]) -> MessageFlags {
    flags.iter().fold(MessageFlags::empty(), |a, &f| a | f)
}

fn wait<T>(handle: TaskHandle<Result<T, Error>>) -> Result<T, Error> {
    match handle.wait() {
        Some(result) => result,
        None => die!(EX_SOFTWARE, "Background task failed"),
    }
}

pub(super) fn append(
    store: &Store,
    cmd: AppendSubcommand,
) -> Result<(), Error> {
    let folder = store.lookup(&cmd.folder)?;
    let flags = combine(&cmd.flag);
    let stdin = io::stdin();

    for input in &cmd.inputs {
        let (mut reader, size): (Box<dyn Read>, u64) =
            if Path::new("-") == input {
                (Box::new(stdin.lock()), 0)
            } else {
                let file = fs::File::open(input)?;
                let size = file.metadata()?.len();
                (Box::new(file), size)
            };

        store.has_space_available(folder, size)?;
        let token = append_one(store, folder, &cmd, flags, &mut reader)?;
        println!("{}", token);
    }

    Ok(())
}

fn append_one(
    store: &Store,
    folder: FolderId,
    cmd: &AppendSubcommand,
    flags: MessageFlags,
    data: &mut impl Read,
) -> Result<StoreToken, Error> {
    let mut msg = store.get_new_msg_output_stream(folder)?;
    msg.set_envelope(Envelope::new(cmd.sender.clone(), Some(Utc::now())))?;
    if !cmd.raw {
        msg.write_all(&status_header_lines(flags, &[]))?;
    }
    io::copy(data, &mut msg)?;
    store.finish_new_message(msg)
}

pub(super) fn extract(
    store: &Store,
    cmd: ExtractSubcommand,
) -> Result<(), Error> {
    let folder = store.lookup(&cmd.folder)?;
    let mut stream = store.get_msg_input_stream(folder, &cmd.token, None)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cmd.envelope {
        out.write_all(stream.envelope()?)?;
        out.write_all(b"\n")?;
    }
    io::copy(&mut stream, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Render the interesting flags in the style of maildir file names.
fn flag_letters(flags: MessageFlags) -> String {
    [
        (MessageFlags::EXPUNGED, 'D'),
        (MessageFlags::MARKED, 'F'),
        (MessageFlags::NEW, 'N'),
        (MessageFlags::REPLIED, 'R'),
        (MessageFlags::READ, 'S'),
    ]
    .iter()
    .filter(|&&(flag, _)| flags.contains(flag))
    .map(|&(_, letter)| letter)
    .collect()
}

struct Printer;

impl ScanListener for Printer {
    fn on_message(&mut self, message: ScannedMessage) {
        println!(
            "{}\t{}\t{}\t{}",
            message.token,
            message.size(),
            flag_letters(message.headers.flags),
            message.headers.subject.as_deref().unwrap_or(""),
        );
    }

    fn on_malformed(&mut self, offset: u64, error: &Error) {
        eprintln!("Stopped at offset {}: {}", offset, error);
    }

    fn on_oversized(&mut self, offset: u64, error: &Error) {
        eprintln!("Skipped message {}: {}", offset, error);
    }
}

pub(super) fn scan(store: &Store, cmd: FolderArg) -> Result<(), Error> {
    let folder = store.lookup(&cmd.folder)?;
    let summary = wait(store.async_scan(folder, Printer)?)?;
    eprintln!(
        "{} messages, {} oversized, {} bytes",
        summary.messages, summary.oversized, summary.end_offset
    );
    Ok(())
}

/// Read the headers of the message at `token`.
fn read_headers(
    store: &Store,
    folder: FolderId,
    token: &str,
) -> Result<MessageHeaders, Error> {
    let mut stream = store.get_msg_input_stream(folder, token, None)?;
    let mut content = Vec::new();
    stream.read_to_end(&mut content)?;
    Ok(parse_headers(&content))
}

pub(super) fn flags(store: &Store, cmd: FlagsSubcommand) -> Result<(), Error> {
    let folder = store.lookup(&cmd.folder)?;
    let set = combine(&cmd.set);
    let clear = combine(&cmd.clear);

    let mut refs = Vec::with_capacity(cmd.tokens.len());
    for token in &cmd.tokens {
        refs.push(MessageRef {
            token: token.parse()?,
            flags: read_headers(store, folder, token)?.flags,
        });
    }

    if !set.is_empty() {
        store.change_flags(folder, &refs, set, true)?;
        for r in &mut refs {
            r.flags = r.flags.changed(set, true);
        }
    }
    if !clear.is_empty() {
        store.change_flags(folder, &refs, clear, false)?;
    }

    let tokens: Vec<StoreToken> = refs.iter().map(|r| r.token).collect();
    let mut no_room = Vec::new();
    if !cmd.add_keyword.is_empty() {
        no_room.extend(store.change_keywords(
            folder,
            &tokens,
            &cmd.add_keyword.join(" "),
            true,
        )?);
    }
    if !cmd.remove_keyword.is_empty() {
        store.change_keywords(
            folder,
            &tokens,
            &cmd.remove_keyword.join(" "),
            false,
        )?;
    }

    no_room.sort();
    no_room.dedup();
    for token in no_room {
        eprintln!("{}: no room left for keywords", token);
    }

    Ok(())
}

/// Keeps every message not marked as expunged, as it is.
struct DropExpunged;

impl CompactListener for DropExpunged {
    fn on_message(
        &mut self,
        _: StoreToken,
        headers: &MessageHeaders,
    ) -> Retention {
        if headers.flags.contains(MessageFlags::EXPUNGED) {
            Retention::Discard
        } else {
            Retention::Keep {
                flags: headers.flags,
                keywords: headers.keywords.clone(),
            }
        }
    }
}

pub(super) fn compact(
    store: &Store,
    cmd: CompactSubcommand,
) -> Result<(), Error> {
    let folder = store.lookup(&cmd.folder)?;
    let patch = if cmd.no_patch { Some(false) } else { None };
    let summary = wait(store.async_compact(folder, DropExpunged, patch)?)?;
    println!(
        "kept {}, discarded {}; {} -> {} bytes",
        summary.kept, summary.discarded, summary.old_size, summary.new_size
    );
    Ok(())
}
