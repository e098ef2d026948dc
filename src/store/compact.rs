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

//! Rewriting a folder without its deleted messages.
//!
//! Compaction copies the messages the index wants to keep into a temporary
//! file beside the mbox, then renames it over the original. The original is
//! never modified, so a compaction that fails or is cancelled at any point
//! before the rename leaves the folder exactly as it was.
//!
//! Because every message after the first discarded one moves, the index is
//! given the full map of old tokens to new ones before the rename happens,
//! and may veto the commit if it cannot apply it.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::{info, warn};

use super::{open_existing, Store};
use crate::mbox::input::MboxMsgInputStream;
use crate::mbox::output::MboxMsgOutputStream;
use crate::mbox::status::{patch_status_headers, HEADER_SCAN_LIMIT};
use crate::mime::parse::{parse_headers, MessageHeaders};
use crate::model::{FolderId, MessageFlags, StoreToken};
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::threading::{CancelToken, TaskHandle};

/// What to do with a message during compaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Retention {
    /// Copy the message. If headers are being patched, its status headers
    /// are regenerated from `flags` and `keywords`.
    Keep {
        flags: MessageFlags,
        keywords: Vec<String>,
    },
    Discard,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactSummary {
    pub kept: usize,
    pub discarded: usize,
    pub old_size: u64,
    pub new_size: u64,
    /// `(old, new)` token of every kept message, in file order.
    pub remaps: Vec<(StoreToken, StoreToken)>,
}

/// The index's side of a compaction.
///
/// All calls happen on the background thread running the compaction.
pub trait CompactListener: Send {
    fn on_message(
        &mut self,
        token: StoreToken,
        headers: &MessageHeaders,
    ) -> Retention;

    /// Called once all kept messages have been copied, just before the new
    /// file replaces the old one. Returning false aborts the compaction with
    /// `Error::Vetoed`.
    fn before_commit(&mut self, remaps: &[(StoreToken, StoreToken)]) -> bool {
        let _ = remaps;
        true
    }

    fn on_complete(&mut self, result: &Result<CompactSummary, Error>) {
        let _ = result;
    }
}

impl Store {
    /// Compact `folder` in the background.
    ///
    /// The folder is claimed immediately: this fails with `FolderBusy` if a
    /// message is being written to it, and until the compaction completes no
    /// new message can be started in it.
    ///
    /// `patch_headers` overrides the configured default for whether status
    /// headers are regenerated.
    pub fn async_compact<L: CompactListener + 'static>(
        &self,
        folder: FolderId,
        mut listener: L,
        patch_headers: Option<bool>,
    ) -> Result<TaskHandle<Result<CompactSummary, Error>>, Error> {
        let path = self.mbox_path(folder)?;
        let guard = self.outstanding.claim_compaction(folder)?;
        // Fail fast on a missing folder
        drop(open_existing(&path)?);

        let patch_headers =
            patch_headers.unwrap_or(self.config.patch_headers_on_compact);
        let log_prefix = self.folder_log_prefix("compact", folder);

        Ok(self.tasks.submit(move |cancel| {
            let result = compact_file(
                &path,
                &mut listener,
                cancel,
                patch_headers,
                &log_prefix,
            );
            drop(guard);
            listener.on_complete(&result);
            result
        }))
    }
}

/// Compact the mbox at `path` on the current thread.
///
/// The caller is responsible for ensuring nothing else writes the file
/// meanwhile.
pub fn compact_file(
    path: &Path,
    listener: &mut dyn CompactListener,
    cancel: &CancelToken,
    patch_headers: bool,
    log_prefix: &LogPrefix,
) -> Result<CompactSummary, Error> {
    let src = fs::File::open(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".compact-")
        .tempfile_in(dir)?;

    let mut summary = CompactSummary {
        old_size: src.metadata()?.len(),
        ..CompactSummary::default()
    };

    if summary.old_size > 0 {
        let mut input = MboxMsgInputStream::new(src, 0, None)?;
        loop {
            if cancel.is_cancelled() {
                info!("{} Cancelled; folder left unchanged", log_prefix);
                return Err(Error::Cancelled);
            }

            let token = StoreToken(input.message_offset());
            let envelope = input.envelope()?.to_vec();
            let mut reader = BufReader::new(&mut input);
            let header_block = read_header_block(&mut reader)?;
            let headers = parse_headers(&header_block);

            match listener.on_message(token, &headers) {
                Retention::Discard => {
                    io::copy(&mut reader, &mut io::sink())?;
                    summary.discarded += 1;
                }

                Retention::Keep { flags, keywords } => {
                    let mut out = MboxMsgOutputStream::new(tmp.as_file_mut())?;
                    out.set_envelope_line(&envelope)?;
                    let new_token = StoreToken(out.start_pos());

                    if patch_headers {
                        out.write_data(&patch_status_headers(
                            &header_block,
                            flags,
                            &keywords,
                        ))?;
                    } else {
                        out.write_data(&header_block)?;
                    }
                    io::copy(&mut reader, &mut out)?;
                    out.finish()?;

                    summary.kept += 1;
                    summary.remaps.push((token, new_token));
                }
            }

            drop(reader);
            if !input.continue_next()? {
                break;
            }
        }
    }

    tmp.as_file().sync_all()?;
    summary.new_size = tmp.as_file().metadata()?.len();

    if cancel.is_cancelled() {
        info!("{} Cancelled; folder left unchanged", log_prefix);
        return Err(Error::Cancelled);
    }

    if !listener.before_commit(&summary.remaps) {
        warn!("{} Index vetoed the compaction", log_prefix);
        return Err(Error::Vetoed);
    }

    tmp.persist(path).map_err(|e| e.error)?;
    info!(
        "{} Kept {} and discarded {} messages; {} -> {} bytes",
        log_prefix,
        summary.kept,
        summary.discarded,
        summary.old_size,
        summary.new_size
    );
    Ok(summary)
}

/// Read the header block of a message, including the blank line ending it.
///
/// A header block longer than `HEADER_SCAN_LIMIT` is cut off at a line
/// boundary past the limit; the rest is then treated as body.
fn read_header_block(reader: &mut impl BufRead) -> Result<Vec<u8>, Error> {
    let mut block = Vec::new();
    while block.len() < HEADER_SCAN_LIMIT {
        let start = block.len();
        if 0 == reader.read_until(b'\n', &mut block)? {
            break;
        }

        let line = &block[start..];
        if b"\n" == line || b"\r\n" == line {
            break;
        }
    }
    Ok(block)
}
