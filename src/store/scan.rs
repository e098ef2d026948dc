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

//! Walking every message of a folder, for rebuilding the index.

use std::fs;
use std::io::Read;

use log::{info, warn};

use super::{open_existing, Store};
use crate::mbox::envelope::Envelope;
use crate::mbox::input::MboxMsgInputStream;
use crate::mime::parse::{parse_headers, MessageHeaders};
use crate::model::{FolderId, StoreToken};
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::threading::{CancelToken, TaskHandle};

/// One message found by a scan.
#[derive(Clone, Debug)]
pub struct ScannedMessage {
    pub token: StoreToken,
    /// The envelope line, without line ending.
    pub envelope_line: Vec<u8>,
    /// The sender and received date from the envelope line.
    pub envelope: Envelope,
    pub headers: MessageHeaders,
    /// The decoded content of the message.
    pub content: Vec<u8>,
    /// The number of bytes the message occupies in the mbox, including its
    /// envelope line and separator.
    pub raw_len: u64,
}

impl ScannedMessage {
    /// The decoded size of the message.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub messages: usize,
    /// Messages passed over for exceeding the size limit.
    pub oversized: usize,
    /// The offset at which the scan stopped. This is the file size unless a
    /// malformed message cut the scan short.
    pub end_offset: u64,
}

/// Receives the results of a scan.
///
/// All calls happen on the background thread running the scan.
pub trait ScanListener: Send {
    fn on_message(&mut self, message: ScannedMessage);

    /// Called if the scan stops early because the message at `offset` is
    /// not valid. The scan still completes successfully afterwards.
    fn on_malformed(&mut self, offset: u64, error: &Error) {
        let _ = (offset, error);
    }

    /// Called for a message at `offset` which exceeds the maximum message
    /// size. The scan carries on with the next message.
    fn on_oversized(&mut self, offset: u64, error: &Error) {
        let _ = (offset, error);
    }

    fn on_complete(&mut self, result: &Result<ScanSummary, Error>) {
        let _ = result;
    }
}

impl Store {
    /// Scan every message of `folder` in the background.
    ///
    /// The mbox is opened before this call returns, so a missing folder is
    /// reported directly. The scan checks for cancellation between messages.
    pub fn async_scan<L: ScanListener + 'static>(
        &self,
        folder: FolderId,
        mut listener: L,
    ) -> Result<TaskHandle<Result<ScanSummary, Error>>, Error> {
        let file = open_existing(&self.mbox_path(folder)?)?;
        let max_size = self.config.max_message_size;
        let log_prefix = self.folder_log_prefix("scan", folder);

        Ok(self.tasks.submit(move |cancel| {
            let result =
                scan_file(file, &mut listener, cancel, max_size, &log_prefix);
            listener.on_complete(&result);
            result
        }))
    }
}

/// Run a scan over `file` on the current thread.
pub fn scan_file(
    file: fs::File,
    listener: &mut dyn ScanListener,
    cancel: &CancelToken,
    max_size: Option<u64>,
    log_prefix: &LogPrefix,
) -> Result<ScanSummary, Error> {
    let file_len = file.metadata()?.len();
    let mut summary = ScanSummary::default();
    if 0 == file_len {
        info!("{} Empty folder", log_prefix);
        return Ok(summary);
    }

    let mut stream = MboxMsgInputStream::new(file, 0, max_size)?;
    loop {
        if cancel.is_cancelled() {
            info!(
                "{} Cancelled after {} messages",
                log_prefix, summary.messages
            );
            return Err(Error::Cancelled);
        }

        let offset = stream.message_offset();
        let message = match read_one(&mut stream) {
            Ok(m) => m,
            Err(e @ Error::MalformedMbox(_)) => {
                warn!("{} Stopping at offset {}: {}", log_prefix, offset, e);
                listener.on_malformed(offset, &e);
                summary.end_offset = offset;
                return Ok(summary);
            }
            Err(e @ Error::MessageTooLarge(_)) => {
                warn!("{} Skipping message {}: {}", log_prefix, offset, e);
                listener.on_oversized(offset, &e);
                summary.oversized += 1;

                if !stream.continue_next()? {
                    summary.end_offset =
                        stream.message_end_offset().unwrap_or(file_len);
                    break;
                }
                summary.end_offset = stream.message_offset();
                continue;
            }
            Err(e) => return Err(e),
        };

        summary.messages += 1;
        summary.end_offset = offset + message.raw_len;
        listener.on_message(message);

        if !stream.continue_next()? {
            break;
        }
    }

    info!(
        "{} Found {} messages ({} oversized)",
        log_prefix, summary.messages, summary.oversized
    );
    Ok(summary)
}

fn read_one(
    stream: &mut MboxMsgInputStream<fs::File>,
) -> Result<ScannedMessage, Error> {
    let token = StoreToken(stream.message_offset());
    let envelope_line = stream.envelope()?.to_vec();
    let mut content = Vec::new();
    stream.read_to_end(&mut content)?;
    let end = stream.message_end_offset().unwrap_or(token.offset());

    Ok(ScannedMessage {
        token,
        envelope: Envelope::parse(&envelope_line).unwrap_or_default(),
        envelope_line,
        headers: parse_headers(&content),
        content,
        raw_len: end - token.offset(),
    })
}
