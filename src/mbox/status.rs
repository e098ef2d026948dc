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

//! The in-band status headers.
//!
//! Each message may carry `X-Mozilla-Status` (4 lowercase hex digits, the low
//! half of the flags), `X-Mozilla-Status2` (8 hex digits, the high half), and
//! `X-Mozilla-Keys` (space-separated keywords, padded with spaces so that
//! keywords can later be added without moving the rest of the file).
//!
//! Because these values have a fixed width (or reserved room, for the
//! keywords), they can be rewritten in place with a single seek and write.

use memchr::memchr;

use super::escape::FROM;
use crate::model::MessageFlags;
use crate::support::error::Error;

pub const X_MOZILLA_STATUS: &str = "X-Mozilla-Status";
pub const X_MOZILLA_STATUS2: &str = "X-Mozilla-Status2";
pub const X_MOZILLA_KEYS: &str = "X-Mozilla-Keys";

/// Width of the `X-Mozilla-Status` value.
pub const STATUS_WIDTH: usize = 4;
/// Width of the `X-Mozilla-Status2` value.
pub const STATUS2_WIDTH: usize = 8;
/// Minimum room reserved for the `X-Mozilla-Keys` value.
pub const KEYWORD_RESERVE: usize = 80;

/// How many bytes from the start of a message are searched for the status
/// headers.
pub const HEADER_SCAN_LIMIT: usize = 65536;

pub fn status_value(flags: MessageFlags) -> String {
    format!("{:04x}", flags.persistent().bits() & 0xFFFF)
}

pub fn status2_value(flags: MessageFlags) -> String {
    format!("{:08x}", flags.persistent().bits() & 0xFFFF_0000)
}

/// Format a keyword list padded out to at least `KEYWORD_RESERVE` bytes.
pub fn keys_value(keywords: &[String]) -> String {
    let mut value = keywords.join(" ");
    while value.len() < KEYWORD_RESERVE {
        value.push(' ');
    }
    value
}

/// Produce the three status header lines for a message.
pub fn status_header_lines(
    flags: MessageFlags,
    keywords: &[String],
) -> Vec<u8> {
    format!(
        "{}: {}\r\n{}: {}\r\n{}: {}\r\n",
        X_MOZILLA_STATUS,
        status_value(flags),
        X_MOZILLA_STATUS2,
        status2_value(flags),
        X_MOZILLA_KEYS,
        keys_value(keywords),
    )
    .into_bytes()
}

/// The position of a header value, relative to the start of the buffer it
/// was located in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueSpan {
    pub start: usize,
    pub len: usize,
}

impl ValueSpan {
    pub fn get<'a>(&self, raw: &'a [u8]) -> &'a [u8] {
        &raw[self.start..self.start + self.len]
    }
}

/// Where the status headers of one message are.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusHeaders {
    pub status: Option<ValueSpan>,
    pub status2: Option<ValueSpan>,
    pub keys: Option<ValueSpan>,
}

/// Find the status headers in `raw`, which holds the on-disk bytes of a
/// message starting at its envelope line.
///
/// Only the first line of each header is considered. A header line cut off
/// by the end of `raw` is ignored. Fails if `raw` does not begin with an
/// envelope line.
pub fn locate_status_headers(raw: &[u8]) -> Result<StatusHeaders, Error> {
    if !raw.starts_with(FROM) {
        return Err(Error::MalformedMbox(
            "no envelope line at message offset".to_owned(),
        ));
    }

    let mut found = StatusHeaders::default();
    let mut pos = match memchr(b'\n', raw) {
        Some(ix) => ix + 1,
        None => return Ok(found),
    };

    while pos < raw.len() {
        let eol = match memchr(b'\n', &raw[pos..]) {
            Some(ix) => pos + ix,
            None => break,
        };
        let mut line = &raw[pos..eol];
        if Some(&b'\r') == line.last() {
            line = &line[..line.len() - 1];
        }

        if line.is_empty() {
            break;
        }

        if let Some(colon) = memchr(b':', line) {
            let name = &line[..colon];
            // A keys value may be entirely padding
            let mut value_start = colon + 1;
            if Some(&b' ') == line.get(value_start) {
                value_start += 1;
            }
            let is_keys = name.eq_ignore_ascii_case(X_MOZILLA_KEYS.as_bytes());
            if !is_keys {
                while value_start < line.len()
                    && (b' ' == line[value_start] || b'\t' == line[value_start])
                {
                    value_start += 1;
                }
            }
            let span = ValueSpan {
                start: pos + value_start,
                len: line.len() - value_start,
            };

            let slot = if is_keys {
                &mut found.keys
            } else if name.eq_ignore_ascii_case(X_MOZILLA_STATUS.as_bytes()) {
                &mut found.status
            } else if name.eq_ignore_ascii_case(X_MOZILLA_STATUS2.as_bytes()) {
                &mut found.status2
            } else {
                pos = eol + 1;
                continue;
            };

            if slot.is_none() {
                *slot = Some(span);
            }
        }

        pos = eol + 1;
    }

    Ok(found)
}

/// Compute the replacement for an `X-Mozilla-Keys` value occupying `room`
/// bytes.
///
/// Returns `None` if the resulting list does not fit, in which case the
/// header must be left alone until it can be regrown.
pub fn rewrite_keywords(
    existing: &[u8],
    room: usize,
    add: &[String],
    remove: &[String],
) -> Option<Vec<u8>> {
    let existing = String::from_utf8_lossy(existing);
    let mut keywords: Vec<&str> = existing.split_whitespace().collect();

    for kw in add {
        if !keywords.iter().any(|k| k == kw) {
            keywords.push(kw);
        }
    }
    keywords.retain(|k| !remove.iter().any(|r| r == k));

    let mut value = keywords.join(" ").into_bytes();
    if value.len() > room {
        return None;
    }

    value.resize(room, b' ');
    Some(value)
}

/// Rewrite a decoded header block (without envelope line, with its final
/// blank line if present) so that it starts with freshly generated status
/// headers.
///
/// Existing status header lines, including any folded continuations, are
/// dropped. All other bytes are kept as they are.
pub fn patch_status_headers(
    header_block: &[u8],
    flags: MessageFlags,
    keywords: &[String],
) -> Vec<u8> {
    let mut out = status_header_lines(flags, keywords);
    let mut dropping = false;
    let mut pos = 0;

    while pos < header_block.len() {
        let end = memchr(b'\n', &header_block[pos..])
            .map_or(header_block.len(), |ix| pos + ix + 1);
        let line = &header_block[pos..end];
        pos = end;

        let is_continuation =
            line.first().map_or(false, |&b| b' ' == b || b'\t' == b);
        if is_continuation {
            if !dropping {
                out.extend_from_slice(line);
            }
            continue;
        }

        dropping = memchr(b':', line).map_or(false, |colon| {
            let name = &line[..colon];
            name.eq_ignore_ascii_case(X_MOZILLA_STATUS.as_bytes())
                || name.eq_ignore_ascii_case(X_MOZILLA_STATUS2.as_bytes())
                || name.eq_ignore_ascii_case(X_MOZILLA_KEYS.as_bytes())
        });
        if !dropping {
            out.extend_from_slice(line);
        }
    }

    out
}
