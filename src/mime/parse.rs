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

//! Extraction of the metadata the index keeps for each message.
//!
//! This is deliberately shallow: header values are unfolded and decoded as
//! UTF-8 (lossily), but no MIME decoding or address parsing happens here.

use chrono::prelude::*;
use memchr::memchr;
use tiny_keccak::{Hasher, Sha3};

use super::header::parse_datetime;
use crate::mbox::status::{X_MOZILLA_KEYS, X_MOZILLA_STATUS, X_MOZILLA_STATUS2};
use crate::model::MessageFlags;

/// Message priority, from `X-Priority:` or `Priority:`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    NotSet,
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NotSet
    }
}

impl Priority {
    /// Interpret a priority header value.
    ///
    /// Both the numeric form (`1` is highest, `5` lowest) and the names are
    /// understood, as are values that combine them like `2 (High)`.
    pub fn parse(value: &str) -> Self {
        let value = value.to_ascii_lowercase();
        if value.contains('1') || value.contains("highest") {
            Priority::Highest
        } else if value.contains('2') || value.contains("high") {
            Priority::High
        } else if value.contains('5') || value.contains("lowest") {
            Priority::Lowest
        } else if value.contains('4') || value.contains("low") {
            Priority::Low
        } else if value.contains('3') || value.contains("normal") {
            Priority::Normal
        } else {
            Priority::NotSet
        }
    }
}

/// The metadata extracted from a message's header block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageHeaders {
    pub sender: Option<String>,
    /// The primary recipients: `To`, else `Cc`, else the first newsgroup.
    pub recipients: Option<String>,
    pub cc_list: Option<String>,
    pub bcc_list: Option<String>,
    /// The subject with any leading `Re:` removed; see `HAS_RE`.
    pub subject: Option<String>,
    /// The message ID without angle brackets.
    ///
    /// Messages lacking one get an ID derived from a hash of their headers.
    pub message_id: String,
    pub references: Option<String>,
    pub reply_to: Option<String>,
    /// `Date:`, falling back to the `Received:` date.
    pub date: Option<DateTime<FixedOffset>>,
    /// The date from the first `Received:` header.
    pub received_date: Option<DateTime<FixedOffset>>,
    pub priority: Priority,
    pub charset: Option<String>,
    pub account_key: Option<String>,
    pub keywords: Vec<String>,
    pub flags: MessageFlags,
}

/// Split a header block into unfolded `(name, value)` pairs.
///
/// Parsing stops at the first blank line. Lines without a colon are
/// ignored.
pub fn split_headers(block: &[u8]) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut pos = 0;

    while pos < block.len() {
        let end = memchr(b'\n', &block[pos..])
            .map_or(block.len(), |ix| pos + ix + 1);
        let mut line = &block[pos..end];
        pos = end;

        while let Some(&b'\r') | Some(&b'\n') = line.last() {
            line = &line[..line.len() - 1];
        }

        if line.is_empty() {
            break;
        }

        if b' ' == line[0] || b'\t' == line[0] {
            if let Some(last) = headers.last_mut() {
                last.1.push(' ');
                last.1.push_str(String::from_utf8_lossy(line).trim());
            }
            continue;
        }

        if let Some(colon) = memchr(b':', line) {
            let name = String::from_utf8_lossy(&line[..colon]);
            let value = String::from_utf8_lossy(&line[colon + 1..]);
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }

    headers
}

/// Parse the header block of a message.
///
/// `block` is the raw header block (it may include the body; only the part
/// before the first blank line is looked at).
pub fn parse_headers(block: &[u8]) -> MessageHeaders {
    let headers = split_headers(block);
    let first = |name: &str| first_header(&headers, name);
    let all = |name: &str| all_headers(&headers, name);

    let mut parsed = MessageHeaders::default();

    parsed.sender =
        first("From").or_else(|| first("Sender")).map(str::to_owned);
    parsed.cc_list = all("Cc");
    parsed.bcc_list = all("Bcc");
    let first_newsgroup = first("Newsgroups")
        .and_then(|groups| groups.split(',').next())
        .map(|group| group.trim().to_owned());
    parsed.recipients = all("To")
        .or_else(|| parsed.cc_list.clone())
        .or(first_newsgroup);
    parsed.reply_to = first("Reply-To").map(str::to_owned);
    parsed.references = first("References")
        .or_else(|| first("In-Reply-To"))
        .map(str::to_owned);
    parsed.account_key = first("X-Account-Key").map(str::to_owned);

    if let Some(subject) = first("Subject") {
        let (stripped, had_re) = strip_re(subject);
        if had_re {
            parsed.flags |= MessageFlags::HAS_RE;
        }
        parsed.subject = Some(stripped.to_owned());
    }

    parsed.message_id = match first("Message-ID") {
        Some(id) if !id.trim_matches(|c| '<' == c || '>' == c).is_empty() => {
            id.trim_matches(|c| '<' == c || '>' == c || ' ' == c)
                .to_owned()
        }
        _ => synthesize_message_id(&headers),
    };

    parsed.received_date = first("Received")
        .and_then(|received| received.rsplit(';').next())
        .and_then(|date| parse_datetime(date.as_bytes()));
    parsed.date = first("Date")
        .and_then(|date| parse_datetime(date.as_bytes()))
        .or(parsed.received_date);

    parsed.priority = first("X-Priority")
        .or_else(|| first("Priority"))
        .map_or(Priority::NotSet, Priority::parse);

    if let Some(content_type) = first("Content-Type") {
        parsed.charset = content_type_param(content_type, "charset");
        if content_type
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("multipart/mixed")
        {
            parsed.flags |= MessageFlags::ATTACHMENT;
        }
    }

    if let Some(keys) = first(X_MOZILLA_KEYS) {
        parsed.keywords =
            keys.split_whitespace().map(str::to_owned).collect();
    }

    parsed.flags |= status_flags(first(X_MOZILLA_STATUS), first("Status"));
    if let Some(status2) = first(X_MOZILLA_STATUS2)
        .and_then(|v| u32::from_str_radix(v.trim(), 16).ok())
    {
        parsed.flags |= MessageFlags::from_bits_truncate(status2 & 0xFFFF_0000);
    }

    parsed
}

fn first_header<'a>(
    headers: &'a [(String, String)],
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| &v[..])
}

/// All values of the named header, joined with commas.
fn all_headers(headers: &[(String, String)], name: &str) -> Option<String> {
    let values = headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| &v[..])
        .collect::<Vec<_>>();
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

/// Derive the low flag bits from `X-Mozilla-Status`, or from the Berkeley
/// `Status:` header if the former is absent or unparseable.
fn status_flags(
    mozilla_status: Option<&str>,
    status: Option<&str>,
) -> MessageFlags {
    if let Some(bits) =
        mozilla_status.and_then(|v| u32::from_str_radix(v.trim(), 16).ok())
    {
        return MessageFlags::from_bits_truncate(bits & 0xFFFF)
            - MessageFlags::RUNTIME_ONLY;
    }

    let mut flags = MessageFlags::empty();
    for ch in status.unwrap_or("").chars() {
        match ch {
            'R' | 'r' | 'O' => flags |= MessageFlags::READ,
            'N' | 'n' | 'U' | 'u' => flags -= MessageFlags::READ,
            // 'D' is deletion in some clients; informational only
            _ => (),
        }
    }
    flags
}

fn strip_re(subject: &str) -> (&str, bool) {
    let mut subject = subject.trim_start();
    let mut had_re = false;
    while subject
        .as_bytes()
        .get(..3)
        .map_or(false, |p| p.eq_ignore_ascii_case(b"re:"))
    {
        // The prefix is ASCII, so byte 3 is a char boundary
        subject = subject[3..].trim_start();
        had_re = true;
    }
    (subject, had_re)
}

fn content_type_param(content_type: &str, param: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let mut kv = part.splitn(2, '=');
        let key = kv.next()?.trim();
        let value = kv.next()?.trim();
        if key.eq_ignore_ascii_case(param) {
            Some(value.trim_matches('"').to_owned())
        } else {
            None
        }
    })
}

fn synthesize_message_id(headers: &[(String, String)]) -> String {
    let mut hasher = Sha3::v256();
    for (name, value) in headers {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);

    let mut id = "sha3:".to_owned();
    for b in &hash[..16] {
        id.push_str(&format!("{:02x}", b));
    }
    id
}
