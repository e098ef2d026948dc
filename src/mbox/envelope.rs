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

//! The `From ` envelope line which introduces each message.

use chrono::prelude::*;

use super::escape::FROM;

/// asctime-style layout, without a zone since mbox dates are implicitly UTC.
const ENVELOPE_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// The information carried by an envelope line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// The envelope sender. Empty if unknown.
    pub sender: String,
    /// When the message was received, if known.
    pub received: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(
        sender: impl Into<String>,
        received: Option<DateTime<Utc>>,
    ) -> Self {
        Envelope {
            sender: sender.into(),
            received,
        }
    }

    /// Build the full envelope line, including its CRLF.
    ///
    /// An empty sender becomes `-`, and whitespace within the sender is
    /// replaced by `-` so the line stays parseable. A missing date is
    /// replaced with the current time.
    pub fn to_line(&self) -> Vec<u8> {
        let sender: String = if self.sender.is_empty() {
            "-".to_owned()
        } else {
            self.sender
                .chars()
                .map(|c| match c {
                    ' ' | '\t' | '\r' | '\n' => '-',
                    c => c,
                })
                .collect()
        };
        let received = self.received.unwrap_or_else(Utc::now);

        format!(
            "From {} {}\r\n",
            sender,
            received.format(ENVELOPE_DATE_FORMAT)
        )
        .into_bytes()
    }

    /// Parse an envelope line, with or without its line ending.
    ///
    /// Returns `None` if the line does not start with `From `. An unparseable
    /// date is not an error; it just leaves `received` unset. Dates with a
    /// trailing zone or with the day padded by a space are accepted since
    /// other mbox writers produce both.
    pub fn parse(line: &[u8]) -> Option<Self> {
        if !line.starts_with(FROM) {
            return None;
        }

        let line = String::from_utf8_lossy(&line[FROM.len()..]);
        let line = line.trim_end_matches(|c| '\r' == c || '\n' == c);
        let mut parts = line.splitn(2, ' ');
        let sender = parts.next().unwrap_or("");
        let sender = if "-" == sender { "" } else { sender };
        let received = parts.next().and_then(parse_date);

        Some(Envelope::new(sender, received))
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, ENVELOPE_DATE_FORMAT) {
        return Some(DateTime::from_utc(dt, Utc));
    }

    // Some writers append a numeric zone after the year
    DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %Y %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
