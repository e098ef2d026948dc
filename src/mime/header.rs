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

//! RFC 2822 date/time syntax, as found in `Date:` and `Received:` headers.

use std::str;

use chrono::prelude::*;
use nom::*;

fn ascii_digit(b: u8) -> bool {
    b >= b'0' && b <= b'9'
}

// RFC 2822 3.2.2 "quoted-pair", including the 8-bit clean "obsolete" syntax
named!(quoted_pair, preceded!(char!('\\'), take!(1)));

// RFC 2822 3.2.3 "Folding white space".
// Header values reach us already unfolded, but line endings are still
// treated as simple whitespace.
named!(fws, map!(is_a!(" \t\r\n"), |_| &b" "[..]));
// RFC 2822 3.2.3 "Comment text".
named!(ctext, is_not!("()\\ \t\r\n"));
// RFC 2822 3.2.3 "Comment content".
named!(
    ccontent<()>,
    alt!(
        map!(ctext, |_| ())
            | map!(quoted_pair, |_| ())
            | map!(fws, |_| ())
            | comment
    )
);
// RFC 2822 3.2.3 "Comment". Note it is recursive.
named!(
    comment<()>,
    delimited!(char!('('), map!(many0_count!(ccontent), |_| ()), char!(')'))
);
// RFC 2822 3.2.3 "Comment or folding white space".
named!(
    cfws<()>,
    map!(many0_count!(alt!(map!(fws, |_| ()) | comment)), |_| ())
);

// RFC 2822 3.2.4 "Atom text", amended by RFC 6532 to include all non-ASCII
// characters.
named!(
    atext,
    take_while1!(|ch| {
        (ch >= b'A' && ch <= b'Z') ||
            (ch >= b'a' && ch <= b'z') ||
            (ch >= b'0' && ch <= b'9') ||
            ch == b'!' ||
            (ch >= b'#' && ch <= b'\'') || // #$%&'
            ch == b'*' ||
            ch == b'+' ||
            ch == b'-' ||
            ch == b'/' ||
            ch == b'=' ||
            ch == b'?' ||
            ch == b'^' ||
            ch == b'_' ||
            ch == b'`' ||
            (ch >= b'{' && ch <= b'~') || // {|}~
            ch >= 0x80
    })
);

// RFC 2822 3.2.4 "Atom"
named!(atom, delimited!(opt!(cfws), atext, opt!(cfws)));

// RFC 2822 3.3 date/time syntax, including obsolete forms.
// The obsolete forms allow CFWS between all terms, so that is permitted
// throughout instead of following the RFC's arbitrary distribution.
named!(
    year<u32>,
    map!(take_while_m_n!(2, 4, ascii_digit), |s| {
        // Infallible since we know s is [0-9]{2,4}
        let mut y: u32 = str::from_utf8(s).unwrap().parse().unwrap();
        // Y2K compliance workarounds described by RFC 2822 4.3
        if s.len() == 2 && y < 50 {
            y += 2000;
        } else if s.len() < 4 {
            y += 1900;
        }
        y
    })
);

named!(
    month<u32>,
    alt!(
        map!(tag_no_case!("jan"), |_| 1)
            | map!(tag_no_case!("feb"), |_| 2)
            | map!(tag_no_case!("mar"), |_| 3)
            | map!(tag_no_case!("apr"), |_| 4)
            | map!(tag_no_case!("may"), |_| 5)
            | map!(tag_no_case!("jun"), |_| 6)
            | map!(tag_no_case!("jul"), |_| 7)
            | map!(tag_no_case!("aug"), |_| 8)
            | map!(tag_no_case!("sep"), |_| 9)
            | map!(tag_no_case!("oct"), |_| 10)
            | map!(tag_no_case!("nov"), |_| 11)
            | map!(tag_no_case!("dec"), |_| 12)
    )
);

named!(
    day<u32>,
    map!(
        take_while_m_n!(1, 2, ascii_digit),
        // Infallible since we know the exact format
        |s| str::from_utf8(s).unwrap().parse::<u32>().unwrap()
    )
);

named!(
    date<(u32, u32, u32)>,
    map!(
        tuple!(
            terminated!(day, opt!(cfws)),
            terminated!(month, opt!(cfws)),
            terminated!(year, opt!(cfws))
        ),
        |(d, m, y)| (y, m, d)
    )
);

named!(
    two_digit<u32>,
    map!(
        take_while_m_n!(2, 2, ascii_digit),
        // Infallible since we know the exact format
        |s| str::from_utf8(s).unwrap().parse::<u32>().unwrap()
    )
);

// Seconds are optional per RFC 2822 3.3
named!(
    time_of_day<(u32, u32, u32)>,
    map!(
        tuple!(
            terminated!(two_digit, tuple!(opt!(cfws), char!(':'), opt!(cfws))),
            two_digit,
            opt!(preceded!(
                tuple!(opt!(cfws), char!(':'), opt!(cfws)),
                two_digit
            )),
            opt!(cfws)
        ),
        |(h, m, s, _)| (h, m, s.unwrap_or(0))
    )
);

/// Convert an `[+-]hhmm` zone into seconds east of UTC.
fn hhmm_to_seconds(hhmm: i32) -> i32 {
    let sign = if hhmm < 0 { -1 } else { 1 };
    let hhmm = hhmm.abs();
    sign * ((hhmm / 100) * 3600 + (hhmm % 100) * 60)
}

named!(
    numeric_zone<i32>,
    map!(
        pair!(
            alt!(char!('+') | char!('-')),
            take_while_m_n!(4, 4, ascii_digit)
        ),
        |(sign, s)| {
            // Infallible since we know the exact format
            let mut n = str::from_utf8(s).unwrap().parse::<i32>().unwrap();
            if '-' == sign {
                n = -n;
            }
            n
        }
    )
);

// Zones are in hhmm form here and converted to seconds by `date_time`.
named!(
    zone<i32>,
    alt!(
        numeric_zone |
        // UTC
        map!(alt!(tag_no_case!("ut") | tag_no_case!("gmt")), |_| 0) |
        // US time zones
        map!(tag_no_case!("edt"), |_| -400) |
        map!(alt!(tag_no_case!("est") | tag_no_case!("cdt")), |_| -500) |
        map!(alt!(tag_no_case!("cst") | tag_no_case!("mdt")), |_| -600) |
        map!(alt!(tag_no_case!("mst") | tag_no_case!("pdt")), |_| -700) |
        map!(tag_no_case!("pst"), |_| -800) |
        // RFC 2822 says military and unknown zones must be treated as 0
        map!(atext, |_| 0)
    )
);

// A missing zone is treated like an unknown one.
named!(
    time<((u32, u32, u32), i32)>,
    map!(
        terminated!(pair!(time_of_day, opt!(zone)), opt!(cfws)),
        |(tod, zone)| (tod, zone.unwrap_or(0))
    )
);

named!(
    date_time<Option<DateTime<FixedOffset>>>,
    map!(
        // We don't care what day of week it was, or whether it was given
        preceded!(
            tuple!(opt!(cfws), opt!(terminated!(atom, char!(','))), opt!(cfws)),
            tuple!(date, time)
        ),
        |((year, month, day), ((hour, minute, second), zone))| {
            FixedOffset::east_opt(hhmm_to_seconds(zone))
                .and_then(|off| off.ymd_opt(year as i32, month, day).latest())
                .and_then(|date| date.and_hms_opt(hour, minute, second))
        }
    )
);

/// Parse an RFC 2822 date-time, such as the value of a `Date:` header.
///
/// Returns `None` if the value cannot be understood.
pub fn parse_datetime(value: &[u8]) -> Option<DateTime<FixedOffset>> {
    // The parsers are streaming and report Incomplete when a term runs into
    // the end of input, so give them something to stop on.
    let mut terminated = Vec::with_capacity(value.len() + 1);
    terminated.extend_from_slice(value);
    terminated.push(0);

    date_time(&terminated).ok().and_then(|(_, dt)| dt)
}
