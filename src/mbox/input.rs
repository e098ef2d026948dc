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

//! Reading a single message out of an mbox file by offset.
//!
//! The stream must be positioned on an envelope line. It strips that line,
//! then yields the message with one `>` removed from every `^>+From ` line,
//! until it reaches either the end of the file or a line starting with a
//! bare `From `, which is taken to be the next envelope. A single blank line
//! right before that point is the separator and is not yielded.
//!
//! Once a message is exhausted, `continue_next()` re-arms the stream at the
//! following message, reusing whatever it already buffered from the source.

use std::cmp;
use std::io::{self, Read, Seek, SeekFrom};

use memchr::memchr;

use super::escape::{LineStartMatcher, Verdict, FROM};
use crate::support::error::Error;

const READ_BUFFER_SIZE: usize = 8192;
/// Envelope lines longer than this are truncated when captured.
const MAX_ENVELOPE_LEN: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Matching the literal `From ` at the message offset.
    Envelope(usize),
    /// Skipping the remainder of the envelope line.
    EnvelopeRest,
    Body,
    Done,
}

pub struct MboxMsgInputStream<R> {
    source: R,
    buf: Vec<u8>,
    buf_pos: usize,
    /// Absolute offset of `buf[0]`.
    buf_offset: u64,
    eof: bool,

    phase: Phase,
    message_offset: u64,
    end_offset: Option<u64>,
    next_offset: Option<u64>,
    envelope: Vec<u8>,

    at_line_start: bool,
    line_start_offset: u64,
    matcher: LineStartMatcher,
    /// A `\r` seen at the very start of a line, which may begin a blank line.
    pending_cr: bool,
    /// The most recent blank line, withheld in case it is the separator.
    pending_blank: Option<&'static [u8]>,

    decoded: Vec<u8>,
    decoded_pos: usize,
    yielded: u64,
    max_size: Option<u64>,
    latched: Option<Error>,
}

impl<R: Read + Seek> MboxMsgInputStream<R> {
    /// Position `source` at `offset` and prepare to read the message there.
    ///
    /// An offset past the end of the source is not an error here; the first
    /// read reports the mailbox as malformed instead.
    ///
    /// If `max_size` is given, reading more than that many decoded bytes
    /// fails with `Error::MessageTooLarge`.
    pub fn new(
        mut source: R,
        offset: u64,
        max_size: Option<u64>,
    ) -> Result<Self, Error> {
        source.seek(SeekFrom::Start(offset))?;
        Ok(MboxMsgInputStream {
            source,
            buf: Vec::with_capacity(READ_BUFFER_SIZE),
            buf_pos: 0,
            buf_offset: offset,
            eof: false,
            phase: Phase::Envelope(0),
            message_offset: offset,
            end_offset: None,
            next_offset: None,
            envelope: Vec::new(),
            at_line_start: true,
            line_start_offset: offset,
            matcher: LineStartMatcher::new(),
            pending_cr: false,
            pending_blank: None,
            decoded: Vec::new(),
            decoded_pos: 0,
            yielded: 0,
            max_size,
            latched: None,
        })
    }
}

impl<R: Read> MboxMsgInputStream<R> {
    /// The offset of the envelope line of the current message.
    pub fn message_offset(&self) -> u64 {
        self.message_offset
    }

    /// The offset just past the current message, once it has been fully
    /// read.
    ///
    /// This includes the separator line.
    pub fn message_end_offset(&self) -> Option<u64> {
        self.end_offset
    }

    /// Return the envelope line of the current message, without its line
    /// ending, reading it first if necessary.
    pub fn envelope(&mut self) -> Result<&[u8], Error> {
        while let Phase::Envelope(_) | Phase::EnvelopeRest = self.phase {
            self.decode_some()?;
        }

        let mut line = &self.envelope[..];
        while let Some(&b'\r') | Some(&b'\n') = line.last() {
            line = &line[..line.len() - 1];
        }
        Ok(line)
    }

    /// Whether the current message has been read to its end and another
    /// message follows it.
    pub fn more_messages_available(&self) -> bool {
        Phase::Done == self.phase && self.next_offset.is_some()
    }

    /// Re-arm the stream at the message following the current one.
    ///
    /// Any unread part of the current message is skipped, and an error
    /// latched by it (such as exceeding the size limit) is forgotten once
    /// the next message is reached. Returns false, leaving the stream at
    /// the end of the current message, if there is no further message.
    pub fn continue_next(&mut self) -> Result<bool, Error> {
        while Phase::Done != self.phase {
            self.decoded.clear();
            self.decoded_pos = 0;
            self.decode_some()?;
        }

        let next = match self.next_offset.take() {
            Some(next) => next,
            None => return Ok(false),
        };

        // The `From ` of the next envelope was consumed in detecting the
        // boundary.
        self.phase = Phase::EnvelopeRest;
        self.envelope.clear();
        self.envelope.extend_from_slice(FROM);
        self.message_offset = next;
        self.end_offset = None;
        self.at_line_start = true;
        self.line_start_offset = next;
        self.matcher.reset();
        self.pending_cr = false;
        self.pending_blank = None;
        self.decoded.clear();
        self.decoded_pos = 0;
        self.yielded = 0;
        self.latched = None;
        Ok(true)
    }

    /// Read decoded message content into `out`.
    ///
    /// Returns 0 at the end of the current message.
    pub fn read_message(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        if let Some(ref e) = self.latched {
            return Err(e.duplicate());
        }

        if out.is_empty() {
            return Ok(0);
        }

        loop {
            if self.decoded_pos < self.decoded.len() {
                let avail = &self.decoded[self.decoded_pos..];
                let n = cmp::min(avail.len(), out.len());
                if let Some(max) = self.max_size {
                    if self.yielded + avail.len() as u64 > max {
                        return Err(self.latch(Error::MessageTooLarge(max)));
                    }
                }

                out[..n].copy_from_slice(&avail[..n]);
                self.decoded_pos += n;
                self.yielded += n as u64;
                return Ok(n);
            }

            if Phase::Done == self.phase {
                return Ok(0);
            }

            self.decoded.clear();
            self.decoded_pos = 0;
            if let Err(e) = self.decode_some() {
                return Err(self.latch(e));
            }
        }
    }

    fn latch(&mut self, e: Error) -> Error {
        let dup = e.duplicate();
        self.latched = Some(e);
        dup
    }

    fn abs_pos(&self) -> u64 {
        self.buf_offset + self.buf_pos as u64
    }

    fn fill_input(&mut self) -> Result<(), Error> {
        self.buf_offset += self.buf.len() as u64;
        self.buf_pos = 0;
        self.buf.resize(READ_BUFFER_SIZE, 0);
        loop {
            match self.source.read(&mut self.buf) {
                Ok(n) => {
                    self.buf.truncate(n);
                    self.eof = 0 == n;
                    return Ok(());
                }
                Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
                Err(e) => {
                    self.buf.clear();
                    return Err(e.into());
                }
            }
        }
    }

    /// Advance the decoder until it has produced some output or reached the
    /// end of the message.
    fn decode_some(&mut self) -> Result<(), Error> {
        while self.decoded.len() == self.decoded_pos
            && Phase::Done != self.phase
        {
            if self.buf_pos == self.buf.len() {
                if !self.eof {
                    self.fill_input()?;
                }
                if self.eof {
                    self.hit_eof()?;
                    break;
                }
            }

            match self.phase {
                Phase::Envelope(matched) => self.match_envelope(matched)?,
                Phase::EnvelopeRest => self.skip_envelope(),
                Phase::Body => self.decode_body(),
                Phase::Done => (),
            }
        }

        Ok(())
    }

    fn match_envelope(&mut self, mut matched: usize) -> Result<(), Error> {
        while self.buf_pos < self.buf.len() && matched < FROM.len() {
            if FROM[matched] != self.buf[self.buf_pos] {
                return Err(Error::MalformedMbox(format!(
                    "no envelope line at offset {}",
                    self.message_offset
                )));
            }

            matched += 1;
            self.buf_pos += 1;
        }

        if FROM.len() == matched {
            self.envelope.clear();
            self.envelope.extend_from_slice(FROM);
            self.phase = Phase::EnvelopeRest;
        } else {
            self.phase = Phase::Envelope(matched);
        }
        Ok(())
    }

    fn skip_envelope(&mut self) {
        let avail = &self.buf[self.buf_pos..];
        let (line, done) = match memchr(b'\n', avail) {
            Some(ix) => (&avail[..=ix], true),
            None => (avail, false),
        };

        let room = MAX_ENVELOPE_LEN.saturating_sub(self.envelope.len());
        self.envelope
            .extend_from_slice(&line[..cmp::min(room, line.len())]);
        self.buf_pos += line.len();

        if done {
            self.phase = Phase::Body;
            self.start_line();
        }
    }

    fn start_line(&mut self) {
        self.at_line_start = true;
        self.line_start_offset = self.abs_pos();
        self.matcher.reset();
    }

    fn decode_body(&mut self) {
        while self.buf_pos < self.buf.len() {
            if !self.at_line_start {
                let avail = &self.buf[self.buf_pos..];
                match memchr(b'\n', avail) {
                    Some(ix) => {
                        self.decoded.extend_from_slice(&avail[..=ix]);
                        self.buf_pos += ix + 1;
                        self.start_line();
                    }
                    None => {
                        self.decoded.extend_from_slice(avail);
                        self.buf_pos = self.buf.len();
                    }
                }
                continue;
            }

            let b = self.buf[self.buf_pos];
            self.buf_pos += 1;

            if self.pending_cr {
                self.pending_cr = false;
                if b'\n' == b {
                    self.blank_line(b"\r\n");
                } else {
                    // Not blank after all; let the mid-line path take `b`
                    self.begin_content_line();
                    self.decoded.push(b'\r');
                    self.at_line_start = false;
                    self.buf_pos -= 1;
                }
                continue;
            }

            if self.matcher.is_fresh() {
                if b'\r' == b {
                    self.pending_cr = true;
                    continue;
                } else if b'\n' == b {
                    self.blank_line(b"\n");
                    continue;
                }
            }

            match self.matcher.push(b) {
                Verdict::Quote => {
                    if 1 == self.matcher.quotes() {
                        // Withhold the first `>` until we know whether it
                        // is an escape.
                        self.begin_content_line();
                    } else {
                        self.decoded.push(b'>');
                    }
                }

                Verdict::Partial => (),

                Verdict::FromLine if 0 == self.matcher.quotes() => {
                    // Start of the next message; the withheld blank line was
                    // its separator.
                    self.pending_blank = None;
                    self.next_offset = Some(self.line_start_offset);
                    self.end_offset = Some(self.line_start_offset);
                    self.phase = Phase::Done;
                    self.matcher.reset();
                    return;
                }

                Verdict::FromLine => {
                    self.decoded.extend_from_slice(FROM);
                    self.matcher.reset();
                    self.at_line_start = false;
                }

                Verdict::Ordinary => {
                    self.begin_content_line();
                    if self.matcher.quotes() > 0 {
                        self.decoded.push(b'>');
                    }
                    self.decoded.extend_from_slice(self.matcher.pending());
                    self.decoded.push(b);
                    if b'\n' == b {
                        self.start_line();
                    } else {
                        self.matcher.reset();
                        self.at_line_start = false;
                    }
                }
            }
        }
    }

    fn begin_content_line(&mut self) {
        if let Some(blank) = self.pending_blank.take() {
            self.decoded.extend_from_slice(blank);
        }
    }

    fn blank_line(&mut self, eol: &'static [u8]) {
        if let Some(prev) = self.pending_blank.replace(eol) {
            self.decoded.extend_from_slice(prev);
        }
        self.start_line();
    }

    fn hit_eof(&mut self) -> Result<(), Error> {
        match self.phase {
            Phase::Envelope(_) => {
                return Err(Error::MalformedMbox(format!(
                    "no envelope line at offset {}",
                    self.message_offset
                )));
            }

            Phase::EnvelopeRest | Phase::Done => (),

            Phase::Body => {
                if self.pending_cr {
                    self.begin_content_line();
                    self.decoded.push(b'\r');
                } else if !self.matcher.is_fresh() {
                    self.begin_content_line();
                    if self.matcher.quotes() > 0 {
                        self.decoded.push(b'>');
                    }
                    self.decoded.extend_from_slice(self.matcher.pending());
                }
                // A blank line directly before EOF is the separator
                self.pending_blank = None;
                self.pending_cr = false;
                self.matcher.reset();
            }
        }

        self.phase = Phase::Done;
        self.next_offset = None;
        self.end_offset = Some(self.abs_pos());
        Ok(())
    }
}

impl<R: Read> Read for MboxMsgInputStream<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_message(out)?)
    }
}
