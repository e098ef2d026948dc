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

//! Writing a single message onto the end of an mbox file.
//!
//! `MboxMsgOutputStream` is a write-or-rollback transaction over a seekable
//! sink. Bytes written to it are escaped and appended immediately, but only
//! become part of the mailbox once `finish()` succeeds. Closing or dropping
//! the stream before then truncates the sink back to where it was when the
//! stream was created.
//!
//! The envelope line is emitted lazily with the first data (or by `finish()`
//! if no data was ever written), which is what allows `set_envelope()` to be
//! called any time before the first write.
//!
//! The only way the output differs from a plain escaping of the input is that
//! a message which does not end with a line ending gets a CRLF added, so that
//! the separator line and the next envelope always start on a fresh line.

use std::fs;
use std::io::{self, Cursor, Seek, SeekFrom, Write};

use log::{debug, error};
use memchr::memchr;

use super::envelope::Envelope;
use super::escape::{LineStartMatcher, Verdict, FROM};
use crate::support::error::Error;

/// A sink which an output stream can roll back.
///
/// Requiring this trait is how a non-seekable sink is rejected: there is no
/// way to construct an output stream over something that cannot be truncated.
pub trait MboxSink: Write + Seek {
    /// Truncate the sink to `len` bytes.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl MboxSink for fs::File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl MboxSink for Cursor<Vec<u8>> {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}

impl<S: MboxSink + ?Sized> MboxSink for &mut S {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        (**self).truncate_to(len)
    }
}

/// The externally visible state of an output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing written yet; the envelope can still be changed.
    Initial,
    /// At the start of a line, with nothing of that line seen yet.
    StartOfLine,
    /// At the start of a line, with a partial `From ` match pending.
    StartAwaitingData,
    /// Within a line whose escaping has been decided.
    MidLine,
    Closed,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Initial,
    Body,
    Closed,
    Error,
}

pub struct MboxMsgOutputStream<S: MboxSink> {
    sink: S,
    start_pos: u64,
    envelope: Envelope,
    /// An exact envelope line to use instead of formatting `envelope`.
    envelope_line: Option<Vec<u8>>,
    phase: Phase,
    at_line_start: bool,
    matcher: LineStartMatcher,
    /// Whether bytes may have reached the sink that have not been committed.
    dirty: bool,
    latched: Option<Error>,
    scratch: Vec<u8>,
}

impl<S: MboxSink> MboxMsgOutputStream<S> {
    /// Start a new message at the current position of `sink`.
    ///
    /// The position is recorded as the rollback point. Callers appending to
    /// an existing mailbox must seek to its end first.
    pub fn new(mut sink: S) -> Result<Self, Error> {
        let start_pos = sink.seek(SeekFrom::Current(0))?;
        Ok(MboxMsgOutputStream {
            sink,
            start_pos,
            envelope: Envelope::default(),
            envelope_line: None,
            phase: Phase::Initial,
            at_line_start: true,
            matcher: LineStartMatcher::new(),
            dirty: false,
            latched: None,
            scratch: Vec::new(),
        })
    }

    /// The offset at which this message's envelope line starts.
    pub fn start_pos(&self) -> u64 {
        self.start_pos
    }

    pub fn state(&self) -> StreamState {
        match self.phase {
            Phase::Initial => StreamState::Initial,
            Phase::Closed => StreamState::Closed,
            Phase::Error => StreamState::Error,
            Phase::Body if !self.at_line_start => StreamState::MidLine,
            Phase::Body if self.matcher.is_fresh() => StreamState::StartOfLine,
            Phase::Body => StreamState::StartAwaitingData,
        }
    }

    /// Set the sender and date used to build the envelope line.
    ///
    /// This may only be called before any data has been written.
    pub fn set_envelope(&mut self, envelope: Envelope) -> Result<(), Error> {
        self.check_usable()?;
        if Phase::Initial != self.phase {
            return Err(Error::EnvelopeAfterWrite);
        }

        self.envelope = envelope;
        self.envelope_line = None;
        Ok(())
    }

    /// Use `line` verbatim as the envelope line.
    ///
    /// This is for copying messages between mailboxes without disturbing
    /// their envelopes. `line` must start with `From ` and must not contain
    /// a line ending other than an optional trailing one; a CRLF is added if
    /// it has none.
    pub fn set_envelope_line(&mut self, line: &[u8]) -> Result<(), Error> {
        self.check_usable()?;
        if Phase::Initial != self.phase {
            return Err(Error::EnvelopeAfterWrite);
        }

        let mut line = line;
        while let Some(&b'\r') | Some(&b'\n') = line.last() {
            line = &line[..line.len() - 1];
        }
        if !line.starts_with(FROM) || memchr(b'\n', line).is_some() {
            return Err(Error::MalformedMbox(
                "not a valid envelope line".to_owned(),
            ));
        }

        let mut owned = line.to_vec();
        owned.extend_from_slice(b"\r\n");
        self.envelope_line = Some(owned);
        Ok(())
    }

    /// Escape and append `buf` to the message.
    ///
    /// All of `buf` is always consumed; bytes whose escaping cannot be
    /// decided yet are held back until the next call.
    pub fn write_data(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.check_usable()?;
        if buf.is_empty() {
            return Ok(());
        }

        self.scratch.clear();
        self.begin_body();
        self.encode(buf);
        self.dirty = true;
        let result = self.sink.write_all(&self.scratch);
        self.latch(result)
    }

    /// Commit the message.
    ///
    /// Terminates an unfinished last line, writes the blank separator line,
    /// and flushes the sink. On failure, everything written for this message
    /// is rolled back.
    pub fn finish(&mut self) -> Result<(), Error> {
        self.check_usable()?;

        self.scratch.clear();
        self.begin_body();
        if self.at_line_start {
            if !self.matcher.is_fresh() {
                // Any leading `>` were already passed through
                self.scratch.extend_from_slice(self.matcher.pending());
                self.scratch.extend_from_slice(b"\r\n");
            }
        } else {
            self.scratch.extend_from_slice(b"\r\n");
        }
        self.scratch.extend_from_slice(b"\r\n");
        self.matcher.reset();
        self.at_line_start = true;
        self.dirty = true;

        let result = self
            .sink
            .write_all(&self.scratch)
            .and_then(|_| self.sink.flush());
        match self.latch(result) {
            Ok(()) => {
                self.dirty = false;
                self.phase = Phase::Closed;
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to commit message at offset {}: {}",
                    self.start_pos, e
                );
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    /// Abandon the message, truncating the sink back to `start_pos()`.
    ///
    /// This is a no-op if the stream was already finished or closed. If the
    /// truncation itself fails, the failure is logged and returned, but the
    /// stream is still closed.
    pub fn close(&mut self) -> Result<(), Error> {
        match self.phase {
            Phase::Closed => Ok(()),
            Phase::Error => {
                // The error state is terminal, but the partial data must
                // still go away
                self.rollback()?;
                Err(self.latched_error())
            }
            Phase::Initial | Phase::Body => {
                let result = self.rollback();
                self.phase = Phase::Closed;
                result
            }
        }
    }

    fn begin_body(&mut self) {
        if Phase::Initial == self.phase {
            match self.envelope_line {
                Some(ref line) => self.scratch.extend_from_slice(line),
                None => {
                    let line = self.envelope.to_line();
                    self.scratch.extend_from_slice(&line);
                }
            }
            self.phase = Phase::Body;
            self.at_line_start = true;
        }
    }

    fn encode(&mut self, mut buf: &[u8]) {
        while !buf.is_empty() {
            if self.at_line_start {
                let b = buf[0];
                buf = &buf[1..];
                match self.matcher.push(b) {
                    Verdict::Quote => self.scratch.push(b'>'),
                    Verdict::Partial => (),
                    Verdict::FromLine => {
                        self.scratch.push(b'>');
                        self.scratch.extend_from_slice(FROM);
                        self.matcher.reset();
                        self.at_line_start = false;
                    }
                    Verdict::Ordinary => {
                        self.scratch.extend_from_slice(self.matcher.pending());
                        self.scratch.push(b);
                        self.matcher.reset();
                        self.at_line_start = b'\n' == b;
                    }
                }
            } else {
                match memchr(b'\n', buf) {
                    Some(ix) => {
                        self.scratch.extend_from_slice(&buf[..=ix]);
                        buf = &buf[ix + 1..];
                        self.at_line_start = true;
                    }
                    None => {
                        self.scratch.extend_from_slice(buf);
                        buf = &[];
                    }
                }
            }
        }
    }

    fn rollback(&mut self) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }

        debug!("Rolling back partial message at offset {}", self.start_pos);
        let start_pos = self.start_pos;
        let result = self
            .sink
            .seek(SeekFrom::Start(start_pos))
            .and_then(|_| self.sink.truncate_to(start_pos));
        self.dirty = false;
        if let Err(ref e) = result {
            error!(
                "FAILED TO ROLL BACK partial message at offset {}; \
                 stray bytes may remain in the mailbox: {}",
                start_pos, e
            );
        }
        result.map_err(Error::from)
    }

    fn check_usable(&self) -> Result<(), Error> {
        match self.phase {
            Phase::Closed => Err(Error::StreamClosed),
            Phase::Error => Err(self.latched_error()),
            Phase::Initial | Phase::Body => Ok(()),
        }
    }

    fn latch(&mut self, result: io::Result<()>) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = Error::from(e);
                let dup = e.duplicate();
                self.latched = Some(e);
                self.phase = Phase::Error;
                Err(dup)
            }
        }
    }

    fn latched_error(&self) -> Error {
        self.latched
            .as_ref()
            .map_or(Error::StreamClosed, Error::duplicate)
    }
}

impl<S: MboxSink> Write for MboxMsgOutputStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_usable()?;
        let result = self.sink.flush();
        self.latch(result)?;
        Ok(())
    }
}

impl<S: MboxSink> Drop for MboxMsgOutputStream<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;
    use proptest::prelude::*;

    use super::*;

    const ENVELOPE: &[u8] =
        b"From sender@example.com Wed Jan 03 01:05:34 1996\r\n";

    fn envelope() -> Envelope {
        Envelope::new(
            "sender@example.com",
            Some(Utc.ymd(1996, 1, 3).and_hms(1, 5, 34)),
        )
    }

    fn encode_chunked(data: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut stream = MboxMsgOutputStream::new(&mut cursor).unwrap();
            stream.set_envelope(envelope()).unwrap();
            for chunk in data.chunks(chunk_size.max(1)) {
                stream.write_all(chunk).unwrap();
            }
            stream.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn expected(body: &[u8]) -> Vec<u8> {
        let mut v = ENVELOPE.to_vec();
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn simple_message() {
        assert_eq!(
            expected(b"Subject: hi\r\n\r\nbody\r\n\r\n"),
            encode_chunked(b"Subject: hi\r\n\r\nbody\r\n", 4096)
        );
    }

    #[test]
    fn from_lines_escaped() {
        assert_eq!(
            expected(
                b">From x\r\n>>From y\r\n>>>>From z\r\nFromage\r\n\
                  > From a\r\n From b\r\n\r\n"
            ),
            encode_chunked(
                b"From x\r\n>From y\r\n>>>From z\r\nFromage\r\n\
                  > From a\r\n From b\r\n",
                4096
            )
        );
    }

    #[test]
    fn missing_final_eol_added() {
        assert_eq!(expected(b"body\r\n\r\n"), encode_chunked(b"body", 3));
        // Undecided line start at the end is flushed verbatim
        assert_eq!(expected(b"x\nFro\r\n\r\n"), encode_chunked(b"x\nFro", 1));
        assert_eq!(expected(b"x\n>>\r\n\r\n"), encode_chunked(b"x\n>>", 1));
    }

    #[test]
    fn empty_message_still_framed() {
        assert_eq!(expected(b"\r\n"), encode_chunked(b"", 1));
    }

    #[test]
    fn verbatim_envelope_line() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut stream = MboxMsgOutputStream::new(&mut cursor).unwrap();
            stream.set_envelope(envelope()).unwrap();
            stream
                .set_envelope_line(b"From MAILER-DAEMON Wed Jan  3 1996\n")
                .unwrap();
            assert_matches!(
                Err(Error::MalformedMbox(_)),
                stream.set_envelope_line(b">From x")
            );
            assert_matches!(
                Err(Error::MalformedMbox(_)),
                stream.set_envelope_line(b"From x\nFrom y")
            );
            stream.write_all(b"body\n").unwrap();
            assert_matches!(
                Err(Error::EnvelopeAfterWrite),
                stream.set_envelope_line(b"From x")
            );
            stream.finish().unwrap();
        }
        assert_eq!(
            b"From MAILER-DAEMON Wed Jan  3 1996\r\nbody\n\r\n".to_vec(),
            cursor.into_inner()
        );
    }

    #[test]
    fn state_transitions() {
        let mut cursor = Cursor::new(Vec::new());
        let mut stream = MboxMsgOutputStream::new(&mut cursor).unwrap();
        assert_eq!(StreamState::Initial, stream.state());
        stream.write_data(b"Subject: x\r\n").unwrap();
        assert_eq!(StreamState::StartOfLine, stream.state());
        stream.write_data(b">Fr").unwrap();
        assert_eq!(StreamState::StartAwaitingData, stream.state());
        stream.write_data(b"om ").unwrap();
        assert_eq!(StreamState::MidLine, stream.state());
        stream.finish().unwrap();
        assert_eq!(StreamState::Closed, stream.state());
        assert_matches!(Err(Error::StreamClosed), stream.write_data(b"x"));
    }

    #[test]
    fn envelope_locked_after_first_write() {
        let mut cursor = Cursor::new(Vec::new());
        let mut stream = MboxMsgOutputStream::new(&mut cursor).unwrap();
        stream.set_envelope(envelope()).unwrap();
        stream.write_data(b"x").unwrap();
        assert_matches!(
            Err(Error::EnvelopeAfterWrite),
            stream.set_envelope(envelope())
        );
    }

    #[test]
    fn close_without_finish_rolls_back() {
        let mut cursor = Cursor::new(b"existing data\r\n\r\n".to_vec());
        cursor.seek(SeekFrom::End(0)).unwrap();
        {
            let mut stream = MboxMsgOutputStream::new(&mut cursor).unwrap();
            assert_eq!(17, stream.start_pos());
            stream.write_data(b"Subject: doomed\r\n\r\nFrom x").unwrap();
            stream.close().unwrap();
            assert_matches!(Err(Error::StreamClosed), stream.write_data(b"y"));
        }
        assert_eq!(b"existing data\r\n\r\n".to_vec(), cursor.into_inner());
    }

    #[test]
    fn drop_rolls_back() {
        let mut cursor = Cursor::new(b"existing".to_vec());
        cursor.seek(SeekFrom::End(0)).unwrap();
        {
            let mut stream = MboxMsgOutputStream::new(&mut cursor).unwrap();
            stream.write_data(b"partial").unwrap();
        }
        assert_eq!(b"existing".to_vec(), cursor.into_inner());
    }

    /// A sink which fails every write after the first `budget` bytes, and
    /// optionally refuses to truncate.
    struct FlakySink {
        inner: Cursor<Vec<u8>>,
        budget: usize,
        truncate_fails: bool,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.budget -= buf.len();
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakySink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl MboxSink for FlakySink {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                Err(io::Error::new(io::ErrorKind::Other, "read-only"))
            } else {
                self.inner.truncate_to(len)
            }
        }
    }

    #[test]
    fn io_errors_latch() {
        let mut sink = FlakySink {
            inner: Cursor::new(Vec::new()),
            budget: 100,
            truncate_fails: false,
        };
        {
            let mut stream = MboxMsgOutputStream::new(&mut sink).unwrap();
            stream.write_data(b"hello\r\n").unwrap();
            match stream.write_data(&[b'x'; 200]) {
                Err(Error::Io(e)) => assert_eq!("disk full", e.to_string()),
                r => panic!("Unexpected result: {:?}", r),
            }
            assert_eq!(StreamState::Error, stream.state());
            // Even a tiny write now fails the same way
            match stream.write_data(b"y") {
                Err(Error::Io(e)) => assert_eq!("disk full", e.to_string()),
                r => panic!("Unexpected result: {:?}", r),
            }
            assert_matches!(Err(Error::Io(_)), stream.finish());
            assert_matches!(Err(Error::Io(_)), stream.close());
            assert_eq!(StreamState::Error, stream.state());
        }
        assert!(sink.inner.into_inner().is_empty());
    }

    #[test]
    fn failed_finish_rolls_back() {
        let mut sink = FlakySink {
            inner: Cursor::new(Vec::new()),
            budget: ENVELOPE.len() + 4,
            truncate_fails: false,
        };
        {
            let mut stream = MboxMsgOutputStream::new(&mut sink).unwrap();
            stream.set_envelope(envelope()).unwrap();
            stream.write_data(b"body").unwrap();
            assert_matches!(Err(Error::Io(_)), stream.finish());
        }
        assert!(sink.inner.into_inner().is_empty());
    }

    #[test]
    fn rollback_failure_still_closes() {
        crate::init_test_log();

        let mut sink = FlakySink {
            inner: Cursor::new(Vec::new()),
            budget: 1000,
            truncate_fails: true,
        };
        let mut stream = MboxMsgOutputStream::new(&mut sink).unwrap();
        stream.write_data(b"body").unwrap();
        assert_matches!(Err(Error::Io(_)), stream.close());
        assert_eq!(StreamState::Closed, stream.state());
        assert_matches!(Err(Error::StreamClosed), stream.write_data(b"x"));
    }

    fn mbox_ish_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(
            prop::sample::select(vec![
                b'F', b'r', b'o', b'm', b' ', b'>', b'\r', b'\n', b'x',
            ]),
            0..300,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 1024,
            ..ProptestConfig::default()
        })]

        #[test]
        fn chunk_boundaries_do_not_matter(data in mbox_ish_bytes()) {
            let whole = encode_chunked(&data, 4096);
            for &size in &[1, 2, 3, 7] {
                prop_assert_eq!(&whole, &encode_chunked(&data, size));
            }
        }

        #[test]
        fn rollback_restores_prior_content(
            prior in mbox_ish_bytes(),
            data in mbox_ish_bytes(),
            chunk in 1usize..10,
        ) {
            let mut cursor = Cursor::new(prior.clone());
            cursor.seek(SeekFrom::End(0)).unwrap();
            {
                let mut stream =
                    MboxMsgOutputStream::new(&mut cursor).unwrap();
                for c in data.chunks(chunk) {
                    stream.write_data(c).unwrap();
                }
                stream.close().unwrap();
            }
            prop_assert_eq!(prior, cursor.into_inner());
        }
    }
}
