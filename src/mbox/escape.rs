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

//! The line-start decision shared by the encoder and decoder.
//!
//! A line is "From-like" if it matches `^>*From `. The encoder adds one `>`
//! to every such line, and the decoder removes one `>` from every line
//! matching `^>+From `; a bare `^From ` line seen by the decoder is the
//! envelope of the next message.
//!
//! The matcher is fed one byte at a time so that the decision can straddle
//! arbitrary chunk boundaries. The leading run of `>` is never buffered: it
//! is only counted, and callers pass those bytes through as they arrive.
//! Since every byte of the run is identical, inserting the escape `>` after
//! the run produces the same output as inserting it before. The only bytes
//! that can be pending at any time are a proper prefix of `From `, so the
//! lookahead is bounded at four bytes no matter how long the run of `>` is.

/// The literal that introduces an envelope line.
pub const FROM: &[u8] = b"From ";

/// Outcome of feeding one byte to a `LineStartMatcher`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The byte is a `>` in the leading run of the line.
    Quote,
    /// The byte extends a partial match of `From `; no decision yet.
    Partial,
    /// The byte completes `>*From `. The line is From-like.
    FromLine,
    /// The byte shows the line is not From-like.
    Ordinary,
}

/// Incremental classifier for the start of one line.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineStartMatcher {
    quotes: u64,
    matched: usize,
}

impl LineStartMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next byte of the line.
    ///
    /// After `FromLine` or `Ordinary` is returned, the matcher must be reset
    /// before being used for another line.
    pub fn push(&mut self, b: u8) -> Verdict {
        if 0 == self.matched && b'>' == b {
            self.quotes += 1;
            Verdict::Quote
        } else if FROM[self.matched] == b {
            self.matched += 1;
            if FROM.len() == self.matched {
                Verdict::FromLine
            } else {
                Verdict::Partial
            }
        } else {
            Verdict::Ordinary
        }
    }

    /// The number of `>` seen at the start of the line so far.
    pub fn quotes(&self) -> u64 {
        self.quotes
    }

    /// The bytes of `From ` matched so far and not yet passed through.
    pub fn pending(&self) -> &'static [u8] {
        &FROM[..self.matched]
    }

    /// Whether any byte of the current line has been consumed.
    pub fn is_fresh(&self) -> bool {
        0 == self.quotes && 0 == self.matched
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Run a whole line through the matcher.
    fn is_from_like(line: &[u8]) -> bool {
        let mut matcher = LineStartMatcher::new();
        for &b in line {
            match matcher.push(b) {
                Verdict::Quote | Verdict::Partial => (),
                Verdict::FromLine => return true,
                Verdict::Ordinary => return false,
            }
        }
        false
    }

    fn classify(line: &[u8]) -> Vec<Verdict> {
        let mut matcher = LineStartMatcher::new();
        line.iter().map(|&b| matcher.push(b)).collect()
    }

    #[test]
    fn from_like_lines() {
        assert!(is_from_like(b"From "));
        assert!(is_from_like(b"From me"));
        assert!(is_from_like(b">From me"));
        assert!(is_from_like(b">>>>From me"));
        assert!(!is_from_like(b"From"));
        assert!(!is_from_like(b"from me"));
        assert!(!is_from_like(b" From me"));
        assert!(!is_from_like(b"> From me"));
        assert!(!is_from_like(b">"));
        assert!(!is_from_like(b"Fromage"));
        assert!(!is_from_like(b""));
    }

    #[test]
    fn verdict_sequence() {
        use self::Verdict::*;

        assert_eq!(
            vec![Quote, Quote, Partial, Partial, Partial, Partial, FromLine],
            classify(b">>From ")
        );
        assert_eq!(vec![Partial, Partial, Ordinary], classify(b"Frx"));
        assert_eq!(vec![Quote, Ordinary], classify(b">\n"));
    }

    #[test]
    fn long_quote_run_buffers_nothing() {
        let mut matcher = LineStartMatcher::new();
        for _ in 0..100_000 {
            assert_eq!(Verdict::Quote, matcher.push(b'>'));
            assert!(matcher.pending().is_empty());
        }
        assert_eq!(100_000, matcher.quotes());
        assert_eq!(Verdict::Partial, matcher.push(b'F'));
        assert_eq!(b"F", matcher.pending());
        assert!(!matcher.is_fresh());
        matcher.reset();
        assert!(matcher.is_fresh());
    }
}
