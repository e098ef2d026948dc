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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed mbox: {0}")]
    MalformedMbox(String),
    #[error("Message exceeds the size limit of {0} bytes")]
    MessageTooLarge(u64),
    #[error("Stream closed")]
    StreamClosed,
    #[error("Envelope cannot be changed after message data was written")]
    EnvelopeAfterWrite,
    #[error("Folder already exists")]
    FolderExists,
    #[error("No such folder")]
    NxFolder,
    #[error("Folder is in use by another writer or a compaction")]
    FolderBusy,
    #[error("Unsafe folder name")]
    UnsafeName,
    #[error("Operation not possible on the root folder")]
    RootFolder,
    #[error("Cannot copy or move a folder into itself")]
    FolderIntoItself,
    #[error("Invalid store token")]
    BadStoreToken,
    #[error("Folder would exceed the maximum mbox file size")]
    FileTooBig,
    #[error("Not enough free disk space")]
    NoSpace,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Compaction rejected by the index")]
    Vetoed,
    #[error(transparent)]
    Io(io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Produce an equivalent copy of this error.
    ///
    /// Streams latch their first failure and must report it again on every
    /// later call. Most variants are plain values; wrapped errors are
    /// reconstructed from their kind and message.
    pub fn duplicate(&self) -> Self {
        match *self {
            Error::MalformedMbox(ref m) => Error::MalformedMbox(m.clone()),
            Error::MessageTooLarge(n) => Error::MessageTooLarge(n),
            Error::StreamClosed => Error::StreamClosed,
            Error::EnvelopeAfterWrite => Error::EnvelopeAfterWrite,
            Error::FolderExists => Error::FolderExists,
            Error::NxFolder => Error::NxFolder,
            Error::FolderBusy => Error::FolderBusy,
            Error::UnsafeName => Error::UnsafeName,
            Error::RootFolder => Error::RootFolder,
            Error::FolderIntoItself => Error::FolderIntoItself,
            Error::BadStoreToken => Error::BadStoreToken,
            Error::FileTooBig => Error::FileTooBig,
            Error::NoSpace => Error::NoSpace,
            Error::Cancelled => Error::Cancelled,
            Error::Vetoed => Error::Vetoed,
            Error::Io(ref e) => {
                Error::Io(io::Error::new(e.kind(), e.to_string()))
            }
            Error::Nix(e) => Error::Nix(e),
            Error::Toml(ref e) => Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                e.to_string(),
            )),
        }
    }
}

// Errors raised inside `Read`/`Write` implementations travel wrapped in an
// `io::Error`; unwrap them again so callers can match on the real variant.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.get_ref().map_or(false, |inner| inner.is::<Error>()) {
            match e.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(inner)) => *inner,
                _ => Error::Io(io::ErrorKind::Other.into()),
            }
        } else {
            Error::Io(e)
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::Io(e) => return e,
            Error::MalformedMbox(..) | Error::MessageTooLarge(..) => {
                io::ErrorKind::InvalidData
            }
            Error::StreamClosed => io::ErrorKind::BrokenPipe,
            Error::FolderExists => io::ErrorKind::AlreadyExists,
            Error::NxFolder => io::ErrorKind::NotFound,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_survives_io_round_trip() {
        let wrapped: io::Error = Error::MessageTooLarge(42).into();
        assert_eq!(io::ErrorKind::InvalidData, wrapped.kind());
        assert_matches!(Error::MessageTooLarge(42), Error::from(wrapped));

        let plain = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_matches!(Error::Io(_), Error::from(plain));
    }

    #[test]
    fn duplicate_preserves_kind() {
        let original =
            Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        match original.duplicate() {
            Error::Io(e) => {
                assert_eq!(io::ErrorKind::PermissionDenied, e.kind());
                assert_eq!("nope", e.to_string());
            }
            e => panic!("Unexpected error: {:?}", e),
        }
        assert_matches!(
            Error::MalformedMbox(_),
            Error::MalformedMbox("x".to_owned()).duplicate()
        );
    }
}
