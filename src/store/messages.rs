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

//! Appending, reading, and re-flagging individual messages.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{error, info, warn};

use super::outstanding::{OutstandingTable, SharedStream};
use super::{open_existing, Store};
use crate::mbox::envelope::Envelope;
use crate::mbox::input::MboxMsgInputStream;
use crate::mbox::output::{MboxMsgOutputStream, StreamState};
use crate::mbox::status::{
    locate_status_headers, rewrite_keywords, status2_value, status_value,
    StatusHeaders, ValueSpan, HEADER_SCAN_LIMIT, STATUS2_WIDTH, STATUS_WIDTH,
};
use crate::model::{
    FolderId, MessageFlags, MessageRef, StoreToken, SummaryStamp,
};
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms, ReadUninterruptibly};
use crate::support::log_prefix::LogPrefix;

/// A message being appended to a folder.
///
/// Data written to this handle is escaped and appended to the mbox right
/// away, but does not become part of the folder until it is passed to
/// `Store::finish_new_message()`. Dropping the handle without finishing it
/// discards the message.
pub struct NewMessage {
    folder: FolderId,
    token: StoreToken,
    slot: u64,
    stream: SharedStream,
    outstanding: Arc<OutstandingTable>,
    log_prefix: LogPrefix,
    released: bool,
}

impl NewMessage {
    /// The token the message will have once finished.
    pub fn token(&self) -> StoreToken {
        self.token
    }

    pub fn folder(&self) -> FolderId {
        self.folder
    }

    /// Set the envelope sender and date. Only possible before any data has
    /// been written.
    pub fn set_envelope(&mut self, envelope: Envelope) -> Result<(), Error> {
        self.stream.lock().unwrap().set_envelope(envelope)
    }

    pub fn state(&self) -> StreamState {
        self.stream.lock().unwrap().state()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.outstanding.release_writer(self.folder, self.slot);
        }
    }
}

impl Write for NewMessage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.lock().unwrap().flush()
    }
}

impl Drop for NewMessage {
    fn drop(&mut self) {
        if !self.released {
            info!(
                "{} DISCARD message {} (dropped without finishing)",
                self.log_prefix, self.token
            );
            let _ = self.stream.lock().unwrap().close();
            self.release();
        }
    }
}

impl Store {
    /// Start appending a new message to `folder`.
    ///
    /// If another message is already being written to the folder, it is
    /// rolled back. Fails with `FolderBusy` while the folder is being
    /// compacted. The mbox file is created if it does not exist.
    pub fn get_new_msg_output_stream(
        &self,
        folder: FolderId,
    ) -> Result<NewMessage, Error> {
        let path = self.mbox_path(folder)?;
        let prefix = self.log_prefix.clone();
        let repairs = &self.missing_eol_repairs;

        let (slot, stream) = self.outstanding.install_writer(folder, || {
            let mut file = file_ops::open_read_write(&path)?;
            let len = file.seek(SeekFrom::End(0))?;
            if len > 0 {
                file.seek(SeekFrom::End(-1))?;
                let mut last = [0u8; 1];
                file.read_exact(&mut last)?;
                if b'\n' != last[0] {
                    warn!(
                        "{} '{}' does not end with a line ending; repairing",
                        prefix,
                        path.display()
                    );
                    file.seek(SeekFrom::End(0))?;
                    file.write_all(b"\r\n")?;
                    repairs.fetch_add(1, Ordering::Relaxed);
                }
            }

            MboxMsgOutputStream::new(file)
        })?;

        let token = StoreToken(stream.lock().unwrap().start_pos());
        info!(
            "{} START message {} in folder {:?}",
            self.log_prefix, token, folder
        );

        Ok(NewMessage {
            folder,
            token,
            slot,
            stream,
            outstanding: Arc::clone(&self.outstanding),
            log_prefix: self.log_prefix.clone(),
            released: false,
        })
    }

    /// Commit `msg` to its folder, returning its token.
    ///
    /// If this fails, the partial message has been rolled back.
    pub fn finish_new_message(
        &self,
        mut msg: NewMessage,
    ) -> Result<StoreToken, Error> {
        let result = msg.stream.lock().unwrap().finish();
        msg.release();

        match result {
            Ok(()) => {
                info!("{} FINISH message {}", self.log_prefix, msg.token);
                Ok(msg.token)
            }
            Err(e) => {
                error!(
                    "{} Failed to finish message {}: {}",
                    self.log_prefix, msg.token, e
                );
                Err(e)
            }
        }
    }

    /// Abandon `msg`, rolling the folder back to how it was before.
    pub fn discard_new_message(
        &self,
        mut msg: NewMessage,
    ) -> Result<(), Error> {
        let result = msg.stream.lock().unwrap().close();
        msg.release();
        info!("{} DISCARD message {}", self.log_prefix, msg.token);
        result
    }

    /// Open the message identified by `token` in `folder` for reading.
    ///
    /// `max_size` overrides the configured maximum message size.
    pub fn get_msg_input_stream(
        &self,
        folder: FolderId,
        token: &str,
        max_size: Option<u64>,
    ) -> Result<MboxMsgInputStream<fs::File>, Error> {
        let token: StoreToken = token.parse()?;
        let file = open_existing(&self.mbox_path(folder)?)?;
        MboxMsgInputStream::new(
            file,
            token.offset(),
            max_size.or(self.config.max_message_size),
        )
    }

    /// Set or clear `mask` on each of `msgs`, rewriting their
    /// `X-Mozilla-Status` and `X-Mozilla-Status2` headers in place.
    ///
    /// The new flags are computed from the flags in each `MessageRef`, not
    /// from what is currently on disk. Messages without the status headers
    /// are left as they are.
    ///
    /// Returns a summary stamp reflecting the mbox after the change. Fails
    /// with `FolderBusy` while the folder is being compacted.
    pub fn change_flags(
        &self,
        folder: FolderId,
        msgs: &[MessageRef],
        mask: MessageFlags,
        set: bool,
    ) -> Result<SummaryStamp, Error> {
        if self.outstanding.is_compacting(folder) {
            return Err(Error::FolderBusy);
        }

        let mut sorted = msgs.to_vec();
        sorted.sort_by_key(|m| m.token);

        let mut file = open_for_rewrite(&self.mbox_path(folder)?)?;
        let mut window = vec![0u8; HEADER_SCAN_LIMIT];

        for msg in &sorted {
            let flags = msg.flags.changed(mask, set);
            let headers =
                match read_status_headers(&mut file, msg.token, &mut window) {
                    Ok(h) => h,
                    Err(Error::MalformedMbox(m)) => {
                        warn!(
                            "{} Not changing flags of message {}: {}",
                            self.log_prefix, msg.token, m
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            overwrite_value(
                &mut file,
                msg.token,
                headers.status,
                STATUS_WIDTH,
                status_value(flags).as_bytes(),
            )?;
            overwrite_value(
                &mut file,
                msg.token,
                headers.status2,
                STATUS2_WIDTH,
                status2_value(flags).as_bytes(),
            )?;
        }

        drop(file);
        self.summary_stamp(folder)
    }

    /// Add (if `add`) or remove the space-separated `keywords` on each of
    /// `msgs`, rewriting their `X-Mozilla-Keys` headers in place.
    ///
    /// A header can only be rewritten within the room it already occupies.
    /// Returns the tokens of the messages for which that was not enough (or
    /// which lack the header entirely); their keywords need to be rebuilt at
    /// the next compaction. Fails with `FolderBusy` while the folder is
    /// being compacted.
    pub fn change_keywords(
        &self,
        folder: FolderId,
        msgs: &[StoreToken],
        keywords: &str,
        add: bool,
    ) -> Result<Vec<StoreToken>, Error> {
        if self.outstanding.is_compacting(folder) {
            return Err(Error::FolderBusy);
        }

        let keywords: Vec<String> =
            keywords.split_whitespace().map(str::to_owned).collect();
        let (to_add, to_remove) = if add {
            (&keywords[..], &[][..])
        } else {
            (&[][..], &keywords[..])
        };

        let mut sorted = msgs.to_vec();
        sorted.sort();

        let mut file = open_for_rewrite(&self.mbox_path(folder)?)?;
        let mut window = vec![0u8; HEADER_SCAN_LIMIT];
        let mut need_growth = Vec::new();

        for &token in &sorted {
            let span =
                match read_status_headers(&mut file, token, &mut window) {
                    Ok(headers) => headers.keys,
                    Err(Error::MalformedMbox(m)) => {
                        warn!(
                            "{} Not changing keywords of message {}: {}",
                            self.log_prefix, token, m
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            let span = match span {
                Some(span) => span,
                None => {
                    if add {
                        need_growth.push(token);
                    }
                    continue;
                }
            };

            match rewrite_keywords(
                span.get(&window),
                span.len,
                to_add,
                to_remove,
            ) {
                Some(value) => {
                    file.seek(SeekFrom::Start(
                        token.offset() + span.start as u64,
                    ))?;
                    file.write_all(&value)?;
                }
                None => need_growth.push(token),
            }
        }

        Ok(need_growth)
    }

    /// Mark `msgs` as expunged.
    ///
    /// The messages stay in the mbox until the folder is compacted.
    pub fn delete_messages(
        &self,
        folder: FolderId,
        msgs: &[MessageRef],
    ) -> Result<SummaryStamp, Error> {
        self.change_flags(folder, msgs, MessageFlags::EXPUNGED, true)
    }
}

fn open_for_rewrite(path: &Path) -> Result<fs::File, Error> {
    fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .on_not_found(Error::NxFolder)
}

/// Read the start of the message at `token` into `window` and find its
/// status headers within.
fn read_status_headers(
    file: &mut fs::File,
    token: StoreToken,
    window: &mut [u8],
) -> Result<StatusHeaders, Error> {
    file.seek(SeekFrom::Start(token.offset()))?;
    let n = file.read_uninterruptibly(window)?;
    locate_status_headers(&window[..n])
}

fn overwrite_value(
    file: &mut fs::File,
    token: StoreToken,
    span: Option<ValueSpan>,
    width: usize,
    value: &[u8],
) -> Result<(), Error> {
    match span {
        Some(span) if span.len == width => {
            file.seek(SeekFrom::Start(token.offset() + span.start as u64))?;
            file.write_all(value)?;
        }
        Some(span) => {
            warn!(
                "Status header of message {} is {} bytes wide, expected {}; \
                 leaving it alone",
                token, span.len, width
            );
        }
        None => (),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rayon::prelude::*;

    use super::super::test_prelude::*;
    use super::*;
    use crate::mbox::status::{status_header_lines, KEYWORD_RESERVE};
    use crate::mime::parse::parse_headers;

    fn inbox(store: &Store) -> FolderId {
        store.create_folder(FolderTree::ROOT, "Inbox").unwrap()
    }

    #[test]
    fn append_and_read_back() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);

        let t1 = append(store, folder, b"Subject: one\r\n\r\nFrom me\r\n");
        let t2 = append(store, folder, b"Subject: two\n\n>From you\n");
        assert_eq!(StoreToken(0), t1);
        assert!(t2 > t1);

        assert_eq!(
            b"Subject: one\r\n\r\nFrom me\r\n".to_vec(),
            read(store, folder, t1)
        );
        assert_eq!(
            b"Subject: two\n\n>From you\n".to_vec(),
            read(store, folder, t2)
        );

        // Later appends do not disturb earlier tokens
        let t3 = append(store, folder, b"Subject: three\r\n\r\n");
        assert_eq!(
            b"Subject: one\r\n\r\nFrom me\r\n".to_vec(),
            read(store, folder, t1)
        );
        assert_eq!(
            b"Subject: three\r\n\r\n".to_vec(),
            read(store, folder, t3)
        );
        assert_eq!(0, store.missing_eol_repairs());
    }

    #[test]
    fn discard_restores_exact_bytes() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);
        append(store, folder, b"Subject: one\r\n\r\n");
        let path = store.mbox_path(folder).unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut msg = store.get_new_msg_output_stream(folder).unwrap();
        assert_eq!(StoreToken(before.len() as u64), msg.token());
        msg.write_all(b"Subject: abandoned\r\n\r\nFrom x\r\n").unwrap();
        store.discard_new_message(msg).unwrap();
        assert_eq!(before, std::fs::read(&path).unwrap());

        let mut msg = store.get_new_msg_output_stream(folder).unwrap();
        msg.write_all(b"Subject: dropped\r\n").unwrap();
        drop(msg);
        assert_eq!(before, std::fs::read(&path).unwrap());

        // The slot was released both times
        append(store, folder, b"Subject: two\r\n\r\n");
    }

    #[test]
    fn second_writer_wins() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);

        let mut first = store.get_new_msg_output_stream(folder).unwrap();
        first.write_all(b"Subject: first\r\n").unwrap();

        let mut second = store.get_new_msg_output_stream(folder).unwrap();
        assert_eq!(first.token(), second.token());
        assert_eq!(StreamState::Closed, first.state());
        assert!(first.write_all(b"more").is_err());

        second.write_all(b"Subject: second\r\n\r\n").unwrap();
        let token = store.finish_new_message(second).unwrap();
        assert_matches!(
            Err(Error::StreamClosed),
            store.finish_new_message(first)
        );

        assert_eq!(
            b"Subject: second\r\n\r\n".to_vec(),
            read(store, folder, token)
        );
        // The loser finishing must not have released the winner's slot, and
        // the winner finishing released it
        append(store, folder, b"Subject: third\r\n\r\n");
    }

    #[test]
    fn missing_final_eol_is_repaired() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);
        let path = store.mbox_path(folder).unwrap();
        std::fs::write(
            &path,
            b"From - Wed Jan 03 01:05:34 1996\r\nSubject: torn\r\n\r\nbo",
        )
        .unwrap();

        let token = append(store, folder, b"Subject: next\r\n\r\n");
        assert_eq!(1, store.missing_eol_repairs());
        assert_eq!(
            b"Subject: next\r\n\r\n".to_vec(),
            read(store, folder, token)
        );
        assert_eq!(
            b"Subject: torn\r\n\r\nbo\r\n".to_vec(),
            read(store, folder, StoreToken(0))
        );

        append(store, folder, b"Subject: last\r\n\r\n");
        assert_eq!(1, store.missing_eol_repairs());
    }

    #[test]
    fn bad_tokens_and_offsets() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);
        let token = append(store, folder, b"Subject: x\r\n\r\nbody\r\n");

        assert_matches!(
            Some(Error::BadStoreToken),
            store.get_msg_input_stream(folder, "12abc", None).err()
        );
        assert_matches!(
            Some(Error::BadStoreToken),
            store.get_msg_input_stream(folder, "", None).err()
        );

        // Pointing into the middle of a message
        let inside = (token.offset() + 3).to_string();
        let mut stream =
            store.get_msg_input_stream(folder, &inside, None).unwrap();
        let mut buf = Vec::new();
        let err = stream.read_to_end(&mut buf).unwrap_err();
        assert_matches!(Error::MalformedMbox(_), Error::from(err));

        // Past the end
        let mut stream = store
            .get_msg_input_stream(folder, "1000000", None)
            .unwrap();
        let err = stream.read_to_end(&mut buf).unwrap_err();
        assert_matches!(Error::MalformedMbox(_), Error::from(err));

        assert_matches!(
            Some(Error::RootFolder),
            store.get_msg_input_stream(FolderTree::ROOT, "0", None).err()
        );
    }

    #[test]
    fn size_limit_enforced() {
        let setup = set_up_with(StoreConfig {
            max_message_size: Some(16),
            ..StoreConfig::default()
        });
        let store = &setup.store;
        let folder = inbox(store);
        let token = append(store, folder, &[b'x'; 100]);

        let mut stream = store
            .get_msg_input_stream(folder, &token.to_string(), None)
            .unwrap();
        let mut buf = Vec::new();
        let err = stream.read_to_end(&mut buf).unwrap_err();
        assert_matches!(Error::MessageTooLarge(16), Error::from(err));

        let mut stream = store
            .get_msg_input_stream(folder, &token.to_string(), Some(1000))
            .unwrap();
        buf.clear();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(102, buf.len());
    }

    const WITH_STATUS: &[u8] = b"Subject: x\r\n\
                                 X-Mozilla-Status: 0001\r\n\
                                 X-Mozilla-Status2: 00000000\r\n\
                                 X-Mozilla-Keys: a                   \r\n\
                                 \r\n\
                                 body\r\n";

    #[test]
    fn flag_rewrite_changes_only_status_bytes() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);
        let t1 = append(store, folder, WITH_STATUS);
        let t2 = append(store, folder, b"Subject: no status\r\n\r\n");
        let t3 = append(store, folder, WITH_STATUS);
        let path = store.mbox_path(folder).unwrap();
        let before = std::fs::read(&path).unwrap();

        let stamp = store
            .change_flags(
                folder,
                &[
                    MessageRef {
                        token: t3,
                        flags: MessageFlags::READ | MessageFlags::ELIDED,
                    },
                    MessageRef {
                        token: t2,
                        flags: MessageFlags::READ,
                    },
                    MessageRef {
                        token: t1,
                        flags: MessageFlags::READ | MessageFlags::NEW,
                    },
                ],
                MessageFlags::MARKED | MessageFlags::ATTACHMENT,
                true,
            )
            .unwrap();

        let after = std::fs::read(&path).unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(after.len() as u64, stamp.folder_size);
        assert!(stamp.valid);

        let differing = before
            .iter()
            .zip(after.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(ix, _)| ix)
            .collect::<Vec<_>>();
        assert!(!differing.is_empty());

        let status_value = |token: StoreToken, data: &[u8]| {
            let raw = &data[token.offset() as usize..];
            let found = locate_status_headers(raw).unwrap();
            (
                found.status.unwrap().get(raw).to_vec(),
                found.status2.unwrap().get(raw).to_vec(),
            )
        };
        for &ix in &differing {
            let in_t1 = ix >= t1.offset() as usize && ix < t2.offset() as usize;
            let in_t3 = ix >= t3.offset() as usize;
            assert!(in_t1 || in_t3, "byte {} changed", ix);
        }

        assert_eq!(
            (b"0005".to_vec(), b"10010000".to_vec()),
            status_value(t1, &after)
        );
        assert_eq!(
            (b"0005".to_vec(), b"10000000".to_vec()),
            status_value(t3, &after)
        );

        // Clearing works from the flags given, not what is on disk
        store
            .change_flags(
                folder,
                &[MessageRef {
                    token: t1,
                    flags: MessageFlags::READ | MessageFlags::MARKED,
                }],
                MessageFlags::READ,
                false,
            )
            .unwrap();
        assert_eq!(
            (b"0004".to_vec(), b"00000000".to_vec()),
            status_value(t1, &std::fs::read(&path).unwrap())
        );
        assert_eq!(
            b"Subject: no status\r\n\r\n".to_vec(),
            read(store, folder, t2)
        );
    }

    #[test]
    fn keyword_rewrite_within_reserve() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);
        let t1 = append(store, folder, WITH_STATUS);
        let t2 = append(store, folder, b"Subject: no keys\r\n\r\n");
        let path = store.mbox_path(folder).unwrap();
        let size = std::fs::metadata(&path).unwrap().len();

        let grow = store
            .change_keywords(folder, &[t2, t1], "work  $label1", true)
            .unwrap();
        assert_eq!(vec![t2], grow);

        let keys = |data: &[u8]| {
            let raw = &data[t1.offset() as usize..];
            let found = locate_status_headers(raw).unwrap();
            String::from_utf8(found.keys.unwrap().get(raw).to_vec()).unwrap()
        };
        assert_eq!(
            "a work $label1      ",
            keys(&std::fs::read(&path).unwrap())
        );

        let grow = store
            .change_keywords(folder, &[t1], "a $label1", false)
            .unwrap();
        assert!(grow.is_empty());
        assert_eq!(
            "work                ",
            keys(&std::fs::read(&path).unwrap())
        );

        let grow = store
            .change_keywords(folder, &[t1], "an-extremely-long-keyword", true)
            .unwrap();
        assert_eq!(vec![t1], grow);
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn keywords_fill_blank_reserve() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);

        let mut data = status_header_lines(MessageFlags::empty(), &[]);
        data.extend_from_slice(b"Subject: fresh\r\n\r\nbody\r\n");
        let token = append(store, folder, &data);
        let path = store.mbox_path(folder).unwrap();
        let size = std::fs::metadata(&path).unwrap().len();

        let keys = || {
            let data = std::fs::read(&path).unwrap();
            let raw = &data[token.offset() as usize..];
            let found = locate_status_headers(raw).unwrap();
            String::from_utf8(found.keys.unwrap().get(raw).to_vec()).unwrap()
        };
        assert_eq!(KEYWORD_RESERVE, keys().len());

        let grow = store
            .change_keywords(folder, &[token], "later $label2", true)
            .unwrap();
        assert!(grow.is_empty());
        assert!(keys().starts_with("later $label2 "));
        assert_eq!(KEYWORD_RESERVE, keys().len());

        // Emptied entirely, then refilled
        store
            .change_keywords(folder, &[token], "later $label2", false)
            .unwrap();
        assert_eq!(" ".repeat(KEYWORD_RESERVE), keys());
        let grow = store
            .change_keywords(folder, &[token], "again", true)
            .unwrap();
        assert!(grow.is_empty());
        assert!(keys().starts_with("again "));

        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(
            vec!["again".to_owned()],
            parse_headers(&read(store, folder, token)).keywords
        );
    }

    #[test]
    fn concurrent_readers() {
        let setup = set_up();
        let store = &setup.store;
        let folder = inbox(store);

        let messages = (0..32)
            .map(|i| {
                format!("Subject: {}\r\n\r\nFrom line {}\r\n", i, i)
                    .into_bytes()
            })
            .collect::<Vec<_>>();
        let tokens = messages
            .iter()
            .map(|m| append(store, folder, m))
            .collect::<Vec<_>>();

        (0..256usize).into_par_iter().for_each(|i| {
            let ix = (i * 7) % tokens.len();
            assert_eq!(messages[ix], read(store, folder, tokens[ix]));
        });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn stored_messages_round_trip(
            bodies in prop::collection::vec(
                "(>{0,3}(From )?[a-zA-Z ]{0,12}\r?\n){0,6}",
                1..5,
            ),
        ) {
            let setup = set_up();
            let store = &setup.store;
            let folder = inbox(store);

            let tokens = bodies
                .iter()
                .map(|body| append(store, folder, body.as_bytes()))
                .collect::<Vec<_>>();
            for (body, &token) in bodies.iter().zip(&tokens) {
                prop_assert_eq!(
                    body.as_bytes().to_vec(),
                    read(store, folder, token)
                );
            }
        }
    }
}
