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

use tiny_keccak::{Hasher, Sha3};

/// File names longer than this (in bytes) are shortened and suffixed with a
/// hash of the full name.
pub const MAX_FILE_NAME_LEN: usize = 55;

const HASH_SUFFIX_LEN: usize = 8;

/// Suffix of the directory holding a folder's children.
pub const SUBFOLDER_DIR_SUFFIX: &str = ".sbd";
/// Suffix of the summary file the index keeps next to each mbox.
pub const SUMMARY_FILE_SUFFIX: &str = ".msf";

/// Determine whether the given name can be used verbatim as a file name for
/// a folder.
///
/// This excludes empty names and patterns that cause directory traversal or
/// hidden files, as well as names that would collide with the `.sbd` and
/// `.msf` companions of another folder.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() &&
        // Block directory traversal through .. and creation of hidden files on
        // UNIX
        name.chars().next() != Some('.') &&
        name.find('/').is_none() &&
        name.find('\\').is_none() &&
        // Don't allow any ASCII control characters
        name.find(|c| c < ' ' || c == '\x7F').is_none() &&
        !name.ends_with(SUBFOLDER_DIR_SUFFIX) &&
        !name.ends_with(SUMMARY_FILE_SUFFIX) &&
        name.len() <= MAX_FILE_NAME_LEN
}

/// Derive the on-disk file name for a folder with the given display name.
///
/// Safe names are used as-is. Anything else has its problematic characters
/// replaced, is truncated, and gets a hash of the full name appended so that
/// distinct names stay distinct.
pub fn folder_file_name(name: &str) -> String {
    if is_safe_name(name) {
        return name.to_owned();
    }

    let mut file_name = String::new();
    for ch in name.chars() {
        if file_name.len() + ch.len_utf8()
            > MAX_FILE_NAME_LEN - HASH_SUFFIX_LEN - 1
        {
            break;
        }

        let ch = match ch {
            '/' | '\\' => '_',
            c if c < ' ' || c == '\x7F' => '_',
            '.' if file_name.is_empty() => '_',
            c => c,
        };
        file_name.push(ch);
    }

    let mut hasher = Sha3::v256();
    hasher.update(name.as_bytes());
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);

    file_name.push('-');
    for b in &hash[..HASH_SUFFIX_LEN / 2] {
        file_name.push_str(&format!("{:02x}", b));
    }
    file_name
}
