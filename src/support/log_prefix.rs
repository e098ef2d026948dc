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

use std::fmt;
use std::sync::{Arc, Mutex};

/// Text included at the start of every log statement about a store.
///
/// Clones of a `LogPrefix` share the same underlying data; background tasks
/// take a `deep_clone()` so that they can name themselves without affecting
/// the store's own prefix.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    store: String,
    task: Option<String>,
    folder: Option<String>,
}

impl LogPrefix {
    pub fn new(store: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                store: sanitise(store),
                task: None,
                folder: None,
            })),
        }
    }

    pub fn deep_clone(&self) -> Self {
        let inner = self.inner.lock().unwrap();
        Self {
            inner: Arc::new(Mutex::new(Inner::clone(&inner))),
        }
    }

    pub fn set_task(&self, task: &str) {
        self.inner.lock().unwrap().task = Some(sanitise(task.to_owned()));
    }

    pub fn set_folder(&self, folder: &str) {
        self.inner.lock().unwrap().folder = Some(sanitise(folder.to_owned()));
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.store)?;
        match (&inner.task, &inner.folder) {
            (None, None) => (),
            (Some(task), None) => write!(f, "[{}]", task)?,
            (None, Some(folder)) => write!(f, "[{}]", folder)?,
            (Some(task), Some(folder)) => write!(f, "[{} {}]", task, folder)?,
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}
