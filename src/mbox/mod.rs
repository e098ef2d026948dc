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


//! The mbox file format.
//!
//! Messages are stored back to back, each introduced by an envelope line
//! starting with `From ` and followed by a blank separator line. Body lines
//! that would otherwise look like an envelope line (including ones already
//! quoted with `>`) gain an extra leading `>`, following the `mboxrd`
//! convention, so that the transformation is reversible.

pub mod envelope;
pub mod escape;
pub mod input;
pub mod output;
pub mod status;
