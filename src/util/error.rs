/*
 * This file is a part of dscached, a disk-store object cache core
 * derived in the spirit of Skytable (https://github.com/skytable/skytable).
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Crate-wide error type

use std::{fmt, io::Error as IoError};

pub type DscResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// an I/O error bubbled up from the disk store or the data directory lock
    Io(IoError),
    Io2(IoError, String),
    /// a record on disk failed its checksum
    Corrupt(String),
    /// a worker hit an unrecoverable disk failure; the engine is now read-only
    Fatal(String),
    /// the configuration file or environment was invalid
    Config(String),
}

impl Error {
    pub fn io_extra(ioe: IoError, extra: impl ToString) -> Self {
        Self::Io2(ioe, extra.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Io2(e, extra) => write!(f, "I/O error while {extra}: {e}"),
            Self::Corrupt(msg) => write!(f, "corrupt record: {msg}"),
            Self::Fatal(msg) => write!(f, "fatal disk store error: {msg}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(ioe: IoError) -> Self {
        Self::Io(ioe)
    }
}
