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

//! # The disk store (C1)
//!
//! One directory per database, one file per resident-on-disk key, named
//! by the key's hex encoding (§4.1). A record is written to a sibling
//! `.tmp` file and `rename`d into place so a crash never leaves a
//! half-written key on disk — the same write-temp-then-rename discipline a
//! background snapshot uses before swapping a new snapshot file into place.
//!
//! Record layout (all integers little-endian):
//! `MAGIC(4) key_len(u32) key value_len(u32) value expires_at(i64, -1 = none) crc(u64)`
//! the crc covers every byte preceding it.

pub mod checksum;

use crate::{
    keyval::Key,
    util::error::{DscResult, Error},
};
use checksum::RecordCrc;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

const MAGIC: &[u8; 4] = b"DSC1";
const NO_EXPIRY: i64 = -1;

/// A record read back from disk: the raw payload and its expiry deadline.
#[derive(Debug, Clone)]
pub struct DiskRecord {
    pub value: Vec<u8>,
    pub expires_at: Option<i64>,
}

/// The on-disk half of the cache. Every call is a blocking filesystem
/// operation — callers run these from I/O worker threads (C5), never from
/// the engine's main thread.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn open(root: impl Into<PathBuf>) -> DscResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::io_extra(e, format!("creating disk store root {root:?}"))
        })?;
        Ok(Self { root })
    }

    fn db_dir(&self, db: u16) -> PathBuf {
        self.root.join(format!("db{db}"))
    }

    fn key_path(&self, db: u16, key: &Key) -> PathBuf {
        self.db_dir(db).join(key.to_hex())
    }

    fn ensure_db_dir(&self, db: u16) -> DscResult<PathBuf> {
        let dir = self.db_dir(db);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io_extra(e, format!("creating db directory {dir:?}")))?;
        Ok(dir)
    }

    /// Load a key's record. Returns `Ok(None)` when no file exists for the
    /// key (§4.1 `dsGet` miss), corruption surfaces as
    /// [`Error::Corrupt`] rather than panicking the worker.
    pub fn get(&self, db: u16, key: &Key) -> DscResult<Option<DiskRecord>> {
        let path = self.key_path(db, key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io_extra(e, format!("reading {path:?}"))),
        };
        decode_record(&bytes)
            .map(Some)
            .map_err(|msg| Error::Corrupt(format!("{path:?}: {msg}")))
    }

    /// Persist a key, replacing whatever was there before. Writes to a
    /// temp file in the same directory (so the rename is same-filesystem
    /// and therefore atomic) then renames over the final path.
    pub fn set(
        &self,
        db: u16,
        key: &Key,
        value: &[u8],
        expires_at: Option<i64>,
    ) -> DscResult<()> {
        let dir = self.ensure_db_dir(db)?;
        let final_path = dir.join(key.to_hex());
        let tmp_path = dir.join(format!("{}.tmp", key.to_hex()));

        let record = encode_record(key, value, expires_at);
        {
            let mut f = fs::File::create(&tmp_path)
                .map_err(|e| Error::io_extra(e, format!("creating {tmp_path:?}")))?;
            f.write_all(&record)
                .map_err(|e| Error::io_extra(e, format!("writing {tmp_path:?}")))?;
            f.sync_all()
                .map_err(|e| Error::io_extra(e, format!("fsync {tmp_path:?}")))?;
        }
        fs::rename(&tmp_path, &final_path).map_err(|e| {
            Error::io_extra(e, format!("renaming {tmp_path:?} -> {final_path:?}"))
        })?;
        Ok(())
    }

    /// Remove a key's on-disk record. Missing files are not an error: a
    /// DEL racing an unflushed LOAD is a no-op, not a failure.
    pub fn del(&self, db: u16, key: &Key) -> DscResult<()> {
        let path = self.key_path(db, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_extra(e, format!("removing {path:?}"))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn encode_record(key: &Key, value: &[u8], expires_at: Option<i64>) -> Vec<u8> {
    let key_bytes = key.as_bytes();
    let mut buf = Vec::with_capacity(4 + 4 + key_bytes.len() + 4 + value.len() + 8 + 8);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    buf.extend_from_slice(&expires_at.unwrap_or(NO_EXPIRY).to_le_bytes());

    let mut crc = RecordCrc::new();
    crc.update(&buf);
    buf.extend_from_slice(&crc.finish().to_le_bytes());
    buf
}

fn decode_record(bytes: &[u8]) -> Result<DiskRecord, String> {
    if bytes.len() < 4 + 4 + 4 + 8 + 8 {
        return Err("record too short".into());
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 8);
    let stored_crc = u64::from_le_bytes(crc_bytes.try_into().unwrap());
    let mut crc = RecordCrc::new();
    crc.update(body);
    if crc.finish() != stored_crc {
        return Err("checksum mismatch".into());
    }

    let mut cursor = body;
    let magic = take(&mut cursor, 4)?;
    if magic != MAGIC {
        return Err("bad magic".into());
    }
    let key_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
    let _key = take(&mut cursor, key_len)?;
    let value_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
    let value = take(&mut cursor, value_len)?.to_vec();
    let expires_raw = i64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap());
    if !cursor.is_empty() {
        return Err("trailing bytes after record".into());
    }
    let expires_at = if expires_raw == NO_EXPIRY {
        None
    } else {
        Some(expires_raw)
    };
    Ok(DiskRecord { value, expires_at })
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8], String> {
    if cursor.len() < n {
        return Err("truncated record".into());
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (_dir, store) = store();
        let key = Key::from("greeting");
        store.set(0, &key, b"hello world", Some(42)).unwrap();
        let rec = store.get(0, &key).unwrap().unwrap();
        assert_eq!(rec.value, b"hello world");
        assert_eq!(rec.expires_at, Some(42));
    }

    #[test]
    fn missing_key_is_none() {
        let (_dir, store) = store();
        assert!(store.get(0, &Key::from("nope")).unwrap().is_none());
    }

    #[test]
    fn del_is_idempotent() {
        let (_dir, store) = store();
        let key = Key::from("k");
        store.set(0, &key, b"v", None).unwrap();
        store.del(0, &key).unwrap();
        assert!(store.get(0, &key).unwrap().is_none());
        store.del(0, &key).unwrap();
    }

    #[test]
    fn corrupted_record_is_reported() {
        let (_dir, store) = store();
        let key = Key::from("k");
        store.set(0, &key, b"v", None).unwrap();
        let path = store.key_path(0, &key);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        match store.get(0, &key) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn separate_databases_do_not_collide() {
        let (_dir, store) = store();
        let key = Key::from("shared");
        store.set(0, &key, b"db0", None).unwrap();
        store.set(1, &key, b"db1", None).unwrap();
        assert_eq!(store.get(0, &key).unwrap().unwrap().value, b"db0");
        assert_eq!(store.get(1, &key).unwrap().unwrap().value, b"db1");
    }
}
