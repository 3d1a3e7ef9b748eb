//! Append-only usage log.
//!
//! Entries are framed as `[u32 len][bincode UsageRecord][u32 crc32]`, little
//! endian. Opening the log scans it once, keeps every entry up to the first
//! frame that does not check out, and cuts the file back to that point so new
//! entries always follow valid data.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::UsageRecord;

const LEN_BYTES: usize = 4;
const CRC_BYTES: usize = 4;

fn frame(record: &UsageRecord, out: &mut Vec<u8>) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "usage record too large"))?;
    out.reserve(LEN_BYTES + payload.len() + CRC_BYTES);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// Decode the frame at the head of `buf`, returning the record and the
/// frame's size. `None` for a short, corrupt or undecodable frame. The length
/// prefix is only trusted as far as `buf` actually reaches.
fn unframe(buf: &[u8]) -> Option<(UsageRecord, usize)> {
    let len = u32::from_le_bytes(buf.get(..LEN_BYTES)?.try_into().ok()?) as usize;
    let end = LEN_BYTES.checked_add(len)?.checked_add(CRC_BYTES)?;
    let body = buf.get(LEN_BYTES..end)?;
    let (payload, crc) = body.split_at(len);
    if u32::from_le_bytes(crc.try_into().ok()?) != crc32fast::hash(payload) {
        return None;
    }
    let record = bincode::deserialize(payload).ok()?;
    Some((record, end))
}

/// Every intact record in `bytes`, plus the offset just past the last one.
fn scan(bytes: &[u8]) -> (Vec<UsageRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;
    while let Some((record, size)) = unframe(&bytes[offset..]) {
        records.push(record);
        offset += size;
    }
    (records, offset)
}

fn read_if_exists(path: &Path) -> io::Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub struct Wal {
    file: File,
    path: PathBuf,
    /// Frames waiting for the next `commit`.
    staged: Vec<u8>,
    staged_records: u64,
    /// File length covered by successful commits.
    committed: u64,
    appends: u64,
}

impl Wal {
    /// Open (or create) the log at `path` and return the records it holds.
    /// A torn or corrupt tail is truncated away and the truncation is synced
    /// before the handle is returned.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<UsageRecord>)> {
        let bytes = read_if_exists(path)?;
        let (records, valid_len) = scan(&bytes);

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if valid_len < bytes.len() {
            warn!(
                "usage log {}: dropping {} unreadable trailing byte(s) after {} record(s)",
                path.display(),
                bytes.len() - valid_len,
                records.len()
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                staged: Vec::new(),
                staged_records: 0,
                committed: valid_len as u64,
                appends: 0,
            },
            records,
        ))
    }

    /// Read the intact records at `path` without touching the file.
    pub fn replay(path: &Path) -> io::Result<Vec<UsageRecord>> {
        Ok(scan(&read_if_exists(path)?).0)
    }

    /// Frame `record` into the pending batch. Nothing reaches the file until `commit`.
    pub fn stage(&mut self, record: &UsageRecord) -> io::Result<()> {
        frame(record, &mut self.staged)?;
        self.staged_records += 1;
        Ok(())
    }

    /// Write the pending batch and fsync it. If the write or sync fails the
    /// file is cut back to the previous commit, so a partial batch can never
    /// sit in front of later entries.
    pub fn commit(&mut self) -> io::Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let result = self
            .file
            .write_all(&self.staged)
            .and_then(|()| self.file.sync_data());
        let batch_len = self.staged.len() as u64;
        let batch_records = self.staged_records;
        self.staged.clear();
        self.staged_records = 0;

        match result {
            Ok(()) => {
                self.committed += batch_len;
                self.appends += batch_records;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.file.set_len(self.committed) {
                    warn!("usage log {}: could not discard failed batch: {cut}", self.path.display());
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &UsageRecord) -> io::Result<()> {
        self.stage(record)?;
        self.commit()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records committed through this handle since it was opened.
    pub fn appends(&self) -> u64 {
        self.appends
    }
}
