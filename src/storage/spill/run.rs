//! Immutable sorted run files written when the in-memory table overflows.
//!
//! ```text
//! Header:  magic "MBSR" (4) | version u16 LE (2)
//! Record:  crc32 u32 LE (4) | key_len u32 LE (4) | val_len u32 LE (4) | key | value
//!          val_len == u32::MAX marks a tombstone and carries no value bytes
//! ```
//!
//! The crc covers both length fields, the key and the value. A sparse index (key of every
//! `index_interval`-th record and its offset) stays in memory and is used to seek to a prefix.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::StoreError;

pub(super) const RUN_MAGIC: &[u8; 4] = b"MBSR";
pub(super) const RUN_VERSION: u16 = 1;
pub(super) const HEADER_SIZE: u64 = 6;
pub(super) const TOMBSTONE_MARKER: u32 = u32::MAX;
const RECORD_HEADER_SIZE: usize = 12;
const MAX_KEY_LEN: u32 = u32::MAX;
// The marker value itself is reserved, so a stored value is one byte shorter at most.
const MAX_VALUE_LEN: u32 = TOMBSTONE_MARKER - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Slot {
    Put(Vec<u8>),
    Tombstone,
}

impl Slot {
    pub(super) fn value_len(&self) -> usize {
        match self {
            Slot::Put(v) => v.len(),
            Slot::Tombstone => 0,
        }
    }
}

pub(super) type SlotIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Slot), StoreError>> + 'a>;

#[derive(Debug)]
pub(super) struct SpillRun {
    path: PathBuf,
    entries: usize,
    bytes: u64,
    index: Vec<(Vec<u8>, u64)>,
}

impl SpillRun {
    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn entries(&self) -> usize {
        self.entries
    }

    pub(super) fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Iterates the records whose key starts with `prefix`.
    pub(super) fn scan(&self, prefix: &[u8]) -> Result<RunReader, StoreError> {
        let mut file = File::open(&self.path)?;
        let end = file.metadata()?.len();

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|e| self.corrupted(format!("unreadable header: {e}")))?;
        if &header[..4] != RUN_MAGIC {
            return Err(self.corrupted("bad magic".to_string()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != RUN_VERSION {
            return Err(self.corrupted(format!("unsupported version {version}")));
        }

        let idx = self.index.partition_point(|(k, _)| k.as_slice() <= prefix);
        let start = if idx == 0 { HEADER_SIZE } else { self.index[idx - 1].1 };
        file.seek(SeekFrom::Start(start))?;

        Ok(RunReader {
            path: self.path.clone(),
            reader: BufReader::new(file),
            pos: start,
            end,
            prefix: prefix.to_vec(),
            done: false,
        })
    }

    pub(super) fn delete(self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn corrupted(&self, reason: String) -> StoreError {
        StoreError::Corrupted { path: self.path.clone(), reason }
    }
}

pub(super) struct RunWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    entries: usize,
    index: Vec<(Vec<u8>, u64)>,
    index_interval: usize,
    last_key: Option<Vec<u8>>,
}

impl RunWriter {
    pub(super) fn create(path: PathBuf, index_interval: usize) -> Result<Self, StoreError> {
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(RUN_MAGIC)?;
        writer.write_all(&RUN_VERSION.to_le_bytes())?;
        Ok(Self {
            path,
            writer,
            offset: HEADER_SIZE,
            entries: 0,
            index: Vec::new(),
            index_interval: index_interval.max(1),
            last_key: None,
        })
    }

    /// Appends one record. Keys must arrive in strictly ascending order.
    pub(super) fn append(&mut self, key: &[u8], slot: &Slot) -> Result<(), StoreError> {
        if let Some(last) = &self.last_key {
            if last.as_slice() >= key {
                return Err(StoreError::Corrupted {
                    path: self.path.clone(),
                    reason: "keys appended out of order".to_string(),
                });
            }
        }
        let key_len = length_field(key.len(), MAX_KEY_LEN, "key")?;
        let (val_len, value): (u32, &[u8]) = match slot {
            Slot::Put(v) => (length_field(v.len(), MAX_VALUE_LEN, "value")?, v.as_slice()),
            Slot::Tombstone => (TOMBSTONE_MARKER, &[]),
        };
        if self.entries % self.index_interval == 0 {
            self.index.push((key.to_vec(), self.offset));
        }

        let crc = record_crc(key_len, val_len, key, value);

        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&key_len.to_le_bytes())?;
        self.writer.write_all(&val_len.to_le_bytes())?;
        self.writer.write_all(key)?;
        self.writer.write_all(value)?;

        self.offset += (RECORD_HEADER_SIZE + key.len() + value.len()) as u64;
        self.entries += 1;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    pub(super) fn finish(mut self) -> Result<SpillRun, StoreError> {
        self.writer.flush()?;
        Ok(SpillRun {
            path: self.path,
            entries: self.entries,
            bytes: self.offset,
            index: self.index,
        })
    }
}

fn length_field(len: usize, max: u32, what: &'static str) -> Result<u32, StoreError> {
    match u32::try_from(len) {
        Ok(n) if n <= max => Ok(n),
        _ => Err(StoreError::RecordTooLarge { what, len }),
    }
}

fn record_crc(key_len: u32, val_len: u32, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&key_len.to_le_bytes());
    hasher.update(&val_len.to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

pub(super) struct RunReader {
    path: PathBuf,
    reader: BufReader<File>,
    pos: u64,
    end: u64,
    prefix: Vec<u8>,
    done: bool,
}

impl RunReader {
    fn read_record(&mut self) -> Result<(Vec<u8>, Slot), StoreError> {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        self.reader.read_exact(&mut header).map_err(|e| self.truncated(e))?;
        let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let key_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let val_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let remaining = self.end.saturating_sub(self.pos + RECORD_HEADER_SIZE as u64);
        let body_len = key_len as u64 + if val_len == TOMBSTONE_MARKER { 0 } else { val_len as u64 };
        if body_len > remaining {
            return Err(StoreError::Corrupted {
                path: self.path.clone(),
                reason: format!("record of {body_len} bytes at offset {} overruns file", self.pos),
            });
        }

        let mut key = vec![0u8; key_len as usize];
        self.reader.read_exact(&mut key).map_err(|e| self.truncated(e))?;
        let slot = if val_len == TOMBSTONE_MARKER {
            Slot::Tombstone
        } else {
            let mut value = vec![0u8; val_len as usize];
            self.reader.read_exact(&mut value).map_err(|e| self.truncated(e))?;
            Slot::Put(value)
        };

        let actual = match &slot {
            Slot::Put(v) => record_crc(key_len, val_len, &key, v),
            Slot::Tombstone => record_crc(key_len, val_len, &key, &[]),
        };
        if actual != crc {
            return Err(StoreError::Corrupted {
                path: self.path.clone(),
                reason: format!("checksum mismatch at offset {}", self.pos),
            });
        }

        self.pos += RECORD_HEADER_SIZE as u64 + body_len;
        Ok((key, slot))
    }

    fn truncated(&self, e: std::io::Error) -> StoreError {
        StoreError::Corrupted {
            path: self.path.clone(),
            reason: format!("truncated record at offset {}: {e}", self.pos),
        }
    }
}

impl Iterator for RunReader {
    type Item = Result<(Vec<u8>, Slot), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.pos < self.end {
            match self.read_record() {
                Ok((key, slot)) => {
                    if key.as_slice() < self.prefix.as_slice() {
                        continue;
                    }
                    if key.starts_with(&self.prefix) {
                        return Some(Ok((key, slot)));
                    }
                    self.done = true;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_run(dir: &Path, entries: &[(&[u8], Slot)], interval: usize) -> SpillRun {
        let mut writer = RunWriter::create(dir.join("run.spill"), interval).unwrap();
        for (k, s) in entries {
            writer.append(k, s).unwrap();
        }
        writer.finish().unwrap()
    }

    fn collect(run: &SpillRun, prefix: &[u8]) -> Vec<(Vec<u8>, Slot)> {
        run.scan(prefix).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn scan_seeks_to_prefix_through_sparse_index() {
        let dir = tempdir().unwrap();
        let keys: Vec<Vec<u8>> = (0..50u8).map(|i| vec![b'k', i / 10, i % 10]).collect();
        let entries: Vec<(&[u8], Slot)> =
            keys.iter().map(|k| (k.as_slice(), Slot::Put(vec![k[1], k[2]]))).collect();
        let run = write_run(dir.path(), &entries, 4);
        assert_eq!(run.entries(), 50);

        let got = collect(&run, &[b'k', 3]);
        assert_eq!(got.len(), 10);
        assert_eq!(got[0].0, vec![b'k', 3, 0]);
        assert_eq!(got[9].1, Slot::Put(vec![3, 9]));
        assert_eq!(collect(&run, b"k").len(), 50);
        assert!(collect(&run, b"z").is_empty());
        assert!(collect(&run, b"a").is_empty());
    }

    #[test]
    fn tombstones_roundtrip() {
        let dir = tempdir().unwrap();
        let run = write_run(dir.path(), &[(&b"a"[..], Slot::Tombstone), (&b"b"[..], Slot::Put(vec![]))], 1);
        assert_eq!(collect(&run, b""), vec![(b"a".to_vec(), Slot::Tombstone), (b"b".to_vec(), Slot::Put(vec![]))]);
    }

    #[test]
    fn out_of_order_append_is_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = RunWriter::create(dir.path().join("run.spill"), 1).unwrap();
        writer.append(b"b", &Slot::Tombstone).unwrap();
        assert!(writer.append(b"a", &Slot::Tombstone).is_err());
    }

    #[test]
    fn length_fields_stay_clear_of_the_tombstone_marker() {
        assert_eq!(length_field(0, MAX_VALUE_LEN, "value").unwrap(), 0);
        assert_eq!(length_field(u32::MAX as usize - 1, MAX_VALUE_LEN, "value").unwrap(), TOMBSTONE_MARKER - 1);
        assert!(matches!(
            length_field(u32::MAX as usize, MAX_VALUE_LEN, "value"),
            Err(StoreError::RecordTooLarge { what: "value", .. })
        ));
        assert_eq!(length_field(u32::MAX as usize, MAX_KEY_LEN, "key").unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            length_field(u32::MAX as usize + 1, MAX_KEY_LEN, "key"),
            Err(StoreError::RecordTooLarge { what: "key", .. })
        ));
    }

    #[test]
    fn flipped_byte_is_detected() {
        let dir = tempdir().unwrap();
        let run = write_run(dir.path(), &[(&b"key"[..], Slot::Put(b"value".to_vec()))], 1);
        let mut bytes = fs::read(run.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(run.path(), bytes).unwrap();

        let results: Vec<_> = run.scan(b"").unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(StoreError::Corrupted { .. })));
    }

    #[test]
    fn truncated_file_is_detected() {
        let dir = tempdir().unwrap();
        let run = write_run(dir.path(), &[(&b"key"[..], Slot::Put(b"value".to_vec()))], 1);
        let bytes = fs::read(run.path()).unwrap();
        fs::write(run.path(), &bytes[..bytes.len() - 2]).unwrap();
        let results: Vec<_> = run.scan(b"").unwrap().collect();
        assert!(matches!(results.as_slice(), [Err(StoreError::Corrupted { .. })]));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let run = write_run(dir.path(), &[(&b"key"[..], Slot::Tombstone)], 1);
        let mut bytes = fs::read(run.path()).unwrap();
        bytes[0] = b'X';
        fs::write(run.path(), bytes).unwrap();
        assert!(matches!(run.scan(b""), Err(StoreError::Corrupted { .. })));
    }
}
