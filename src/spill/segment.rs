//! Spill Segment Files
//!
//! On-disk backing for the spill queue: append-only segment files holding
//! bincode-encoded records with optional LZ4 compression and per-record
//! checksums. Segments are transient; a fully drained segment is deleted.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{SeqNo, TableOp};

/// Magic bytes at the start of each segment file
const SEGMENT_MAGIC: &[u8; 8] = b"SSYSPILL";

/// Segment file version
const SEGMENT_VERSION: u32 = 1;

/// Header size in bytes: magic + version + entry count
const HEADER_SIZE: usize = 16;

/// One spilled transaction batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillRecord {
    /// Original seqno of the batch (kept for logging and diagnostics)
    pub seqno: SeqNo,
    /// The operations to replay
    pub ops: Vec<TableOp>,
}

/// A single spill segment file with a sequential read cursor
pub struct Segment {
    path: PathBuf,
    file: File,
    write_pos: u64,
    read_pos: u64,
    entry_count: u32,
    read_count: u32,
    max_entries: usize,
    compression: bool,
}

impl Segment {
    /// Create a fresh segment file, truncating anything already there
    pub fn create(path: PathBuf, max_entries: usize, compression: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut segment = Self {
            path,
            file,
            write_pos: HEADER_SIZE as u64,
            read_pos: HEADER_SIZE as u64,
            entry_count: 0,
            read_count: 0,
            max_entries,
            compression,
        };
        segment.write_header()?;

        Ok(segment)
    }

    /// Append a record; fails with `Error::Spill` when the segment is full
    pub fn append(&mut self, record: &SpillRecord) -> Result<()> {
        if self.is_full() {
            return Err(Error::Spill("segment full".into()));
        }

        let serialized = bincode::serialize(record)?;
        let data = if self.compression {
            lz4_flex::compress_prepend_size(&serialized)
        } else {
            serialized
        };

        // Record format: [length: u32][compressed: u8][data][checksum: u32]
        let checksum = crc32fast::hash(&data);

        self.file.seek(SeekFrom::Start(self.write_pos))?;
        self.file.write_all(&(data.len() as u32).to_le_bytes())?;
        self.file.write_all(&[self.compression as u8])?;
        self.file.write_all(&data)?;
        self.file.write_all(&checksum.to_le_bytes())?;

        self.write_pos += (4 + 1 + data.len() + 4) as u64;
        self.entry_count += 1;
        self.write_header()?;

        Ok(())
    }

    /// Read the next unread record, advancing the cursor
    pub fn read_next(&mut self) -> Result<Option<SpillRecord>> {
        if self.read_pos >= self.write_pos {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(self.read_pos))?;

        let mut len_bytes = [0u8; 4];
        self.file.read_exact(&mut len_bytes)?;
        let data_len = u32::from_le_bytes(len_bytes) as usize;

        let mut flag = [0u8; 1];
        self.file.read_exact(&mut flag)?;
        let is_compressed = flag[0] != 0;

        let mut data = vec![0u8; data_len];
        self.file.read_exact(&mut data)?;

        let mut checksum_bytes = [0u8; 4];
        self.file.read_exact(&mut checksum_bytes)?;
        if u32::from_le_bytes(checksum_bytes) != crc32fast::hash(&data) {
            return Err(Error::SpillCorrupted {
                segment: self.path.display().to_string(),
                reason: "checksum mismatch".into(),
            });
        }

        let serialized = if is_compressed {
            lz4_flex::decompress_size_prepended(&data).map_err(|e| Error::SpillCorrupted {
                segment: self.path.display().to_string(),
                reason: format!("decompression failed: {}", e),
            })?
        } else {
            data
        };

        let record: SpillRecord = bincode::deserialize(&serialized)?;

        self.read_pos += (4 + 1 + data_len + 4) as u64;
        self.read_count += 1;

        Ok(Some(record))
    }

    /// Whether the segment has reached its entry cap
    pub fn is_full(&self) -> bool {
        self.entry_count as usize >= self.max_entries
    }

    /// Records appended but not yet read
    pub fn unread(&self) -> usize {
        (self.entry_count - self.read_count) as usize
    }

    /// Whether every appended record has been read
    pub fn is_drained(&self) -> bool {
        self.read_count == self.entry_count
    }

    /// Delete the segment file
    pub fn remove(self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(SEGMENT_MAGIC);
        bytes[8..12].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.entry_count.to_le_bytes());

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }
}

/// List leftover segment files in a directory, sorted by name
pub fn list_segments(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut segments = Vec::new();

    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "seg")
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .map_or(false, |s| s.starts_with("spill_"))
        {
            segments.push(path);
        }
    }

    segments.sort();
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(seqno: SeqNo) -> SpillRecord {
        SpillRecord {
            seqno,
            ops: vec![TableOp::Write {
                table: "t1".to_string(),
                key: format!("k{}", seqno),
                value: vec![seqno as u8; 16],
            }],
        }
    }

    #[test]
    fn test_append_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spill_00000000.seg");
        let mut segment = Segment::create(path, 100, true).unwrap();

        for i in 0..10 {
            segment.append(&record(i)).unwrap();
        }
        assert_eq!(segment.unread(), 10);

        for i in 0..10 {
            let r = segment.read_next().unwrap().unwrap();
            assert_eq!(r, record(i));
        }
        assert!(segment.read_next().unwrap().is_none());
        assert!(segment.is_drained());
    }

    #[test]
    fn test_entry_cap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spill_00000000.seg");
        let mut segment = Segment::create(path, 2, false).unwrap();

        segment.append(&record(0)).unwrap();
        segment.append(&record(1)).unwrap();
        assert!(segment.is_full());
        assert!(matches!(
            segment.append(&record(2)),
            Err(Error::Spill(_))
        ));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spill_00000000.seg");
        let mut segment = Segment::create(path.clone(), 100, false).unwrap();
        segment.append(&record(0)).unwrap();
        drop(segment);

        // Flip a byte inside the record payload
        let mut bytes = std::fs::read(&path).unwrap();
        let target = HEADER_SIZE + 4 + 1 + 2;
        bytes[target] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut segment = Segment {
            path: path.clone(),
            file,
            write_pos: bytes.len() as u64,
            read_pos: HEADER_SIZE as u64,
            entry_count: 1,
            read_count: 0,
            max_entries: 100,
            compression: false,
        };
        assert!(matches!(
            segment.read_next(),
            Err(Error::SpillCorrupted { .. })
        ));
    }

    #[test]
    fn test_list_segments() {
        let dir = tempdir().unwrap();
        Segment::create(dir.path().join("spill_00000001.seg"), 10, false).unwrap();
        Segment::create(dir.path().join("spill_00000000.seg"), 10, false).unwrap();
        std::fs::write(dir.path().join("other.txt"), b"x").unwrap();

        let found = list_segments(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("spill_00000000.seg"));
    }
}
