//! Spill Queue Module
//!
//! Bounded FIFO that holds real-time transaction batches while historical
//! data is still being copied. Memory-only by default; optionally backed
//! by on-disk segments for large bootstraps. Durability is not required:
//! a fresh queue discards any leftovers from a previous run.

mod segment;

pub use segment::SpillRecord;

use std::collections::VecDeque;
use std::path::PathBuf;

use segment::Segment;

use crate::error::{Error, Result};

/// Spill queue options
#[derive(Debug, Clone)]
pub struct SpillOptions {
    /// Keep everything in memory (no disk segments)
    pub mem_only: bool,
    /// Directory for on-disk segments (already shard-specific)
    pub dir: PathBuf,
    /// Entries per segment before rotation
    pub max_segment_entries: usize,
    /// LZ4-compress spilled records
    pub compression: bool,
}

impl Default for SpillOptions {
    fn default() -> Self {
        Self {
            mem_only: true,
            dir: PathBuf::from("/tmp/rlog"),
            max_segment_entries: 4096,
            compression: true,
        }
    }
}

/// Acknowledgement token returned by `pop`
///
/// Pops must be acknowledged in order; the token pins the pop it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRef(u64);

enum Backing {
    Mem(VecDeque<SpillRecord>),
    Disk(DiskQueue),
}

struct DiskQueue {
    dir: PathBuf,
    segments: VecDeque<Segment>,
    next_segment_id: u64,
    max_segment_entries: usize,
    compression: bool,
}

impl DiskQueue {
    fn open(opts: &SpillOptions) -> Result<Self> {
        std::fs::create_dir_all(&opts.dir)?;

        // Leftovers from a previous run are stale by definition
        for stale in segment::list_segments(&opts.dir)? {
            tracing::debug!("discarding stale spill segment {}", stale.display());
            std::fs::remove_file(&stale)?;
        }

        Ok(Self {
            dir: opts.dir.clone(),
            segments: VecDeque::new(),
            next_segment_id: 0,
            max_segment_entries: opts.max_segment_entries,
            compression: opts.compression,
        })
    }

    fn append(&mut self, record: &SpillRecord) -> Result<()> {
        let needs_rotation = self
            .segments
            .back()
            .map(|s| s.is_full())
            .unwrap_or(true);

        if needs_rotation {
            let path = self
                .dir
                .join(format!("spill_{:08}.seg", self.next_segment_id));
            self.next_segment_id += 1;
            self.segments.push_back(Segment::create(
                path,
                self.max_segment_entries,
                self.compression,
            )?);
        }

        self.segments
            .back_mut()
            .ok_or_else(|| Error::Spill("no active segment".into()))?
            .append(record)
    }

    fn pop(&mut self) -> Result<Option<SpillRecord>> {
        loop {
            let Some(front) = self.segments.front_mut() else {
                return Ok(None);
            };

            if let Some(record) = front.read_next()? {
                return Ok(Some(record));
            }

            // Front segment is drained; if it is also no longer the write
            // target, retire it and move on.
            if self.segments.len() > 1 {
                if let Some(done) = self.segments.pop_front() {
                    done.remove()?;
                }
                continue;
            }

            return Ok(None);
        }
    }

    fn unread(&self) -> usize {
        self.segments.iter().map(|s| s.unread()).sum()
    }

    fn close(mut self) -> Result<()> {
        while let Some(segment) = self.segments.pop_front() {
            segment.remove()?;
        }
        Ok(())
    }
}

/// Append-only FIFO for spilled transaction batches
pub struct SpillQueue {
    backing: Backing,
    popped: u64,
    acked: u64,
}

impl SpillQueue {
    /// Open a fresh queue
    pub fn open(opts: &SpillOptions) -> Result<Self> {
        let backing = if opts.mem_only {
            Backing::Mem(VecDeque::new())
        } else {
            Backing::Disk(DiskQueue::open(opts)?)
        };

        Ok(Self {
            backing,
            popped: 0,
            acked: 0,
        })
    }

    /// Append a record at the tail
    pub fn append(&mut self, record: SpillRecord) -> Result<()> {
        match &mut self.backing {
            Backing::Mem(queue) => {
                queue.push_back(record);
                Ok(())
            }
            Backing::Disk(disk) => disk.append(&record),
        }
    }

    /// Pop the oldest record, if any, along with its ack token
    pub fn pop(&mut self) -> Result<Option<(SpillRecord, AckRef)>> {
        let record = match &mut self.backing {
            Backing::Mem(queue) => queue.pop_front(),
            Backing::Disk(disk) => disk.pop()?,
        };

        Ok(record.map(|r| {
            let ack = AckRef(self.popped);
            self.popped += 1;
            (r, ack)
        }))
    }

    /// Acknowledge a pop; acks must arrive in pop order
    pub fn ack(&mut self, ack: AckRef) -> Result<()> {
        if ack.0 != self.acked {
            return Err(Error::Spill(format!(
                "out-of-order ack: expected {}, got {}",
                self.acked, ack.0
            )));
        }
        self.acked += 1;
        Ok(())
    }

    /// Records appended but not yet popped
    pub fn count(&self) -> usize {
        match &self.backing {
            Backing::Mem(queue) => queue.len(),
            Backing::Disk(disk) => disk.unread(),
        }
    }

    /// Whether every appended record has been popped
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Close the queue, deleting any on-disk segments
    pub fn close(self) -> Result<()> {
        match self.backing {
            Backing::Mem(_) => Ok(()),
            Backing::Disk(disk) => disk.close(),
        }
    }
}
