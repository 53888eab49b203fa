//! Line-aligned partitioning of the input file.

use anyhow::{Context, Result};
use memchr::memchr_iter;
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// Half-open byte range `[start, end)` of the input handled by one map job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Partition {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Splits the file at `path` into at most `map_parallelism` partitions.
///
/// Boundaries always fall right after a `\n`, every partition holds at least
/// one line and together they cover the file exactly once. An empty file
/// yields no partitions.
pub fn split_file(path: impl AsRef<Path>, map_parallelism: usize) -> Result<Vec<Partition>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("metadata {}", path.display()))?
        .len();
    if size == 0 {
        return Ok(Vec::new());
    }
    // Mapping is read-only; concurrent truncation of the input is not supported.
    let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?;
    Ok(split_bytes(&map[..], map_parallelism))
}

/// Partitions an in-memory buffer with the same rules as [`split_file`].
pub fn split_bytes(bytes: &[u8], map_parallelism: usize) -> Vec<Partition> {
    let size = bytes.len() as u64;
    let line_ends = line_ends(bytes);
    let num_lines = line_ends.len();
    let parts = map_parallelism.min(num_lines);
    if parts == 0 {
        return Vec::new();
    }

    let target = (size / parts as u64).max(1);
    let mut partitions = Vec::with_capacity(parts);
    let mut start = 0u64;
    let mut lines_taken = 0usize;
    for i in 1..parts {
        let candidate = (i as u64 * target).max(start);
        // First line whose terminator sits at or after the candidate offset.
        let scanned = line_ends.partition_point(|&end| end <= candidate) + 1;
        let lines_until = scanned.clamp(lines_taken + 1, num_lines - (parts - i));
        let end = line_ends[lines_until - 1];
        partitions.push(Partition {
            index: partitions.len(),
            start,
            end,
        });
        start = end;
        lines_taken = lines_until;
    }
    partitions.push(Partition {
        index: partitions.len(),
        start,
        end: size,
    });
    partitions
}

/// Offsets just past each line terminator, plus the end of a final unterminated line.
fn line_ends(bytes: &[u8]) -> Vec<u64> {
    let mut ends: Vec<u64> = memchr_iter(b'\n', bytes).map(|i| i as u64 + 1).collect();
    let size = bytes.len() as u64;
    if ends.last().copied().unwrap_or(0) < size {
        ends.push(size);
    }
    ends
}
