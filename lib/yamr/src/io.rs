use crate::split::Partition;
use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Display;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

/// Deterministic bucket for a key: SipHash with fixed keys over the key bytes.
pub fn hash_to_partition(key: &[u8], num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(key);
    (hasher.finish() % num_partitions as u64) as usize
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        ensure_dir(parent)?;
    }
    let file = File::create(path.as_ref()).with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

pub fn open_reader(path: impl AsRef<Path>) -> Result<BufReader<File>> {
    let file = File::open(path.as_ref()).with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(BufReader::new(file))
}

pub fn artifact_path(output_dir: impl AsRef<Path>, bucket: usize) -> PathBuf {
    output_dir.as_ref().join(format!("result_{}.txt", bucket))
}

/// Writes `value` followed by a newline to `path`, replacing any previous content.
pub fn write_artifact<T: Display>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let mut writer = open_writer(path.as_ref())?;
    writeln!(writer, "{}", value).with_context(|| format!("write {}", path.as_ref().display()))?;
    writer.flush().with_context(|| format!("flush {}", path.as_ref().display()))?;
    Ok(())
}

/// Counters for one pass over a partition.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineScan {
    pub lines: u64,
    pub empty: u64,
    /// Lines that were not valid UTF-8 and were decoded lossily.
    pub lossy: u64,
    pub bytes: u64,
}

/// Calls `on_line` for every non-empty line inside `partition`.
///
/// Opens its own handle on `path`, so partitions can be scanned concurrently.
/// Line terminators (`\n`, `\r\n`) are stripped. Lines that are not UTF-8
/// are decoded lossily (invalid sequences become U+FFFD) and counted.
pub fn for_each_line_in<F>(path: impl AsRef<Path>, partition: &Partition, mut on_line: F) -> Result<LineScan>
where
    F: FnMut(&str) -> Result<()>,
{
    let path = path.as_ref();
    let mut reader = open_reader(path)?;
    reader
        .seek(SeekFrom::Start(partition.start))
        .with_context(|| format!("seek {} to {}", path.display(), partition.start))?;

    let mut scan = LineScan::default();
    let mut offset = partition.start;
    let mut buf = Vec::with_capacity(256);
    while offset < partition.end {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("read {} at {}", path.display(), offset))?;
        if n == 0 {
            break;
        }
        offset += n as u64;
        scan.bytes += n as u64;
        scan.lines += 1;

        let mut line = &buf[..];
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.is_empty() {
            scan.empty += 1;
            continue;
        }
        let text = String::from_utf8_lossy(line);
        if matches!(text, Cow::Owned(_)) {
            scan.lossy += 1;
        }
        on_line(&text)?;
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn collect(path: &Path, partition: &Partition) -> (Vec<String>, LineScan) {
        let mut lines = Vec::new();
        let scan = for_each_line_in(path, partition, |l| {
            lines.push(l.to_string());
            Ok(())
        })
        .unwrap();
        (lines, scan)
    }

    #[test]
    fn reads_only_lines_of_its_partition() {
        let file = write_temp(b"one\ntwo\r\n\nthree\nfour");
        let first = Partition { index: 0, start: 0, end: 10 };
        let second = Partition { index: 1, start: 10, end: 20 };

        let (lines, scan) = collect(file.path(), &first);
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(scan.lines, 3);
        assert_eq!(scan.empty, 1);

        let (lines, scan) = collect(file.path(), &second);
        assert_eq!(lines, vec!["three", "four"]);
        assert_eq!(scan.empty, 0);
        assert_eq!(scan.bytes, 10);
    }

    #[test]
    fn invalid_utf8_lines_are_decoded_lossily() {
        let file = write_temp(b"ok\n\xff\xfe\nfine\n");
        let whole = Partition { index: 0, start: 0, end: 11 };
        let (lines, scan) = collect(file.path(), &whole);
        assert_eq!(lines, vec!["ok", "\u{FFFD}\u{FFFD}", "fine"]);
        assert_eq!(scan.lossy, 1);
        assert_eq!(scan.lines, 3);
    }

    #[test]
    fn callback_errors_propagate() {
        let file = write_temp(b"a\nb\n");
        let whole = Partition { index: 0, start: 0, end: 4 };
        let err = for_each_line_in(file.path(), &whole, |_| anyhow::bail!("rejected")).unwrap_err();
        assert_eq!(err.to_string(), "rejected");
    }

    #[test]
    fn hashing_is_stable_and_in_range() {
        for key in ["", "a", "ab", "longer key"] {
            let bucket = hash_to_partition(key.as_bytes(), 7);
            assert!(bucket < 7);
            assert_eq!(bucket, hash_to_partition(key.as_bytes(), 7));
        }
        assert_eq!(hash_to_partition(b"anything", 1), 0);
    }

    #[test]
    fn artifacts_hold_value_and_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact_path(dir.path().join("nested"), 3);
        assert!(path.ends_with("result_3.txt"));
        write_artifact(&path, &42).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "42\n");
    }
}
