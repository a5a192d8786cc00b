//! The on-disk slice format: a contiguous run of big-endian f64 samples
//! for one node, one step, one start time.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{CeresError, Result, SliceWriteError};
use crate::series::TimeSeriesData;

/// Size in bytes of one packed sample.
pub const DATAPOINT_SIZE: u64 = 8;

/// Gap threshold (in samples) past which a single `write` must not pad with
/// NaN and the node starts a new slice instead: gaps of `0..MAX_SLICE_GAP`
/// samples are padded in place, `MAX_SLICE_GAP` or more forces a new slice.
pub const MAX_SLICE_GAP: u64 = 80;

/// Outcome of parsing a directory entry's filename as a slice name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParsedFilename {
    Slice(i64, u32),
    Malformed,
    NotASlice,
}

/// One `<startTime>@<timeStep>.slice` file.
#[derive(Debug, Clone)]
pub struct Slice {
    fs_path: PathBuf,
    start_time: i64,
    time_step: u32,
}

impl Slice {
    pub(crate) fn new(node_dir: &Path, start_time: i64, time_step: u32) -> Self {
        let fs_path = node_dir.join(Self::filename(start_time, time_step));
        Self {
            fs_path,
            start_time,
            time_step,
        }
    }

    pub(crate) fn filename(start_time: i64, time_step: u32) -> String {
        format!("{start_time}@{time_step}.slice")
    }

    /// Parse a `<startTime>@<timeStep>.slice` filename. `NotASlice` means the
    /// name doesn't even end in `.slice@...` shape and should be ignored by
    /// enumerators (forward-compatibility for stray files); `Malformed`
    /// means it has slice shape but unparsable numbers, which enumerators
    /// turn into `CorruptNode`.
    pub(crate) fn parse_filename(name: &str) -> ParsedFilename {
        let Some(stem) = name.strip_suffix(".slice") else {
            return ParsedFilename::NotASlice;
        };
        let Some((start, step)) = stem.split_once('@') else {
            return ParsedFilename::Malformed;
        };
        match (start.parse::<i64>(), step.parse::<u32>()) {
            (Ok(s), Ok(st)) => ParsedFilename::Slice(s, st),
            _ => ParsedFilename::Malformed,
        }
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn time_step(&self) -> u32 {
        self.time_step
    }

    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    fn file_size(&self) -> std::io::Result<u64> {
        Ok(std::fs::metadata(&self.fs_path)?.len())
    }

    /// `startTime + (fileSize / 8) * timeStep`
    pub fn end_time(&self) -> Result<i64> {
        let size = self.file_size()?;
        Ok(self.start_time + (size / DATAPOINT_SIZE) as i64 * self.time_step as i64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.file_size()? == 0)
    }

    /// Create an empty slice file with the canonical filename and a
    /// conventional owner-read/write, group/world-read mode.
    pub(crate) fn create(node_dir: &Path, start_time: i64, time_step: u32) -> Result<Self> {
        let slice = Self::new(node_dir, start_time, time_step);
        let file = File::create(&slice.fs_path)?;
        set_conventional_mode(&file)?;
        Ok(slice)
    }

    /// Read `[from, until)`. Errors `InvalidRequest` if `from` precedes this
    /// slice's start; `NoData` if the request begins past the written data.
    pub fn read(&self, from: i64, until: i64) -> Result<TimeSeriesData> {
        let offset = from - self.start_time;
        if offset < 0 {
            return Err(CeresError::InvalidRequest);
        }

        let step = self.time_step as i64;
        let byte_offset = (offset / step) as u64 * DATAPOINT_SIZE;

        let size = self.file_size()?;
        if byte_offset >= size {
            return Err(CeresError::NoData);
        }

        let mut file = File::open(&self.fs_path)?;
        file.seek(SeekFrom::Start(byte_offset))?;

        let requested_bytes = ((until - from) / step).max(0) as u64 * DATAPOINT_SIZE;
        let available = size - byte_offset;
        let to_read = requested_bytes.min(available);

        let mut buf = vec![0u8; to_read as usize];
        file.read_exact(&mut buf)?;

        let values: Vec<Option<f64>> = buf
            .chunks_exact(8)
            .map(|chunk| {
                let bits = f64::from_be_bytes(chunk.try_into().unwrap());
                if bits.is_nan() {
                    None
                } else {
                    Some(bits)
                }
            })
            .collect();

        let end_time = from + values.len() as i64 * step;
        Ok(TimeSeriesData::new(from, end_time, self.time_step, values))
    }

    /// Write a non-empty, step-aligned, strictly-increasing sequence. Pads
    /// an internal gap of up to `MAX_SLICE_GAP - 1` samples with NaN; at
    /// `MAX_SLICE_GAP` samples or more, the caller (`Node::write`) must
    /// start a new slice instead.
    pub(crate) fn write(&self, sequence: &[(i64, f64)]) -> std::result::Result<(), SliceWriteError> {
        debug_assert!(!sequence.is_empty());

        let step = self.time_step as i64;
        let offset = sequence[0].0 - self.start_time;
        let mut byte_offset = (offset / step) as u64 * DATAPOINT_SIZE;

        let file_size = self.file_size()?;

        let mut packed: Vec<u8> = Vec::with_capacity(sequence.len() * 8);
        if byte_offset > file_size {
            let gap_bytes = byte_offset - file_size;
            let gap_points = gap_bytes / DATAPOINT_SIZE;
            if gap_points >= MAX_SLICE_GAP {
                return Err(SliceWriteError::GapTooLarge);
            }
            for _ in 0..gap_points {
                packed.extend_from_slice(&f64::NAN.to_be_bytes());
            }
            byte_offset = file_size;
        }

        for (_, value) in sequence {
            packed.extend_from_slice(&value.to_be_bytes());
        }

        let mut file = OpenOptions::new().write(true).open(&self.fs_path)?;
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(&packed)?;
        Ok(())
    }

    /// Drop all samples before `t` (rounded up to the next step boundary).
    /// Rewrites the tail from offset 0 and renames the file to the new
    /// start time; unlinks the file (and returns `Ok(false)`) if nothing is
    /// left. Invalidates the owning node's slice cache -- the caller is
    /// responsible for that, since `Slice` has no back-reference to `Node`.
    pub fn delete_before(&mut self, t: i64) -> Result<bool> {
        let step = self.time_step as i64;
        let aligned = if t % step == 0 { t } else { t - t.rem_euclid(step) + step };

        let offset = aligned - self.start_time;
        if offset <= 0 {
            return Ok(true);
        }

        let byte_offset = (offset / step) as u64 * DATAPOINT_SIZE;
        if byte_offset == 0 {
            return Ok(true);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.fs_path)?;
        file.seek(SeekFrom::Start(byte_offset))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;

        if tail.is_empty() {
            drop(file);
            std::fs::remove_file(&self.fs_path)?;
            return Ok(false);
        }

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&tail)?;
        file.set_len(tail.len() as u64)?;
        drop(file);

        let new_path = self
            .fs_path
            .parent()
            .expect("slice path has a parent")
            .join(Self::filename(aligned, self.time_step));
        std::fs::rename(&self.fs_path, &new_path)?;
        self.fs_path = new_path;
        self.start_time = aligned;
        Ok(true)
    }
}

#[cfg(unix)]
fn set_conventional_mode(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(0o644);
    file.set_permissions(perms)
}

#[cfg(not(unix))]
fn set_conventional_mode(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_round_trip_write_read() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice
            .write(&[(60, 1.0), (120, 2.0), (180, 3.0)])
            .unwrap();

        let series = slice.read(60, 240).unwrap();
        assert_eq!(series.start_time, 60);
        assert_eq!(series.end_time, 240);
        assert_eq!(series.values, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn read_before_start_is_invalid() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 600, 60).unwrap();
        slice.write(&[(600, 1.0)]).unwrap();
        let err = slice.read(0, 600).unwrap_err();
        assert!(matches!(err, CeresError::InvalidRequest));
    }

    #[test]
    fn read_past_written_data_is_no_data() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice.write(&[(60, 1.0)]).unwrap();
        let err = slice.read(600, 660).unwrap_err();
        assert!(matches!(err, CeresError::NoData));
    }

    #[test]
    fn write_pads_gap_with_nan() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice.write(&[(60, 1.0)]).unwrap();
        slice.write(&[(600, 2.0)]).unwrap();

        let series = slice.read(60, 660).unwrap();
        assert_eq!(series.values.len(), 10);
        assert_eq!(series.values[0], Some(1.0));
        assert_eq!(series.values[9], Some(2.0));
        assert!(series.values[1..9].iter().all(|v| v.is_none()));
    }

    #[test]
    fn write_rejects_gap_beyond_max() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice.write(&[(60, 1.0)]).unwrap();
        // a point 81 steps later computes to an 80-sample gap, at threshold.
        let huge_gap_ts = 60 + 81 * 60;
        let err = slice.write(&[(huge_gap_ts, 2.0)]).unwrap_err();
        assert!(matches!(err, SliceWriteError::GapTooLarge));
    }

    #[test]
    fn write_at_max_gap_succeeds() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice.write(&[(60, 1.0)]).unwrap();
        // a point 80 steps later computes to a 79-sample gap, just under it.
        let boundary_ts = 60 + 80 * 60;
        slice.write(&[(boundary_ts, 2.0)]).unwrap();
        let series = slice.read(60, boundary_ts + 60).unwrap();
        assert_eq!(series.values.len(), 81);
    }

    #[test]
    fn overwrite_is_idempotent() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice.write(&[(60, 1.0), (120, 2.0)]).unwrap();
        let first = std::fs::read(slice.fs_path()).unwrap();
        slice.write(&[(60, 1.0), (120, 2.0)]).unwrap();
        let second = std::fs::read(slice.fs_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn write_missing_file_signals_deleted() {
        let dir = tempdir().unwrap();
        let slice = Slice::create(dir.path(), 60, 60).unwrap();
        std::fs::remove_file(slice.fs_path()).unwrap();
        let err = slice.write(&[(60, 1.0)]).unwrap_err();
        assert!(matches!(err, SliceWriteError::Deleted));
    }

    #[test]
    fn delete_before_truncates_and_renames() {
        let dir = tempdir().unwrap();
        let mut slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice
            .write(&[(60, 1.0), (120, 2.0), (180, 3.0), (240, 4.0)])
            .unwrap();

        let kept = slice.delete_before(150).unwrap();
        assert!(kept);
        assert_eq!(slice.start_time(), 180);
        assert!(slice.fs_path().ends_with("180@60.slice"));

        let series = slice.read(180, 300).unwrap();
        assert_eq!(series.values, vec![Some(3.0), Some(4.0)]);
    }

    #[test]
    fn parses_well_formed_filenames() {
        assert_eq!(Slice::parse_filename("600@60.slice"), ParsedFilename::Slice(600, 60));
        assert_eq!(Slice::parse_filename("notes.txt"), ParsedFilename::NotASlice);
        assert_eq!(Slice::parse_filename("bogus@.slice"), ParsedFilename::Malformed);
    }

    #[test]
    fn delete_before_everything_unlinks_file() {
        let dir = tempdir().unwrap();
        let mut slice = Slice::create(dir.path(), 60, 60).unwrap();
        slice.write(&[(60, 1.0), (120, 2.0)]).unwrap();

        let kept = slice.delete_before(10_000).unwrap();
        assert!(!kept);
        assert!(!slice.fs_path().exists());
    }
}
