//! A single metric: a directory holding metadata and a set of slices.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate;
use crate::config::{self, SliceCachingBehavior};
use crate::error::{CeresError, Result, SliceWriteError};
use crate::path_util;
use crate::series::TimeSeriesData;
use crate::slice::{ParsedFilename, Slice, DATAPOINT_SIZE};

/// Seconds per sample when neither an explicit `timeStep` property nor
/// retention metadata is available.
pub const DEFAULT_TIMESTEP: u32 = 60;

/// Node metadata document (`.ceres-node`): at minimum `timeStep`, optionally
/// `retentions`, plus any arbitrary properties the caller supplied at
/// creation time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeMetadata {
    #[serde(rename = "timeStep")]
    pub time_step: u32,
    #[serde(default, rename = "retentions", skip_serializing_if = "Option::is_none")]
    pub retentions: Option<Vec<(u32, u32)>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A directory representing one metric.
pub struct Node {
    node_path: String,
    fs_path: PathBuf,
    time_step: Option<u32>,
    retentions: Option<Vec<(u32, u32)>>,
    caching_behavior: SliceCachingBehavior,
    cache: Option<Vec<Slice>>,
}

impl Node {
    /// Wrap an existing, already-validated node directory. Metadata is not
    /// read until first needed (`timeStep` loaded lazily).
    pub(crate) fn existing(node_path: String, fs_path: PathBuf) -> Self {
        Self {
            node_path,
            fs_path,
            time_step: None,
            retentions: None,
            caching_behavior: config::default_slice_caching_behavior(),
            cache: None,
        }
    }

    /// `true` iff `path` is a directory containing a `.ceres-node` file.
    pub(crate) fn is_node_dir(path: &Path) -> bool {
        path.is_dir() && path.join(".ceres-node").exists()
    }

    /// Create a new node directory and persist its initial metadata.
    /// `properties` is merged with `{timeStep: DEFAULT_TIMESTEP}` when the
    /// caller didn't supply one; everything else is carried verbatim into
    /// the metadata document.
    pub(crate) fn create(
        root: &Path,
        node_path: &str,
        mut properties: HashMap<String, String>,
    ) -> Result<Self> {
        let fs_path = path_util::filesystem_path(root, node_path);
        std::fs::create_dir_all(&fs_path)?;
        set_dir_mode(&fs_path)?;

        let time_step: u32 = properties
            .remove("timeStep")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMESTEP);

        let extra = properties
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();

        let metadata = NodeMetadata {
            time_step,
            retentions: None,
            extra,
        };

        let mut node = Self::existing(node_path.to_string(), fs_path);
        node.write_metadata(&metadata)?;
        info!(node = node_path, time_step, "created node");
        Ok(node)
    }

    pub fn node_path(&self) -> &str {
        &self.node_path
    }

    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    fn metadata_path(&self) -> PathBuf {
        self.fs_path.join(".ceres-node")
    }

    /// Read `.ceres-node`, caching `timeStep`/`retentions` on `self`.
    pub fn read_metadata(&mut self) -> Result<NodeMetadata> {
        let content = std::fs::read_to_string(self.metadata_path())?;
        let metadata: NodeMetadata =
            serde_json::from_str(&content).map_err(|e| CeresError::CorruptNode {
                node: self.node_path.clone(),
                message: format!("invalid metadata: {e}"),
            })?;
        self.time_step = Some(metadata.time_step);
        self.retentions = metadata.retentions.clone();
        Ok(metadata)
    }

    pub fn write_metadata(&mut self, metadata: &NodeMetadata) -> Result<()> {
        let content = serde_json::to_string(metadata).map_err(|e| {
            CeresError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        std::fs::write(self.metadata_path(), content)?;
        self.time_step = Some(metadata.time_step);
        self.retentions = metadata.retentions.clone();
        Ok(())
    }

    fn ensure_metadata_loaded(&mut self) -> Result<()> {
        if self.time_step.is_none() {
            self.read_metadata()?;
        }
        Ok(())
    }

    pub fn time_step(&self) -> Option<u32> {
        self.time_step
    }

    pub fn set_slice_caching_behavior(&mut self, behavior: SliceCachingBehavior) {
        self.caching_behavior = behavior;
        self.cache = None;
    }

    pub fn clear_slice_cache(&mut self) {
        self.cache = None;
    }

    /// Current slice set, ordered by `startTime` descending.
    pub fn slices(&mut self) -> Result<Vec<Slice>> {
        match self.caching_behavior {
            SliceCachingBehavior::All => {
                if self.cache.is_none() {
                    self.cache = Some(self.read_slices_from_disk()?);
                }
                Ok(self.cache.clone().unwrap())
            }
            SliceCachingBehavior::Latest => {
                let fresh = self.read_slices_from_disk()?;
                self.cache = fresh.first().cloned().map(|s| vec![s]);
                Ok(fresh)
            }
            SliceCachingBehavior::None => self.read_slices_from_disk(),
        }
    }

    fn read_slices_from_disk(&self) -> Result<Vec<Slice>> {
        let entries = std::fs::read_dir(&self.fs_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CeresError::NodeDeleted(self.node_path.clone())
            } else {
                CeresError::Io(e)
            }
        })?;

        let mut slices = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            match Slice::parse_filename(&name) {
                ParsedFilename::NotASlice => continue,
                ParsedFilename::Malformed => {
                    return Err(CeresError::CorruptNode {
                        node: self.node_path.clone(),
                        message: format!("malformed slice filename: {name}"),
                    });
                }
                ParsedFilename::Slice(start, step) => {
                    let slice = Slice::new(&self.fs_path, start, step);
                    let size = std::fs::metadata(slice.fs_path())?.len();
                    if size % DATAPOINT_SIZE != 0 {
                        return Err(CeresError::CorruptNode {
                            node: self.node_path.clone(),
                            message: format!("slice {name} size {size} is not a multiple of 8"),
                        });
                    }
                    slices.push(slice);
                }
            }
        }

        slices.sort_by(|a, b| {
            (b.start_time(), b.time_step()).cmp(&(a.start_time(), a.time_step()))
        });
        Ok(slices)
    }

    /// True iff the union of this node's slice spans intersects
    /// `[from, until)`. `None`/`Some(0)` means "open" on that side.
    pub fn has_data_for_interval(&mut self, from: Option<i64>, until: Option<i64>) -> Result<bool> {
        let slices = self.slices()?;
        let Some(newest) = slices.first() else {
            return Ok(false);
        };
        let oldest = slices.last().unwrap();

        let latest_data = newest.end_time()?;
        let earliest_data = oldest.start_time();

        let from_open = matches!(from, None | Some(0));
        let until_open = matches!(until, None | Some(0));

        let from_ok = from_open || from.unwrap() < latest_data;
        let until_ok = until_open || until.unwrap() > earliest_data;
        Ok(from_ok && until_ok)
    }

    /// Write datapoints into the node, compacting into contiguous runs and
    /// dispatching each run to the slice(s) it belongs in, creating new
    /// slices as required.
    pub fn write(&mut self, datapoints: &[(i64, Option<f64>)]) -> Result<()> {
        self.ensure_metadata_loaded()?;
        if datapoints.is_empty() {
            return Ok(());
        }
        self.write_inner(datapoints)
    }

    fn write_inner(&mut self, datapoints: &[(i64, Option<f64>)]) -> Result<()> {
        let time_step = self.time_step.expect("metadata loaded before write_inner");
        let mut stack: Vec<Vec<(i64, f64)>> = compact(time_step, datapoints);
        let mut predecessor: Vec<Vec<(i64, f64)>> = Vec::new();

        while let Some(sequence) = stack.pop() {
            let timestamps: Vec<i64> = sequence.iter().map(|&(t, _)| t).collect();
            let beginning_time = timestamps[0];
            let ending_time = *timestamps.last().unwrap();

            let slices = self.slices()?;
            let matching: Vec<Slice> = slices
                .into_iter()
                .filter(|s| s.time_step() == time_step)
                .collect();

            let mut slice_boundary: Option<i64> = None;
            let mut found_home = false;
            let mut retry = false;

            for slice in &matching {
                let slice_start = slice.start_time();

                if beginning_time >= slice_start {
                    let seq_within = match slice_boundary {
                        None => sequence.clone(),
                        Some(boundary) => {
                            let idx = timestamps.partition_point(|&t| t < boundary);
                            sequence[..idx].to_vec()
                        }
                    };

                    match slice.write(&seq_within) {
                        Ok(()) => {}
                        Err(SliceWriteError::GapTooLarge) => {
                            warn!(
                                node = self.node_path,
                                start = beginning_time,
                                "write gap too large for existing slice, creating a new one"
                            );
                            let new_slice = Slice::create(&self.fs_path, beginning_time, time_step)?;
                            new_slice.write(&seq_within).map_err(slice_write_err_to_ceres)?;
                            self.clear_slice_cache();
                        }
                        Err(SliceWriteError::Deleted) => {
                            warn!(node = self.node_path, "slice deleted mid-write, retrying");
                            self.clear_slice_cache();
                            retry = true;
                            break;
                        }
                        Err(e @ SliceWriteError::Io(_)) => return Err(slice_write_err_to_ceres(e)),
                    }

                    found_home = true;
                    break;
                } else if ending_time >= slice_start {
                    let idx = timestamps.partition_point(|&t| t < slice_start);
                    let seq_within = sequence[idx..].to_vec();
                    let leftover = sequence[..idx].to_vec();
                    stack.push(leftover);

                    slice
                        .write(&seq_within)
                        .map_err(slice_write_err_to_ceres)?;

                    found_home = true;
                    break;
                }

                slice_boundary = Some(slice_start);
            }

            if retry {
                return self.write(datapoints);
            }

            if !found_home {
                predecessor.push(sequence);
            }
        }

        for sequence in predecessor {
            let start = sequence[0].0;
            let new_slice = Slice::create(&self.fs_path, start, time_step)?;
            new_slice.write(&sequence).map_err(slice_write_err_to_ceres)?;
            self.clear_slice_cache();
        }

        Ok(())
    }

    /// Read `[from, until)`, stitching across slices with NaN padding and
    /// downsampling coarser output where finer slices overlap coarser ones.
    pub fn read(&mut self, from: i64, until: i64) -> Result<TimeSeriesData> {
        self.ensure_metadata_loaded()?;
        let step = self.time_step.unwrap() as i64;
        let from = floor_to_step(from, step);
        let until = floor_to_step(until, step);

        let slices = self.slices()?;

        let mut output_step: u32 = 1;
        for s in &slices {
            if s.start_time() <= from {
                if s.time_step() > output_step {
                    output_step = s.time_step();
                }
                break;
            } else if s.start_time() <= until && s.time_step() > output_step {
                output_step = s.time_step();
            }
        }

        let spans: Vec<(i64, i64)> = slices
            .iter()
            .map(|s| Ok((s.start_time(), s.end_time()?)))
            .collect::<Result<Vec<_>>>()?;

        let mut candidates: Vec<Slice> = Vec::new();
        for (i, s) in slices.iter().enumerate() {
            let (s_start, s_end) = spans[i];
            if s_end <= from || s_start >= until {
                continue;
            }
            let contained = spans
                .iter()
                .enumerate()
                .any(|(j, &(o_start, o_end))| j != i && o_start < s_start && s_end < o_end);
            if contained {
                continue;
            }
            candidates.push(s.clone());
        }

        let mut accumulator: Option<TimeSeriesData> = None;
        let mut slice_boundary: Option<i64> = None;

        for s in &candidates {
            let s_start = s.start_time();
            let s_end = s.end_time()?;

            let req_from = from.max(s_start);
            let mut req_until = until.min(s_end);
            if let Some(b) = slice_boundary {
                req_until = req_until.min(b);
            }

            if req_from >= req_until {
                slice_boundary = Some(s_start);
                continue;
            }

            let mut series = match s.read(req_from, req_until) {
                Ok(series) => series,
                Err(CeresError::NoData) => break,
                Err(e) => return Err(e),
            };

            if s.time_step() < output_step {
                let down = aggregate::downsample(&series.values, s.time_step(), output_step);
                let len = down.len() as i64;
                series = TimeSeriesData::new(
                    series.start_time,
                    series.start_time + len * output_step as i64,
                    output_step,
                    down,
                );
            }

            if series.end_time < req_until {
                let pad = TimeSeriesData::empty(series.end_time, req_until, output_step);
                series = series.concat(pad);
            }

            accumulator = Some(match accumulator {
                None => series,
                Some(acc) => {
                    if series.start_time < acc.start_time {
                        let mut base = series;
                        base.merge(&acc);
                        base
                    } else {
                        let mut acc = acc;
                        acc.merge(&series);
                        acc
                    }
                }
            });

            slice_boundary = Some(s_start);
        }

        match accumulator {
            Some(acc) => {
                if acc.start_time > from {
                    let left = TimeSeriesData::empty(from, acc.start_time, output_step);
                    Ok(left.concat(acc))
                } else {
                    Ok(acc)
                }
            }
            None => {
                let step = if output_step == 1 {
                    self.resolve_retention_fallback_step(until)
                } else {
                    output_step
                };
                Ok(TimeSeriesData::empty(from, until, step))
            }
        }
    }

    /// Fallback output step when no slice intersects the request: start
    /// from the node's own `timeStep` (or `DEFAULT_TIMESTEP` if metadata was
    /// never loaded) and walk `retentions`, accumulating `step*count`
    /// backwards from now, taking the last retention whose horizon still
    /// covers `until`.
    fn resolve_retention_fallback_step(&self, until: i64) -> u32 {
        let mut step = self.time_step.unwrap_or(DEFAULT_TIMESTEP);
        let Some(retentions) = &self.retentions else {
            return step;
        };
        let now = now_unix();
        let mut horizon: i64 = 0;
        for &(ret_step, ret_count) in retentions {
            horizon += ret_step as i64 * ret_count as i64;
            if until > now - horizon {
                break;
            }
            step = ret_step;
        }
        step
    }
}

fn floor_to_step(t: i64, step: i64) -> i64 {
    t - t.rem_euclid(step)
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn slice_write_err_to_ceres(e: SliceWriteError) -> CeresError {
    match e {
        SliceWriteError::Io(e) => CeresError::Io(e),
        other => CeresError::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}

#[cfg(unix)]
fn set_dir_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Drop missing values, sort, floor to `time_step`, collapse duplicate
/// floored timestamps (first occurrence wins), and segment into maximal
/// step-contiguous runs.
fn compact(time_step: u32, datapoints: &[(i64, Option<f64>)]) -> Vec<Vec<(i64, f64)>> {
    let step = time_step as i64;
    let mut points: Vec<(i64, f64)> = datapoints
        .iter()
        .filter_map(|&(t, v)| v.map(|v| (t, v)))
        .collect();
    points.sort_by_key(|&(t, _)| t);

    let mut sequences: Vec<Vec<(i64, f64)>> = Vec::new();
    let mut sequence: Vec<(i64, f64)> = Vec::new();
    let mut minimum_timestamp = i64::MIN;

    for (raw_ts, value) in points {
        let floored = floor_to_step(raw_ts, step);

        if sequence.is_empty() {
            sequence.push((floored, value));
        } else {
            if floored <= minimum_timestamp {
                continue;
            }
            if floored == sequence.last().unwrap().0 + step {
                sequence.push((floored, value));
            } else {
                sequences.push(std::mem::take(&mut sequence));
                sequence.push((floored, value));
            }
        }
        minimum_timestamp = floored;
    }
    if !sequence.is_empty() {
        sequences.push(sequence);
    }
    sequences
}
