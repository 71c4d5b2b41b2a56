//! Split raw capture files into one file per radio slot.
//!
//! Raw records carry absolute sample timestamps. Together with the port's
//! starting frame/slot/timestamp they map onto elementary slots; each
//! record's samples are cut at slot boundaries and appended to
//! `<basename>-<loop>.<frame>.<subframe>[.<slot>].bin`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use iqtap_frame::{RecordHeader, RECORD_HEADER_SIZE, SAMPLE_SIZE};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DemuxError, Overflow};
use crate::port::RfPort;

type Result<T> = std::result::Result<T, DemuxError>;

/// Default rolling read buffer: 64 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Radio frames before the frame number wraps.
pub const FRAMES_PER_WRAP: i64 = 1024;

const SUBFRAMES_PER_FRAME: i64 = 10;

/// Demultiplexer settings.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Size of the rolling read buffer.
    pub buffer_size: usize,
    /// Leave raw files in place after processing.
    pub keep_raw: bool,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            keep_raw: false,
        }
    }
}

/// Slot timing of one RF port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTiming {
    pub port: u32,
    pub mu: u32,
    pub slots_per_subframe: i64,
    pub samples_per_slot: i64,
    /// Absolute slot at `timestamp`.
    pub start_slot: i64,
    pub timestamp: i64,
}

impl SlotTiming {
    /// Derive timing from a port. `sample_rate` must split into whole slots.
    pub fn from_port(port: &RfPort) -> Result<Self> {
        let invalid = |reason: String| DemuxError::InvalidTiming {
            port: port.index,
            reason,
        };
        let slots_per_subframe = 1i64
            .checked_shl(port.mu)
            .filter(|spsf| *spsf > 0 && port.mu < 16)
            .ok_or_else(|| invalid(format!("unsupported mu {}", port.mu)))?;
        let slots_per_second = 1000 * slots_per_subframe;
        let sample_rate = i64::try_from(port.sample_rate)
            .map_err(|_| invalid(format!("sample rate {} out of range", port.sample_rate)))?;
        if sample_rate <= 0 || sample_rate % slots_per_second != 0 {
            return Err(invalid(format!(
                "sample rate {sample_rate} is not a positive multiple of {slots_per_second} slots/s"
            )));
        }
        Ok(Self {
            port: port.index,
            mu: port.mu,
            slots_per_subframe,
            samples_per_slot: sample_rate / slots_per_second,
            start_slot: port.frame * SUBFRAMES_PER_FRAME * slots_per_subframe + port.slot,
            timestamp: port.timestamp,
        })
    }

    /// Slots per frame-number wrap (1024 frames).
    pub fn wrap(&self) -> i64 {
        FRAMES_PER_WRAP * SUBFRAMES_PER_FRAME * self.slots_per_subframe
    }

    /// Absolute slot holding sample `ts`, and the sample offset within it.
    pub fn locate(&self, ts: i64) -> (i64, i64) {
        let delta = ts - self.timestamp;
        let diff = delta.div_euclid(self.samples_per_slot);
        (self.start_slot + diff, delta.rem_euclid(self.samples_per_slot))
    }

    /// Coordinate of absolute `slot`, with wrap loops counted from `loop_base`.
    pub fn coordinate(&self, slot: i64, loop_base: i64) -> SlotCoordinate {
        let wrap = self.wrap();
        let in_wrap = slot.rem_euclid(wrap);
        let slots_per_frame = SUBFRAMES_PER_FRAME * self.slots_per_subframe;
        let in_frame = in_wrap % slots_per_frame;
        SlotCoordinate {
            loop_index: slot.div_euclid(wrap) - loop_base,
            frame: in_wrap / slots_per_frame,
            subframe: in_frame / self.slots_per_subframe,
            slot: (self.mu > 0).then_some(in_frame % self.slots_per_subframe),
        }
    }
}

/// Position of an elementary slot, as used in output file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotCoordinate {
    pub loop_index: i64,
    pub frame: i64,
    pub subframe: i64,
    /// Slot within the subframe; absent when a subframe is one slot.
    pub slot: Option<i64>,
}

impl SlotCoordinate {
    /// `-LL.FFFF.S[.s].bin`
    pub fn suffix(&self, slots_per_subframe: i64) -> String {
        let mut suffix = format!(
            "-{:02}.{:04}.{}",
            self.loop_index.rem_euclid(100),
            self.frame,
            self.subframe
        );
        if let Some(slot) = self.slot {
            if slots_per_subframe > 10 {
                suffix.push_str(&format!(".{slot:02}"));
            } else {
                suffix.push_str(&format!(".{slot}"));
            }
        }
        suffix.push_str(".bin");
        suffix
    }

    pub fn path(&self, basename: &Path, slots_per_subframe: i64) -> PathBuf {
        let mut name = OsString::from(basename.as_os_str());
        name.push(self.suffix(slots_per_subframe));
        PathBuf::from(name)
    }
}

/// Outcome of one raw-file pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub raw: PathBuf,
    pub raw_size: u64,
    pub records: u64,
    pub samples: u64,
    pub bytes_written: u64,
    pub output_files: usize,
    pub overflow: Option<Overflow>,
}

/// Sequential reader over a raw file through a fixed-size buffer.
struct RecordReader {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    /// File offset of `buf[start]`.
    pos: u64,
    len: u64,
}

impl RecordReader {
    fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::open(path).map_err(DemuxError::io(path))?;
        let len = file.metadata().map_err(DemuxError::io(path))?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            buf: vec![0; buffer_size.max(RECORD_HEADER_SIZE)],
            start: 0,
            end: 0,
            pos: 0,
            len,
        })
    }

    fn remaining(&self) -> u64 {
        self.len - self.pos
    }

    /// Make at least `want` bytes available (capped at the buffer size and
    /// the file end). Returns how many are available.
    fn fill(&mut self, want: usize) -> Result<usize> {
        let want = want.min(self.buf.len());
        if self.end - self.start >= want {
            return Ok(self.end - self.start);
        }
        self.buf.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
        while self.end < want {
            let n = self
                .file
                .read(&mut self.buf[self.end..])
                .map_err(DemuxError::io(&self.path))?;
            if n == 0 {
                break;
            }
            self.end += n;
        }
        Ok(self.end)
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        self.pos += n as u64;
    }

    fn read_header(&mut self) -> Result<Option<RecordHeader>> {
        if self.fill(RECORD_HEADER_SIZE)? < RECORD_HEADER_SIZE {
            return Ok(None);
        }
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        raw.copy_from_slice(&self.buf[self.start..self.start + RECORD_HEADER_SIZE]);
        self.consume(RECORD_HEADER_SIZE);
        Ok(Some(RecordHeader::decode(&raw)))
    }

    /// Copy the next `n` bytes to `out`.
    fn copy_to(&mut self, out: &mut impl Write, out_path: &Path, mut n: u64) -> Result<()> {
        while n > 0 {
            let want = usize::try_from(n).unwrap_or(usize::MAX);
            let available = self.fill(want)?;
            if available == 0 {
                return Err(DemuxError::Io {
                    path: self.path.clone(),
                    source: std::io::ErrorKind::UnexpectedEof.into(),
                });
            }
            let take = available.min(want);
            out.write_all(&self.buf[self.start..self.start + take])
                .map_err(DemuxError::io(out_path))?;
            self.consume(take);
            n -= take as u64;
        }
        Ok(())
    }
}

/// Output files of one pass, opened on first use.
#[derive(Default)]
struct OutputFiles {
    files: HashMap<PathBuf, BufWriter<File>>,
}

impl OutputFiles {
    fn get(&mut self, path: PathBuf) -> Result<&mut BufWriter<File>> {
        use std::collections::hash_map::Entry;

        match self.files.entry(path) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = File::create(entry.key()).map_err(DemuxError::io(entry.key()))?;
                debug!(file = %entry.key().display(), "created slot file");
                Ok(entry.insert(BufWriter::new(file)))
            }
        }
    }

    fn close(self) -> Result<usize> {
        let count = self.files.len();
        for (path, mut writer) in self.files {
            writer.flush().map_err(DemuxError::io(&path))?;
        }
        Ok(count)
    }
}

/// Demultiplex one raw capture file.
///
/// Stops at the first record that overruns the file (reported in
/// [`FileReport::overflow`]); output written so far is kept. The raw file
/// is removed afterwards unless `config.keep_raw` is set.
pub fn demux_file(
    raw: &Path,
    basename: &Path,
    timing: &SlotTiming,
    config: &DemuxConfig,
) -> Result<FileReport> {
    let mut reader = RecordReader::open(raw, config.buffer_size)?;
    info!(file = %raw.display(), size = reader.len, "processing raw file");

    let mut report = FileReport {
        raw: raw.to_path_buf(),
        raw_size: reader.len,
        ..FileReport::default()
    };
    let mut outputs = OutputFiles::default();
    let mut loop_base = None;

    while reader.remaining() > 0 {
        let offset = reader.pos;
        let remaining = reader.remaining();
        let header = match reader.read_header()? {
            Some(header) if header.extent() <= remaining => header,
            header => {
                let needed = header.map_or(RECORD_HEADER_SIZE as u64, |h| h.extent());
                report.overflow = Some(Overflow {
                    offset,
                    needed,
                    remaining,
                });
                break;
            }
        };

        let ts = i64::try_from(header.timestamp).map_err(|_| DemuxError::InvalidTiming {
            port: timing.port,
            reason: format!("timestamp {} out of range", header.timestamp),
        })?;
        let (mut slot, mut offset_in_slot) = timing.locate(ts);
        let loop_base = *loop_base.get_or_insert_with(|| slot.div_euclid(timing.wrap()));

        let mut count = i64::from(header.count);
        while count > 0 {
            let n = count.min(timing.samples_per_slot - offset_in_slot);
            let path = timing
                .coordinate(slot, loop_base)
                .path(basename, timing.slots_per_subframe);
            let bytes = n as u64 * SAMPLE_SIZE as u64;
            let out = outputs.get(path.clone())?;
            reader.copy_to(out, &path, bytes)?;
            report.bytes_written += bytes;
            count -= n;
            slot += 1;
            offset_in_slot = 0;
        }
        report.records += 1;
        report.samples += u64::from(header.count);
    }

    report.output_files = outputs.close()?;
    drop(reader);

    if let Some(overflow) = &report.overflow {
        warn!(file = %raw.display(), %overflow, "raw file truncated");
    }
    if !config.keep_raw {
        std::fs::remove_file(raw).map_err(DemuxError::io(raw))?;
    }
    info!(
        file = %raw.display(),
        records = report.records,
        slots = report.output_files,
        "raw file split"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use iqtap_frame::encode_record;
    use serde_json::json;

    use super::*;

    fn timing(mu: u32, sample_rate: u64, frame: i64, slot: i64, timestamp: i64) -> SlotTiming {
        let port: RfPort = serde_json::from_value(json!({
            "index": 0,
            "sample_rate": sample_rate,
            "mu": mu,
            "frame": frame,
            "slot": slot,
            "timestamp": timestamp,
        }))
        .unwrap();
        SlotTiming::from_port(&port).unwrap()
    }

    fn samples(start: i32, count: usize) -> Vec<(i32, i32)> {
        (0..count as i32).map(|i| (start + i, -(start + i))).collect()
    }

    fn write_raw(path: &Path, records: &[(u64, Vec<(i32, i32)>)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (ts, s) in records {
            encode_record(*ts, s, &mut buf);
        }
        std::fs::write(path, &buf).unwrap();
        buf.to_vec()
    }

    fn sample_bytes(records: &[(u64, Vec<(i32, i32)>)]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|(_, s)| s.iter())
            .flat_map(|(i, q)| i.to_le_bytes().into_iter().chain(q.to_le_bytes()))
            .collect()
    }

    #[test]
    fn timing_rejects_fractional_slots() {
        let port: RfPort = serde_json::from_value(json!({
            "index": 3, "sample_rate": 1_000_500, "mu": 0,
        }))
        .unwrap();
        assert!(matches!(
            SlotTiming::from_port(&port),
            Err(DemuxError::InvalidTiming { port: 3, .. })
        ));
    }

    #[test]
    fn locate_handles_samples_before_start() {
        let t = timing(0, 1_920_000, 5, 2, 10_000);
        assert_eq!(t.samples_per_slot, 1920);
        assert_eq!(t.start_slot, 52);
        assert_eq!(t.locate(10_000), (52, 0));
        assert_eq!(t.locate(10_000 + 1920 + 7), (53, 7));
        assert_eq!(t.locate(10_000 - 1), (51, 1919));
    }

    #[test]
    fn coordinates_and_names() {
        let t = timing(1, 30_720_000, 0, 0, 0);
        let c = t.coordinate(20 * 7 + 2 * 3 + 1, 0);
        assert_eq!(
            c,
            SlotCoordinate {
                loop_index: 0,
                frame: 7,
                subframe: 3,
                slot: Some(1),
            }
        );
        assert_eq!(c.suffix(2), "-00.0007.3.1.bin");

        let t0 = timing(0, 1_920_000, 0, 0, 0);
        assert_eq!(t0.coordinate(1023 * 10 + 9, 0).suffix(1), "-00.1023.9.bin");

        let t4 = timing(4, 30_720_000 * 8, 0, 0, 0);
        assert_eq!(t4.coordinate(15, 0).suffix(16), "-00.0000.0.15.bin");
        assert_eq!(t4.coordinate(3, 0).suffix(16), "-00.0000.0.03.bin");
    }

    #[test]
    fn slots_one_wrap_apart_differ_only_in_loop() {
        let t = timing(1, 30_720_000, 0, 0, 0);
        for slot in [0, 1, 777, t.wrap() - 1] {
            let a = t.coordinate(slot, 0);
            let b = t.coordinate(slot + t.wrap(), 0);
            assert_eq!(b.loop_index, a.loop_index + 1);
            assert_eq!((a.frame, a.subframe, a.slot), (b.frame, b.subframe, b.slot));
        }
        assert_eq!(t.coordinate(250 * t.wrap() + 5, 150).suffix(2), "-00.0000.2.1.bin");
    }

    #[test]
    fn monotonic_timestamps_give_non_decreasing_slots() {
        let t = timing(2, 61_440_000, 1023, 39, 123_456);
        let mut last = i64::MIN;
        for ts in (0..200_000i64).step_by(997) {
            let (slot, offset) = t.locate(ts);
            assert!(slot >= last);
            assert!((0..t.samples_per_slot).contains(&offset));
            last = slot;
        }
    }

    #[test]
    fn straddling_record_is_split_and_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("rx00");
        let base = dir.path().join("rf_port0-rx0");
        // 1.92 MHz, mu 0: 1920 samples per slot.
        let t = timing(0, 1_920_000, 0, 0, 0);
        let records = vec![(1000u64, samples(0, 2000)), (3000, samples(2000, 3000))];
        write_raw(&raw, &records);

        let config = DemuxConfig {
            buffer_size: 4096,
            keep_raw: true,
        };
        let report = demux_file(&raw, &base, &t, &config).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.samples, 5000);
        assert_eq!(report.bytes_written, 5000 * 8);
        assert!(report.overflow.is_none());
        assert!(raw.exists());

        // Record 1: 920 samples in slot 0, 1080 in slot 1.
        // Record 2 starts at 3000 (slot 1 offset 1080): 840 in slot 1, 1920 in slot 2, 240 in slot 3.
        let sizes: Vec<u64> = ["-00.0000.0.bin", "-00.0000.1.bin", "-00.0000.2.bin", "-00.0000.3.bin"]
            .iter()
            .map(|suffix| {
                let mut p = base.clone().into_os_string();
                p.push(suffix);
                std::fs::metadata(PathBuf::from(p)).unwrap().len() / 8
            })
            .collect();
        assert_eq!(sizes, vec![920, 1080 + 840, 1920, 240]);
        assert_eq!(report.output_files, 4);

        let mut joined = Vec::new();
        for suffix in ["-00.0000.0.bin", "-00.0000.1.bin", "-00.0000.2.bin", "-00.0000.3.bin"] {
            let mut p = base.clone().into_os_string();
            p.push(suffix);
            joined.extend(std::fs::read(PathBuf::from(p)).unwrap());
        }
        assert_eq!(joined, sample_bytes(&records));
    }

    #[test]
    fn wraparound_starts_new_loop() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("rx00");
        let base = dir.path().join("rf_port0-rx0");
        // Start in the last slot of frame 1023.
        let t = timing(0, 1_920_000, 1023, 9, 0);
        write_raw(&raw, &[(0, samples(0, 1920 * 2))]);

        let report = demux_file(&raw, &base, &t, &DemuxConfig::default()).unwrap();
        assert_eq!(report.output_files, 2);
        assert!(!raw.exists());
        for suffix in ["-00.1023.9.bin", "-01.0000.0.bin"] {
            let mut p = base.clone().into_os_string();
            p.push(suffix);
            assert_eq!(std::fs::metadata(PathBuf::from(p)).unwrap().len(), 1920 * 8);
        }
    }

    #[test]
    fn overflow_stops_file_and_keeps_prior_output() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("rx00");
        let base = dir.path().join("rf_port0-rx0");
        let t = timing(0, 1_920_000, 0, 0, 0);
        let mut bytes = write_raw(&raw, &[(0, samples(0, 1920)), (1920, samples(0, 1920))]);
        bytes.truncate(bytes.len() - 8);
        std::fs::write(&raw, &bytes).unwrap();

        let report = demux_file(&raw, &base, &t, &DemuxConfig::default()).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(
            report.overflow,
            Some(Overflow {
                offset: 12 + 1920 * 8,
                needed: 12 + 1920 * 8,
                remaining: 12 + 1920 * 8 - 8,
            })
        );
        assert_eq!(report.output_files, 1);
        assert!(!raw.exists(), "raw file is removed after an overflow too");
    }

    #[test]
    fn short_trailing_fragment_is_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("tx00");
        let t = timing(0, 1_920_000, 0, 0, 0);
        let mut bytes = write_raw(&raw, &[(0, samples(0, 10))]);
        bytes.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&raw, &bytes).unwrap();

        let config = DemuxConfig {
            keep_raw: true,
            ..DemuxConfig::default()
        };
        let report = demux_file(&raw, &dir.path().join("rf_port0-tx0"), &t, &config).unwrap();
        assert_eq!(report.records, 1);
        let overflow = report.overflow.unwrap();
        assert_eq!(overflow.remaining, 3);
        assert_eq!(overflow.needed, 12);
    }

    #[test]
    fn accepted_extents_sum_to_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("rx00");
        let t = timing(0, 1_920_000, 0, 0, 0);
        let bytes = write_raw(
            &raw,
            &[(0, samples(0, 1)), (1, samples(0, 0)), (1, samples(0, 5000))],
        );
        let report =
            demux_file(&raw, &dir.path().join("rf_port0-rx0"), &t, &DemuxConfig::default())
                .unwrap();
        assert!(report.overflow.is_none());
        assert_eq!(
            report.records * 12 + report.samples * 8,
            bytes.len() as u64
        );
    }
}
