//! Run-storage container.
//!
//! A run file is a single binary file holding every sorted run a sort pass
//! produces:
//!
//! ```text
//! [ header: 12 bytes ][ directory: max_runs * 24 bytes ][ data region, append-only ]
//! ```
//!
//! Header layout (integers little-endian):
//!
//! - `magic` (4 bytes, `b"RUNS"`)
//! - `max_runs` (u32)
//! - `run_count` (u32)
//!
//! Directory entry layout:
//!
//! - `start_offset` (u64) — absolute byte offset of the run's first element
//! - `element_count` (u64)
//! - `is_used` (u8, 0 or 1)
//! - reserved (7 bytes, zero)
//!
//! The directory is sized at creation and never resized; element data is only
//! ever appended. A directory mutation rewrites the affected 24-byte entry
//! and the 12-byte header in place, so a reader walking the file always sees
//! a `run_count` that matches the used slots.

use byteorder::{ByteOrder, LittleEndian};
use log;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::SortError;

/// Run file magic bytes.
const MAGIC: [u8; 4] = *b"RUNS";
/// Size of the on-disk header in bytes.
pub const HEADER_BYTES: u64 = 12;
/// Size of one on-disk directory entry in bytes.
pub const ENTRY_BYTES: u64 = 24;

/// Shared random-access handle to a run file.
///
/// All cursor arithmetic lives here: callers address the file by absolute
/// byte offset and never observe seek state. Each call seeks and transfers
/// under one lock, so the handle can be shared across the generator's
/// workers via [`Arc`].
pub struct SharedFile {
    file: Mutex<File>,
}

impl SharedFile {
    pub(crate) fn new(file: File) -> Self {
        SharedFile { file: Mutex::new(file) }
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    /// Writes all of `buf` starting at `offset`.
    pub fn write_all_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    /// Returns the current end-of-file position, where appended data lands.
    pub fn append_offset(&self) -> io::Result<u64> {
        self.file.lock().unwrap().seek(SeekFrom::End(0))
    }

    fn sync(&self) -> io::Result<()> {
        self.file.lock().unwrap().sync_all()
    }
}

/// Describes one run inside the run-storage file.
///
/// `start_offset` and `element_count` are meaningful only while `is_used`
/// is set; a cleared flag marks a free directory slot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunMetadata {
    /// Absolute byte offset of the run's first element.
    pub start_offset: u64,
    /// Number of elements in the run.
    pub element_count: u64,
    /// Whether this directory slot holds a live run.
    pub is_used: bool,
}

impl RunMetadata {
    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.start_offset);
        LittleEndian::write_u64(&mut buf[8..16], self.element_count);
        buf[16] = u8::from(self.is_used);
        buf[17..24].fill(0);
    }

    fn decode(buf: &[u8]) -> Self {
        RunMetadata {
            start_offset: LittleEndian::read_u64(&buf[0..8]),
            element_count: LittleEndian::read_u64(&buf[8..16]),
            is_used: buf[16] != 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RunFileHeader {
    max_runs: u32,
    run_count: u32,
}

impl RunFileHeader {
    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.max_runs);
        LittleEndian::write_u32(&mut buf[8..12], self.run_count);
    }

    fn decode(buf: &[u8]) -> Result<Self, SortError> {
        if buf[0..4] != MAGIC {
            return Err(SortError::Format("invalid magic".into()));
        }
        Ok(RunFileHeader {
            max_runs: LittleEndian::read_u32(&buf[4..8]),
            run_count: LittleEndian::read_u32(&buf[8..12]),
        })
    }
}

/// The run-storage container: directory bookkeeping plus the shared handle
/// the buffers and the generator's output worker write element data through.
pub struct RunFile {
    file: Arc<SharedFile>,
    header: RunFileHeader,
    directory: Vec<RunMetadata>,
}

impl RunFile {
    /// Creates a fresh run file with `max_runs` free directory slots,
    /// overwriting whatever was at `path`, and closes it again.
    pub fn create<P: AsRef<Path>>(path: P, max_runs: usize) -> Result<(), SortError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let header = RunFileHeader { max_runs: max_runs as u32, run_count: 0 };
        // zeroed entries decode as free slots
        let mut image = vec![0u8; (HEADER_BYTES + max_runs as u64 * ENTRY_BYTES) as usize];
        header.encode(&mut image[..HEADER_BYTES as usize]);
        file.write_all(&image)?;
        file.sync_all()?;

        log::debug!(
            "created run file {} with {} directory slots",
            path.as_ref().display(),
            max_runs
        );
        return Ok(());
    }

    /// Opens an existing run file, validating the magic and loading the
    /// whole directory into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SortError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut head = [0u8; HEADER_BYTES as usize];
        file.read_exact(&mut head).map_err(|err| truncated(err, "header"))?;
        let header = RunFileHeader::decode(&head)?;

        let mut directory = Vec::with_capacity(header.max_runs as usize);
        let mut entry = [0u8; ENTRY_BYTES as usize];
        for _ in 0..header.max_runs {
            file.read_exact(&mut entry).map_err(|err| truncated(err, "directory"))?;
            directory.push(RunMetadata::decode(&entry));
        }

        Ok(RunFile {
            file: Arc::new(SharedFile::new(file)),
            header,
            directory,
        })
    }

    /// Flushes the file to stable storage and closes it.
    pub fn close(self) -> Result<(), SortError> {
        self.file.sync()?;
        Ok(())
    }

    /// Claims the first free directory slot and returns its run id.
    ///
    /// The slot is persisted immediately with zeroed placement; the caller
    /// seals it later through [`update_run_metadata`](Self::update_run_metadata).
    pub fn allocate_new_run(&mut self) -> Result<u32, SortError> {
        let slot = self
            .directory
            .iter()
            .position(|entry| !entry.is_used)
            .ok_or(SortError::DirectoryFull)?;

        self.directory[slot] = RunMetadata { start_offset: 0, element_count: 0, is_used: true };
        self.header.run_count += 1;
        self.write_entry(slot)?;
        self.write_header()?;
        Ok(slot as u32)
    }

    /// Seals a run's placement, rewriting only its directory entry on disk.
    pub fn update_run_metadata(
        &mut self,
        run_id: u32,
        start_offset: u64,
        element_count: u64,
    ) -> Result<(), SortError> {
        let slot = self.check_id(run_id)?;
        self.directory[slot].start_offset = start_offset;
        self.directory[slot].element_count = element_count;
        self.write_entry(slot)
    }

    /// Returns the in-memory copy of a run's metadata.
    pub fn run_metadata(&self, run_id: u32) -> Result<RunMetadata, SortError> {
        let slot = self.check_id(run_id)?;
        Ok(self.directory[slot])
    }

    /// Returns the byte offset at which appended element data will land.
    pub fn append_offset(&self) -> Result<u64, SortError> {
        Ok(self.file.append_offset()?)
    }

    /// Hands out the shared handle for cursor-free random I/O.
    pub fn data_handle(&self) -> Arc<SharedFile> {
        Arc::clone(&self.file)
    }

    /// Number of directory slots.
    pub fn max_runs(&self) -> usize {
        self.header.max_runs as usize
    }

    /// Number of used directory slots.
    pub fn run_count(&self) -> usize {
        self.header.run_count as usize
    }

    /// Iterates over the used directory slots in id order.
    pub fn used_runs(&self) -> impl Iterator<Item = (u32, RunMetadata)> + '_ {
        self.directory
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_used)
            .map(|(slot, entry)| (slot as u32, *entry))
    }

    fn check_id(&self, run_id: u32) -> Result<usize, SortError> {
        let slot = run_id as usize;
        if slot >= self.directory.len() {
            return Err(SortError::InvalidRunId(run_id));
        }
        Ok(slot)
    }

    fn write_entry(&self, slot: usize) -> Result<(), SortError> {
        let mut buf = [0u8; ENTRY_BYTES as usize];
        self.directory[slot].encode(&mut buf);
        self.file
            .write_all_at(HEADER_BYTES + slot as u64 * ENTRY_BYTES, &buf)?;
        Ok(())
    }

    fn write_header(&self) -> Result<(), SortError> {
        let mut buf = [0u8; HEADER_BYTES as usize];
        self.header.encode(&mut buf);
        self.file.write_all_at(0, &buf)?;
        Ok(())
    }
}

fn truncated(err: io::Error, region: &str) -> SortError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        SortError::Format(format!("truncated {}", region))
    } else {
        SortError::Io(err)
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::PathBuf;

    use rstest::*;

    use super::{RunFile, RunMetadata, ENTRY_BYTES, HEADER_BYTES};
    use crate::error::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn run_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("runs.dat")
    }

    #[rstest]
    fn test_create_open_round_trip(tmp_dir: tempfile::TempDir) {
        let path = run_path(&tmp_dir);
        RunFile::create(&path, 8).unwrap();

        let mut run_file = RunFile::open(&path).unwrap();
        assert_eq!(run_file.max_runs(), 8);
        assert_eq!(run_file.run_count(), 0);
        assert_eq!(
            run_file.append_offset().unwrap(),
            HEADER_BYTES + 8 * ENTRY_BYTES
        );

        let first = run_file.allocate_new_run().unwrap();
        let second = run_file.allocate_new_run().unwrap();
        assert_eq!((first, second), (0, 1));

        let data_start = run_file.append_offset().unwrap();
        let payload = [0xABu8; 64];
        run_file
            .data_handle()
            .write_all_at(data_start, &payload)
            .unwrap();

        run_file.update_run_metadata(first, data_start, 16).unwrap();
        run_file.update_run_metadata(second, data_start + 64, 0).unwrap();
        run_file.close().unwrap();

        // everything must survive a reopen byte for byte
        let reopened = RunFile::open(&path).unwrap();
        assert_eq!(reopened.run_count(), 2);
        assert_eq!(
            reopened.run_metadata(first).unwrap(),
            RunMetadata { start_offset: data_start, element_count: 16, is_used: true }
        );
        assert_eq!(
            reopened.run_metadata(second).unwrap(),
            RunMetadata { start_offset: data_start + 64, element_count: 0, is_used: true }
        );
        assert!(!reopened.run_metadata(2).unwrap().is_used);

        let mut restored = [0u8; 64];
        reopened
            .data_handle()
            .read_exact_at(data_start, &mut restored)
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[rstest]
    fn test_open_rejects_bad_magic(tmp_dir: tempfile::TempDir) {
        let path = run_path(&tmp_dir);
        fs::write(&path, b"JUNKJUNKJUNKJUNKJUNKJUNK").unwrap();

        match RunFile::open(&path) {
            Err(SortError::Format(reason)) => assert!(reason.contains("magic")),
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }

    #[rstest]
    fn test_open_rejects_truncated_directory(tmp_dir: tempfile::TempDir) {
        let path = run_path(&tmp_dir);
        RunFile::create(&path, 4).unwrap();

        // chop the last directory entry in half
        let image = fs::read(&path).unwrap();
        fs::write(&path, &image[..image.len() - 12]).unwrap();

        match RunFile::open(&path) {
            Err(SortError::Format(reason)) => assert!(reason.contains("directory")),
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }

    #[rstest]
    fn test_directory_full(tmp_dir: tempfile::TempDir) {
        let path = run_path(&tmp_dir);
        RunFile::create(&path, 2).unwrap();

        let mut run_file = RunFile::open(&path).unwrap();
        run_file.allocate_new_run().unwrap();
        run_file.allocate_new_run().unwrap();
        assert!(matches!(
            run_file.allocate_new_run(),
            Err(SortError::DirectoryFull)
        ));
        assert_eq!(run_file.run_count(), 2);
    }

    #[rstest]
    fn test_invalid_run_id(tmp_dir: tempfile::TempDir) {
        let path = run_path(&tmp_dir);
        RunFile::create(&path, 2).unwrap();

        let mut run_file = RunFile::open(&path).unwrap();
        assert!(matches!(
            run_file.run_metadata(2),
            Err(SortError::InvalidRunId(2))
        ));
        assert!(matches!(
            run_file.update_run_metadata(7, 0, 0),
            Err(SortError::InvalidRunId(7))
        ));
    }

    #[rstest]
    fn test_used_runs_walk(tmp_dir: tempfile::TempDir) {
        let path = run_path(&tmp_dir);
        RunFile::create(&path, 4).unwrap();

        let mut run_file = RunFile::open(&path).unwrap();
        run_file.allocate_new_run().unwrap();
        run_file.allocate_new_run().unwrap();
        run_file.update_run_metadata(1, 120, 30).unwrap();

        let used: Vec<_> = run_file.used_runs().collect();
        assert_eq!(used.len(), 2);
        assert_eq!(used[0].0, 0);
        assert_eq!(used[1].0, 1);
        assert_eq!(used[1].1.element_count, 30);
    }
}
