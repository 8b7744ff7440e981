//! Block-wise run readers and writers.

use log;

use crate::element::{self, Element};
use crate::error::SortError;
use crate::run_file::{RunMetadata, SharedFile};

/// Default block capacity in elements.
pub const DEFAULT_BLOCK_CAPACITY: usize = 1024;

/// Sequential block reader scoped to one run.
///
/// Refills a fixed-capacity block from the run's byte range on demand and
/// never seeks backwards; exhaustion is reported through
/// [`next_item`](Self::next_item) returning `None`.
pub struct InputBuffer<'a, T: Element> {
    file: &'a SharedFile,
    run: RunMetadata,
    capacity: usize,
    block: Vec<T>,
    raw: Vec<u8>,
    cursor: usize,
    /// Elements fetched from the run so far.
    consumed: u64,
}

impl<'a, T: Element> InputBuffer<'a, T> {
    pub fn new(file: &'a SharedFile, run: RunMetadata, capacity: usize) -> Self {
        InputBuffer {
            file,
            run,
            capacity,
            block: Vec::with_capacity(capacity),
            raw: Vec::new(),
            cursor: 0,
            consumed: 0,
        }
    }

    /// Yields the next element of the run, or `None` once it is exhausted.
    pub fn next_item(&mut self) -> Result<Option<T>, SortError> {
        if self.cursor >= self.block.len() && !self.fill_block()? {
            return Ok(None);
        }
        let item = self.block[self.cursor];
        self.cursor += 1;
        Ok(Some(item))
    }

    fn fill_block(&mut self) -> Result<bool, SortError> {
        let remaining = self.run.element_count - self.consumed;
        if remaining == 0 {
            return Ok(false);
        }

        let count = remaining.min(self.capacity as u64) as usize;
        let offset = self.run.start_offset + self.consumed * T::WIDTH as u64;
        self.raw.resize(count * T::WIDTH, 0);
        self.file.read_exact_at(offset, &mut self.raw)?;

        element::decode_block(&self.raw, &mut self.block);
        self.cursor = 0;
        self.consumed += count as u64;
        Ok(true)
    }
}

/// Sequential block writer for a run starting at an absolute byte offset.
///
/// Dropping the buffer flushes any pending block as a last resort; the
/// failure there can only be logged, so call [`flush`](Self::flush)
/// explicitly wherever the error matters.
pub struct OutputBuffer<'a, T: Element> {
    file: &'a SharedFile,
    start_offset: u64,
    capacity: usize,
    block: Vec<T>,
    raw: Vec<u8>,
    /// Elements written to disk so far.
    written: u64,
}

impl<'a, T: Element> OutputBuffer<'a, T> {
    pub fn new(file: &'a SharedFile, start_offset: u64, capacity: usize) -> Self {
        OutputBuffer {
            file,
            start_offset,
            capacity,
            block: Vec::with_capacity(capacity),
            raw: Vec::new(),
            written: 0,
        }
    }

    /// Appends one element, writing the block out when it fills.
    pub fn push(&mut self, item: T) -> Result<(), SortError> {
        self.block.push(item);
        if self.block.len() == self.capacity {
            self.write_block()?;
        }
        Ok(())
    }

    /// Writes any partial block out.
    pub fn flush(&mut self) -> Result<(), SortError> {
        if !self.block.is_empty() {
            self.write_block()?;
        }
        Ok(())
    }

    /// Total elements accepted so far, including any still buffered.
    pub fn element_count(&self) -> u64 {
        self.written + self.block.len() as u64
    }

    fn write_block(&mut self) -> Result<(), SortError> {
        let offset = self.start_offset + self.written * T::WIDTH as u64;
        element::encode_block(&self.block, &mut self.raw);
        self.file.write_all_at(offset, &self.raw)?;
        self.written += self.block.len() as u64;
        self.block.clear();
        Ok(())
    }
}

impl<T: Element> Drop for OutputBuffer<'_, T> {
    fn drop(&mut self) {
        if !self.block.is_empty() {
            if let Err(err) = self.flush() {
                log::error!("output buffer flush failed on drop: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use rstest::*;

    use super::{InputBuffer, OutputBuffer};
    use crate::run_file::{RunFile, RunMetadata};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn open_run_file(dir: &tempfile::TempDir) -> RunFile {
        let path: PathBuf = dir.path().join("runs.dat");
        RunFile::create(&path, 4).unwrap();
        RunFile::open(&path).unwrap()
    }

    #[rstest]
    #[case(1024)]
    #[case(100)]
    #[case(1)]
    fn test_write_then_read_round_trip(tmp_dir: tempfile::TempDir, #[case] read_capacity: usize) {
        let run_file = open_run_file(&tmp_dir);
        let data_handle = run_file.data_handle();
        let start = run_file.append_offset().unwrap();

        // 2500 elements crosses several 1024-element write blocks
        let data: Vec<i32> = (0..2500).map(|i| i * 3 - 1200).collect();

        let mut writer = OutputBuffer::new(&data_handle, start, 1024);
        for &item in &data {
            writer.push(item).unwrap();
        }
        assert_eq!(writer.element_count(), 2500);
        writer.flush().unwrap();

        let run = RunMetadata { start_offset: start, element_count: 2500, is_used: true };
        let mut reader: InputBuffer<'_, i32> = InputBuffer::new(&data_handle, run, read_capacity);
        let mut restored = Vec::new();
        while let Some(item) = reader.next_item().unwrap() {
            restored.push(item);
        }
        assert_eq!(restored, data);
    }

    #[rstest]
    fn test_element_count_includes_pending(tmp_dir: tempfile::TempDir) {
        let run_file = open_run_file(&tmp_dir);
        let data_handle = run_file.data_handle();
        let start = run_file.append_offset().unwrap();

        let mut writer: OutputBuffer<'_, i32> = OutputBuffer::new(&data_handle, start, 8);
        for item in 0..10 {
            writer.push(item).unwrap();
        }
        // one full block written, two elements pending
        assert_eq!(writer.element_count(), 10);
        writer.flush().unwrap();
        assert_eq!(writer.element_count(), 10);
    }

    #[rstest]
    fn test_empty_run_yields_nothing(tmp_dir: tempfile::TempDir) {
        let run_file = open_run_file(&tmp_dir);
        let data_handle = run_file.data_handle();

        let run = RunMetadata { start_offset: 0, element_count: 0, is_used: true };
        let mut reader: InputBuffer<'_, i32> = InputBuffer::new(&data_handle, run, 16);
        assert_eq!(reader.next_item().unwrap(), None);
        assert_eq!(reader.next_item().unwrap(), None);
    }

    #[rstest]
    fn test_reader_stops_at_run_boundary(tmp_dir: tempfile::TempDir) {
        let run_file = open_run_file(&tmp_dir);
        let data_handle = run_file.data_handle();
        let start = run_file.append_offset().unwrap();

        let mut writer = OutputBuffer::new(&data_handle, start, 4);
        for item in [5i32, 6, 7, 8, 9, 10] {
            writer.push(item).unwrap();
        }
        writer.flush().unwrap();

        // scope the reader to the first four elements only
        let run = RunMetadata { start_offset: start, element_count: 4, is_used: true };
        let mut reader: InputBuffer<'_, i32> = InputBuffer::new(&data_handle, run, 4);
        let mut seen = Vec::new();
        while let Some(item) = reader.next_item().unwrap() {
            seen.push(item);
        }
        assert_eq!(seen, vec![5, 6, 7, 8]);
    }
}
