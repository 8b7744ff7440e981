//! Optimal merge-tree driver.
//!
//! Runs are merged two at a time, always the two shortest first, with the
//! intermediate results fed back into a min-heap — a Huffman schedule. When
//! run lengths are unequal, as they are after replacement selection, this
//! ordering minimises the total bytes re-read and rewritten across the merge
//! phase.

use log;
use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

use crate::buffer::{InputBuffer, OutputBuffer, DEFAULT_BLOCK_CAPACITY};
use crate::element::Element;
use crate::error::SortError;
use crate::run_file::{RunFile, RunMetadata};

/// Heap entry ordering runs by their element count; ties resolve
/// arbitrarily and do not affect the output.
struct MergeCandidate(RunMetadata);

impl PartialEq for MergeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.0.element_count == other.0.element_count
    }
}

impl Eq for MergeCandidate {}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.element_count.cmp(&other.0.element_count)
    }
}

/// Sequential merger over the runs of one [`RunFile`].
pub struct Merger<T: Element> {
    block_size: usize,
    element_type: PhantomData<T>,
}

impl<T: Element> Default for Merger<T> {
    fn default() -> Self {
        Merger::new()
    }
}

impl<T: Element> Merger<T> {
    /// Creates a merger with the default I/O block size.
    pub fn new() -> Self {
        Merger {
            block_size: DEFAULT_BLOCK_CAPACITY,
            element_type: PhantomData,
        }
    }

    /// Sets the I/O block size, in elements, used for each buffer of a
    /// pairwise merge.
    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        return self;
    }

    /// Merges `runs` down to a single sorted run and returns its metadata.
    ///
    /// Every pairwise merge allocates a fresh directory slot; the consumed
    /// runs keep their slots and their data, so the file only ever grows.
    ///
    /// # Panics
    ///
    /// Panics if `runs` is empty. Phase 1 yields no runs only for an empty
    /// input, which the caller handles before merging.
    pub fn external_merge_sort(
        &self,
        runs: &[RunMetadata],
        run_file: &mut RunFile,
    ) -> Result<RunMetadata, SortError> {
        assert!(!runs.is_empty(), "cannot merge an empty run list");

        let mut heap: BinaryHeap<Reverse<MergeCandidate>> = runs
            .iter()
            .map(|&run| Reverse(MergeCandidate(run)))
            .collect();

        while heap.len() > 1 {
            let (run_a, run_b) = match (heap.pop(), heap.pop()) {
                (Some(Reverse(MergeCandidate(a))), Some(Reverse(MergeCandidate(b)))) => (a, b),
                _ => break,
            };

            log::debug!(
                "merging runs of {} and {} elements",
                run_a.element_count,
                run_b.element_count
            );
            let merged = self.merge_pair(run_file, &run_a, &run_b)?;
            heap.push(Reverse(MergeCandidate(merged)));
        }

        match heap.pop() {
            Some(Reverse(MergeCandidate(run))) => {
                log::info!("merge finished: one run of {} elements", run.element_count);
                Ok(run)
            }
            None => unreachable!("heap was seeded with at least one run"),
        }
    }

    /// Two-way merges `run_a` and `run_b` into a freshly allocated run and
    /// seals its directory entry.
    fn merge_pair(
        &self,
        run_file: &mut RunFile,
        run_a: &RunMetadata,
        run_b: &RunMetadata,
    ) -> Result<RunMetadata, SortError> {
        let run_id = run_file.allocate_new_run()?;
        let start_offset = run_file.append_offset()?;
        let data = run_file.data_handle();

        let mut reader_a = InputBuffer::<T>::new(&data, *run_a, self.block_size);
        let mut reader_b = InputBuffer::<T>::new(&data, *run_b, self.block_size);
        let mut writer = OutputBuffer::<T>::new(&data, start_offset, self.block_size);

        let mut item_a = reader_a.next_item()?;
        let mut item_b = reader_b.next_item()?;

        while let (Some(a), Some(b)) = (item_a, item_b) {
            // ties take from the second run
            if a < b {
                writer.push(a)?;
                item_a = reader_a.next_item()?;
            } else {
                writer.push(b)?;
                item_b = reader_b.next_item()?;
            }
        }
        while let Some(a) = item_a {
            writer.push(a)?;
            item_a = reader_a.next_item()?;
        }
        while let Some(b) = item_b {
            writer.push(b)?;
            item_b = reader_b.next_item()?;
        }

        writer.flush()?;
        let element_count = writer.element_count();
        drop(writer);

        run_file.update_run_metadata(run_id, start_offset, element_count)?;
        run_file.run_metadata(run_id)
    }
}
