//! `runsort` is a two-phase external merge sort for binary files of
//! fixed-width records that do not fit in working memory.
//!
//! Sorting happens in two passes over a single self-describing run-storage
//! file. During the first pass a replacement-selection generator, driven by a
//! loser tree over a fixed workspace, turns the input into sorted runs
//! averaging twice the workspace size; during the second pass the runs are
//! merged two at a time following a Huffman-shaped schedule, so the total
//! bytes moved are minimal.
//!
//! # Overview
//!
//! `runsort` supports the following features:
//!
//! * **Bounded memory:**
//!   the workspace and the I/O blocks are the only per-sort allocations and
//!   both are sized explicitly, so arbitrarily large inputs sort in a fixed
//!   memory budget.
//! * **Pipelined run generation:**
//!   input reading, selection and run writing overlap on three threads with
//!   double-buffered blocks on both file ends.
//! * **Optimal merge order:**
//!   a min-heap over run lengths schedules pairwise merges Huffman-style,
//!   minimising rewritten bytes for the unequal runs replacement selection
//!   produces.
//! * **Self-describing storage:**
//!   runs live in one container file with a validated header and a fixed-slot
//!   directory, so any phase (or an external tool) can walk them back.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use runsort::{Merger, RunFile, RunGenerator};
//!
//! fn main() -> Result<(), runsort::SortError> {
//!     RunFile::create("runs.dat", 1000)?;
//!     let mut run_file = RunFile::open("runs.dat")?;
//!
//!     let generator: RunGenerator<i32> = RunGenerator::new(1024 * 1024);
//!     let runs = generator.generate_runs(Path::new("input.dat"), &mut run_file)?;
//!
//!     if !runs.is_empty() {
//!         let merger: Merger<i32> = Merger::new();
//!         let sorted = merger.external_merge_sort(&runs, &mut run_file)?;
//!         println!("sorted run holds {} elements", sorted.element_count);
//!     }
//!
//!     run_file.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod element;
pub mod error;
pub mod generator;
pub mod loser_tree;
pub mod merger;
pub mod run_file;

pub use buffer::{InputBuffer, OutputBuffer};
pub use element::Element;
pub use error::SortError;
pub use generator::RunGenerator;
pub use loser_tree::{LoserTree, Slot};
pub use merger::Merger;
pub use run_file::{RunFile, RunMetadata, SharedFile};
