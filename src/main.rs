use std::error::Error;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::process;
use std::time::Instant;

use byteorder::{LittleEndian, WriteBytesExt};
use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use runsort::{Element, InputBuffer, Merger, RunFile, RunGenerator, RunMetadata};

/// Reference element configuration: 32-bit signed integers.
type Elem = i32;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let result = match arg_parser.subcommand() {
        Some(("generate", sub)) => run_generate(sub),
        Some(("sort", sub)) => run_sort(sub),
        Some(("verify", sub)) => run_verify(sub),
        Some(("inspect", sub)) => run_inspect(sub),
        _ => unreachable!("subcommand is required"),
    };

    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}

/// Writes `count` random elements as raw packed little-endian data.
fn run_generate(args: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let output = args.value_of("output").expect("value is required");
    let count: u64 = args.value_of_t_or_exit("count");
    let seed: Option<u64> = args
        .is_present("seed")
        .then(|| args.value_of_t_or_exit("seed"));

    let mut rng: StdRng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    log::info!("writing {} random elements to {}", count, output);
    let mut writer = io::BufWriter::new(fs::File::create(output)?);
    for _ in 0..count {
        writer.write_i32::<LittleEndian>(rng.gen())?;
    }
    writer.flush()?;

    Ok(())
}

/// Runs both sort phases end to end.
fn run_sort(args: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let input = Path::new(args.value_of("input").expect("value is required"));
    let runs_path = args.value_of("runs_file").expect("value is required");

    let workspace_size = elements_from(args, "workspace_size");
    let block_size = elements_from(args, "block_size");
    let merge_block_size = elements_from(args, "merge_block_size");

    let element_count = fs::metadata(input)
        .map_err(|err| format!("input file not accessible: {}", err))?
        .len()
        / Elem::WIDTH as u64;
    let max_runs = if args.is_present("max_runs") {
        args.value_of_t_or_exit("max_runs")
    } else {
        directory_capacity(element_count, workspace_size as u64)
    };

    RunFile::create(runs_path, max_runs)?;
    let mut run_file = RunFile::open(runs_path)?;

    log::info!("phase 1: generating runs from {}", input.display());
    let started = Instant::now();
    let generator: RunGenerator<Elem> = RunGenerator::new(workspace_size).block_size(block_size);
    let runs = generator.generate_runs(input, &mut run_file)?;
    log::info!(
        "generated {} runs in {:.3}s",
        runs.len(),
        started.elapsed().as_secs_f64()
    );
    for (index, run) in runs.iter().enumerate() {
        log::debug!("run {}: {} elements", index, run.element_count);
    }

    if runs.is_empty() {
        log::info!("input holds no complete element, nothing to merge");
        run_file.close()?;
        return Ok(());
    }

    log::info!("phase 2: merging {} runs", runs.len());
    let started = Instant::now();
    let merger: Merger<Elem> = Merger::new().block_size(merge_block_size);
    let sorted = merger.external_merge_sort(&runs, &mut run_file)?;
    log::info!(
        "merged {} elements in {:.3}s",
        sorted.element_count,
        started.elapsed().as_secs_f64()
    );

    if args.is_present("verify") {
        if !run_is_sorted(&run_file, sorted)? {
            return Err("final run failed the sortedness check".into());
        }
        log::info!("final run verified sorted");
    }

    run_file.close()?;
    Ok(())
}

/// Checks the non-decreasing invariant for one run or the whole directory.
fn run_verify(args: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let runs_path = args.value_of("runs_file").expect("value is required");
    let run_file = RunFile::open(runs_path)?;

    let selected: Option<u32> = args
        .is_present("run")
        .then(|| args.value_of_t_or_exit("run"));

    let mut checked = 0;
    let mut failures = 0;
    for (run_id, run) in run_file.used_runs() {
        if selected.map_or(false, |wanted| wanted != run_id) {
            continue;
        }
        checked += 1;
        if run_is_sorted(&run_file, run)? {
            log::debug!("run {} sorted ({} elements)", run_id, run.element_count);
        } else {
            log::error!("run {} is out of order", run_id);
            failures += 1;
        }
    }

    if let Some(wanted) = selected {
        if checked == 0 {
            return Err(format!("run {} is not in use", wanted).into());
        }
    }
    if failures > 0 {
        return Err(format!("{} of {} runs failed verification", failures, checked).into());
    }

    log::info!("verification succeeded: {} runs sorted", checked);
    Ok(())
}

/// Prints the header and the used directory slots of a run file.
fn run_inspect(args: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let runs_path = args.value_of("runs_file").expect("value is required");
    let run_file = RunFile::open(runs_path)?;

    println!("run file: {}", runs_path);
    println!(
        "directory: {} slots, {} used",
        run_file.max_runs(),
        run_file.run_count()
    );
    for (run_id, run) in run_file.used_runs() {
        println!(
            "  run {:>5}: {:>12} elements at byte {}",
            run_id, run.element_count, run.start_offset
        );
    }

    Ok(())
}

/// Reads a run back through an [`InputBuffer`] and checks element order.
fn run_is_sorted(run_file: &RunFile, run: RunMetadata) -> Result<bool, Box<dyn Error>> {
    let data = run_file.data_handle();
    let mut reader: InputBuffer<'_, Elem> = InputBuffer::new(&data, run, 1024);

    let mut previous = match reader.next_item()? {
        Some(item) => item,
        None => return Ok(true),
    };
    let mut count: u64 = 1;
    while let Some(item) = reader.next_item()? {
        if item < previous {
            log::error!("order violation: {} after {}", item, previous);
            return Ok(false);
        }
        previous = item;
        count += 1;
    }

    Ok(count == run.element_count)
}

/// Converts a pre-validated byte-size argument into an element count.
fn elements_from(args: &clap::ArgMatches, name: &str) -> usize {
    let size = args
        .value_of(name)
        .expect("value is required")
        .parse::<ByteSize>()
        .expect("value is pre-validated");
    (size.as_u64() as usize / Elem::WIDTH).max(1)
}

/// Directory slots for sorting `element_count` elements with a
/// `workspace`-element workspace: worst-case run count, the merge outputs,
/// and a little slack.
fn directory_capacity(element_count: u64, workspace: u64) -> usize {
    let runs = ((element_count + workspace - 1) / workspace).max(1);
    let slack = 64 - runs.leading_zeros() as u64;
    (2 * runs + slack + 1) as usize
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("runsort")
        .about("external merge sort over a run-storage file")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .subcommand(
            clap::App::new("generate")
                .about("write a file of random elements")
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("data file to create")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("count")
                        .short('n')
                        .long("count")
                        .help("number of elements to write")
                        .required(true)
                        .takes_value(true)
                        .validator(validate::<u64>),
                )
                .arg(
                    clap::Arg::new("seed")
                        .short('s')
                        .long("seed")
                        .help("seed for reproducible data")
                        .takes_value(true)
                        .validator(validate::<u64>),
                ),
        )
        .subcommand(
            clap::App::new("sort")
                .about("sort a data file through a run-storage file")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("runs_file")
                        .short('r')
                        .long("runs-file")
                        .help("run-storage file to create and fill")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("workspace_size")
                        .short('w')
                        .long("workspace-size")
                        .help("selection workspace size")
                        .takes_value(true)
                        .default_value("4MiB")
                        .validator(validate_size),
                )
                .arg(
                    clap::Arg::new("block_size")
                        .short('b')
                        .long("block-size")
                        .help("generator I/O block size")
                        .takes_value(true)
                        .default_value("4MiB")
                        .validator(validate_size),
                )
                .arg(
                    clap::Arg::new("merge_block_size")
                        .long("merge-block-size")
                        .help("merge I/O block size")
                        .takes_value(true)
                        .default_value("4KiB")
                        .validator(validate_size),
                )
                .arg(
                    clap::Arg::new("max_runs")
                        .long("max-runs")
                        .help("directory slots (computed from the input size by default)")
                        .takes_value(true)
                        .validator(validate::<usize>),
                )
                .arg(
                    clap::Arg::new("verify")
                        .long("verify")
                        .help("check the final run after merging"),
                ),
        )
        .subcommand(
            clap::App::new("verify")
                .about("check that stored runs are sorted")
                .arg(
                    clap::Arg::new("runs_file")
                        .short('r')
                        .long("runs-file")
                        .help("run-storage file to check")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("run")
                        .long("run")
                        .help("check a single run id")
                        .takes_value(true)
                        .validator(validate::<u32>),
                ),
        )
        .subcommand(
            clap::App::new("inspect")
                .about("print the directory of a run-storage file")
                .arg(
                    clap::Arg::new("runs_file")
                        .short('r')
                        .long("runs-file")
                        .help("run-storage file to inspect")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .get_matches()
}

fn validate<T: std::str::FromStr>(value: &str) -> Result<(), String>
where
    T::Err: std::fmt::Display,
{
    match value.parse::<T>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("number format incorrect: {}", err)),
    }
}

fn validate_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
