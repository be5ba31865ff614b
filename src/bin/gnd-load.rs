//! CLI tool to ingest MARC21-XML authority dumps into JSON lines.

use clap::Parser;
use env_logger::Env;
use gnd_ingest::{
    DispatchTable, DocumentSink, InMemoryLookup, JsonLinesSink, Pipeline, PipelineConfig,
    RunSummary, TrailingBlock,
};
use log::info;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;

/// Ingest GND authority records and write one JSON document per record.
///
/// Inputs are read one after another; `-` (or no input at all) reads stdin.
#[derive(Parser)]
#[command(name = "gnd-load")]
struct Cli {
    /// MARC21-XML files to ingest
    inputs: Vec<String>,

    /// Pipeline configuration file (JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Dispatch table file (JSON) replacing the built-in GND table
    #[arg(short, long)]
    dispatch: Option<String>,

    /// JSON lines of earlier documents used to resolve referrals
    #[arg(short, long)]
    lookup: Option<String>,

    /// Write documents to file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Worker threads (0 = one per CPU)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Admission queue capacity
    #[arg(long)]
    queue: Option<usize>,

    /// Emit a record left open at the end of the input instead of dropping it
    #[arg(long)]
    keep_truncated: bool,

    /// Do not store the raw record markup in the documents
    #[arg(long)]
    no_fullrecord: bool,

    /// Log per-record details
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error in configuration: {e}");
            process::exit(1);
        }
    };

    let table = match &cli.dispatch {
        Some(path) => DispatchTable::from_path(path),
        None => DispatchTable::gnd(),
    };
    let table = match table {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error loading dispatch table: {e}");
            process::exit(1);
        }
    };

    let mut pipeline = match Pipeline::new(config, table) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error in configuration: {e}");
            process::exit(1);
        }
    };

    if let Some(path) = &cli.lookup {
        let lookup = File::open(path)
            .map_err(|e| e.to_string())
            .and_then(|file| {
                InMemoryLookup::from_json_lines(BufReader::new(file)).map_err(|e| e.to_string())
            });
        match lookup {
            Ok(lookup) => {
                info!("loaded {} authority records from {path}", lookup.len());
                pipeline = pipeline.with_lookup(Arc::new(lookup));
            }
            Err(e) => {
                eprintln!("Error reading lookup file '{path}': {e}");
                process::exit(1);
            }
        }
    }

    let output: Box<dyn Write + Send> = match &cli.output {
        Some(out_path) => {
            if let Some(parent) = Path::new(out_path.as_str()).parent()
                && !parent.as_os_str().is_empty()
                && fs::create_dir_all(parent).is_err()
            {
                eprintln!("Error creating output directory for '{out_path}'");
                process::exit(1);
            }
            match File::create(out_path) {
                Ok(file) => Box::new(file),
                Err(e) => {
                    eprintln!("Error creating output file '{out_path}': {e}");
                    process::exit(1);
                }
            }
        }
        None => Box::new(io::stdout()),
    };
    let mut sink = JsonLinesSink::new(output);

    let inputs = if cli.inputs.is_empty() {
        vec!["-".to_string()]
    } else {
        cli.inputs.clone()
    };

    let mut total = RunSummary::default();
    for input in &inputs {
        info!("ingesting {input}");
        let result = if input == "-" {
            pipeline.run(BufReader::new(io::stdin()), &mut sink)
        } else {
            match File::open(input) {
                Ok(file) => pipeline.run(BufReader::new(file), &mut sink),
                Err(e) => {
                    eprintln!("Error reading input file '{input}': {e}");
                    process::exit(1);
                }
            }
        };
        match result {
            Ok(summary) => {
                info!("{input}: {summary}");
                total += summary;
            }
            Err(e) => {
                eprintln!("Pipeline error in '{input}': {e}");
                // keep what earlier inputs produced
                let _ = sink.commit();
                process::exit(1);
            }
        }
    }

    if inputs.len() > 1 {
        info!("total: {total}");
    }
    if let Err(e) = sink.into_inner() {
        eprintln!("Error writing output: {e}");
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, gnd_ingest::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(queue) = cli.queue {
        config.admission_capacity = queue;
    }
    if cli.keep_truncated {
        config.trailing_block = TrailingBlock::Emit;
    }
    if cli.no_fullrecord {
        config.keep_full_record = false;
    }
    config.validate()?;
    Ok(config)
}
