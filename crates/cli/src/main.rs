//! Memory hierarchy simulator CLI.
//!
//! This binary drives a hierarchy described in JSON with a request trace. It performs:
//! 1. **Build:** Loads the hierarchy description and constructs every component.
//! 2. **Replay:** Issues each trace entry from its requester at the requested cycle.
//! 3. **Drain:** Runs until the hierarchy is idle (or the watchdog fires).
//! 4. **Report:** Prints the statistics of every component, optionally filtered by section.

use std::error::Error;
use std::fs;
use std::process::ExitCode;

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use memhier_core::System;
use memhier_core::config::HierarchyConfig;
use memhier_core::protocol::Command;

#[derive(Parser, Debug)]
#[command(
    name = "memsim",
    author,
    version,
    about = "Inclusive MESI/MSI cache-coherence simulator",
    long_about = "Build a memory hierarchy from a JSON description, replay a JSON request trace through it, and print statistics.\n\nExamples:\n  memsim -c configs/two_level.json -t traces/sharing.json\n  memsim -c configs/two_level.json -t traces/sharing.json -s events -s latency\n\nSet RUST_LOG (e.g. RUST_LOG=memhier_core=debug) for protocol tracing."
)]
struct Cli {
    /// Hierarchy description (caches, memories, requesters).
    #[arg(short, long)]
    config: String,

    /// Request trace to replay.
    #[arg(short, long)]
    trace: Option<String>,

    /// Statistics sections to print (events, states, hits, evictions, latency, prefetch).
    #[arg(short, long)]
    section: Vec<String>,

    /// Overrides the configured cycle limit.
    #[arg(long)]
    max_cycles: Option<u64>,
}

/// Operation of one trace entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
enum TraceOp {
    GetS,
    GetX,
    GetSX,
    Prefetch,
    FlushLine,
    FlushLineInv,
    FlushAll,
    Write,
    Evict,
}

/// One request of the trace.
#[derive(Clone, Debug, Deserialize)]
struct TraceEntry {
    /// Cycle at which the request is issued.
    #[serde(default)]
    at: u64,
    /// Requester that issues it.
    requester: String,
    op: TraceOp,
    #[serde(default)]
    addr: u64,
    /// Byte stored by `Write`.
    #[serde(default)]
    value: u8,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Builds the hierarchy, replays the trace and prints statistics.
fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let mut config = HierarchyConfig::from_file(&cli.config)?;
    if let Some(limit) = cli.max_cycles {
        config.max_cycles = limit;
    }
    let mut system = System::new(&config)?;

    let mut trace: Vec<TraceEntry> = match &cli.trace {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Vec::new(),
    };
    trace.sort_by_key(|e| e.at);
    info!(entries = trace.len(), "trace loaded");

    for entry in &trace {
        let now = system.simulator.cycle();
        if entry.at > now {
            system.run_for(entry.at - now)?;
        }
        issue(&mut system, entry)?;
    }
    let cycles = system.run()?;
    println!("Simulation finished at cycle {cycles}");
    println!();

    let mut out = String::new();
    system.write_stats(&cli.section, &mut out)?;
    print!("{out}");
    Ok(())
}

/// Applies one trace entry to its requester.
fn issue(system: &mut System, entry: &TraceEntry) -> Result<(), Box<dyn Error>> {
    let requester = system
        .simulator
        .requester_mut(&entry.requester)
        .ok_or_else(|| format!("trace names unknown requester '{}'", entry.requester))?;
    match entry.op {
        TraceOp::GetS => {
            let _ = requester.issue(Command::GetS, entry.addr);
        }
        TraceOp::GetX => {
            let _ = requester.issue(Command::GetX, entry.addr);
        }
        TraceOp::GetSX => {
            let _ = requester.issue(Command::GetSX, entry.addr);
        }
        TraceOp::Prefetch => {
            let _ = requester.prefetch(entry.addr);
        }
        TraceOp::FlushLine => {
            let _ = requester.flush_line(entry.addr, false);
        }
        TraceOp::FlushLineInv => {
            let _ = requester.flush_line(entry.addr, true);
        }
        TraceOp::FlushAll => {
            let _ = requester.flush_all();
        }
        TraceOp::Write => {
            if !requester.write(entry.addr, entry.value) {
                warn!(requester = %entry.requester, addr = entry.addr, "write to a line not held exclusively");
            }
        }
        TraceOp::Evict => {
            if !requester.evict(entry.addr) {
                warn!(requester = %entry.requester, addr = entry.addr, "evict of a line not held");
            }
        }
    }
    Ok(())
}
