//! hp-replay - run a breakpoint scenario against the scripted backend and print debug events.

mod scenario;

use anyhow::{anyhow, Context};
use clap::Parser;
use haltpoint::config::EngineConfig;
use haltpoint::debugger::backend::scripted::ScriptedBackend;
use haltpoint::debugger::event::{ChannelSink, EventEnvelope};
use haltpoint::debugger::{Backend, DebugSession};
use log::warn;
use scenario::Scenario;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (default: ~/.config/haltpoint/engine.toml)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Disable engine logs
    #[clap(short, long)]
    quiet: bool,

    /// Scenario file
    scenario: PathBuf,
}

fn print_event(envelope: &EventEnvelope) {
    match envelope.tracee {
        Some(tracee) => println!("[thread {tracee}] {}", envelope.event),
        None => println!("[session] {}", envelope.event),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if !args.quiet {
        env_logger::init();
    }

    let config = EngineConfig::from_file(args.config.as_deref()).context("load engine config")?;
    let scenario = Scenario::from_file(&args.scenario)?;

    let backend = Arc::new(ScriptedBackend::new());
    scenario.prepare(&backend);

    let (sink, events) = ChannelSink::new(config.event_queue_capacity);
    let printer = thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || events.iter().for_each(|envelope| print_event(&envelope)))?;

    let stats = {
        let session = DebugSession::new(
            config,
            Backend::from_shared(backend.clone()),
            Arc::new(sink),
        );

        for request in scenario.breakpoints {
            let id = session.breakpoints().create(request);
            if let Err(e) = session.breakpoints().bind(id) {
                warn!(target: "replay", "bind breakpoint {id}: {e}");
            }
        }

        for action in &scenario.actions {
            action.apply(&session, &backend)?;
            if let Err(e) = session.process_events(Duration::ZERO) {
                if !e.is_fatal() {
                    return Err(e.into());
                }
                warn!(target: "replay", "scenario stopped: {e}");
                break;
            }
        }

        session.stats()
    };

    printer
        .join()
        .map_err(|_| anyhow!("event printer thread panicked"))?;
    println!(
        "breakpoints: {}, watchpoints: {}, bound locations: {}",
        stats.breakpoints, stats.watchpoints, stats.bound_locations
    );
    Ok(())
}
