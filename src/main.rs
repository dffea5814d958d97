use std::time::Duration;

use clap::Parser;
use lipbatch::cli::{Cli, Command, ShutdownController};
use lipbatch::runner::{start_mapping_dry_run, start_run, RunHandle};
use lipbatch::{LipResult, ProgressEvent, RunReport};

fn main() {
    lipbatch::logging::init();

    if let Err(e) = ShutdownController::install() {
        tracing::warn!("failed to install Ctrl+C handler: {e}");
    }

    match run() {
        Err(error) => {
            if ShutdownController::is_shutting_down() {
                eprintln!("interrupted");
                std::process::exit(ShutdownController::signal_exit_code());
            }
            eprintln!("error: {error}");
            std::process::exit(1);
        }
        Ok(report) => {
            if ShutdownController::is_shutting_down() {
                std::process::exit(ShutdownController::signal_exit_code());
            }
            if report.failed > 0 {
                std::process::exit(1);
            }
        }
    }
}

fn run() -> LipResult<RunReport> {
    let cli = Cli::parse();

    match cli.command {
        Command::Generate(args) => {
            let handle = start_run(args.to_config())?;
            drive(&handle);
            let report = finish(handle)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(report)
        }
        Command::TestMapping(args) => {
            let handle =
                start_mapping_dry_run(args.input.clone(), args.recursive, args.mapping_files.clone())?;
            drive(&handle);
            let report = finish(handle)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(report)
        }
    }
}

/// Pump events until the worker finishes, forwarding Ctrl+C to the run's
/// stop flag. Never blocks the worker: the channel is polled with a short
/// timeout.
fn drive(handle: &RunHandle) {
    loop {
        if ShutdownController::is_shutting_down() {
            handle.request_stop();
        }
        match handle.next_event(Duration::from_millis(40)) {
            Some(event) => print_event(&event),
            None => {
                if handle.is_finished() {
                    break;
                }
            }
        }
    }
}

fn finish(handle: RunHandle) -> LipResult<RunReport> {
    for event in handle.drain_events() {
        print_event(&event);
    }
    handle.join()
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Log(line) | ProgressEvent::Done(line) => println!("{line}"),
        ProgressEvent::Progress(n) => tracing::debug!(completed = n, "progress"),
    }
}
