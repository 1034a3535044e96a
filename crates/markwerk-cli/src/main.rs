// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Markwerk — grade scanned multiple-choice answer sheets.
//
// Entry point. Initialises logging, wires Ctrl-C to batch cancellation and
// maps the run outcome to an exit code.

mod args;
mod data_dir;
mod run;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use markwerk_core::error::MarkwerkError;
use markwerk_core::human_errors::humanize_error;
use tokio_util::sync::CancellationToken;

use args::Args;

/// How long blocking recognition work may keep running after the batch ends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Markwerk starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => return fatal(&MarkwerkError::Io(err)),
    };
    let code = runtime.block_on(grade(args));
    // Pages abandoned after a timeout may still be decoding.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}

async fn grade(args: Args) -> ExitCode {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing pages in progress");
            on_interrupt.cancel();
        }
    });

    let outcome = match run::run(&args, cancel).await {
        Ok(outcome) => outcome,
        Err(err) => return fatal(&err),
    };
    if let Err(err) = run::write_report(&outcome, args.output.as_deref()) {
        return fatal(&err);
    }
    run::log_summary(&outcome);
    if outcome.batch.aborted {
        explain(&MarkwerkError::BatchAborted);
    }
    ExitCode::from(outcome.exit_code())
}

fn fatal(err: &MarkwerkError) -> ExitCode {
    tracing::error!(error = %err, "Run failed");
    explain(err);
    ExitCode::from(run::EXIT_FATAL)
}

fn explain(err: &MarkwerkError) {
    let human = humanize_error(err);
    tracing::debug!(severity = ?human.severity, retriable = human.retriable, "Error explained");
    eprintln!("markwerk: {}\n  {}", human.message, human.suggestion);
    if human.retriable {
        eprintln!("  Running the same command again may succeed.");
    }
}
