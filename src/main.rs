use std::sync::Arc;

use clap::Parser;
use lotwatch::cli::{Cli, Command};
use lotwatch::config::Config;
use lotwatch::pipeline::{self, Session};
use lotwatch::store::StoreStats;
use lotwatch::{interrupt, logging};

fn print_status(stats: &StoreStats) {
    println!("{:<20} {:>10}", "snapshots", stats.snapshots);
    println!("{:<20} {:>10}", "distinct vins", stats.distinct_vins);
    println!("{:<20} {:>10}", "snapshot dates", stats.snapshot_dates);
    println!("{:<20} {:>10}", "price history", stats.price_history);
    println!("{:<20} {:>10}", "listing history", stats.listing_history);
    println!("{:<20} {:>10}", "enriched", stats.enriched);
    println!("{:<20} {:>10}", "backlog", stats.backlog);

    let latest = stats
        .latest_snapshot_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "never".to_string());
    println!("{:<20} {:>10}", "latest snapshot", latest);
}

fn open_session(config: Config) -> Session {
    match Session::open(config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error opening database: {e}");
            std::process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("warning: could not open log file: {e}");
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }
    };
    config.apply_global_args(&cli);

    match cli.command {
        Command::Acquire(args) => {
            config.apply_acquire_args(&args);
            let session = open_session(config);
            if let Err(e) = interrupt::watch_ctrl_c(Arc::clone(&session.interrupt)) {
                eprintln!("warning: could not install ctrl-c handler: {e}");
            }

            match pipeline::acquire_replay(&session, &args.replay) {
                Ok(report) => {
                    println!(
                        "{:?} after {} rounds: {} rows, {} written ({} new today)",
                        report.state,
                        report.productive_rounds,
                        report.rows_extracted,
                        report.rows_written,
                        report.new_today
                    );
                    if let Some(reason) = report.abort_reason {
                        eprintln!("aborted: {reason}");
                        std::process::exit(2);
                    }
                }
                Err(e) => {
                    eprintln!("Error during acquisition: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Enrich(args) => {
            if let Err(e) = config.apply_enrich_args(&args) {
                eprintln!("{e}");
                std::process::exit(1);
            }
            let session = open_session(config);

            match pipeline::enrich_online(&session) {
                Ok(report) => {
                    println!(
                        "enriched {} of {} backlog vins ({} decoded, {} lookups, {} cache hits)",
                        report.written, report.backlog, report.decoded, report.lookup_calls, report.cache_hits
                    );
                    if report.failed_batches > 0 {
                        eprintln!("{} batches could not be written", report.failed_batches);
                        std::process::exit(2);
                    }
                }
                Err(e) => {
                    eprintln!("Error during enrichment: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Import(args) => {
            let session = open_session(config);

            match pipeline::import(&session, &args.file, args.date) {
                Ok(report) => {
                    println!(
                        "imported {} rows for {}, {} written",
                        report.rows, report.snapshot_date, report.written
                    );
                }
                Err(e) => {
                    eprintln!("Error importing {}: {e}", args.file.display());
                    std::process::exit(1);
                }
            }
        }
        Command::Status(args) => {
            let session = open_session(config);

            match session.store.stats() {
                Ok(stats) => {
                    if args.json {
                        match serde_json::to_string_pretty(&stats) {
                            Ok(json) => println!("{json}"),
                            Err(e) => {
                                eprintln!("Error serializing status: {e}");
                                std::process::exit(1);
                            }
                        }
                    } else {
                        print_status(&stats);
                    }
                }
                Err(e) => {
                    eprintln!("Error reading status: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
