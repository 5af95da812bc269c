mod analyzer;
mod client;
mod error;
mod extractor;
mod fetcher;
mod models;
mod orchestrator;
mod roster;
mod transcript;

#[cfg(test)]
mod test_support;

use anyhow::{Result, anyhow};
use clap::{Arg, Command, value_parser};
use client::HttpTransport;
use fetcher::StatementFetcher;
use models::{Applicant, Config};
use orchestrator::{Orchestrator, RunReport};
use roster::{ApplicantSource, CsvRoster, ResultSink, ensure_working_copy};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use transcript::Transcript;

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .map_err(|err| anyhow!("invalid log_level '{}': {}", log_level, err))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!("failed to install logger: {}", err))
}

/// Resolves on Ctrl+C. If the handler cannot be installed the run just never
/// gets interrupted.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("abit-reconciler")
        .version("0.1")
        .about("Checks which applicants from a roster still need a call")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("concurrency")
                .short('j')
                .long("concurrency")
                .value_name("N")
                .help("Maximum simultaneous requests to the statements API")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("roster")
                .long("roster")
                .value_name("FILE")
                .help("Roster CSV to check (overrides roster_path)"),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    // Load or create configuration
    let mut config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default().save_to_file(config_file)?;
        println!(
            "⚠️  Please edit {} and set roster_path, then run the program again.",
            config_file
        );
        return Ok(());
    };

    if let Some(concurrency) = matches.get_one::<usize>("concurrency") {
        config.concurrent_requests = *concurrency;
    }
    if let Some(roster) = matches.get_one::<String>("roster") {
        config.roster_path = roster.clone();
    }
    config.validate()?;
    init_tracing(&config.log_level)?;

    if !Path::new(&config.roster_path).exists() {
        println!("❌ Error: roster not found: {}", config.roster_path);
        return Ok(());
    }
    if ensure_working_copy(&config.roster_path, &config.output_path)? {
        println!("📄 Created results file: {}", config.output_path);
    } else {
        println!("📂 Using existing results file: {}", config.output_path);
    }

    let roster = CsvRoster::new(&config.output_path, &config.output_column_name);
    let mut applicants = roster.load()?;
    let pending = applicants.iter().filter(|a| a.needs_resolution()).count();

    println!("👥 Applicants in roster: {}", applicants.len());
    if pending == 0 {
        println!("✅ All applicants are already checked.");
        return Ok(());
    }
    println!(
        "🔍 To check: {} (up to {} simultaneous requests)",
        pending, config.concurrent_requests
    );
    println!("   Press Ctrl+C to stop safely and keep the progress.");

    let transcript = if config.transcript_path.trim().is_empty() {
        Transcript::disabled()
    } else {
        Transcript::open(&config.transcript_path)?
    };
    let fetcher = StatementFetcher::new(
        HttpTransport::new(config.api_url.clone(), config.fetch.request_timeout()),
        Arc::new(Semaphore::new(config.concurrent_requests)),
        config.fetch.clone(),
        Arc::new(transcript),
    );

    let report = Orchestrator::new(fetcher)
        .run(&mut applicants, interrupted(), |progress| {
            println!(
                "[{}/{}] {} → {}",
                progress.completed,
                progress.total,
                progress.applicant.search_name,
                progress.applicant.final_result.as_deref().unwrap_or("")
            );
        })
        .await;

    print_summary(&applicants, &report);

    println!("\n💾 Saving results to: {}", config.output_path);
    match roster.save(&applicants) {
        Ok(written) => println!("✅ Saved {} results.", written),
        Err(e) => {
            println!("❌ Error saving results: {:#}", e);
            println!("   Make sure the file is not open in another program.");
            return Err(e);
        }
    }

    Ok(())
}

fn print_summary(applicants: &[Applicant], report: &RunReport) {
    let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
    for result in applicants.iter().filter_map(|a| a.final_result.as_deref()) {
        let label = result.split(':').next().unwrap_or(result);
        *tally.entry(label).or_insert(0) += 1;
    }

    println!("\n📊 SUMMARY");
    println!("==========");
    if report.interrupted {
        println!("🛑 Stopped by operator.");
    }
    println!("Checked this run: {} of {}", report.completed, report.scheduled);
    for (label, count) in &tally {
        println!("   {:<35} {}", label, count);
    }
    let remaining = applicants.iter().filter(|a| a.needs_resolution()).count();
    if remaining > 0 {
        println!("⏳ Left for the next run: {}", remaining);
    }
}
