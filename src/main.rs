mod config;
mod drive;
mod error;
mod face;
mod face_clients;
mod listing_clients;
mod scanner;
mod session;
#[cfg(test)]
mod test_support;
mod web_server;

use crate::config::AppConfig;
use crate::drive::FileListingService;
use crate::listing_clients::google_drive::GoogleDriveClient;
use crate::scanner::{MatchOutcome, ScanEvent};
use crate::session::{read_reference, Finder, RunContext};
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "face-finder", about = "Find a face across the images of a Google Drive folder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the images of a Drive folder
    List {
        #[arg(long)]
        folder_url: String,
    },
    /// Compare a reference face against every image of a Drive folder
    Scan {
        #[arg(long)]
        folder_url: String,
        /// Reference face image, or a `.json` descriptor array
        #[arg(long)]
        reference: PathBuf,
    },
    /// Run the listing relay that keeps the Drive key server-side
    Serve,
}

/// Cancels `cancel` on Ctrl-C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; stopping at the next step");
            cancel.cancel();
        }
    });
}

async fn list(config: &AppConfig, folder_url: &str) -> Result<()> {
    let finder = Finder::from_config(config)?;
    let mut ctx = RunContext::new();
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = finder.process_folder(&mut ctx, folder_url, &cancel).await?;
    println!(
        "Found {} images in folder {}.",
        summary.image_count, summary.folder_id
    );
    for file in ctx.images() {
        println!("{}\t{}", file.name, file.view_url());
    }
    Ok(())
}

async fn scan(config: &AppConfig, folder_url: &str, reference: PathBuf) -> Result<()> {
    let finder = Finder::from_config(config)?;
    let mut ctx = RunContext::new();

    // Reject a bad reference before any remote call.
    ctx.set_reference(read_reference(&reference)?);

    let listing_cancel = CancellationToken::new();
    cancel_on_ctrl_c(listing_cancel.clone());
    let summary = finder
        .process_folder(&mut ctx, folder_url, &listing_cancel)
        .await?;
    if summary.image_count == 0 {
        println!("No images found in the folder.");
        return Ok(());
    }
    println!(
        "Found {} images in folder {}.",
        summary.image_count,
        ctx.folder_id().unwrap_or_default()
    );

    let job = ctx.start_scan()?;
    cancel_on_ctrl_c(job.cancel.clone());

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let printer = tokio::task::spawn_blocking(move || {
        for event in events_rx {
            match event {
                ScanEvent::Result { result, counters } => {
                    let label = match result.outcome {
                        MatchOutcome::Matched => "MATCH",
                        MatchOutcome::NotMatched => "NO MATCH",
                        MatchOutcome::Errored => "ERROR",
                    };
                    println!(
                        "{:<8} {} {} {}  [matched: {} | not matched: {}]",
                        label,
                        result.file.name,
                        result.detail.map(|d| format!("({})", d)).unwrap_or_default(),
                        result.file.view_url(),
                        counters.matched,
                        counters.not_matched
                    );
                }
                ScanEvent::Finished { counters, cancelled } => {
                    if cancelled {
                        println!("Scan cancelled.");
                    }
                    println!(
                        "Scanned: {}  Matched: {}  Not matched: {}",
                        counters.total(),
                        counters.matched,
                        counters.not_matched
                    );
                }
            }
        }
    });

    let report = finder.run_scan(job, Some(&events_tx)).await;
    drop(events_tx);
    printer.await?;
    log::debug!("Scan produced {} results", report.results.len());
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let listing: Option<Arc<dyn FileListingService>> = match GoogleDriveClient::new(&config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            log::error!("Drive listing unavailable: {}", e);
            None
        }
    };
    web_server::start_relay_server(Arc::new(config), listing).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new()?;

    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting face-finder");

    match cli.command {
        Command::List { folder_url } => list(&config, &folder_url).await?,
        Command::Scan {
            folder_url,
            reference,
        } => scan(&config, &folder_url, reference).await?,
        Command::Serve => serve(config).await?,
    }

    info!("face-finder finished");
    Ok(())
}
