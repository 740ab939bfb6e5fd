use anyhow::Context;
use clap::ArgMatches;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod cache;
mod cli;
mod client;
mod download;
mod model;
mod service;
#[cfg(test)]
mod tests;
mod tree;
mod view;

use client::{LoggingTransferQueue, StaticListingClient};
use download::{DownloadSelection, DownloadSelectionCoordinator};
use model::PeerName;
use service::listing::{self, ListingService, Outcome, ServiceConfig};
use tree::TreeMaterializer;
use view::TreeView;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::commands::get_args().get_matches();
    let _guard = init_tracing(matches.get_flag("debug"))?;

    let (subcommand, sub_matches) = matches
        .subcommand()
        .expect("subcommand is required");

    let fixture: PathBuf = sub_matches
        .get_one::<String>("fixture")
        .map(PathBuf::from)
        .context("a listing fixture is required (pass --fixture <LISTING_JSON>)")?;
    let remote = StaticListingClient::from_json_file(&fixture)
        .with_context(|| format!("failed to load listing from {}", fixture.display()))?;

    let (service, event_loop) = listing::new(remote.clone(), ServiceConfig::default());
    tokio::spawn(event_loop.run());

    match subcommand {
        "browse" => run_browse(&service, sub_matches).await,
        "tree" => run_tree(&service, sub_matches).await,
        "download" => run_download(&service, remote, sub_matches).await,
        _ => unreachable!("subcommand is required"),
    }
}

/// Logs go to a rolling file so stdout stays clean for command output.
/// The guard must stay alive for the process lifetime or buffered lines
/// are lost.
fn init_tracing(debug: bool) -> anyhow::Result<WorkerGuard> {
    let directory = dirs_next::cache_dir()
        .context("no cache directory available")?
        .join("goombay")
        .join("logs");
    std::fs::create_dir_all(&directory)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, "goombay.log"));
    let default_directive = if debug { "goombay=debug" } else { "goombay=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn peer_arg(sub_matches: &ArgMatches) -> PeerName {
    PeerName::from(
        sub_matches
            .get_one::<String>("PEER")
            .expect("peer is required")
            .as_str(),
    )
}

fn require_ready<T>(outcome: Outcome<T>, peer: &PeerName) -> anyhow::Result<T> {
    match outcome {
        Outcome::Ready(value) => Ok(value),
        Outcome::Building => anyhow::bail!("{peer}'s listing is still being fetched, try again"),
        Outcome::Offline => anyhow::bail!("{peer} is offline"),
        Outcome::TimedOut => anyhow::bail!("{peer} did not answer in time"),
        Outcome::Failed => anyhow::bail!("browse failed, see the log for details"),
    }
}

async fn run_browse<C: client::RemoteListingClient>(
    service: &ListingService<C>,
    sub_matches: &ArgMatches,
) -> anyhow::Result<()> {
    let peer = peer_arg(sub_matches);

    if let Some(&limit) = sub_matches.get_one::<usize>("limit") {
        let listing = require_ready(
            service.browse_limited(peer.clone(), Some(limit)).await,
            &peer,
        )?;
        if listing.is_limited {
            println!(
                "{} shares {} directories; showing the first {}",
                peer, listing.total_count, listing.limited_count
            );
        }
        for directory in &listing.directories {
            println!("{}  ({} files)", directory.full_path, directory.file_count);
        }
        return Ok(());
    }

    let page = sub_matches.get_one::<usize>("page").copied().unwrap_or(1);
    let page_size = sub_matches.get_one::<usize>("size").copied();
    let search = sub_matches.get_one::<String>("search").map(String::as_str);
    let listing = require_ready(
        service
            .list_directories(peer.clone(), page, page_size, search)
            .await,
        &peer,
    )?;

    for directory in &listing.items {
        let marker = if directory.locked { " [locked]" } else { "" };
        println!(
            "{}  ({} files){marker}",
            directory.full_path, directory.file_count
        );
    }
    println!(
        "page {}/{} - {} directories",
        listing.page,
        listing.total_pages.max(1),
        listing.total_count
    );
    Ok(())
}

async fn run_tree<C: client::RemoteListingClient>(
    service: &ListingService<C>,
    sub_matches: &ArgMatches,
) -> anyhow::Result<()> {
    let peer = peer_arg(sub_matches);
    let snapshot = require_ready(service.browse(peer.clone()).await, &peer)?;

    let roots = TreeMaterializer::new()
        .materialize(snapshot.all_directories().cloned().collect(), snapshot.separator);
    let mut tree_view = TreeView::new(roots, snapshot.separator);

    let state_path = view::default_state_path();
    if let Some(path) = state_path.as_deref().filter(|path| path.exists()) {
        let state = view::load_state(path);
        if state.peer.as_deref() == Some(peer.as_str()) {
            tree_view.restore_collapsed(state.collapsed_paths);
        }
    }

    for row in tree_view.flatten() {
        let indent = "  ".repeat(row.level);
        let marker = match (row.locked, row.is_collapsed) {
            (true, _) => " [locked]",
            (false, true) => " [+]",
            (false, false) => "",
        };
        println!("{indent}{}  ({} files){marker}", row.display_name, row.file_count);
    }
    let stats = snapshot.stats();
    println!(
        "{}: {} directories, {} files ({} locked directories)",
        peer, stats.directories, stats.files, stats.locked_directories
    );

    if let Some(path) = state_path {
        view::save_state_deferred(
            path,
            view::PersistedViewState {
                peer: Some(peer.as_str().to_string()),
                collapsed_paths: tree_view.collapsed_paths().map(str::to_string).collect(),
                ..Default::default()
            },
        );
    }
    Ok(())
}

async fn run_download<C: client::RemoteListingClient>(
    service: &ListingService<C>,
    remote: C,
    sub_matches: &ArgMatches,
) -> anyhow::Result<()> {
    let peer = peer_arg(sub_matches);
    let snapshot = require_ready(service.browse(peer.clone()).await, &peer)?;

    let directories: Vec<String> = sub_matches
        .get_many::<String>("dir")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let files = sub_matches
        .get_many::<String>("file")
        .map(|values| {
            values
                .map(|filename| client::DownloadRequest {
                    filename: filename.clone(),
                    size: 0,
                })
                .collect()
        })
        .unwrap_or_default();

    let coordinator = DownloadSelectionCoordinator::new(remote);
    let report = coordinator
        .submit(
            peer.clone(),
            DownloadSelection { directories, files },
            snapshot.separator,
            &LoggingTransferQueue,
        )
        .await?;

    if let Some(notice) = &report.notice {
        println!("{notice}");
    } else {
        println!("queued {} files from {}", report.queued, peer);
    }
    for failure in &report.failed_directories {
        println!("skipped {}: {}", failure.path, failure.error);
    }
    Ok(())
}
