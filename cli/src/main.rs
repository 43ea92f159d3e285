/*
    spotify-features-rs | Rust tools to enrich listening history with Spotify audio features.
    Copyright (C) 2026  spotify-features-rs developers

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

mod history;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use features_core::{
    normalize_track_id, FeatureFetcher, OAuthConfig, SpotifySession, SpotifyWebApi,
};
use history::HistoryFile;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

const TOKEN_CACHE_FILE: &str = ".spotify_token_cache.json";

#[derive(Parser)]
#[command(name = "spotify-features")]
#[command(about = "Enrich listening-history CSV files with Spotify audio features", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the one-time authorization flow and caches the tokens
    Login,
    /// Enriches history CSV files with audio-feature columns
    Process {
        /// Input CSV files with a 'spotify_track_uri' column
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
        /// Directory for the processed output files
        #[arg(long, default_value = "processed_data")]
        out_dir: PathBuf,
        /// Also merge all processed files into one combined CSV
        #[arg(long)]
        merge: bool,
    },
    /// Fetches audio features for ad-hoc track IDs and prints them as JSON
    Features {
        /// Track IDs or spotify:track:... URIs
        #[arg(value_name = "TRACK_ID", required = true)]
        track_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Login => {
            handle_login().await;
        }
        Commands::Process {
            files,
            out_dir,
            merge,
        } => {
            handle_process(files, out_dir, *merge).await;
        }
        Commands::Features { track_ids } => {
            handle_features(track_ids).await;
        }
    }
}

fn build_session() -> SpotifySession {
    let config = match OAuthConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading Spotify configuration: {}", e);
            process::exit(1);
        }
    };

    match SpotifySession::new(config).and_then(|s| s.with_token_cache(TOKEN_CACHE_FILE)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error initializing Spotify session: {}", e);
            process::exit(1);
        }
    }
}

fn build_fetcher() -> FeatureFetcher<SpotifyWebApi, SpotifySession> {
    let session = build_session();
    let api = match SpotifyWebApi::new() {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error initializing API client: {}", e);
            process::exit(1);
        }
    };
    FeatureFetcher::new(api, session)
}

async fn handle_login() {
    let session = build_session();

    println!("Copy and paste this URL into your browser:");
    println!("{}", session.authorize_url());
    println!();
    print!("Paste the URL you were redirected to here: ");
    let _ = io::stdout().flush();

    let mut redirected = String::new();
    if io::stdin().lock().read_line(&mut redirected).is_err() {
        eprintln!("Failed to read the redirect URL from stdin.");
        process::exit(1);
    }

    let code = match SpotifySession::parse_redirect_code(redirected.trim()) {
        Some(code) => code,
        None => {
            eprintln!("No 'code' parameter found in the pasted URL.");
            process::exit(1);
        }
    };

    match session.exchange_code(&code).await {
        Ok(()) => {
            println!();
            println!("[OK] Authorization complete. Tokens cached in {}", TOKEN_CACHE_FILE);
        }
        Err(e) => {
            eprintln!();
            eprintln!("Authorization failed: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_process(files: &[PathBuf], out_dir: &Path, merge: bool) {
    let fetcher = build_fetcher();

    if let Err(e) = fs::create_dir_all(out_dir) {
        eprintln!("Failed to create '{}': {}", out_dir.display(), e);
        process::exit(1);
    }

    let mut processed_paths = Vec::new();
    let mut total_rows = 0usize;
    let mut total_records = 0usize;

    for file in files {
        println!("Processing '{}'...", file.display());

        let history = match HistoryFile::load(file) {
            Ok(history) => history,
            Err(e) => {
                eprintln!("{:#}", e);
                process::exit(1);
            }
        };

        let row_ids = history.track_ids();
        let present: Vec<String> = row_ids.iter().flatten().cloned().collect();

        let fetched = match fetcher.fetch_features(&present).await {
            Ok(fetched) => fetched,
            Err(failure) => {
                eprintln!();
                eprintln!("Fetching audio features failed: {}", failure);
                process::exit(1);
            }
        };

        let aligned = history::align_features(&row_ids, fetched);
        let found = aligned.iter().filter(|record| record.is_some()).count();

        let out_path = history::processed_path(file, out_dir);
        if let Err(e) = history.write_enriched(&aligned, &out_path) {
            eprintln!("{:#}", e);
            process::exit(1);
        }

        println!(
            "[SAVED] {} ({} rows, {} with features)",
            out_path.display(),
            history.row_count(),
            found
        );

        total_rows += history.row_count();
        total_records += found;
        processed_paths.push(out_path);
    }

    if merge {
        let combined = out_dir.join(history::COMBINED_FILE);
        if let Err(e) = history::merge_processed(&processed_paths, &combined) {
            eprintln!("{:#}", e);
            process::exit(1);
        }
        println!("[SAVED] Merged dataset: {}", combined.display());
    }

    println!();
    println!("---------------------------------------------------");
    println!("PROCESSING COMPLETE");
    println!("---------------------------------------------------");
    println!("Files processed:      {}", files.len());
    println!("Total rows:           {}", total_rows);
    println!("Rows with features:   {}", total_records);
    println!("---------------------------------------------------");
}

async fn handle_features(track_ids: &[String]) {
    let fetcher = build_fetcher();

    let ids: Vec<String> = track_ids.iter().map(|id| normalize_track_id(id)).collect();

    match fetcher.fetch_features(&ids).await {
        Ok(records) => {
            let json = serde_json::to_string_pretty(&records).unwrap_or_default();
            println!("{}", json);
        }
        Err(failure) => {
            eprintln!();
            eprintln!("Fetching audio features failed: {}", failure);
            process::exit(1);
        }
    }
}
