/*
    spotify-curator | Rust CLI tool to review playlists and prune unwanted tracks.
    Copyright (C) 2025  Israel Alberto Roldan Vega

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

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use curator_core::auth::TokenEndpoint;
use curator_core::store::DEFAULT_STATE_FILE;
use curator_core::{
    AuthConfig, AuthCoordinator, AuthError, Credential, FileStore, HttpTokenEndpoint, Position,
    ReviewError, ReviewSession, RspotifyApi, SessionStore, SpotifyApi, TrackSource,
};
use dotenvy::dotenv;
use log::{error, info};
use std::env;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::process;
use url::Url;

type Coordinator = AuthCoordinator<FileStore, HttpTokenEndpoint>;

#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "Review a Spotify playlist track by track and remove what you no longer want", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Logs in to Spotify (authorization code flow with PKCE)
    Login {
        /// Only print the authorization URL; finish later with `curator callback`
        #[arg(long)]
        no_wait: bool,
    },
    /// Completes a pending login with the URL Spotify redirected to
    Callback {
        /// The full redirect URL, including the `code` query parameter
        #[arg(value_name = "REDIRECT_URL")]
        url: String,
    },
    /// Lists all your playlists with their IDs
    List,
    /// Walks through a playlist (or 'Liked Songs') deciding what to keep
    Review {
        /// The Spotify ID of the playlist to review
        #[arg(long, short = 'p', conflicts_with = "liked", required_unless_present = "liked")]
        playlist: Option<String>,
        /// Review 'Liked Songs' instead of a playlist
        #[arg(long)]
        liked: bool,
        /// Output the removal report to a JSON file (e.g., --json=report.json)
        #[arg(long)]
        json: Option<String>,
        /// How many 'Liked Songs' removals may be in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Forgets the cached access token and any pending login
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Keep,
    Remove,
    Undo,
    Commit,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    NothingToUndo,
    Commit,
    Quit,
}

fn apply_action(session: &mut ReviewSession, action: Action) -> Result<Step, ReviewError> {
    match action {
        Action::Keep => session.decide(true).map(|_| Step::Continue),
        Action::Remove => session.decide(false).map(|_| Step::Continue),
        Action::Undo if session.undo() => Ok(Step::Continue),
        Action::Undo => Ok(Step::NothingToUndo),
        Action::Commit if session.is_complete() => Ok(Step::Commit),
        Action::Commit => Err(ReviewError::NotComplete {
            remaining: session.remaining(),
        }),
        Action::Quit => Ok(Step::Quit),
    }
}

fn parse_action(input: &str) -> Option<Action> {
    match input.trim().to_lowercase().as_str() {
        "k" | "keep" => Some(Action::Keep),
        "r" | "remove" => Some(Action::Remove),
        "u" | "undo" => Some(Action::Undo),
        "c" | "commit" => Some(Action::Commit),
        "q" | "quit" => Some(Action::Quit),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Login { no_wait } => {
            handle_login(*no_wait).await;
        }
        Commands::Callback { url } => {
            handle_callback(url).await;
        }
        Commands::List => {
            handle_list().await;
        }
        Commands::Review {
            playlist,
            liked,
            json,
            concurrency,
        } => {
            let source = match (playlist, liked) {
                (Some(id), false) => TrackSource::Playlist(id.clone()),
                _ => TrackSource::LikedSongs,
            };
            handle_review(source, json.as_deref(), *concurrency).await;
        }
        Commands::Logout => {
            handle_logout();
        }
    }
}

/// Reports a failure to the user and the log, then exits.
fn fail(context: &str, err: impl Display) -> ! {
    error!("{}: {}", context, err);
    eprintln!();
    eprintln!("[ERROR] {}: {}", context, err);
    process::exit(1);
}

fn prompt(message: &str) -> anyhow::Result<String> {
    read_answer(&mut io::stdin().lock(), message)
}

fn read_answer(input: &mut impl BufRead, message: &str) -> anyhow::Result<String> {
    print!("{}", message);
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    if read == 0 {
        bail!("stdin closed");
    }
    Ok(line.trim().to_string())
}

fn coordinator() -> Coordinator {
    let config = match AuthConfig::from_env() {
        Ok(c) => c,
        Err(e) => fail("Error initializing Spotify client", e),
    };

    let state_file = env::var("CURATOR_STATE_FILE").unwrap_or_else(|_| DEFAULT_STATE_FILE.to_string());
    let endpoint = HttpTokenEndpoint::new(config.token_url.clone());

    match AuthCoordinator::new(config, FileStore::new(state_file), endpoint) {
        Ok(c) => c,
        Err(e) => fail("Could not open the session store", e),
    }
}

async fn complete_from_url<S: SessionStore, T: TokenEndpoint>(
    auth: &mut AuthCoordinator<S, T>,
    input: &str,
) -> Result<Credential, AuthError> {
    let url = Url::parse(input.trim()).map_err(|e| AuthError::InvalidCallback(e.to_string()))?;

    match auth.handle_callback(&url).await? {
        Some(credential) => Ok(credential),
        None => Err(AuthError::InvalidCallback(
            "the URL carries no authorization code".to_string(),
        )),
    }
}

/// Attempts allowed when logging in again in the middle of a review.
const RELOGIN_ATTEMPTS: usize = 3;

async fn login_attempt<S: SessionStore, T: TokenEndpoint>(
    auth: &mut AuthCoordinator<S, T>,
    input: &mut impl BufRead,
) -> anyhow::Result<Credential> {
    let url = auth.begin_login().context("Could not start the login")?;

    println!("Open this URL in your browser and approve access:");
    println!();
    println!("   {}", url);
    println!();

    let redirect = read_answer(input, "Paste the URL you were redirected to: ")?;
    let credential = complete_from_url(auth, &redirect).await?;
    println!("[OK] Logged in.");
    Ok(credential)
}

async fn interactive_login(auth: &mut Coordinator) -> Credential {
    match login_attempt(auth, &mut io::stdin().lock()).await {
        Ok(credential) => credential,
        Err(e) => fail("Authentication failed. Try again", e),
    }
}

/// Logs in again without giving up the review in progress. A mistyped
/// redirect URL starts a fresh attempt instead of exiting.
async fn relogin<S: SessionStore, T: TokenEndpoint>(
    auth: &mut AuthCoordinator<S, T>,
    input: &mut impl BufRead,
) -> anyhow::Result<Credential> {
    let mut attempt = 1;
    loop {
        match login_attempt(auth, input).await {
            Ok(credential) => return Ok(credential),
            Err(e) if attempt < RELOGIN_ATTEMPTS => {
                error!("Re-login attempt {} failed: {:#}", attempt, e);
                eprintln!();
                eprintln!("[ERROR] Authentication failed: {:#}", e);
                eprintln!("Your decisions are kept. Let's try again.");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A usable credential: the cached one if still valid, otherwise a fresh login.
async fn authenticate(auth: &mut Coordinator) -> Credential {
    match auth.restore_cached() {
        Ok(Some(credential)) => credential,
        Ok(None) => interactive_login(auth).await,
        Err(e) => fail("Could not read the session store", e),
    }
}

async fn handle_login(no_wait: bool) {
    let mut auth = coordinator();

    if !no_wait {
        interactive_login(&mut auth).await;
        return;
    }

    match auth.begin_login() {
        Ok(url) => {
            println!("Open this URL in your browser and approve access:");
            println!();
            println!("   {}", url);
            println!();
            println!("Then run: curator callback '<REDIRECT_URL>'");
        }
        Err(e) => fail("Could not start the login", e),
    }
}

async fn handle_callback(input: &str) {
    let mut auth = coordinator();

    match complete_from_url(&mut auth, input).await {
        Ok(_) => println!("[OK] Logged in."),
        Err(e) => fail("Authentication failed. Try again", e),
    }
}

fn handle_logout() {
    let mut auth = coordinator();
    match auth.logout() {
        Ok(()) => println!("[OK] Logged out."),
        Err(e) => fail("Logout failed", e),
    }
}

async fn handle_list() {
    let mut auth = coordinator();
    let credential = authenticate(&mut auth).await;
    let api = RspotifyApi::new();

    println!("Fetching your playlists...");

    match api.list_playlists(&credential).await {
        Ok(playlists) => {
            println!();
            println!("{:<25} | {:<30} | {:<6}", "ID", "Name", "Tracks");
            println!("{:-<25}-+-{:-<30}-+-{:-<6}", "", "", "");
            println!("{:<25} | {:<30} | {:<6}", "--liked", "Liked Songs", "");

            for pl in playlists {
                let name = if pl.name.chars().count() > 28 {
                    format!("{}..", pl.name.chars().take(28).collect::<String>())
                } else {
                    pl.name
                };

                println!("{:<25} | {:<30} | {:<6}", pl.id, name, pl.total_tracks);
            }
            println!();
            println!("Tip: Copy an ID and run 'curator review -p <ID>'");
        }
        Err(e) => fail("Could not load playlists", e),
    }
}

async fn handle_review(source: TrackSource, json_path: Option<&str>, concurrency: usize) {
    let mut auth = coordinator();
    let mut credential = authenticate(&mut auth).await;
    let api = RspotifyApi::new();

    println!("Loading {} ...", source);

    let entries = match api.fetch_tracks(&credential, &source).await {
        Ok(e) => e,
        Err(e) => fail("Could not load playlist", e),
    };

    let mut session = match ReviewSession::start(entries, source) {
        Ok(s) => s,
        Err(ReviewError::EmptyPlaylist) => {
            println!("This playlist is empty!");
            return;
        }
        Err(e) => fail("Could not start the review", e),
    };

    println!("Keys: [k]eep, [r]emove, [u]ndo, [q]uit");

    loop {
        let line = match session.current() {
            Position::Track(entry) => {
                let (position, total) = session.progress();
                println!();
                println!("({}/{}) {}", position, total, entry.track);
                if let Some(art) = &entry.track.album_art_url {
                    println!("        {}", art);
                }
                prompt("> ")
            }
            Position::Complete => {
                println!();
                println!(
                    "Review finished: {} of {} tracks marked for removal.",
                    session.pending_removals().len(),
                    session.entries().len()
                );
                prompt("[c]ommit, [u]ndo or [q]uit: ")
            }
        };

        let line = match line {
            Ok(l) => l,
            Err(e) => fail("Review aborted", e),
        };

        let Some(action) = parse_action(&line) else {
            println!("Unknown choice '{}'.", line);
            continue;
        };

        match apply_action(&mut session, action) {
            Ok(Step::Continue) => {}
            Ok(Step::NothingToUndo) => println!("Nothing to undo."),
            Ok(Step::Commit) => break,
            Ok(Step::Quit) => {
                println!("Quit without removing anything.");
                return;
            }
            Err(e) => println!("{}", e),
        }
    }

    // The token may have expired during a long review; log in again without
    // losing the decisions made so far.
    if credential.is_expired() {
        println!("Your Spotify session has expired. Log in again to apply the removals.");
        credential = match relogin(&mut auth, &mut io::stdin().lock()).await {
            Ok(c) => c,
            Err(e) => fail("Authentication failed, no songs were removed", format!("{:#}", e)),
        };
    }

    let report = match session.commit(&api, &credential, concurrency).await {
        Ok(r) => r,
        Err(e) => fail("Could not remove songs", e),
    };

    info!(
        "Commit finished: {} removed, {} failed",
        report.succeeded(),
        report.failed()
    );

    println!();
    println!("---------------------------------------------------");
    println!("CLEANUP REPORT");
    println!("---------------------------------------------------");
    println!("Source:    {}", report.source);
    println!("Removed:   {}", report.succeeded());
    println!("Failed:    {}", report.failed());
    println!("---------------------------------------------------");

    if report.outcomes.is_empty() {
        println!("No songs to remove!");
    }

    for outcome in report.outcomes.iter().filter(|o| !o.is_success()) {
        if let Some(e) = &outcome.error {
            println!("   - {}: {}", outcome.uri, e);
        }
    }

    if report.requires_reauth() {
        eprintln!();
        eprintln!("[ERROR] Spotify rejected the access token. Run 'curator login' and review again.");
    } else if let Err(e) = report.check() {
        eprintln!();
        eprintln!("[WARN] {}", e);
    }

    if let Some(path) = json_path {
        match File::create(path) {
            Ok(mut file) => {
                let json_content = serde_json::to_string_pretty(&report).unwrap_or_default();
                if let Err(e) = file.write_all(json_content.as_bytes()) {
                    eprintln!();
                    eprintln!("[ERROR] Failed to write report to file: {}", e);
                } else {
                    println!();
                    println!("[SAVED] Report saved to: {}", path);
                }
            }
            Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
        }
    }

    if report.failed() > 0 {
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use curator_core::auth::{TokenRequest, TokenResponse};
    use curator_core::{MemoryStore, Track, TrackListEntry};
    use std::io::Cursor;

    struct AcceptingEndpoint;

    #[async_trait]
    impl TokenEndpoint for AcceptingEndpoint {
        async fn exchange(&self, _request: &TokenRequest) -> Result<TokenResponse, AuthError> {
            Ok(TokenResponse {
                status: 200,
                body: r#"{"access_token":"BQD-fresh","token_type":"Bearer","expires_in":3600}"#
                    .to_string(),
            })
        }
    }

    fn test_coordinator() -> AuthCoordinator<MemoryStore, AcceptingEndpoint> {
        let config = AuthConfig::new("client-123", "http://127.0.0.1:8888/callback");
        AuthCoordinator::new(config, MemoryStore::new(), AcceptingEndpoint).unwrap()
    }

    #[tokio::test]
    async fn test_relogin_prompts_again_after_a_bad_redirect() {
        let mut auth = test_coordinator();
        let mut input = Cursor::new(
            "not a url\nhttp://127.0.0.1:8888/callback?error=access_denied\nhttp://127.0.0.1:8888/callback?code=abc\n",
        );

        let credential = relogin(&mut auth, &mut input).await.unwrap();

        assert_eq!(credential.access_token, "BQD-fresh");
        assert!(auth.current_credential().is_some());
    }

    #[tokio::test]
    async fn test_relogin_gives_up_after_the_last_attempt() {
        let mut auth = test_coordinator();
        let mut input = Cursor::new("nope\nnope\nnope\nhttp://127.0.0.1:8888/callback?code=abc\n");

        assert!(relogin(&mut auth, &mut input).await.is_err());
        assert!(auth.current_credential().is_none());
    }

    #[test]
    fn test_parse_action_accepts_short_and_long_forms() {
        assert_eq!(parse_action("k"), Some(Action::Keep));
        assert_eq!(parse_action(" Remove \n"), Some(Action::Remove));
        assert_eq!(parse_action("U"), Some(Action::Undo));
        assert_eq!(parse_action("commit"), Some(Action::Commit));
        assert_eq!(parse_action("q"), Some(Action::Quit));
        assert_eq!(parse_action("skip"), None);
        assert_eq!(parse_action(""), None);
    }

    fn liked_session(ids: &[&str]) -> ReviewSession {
        let entries = ids
            .iter()
            .map(|id| TrackListEntry {
                track: Track {
                    id: id.to_string(),
                    uri: format!("spotify:track:{}", id),
                    title: id.to_string(),
                    artists: Vec::new(),
                    album_art_url: None,
                },
                source: TrackSource::LikedSongs,
            })
            .collect();
        ReviewSession::start(entries, TrackSource::LikedSongs).unwrap()
    }

    #[test]
    fn test_commit_before_the_end_reports_remaining_tracks() {
        let mut session = liked_session(&["A", "B", "C"]);
        assert_eq!(apply_action(&mut session, Action::Remove), Ok(Step::Continue));

        assert_eq!(
            apply_action(&mut session, Action::Commit),
            Err(ReviewError::NotComplete { remaining: 2 })
        );

        apply_action(&mut session, Action::Keep).unwrap();
        apply_action(&mut session, Action::Keep).unwrap();
        assert_eq!(apply_action(&mut session, Action::Commit), Ok(Step::Commit));
    }

    #[test]
    fn test_undo_steps() {
        let mut session = liked_session(&["A"]);
        assert_eq!(
            apply_action(&mut session, Action::Undo),
            Ok(Step::NothingToUndo)
        );
        apply_action(&mut session, Action::Remove).unwrap();
        assert_eq!(apply_action(&mut session, Action::Undo), Ok(Step::Continue));
        assert_eq!(session.cursor(), 0);
        assert_eq!(apply_action(&mut session, Action::Quit), Ok(Step::Quit));
    }

    #[test]
    fn test_review_requires_a_source() {
        assert!(Cli::try_parse_from(["curator", "review"]).is_err());
        assert!(Cli::try_parse_from(["curator", "review", "--liked", "-p", "abc"]).is_err());
        assert!(Cli::try_parse_from(["curator", "review", "-p", "abc"]).is_ok());
        assert!(Cli::try_parse_from(["curator", "review", "--liked", "--concurrency", "4"]).is_ok());
    }
}
