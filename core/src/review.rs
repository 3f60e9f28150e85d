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

//! Keep/remove stepping over a fetched track list, with undo and a final
//! removal pass.

use crate::api::SpotifyApi;
use crate::models::{Credential, RemovalOutcome, RemovalReport, TrackListEntry, TrackSource};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error("Nothing to review: the selected source has no tracks")]
    EmptyPlaylist,
    #[error("Track '{track_id}' does not belong to {expected}")]
    SourceMismatch { track_id: String, expected: TrackSource },
    #[error("Every track has already been reviewed")]
    SessionComplete,
    #[error("Review is not finished yet ({remaining} tracks left)")]
    NotComplete { remaining: usize },
    #[error("This review session was already committed")]
    AlreadyCommitted,
    #[error("Removed {succeeded} tracks but {failed} removals failed")]
    PartialRemovalFailure { succeeded: usize, failed: usize },
}

/// One keep/remove action, kept for undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub entry_index: usize,
    pub entry: TrackListEntry,
    pub was_removal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position<'a> {
    Track(&'a TrackListEntry),
    Complete,
}

/// State of a single cleaning pass over one playlist (or Liked Songs).
///
/// `history.len() == cursor` holds after every public call.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    source: TrackSource,
    entries: Vec<TrackListEntry>,
    cursor: usize,
    pending_removals: Vec<TrackListEntry>,
    history: Vec<Decision>,
    committed: bool,
}

impl ReviewSession {
    pub fn start(entries: Vec<TrackListEntry>, source: TrackSource) -> Result<Self, ReviewError> {
        if entries.is_empty() {
            return Err(ReviewError::EmptyPlaylist);
        }
        // Removal goes through the source's endpoint, so every entry must come from it.
        if let Some(stray) = entries.iter().find(|e| e.source != source) {
            return Err(ReviewError::SourceMismatch {
                track_id: stray.track.id.clone(),
                expected: source,
            });
        }

        debug!("Starting review of {} ({} tracks)", source, entries.len());
        Ok(Self {
            source,
            entries,
            cursor: 0,
            pending_removals: Vec::new(),
            history: Vec::new(),
            committed: false,
        })
    }

    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    pub fn entries(&self) -> &[TrackListEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn history(&self) -> &[Decision] {
        &self.history
    }

    /// Tracks marked for removal, unique by track ID, in the order they were marked.
    pub fn pending_removals(&self) -> &[TrackListEntry] {
        &self.pending_removals
    }

    /// Tracks still waiting for a decision.
    pub fn remaining(&self) -> usize {
        self.entries.len().saturating_sub(self.cursor)
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.entries.len()
    }

    pub fn current(&self) -> Position<'_> {
        match self.entries.get(self.cursor) {
            Some(entry) => Position::Track(entry),
            None => Position::Complete,
        }
    }

    /// 1-based position of the current track and the total, for "3 / 50" displays.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.entries.len();
        ((self.cursor + 1).min(total), total)
    }

    pub fn decide(&mut self, keep: bool) -> Result<(), ReviewError> {
        if self.committed {
            return Err(ReviewError::AlreadyCommitted);
        }
        let entry = match self.current() {
            Position::Track(entry) => entry.clone(),
            Position::Complete => return Err(ReviewError::SessionComplete),
        };

        if !keep && !self.is_pending(&entry.track.id) {
            self.pending_removals.push(entry.clone());
        }

        self.history.push(Decision {
            entry_index: self.cursor,
            entry,
            was_removal: !keep,
        });
        self.cursor += 1;
        Ok(())
    }

    /// Reverts the last decision. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        if self.committed {
            return false;
        }
        let Some(last) = self.history.pop() else {
            return false;
        };

        self.cursor = last.entry_index;
        if last.was_removal {
            // An earlier decision may still mark the same track ID for removal.
            self.pending_removals = removals_from(&self.history);
        }
        true
    }

    /// Removes every pending track from the provider.
    ///
    /// Liked Songs are removed one request per track, at most `concurrency`
    /// in flight; playlists get one batched request. Failures are reported
    /// per track and never retried.
    pub async fn commit<A>(
        &mut self,
        api: &A,
        credential: &Credential,
        concurrency: usize,
    ) -> Result<RemovalReport, ReviewError>
    where
        A: SpotifyApi + ?Sized,
    {
        if self.committed {
            return Err(ReviewError::AlreadyCommitted);
        }
        if !self.is_complete() {
            return Err(ReviewError::NotComplete {
                remaining: self.remaining(),
            });
        }
        self.committed = true;

        if self.pending_removals.is_empty() {
            info!("No tracks marked for removal from {}", self.source);
            return Ok(RemovalReport::empty(self.source.clone()));
        }

        info!(
            "Removing {} tracks from {}",
            self.pending_removals.len(),
            self.source
        );

        let outcomes = match &self.source {
            TrackSource::LikedSongs => {
                stream::iter(self.pending_removals.iter())
                    .map(|entry| async move {
                        let result = api.remove_liked_track(credential, &entry.track.id).await;
                        if let Err(e) = &result {
                            warn!("Could not remove {} from Liked Songs: {}", entry.track, e);
                        }
                        RemovalOutcome {
                            track_id: entry.track.id.clone(),
                            uri: entry.track.uri.clone(),
                            error: result.err(),
                        }
                    })
                    .buffered(concurrency.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
            TrackSource::Playlist(playlist_id) => {
                let uris: Vec<String> = self
                    .pending_removals
                    .iter()
                    .map(|entry| entry.track.uri.clone())
                    .collect();

                let error = api
                    .remove_playlist_tracks(credential, playlist_id, &uris)
                    .await
                    .err();
                if let Some(e) = &error {
                    warn!("Could not remove tracks from playlist {}: {}", playlist_id, e);
                }

                self.pending_removals
                    .iter()
                    .map(|entry| RemovalOutcome {
                        track_id: entry.track.id.clone(),
                        uri: entry.track.uri.clone(),
                        error: error.clone(),
                    })
                    .collect()
            }
        };

        Ok(RemovalReport {
            source: self.source.clone(),
            outcomes,
        })
    }

    fn is_pending(&self, track_id: &str) -> bool {
        self.pending_removals.iter().any(|e| e.track.id == track_id)
    }
}

fn removals_from(history: &[Decision]) -> Vec<TrackListEntry> {
    let mut seen = HashSet::new();
    history
        .iter()
        .filter(|d| d.was_removal && seen.insert(d.entry.track.id.clone()))
        .map(|d| d.entry.clone())
        .collect()
}
