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

use crate::api::ApiError;
use crate::review::ReviewError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// A single track as returned by the resource API. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub uri: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album_art_url: Option<String>, // First (largest) album image
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.artists.join(", "))
    }
}

/// Where a reviewed track list came from. Removal works differently per origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum TrackSource {
    Playlist(String),
    LikedSongs,
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSource::Playlist(id) => write!(f, "Playlist {}", id),
            TrackSource::LikedSongs => write!(f, "Liked Songs"),
        }
    }
}

/// A track together with the collection it was fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackListEntry {
    pub track: Track,
    pub source: TrackSource,
}

/// Bearer credential obtained from the token endpoint.
///
/// There is no refresh logic: once `is_expired` is true every resource call
/// fails with `Unauthorized` and the login flow has to be run again.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub obtained_at: SystemTime,
    pub expires_in: Option<Duration>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            access_token: access_token.into(),
            obtained_at: SystemTime::now(),
            expires_in: expires_in.map(Duration::from_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_in {
            Some(lifetime) => match self.obtained_at.checked_add(lifetime) {
                Some(deadline) => SystemTime::now() >= deadline,
                None => false,
            },
            None => false,
        }
    }
}

// Keeps the token out of logs and panics.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Summary of a playlist for listing purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub total_tracks: u32,
}

/// Result of a single removal. `error` is `None` when the provider accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalOutcome {
    pub track_id: String,
    pub uri: String,
    pub error: Option<ApiError>,
}

impl RemovalOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Report for a committed review session. One outcome per pending track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub source: TrackSource,
    pub outcomes: Vec<RemovalOutcome>,
}

impl RemovalReport {
    pub fn empty(source: TrackSource) -> Self {
        Self {
            source,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_partial(&self) -> bool {
        self.succeeded() > 0 && self.failed() > 0
    }

    /// True when at least one removal was rejected because the credential is no longer valid.
    pub fn requires_reauth(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.error, Some(ApiError::Unauthorized)))
    }

    /// Surfaces a mixed outcome as `PartialRemovalFailure`, keeping both counts.
    pub fn check(&self) -> Result<(), ReviewError> {
        if self.is_partial() {
            return Err(ReviewError::PartialRemovalFailure {
                succeeded: self.succeeded(),
                failed: self.failed(),
            });
        }
        Ok(())
    }
}
