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

use crate::models::{Credential, PlaylistSummary, Track, TrackListEntry, TrackSource};
use async_trait::async_trait;
use log::debug;
use rspotify::{
    http::HttpError,
    model::{FullTrack, Market, PlayableId, PlayableItem, PlaylistId, TrackId},
    prelude::*,
    AuthCodeSpotify, ClientError, Config, Credentials, OAuth, Token,
};
use serde::Serialize;
use thiserror::Error;

/// Largest page the provider serves for track and playlist listings.
pub const PAGE_LIMIT: u32 = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ApiError {
    #[error("Spotify rejected the access token (expired or revoked); log in again")]
    Unauthorized,
    #[error("Spotify API returned HTTP {status}")]
    Http { status: u16 },
    #[error("Network error talking to Spotify: {0}")]
    Network(String),
    #[error("Invalid Spotify ID: {0}")]
    InvalidId(String),
}

impl ApiError {
    /// Maps a non-2xx resource API status. 401 means the token is no longer usable.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            status => ApiError::Http { status },
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        if let ClientError::Http(http) = &err {
            if let HttpError::StatusCode(response) = http.as_ref() {
                return ApiError::from_status(response.status().as_u16());
            }
        }
        ApiError::Network(err.to_string())
    }
}

/// Resource calls the curator needs from the Spotify Web API.
///
/// Listings only return the first page (`PAGE_LIMIT` items).
#[async_trait]
pub trait SpotifyApi: Send + Sync {
    async fn list_playlists(&self, credential: &Credential)
        -> Result<Vec<PlaylistSummary>, ApiError>;

    async fn fetch_tracks(
        &self,
        credential: &Credential,
        source: &TrackSource,
    ) -> Result<Vec<TrackListEntry>, ApiError>;

    /// Removes a single track from Liked Songs.
    async fn remove_liked_track(&self, credential: &Credential, track_id: &str)
        -> Result<(), ApiError>;

    /// Removes every occurrence of `uris` from a playlist in one request.
    async fn remove_playlist_tracks(
        &self,
        credential: &Credential,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<(), ApiError>;
}

/// `SpotifyApi` backed by rspotify, authenticated with an externally obtained bearer token.
#[derive(Debug, Clone)]
pub struct RspotifyApi {
    page_limit: u32,
}

impl Default for RspotifyApi {
    fn default() -> Self {
        Self {
            page_limit: PAGE_LIMIT,
        }
    }
}

impl RspotifyApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_limit(page_limit: u32) -> Self {
        Self {
            page_limit: page_limit.clamp(1, PAGE_LIMIT),
        }
    }

    fn client(&self, credential: &Credential) -> AuthCodeSpotify {
        let token = Token {
            access_token: credential.access_token.clone(),
            ..Default::default()
        };

        // The token was obtained outside rspotify and carries no refresh token.
        let config = Config {
            token_refreshing: false,
            ..Default::default()
        };

        AuthCodeSpotify::from_token_with_config(
            token,
            Credentials::default(),
            OAuth::default(),
            config,
        )
    }
}

fn to_track(track: FullTrack) -> Option<Track> {
    // Local files have no ID and cannot be removed through the API.
    let id = track.id?;

    Some(Track {
        id: id.id().to_string(),
        uri: id.uri(),
        title: track.name,
        artists: track.artists.into_iter().map(|a| a.name).collect(),
        album_art_url: track.album.images.into_iter().next().map(|i| i.url),
    })
}

fn entries(tracks: impl IntoIterator<Item = FullTrack>, source: &TrackSource) -> Vec<TrackListEntry> {
    tracks
        .into_iter()
        .filter_map(to_track)
        .map(|track| TrackListEntry {
            track,
            source: source.clone(),
        })
        .collect()
}

#[async_trait]
impl SpotifyApi for RspotifyApi {
    async fn list_playlists(
        &self,
        credential: &Credential,
    ) -> Result<Vec<PlaylistSummary>, ApiError> {
        let page = self
            .client(credential)
            .current_user_playlists_manual(Some(self.page_limit), None)
            .await?;

        Ok(page
            .items
            .into_iter()
            .map(|pl| PlaylistSummary {
                id: pl.id.id().to_string(),
                name: pl.name,
                total_tracks: pl.tracks.total,
            })
            .collect())
    }

    async fn fetch_tracks(
        &self,
        credential: &Credential,
        source: &TrackSource,
    ) -> Result<Vec<TrackListEntry>, ApiError> {
        let spotify = self.client(credential);

        let tracks: Vec<FullTrack> = match source {
            TrackSource::LikedSongs => spotify
                .current_user_saved_tracks_manual(
                    Some(Market::FromToken),
                    Some(self.page_limit),
                    None,
                )
                .await?
                .items
                .into_iter()
                .map(|saved| saved.track)
                .collect(),
            TrackSource::Playlist(id) => {
                let playlist_id =
                    PlaylistId::from_id(id.as_str()).map_err(|_| ApiError::InvalidId(id.clone()))?;

                spotify
                    .playlist_items_manual(
                        playlist_id,
                        None,
                        Some(Market::FromToken),
                        Some(self.page_limit),
                        None,
                    )
                    .await?
                    .items
                    .into_iter()
                    .filter_map(|item| match item.track {
                        Some(PlayableItem::Track(track)) => Some(track),
                        _ => None,
                    })
                    .collect()
            }
        };

        debug!("Fetched {} tracks from {}", tracks.len(), source);
        Ok(entries(tracks, source))
    }

    async fn remove_liked_track(
        &self,
        credential: &Credential,
        track_id: &str,
    ) -> Result<(), ApiError> {
        let id = TrackId::from_id(track_id)
            .map_err(|_| ApiError::InvalidId(track_id.to_string()))?;

        self.client(credential)
            .current_user_saved_tracks_delete([id])
            .await?;
        Ok(())
    }

    async fn remove_playlist_tracks(
        &self,
        credential: &Credential,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<(), ApiError> {
        let playlist = PlaylistId::from_id(playlist_id)
            .map_err(|_| ApiError::InvalidId(playlist_id.to_string()))?;

        let items = uris
            .iter()
            .map(|uri| {
                TrackId::from_uri(uri)
                    .map(PlayableId::Track)
                    .map_err(|_| ApiError::InvalidId(uri.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.client(credential)
            .playlist_remove_all_occurrences_of_items(playlist, items, None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_limit_is_clamped() {
        assert_eq!(RspotifyApi::with_page_limit(500).page_limit, PAGE_LIMIT);
        assert_eq!(RspotifyApi::with_page_limit(0).page_limit, 1);
        assert_eq!(RspotifyApi::new().page_limit, PAGE_LIMIT);
    }

    #[test]
    fn test_api_error_messages() {
        assert!(ApiError::Unauthorized.to_string().contains("log in again"));
        assert_eq!(
            ApiError::Http { status: 502 }.to_string(),
            "Spotify API returned HTTP 502"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from_status(401), ApiError::Unauthorized);
        assert_eq!(ApiError::from_status(403), ApiError::Http { status: 403 });
        assert_eq!(ApiError::from_status(503), ApiError::Http { status: 503 });
    }

    fn full_track(id: serde_json::Value, images: serde_json::Value) -> FullTrack {
        serde_json::from_value(json!({
            "album": {
                "album_type": "album",
                "artists": [],
                "external_urls": {},
                "href": null,
                "id": null,
                "images": images,
                "name": "Hot Space",
                "release_date": "1982",
                "release_date_precision": "year"
            },
            "artists": [
                { "external_urls": {}, "href": null, "id": null, "name": "Queen" },
                { "external_urls": {}, "href": null, "id": null, "name": "David Bowie" }
            ],
            "disc_number": 1,
            "duration_ms": 248440,
            "explicit": false,
            "external_ids": {},
            "external_urls": {},
            "href": null,
            "id": id,
            "is_local": false,
            "name": "Under Pressure",
            "popularity": 80,
            "preview_url": null,
            "track_number": 11
        }))
        .unwrap()
    }

    #[test]
    fn test_to_track_takes_first_album_image() {
        let images = json!([
            { "height": 640, "url": "https://i.scdn.co/image/large", "width": 640 },
            { "height": 300, "url": "https://i.scdn.co/image/medium", "width": 300 }
        ]);
        let track = to_track(full_track(json!("2fuCquhmrzHpu5xcA1ci9x"), images)).unwrap();

        assert_eq!(track.id, "2fuCquhmrzHpu5xcA1ci9x");
        assert_eq!(track.uri, "spotify:track:2fuCquhmrzHpu5xcA1ci9x");
        assert_eq!(track.title, "Under Pressure");
        assert_eq!(track.artists, vec!["Queen", "David Bowie"]);
        assert_eq!(
            track.album_art_url.as_deref(),
            Some("https://i.scdn.co/image/large")
        );
    }

    #[test]
    fn test_entries_skip_local_files() {
        let tracks = vec![
            full_track(json!(null), json!([])),
            full_track(json!("2fuCquhmrzHpu5xcA1ci9x"), json!([])),
        ];
        let source = TrackSource::Playlist("37i9dQZF1DXcBWIGoYBM5M".to_string());

        let list = entries(tracks, &source);

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].track.id, "2fuCquhmrzHpu5xcA1ci9x");
        assert_eq!(list[0].track.album_art_url, None);
        assert_eq!(list[0].source, source);
    }

    #[tokio::test]
    async fn test_invalid_ids_fail_before_any_request() {
        let api = RspotifyApi::new();
        let credential = Credential::new("token", None);

        let err = api
            .remove_liked_track(&credential, "not a track id")
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::InvalidId("not a track id".to_string()));

        let err = api
            .remove_playlist_tracks(
                &credential,
                "37i9dQZF1DXcBWIGoYBM5M",
                &["spotify:episode:512ojhOuo1ktJprKbVcKyQ".to_string()],
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::InvalidId("spotify:episode:512ojhOuo1ktJprKbVcKyQ".to_string())
        );
    }
}
