use crate::config::LibrarySettings;
use crate::library::{ArtistInfo, CandidateTrack, GenreInfo, LibraryClient, LibraryError};
use crate::models::{
    AlbumListResponse, AlbumResponse, ArtistResponse, ArtistsResponse, CreatePlaylistResponse,
    Envelope, GenresResponse, PlaylistResponse, SearchResponse, Song, SongsByGenreResponse,
    StatusResponse, SubsonicError,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use ureq::{Agent, AgentBuilder};
use urlencoding::encode;

const API_VERSION: &str = "1.16.1";
const CLIENT_NAME: &str = "magiclists";
const PAGE_SIZE: usize = 500;
const MAX_GENRE_PAGES: usize = 40;
/// Upper bound on albums inspected when reconstructing listening history.
const HISTORY_ALBUM_LIMIT: usize = 200;

/// Subsonic error codes that mean the credentials were refused.
const AUTH_ERROR_CODES: [u32; 4] = [40, 41, 44, 50];
const NOT_FOUND_ERROR_CODE: u32 = 70;

/// A Subsonic API client using salt + token authentication
#[derive(Clone)]
pub struct SubsonicClient {
    agent: Agent,
    base_url: String,
    username: String,
    password: String,
    library_ids: Vec<String>,
}

impl SubsonicClient {
    /// Create a new client from the library settings
    pub fn new(settings: LibrarySettings) -> Self {
        let agent = AgentBuilder::new().timeout(settings.timeout).build();

        SubsonicClient {
            agent,
            base_url: settings.base_url,
            username: settings.username,
            password: settings.password,
            library_ids: settings.library_ids,
        }
    }

    /// Generate authentication parameters using salt + token method
    fn generate_auth_params(&self) -> (String, String) {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();

        // token = md5(password + salt)
        let token = format!("{:x}", md5::compute(format!("{}{}", self.password, salt)));

        (salt, token)
    }

    /// Build an authenticated REST URL with extra query parameters
    fn rest_url(&self, endpoint: &str, params: &[(&str, &str)]) -> String {
        let (salt, token) = self.generate_auth_params();

        let mut url = format!(
            "{}/rest/{}?u={}&t={}&s={}&v={}&c={}&f=json",
            self.base_url.trim_end_matches('/'),
            endpoint,
            encode(&self.username),
            token,
            salt,
            API_VERSION,
            CLIENT_NAME
        );

        for (key, value) in params {
            url.push_str(&format!("&{}={}", key, encode(value)));
        }

        url
    }

    /// Send a GET request and unwrap the `subsonic-response` envelope
    fn get_json<T: DeserializeOwned>(&self, endpoint: &str, url: &str) -> Result<T, LibraryError> {
        debug!(endpoint, "Subsonic request");

        let response = self.agent.get(url).call().map_err(map_ureq_error)?;
        let response_text = response
            .into_string()
            .map_err(|e| LibraryError::InvalidResponse(format!("{endpoint}: {e}")))?;

        let parsed: Envelope<T> = serde_json::from_str(&response_text).map_err(|e| {
            LibraryError::InvalidResponse(format!("{endpoint}: failed to parse JSON response: {e}"))
        })?;

        Ok(parsed.subsonic_response)
    }

    /// Music folders to query, `None` meaning every folder the user can see
    fn music_folders(&self) -> Vec<Option<&str>> {
        if self.library_ids.is_empty() {
            vec![None]
        } else {
            self.library_ids.iter().map(|id| Some(id.as_str())).collect()
        }
    }

    fn ping_blocking(&self) -> Result<(), LibraryError> {
        let url = self.rest_url("ping", &[]);
        let response: StatusResponse = self.get_json("ping", &url)?;
        ensure_ok(&response.status, response.error.as_ref())
    }

    fn list_artists_blocking(&self) -> Result<Vec<ArtistInfo>, LibraryError> {
        let mut artists = Vec::new();
        let mut seen = HashSet::new();

        for folder in self.music_folders() {
            let entries = match self.fetch_artists(folder) {
                // Navidrome answers "Library not found" for stale folder ids; retry unfiltered
                Err(LibraryError::Api(message)) if folder.is_some() && message.contains("not found") => {
                    warn!(folder, "Music folder rejected, retrying without library filter");
                    self.fetch_artists(None)?
                }
                other => other?,
            };

            for artist in entries {
                if seen.insert(artist.id.clone()) {
                    artists.push(artist);
                }
            }
        }

        info!(count = artists.len(), "Fetched artists");
        Ok(artists)
    }

    fn fetch_artists(&self, folder: Option<&str>) -> Result<Vec<ArtistInfo>, LibraryError> {
        let params: Vec<(&str, &str)> = folder.map(|f| ("musicFolderId", f)).into_iter().collect();
        let url = self.rest_url("getArtists", &params);
        let response: ArtistsResponse = self.get_json("getArtists", &url)?;
        ensure_ok(&response.status, response.error.as_ref())?;

        Ok(response
            .artists
            .map(|indexes| {
                indexes
                    .index
                    .into_iter()
                    .flat_map(|index| index.artist)
                    .map(|artist| ArtistInfo {
                        id: artist.id,
                        name: artist.name,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_genres_blocking(&self) -> Result<Vec<GenreInfo>, LibraryError> {
        let url = self.rest_url("getGenres", &[]);
        let response: GenresResponse = self.get_json("getGenres", &url)?;
        ensure_ok(&response.status, response.error.as_ref())?;

        Ok(response
            .genres
            .map(|list| {
                list.genre
                    .into_iter()
                    .map(|genre| GenreInfo {
                        name: genre.value,
                        song_count: genre.song_count.unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn album_songs(&self, album_id: &str) -> Result<Vec<CandidateTrack>, LibraryError> {
        let url = self.rest_url("getAlbum", &[("id", album_id)]);
        let response: AlbumResponse = self.get_json("getAlbum", &url)?;
        ensure_ok(&response.status, response.error.as_ref())?;

        let Some(album) = response.album else {
            return Ok(Vec::new());
        };
        let album_name = album.name.unwrap_or_default();

        Ok(album
            .song
            .into_iter()
            .filter(|song| !song.is_dir)
            .map(|song| song_to_candidate(song, Some(&album_name), album.year))
            .collect())
    }

    fn tracks_by_artist_blocking(&self, artist_id: &str) -> Result<Vec<CandidateTrack>, LibraryError> {
        let url = self.rest_url("getArtist", &[("id", artist_id)]);
        let response: ArtistResponse = self.get_json("getArtist", &url)?;
        ensure_ok(&response.status, response.error.as_ref())?;

        let artist = response
            .artist
            .ok_or_else(|| LibraryError::NotFound(format!("artist {artist_id}")))?;

        let mut tracks = Vec::new();
        let mut seen = HashSet::new();

        for album in &artist.album {
            for track in self.album_songs(&album.id)? {
                if seen.insert(track.id.clone()) {
                    tracks.push(track);
                }
            }
        }

        let primary_count = tracks.len();

        // Featured appearances live on other artists' albums; search3 finds them by credit
        let song_count = PAGE_SIZE.to_string();
        let url = self.rest_url(
            "search3",
            &[
                ("query", artist.name.as_str()),
                ("songCount", song_count.as_str()),
                ("artistCount", "0"),
                ("albumCount", "0"),
            ],
        );
        let search: SearchResponse = self.get_json("search3", &url)?;
        ensure_ok(&search.status, search.error.as_ref())?;

        let needle = artist.name.to_lowercase();
        for song in search.search_result.map(|r| r.song).unwrap_or_default() {
            let credited = song
                .artist
                .as_deref()
                .is_some_and(|credit| credit.to_lowercase().contains(&needle));
            if credited && !song.is_dir && seen.insert(song.id.clone()) {
                tracks.push(song_to_candidate(song, None, None));
            }
        }

        debug!(
            artist = %artist.name,
            primary = primary_count,
            featured = tracks.len() - primary_count,
            "Collected artist tracks"
        );
        Ok(tracks)
    }

    fn tracks_by_genre_blocking(&self, genre: &str) -> Result<Vec<CandidateTrack>, LibraryError> {
        let mut tracks = Vec::new();
        let mut seen = HashSet::new();
        let count = PAGE_SIZE.to_string();

        for folder in self.music_folders() {
            for page in 0..MAX_GENRE_PAGES {
                let offset = (page * PAGE_SIZE).to_string();
                let mut params = vec![
                    ("genre", genre),
                    ("count", count.as_str()),
                    ("offset", offset.as_str()),
                ];
                if let Some(folder) = folder {
                    params.push(("musicFolderId", folder));
                }

                let url = self.rest_url("getSongsByGenre", &params);
                let response: SongsByGenreResponse = self.get_json("getSongsByGenre", &url)?;
                ensure_ok(&response.status, response.error.as_ref())?;

                let songs = response.songs_by_genre.map(|list| list.song).unwrap_or_default();
                let batch_size = songs.len();

                for song in songs {
                    if !song.is_dir && seen.insert(song.id.clone()) {
                        tracks.push(song_to_candidate(song, None, None));
                    }
                }

                if batch_size < PAGE_SIZE {
                    break;
                }
            }
        }

        Ok(tracks)
    }

    fn listening_history_blocking(&self, since: DateTime<Utc>) -> Result<Vec<CandidateTrack>, LibraryError> {
        let size = PAGE_SIZE.to_string();
        let mut album_ids = Vec::new();
        let mut seen_albums = HashSet::new();

        for folder in self.music_folders() {
            for list_type in ["recent", "frequent"] {
                let mut params = vec![("type", list_type), ("size", size.as_str())];
                if let Some(folder) = folder {
                    params.push(("musicFolderId", folder));
                }

                let url = self.rest_url("getAlbumList2", &params);
                let response: AlbumListResponse = self.get_json("getAlbumList2", &url)?;
                ensure_ok(&response.status, response.error.as_ref())?;

                for album in response.album_list.map(|l| l.album).unwrap_or_default() {
                    if seen_albums.insert(album.id.clone()) {
                        album_ids.push(album.id);
                    }
                }
            }
        }

        if album_ids.len() > HISTORY_ALBUM_LIMIT {
            debug!(
                albums = album_ids.len(),
                limit = HISTORY_ALBUM_LIMIT,
                "Truncating album scan for listening history"
            );
            album_ids.truncate(HISTORY_ALBUM_LIMIT);
        }

        let mut history = Vec::new();
        for album_id in &album_ids {
            for track in self.album_songs(album_id)? {
                let in_window = track.last_played.is_some_and(|played| played >= since);
                if in_window && track.play_count > 0 {
                    history.push(track);
                }
            }
        }

        info!(
            albums = album_ids.len(),
            tracks = history.len(),
            since = %since,
            "Reconstructed listening history"
        );
        Ok(history)
    }

    fn create_playlist_blocking(
        &self,
        name: &str,
        song_ids: &[String],
        comment: Option<&str>,
    ) -> Result<String, LibraryError> {
        let mut params = vec![("name", name)];
        for song_id in song_ids {
            params.push(("songId", song_id.as_str()));
        }

        info!(name, songs = song_ids.len(), "Creating playlist");

        let url = self.rest_url("createPlaylist", &params);
        let response: CreatePlaylistResponse = self.get_json("createPlaylist", &url)?;
        ensure_ok(&response.status, response.error.as_ref())?;

        let playlist = response.playlist.ok_or_else(|| {
            LibraryError::InvalidResponse("no playlist returned in create response".to_string())
        })?;

        // createPlaylist has no comment parameter
        if let Some(comment) = comment {
            let url = self.rest_url(
                "updatePlaylist",
                &[("playlistId", playlist.id.as_str()), ("comment", comment)],
            );
            let response: StatusResponse = self.get_json("updatePlaylist", &url)?;
            if let Err(e) = ensure_ok(&response.status, response.error.as_ref()) {
                warn!(playlist_id = %playlist.id, error = %e, "Failed to set playlist comment");
            }
        }

        info!(name, playlist_id = %playlist.id, "Created playlist");
        Ok(playlist.id)
    }

    /// Replace every entry of an existing playlist with `song_ids`
    fn replace_playlist_blocking(
        &self,
        playlist_id: &str,
        song_ids: &[String],
        comment: Option<&str>,
    ) -> Result<(), LibraryError> {
        // Fetch current playlist entries to remove all tracks
        let url = self.rest_url("getPlaylist", &[("id", playlist_id)]);
        let current: PlaylistResponse = self.get_json("getPlaylist", &url)?;
        ensure_ok(&current.status, current.error.as_ref())?;

        let existing = current
            .playlist
            .ok_or_else(|| LibraryError::NotFound(format!("playlist {playlist_id}")))?
            .entry
            .len();

        let indexes: Vec<String> = (0..existing).map(|idx| idx.to_string()).collect();
        let mut params = vec![("playlistId", playlist_id)];
        for idx in &indexes {
            params.push(("songIndexToRemove", idx.as_str()));
        }
        for song_id in song_ids {
            params.push(("songIdToAdd", song_id.as_str()));
        }
        if let Some(comment) = comment {
            params.push(("comment", comment));
        }

        info!(
            playlist_id,
            removed = existing,
            added = song_ids.len(),
            "Replacing playlist contents"
        );

        let url = self.rest_url("updatePlaylist", &params);
        let response: StatusResponse = self.get_json("updatePlaylist", &url)?;
        ensure_ok(&response.status, response.error.as_ref())
    }

    fn delete_playlist_blocking(&self, playlist_id: &str) -> Result<(), LibraryError> {
        let url = self.rest_url("deletePlaylist", &[("id", playlist_id)]);
        let response: StatusResponse = self.get_json("deletePlaylist", &url)?;
        ensure_ok(&response.status, response.error.as_ref())?;

        info!(playlist_id, "Deleted playlist");
        Ok(())
    }

    /// Run a blocking call on the blocking thread pool
    async fn blocking<T, F>(&self, call: F) -> Result<T, LibraryError>
    where
        T: Send + 'static,
        F: FnOnce(&SubsonicClient) -> Result<T, LibraryError> + Send + 'static,
    {
        let client = self.clone();
        tokio::task::spawn_blocking(move || call(&client))
            .await
            .map_err(|e| LibraryError::Unreachable(format!("library task failed: {e}")))?
    }
}

#[async_trait]
impl LibraryClient for SubsonicClient {
    async fn ping(&self) -> Result<(), LibraryError> {
        self.blocking(|client| client.ping_blocking()).await
    }

    async fn list_artists(&self) -> Result<Vec<ArtistInfo>, LibraryError> {
        self.blocking(|client| client.list_artists_blocking()).await
    }

    async fn list_genres(&self) -> Result<Vec<GenreInfo>, LibraryError> {
        self.blocking(|client| client.list_genres_blocking()).await
    }

    async fn tracks_by_artist(&self, artist_id: &str) -> Result<Vec<CandidateTrack>, LibraryError> {
        let artist_id = artist_id.to_string();
        self.blocking(move |client| client.tracks_by_artist_blocking(&artist_id))
            .await
    }

    async fn tracks_by_genre(&self, genre: &str) -> Result<Vec<CandidateTrack>, LibraryError> {
        let genre = genre.to_string();
        self.blocking(move |client| client.tracks_by_genre_blocking(&genre))
            .await
    }

    async fn listening_history(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CandidateTrack>, LibraryError> {
        self.blocking(move |client| client.listening_history_blocking(since))
            .await
    }

    async fn create_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        comment: Option<String>,
    ) -> Result<String, LibraryError> {
        let name = name.to_string();
        let track_ids = track_ids.to_vec();
        self.blocking(move |client| {
            client.create_playlist_blocking(&name, &track_ids, comment.as_deref())
        })
        .await
    }

    async fn replace_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        comment: Option<String>,
    ) -> Result<(), LibraryError> {
        let playlist_id = playlist_id.to_string();
        let track_ids = track_ids.to_vec();
        self.blocking(move |client| {
            client.replace_playlist_blocking(&playlist_id, &track_ids, comment.as_deref())
        })
        .await
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<(), LibraryError> {
        let playlist_id = playlist_id.to_string();
        self.blocking(move |client| client.delete_playlist_blocking(&playlist_id))
            .await
    }
}

/// Map a `status`/`error` pair from a Subsonic response onto our error type
fn ensure_ok(status: &str, error: Option<&SubsonicError>) -> Result<(), LibraryError> {
    if status == "ok" {
        return Ok(());
    }

    let code = error.and_then(|e| e.code);
    let message = error
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| format!("response status was '{status}'"));

    match code {
        Some(code) if AUTH_ERROR_CODES.contains(&code) => Err(LibraryError::Auth(message)),
        Some(NOT_FOUND_ERROR_CODE) => Err(LibraryError::NotFound(message)),
        _ => Err(LibraryError::Api(message.to_lowercase())),
    }
}

fn map_ureq_error(err: ureq::Error) -> LibraryError {
    match err {
        ureq::Error::Status(code @ (401 | 403), _) => {
            LibraryError::Auth(format!("HTTP {code} from library"))
        }
        ureq::Error::Status(code, _) => LibraryError::Api(format!("HTTP {code} from library")),
        ureq::Error::Transport(transport) => LibraryError::Unreachable(transport.to_string()),
    }
}

fn song_to_candidate(song: Song, album: Option<&str>, album_year: Option<u32>) -> CandidateTrack {
    CandidateTrack {
        last_played: song.played.as_deref().and_then(parse_played),
        id: song.id,
        title: song.title,
        artist: song.artist.unwrap_or_else(|| "Unknown Artist".to_string()),
        album: song
            .album
            .or_else(|| album.map(str::to_string))
            .unwrap_or_default(),
        year: song.year.or(album_year),
        duration: song.duration,
        play_count: song.play_count.unwrap_or(0),
    }
}

/// Parse the last played timestamp reported by the server
pub fn parse_played(played: &str) -> Option<DateTime<Utc>> {
    // ISO 8601 is the common case for OpenSubsonic servers
    if let Ok(dt) = DateTime::parse_from_rfc3339(played) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(played, format).ok())
        .map(|naive| naive.and_utc())
}
