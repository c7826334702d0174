use crate::library::{ArtistInfo, CandidateTrack, GenreInfo, LibraryClient, LibraryError};
use crate::provider::{CompletionParams, CompletionProvider, Prompt, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

pub fn track(id: &str, title: &str, artist: &str, plays: u32) -> CandidateTrack {
    CandidateTrack {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: "Album".to_string(),
        year: None,
        duration: Some(200),
        play_count: plays,
        last_played: None,
    }
}

/// Answer exactly one HTTP request with the given status line and body.
///
/// Returns the base url and a handle yielding the raw request text.
pub fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let end_of_headers = line == "\r\n";
            request.push_str(&line);
            if end_of_headers {
                break;
            }
        }

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();
        request.push_str(&String::from_utf8_lossy(&body));

        stream.write_all(response.as_bytes()).unwrap();
        stream.flush().unwrap();
        request
    });

    (url, handle)
}

/// Completion provider returning a canned reply or error.
pub struct ScriptedProvider {
    reply: Result<String, ProviderError>,
    delay: Duration,
    timeout: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedProvider {
    pub fn replying(text: &str) -> Self {
        Self::with_result(Ok(text.to_string()))
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::with_result(Err(error))
    }

    fn with_result(reply: Result<String, ProviderError>) -> Self {
        ScriptedProvider {
            reply,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn complete(&self, prompt: &Prompt, _params: &CompletionParams) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.reply.clone().map(|_| ())
    }
}

/// In-memory media server with call counters and injectable failures.
#[derive(Default)]
pub struct FakeLibrary {
    pub artists: Vec<ArtistInfo>,
    pub by_artist: HashMap<String, Vec<CandidateTrack>>,
    pub by_genre: HashMap<String, Vec<CandidateTrack>>,
    pub history: Vec<CandidateTrack>,
    /// Genres whose lookup fails as if the server were down
    pub unreachable_genres: HashSet<String>,
    /// Delay applied to every catalog read
    pub read_delay: Duration,
    pub fail_writes: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub playlists: Mutex<HashMap<String, (Vec<String>, Option<String>)>>,
    pub history_since: Mutex<Option<DateTime<Utc>>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeLibrary {
    pub fn with_genre(mut self, genre: &str, tracks: Vec<CandidateTrack>) -> Self {
        self.by_genre.insert(genre.to_string(), tracks);
        self
    }

    pub fn with_artist(mut self, id: &str, name: &str, tracks: Vec<CandidateTrack>) -> Self {
        self.artists.push(ArtistInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self.by_artist.insert(id.to_string(), tracks);
        self
    }

    pub fn playlist(&self, id: &str) -> Option<Vec<String>> {
        self.playlists.lock().unwrap().get(id).map(|(tracks, _)| tracks.clone())
    }

    pub fn playlist_comment(&self, id: &str) -> Option<String> {
        self.playlists.lock().unwrap().get(id).and_then(|(_, comment)| comment.clone())
    }

    async fn read<T: Clone>(&self, value: Option<&T>, what: &str) -> Result<T, LibraryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        value.cloned().ok_or_else(|| LibraryError::NotFound(what.to_string()))
    }

    fn write(&self) -> Result<(), LibraryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LibraryError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryClient for FakeLibrary {
    async fn ping(&self) -> Result<(), LibraryError> {
        Ok(())
    }

    async fn list_artists(&self) -> Result<Vec<ArtistInfo>, LibraryError> {
        Ok(self.artists.clone())
    }

    async fn list_genres(&self) -> Result<Vec<GenreInfo>, LibraryError> {
        let mut genres: Vec<GenreInfo> = self
            .by_genre
            .iter()
            .map(|(name, tracks)| GenreInfo {
                name: name.clone(),
                song_count: tracks.len() as u32,
            })
            .collect();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(genres)
    }

    async fn tracks_by_artist(&self, artist_id: &str) -> Result<Vec<CandidateTrack>, LibraryError> {
        self.read(self.by_artist.get(artist_id), artist_id).await
    }

    async fn tracks_by_genre(&self, genre: &str) -> Result<Vec<CandidateTrack>, LibraryError> {
        if self.unreachable_genres.contains(genre) {
            return Err(LibraryError::Unreachable("timed out".to_string()));
        }
        let empty = Vec::new();
        self.read(Some(self.by_genre.get(genre).unwrap_or(&empty)), genre).await
    }

    async fn listening_history(&self, since: DateTime<Utc>) -> Result<Vec<CandidateTrack>, LibraryError> {
        *self.history_since.lock().unwrap() = Some(since);
        self.read(Some(&self.history), "history").await
    }

    async fn create_playlist(
        &self,
        _name: &str,
        track_ids: &[String],
        comment: Option<String>,
    ) -> Result<String, LibraryError> {
        self.write()?;
        let id = format!("pl-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.playlists
            .lock()
            .unwrap()
            .insert(id.clone(), (track_ids.to_vec(), comment));
        Ok(id)
    }

    async fn replace_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        comment: Option<String>,
    ) -> Result<(), LibraryError> {
        self.write()?;
        let mut playlists = self.playlists.lock().unwrap();
        match playlists.get_mut(playlist_id) {
            Some(entry) => {
                *entry = (track_ids.to_vec(), comment);
                Ok(())
            }
            None => Err(LibraryError::NotFound(playlist_id.to_string())),
        }
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<(), LibraryError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(LibraryError::Unreachable("connection refused".to_string()));
        }
        match self.playlists.lock().unwrap().remove(playlist_id) {
            Some(_) => Ok(()),
            None => Err(LibraryError::NotFound(playlist_id.to_string())),
        }
    }
}
