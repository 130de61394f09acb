use std::{fmt::Display, path::PathBuf, sync::Arc};

use crossbeam::atomic::AtomicCell;
use dashmap::{mapref::entry::Entry, DashMap};
use lazy_static::lazy_static;
use log::{info, warn};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod local;
mod youtube;

pub use local::LocalFetcher;
pub use youtube::YouTubeFetcher;

lazy_static! {
    static ref YOUTUBE_HOST: Regex =
        Regex::new(r"^(?:https?://)?(?:[a-z0-9-]+\.)?(?:youtube\.com|youtu\.be)/")
            .expect("host pattern compiles");
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("could not spawn {tool}: {reason}")]
    ToolUnavailable { tool: &'static str, reason: String },

    #[error("could not parse {tool} output: {source}")]
    ParseError {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("resource is unavailable")]
    Unavailable,
}

/// What kind of media a url points at. Selected purely by url shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Youtube,
    Local,
}

impl StreamKind {
    pub fn from_url(url: &str) -> Self {
        if YOUTUBE_HOST.is_match(url) {
            Self::Youtube
        } else {
            Self::Local
        }
    }
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Youtube => write!(f, "youtube"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A handle to one media item. The url is its identity; duration and info
/// arrive later from the metadata fetch and update atomically.
#[derive(Debug)]
pub struct Stream {
    pub kind: StreamKind,
    pub url: String,
    duration: AtomicCell<f64>,
    info: RwLock<Value>,
}

impl Stream {
    pub(crate) fn new(kind: StreamKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            duration: AtomicCell::new(0.0),
            info: RwLock::new(Value::Null),
        }
    }

    /// Duration in seconds. Zero means not yet known.
    pub fn duration(&self) -> f64 {
        self.duration.load()
    }

    pub fn set_duration(&self, seconds: f64) {
        self.duration.store(seconds.max(0.0));
    }

    pub fn info(&self) -> Value {
        self.info.read().clone()
    }

    pub fn set_info(&self, value: Value) {
        *self.info.write() = value;
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            kind: self.kind,
            url: self.url.clone(),
            duration: self.duration(),
        }
    }
}

/// The serializable face of a stream, used in queue views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub kind: StreamKind,
    pub url: String,
    pub duration: f64,
}

/// Everything a metadata fetch can learn about a stream.
#[derive(Debug, Default)]
pub struct Metadata {
    pub duration: f64,
    pub raw: Value,
}

/// A provider-specific metadata fetcher. Fetching never blocks resolution;
/// the store runs fetchers on detached tasks.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, stream: &Stream) -> Result<Metadata, StreamError>;
}

/// Url-keyed cache of every stream the server has seen.
#[derive(Debug)]
pub struct StreamStore {
    streams: DashMap<String, Arc<Stream>>,
    data_dir: PathBuf,
}

impl StreamStore {
    pub fn new(data_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            streams: Default::default(),
            data_dir,
        })
    }

    /// Returns the stream registered for `url`, creating it on first
    /// sighting. A new stream starts with duration 0 and a detached task
    /// fills in metadata as it arrives.
    pub fn resolve(&self, url: &str) -> Arc<Stream> {
        let (stream, created) = match self.streams.entry(url.to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                let stream = Arc::new(Stream::new(StreamKind::from_url(url), url));
                slot.insert(stream.clone());
                (stream, true)
            }
        };

        if created {
            info!(
                "registered new {} stream {}; {} streams known",
                stream.kind,
                stream.url,
                self.streams.len()
            );

            tokio::spawn(fetch_metadata(stream.clone(), self.data_dir.clone()));
        }

        stream
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }
}

async fn fetch_metadata(stream: Arc<Stream>, data_dir: PathBuf) {
    let fetcher: Box<dyn Fetcher> = match stream.kind {
        StreamKind::Youtube => Box::new(YouTubeFetcher),
        StreamKind::Local => Box::new(LocalFetcher::new(data_dir)),
    };

    match fetcher.fetch(&stream).await {
        Ok(metadata) => {
            stream.set_duration(metadata.duration);
            stream.set_info(metadata.raw);

            info!(
                "fetched metadata for {}: duration {}s",
                stream.url,
                metadata.duration
            );
        }
        Err(error) => {
            // The stream stays playable with an unknown duration.
            warn!("metadata fetch for {} failed: {error}", stream.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_the_url_host() {
        assert_eq!(
            StreamKind::from_url("https://www.youtube.com/watch?v=abc"),
            StreamKind::Youtube
        );
        assert_eq!(StreamKind::from_url("https://youtu.be/abc"), StreamKind::Youtube);
        assert_eq!(StreamKind::from_url("movies/night.mp4"), StreamKind::Local);
        assert_eq!(
            StreamKind::from_url("https://example.com/watch?v=abc"),
            StreamKind::Local
        );
    }

    #[tokio::test]
    async fn resolve_returns_the_cached_descriptor() {
        let store = StreamStore::new(PathBuf::from("./media"));

        let first = store.resolve("clips/a.mp4");
        let second = store.resolve("clips/a.mp4");

        assert!(Arc::ptr_eq(&first, &second), "same url resolves to the same stream");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duration_starts_unknown() {
        let stream = Stream::new(StreamKind::Local, "clips/a.mp4");

        assert_eq!(stream.duration(), 0.0);

        stream.set_duration(12.5);
        assert_eq!(stream.duration(), 12.5);
    }

    #[test]
    fn info_replaces_wholesale() {
        let stream = Stream::new(StreamKind::Local, "clips/a.mp4");

        assert!(stream.info().is_null(), "info starts empty");

        stream.set_info(serde_json::json!({ "title": "movie night" }));
        assert_eq!(stream.info()["title"], "movie night");
    }
}
