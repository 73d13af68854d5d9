//! Tile fetch pipeline: request deduplication and completion handling
//!
//! Fetching itself is an external concern; implementations of [`TileFetcher`]
//! run whatever I/O they like and deliver raw payloads back through the
//! completion channel, which the map drains on its own thread. Within this
//! module the guarantee is: at most one outstanding fetch per [`TileSpec`].

use crate::cache::TileCache;
use crate::tiles::{TileImage, TileSpec, TileTexture};
use crate::{Result, TileError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// External tile fetch collaborator.
///
/// `fetch` must not block; it starts the asynchronous retrieval of one tile
/// and eventually pushes a [`FetchOutcome`] into the [`FetchSink`] it was
/// constructed with. There is no cancellation: a completion for a tile that
/// is no longer needed is cheap to discard on the receiving side.
pub trait TileFetcher {
    fn fetch(&mut self, spec: TileSpec);
}

/// The result of one fetch round trip, carrying the raw (undecoded) payload
#[derive(Debug)]
pub struct FetchOutcome {
    pub spec: TileSpec,
    pub result: Result<Vec<u8>>,
}

/// Producer half of the completion channel, cloneable into fetch tasks
#[derive(Clone)]
pub struct FetchSink {
    tx: mpsc::UnboundedSender<FetchOutcome>,
}

impl FetchSink {
    pub fn succeed(&self, spec: TileSpec, payload: Vec<u8>) {
        self.deliver(FetchOutcome {
            spec,
            result: Ok(payload),
        });
    }

    pub fn fail(&self, spec: TileSpec, reason: impl Into<String>) {
        self.deliver(FetchOutcome {
            spec,
            result: Err(TileError::Fetch(reason.into())),
        });
    }

    pub fn deliver(&self, outcome: FetchOutcome) {
        // The map being gone just means nobody wants the tile anymore
        let _ = self.tx.send(outcome);
    }
}

/// Consumer half of the completion channel, drained by the map thread
pub struct FetchSource {
    rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

impl FetchSource {
    /// Non-blocking drain of every completion delivered so far
    pub fn drain(&mut self) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Create the channel connecting fetch tasks to the map thread
pub fn completion_channel() -> (FetchSink, FetchSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FetchSink { tx }, FetchSource { rx })
}

/// Serves cache hits synchronously and forwards misses to the fetcher,
/// keeping at most one fetch in flight per spec.
pub struct TileRequestManager {
    fetcher: Box<dyn TileFetcher>,
    in_flight: HashSet<TileSpec>,
}

impl TileRequestManager {
    pub fn new(fetcher: Box<dyn TileFetcher>) -> Self {
        Self {
            fetcher,
            in_flight: HashSet::new(),
        }
    }

    /// Resolve a set of wanted tiles against the cache.
    ///
    /// Returns the immediately-available subset (each hit marked recently
    /// used). Every miss without an outstanding fetch is handed to the
    /// fetcher and recorded as in flight.
    pub fn request_tiles<'a>(
        &mut self,
        cache: &mut TileCache,
        specs: impl IntoIterator<Item = &'a TileSpec>,
    ) -> Vec<Arc<TileTexture>> {
        let mut ready = Vec::new();
        for spec in specs {
            if let Some(texture) = cache.get(spec) {
                ready.push(texture);
            } else if self.in_flight.insert(*spec) {
                self.fetcher.fetch(*spec);
            }
        }
        ready
    }

    /// Apply one fetch completion.
    ///
    /// Success decodes the payload and populates the cache; the returned
    /// texture is for the caller to hand to the scene **only if the tile is
    /// still visible**. A stale completion is cached all the same. Fetch or
    /// decode failure just clears the in-flight marker: the tile will be
    /// re-requested by the next cycle that still needs it.
    pub fn handle_completion(
        &mut self,
        cache: &mut TileCache,
        outcome: FetchOutcome,
    ) -> Option<Arc<TileTexture>> {
        self.in_flight.remove(&outcome.spec);

        let payload = match outcome.result {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(spec = ?outcome.spec, %err, "tile fetch failed");
                return None;
            }
        };

        match TileImage::decode(&payload) {
            Ok(image) => {
                let texture = Arc::new(TileTexture::new(outcome.spec, image));
                cache.insert(texture.clone());
                Some(texture)
            }
            Err(err) => {
                tracing::warn!(spec = ?outcome.spec, %err, "tile decode failed");
                None
            }
        }
    }

    #[inline]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    #[inline]
    pub fn is_in_flight(&self, spec: &TileSpec) -> bool {
        self.in_flight.contains(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fetcher that only records what was asked of it
    struct RecordingFetcher {
        requests: Arc<Mutex<Vec<TileSpec>>>,
    }

    impl TileFetcher for RecordingFetcher {
        fn fetch(&mut self, spec: TileSpec) {
            self.requests.lock().unwrap().push(spec);
        }
    }

    fn manager() -> (TileRequestManager, Arc<Mutex<Vec<TileSpec>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let fetcher = RecordingFetcher {
            requests: requests.clone(),
        };
        (TileRequestManager::new(Box::new(fetcher)), requests)
    }

    fn png_bytes() -> Vec<u8> {
        let rgba = image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]));
        let mut bytes = Vec::new();
        rgba.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    fn spec(x: u32) -> TileSpec {
        TileSpec::new(3, x, 0, 0, 0)
    }

    #[test]
    fn test_miss_forwards_to_fetcher() {
        let (mut mgr, requests) = manager();
        let mut cache = TileCache::new();

        let ready = mgr.request_tiles(&mut cache, &[spec(0), spec(1)]);
        assert!(ready.is_empty());
        assert_eq!(requests.lock().unwrap().len(), 2);
        assert_eq!(mgr.in_flight_count(), 2);
    }

    #[test]
    fn test_duplicate_request_fetches_once() {
        let (mut mgr, requests) = manager();
        let mut cache = TileCache::new();

        mgr.request_tiles(&mut cache, &[spec(0)]);
        mgr.request_tiles(&mut cache, &[spec(0)]);

        assert_eq!(requests.lock().unwrap().len(), 1);
        assert_eq!(mgr.in_flight_count(), 1);
    }

    #[test]
    fn test_completion_populates_cache_and_clears_marker() {
        let (mut mgr, requests) = manager();
        let mut cache = TileCache::new();

        mgr.request_tiles(&mut cache, &[spec(0)]);
        let texture = mgr.handle_completion(
            &mut cache,
            FetchOutcome {
                spec: spec(0),
                result: Ok(png_bytes()),
            },
        );

        assert!(texture.is_some());
        assert!(cache.contains(&spec(0)));
        assert!(!mgr.is_in_flight(&spec(0)));

        // The next request is a pure cache hit
        let ready = mgr.request_tiles(&mut cache, &[spec(0)]);
        assert_eq!(ready.len(), 1);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failure_allows_retry_on_next_request() {
        let (mut mgr, requests) = manager();
        let mut cache = TileCache::new();

        mgr.request_tiles(&mut cache, &[spec(0)]);
        let texture = mgr.handle_completion(
            &mut cache,
            FetchOutcome {
                spec: spec(0),
                result: Err(TileError::Fetch("timeout".into())),
            },
        );
        assert!(texture.is_none());
        assert!(!cache.contains(&spec(0)));

        // No retry timer: the retry is driven by the camera still needing it
        mgr.request_tiles(&mut cache, &[spec(0)]);
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_failure_is_absorbed() {
        let (mut mgr, _requests) = manager();
        let mut cache = TileCache::new();

        mgr.request_tiles(&mut cache, &[spec(0)]);
        let texture = mgr.handle_completion(
            &mut cache,
            FetchOutcome {
                spec: spec(0),
                result: Ok(vec![0xde, 0xad, 0xbe, 0xef]),
            },
        );
        assert!(texture.is_none());
        assert!(!cache.contains(&spec(0)));
        assert!(!mgr.is_in_flight(&spec(0)));
    }

    #[test]
    fn test_completion_channel_roundtrip() {
        let (sink, mut source) = completion_channel();
        sink.succeed(spec(0), png_bytes());
        sink.fail(spec(1), "unreachable");

        let outcomes = source.drain();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
        assert!(source.drain().is_empty());
    }
}
