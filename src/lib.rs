//! Tiled Map Library - Core Engine for Slippy-Map Tile Rendering
//!
//! This library implements the camera-to-pixels pipeline of a raster tile
//! map: computing which tiles of the power-of-two Mercator grid cover the
//! viewport, caching decoded tile textures under a byte budget, deduplicating
//! in-flight tile fetches, and diffing the visible set into per-tile render
//! nodes, including the duplicate render passes needed when the view crosses
//! the antimeridian.
//!
//! # Architecture
//!
//! - **[`projection`]**: Stateless normalized Mercator forward/inverse math
//! - **[`CameraModel`]**: Clamped camera state and derived zoom quantities
//! - **[`VisibleTileCalculator`]**: Camera + viewport → set of [`TileSpec`]
//! - **[`TileCache`]**: Byte-budgeted LRU store of decoded [`TileTexture`]s
//! - **[`TileRequestManager`]**: Cache hits served synchronously, misses
//!   forwarded (deduplicated) to an external [`TileFetcher`]
//! - **[`MapScene`]**: Render-node tables diffed against the visible set,
//!   rendered under three wrap offsets for dateline crossing
//! - **[`TiledMap`]**: The owning context object wiring the pipeline together
//!
//! Scene and cache logic is synchronous and single-threaded; the only
//! asynchronous boundary is the tile fetch round trip, whose completions are
//! delivered back through a channel drained on the map's own thread.

mod cache;
mod camera;
mod fetch;
mod map;
pub mod projection;
mod scene;
mod tiles;
mod visible_tiles;

// Public API exports
pub use cache::TileCache;
pub use camera::{CameraCapabilities, CameraData, CameraModel, Viewport};
pub use fetch::{FetchOutcome, FetchSink, FetchSource, TileFetcher, TileRequestManager, completion_channel};
pub use map::{Config, MapEvent, TiledMap};
pub use scene::{Filtering, MapScene, RenderNode, TexturedVertex, WrapPass};
pub use tiles::{TileImage, TileSpec, TileTexture};
pub use visible_tiles::{PrefetchStyle, VisibleTileCalculator};

/// Error types for the tile pipeline
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("tile decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("tile fetch failed: {0}")]
    Fetch(String),
}

pub type Result<T> = std::result::Result<T, TileError>;
