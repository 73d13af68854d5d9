//! The owning context object for one map instance
//!
//! [`TiledMap`] wires camera, visible-set calculator, cache, request manager
//! and scene together, with explicit construction and teardown tied to its
//! own lifetime. All methods run on the map's thread; fetch completions
//! arrive through the [`FetchSource`] handed in at construction and are
//! applied by [`pump_fetch_completions`](TiledMap::pump_fetch_completions).

use crate::cache::TileCache;
use crate::camera::{CameraCapabilities, CameraData, CameraModel, Viewport};
use crate::fetch::{FetchSource, TileFetcher, TileRequestManager};
use crate::projection;
use crate::scene::{MapScene, RenderNode};
use crate::tiles::TileSpec;
use crate::visible_tiles::{PrefetchStyle, VisibleTileCalculator};

/// Static configuration for one map instance, provided by the plugin layer
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// Map layer identifier stamped onto every spec
    pub layer: u32,
    /// Provider data version stamped onto every spec
    pub version: u32,
    pub capabilities: CameraCapabilities,
    pub prefetch_style: PrefetchStyle,
    pub use_vertical_lock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tile_size: 256,
            layer: 0,
            version: 0,
            capabilities: CameraCapabilities::default(),
            prefetch_style: PrefetchStyle::default(),
            use_vertical_lock: false,
        }
    }
}

/// Visible-set change notifications for collaborators (e.g. attribution
/// overlays keyed on which tiles are on screen). Plain data, drained with
/// [`TiledMap::take_events`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapEvent {
    TilesAdded(Vec<TileSpec>),
    TilesRemoved(Vec<TileSpec>),
}

pub struct TiledMap {
    camera: CameraModel,
    calculator: VisibleTileCalculator,
    cache: TileCache,
    requests: TileRequestManager,
    scene: MapScene,
    completions: FetchSource,
    events: Vec<MapEvent>,
    tile_size: u32,
    prefetch_style: PrefetchStyle,
}

impl TiledMap {
    pub fn new(config: Config, fetcher: Box<dyn TileFetcher>, completions: FetchSource) -> Self {
        let camera = CameraModel::new(config.capabilities);
        let calculator = VisibleTileCalculator::new(
            config.tile_size,
            config.layer,
            config.version,
            config.capabilities.max_zoom.ceil() as u32,
        );
        let mut scene = MapScene::new(config.tile_size);
        scene.set_use_vertical_lock(config.use_vertical_lock);

        Self {
            camera,
            calculator,
            cache: TileCache::new(),
            requests: TileRequestManager::new(fetcher),
            scene,
            completions,
            events: Vec::new(),
            tile_size: config.tile_size,
            prefetch_style: config.prefetch_style,
        }
    }

    /// Move the camera. The value is corrected against capabilities; when
    /// the corrected value equals the current state nothing happens and no
    /// events are emitted.
    pub fn set_camera_data(&mut self, data: CameraData) {
        if !self.camera.set_camera_data(data) {
            return;
        }
        self.refresh_scene();
    }

    /// Change the viewport.
    ///
    /// Grows the cache budget to fit one screen of tiles plus a one-tile
    /// margin, tripled for the recent working set, and re-evaluates the
    /// camera even though its logical value is unchanged (the screen-space
    /// transform depends on the viewport).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.resize(width, height);
        self.scene.set_screen_size(Viewport::new(width, height));

        if width > 0 && height > 0 {
            let tile = self.tile_size as usize;
            let budget =
                (width as usize + 2 * tile) * (height as usize + 2 * tile) * 4 * 3;
            self.cache.set_min_texture_usage(budget);
        }

        self.refresh_scene();
    }

    /// Warm the cache for tiles just beyond the viewport (and optionally the
    /// neighbour zoom layers) without building render nodes for them.
    pub fn prefetch_data(&mut self) {
        let cam = self.camera.camera_data();
        let viewport = self.camera.viewport();
        let tiles = self
            .calculator
            .prefetch_tiles(&cam, viewport, self.prefetch_style);
        let textured = self.scene.textured_tiles();
        // Cache hits are touched but deliberately not pushed into the scene
        let _ = self
            .requests
            .request_tiles(&mut self.cache, tiles.difference(&textured));
    }

    /// Apply all fetch completions delivered so far. Returns how many tiles
    /// were promoted into the scene.
    ///
    /// Each successful completion lands in the cache unconditionally; it
    /// reaches the scene only if its tile is a member of the visible set *at
    /// this moment* (not the set at request time), so a camera that moved
    /// away and back never renders stale placement.
    pub fn pump_fetch_completions(&mut self) -> usize {
        let mut promoted = 0;
        let mut scene_dirty = false;

        for outcome in self.completions.drain() {
            let spec = outcome.spec;
            let Some(texture) = self.requests.handle_completion(&mut self.cache, outcome) else {
                continue;
            };
            if self.scene.is_visible(&spec) {
                if self.scene.add_tile(texture) {
                    scene_dirty = true;
                    promoted += 1;
                }
            } else {
                tracing::debug!(?spec, "stale tile completion cached");
            }
        }

        if scene_dirty {
            self.scene.update();
        }
        promoted
    }

    fn refresh_scene(&mut self) {
        let cam = self.camera.camera_data();
        let viewport = self.camera.viewport();

        self.scene.set_camera_data(cam);
        let visible = self.calculator.visible_tiles(&cam, viewport);
        let (added, removed) = self.scene.set_visible_tiles(visible.clone());
        if !added.is_empty() {
            self.events.push(MapEvent::TilesAdded(added));
        }
        if !removed.is_empty() {
            self.events.push(MapEvent::TilesRemoved(removed));
        }

        // Serve what the cache already has; fetch the rest
        let textured = self.scene.textured_tiles();
        let ready = self
            .requests
            .request_tiles(&mut self.cache, visible.difference(&textured));
        for texture in ready {
            self.scene.add_tile(texture);
        }

        self.scene.update();
    }

    /// Screen position → WGS84 `(lat, lon)`. With `clip_to_viewport`,
    /// positions outside the viewport yield `None`.
    pub fn item_position_to_coordinate(
        &self,
        pos: (f64, f64),
        clip_to_viewport: bool,
    ) -> Option<(f64, f64)> {
        let viewport = self.camera.viewport();
        if viewport.is_empty() {
            return None;
        }
        if clip_to_viewport {
            let (w, h) = (viewport.width as f64, viewport.height as f64);
            if pos.0 < 0.0 || w < pos.0 || pos.1 < 0.0 || h < pos.1 {
                return None;
            }
        }
        Some(projection::mercator_to_coordinate(
            self.scene.item_position_to_mercator(pos),
        ))
    }

    /// WGS84 `(lat, lon)` → screen position. With `clip_to_viewport`,
    /// coordinates landing outside the viewport yield `None`.
    pub fn coordinate_to_item_position(
        &self,
        lat: f64,
        lon: f64,
        clip_to_viewport: bool,
    ) -> Option<(f64, f64)> {
        let viewport = self.camera.viewport();
        if viewport.is_empty() {
            return None;
        }
        let pos = self
            .scene
            .mercator_to_item_position(projection::coordinate_to_mercator(lat, lon));
        if clip_to_viewport {
            let (w, h) = (viewport.width as f64, viewport.height as f64);
            if pos.0 < 0.0 || w < pos.0 || pos.1 < 0.0 || h < pos.1 {
                return None;
            }
        }
        Some(pos)
    }

    /// The per-frame scene-graph handle for the presentation layer
    pub fn render_nodes(&self) -> impl Iterator<Item = &RenderNode> {
        self.scene.render_nodes()
    }

    /// Drain pending visible-set notifications
    pub fn take_events(&mut self) -> Vec<MapEvent> {
        std::mem::take(&mut self.events)
    }

    #[inline]
    pub fn camera_data(&self) -> CameraData {
        self.camera.camera_data()
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.camera.viewport()
    }

    #[inline]
    pub fn tile_cache(&self) -> &TileCache {
        &self.cache
    }

    #[inline]
    pub fn scene(&self) -> &MapScene {
        &self.scene
    }
}
