//! Per-tile render nodes diffed against the visible set
//!
//! The scene keeps one node table per wrap pass. All tile x-indices are
//! lifted into a contiguous frame first (columns below the wrap point get
//! `+side_length`), and the three passes then view that frame under camera
//! x-offsets of `0` and `±side_length`. In the common case only the primary
//! pass produces visible geometry; near the dateline, or zoomed out far
//! enough that most of the world is on screen, the shifted passes render the
//! columns that re-enter from the opposite edge.

use crate::camera::{CameraData, Viewport};
use crate::projection;
use crate::tiles::{TileSpec, TileTexture};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Distance from an integer zoom level beyond which tiles are scaled and
/// need linear texture sampling.
const LINEAR_SCALING_THRESHOLD: f64 = 0.05;

/// Texture sampling mode for rendered tiles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filtering {
    /// Pixel-exact at integer zoom
    Nearest,
    /// Fractional zoom scales tiles on screen
    Linear,
}

/// One corner of a tile quad in screen space, with its texture coordinate
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TexturedVertex {
    pub x: f64,
    pub y: f64,
    pub u: f32,
    pub v: f32,
}

impl TexturedVertex {
    fn new(x: f64, y: f64, u: f32, v: f32) -> Self {
        Self { x, y, u, v }
    }
}

/// The drawable representation of one tile: a screen-space quad bound to a
/// shared texture. Owned exclusively by the scene.
#[derive(Clone, Debug)]
pub struct RenderNode {
    pub spec: TileSpec,
    pub texture: Arc<TileTexture>,
    /// Strip order: top-left, bottom-left, top-right, bottom-right
    pub vertices: [TexturedVertex; 4],
    pub filtering: Filtering,
}

/// The three camera x-offsets under which the visible set is rendered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapPass {
    Primary,
    /// Duplicates one world-width to the left
    WrapLeft,
    /// Duplicates one world-width to the right
    WrapRight,
}

impl WrapPass {
    pub const ALL: [WrapPass; 3] = [WrapPass::Primary, WrapPass::WrapLeft, WrapPass::WrapRight];

    fn index(self) -> usize {
        match self {
            WrapPass::Primary => 0,
            WrapPass::WrapLeft => 1,
            WrapPass::WrapRight => 2,
        }
    }

    /// Camera x-offset in grid units. Moving the camera one world to the
    /// right makes the content appear one world to the left.
    fn center_shift(self, side_length: f64) -> f64 {
        match self {
            WrapPass::Primary => 0.0,
            WrapPass::WrapLeft => side_length,
            WrapPass::WrapRight => -side_length,
        }
    }
}

/// Contiguous tile-index bounding box of the visible set, in the shifted
/// (wrap-free) frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TileBounds {
    min_x: i64,
    max_x: i64,
    min_y: i64,
    max_y: i64,
}

pub struct MapScene {
    screen_size: Viewport,
    tile_size: u32,
    camera: CameraData,
    visible_tiles: HashSet<TileSpec>,
    textures: HashMap<TileSpec, Arc<TileTexture>>,

    int_zoom: u32,
    side_length: u32,
    linear_scaling: bool,

    bounds: Option<TileBounds>,
    /// Tile columns below this index are shifted by `+side_length`
    tile_x_wraps_below: i64,

    // Camera center and screen extent in grid units
    mercator_center_x: f64,
    mercator_center_y: f64,
    mercator_width: f64,
    mercator_height: f64,

    // Letterboxing: the band of the screen the map actually occupies
    screen_offset_x: f64,
    screen_offset_y: f64,
    screen_width: f64,
    screen_height: f64,

    use_vertical_lock: bool,
    vertical_lock: bool,

    nodes: [HashMap<TileSpec, RenderNode>; 3],
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MapScene {
    pub fn new(tile_size: u32) -> Self {
        Self {
            screen_size: Viewport::default(),
            tile_size,
            camera: CameraData::default(),
            visible_tiles: HashSet::new(),
            textures: HashMap::new(),
            int_zoom: 0,
            side_length: 1,
            linear_scaling: false,
            bounds: None,
            tile_x_wraps_below: 0,
            mercator_center_x: 0.0,
            mercator_center_y: 0.0,
            mercator_width: 0.0,
            mercator_height: 0.0,
            screen_offset_x: 0.0,
            screen_offset_y: 0.0,
            screen_width: 0.0,
            screen_height: 0.0,
            use_vertical_lock: false,
            vertical_lock: false,
            nodes: [HashMap::new(), HashMap::new(), HashMap::new()],
        }
    }

    pub fn set_screen_size(&mut self, size: Viewport) {
        self.screen_size = size;
    }

    pub fn set_use_vertical_lock(&mut self, lock: bool) {
        self.use_vertical_lock = lock;
    }

    /// Whether the last camera setup letterboxed the map vertically
    #[inline]
    pub fn vertical_lock(&self) -> bool {
        self.vertical_lock
    }

    pub fn set_camera_data(&mut self, camera: CameraData) {
        self.camera = camera;
        self.int_zoom = camera.zoom_level.floor() as u32;
        let delta = camera.zoom_level - self.int_zoom as f64;
        self.linear_scaling = delta.abs() > LINEAR_SCALING_THRESHOLD;
        self.side_length = 1u32 << self.int_zoom.min(31);
    }

    /// Replace the visible set wholesale and rebuild the derived transforms.
    ///
    /// Returns the specs that entered and left the set, for notification.
    /// Textures of departed tiles are dropped from the scene (the cache may
    /// still hold them); node destruction happens in [`update`](Self::update).
    pub fn set_visible_tiles(
        &mut self,
        tiles: HashSet<TileSpec>,
    ) -> (Vec<TileSpec>, Vec<TileSpec>) {
        let added: Vec<TileSpec> = tiles.difference(&self.visible_tiles).copied().collect();
        let removed: Vec<TileSpec> = self.visible_tiles.difference(&tiles).copied().collect();

        self.set_tile_bounds(&tiles);
        self.setup_camera();

        for spec in &removed {
            self.textures.remove(spec);
        }
        self.visible_tiles = tiles;

        (added, removed)
    }

    /// Bind a texture to a visible tile. Textures for tiles outside the
    /// current visible set are refused (they stay cached for later).
    pub fn add_tile(&mut self, texture: Arc<TileTexture>) -> bool {
        if !self.visible_tiles.contains(&texture.spec) {
            return false;
        }
        self.textures.insert(texture.spec, texture);
        true
    }

    /// The visible tiles that already have a texture bound
    pub fn textured_tiles(&self) -> HashSet<TileSpec> {
        self.textures.keys().copied().collect()
    }

    #[inline]
    pub fn is_visible(&self, spec: &TileSpec) -> bool {
        self.visible_tiles.contains(spec)
    }

    #[inline]
    pub fn visible_tiles(&self) -> &HashSet<TileSpec> {
        &self.visible_tiles
    }

    /// Determine the contiguous tile bounds of the set, detecting dateline
    /// crossing. A gap in the occupied columns indicates the set wraps: when
    /// both far edges are present but one of the two central columns is
    /// absent, every column left of the gap is lifted by `+side_length`
    /// before the min/max bounds are taken.
    ///
    /// This classification is a best-effort heuristic carried over from the
    /// original engine, not a provably correct wrap detector for every
    /// camera/viewport combination.
    fn set_tile_bounds(&mut self, tiles: &HashSet<TileSpec>) {
        self.tile_x_wraps_below = 0;
        let side = self.side_length as i64;

        let mut has_far_left = false;
        let mut has_far_right = false;
        let mut has_mid_left = false;
        let mut has_mid_right = false;

        for tile in tiles {
            if tile.zoom != self.int_zoom {
                continue;
            }
            let x = tile.x as i64;
            if x == 0 {
                has_far_left = true;
            } else if x == side - 1 {
                has_far_right = true;
            } else if x == side / 2 - 1 {
                has_mid_left = true;
            } else if x == side / 2 {
                has_mid_right = true;
            }
        }

        if has_far_left && has_far_right {
            if !has_mid_right {
                self.tile_x_wraps_below = side / 2;
            } else if !has_mid_left {
                self.tile_x_wraps_below = side / 2 - 1;
            }
        }

        let mut bounds: Option<TileBounds> = None;
        for tile in tiles {
            if tile.zoom != self.int_zoom {
                continue;
            }
            let mut x = tile.x as i64;
            if x < self.tile_x_wraps_below {
                x += side;
            }
            let y = tile.y as i64;
            bounds = Some(match bounds {
                None => TileBounds {
                    min_x: x,
                    max_x: x,
                    min_y: y,
                    max_y: y,
                },
                Some(b) => TileBounds {
                    min_x: b.min_x.min(x),
                    max_x: b.max_x.max(x),
                    min_y: b.min_y.min(y),
                    max_y: b.max_y.max(y),
                },
            });
        }
        self.bounds = bounds;
    }

    /// Recompute the grid-to-screen transform from camera and screen size.
    fn setup_camera(&mut self) {
        let side = self.side_length as f64;
        let screen_w = self.screen_size.width as f64;
        let screen_h = self.screen_size.height as f64;

        // On-screen pixel size of one grid tile at the fractional zoom
        let z = 2f64.powf(self.camera.zoom_level - self.int_zoom as f64) * self.tile_size as f64;

        self.mercator_width = screen_w / z;
        self.mercator_height = screen_h / z;

        let center = projection::coordinate_to_mercator(self.camera.center_lat, self.camera.center_lon);
        let mut center_x = center.x * side;
        let center_y = center.y * side;

        // Lift the camera into the same wrap-free frame as the tile bounds
        if center_x < self.tile_x_wraps_below as f64 {
            center_x += side;
        }
        self.mercator_center_x = center_x;
        self.mercator_center_y = center_y;

        // Letterbox vertically when the whole world is shorter than the
        // screen and vertical lock is requested
        if self.use_vertical_lock && self.mercator_height > side {
            self.mercator_center_y = side / 2.0;
            self.screen_offset_y = screen_h * (0.5 - side / (2.0 * self.mercator_height));
            self.screen_height = screen_h - 2.0 * self.screen_offset_y;
            self.mercator_height = side;
            self.vertical_lock = true;
        } else {
            self.screen_offset_y = 0.0;
            self.screen_height = screen_h;
            self.vertical_lock = false;
        }

        // The world never repeats horizontally within one pass; when it is
        // narrower than the screen the map occupies a centered band
        if self.mercator_width > side {
            self.screen_offset_x = screen_w * (0.5 - side / (2.0 * self.mercator_width));
            self.screen_width = screen_w - 2.0 * self.screen_offset_x;
            self.mercator_width = side;
        } else {
            self.screen_offset_x = 0.0;
            self.screen_width = screen_w;
        }
    }

    /// Screen position → normalized mercator coordinate in `[0,1]²`
    pub fn item_position_to_mercator(&self, pos: (f64, f64)) -> geo::Coord<f64> {
        let side = self.side_length as f64;

        let mut x =
            self.mercator_width * (((pos.0 - self.screen_offset_x) / self.screen_width) - 0.5);
        x += self.mercator_center_x;
        if x > side {
            x -= side;
        }
        if x < 0.0 {
            x += side;
        }
        x /= side;

        let mut y =
            self.mercator_height * (((pos.1 - self.screen_offset_y) / self.screen_height) - 0.5);
        y += self.mercator_center_y;
        y /= side;

        geo::Coord { x, y }
    }

    /// Normalized mercator coordinate → screen position.
    ///
    /// Among the primary and ±1-world wrapped x-candidates, the one with the
    /// minimum absolute screen delta from the camera center wins, so
    /// positions near the dateline come out next to the camera instead of a
    /// world-width away.
    pub fn mercator_to_item_position(&self, mercator: geo::Coord<f64>) -> (f64, f64) {
        let side = self.side_length as f64;
        let mx = side * mercator.x;

        let mut lb = self.mercator_center_x - self.mercator_width / 2.0;
        if lb < 0.0 {
            lb += side;
        }
        let mut ub = self.mercator_center_x + self.mercator_width / 2.0;
        if side < ub {
            ub -= side;
        }

        let mut m = (mx - self.mercator_center_x) / self.mercator_width;
        let m_wrap_lower = (mx - self.mercator_center_x - side) / self.mercator_width;
        let m_wrap_upper = (mx - self.mercator_center_x + side) / self.mercator_width;

        // The visible range crosses the seam when it has zero or negative
        // extent after wrapping its endpoints
        if (ub - lb).abs() < 1e-12 || ub < lb {
            if self.mercator_center_x < ub {
                if lb < mx {
                    m = m_wrap_lower;
                }
            } else if lb < self.mercator_center_x && mx <= ub {
                m = m_wrap_upper;
            }
        }

        if m_wrap_lower.abs() < m.abs() {
            m = m_wrap_lower;
        }
        if m_wrap_upper.abs() < m.abs() {
            m = m_wrap_upper;
        }

        let x = self.screen_width * (0.5 + m);
        let y = self.screen_height
            * (0.5 + (side * mercator.y - self.mercator_center_y) / self.mercator_height);

        (x + self.screen_offset_x, y + self.screen_offset_y)
    }

    /// Build the screen-space quad for a tile under the given pass.
    ///
    /// Rejects tiles outside the current bounds or zoom level, degenerate
    /// quads, and quads that do not intersect the clip rectangle.
    fn build_geometry(&self, spec: &TileSpec, pass: WrapPass) -> Option<[TexturedVertex; 4]> {
        let bounds = self.bounds?;
        let side = self.side_length as i64;

        let mut x = spec.x as i64;
        if x < self.tile_x_wraps_below {
            x += side;
        }

        if x < bounds.min_x
            || bounds.max_x < x
            || (spec.y as i64) < bounds.min_y
            || bounds.max_y < (spec.y as i64)
            || spec.zoom != self.int_zoom
        {
            return None;
        }

        let center_x = self.mercator_center_x + pass.center_shift(self.side_length as f64);

        let sx = |gx: f64| {
            self.screen_offset_x + self.screen_width * (0.5 + (gx - center_x) / self.mercator_width)
        };
        let sy = |gy: f64| {
            self.screen_offset_y
                + self.screen_height * (0.5 + (gy - self.mercator_center_y) / self.mercator_height)
        };

        let x1 = sx(x as f64);
        let x2 = sx(x as f64 + 1.0);
        let y1 = sy(spec.y as f64);
        let y2 = sy(spec.y as f64 + 1.0);

        // Zero-area quads appear at extreme zoom/viewport combinations
        if x1 == x2 || y1 == y2 {
            return None;
        }

        // Clip against the (letterboxed) screen band
        let clip_x2 = self.screen_offset_x + self.screen_width;
        let clip_y2 = self.screen_offset_y + self.screen_height;
        if x2 <= self.screen_offset_x || clip_x2 <= x1 || y2 <= self.screen_offset_y || clip_y2 <= y1
        {
            return None;
        }

        Some([
            TexturedVertex::new(x1, y1, 0.0, 0.0),
            TexturedVertex::new(x1, y2, 0.0, 1.0),
            TexturedVertex::new(x2, y1, 1.0, 0.0),
            TexturedVertex::new(x2, y2, 1.0, 1.0),
        ])
    }

    /// Rebuild the node tables against the current visible set and textures.
    ///
    /// Nodes whose tile left the visible set are destroyed; surviving nodes
    /// get their geometry refreshed in place (and are destroyed if it became
    /// degenerate or off-clip); visible tiles with an available texture and
    /// valid geometry gain a node. At most one node exists per (spec, pass).
    pub fn update(&mut self) {
        #[cfg(feature = "profiling")]
        profiling::scope!("scene::update");

        if self.screen_size.is_empty() || self.bounds.is_none() {
            for table in &mut self.nodes {
                table.clear();
            }
            return;
        }

        for pass in WrapPass::ALL {
            self.update_pass(pass);
        }
    }

    fn update_pass(&mut self, pass: WrapPass) {
        let filtering = if self.linear_scaling {
            Filtering::Linear
        } else {
            Filtering::Nearest
        };

        // Drop nodes for tiles that left the visible set
        let stale: Vec<TileSpec> = self.nodes[pass.index()]
            .keys()
            .filter(|spec| !self.visible_tiles.contains(spec))
            .copied()
            .collect();
        for spec in stale {
            self.nodes[pass.index()].remove(&spec);
        }

        // Refresh geometry of surviving nodes in place
        let survivors: Vec<TileSpec> = self.nodes[pass.index()].keys().copied().collect();
        for spec in survivors {
            match self.build_geometry(&spec, pass) {
                Some(vertices) => {
                    if let Some(node) = self.nodes[pass.index()].get_mut(&spec) {
                        if node.vertices != vertices {
                            node.vertices = vertices;
                        }
                        node.filtering = filtering;
                    }
                }
                None => {
                    self.nodes[pass.index()].remove(&spec);
                }
            }
        }

        // Build nodes for newly renderable tiles
        for spec in &self.visible_tiles {
            if self.nodes[pass.index()].contains_key(spec) {
                continue;
            }
            let Some(texture) = self.textures.get(spec) else {
                continue;
            };
            let Some(vertices) = self.build_geometry(spec, pass) else {
                continue;
            };
            self.nodes[pass.index()].insert(
                *spec,
                RenderNode {
                    spec: *spec,
                    texture: texture.clone(),
                    vertices,
                    filtering,
                },
            );
        }
    }

    /// All render nodes across the three passes, for the presentation layer
    pub fn render_nodes(&self) -> impl Iterator<Item = &RenderNode> {
        self.nodes.iter().flat_map(|table| table.values())
    }

    /// Render nodes of a single wrap pass
    pub fn pass_nodes(&self, pass: WrapPass) -> impl Iterator<Item = &RenderNode> {
        self.nodes[pass.index()].values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().map(|table| table.len()).sum()
    }
}
