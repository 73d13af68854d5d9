//! Computes the set of tiles covering the viewport for a given camera
//!
//! The calculator is a pure function of camera and viewport: calling it
//! twice with identical inputs yields identical sets. The set is always
//! recomputed wholesale, never mutated incrementally.

use crate::camera::{CameraData, Viewport};
use crate::projection;
use crate::tiles::TileSpec;
use std::collections::HashSet;

/// How far beyond the visible set [`VisibleTileCalculator::prefetch_tiles`]
/// reaches when warming the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrefetchStyle {
    /// One extra ring of tiles around the visible set, at the current zoom
    #[default]
    Extent,
    /// The extra ring plus the coarser neighbour zoom layer
    OneNeighbourLayer,
    /// The extra ring plus both neighbour zoom layers
    TwoNeighbourLayers,
}

/// Camera + viewport → visible [`TileSpec`] set
#[derive(Clone, Debug)]
pub struct VisibleTileCalculator {
    tile_size: u32,
    layer: u32,
    version: u32,
    /// Extra tiles of margin around the exact viewport coverage
    margin: i64,
    max_zoom: u32,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl VisibleTileCalculator {
    pub fn new(tile_size: u32, layer: u32, version: u32, max_zoom: u32) -> Self {
        Self {
            tile_size,
            layer,
            version,
            margin: 1,
            max_zoom,
        }
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    pub fn set_layer(&mut self, layer: u32) {
        self.layer = layer;
    }

    /// The exact set of tiles covering the viewport (plus one tile of
    /// margin) at the camera's floored zoom level.
    ///
    /// A zero-area viewport yields the empty set. Columns crossing the
    /// antimeridian are wrapped back into `[0, 2^zoom)`; the raw column
    /// range stays contiguous internally so the bounding box is a single
    /// integer range even when the view straddles the dateline.
    pub fn visible_tiles(&self, camera: &CameraData, viewport: Viewport) -> HashSet<TileSpec> {
        let zoom = camera.zoom_level.floor() as u32;
        self.tiles_for_zoom(camera, viewport, zoom, self.margin)
    }

    /// The visible set widened for cache warming: one extra ring of margin,
    /// optionally unioned with the covering sets at the neighbour zoom
    /// levels, so that zooming or panning hits warm cache entries.
    pub fn prefetch_tiles(
        &self,
        camera: &CameraData,
        viewport: Viewport,
        style: PrefetchStyle,
    ) -> HashSet<TileSpec> {
        let zoom = camera.zoom_level.floor() as u32;
        let mut tiles = self.tiles_for_zoom(camera, viewport, zoom, self.margin + 1);

        let coarser = zoom.checked_sub(1);
        let finer = if zoom < self.max_zoom {
            Some(zoom + 1)
        } else {
            None
        };

        let layers: &[Option<u32>] = match style {
            PrefetchStyle::Extent => &[],
            PrefetchStyle::OneNeighbourLayer => &[coarser],
            PrefetchStyle::TwoNeighbourLayers => &[coarser, finer],
        };
        for layer_zoom in layers.iter().flatten() {
            tiles.extend(self.tiles_for_zoom(camera, viewport, *layer_zoom, self.margin));
        }
        tiles
    }

    fn tiles_for_zoom(
        &self,
        camera: &CameraData,
        viewport: Viewport,
        zoom: u32,
        margin: i64,
    ) -> HashSet<TileSpec> {
        #[cfg(feature = "profiling")]
        profiling::scope!("visible_tiles::tiles_for_zoom");

        let mut tiles = HashSet::new();
        if viewport.is_empty() {
            return tiles;
        }

        let side = 1i64 << zoom;

        // Camera center in grid coordinates (0 .. side per axis)
        let center = projection::coordinate_to_mercator(camera.center_lat, camera.center_lon);
        let cx = center.x * side as f64;
        let cy = center.y * side as f64;

        // On-screen pixel size of one tile of this grid at the camera's
        // fractional zoom
        let z = 2f64.powf(camera.zoom_level - zoom as f64) * self.tile_size as f64;
        let half_w = viewport.width as f64 / (2.0 * z);
        let half_h = viewport.height as f64 / (2.0 * z);

        let mut min_x = (cx - half_w).floor() as i64 - margin;
        let mut max_x = (cx + half_w).floor() as i64 + margin;
        let min_y = ((cy - half_h).floor() as i64 - margin).max(0);
        let max_y = ((cy + half_h).floor() as i64 + margin).min(side - 1);

        // Zoomed out far enough that the range covers the whole world:
        // emit each column exactly once.
        if max_x - min_x + 1 >= side {
            min_x = 0;
            max_x = side - 1;
        }

        for x in min_x..=max_x {
            let wrapped_x = x.rem_euclid(side) as u32;
            for y in min_y..=max_y {
                tiles.insert(TileSpec::new(
                    zoom,
                    wrapped_x,
                    y as u32,
                    self.layer,
                    self.version,
                ));
            }
        }
        tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(lat: f64, lon: f64, zoom: f64) -> CameraData {
        CameraData {
            center_lat: lat,
            center_lon: lon,
            zoom_level: zoom,
            ..CameraData::default()
        }
    }

    fn calc() -> VisibleTileCalculator {
        VisibleTileCalculator::new(256, 0, 0, 19)
    }

    #[test]
    fn test_deterministic() {
        let cam = camera(37.5, -122.3, 11.4);
        let viewport = Viewport::new(1280, 800);
        let a = calc().visible_tiles(&cam, viewport);
        let b = calc().visible_tiles(&cam, viewport);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_empty_viewport_yields_empty_set() {
        let cam = camera(0.0, 0.0, 3.0);
        assert!(calc().visible_tiles(&cam, Viewport::new(0, 600)).is_empty());
        assert!(calc().visible_tiles(&cam, Viewport::new(800, 0)).is_empty());
    }

    #[test]
    fn test_center_of_world_scenario() {
        // 800x600 @ zoom 3 centered on (0,0): the camera sits on the corner
        // between tiles 3 and 4 on both axes, so the central 2x2 block must
        // be covered along with its margin ring.
        let cam = camera(0.0, 0.0, 3.0);
        let tiles = calc().visible_tiles(&cam, Viewport::new(800, 600));

        for x in 3..=4 {
            for y in 3..=4 {
                assert!(
                    tiles.contains(&TileSpec::new(3, x, y, 0, 0)),
                    "central tile ({x},{y}) missing"
                );
            }
        }
        assert!(tiles.iter().all(|t| t.zoom == 3));

        // Shrinking the viewport shrinks the set without any camera change
        let smaller = calc().visible_tiles(&cam, Viewport::new(400, 300));
        assert!(smaller.len() < tiles.len());
        assert!(smaller.is_subset(&tiles));
        for x in 3..=4 {
            for y in 3..=4 {
                assert!(smaller.contains(&TileSpec::new(3, x, y, 0, 0)));
            }
        }
    }

    #[test]
    fn test_antimeridian_wrap_emits_both_edges() {
        // Wide viewport centered just west of the dateline: columns from
        // both edges of the grid appear, with the seam columns absent.
        let cam = camera(0.0, 179.9, 3.0);
        let tiles = calc().visible_tiles(&cam, Viewport::new(800, 600));

        let columns: std::collections::HashSet<u32> = tiles.iter().map(|t| t.x).collect();
        assert!(columns.contains(&0), "missing far-left column: {columns:?}");
        assert!(columns.contains(&7), "missing far-right column: {columns:?}");
        assert!(!columns.contains(&3) || !columns.contains(&4));

        // All emitted columns are within the grid
        assert!(tiles.iter().all(|t| t.x < 8 && t.y < 8));
    }

    #[test]
    fn test_zoomed_out_covers_world_once() {
        let cam = camera(0.0, 0.0, 0.0);
        let tiles = calc().visible_tiles(&cam, Viewport::new(1920, 1080));
        assert_eq!(tiles.len(), 1);
        assert!(tiles.contains(&TileSpec::new(0, 0, 0, 0, 0)));
    }

    #[test]
    fn test_rows_clamped_at_poles() {
        let cam = camera(84.5, 0.0, 3.0);
        let tiles = calc().visible_tiles(&cam, Viewport::new(800, 600));
        assert!(!tiles.is_empty());
        assert!(tiles.iter().all(|t| t.y < 8));
    }

    #[test]
    fn test_fractional_zoom_uses_floored_grid() {
        let cam = camera(0.0, 0.0, 3.7);
        let tiles = calc().visible_tiles(&cam, Viewport::new(800, 600));
        assert!(tiles.iter().all(|t| t.zoom == 3));

        // At 3.7 each grid tile is drawn larger on screen, so fewer columns
        // are needed than at exactly 3.0.
        let at_three = calc().visible_tiles(&camera(0.0, 0.0, 3.0), Viewport::new(800, 600));
        assert!(tiles.len() <= at_three.len());
    }

    #[test]
    fn test_prefetch_extent_is_superset_of_visible() {
        let cam = camera(45.0, 9.0, 8.0);
        let viewport = Viewport::new(1024, 768);
        let visible = calc().visible_tiles(&cam, viewport);
        let prefetch = calc().prefetch_tiles(&cam, viewport, PrefetchStyle::Extent);
        assert!(visible.is_subset(&prefetch));
        assert!(prefetch.len() > visible.len());
        assert!(prefetch.iter().all(|t| t.zoom == 8));
    }

    #[test]
    fn test_prefetch_neighbour_layers() {
        let cam = camera(45.0, 9.0, 8.0);
        let viewport = Viewport::new(1024, 768);

        let one = calc().prefetch_tiles(&cam, viewport, PrefetchStyle::OneNeighbourLayer);
        let zooms: std::collections::HashSet<u32> = one.iter().map(|t| t.zoom).collect();
        assert!(zooms.contains(&8) && zooms.contains(&7), "zooms: {zooms:?}");

        let two = calc().prefetch_tiles(&cam, viewport, PrefetchStyle::TwoNeighbourLayers);
        let zooms: std::collections::HashSet<u32> = two.iter().map(|t| t.zoom).collect();
        assert!(
            zooms.contains(&7) && zooms.contains(&8) && zooms.contains(&9),
            "zooms: {zooms:?}"
        );
    }

    #[test]
    fn test_prefetch_clamps_at_zoom_limits() {
        let cam = camera(0.0, 0.0, 0.0);
        let viewport = Viewport::new(800, 600);
        let tiles = calc().prefetch_tiles(&cam, viewport, PrefetchStyle::TwoNeighbourLayers);
        // No coarser layer exists below zoom 0; the finer one is included
        let zooms: std::collections::HashSet<u32> = tiles.iter().map(|t| t.zoom).collect();
        assert_eq!(zooms, [0u32, 1u32].into_iter().collect());
    }

    #[test]
    fn test_layer_and_version_stamped_on_specs() {
        let mut c = VisibleTileCalculator::new(256, 2, 0, 19);
        c.set_version(5);
        let tiles = c.visible_tiles(&camera(0.0, 0.0, 2.0), Viewport::new(512, 512));
        assert!(tiles.iter().all(|t| t.layer == 2 && t.version == 5));
    }
}
