//! Camera state and the model that keeps it within provider capabilities

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Distance from an integer zoom level below which tile textures can be
/// sampled with nearest filtering (the render is pixel-exact there).
const ZOOM_SNAP_THRESHOLD: f64 = 0.05;

/// Logical camera state, mutated only through [`CameraModel::set_camera_data`]
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraData {
    pub center_lat: f64,
    pub center_lon: f64,
    /// Fractional zoom; the tile grid uses `floor(zoom_level)`
    pub zoom_level: f64,
    pub bearing: f64,
    pub tilt: f64,
    pub roll: f64,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            center_lat: 0.0,
            center_lon: 0.0,
            zoom_level: 0.0,
            bearing: 0.0,
            tilt: 0.0,
            roll: 0.0,
        }
    }
}

/// Screen size in pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Bounds supplied by the provider/plugin configuration layer
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraCapabilities {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub supports_bearing: bool,
    pub supports_tilting: bool,
    pub supports_rolling: bool,
}

impl Default for CameraCapabilities {
    fn default() -> Self {
        Self {
            min_zoom: 0.0,
            max_zoom: 19.0,
            supports_bearing: false,
            supports_tilting: false,
            supports_rolling: false,
        }
    }
}

/// Holds the camera and viewport and derives the integer-zoom quantities the
/// rest of the pipeline works with.
///
/// Every mutation goes through [`set_camera_data`](Self::set_camera_data),
/// which corrects the requested state instead of rejecting it: zoom is
/// clamped into the capability range and unsupported axes are forced to zero.
#[derive(Clone, Debug)]
pub struct CameraModel {
    capabilities: CameraCapabilities,
    camera: CameraData,
    viewport: Viewport,
    int_zoom: u32,
    side_length: u32,
    linear_filtering: bool,
}

impl CameraModel {
    pub fn new(capabilities: CameraCapabilities) -> Self {
        let mut model = Self {
            capabilities,
            camera: CameraData::default(),
            viewport: Viewport::default(),
            int_zoom: 0,
            side_length: 1,
            linear_filtering: false,
        };
        // Initial state still goes through the correction path
        let corrected = model.correct(CameraData::default());
        model.camera = corrected;
        model.recompute_derived();
        model
    }

    /// Apply capability clamping to a requested camera state
    fn correct(&self, mut data: CameraData) -> CameraData {
        data.zoom_level = data
            .zoom_level
            .clamp(self.capabilities.min_zoom, self.capabilities.max_zoom);

        // Snap to a whole zoom level when close enough that nearest
        // filtering is pixel-exact; keeps the common resting state crisp.
        let mut izl = data.zoom_level.floor();
        let mut delta = data.zoom_level - izl;
        if delta > 0.5 {
            izl += 1.0;
            delta -= 1.0;
        }
        if delta.abs() < ZOOM_SNAP_THRESHOLD {
            data.zoom_level = izl;
        }

        if !self.capabilities.supports_bearing {
            data.bearing = 0.0;
        }
        if !self.capabilities.supports_tilting {
            data.tilt = 0.0;
        }
        if !self.capabilities.supports_rolling {
            data.roll = 0.0;
        }
        data
    }

    fn recompute_derived(&mut self) {
        self.int_zoom = self.camera.zoom_level.floor() as u32;
        self.side_length = 1u32 << self.int_zoom.min(31);
        self.linear_filtering =
            (self.camera.zoom_level - self.camera.zoom_level.floor()).abs() > ZOOM_SNAP_THRESHOLD;
    }

    /// Set the camera, correcting it against capabilities first.
    ///
    /// Returns `false` (and leaves all derived state untouched) when the
    /// corrected value equals the current one, so callers can skip
    /// downstream recomputation and notification.
    pub fn set_camera_data(&mut self, data: CameraData) -> bool {
        let corrected = self.correct(data);
        if corrected == self.camera {
            return false;
        }
        self.camera = corrected;
        self.recompute_derived();
        true
    }

    /// Update the viewport.
    ///
    /// The logical camera value is unaffected, but the screen-space
    /// transform depends on the viewport, so callers must force a camera
    /// re-evaluation afterwards even when `set_camera_data` would report no
    /// change.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = Viewport::new(width, height);
        self.recompute_derived();
    }

    #[inline]
    pub fn camera_data(&self) -> CameraData {
        self.camera
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[inline]
    pub fn capabilities(&self) -> CameraCapabilities {
        self.capabilities
    }

    /// `floor(zoom_level)`, the level the tile grid is built at
    #[inline]
    pub fn int_zoom(&self) -> u32 {
        self.int_zoom
    }

    /// Tiles per edge of the world at the current integer zoom, `2^int_zoom`
    #[inline]
    pub fn side_length(&self) -> u32 {
        self.side_length
    }

    /// Whether tile textures need linear filtering (fractional zoom) rather
    /// than nearest (pixel-exact integer zoom)
    #[inline]
    pub fn linear_filtering(&self) -> bool {
        self.linear_filtering
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CameraModel {
        CameraModel::new(CameraCapabilities::default())
    }

    #[test]
    fn test_zoom_clamped_to_capabilities() {
        let mut m = CameraModel::new(CameraCapabilities {
            min_zoom: 2.0,
            max_zoom: 10.0,
            ..CameraCapabilities::default()
        });

        m.set_camera_data(CameraData {
            zoom_level: 15.0,
            ..CameraData::default()
        });
        assert_eq!(m.camera_data().zoom_level, 10.0);

        m.set_camera_data(CameraData {
            zoom_level: -3.0,
            ..CameraData::default()
        });
        assert_eq!(m.camera_data().zoom_level, 2.0);
    }

    #[test]
    fn test_unsupported_axes_forced_to_zero() {
        let mut m = model();
        m.set_camera_data(CameraData {
            zoom_level: 5.0,
            bearing: 45.0,
            tilt: 30.0,
            roll: 10.0,
            ..CameraData::default()
        });

        let cam = m.camera_data();
        assert_eq!(cam.bearing, 0.0);
        assert_eq!(cam.tilt, 0.0);
        assert_eq!(cam.roll, 0.0);
    }

    #[test]
    fn test_supported_axes_preserved() {
        let mut m = CameraModel::new(CameraCapabilities {
            supports_bearing: true,
            ..CameraCapabilities::default()
        });
        m.set_camera_data(CameraData {
            zoom_level: 5.0,
            bearing: 45.0,
            ..CameraData::default()
        });
        assert_eq!(m.camera_data().bearing, 45.0);
    }

    #[test]
    fn test_no_change_is_a_noop() {
        let mut m = model();
        let data = CameraData {
            zoom_level: 4.0,
            center_lat: 10.0,
            ..CameraData::default()
        };
        assert!(m.set_camera_data(data));
        assert!(!m.set_camera_data(data));

        // A request that only differs in an unsupported axis corrects to the
        // same state and must also be a no-op.
        assert!(!m.set_camera_data(CameraData {
            bearing: 90.0,
            ..data
        }));
    }

    #[test]
    fn test_zoom_snaps_near_integer() {
        let mut m = model();
        m.set_camera_data(CameraData {
            zoom_level: 3.97,
            ..CameraData::default()
        });
        assert_eq!(m.camera_data().zoom_level, 4.0);
        assert_eq!(m.int_zoom(), 4);
        assert!(!m.linear_filtering());

        m.set_camera_data(CameraData {
            zoom_level: 5.03,
            ..CameraData::default()
        });
        assert_eq!(m.camera_data().zoom_level, 5.0);
    }

    #[test]
    fn test_linear_filtering_flag() {
        let mut m = model();
        m.set_camera_data(CameraData {
            zoom_level: 3.0,
            ..CameraData::default()
        });
        assert!(!m.linear_filtering());

        m.set_camera_data(CameraData {
            zoom_level: 3.4,
            ..CameraData::default()
        });
        assert!(m.linear_filtering());
    }

    #[test]
    fn test_derived_zoom_quantities() {
        let mut m = model();
        m.set_camera_data(CameraData {
            zoom_level: 3.4,
            ..CameraData::default()
        });
        assert_eq!(m.int_zoom(), 3);
        assert_eq!(m.side_length(), 8);
    }

    #[test]
    fn test_resize_updates_viewport() {
        let mut m = model();
        m.resize(800, 600);
        assert_eq!(m.viewport(), Viewport::new(800, 600));
        assert!(!m.viewport().is_empty());
        m.resize(0, 600);
        assert!(m.viewport().is_empty());
    }
}
