//! Tile identity and texture types

use crate::Result;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity of one tile of the power-of-two Mercator grid
///
/// Two specs name the same tile iff all fields match. The derived `Ord`
/// makes specs usable in ordered containers and gives tests deterministic
/// iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileSpec {
    /// Integer zoom level; the grid is `2^zoom` tiles per edge
    pub zoom: u32,
    /// Column index, `0 ..= 2^zoom - 1`, wrapping at the antimeridian
    pub x: u32,
    /// Row index, `0 ..= 2^zoom - 1`
    pub y: u32,
    /// Map layer the tile belongs to (street / satellite / ...)
    pub layer: u32,
    /// Provider data version
    pub version: u32,
}

impl TileSpec {
    pub fn new(zoom: u32, x: u32, y: u32, layer: u32, version: u32) -> Self {
        Self {
            zoom,
            x,
            y,
            layer,
            version,
        }
    }
}

/// A decoded tile raster, always RGBA8
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA pixel data, `width * height * 4` bytes
    pub pixels: Vec<u8>,
}

impl TileImage {
    /// Decode an opaque fetched payload (PNG/JPEG) into RGBA pixels
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self {
            width,
            height,
            pixels: decoded.into_raw(),
        })
    }

    /// A uniformly-filled image, mainly useful in tests and placeholders
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decoded size in bytes, the unit of the cache budget
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// A decoded tile image bound to the spec it represents
///
/// Shared as `Arc<TileTexture>` between the cache and any render node
/// currently displaying it; the strong count is what keeps eviction from
/// freeing a texture that still backs a node.
#[derive(Clone, Debug)]
pub struct TileTexture {
    pub spec: TileSpec,
    pub image: TileImage,
}

impl TileTexture {
    pub fn new(spec: TileSpec, image: TileImage) -> Self {
        Self { spec, image }
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.image.byte_size()
    }
}
