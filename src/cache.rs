//! Byte-budgeted store of decoded tile textures
//!
//! The budget is soft in two directions: inserts never fail, and a texture
//! still referenced outside the cache (i.e. one backing a live render node)
//! is never freed, so the cache can run temporarily over budget under
//! pressure. Within a session the budget never shrinks.

use crate::tiles::{TileSpec, TileTexture};
use lru::LruCache;
use std::sync::Arc;

pub struct TileCache {
    entries: LruCache<TileSpec, Arc<TileTexture>>,
    total_bytes: usize,
    /// Soft byte budget; 0 until the owning map sizes it from the viewport
    min_texture_usage: usize,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCache {
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            min_texture_usage: 0,
        }
    }

    /// Raise the byte budget. The budget is monotonic within a session: a
    /// request below the current value is ignored, so shrinking the window
    /// never throws away a working set that still fits in memory.
    pub fn set_min_texture_usage(&mut self, bytes: usize) {
        self.min_texture_usage = self.min_texture_usage.max(bytes);
        self.evict_over_budget();
    }

    #[inline]
    pub fn min_texture_usage(&self) -> usize {
        self.min_texture_usage
    }

    /// Decoded bytes currently held
    #[inline]
    pub fn texture_usage(&self) -> usize {
        self.total_bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, spec: &TileSpec) -> bool {
        self.entries.contains(spec)
    }

    /// Look up a texture and mark it recently used
    pub fn get(&mut self, spec: &TileSpec) -> Option<Arc<TileTexture>> {
        self.entries.get(spec).cloned()
    }

    /// Insert (or replace) a texture. Never fails; evicts least-recently-used
    /// unreferenced textures beyond the budget afterwards.
    pub fn insert(&mut self, texture: Arc<TileTexture>) {
        let bytes = texture.byte_size();
        if let Some(old) = self.entries.put(texture.spec, texture) {
            self.total_bytes -= old.byte_size();
        }
        self.total_bytes += bytes;
        self.evict_over_budget();
    }

    fn evict_over_budget(&mut self) {
        // A budget of zero means the owning map has not sized the cache yet
        if self.min_texture_usage == 0 || self.total_bytes <= self.min_texture_usage {
            return;
        }

        let mut reclaim = self.total_bytes - self.min_texture_usage;
        let mut victims = Vec::new();
        // Least-recently-used first; skip anything another owner still holds
        for (spec, texture) in self.entries.iter().rev() {
            if Arc::strong_count(texture) > 1 {
                continue;
            }
            victims.push(*spec);
            let bytes = texture.byte_size();
            if bytes >= reclaim {
                break;
            }
            reclaim -= bytes;
        }

        for spec in victims {
            if let Some(texture) = self.entries.pop(&spec) {
                self.total_bytes -= texture.byte_size();
            }
        }
    }
}
