//! The authoritative block grid for one world.
//!
//! A [`BlockStore`] is a flat byte grid plus index math. It has no internal
//! synchronization: mutation goes through `&mut self`, and the owning world
//! serializes access (the tick drain is the single writer). Exactly one live
//! world owns a store at a time; its lifetime runs from world-load to
//! world-unload or replacement.

use std::io::{self, Write};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use thiserror::Error;

use crate::block::{self, BlockId, BlockRegistry};

/// Smallest allowed grid dimension.
pub const MIN_DIMENSION: i32 = 16;
/// Largest allowed grid dimension.
pub const MAX_DIMENSION: i32 = 2048;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid map dimension {0} (must be within {MIN_DIMENSION}..={MAX_DIMENSION})")]
    InvalidDimension(i32),
    #[error("block buffer holds {actual} bytes but the grid volume is {expected}")]
    GridSizeMismatch { expected: usize, actual: usize },
}

/// Grid dimensions: width along x, length along y, height along z.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: i32,
    pub length: i32,
    pub height: i32,
}

impl Dimensions {
    pub const fn new(width: i32, length: i32, height: i32) -> Self {
        Self { width, length, height }
    }

    pub const fn volume(&self) -> usize {
        (self.width as usize) * (self.length as usize) * (self.height as usize)
    }

    fn validate(&self) -> Result<(), StoreError> {
        for dim in [self.width, self.length, self.height] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&dim) {
                return Err(StoreError::InvalidDimension(dim));
            }
        }
        Ok(())
    }
}

/// A point in grid space (also used for the spawn position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridPoint {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPoint {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Dirty-state flags with explicit transitions. Any mutation marks both;
/// save and backup each clear their own flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFlags {
    dirty_since_save: bool,
    dirty_since_backup: bool,
}

impl StoreFlags {
    pub fn mark_changed(&mut self) {
        self.dirty_since_save = true;
        self.dirty_since_backup = true;
    }

    pub fn mark_saved(&mut self) {
        self.dirty_since_save = false;
    }

    pub fn mark_backed_up(&mut self) {
        self.dirty_since_backup = false;
    }

    pub fn dirty_since_save(&self) -> bool {
        self.dirty_since_save
    }

    pub fn dirty_since_backup(&self) -> bool {
        self.dirty_since_backup
    }
}

/// The block grid. Cell (x, y, z) lives at index `(z * length + y) * width + x`,
/// so whole horizontal slices are contiguous.
pub struct BlockStore {
    registry: Arc<BlockRegistry>,
    dims: Dimensions,
    blocks: Vec<u8>,
    spawn: GridPoint,
    flags: StoreFlags,
    /// Per-(x, y) height of the topmost non-transparent block, 0 if the
    /// column is all see-through. Computed lazily, reset explicitly.
    shadows: Option<Vec<i32>>,
}

impl BlockStore {
    /// Create a zero-filled (all air) store.
    pub fn new(registry: Arc<BlockRegistry>, dims: Dimensions) -> Result<Self, StoreError> {
        dims.validate()?;
        let blocks = vec![0u8; dims.volume()];
        Ok(Self::assemble(registry, dims, blocks))
    }

    /// Create a store around an existing grid (loading path). The buffer
    /// length must match the volume exactly.
    pub fn with_blocks(
        registry: Arc<BlockRegistry>,
        dims: Dimensions,
        blocks: Vec<u8>,
    ) -> Result<Self, StoreError> {
        dims.validate()?;
        if blocks.len() != dims.volume() {
            return Err(StoreError::GridSizeMismatch {
                expected: dims.volume(),
                actual: blocks.len(),
            });
        }
        Ok(Self::assemble(registry, dims, blocks))
    }

    fn assemble(registry: Arc<BlockRegistry>, dims: Dimensions, blocks: Vec<u8>) -> Self {
        let spawn = GridPoint::new(dims.width / 2, dims.length / 2, dims.height - 1);
        Self {
            registry,
            dims,
            blocks,
            spawn,
            flags: StoreFlags::default(),
            shadows: None,
        }
    }

    #[inline]
    fn index(&self, x: i32, y: i32, z: i32) -> usize {
        ((z as usize * self.dims.length as usize + y as usize) * self.dims.width as usize)
            + x as usize
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32, z: i32) -> bool {
        x >= 0 && x < self.dims.width && y >= 0 && y < self.dims.length && z >= 0 && z < self.dims.height
    }

    /// Read a block. Out-of-range coordinates return
    /// [`BlockId::UNDEFINED`]; this never panics.
    #[inline]
    pub fn get(&self, x: i32, y: i32, z: i32) -> BlockId {
        if self.in_bounds(x, y, z) {
            BlockId(self.blocks[self.index(x, y, z)])
        } else {
            BlockId::UNDEFINED
        }
    }

    /// Write a block. Out-of-range coordinates (and the UNDEFINED sentinel)
    /// are a silent no-op; a successful write marks the store dirty.
    #[inline]
    pub fn set(&mut self, x: i32, y: i32, z: i32, block: BlockId) {
        if block.is_undefined() || !self.in_bounds(x, y, z) {
            return;
        }
        let idx = self.index(x, y, z);
        self.blocks[idx] = block.0;
        self.flags.mark_changed();
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn volume(&self) -> usize {
        self.dims.volume()
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn raw_blocks(&self) -> &[u8] {
        &self.blocks
    }

    pub fn spawn(&self) -> GridPoint {
        self.spawn
    }

    pub fn set_spawn(&mut self, spawn: GridPoint) {
        self.spawn = spawn;
        self.flags.mark_changed();
    }

    /// Clamp the spawn into bounds. Returns true if it had to move.
    pub fn validate_spawn(&mut self) -> bool {
        let old = self.spawn;
        self.spawn.x = self.spawn.x.clamp(0, self.dims.width - 1);
        self.spawn.y = self.spawn.y.clamp(0, self.dims.length - 1);
        self.spawn.z = self.spawn.z.clamp(0, self.dims.height - 1);
        self.spawn != old
    }

    pub fn flags(&self) -> StoreFlags {
        self.flags
    }

    pub fn mark_changed(&mut self) {
        self.flags.mark_changed();
    }

    pub fn mark_saved(&mut self) {
        self.flags.mark_saved();
    }

    pub fn mark_backed_up(&mut self) {
        self.flags.mark_backed_up();
    }

    // -- Shadow columns --------------------------------------------------

    /// Compute the per-column shadow heights. Idempotent: a no-op if already
    /// computed. Call [`reset_shadows`](Self::reset_shadows) to force a
    /// recompute after bulk edits.
    pub fn compute_shadows(&mut self) {
        if self.shadows.is_some() {
            return;
        }
        let width = self.dims.width as usize;
        let length = self.dims.length as usize;
        let height = self.dims.height;
        let blocks = &self.blocks;
        let registry = &self.registry;

        let heights: Vec<i32> = (0..width * length)
            .into_par_iter()
            .map(|column| {
                let x = column % width;
                let y = column / width;
                for z in (0..height).rev() {
                    let idx = (z as usize * length + y) * width + x;
                    if !registry.is_transparent(BlockId(blocks[idx])) {
                        return z;
                    }
                }
                0
            })
            .collect();

        self.shadows = Some(heights);
    }

    pub fn reset_shadows(&mut self) {
        self.shadows = None;
    }

    /// Height of the topmost non-transparent block in column (x, y).
    /// `None` until [`compute_shadows`](Self::compute_shadows) has run, or
    /// for out-of-range columns.
    pub fn shadow_height(&self, x: i32, y: i32) -> Option<i32> {
        if x < 0 || x >= self.dims.width || y < 0 || y >= self.dims.length {
            return None;
        }
        self.shadows
            .as_ref()
            .map(|heights| heights[y as usize * self.dims.width as usize + x as usize])
    }

    /// Whether direct sunlight reaches (x, y, z). Requires computed shadows;
    /// without them everything counts as lit.
    pub fn is_sunlit(&self, x: i32, y: i32, z: i32) -> bool {
        match self.shadow_height(x, y) {
            Some(top) => z >= top,
            None => true,
        }
    }

    // -- Bulk passes -------------------------------------------------------

    /// Rewrite every cell through a 256-entry lookup table. Used for
    /// legacy/custom-id migration. `&mut self` makes the required
    /// exclusivity explicit: no reader can observe a partially remapped
    /// grid. Returns true if any cell changed.
    pub fn remap_blocks(&mut self, table: &[u8; 256]) -> bool {
        let mut changed = false;
        for cell in &mut self.blocks {
            let mapped = table[*cell as usize];
            if mapped != *cell {
                *cell = mapped;
                changed = true;
            }
        }
        if changed {
            self.flags.mark_changed();
            self.shadows = None;
        }
        changed
    }

    /// Synthesize the default flat world: dirt up to just below the
    /// half-height line, grass on top, air above. Used when a world has no
    /// saved map.
    pub fn fill_default_flat(&mut self) {
        let surface = self.dims.height / 2 - 1;
        for z in 0..self.dims.height {
            let block = if z < surface {
                block::DIRT
            } else if z == surface {
                block::GRASS
            } else {
                block::AIR
            };
            let slice_start = self.index(0, 0, z);
            let slice_end = slice_start + (self.dims.width * self.dims.length) as usize;
            self.blocks[slice_start..slice_end].fill(block.0);
        }
        self.spawn = GridPoint::new(self.dims.width / 2, self.dims.length / 2, surface + 2);
        self.flags.mark_changed();
        self.shadows = None;
    }

    // -- Compressed serialization -------------------------------------------

    /// Write a gzip-compressed copy of the grid, optionally prefixed with the
    /// block count as a signed 32-bit big-endian integer (the classic
    /// level-transfer framing).
    pub fn write_compressed<W: Write>(&self, target: W, with_length_prefix: bool) -> io::Result<()> {
        let mut gz = GzEncoder::new(target, Compression::default());
        if with_length_prefix {
            gz.write_all(&(self.volume() as i32).to_be_bytes())?;
        }
        gz.write_all(&self.blocks)?;
        gz.finish()?;
        Ok(())
    }

    /// Like [`write_compressed`](Self::write_compressed), but every byte is
    /// substituted through `table` first. Used to send a down-mapped grid to
    /// recipients lacking extended-block support.
    pub fn write_compressed_mapped<W: Write>(
        &self,
        target: W,
        with_length_prefix: bool,
        table: &[u8; 256],
    ) -> io::Result<()> {
        let mut gz = GzEncoder::new(target, Compression::default());
        if with_length_prefix {
            gz.write_all(&(self.volume() as i32).to_be_bytes())?;
        }
        // Substitute in slices so the encoder sees large writes.
        let mut buf = [0u8; 4096];
        for chunk in self.blocks.chunks(buf.len()) {
            for (out, &cell) in buf.iter_mut().zip(chunk) {
                *out = table[cell as usize];
            }
            gz.write_all(&buf[..chunk.len()])?;
        }
        gz.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;
    use std::io::Read;

    fn store(dims: Dimensions) -> BlockStore {
        BlockStore::new(Arc::new(BlockRegistry::standard()), dims).unwrap()
    }

    #[test]
    fn dimension_validation() {
        let reg = Arc::new(BlockRegistry::standard());
        assert!(BlockStore::new(Arc::clone(&reg), Dimensions::new(16, 16, 16)).is_ok());
        assert!(matches!(
            BlockStore::new(Arc::clone(&reg), Dimensions::new(15, 16, 16)),
            Err(StoreError::InvalidDimension(15)),
        ));
        assert!(matches!(
            BlockStore::new(Arc::clone(&reg), Dimensions::new(16, 4096, 16)),
            Err(StoreError::InvalidDimension(4096)),
        ));
    }

    #[test]
    fn with_blocks_checks_volume() {
        let reg = Arc::new(BlockRegistry::standard());
        let dims = Dimensions::new(16, 16, 16);
        assert!(BlockStore::with_blocks(Arc::clone(&reg), dims, vec![0; 4096]).is_ok());
        assert!(matches!(
            BlockStore::with_blocks(reg, dims, vec![0; 100]),
            Err(StoreError::GridSizeMismatch { expected: 4096, actual: 100 }),
        ));
    }

    #[test]
    fn set_get_in_bounds_round_trips() {
        let mut s = store(Dimensions::new(16, 32, 64));
        for (x, y, z) in [(0, 0, 0), (15, 31, 63), (7, 19, 40)] {
            s.set(x, y, z, block::OBSIDIAN);
            assert_eq!(s.get(x, y, z), block::OBSIDIAN);
        }
        assert!(s.flags().dirty_since_save());
        assert!(s.flags().dirty_since_backup());
    }

    #[test]
    fn out_of_bounds_get_is_undefined_and_set_is_noop() {
        let mut s = store(Dimensions::new(16, 16, 16));
        for (x, y, z) in [(-1, 0, 0), (16, 0, 0), (0, -1, 0), (0, 16, 0), (0, 0, -1), (0, 0, 16)] {
            assert_eq!(s.get(x, y, z), BlockId::UNDEFINED);
            s.set(x, y, z, block::STONE);
        }
        assert!(!s.flags().dirty_since_save());
        assert!(s.raw_blocks().iter().all(|&b| b == 0));
    }

    #[test]
    fn undefined_write_is_noop() {
        let mut s = store(Dimensions::new(16, 16, 16));
        s.set(1, 1, 1, BlockId::UNDEFINED);
        assert_eq!(s.get(1, 1, 1), block::AIR);
    }

    #[test]
    fn spawn_defaults_to_top_center_and_clamps() {
        let mut s = store(Dimensions::new(64, 32, 16));
        assert_eq!(s.spawn(), GridPoint::new(32, 16, 15));
        s.set_spawn(GridPoint::new(-5, 100, 99));
        assert!(s.validate_spawn());
        assert_eq!(s.spawn(), GridPoint::new(0, 31, 15));
        assert!(!s.validate_spawn());
    }

    #[test]
    fn shadows_skip_transparent_blocks_and_are_idempotent() {
        let mut s = store(Dimensions::new(16, 16, 32));
        s.set(3, 4, 10, block::STONE);
        s.set(3, 4, 20, block::GLASS);
        s.set(3, 4, 25, block::LEAVES);
        s.compute_shadows();
        assert_eq!(s.shadow_height(3, 4), Some(10));
        assert_eq!(s.shadow_height(0, 0), Some(0));
        assert_eq!(s.shadow_height(-1, 0), None);
        assert!(s.is_sunlit(3, 4, 10));
        assert!(!s.is_sunlit(3, 4, 9));

        // Already computed: new opaque block is not observed until reset.
        s.set(3, 4, 15, block::STONE);
        s.compute_shadows();
        assert_eq!(s.shadow_height(3, 4), Some(10));
        s.reset_shadows();
        s.compute_shadows();
        assert_eq!(s.shadow_height(3, 4), Some(15));
    }

    #[test]
    fn remap_rewrites_cells_and_reports_changes() {
        let mut s = store(Dimensions::new(16, 16, 16));
        s.set(1, 2, 3, block::SANDSTONE);
        s.mark_saved();
        s.mark_backed_up();

        let mut table = [0u8; 256];
        for (i, cell) in table.iter_mut().enumerate() {
            *cell = i as u8;
        }
        assert!(!s.remap_blocks(&table)); // identity

        table[block::SANDSTONE.0 as usize] = block::SAND.0;
        assert!(s.remap_blocks(&table));
        assert_eq!(s.get(1, 2, 3), block::SAND);
        assert!(s.flags().dirty_since_save());
    }

    #[test]
    fn remap_through_registry_table_clears_unknown_ids() {
        let reg = Arc::new(BlockRegistry::standard());
        let mut blocks = vec![0u8; Dimensions::new(16, 16, 16).volume()];
        blocks[0] = 200; // not a registered id
        blocks[1] = block::STONE.0;
        let mut s = BlockStore::with_blocks(Arc::clone(&reg), Dimensions::new(16, 16, 16), blocks).unwrap();
        assert!(s.remap_blocks(&reg.known_or_air_table()));
        assert_eq!(s.get(0, 0, 0), block::AIR);
        assert_eq!(s.get(1, 0, 0), block::STONE);
    }

    fn gunzip(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn compressed_serialization_with_prefix() {
        let mut s = store(Dimensions::new(16, 16, 16));
        s.set(5, 5, 5, block::BRICK);

        let mut buf = Vec::new();
        s.write_compressed(&mut buf, true).unwrap();
        let raw = gunzip(&buf);
        assert_eq!(&raw[..4], &(4096i32).to_be_bytes());
        assert_eq!(&raw[4..], s.raw_blocks());

        let mut buf = Vec::new();
        s.write_compressed(&mut buf, false).unwrap();
        assert_eq!(gunzip(&buf), s.raw_blocks());
    }

    #[test]
    fn mapped_serialization_applies_fallbacks() {
        let reg = Arc::new(BlockRegistry::standard());
        let mut s = BlockStore::new(Arc::clone(&reg), Dimensions::new(16, 16, 16)).unwrap();
        s.set(0, 0, 0, block::SNOW);
        s.set(1, 0, 0, block::SANDSTONE);
        s.set(2, 0, 0, block::STONE);

        let mut buf = Vec::new();
        s.write_compressed_mapped(&mut buf, false, &reg.fallback_table()).unwrap();
        let raw = gunzip(&buf);
        assert_eq!(raw[0], block::AIR.0);
        assert_eq!(raw[1], block::SAND.0);
        assert_eq!(raw[2], block::STONE.0);
    }

    #[test]
    fn default_flat_world_has_grass_surface() {
        let mut s = store(Dimensions::new(16, 16, 32));
        s.fill_default_flat();
        assert_eq!(s.get(8, 8, 0), block::DIRT);
        assert_eq!(s.get(8, 8, 15), block::GRASS);
        assert_eq!(s.get(8, 8, 16), block::AIR);
        assert_eq!(s.spawn().z, 17);
    }
}
