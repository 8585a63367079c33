//! Map persistence: a fixed binary header followed by the gzip-compressed
//! block grid.
//!
//! Header layout (big-endian):
//! `magic "OCW1" (4) | format version u16 | world uuid (16) |
//!  width u16 | length u16 | height u16 | spawn x/y/z i16 each |
//!  created i64 | modified i64` -- 50 bytes, then the gzip body.
//!
//! Failure semantics: a missing file is `Ok(None)`; anything unreadable or
//! inconsistent is an error ("corrupt"). Saves go through a temp file plus
//! rename so a crash never truncates the live map.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use uuid::Uuid;

use opencube_engine::block::BlockRegistry;
use opencube_engine::store::{BlockStore, Dimensions, GridPoint};

const MAGIC: [u8; 4] = *b"OCW1";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 50;

/// Identity and timestamps persisted alongside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapMeta {
    pub id: Uuid,
    pub created: i64,
    pub modified: i64,
}

impl MapMeta {
    pub fn new() -> Self {
        let now = unix_now();
        Self { id: Uuid::new_v4(), created: now, modified: now }
    }
}

impl Default for MapMeta {
    fn default() -> Self {
        Self::new()
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn encode_header(store: &BlockStore, meta: &MapMeta) -> [u8; HEADER_LEN] {
    let dims = store.dimensions();
    let spawn = store.spawn();
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
    header[6..22].copy_from_slice(meta.id.as_bytes());
    header[22..24].copy_from_slice(&(dims.width as u16).to_be_bytes());
    header[24..26].copy_from_slice(&(dims.length as u16).to_be_bytes());
    header[26..28].copy_from_slice(&(dims.height as u16).to_be_bytes());
    header[28..30].copy_from_slice(&(spawn.x as i16).to_be_bytes());
    header[30..32].copy_from_slice(&(spawn.y as i16).to_be_bytes());
    header[32..34].copy_from_slice(&(spawn.z as i16).to_be_bytes());
    header[34..42].copy_from_slice(&meta.created.to_be_bytes());
    header[42..50].copy_from_slice(&meta.modified.to_be_bytes());
    header
}

/// Save a grid. The caller keeps `modified` current and marks the store
/// saved on success.
pub fn save_grid(store: &BlockStore, meta: &MapMeta, path: &Path) -> Result<()> {
    let start = Instant::now();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating map directory {}", parent.display()))?;
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file =
            File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(&encode_header(store, meta))
            .context("writing map header")?;
        let mut gz = GzEncoder::new(file, Compression::default());
        gz.write_all(store.raw_blocks()).context("writing block grid")?;
        gz.finish().context("finishing gzip stream")?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("moving {} into place", tmp.display()))?;

    tracing::info!(
        "Map saved: {} ({} blocks, {:.2?})",
        path.display(),
        store.volume(),
        start.elapsed(),
    );
    Ok(())
}

/// Load a grid. `Ok(None)` when no file exists; `Err` when the file exists
/// but cannot be understood (bad magic, version, or grid size).
pub fn load_grid(
    registry: Arc<BlockRegistry>,
    path: &Path,
) -> Result<Option<(BlockStore, MapMeta)>> {
    if !path.exists() {
        return Ok(None);
    }
    let start = Instant::now();
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .with_context(|| format!("reading header of {}", path.display()))?;
    if header[0..4] != MAGIC {
        bail!("{} is not an OCW map (bad magic)", path.display());
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        bail!("{} uses unsupported map format version {}", path.display(), version);
    }

    let id = Uuid::from_slice(&header[6..22]).context("reading world id")?;
    let width = u16::from_be_bytes([header[22], header[23]]) as i32;
    let length = u16::from_be_bytes([header[24], header[25]]) as i32;
    let height = u16::from_be_bytes([header[26], header[27]]) as i32;
    let spawn = GridPoint::new(
        i16::from_be_bytes([header[28], header[29]]) as i32,
        i16::from_be_bytes([header[30], header[31]]) as i32,
        i16::from_be_bytes([header[32], header[33]]) as i32,
    );
    let created = i64::from_be_bytes(header[34..42].try_into().expect("fixed slice"));
    let modified = i64::from_be_bytes(header[42..50].try_into().expect("fixed slice"));

    let dims = Dimensions::new(width, length, height);
    let mut blocks = Vec::with_capacity(dims.volume());
    GzDecoder::new(file)
        .read_to_end(&mut blocks)
        .with_context(|| format!("decompressing block grid of {}", path.display()))?;

    let mut store = BlockStore::with_blocks(registry, dims, blocks)
        .with_context(|| format!("grid of {} is inconsistent with its header", path.display()))?;
    store.set_spawn(spawn);
    if store.validate_spawn() {
        tracing::warn!("Spawn of {} was out of bounds, clamped", path.display());
    }
    store.mark_saved();
    store.mark_backed_up();

    tracing::info!(
        "Map loaded: {} ({}x{}x{}, {:.2?})",
        path.display(),
        width,
        length,
        height,
        start.elapsed(),
    );
    Ok(Some((store, MapMeta { id, created, modified })))
}
