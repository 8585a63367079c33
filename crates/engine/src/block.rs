//! Block identifiers and the immutable block registry.
//!
//! The registry owns everything name- or capability-related about blocks:
//! case-insensitive name resolution (canonical names, numeric ids, and a
//! curated set of historical synonyms), the legacy fallback mapping used for
//! clients without extended-block support, and the see-through set consulted
//! by shadow computation. It is built once through [`BlockRegistryBuilder`]
//! and read-only afterwards; callers share it via `Arc` rather than through
//! ambient global state, so tests can construct isolated registries with
//! custom block sets.

use std::collections::HashMap;

use indexmap::IndexMap;

/// Opaque block identifier. One byte per grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub u8);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);

    /// Sentinel returned for out-of-bounds reads and failed name lookups.
    /// Never a valid grid cell value.
    pub const UNDEFINED: BlockId = BlockId(0xFF);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn is_undefined(self) -> bool {
        self.0 == 0xFF
    }
}

// -- Classic block set (protocol ids 0..=49) --

pub const AIR: BlockId = BlockId(0);
pub const STONE: BlockId = BlockId(1);
pub const GRASS: BlockId = BlockId(2);
pub const DIRT: BlockId = BlockId(3);
pub const COBBLESTONE: BlockId = BlockId(4);
pub const PLANKS: BlockId = BlockId(5);
pub const SAPLING: BlockId = BlockId(6);
pub const BEDROCK: BlockId = BlockId(7);
pub const WATER: BlockId = BlockId(8);
pub const STILL_WATER: BlockId = BlockId(9);
pub const LAVA: BlockId = BlockId(10);
pub const STILL_LAVA: BlockId = BlockId(11);
pub const SAND: BlockId = BlockId(12);
pub const GRAVEL: BlockId = BlockId(13);
pub const GOLD_ORE: BlockId = BlockId(14);
pub const IRON_ORE: BlockId = BlockId(15);
pub const COAL: BlockId = BlockId(16);
pub const LOG: BlockId = BlockId(17);
pub const LEAVES: BlockId = BlockId(18);
pub const SPONGE: BlockId = BlockId(19);
pub const GLASS: BlockId = BlockId(20);
pub const RED: BlockId = BlockId(21);
pub const ORANGE: BlockId = BlockId(22);
pub const YELLOW: BlockId = BlockId(23);
pub const LIME: BlockId = BlockId(24);
pub const GREEN: BlockId = BlockId(25);
pub const TEAL: BlockId = BlockId(26);
pub const AQUA: BlockId = BlockId(27);
pub const CYAN: BlockId = BlockId(28);
pub const BLUE: BlockId = BlockId(29);
pub const INDIGO: BlockId = BlockId(30);
pub const VIOLET: BlockId = BlockId(31);
pub const MAGENTA: BlockId = BlockId(32);
pub const PINK: BlockId = BlockId(33);
pub const BLACK: BlockId = BlockId(34);
pub const GRAY: BlockId = BlockId(35);
pub const WHITE: BlockId = BlockId(36);
pub const YELLOW_FLOWER: BlockId = BlockId(37);
pub const RED_FLOWER: BlockId = BlockId(38);
pub const BROWN_MUSHROOM: BlockId = BlockId(39);
pub const RED_MUSHROOM: BlockId = BlockId(40);
pub const GOLD: BlockId = BlockId(41);
pub const IRON: BlockId = BlockId(42);
pub const DOUBLE_SLAB: BlockId = BlockId(43);
pub const SLAB: BlockId = BlockId(44);
pub const BRICK: BlockId = BlockId(45);
pub const TNT: BlockId = BlockId(46);
pub const BOOKSHELF: BlockId = BlockId(47);
pub const MOSSY_COBBLESTONE: BlockId = BlockId(48);
pub const OBSIDIAN: BlockId = BlockId(49);

// -- Extended block set (protocol ids 50..=65) --
// Only sent verbatim to extended-capable clients; everyone else receives the
// registry's fallback mapping.

pub const COBBLESTONE_SLAB: BlockId = BlockId(50);
pub const ROPE: BlockId = BlockId(51);
pub const SANDSTONE: BlockId = BlockId(52);
pub const SNOW: BlockId = BlockId(53);
pub const FIRE: BlockId = BlockId(54);
pub const LIGHT_PINK: BlockId = BlockId(55);
pub const FOREST_GREEN: BlockId = BlockId(56);
pub const BROWN: BlockId = BlockId(57);
pub const DEEP_BLUE: BlockId = BlockId(58);
pub const TURQUOISE: BlockId = BlockId(59);
pub const ICE: BlockId = BlockId(60);
pub const TILE: BlockId = BlockId(61);
pub const MAGMA: BlockId = BlockId(62);
pub const PILLAR: BlockId = BlockId(63);
pub const CRATE: BlockId = BlockId(64);
pub const STONE_BRICK: BlockId = BlockId(65);

/// Highest id in the engine-defined block set.
pub const MAX_ENGINE_BLOCK: u8 = 65;

/// One registered block: canonical name, legacy fallback, shadow transparency.
#[derive(Debug, Clone)]
struct BlockDef {
    name: String,
    fallback: BlockId,
    transparent: bool,
}

/// Builder for [`BlockRegistry`]. Collects the engine-defined block set plus
/// any custom blocks, then freezes into the immutable registry.
pub struct BlockRegistryBuilder {
    defs: IndexMap<u8, BlockDef>,
    aliases: HashMap<String, BlockId>,
}

impl BlockRegistryBuilder {
    pub fn new() -> Self {
        Self {
            defs: IndexMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register a block. The canonical name is registered as an alias too;
    /// later registrations never overwrite earlier aliases, so the engine
    /// set keeps priority over custom synonyms.
    pub fn block(
        mut self,
        id: BlockId,
        name: &str,
        fallback: BlockId,
        transparent: bool,
        aliases: &[&str],
    ) -> Self {
        self.defs.insert(
            id.0,
            BlockDef {
                name: name.to_string(),
                fallback,
                transparent,
            },
        );
        self.alias_entry(name, id);
        for alias in aliases {
            self.alias_entry(alias, id);
        }
        self
    }

    fn alias_entry(&mut self, name: &str, id: BlockId) {
        self.aliases
            .entry(name.trim().to_ascii_lowercase())
            .or_insert(id);
    }

    /// Freeze into the immutable registry.
    pub fn finish(self) -> BlockRegistry {
        let mut fallback = [0u8; 256];
        let mut transparent = [false; 256];
        let mut known = [false; 256];
        let mut canonical = IndexMap::new();

        for (&raw, def) in &self.defs {
            known[raw as usize] = true;
            fallback[raw as usize] = def.fallback.0;
            transparent[raw as usize] = def.transparent;
            canonical.insert(raw, def.name.clone());
        }
        // Out-of-bounds sentinel stays see-through so shadow scans ignore it.
        transparent[BlockId::UNDEFINED.0 as usize] = true;

        BlockRegistry {
            by_name: self.aliases,
            canonical,
            fallback,
            transparent,
            known,
        }
    }
}

impl Default for BlockRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable block registry. Safe to share across threads; never mutated
/// after [`BlockRegistryBuilder::finish`].
pub struct BlockRegistry {
    by_name: HashMap<String, BlockId>,
    canonical: IndexMap<u8, String>,
    fallback: [u8; 256],
    transparent: [bool; 256],
    known: [bool; 256],
}

impl BlockRegistry {
    /// The standard classic + extended block set with its historical aliases.
    pub fn standard() -> BlockRegistry {
        Self::standard_builder().finish()
    }

    /// The standard set as a builder, so callers can append custom blocks
    /// before freezing.
    pub fn standard_builder() -> BlockRegistryBuilder {
        BlockRegistryBuilder::new()
            .block(AIR, "air", AIR, true, &["none", "nothing", "empty", "delete", "erase"])
            .block(STONE, "stone", STONE, false, &["rock", "stones"])
            .block(GRASS, "grass", GRASS, false, &["grassblock"])
            .block(DIRT, "dirt", DIRT, false, &["soil", "ground"])
            .block(COBBLESTONE, "cobblestone", COBBLESTONE, false, &["cobble", "rocks"])
            .block(PLANKS, "planks", PLANKS, false, &["wood", "plank", "board", "boards"])
            .block(SAPLING, "sapling", SAPLING, true, &["plant", "shrub"])
            .block(BEDROCK, "bedrock", BEDROCK, false, &["admincrete", "adminium", "opcrete", "hardrock", "solid"])
            .block(WATER, "water", WATER, true, &["activewater", "flowingwater"])
            .block(STILL_WATER, "stillwater", STILL_WATER, true, &["swater", "calmwater"])
            .block(LAVA, "lava", LAVA, false, &["activelava", "flowinglava"])
            .block(STILL_LAVA, "stilllava", STILL_LAVA, false, &["slava", "calmlava"])
            .block(SAND, "sand", SAND, false, &["beach"])
            .block(GRAVEL, "gravel", GRAVEL, false, &["pebbles"])
            .block(GOLD_ORE, "goldore", GOLD_ORE, false, &["goldrock"])
            .block(IRON_ORE, "ironore", IRON_ORE, false, &["ironrock"])
            .block(COAL, "coal", COAL, false, &["coalore", "charcoal"])
            .block(LOG, "log", LOG, false, &["tree", "trunk", "timber"])
            .block(LEAVES, "leaves", LEAVES, true, &["leaf", "foliage"])
            .block(SPONGE, "sponge", SPONGE, false, &[])
            .block(GLASS, "glass", GLASS, true, &["window"])
            .block(RED, "red", RED, false, &["redcloth", "redwool"])
            .block(ORANGE, "orange", ORANGE, false, &["orangecloth", "orangewool"])
            .block(YELLOW, "yellow", YELLOW, false, &["yellowcloth", "yellowwool"])
            .block(LIME, "lime", LIME, false, &["limecloth", "limewool", "lightgreen"])
            .block(GREEN, "green", GREEN, false, &["greencloth", "greenwool"])
            .block(TEAL, "teal", TEAL, false, &["tealcloth", "tealwool", "springgreen"])
            .block(AQUA, "aqua", AQUA, false, &["aquacloth", "aquawool"])
            .block(CYAN, "cyan", CYAN, false, &["cyancloth", "cyanwool"])
            .block(BLUE, "blue", BLUE, false, &["bluecloth", "bluewool"])
            .block(INDIGO, "indigo", INDIGO, false, &["indigocloth", "indigowool"])
            .block(VIOLET, "violet", VIOLET, false, &["violetcloth", "violetwool", "purple"])
            .block(MAGENTA, "magenta", MAGENTA, false, &["magentacloth", "magentawool"])
            .block(PINK, "pink", PINK, false, &["pinkcloth", "pinkwool"])
            .block(BLACK, "black", BLACK, false, &["blackcloth", "blackwool", "darkgray"])
            .block(GRAY, "gray", GRAY, false, &["graycloth", "graywool", "grey"])
            .block(WHITE, "white", WHITE, false, &["whitecloth", "whitewool", "cloth", "wool"])
            .block(YELLOW_FLOWER, "yellowflower", YELLOW_FLOWER, true, &["flower", "dandelion"])
            .block(RED_FLOWER, "redflower", RED_FLOWER, true, &["rose", "redrose"])
            .block(BROWN_MUSHROOM, "brownmushroom", BROWN_MUSHROOM, true, &["shroom", "mushroom"])
            .block(RED_MUSHROOM, "redmushroom", RED_MUSHROOM, true, &["redshroom"])
            .block(GOLD, "gold", GOLD, false, &["goldblock", "goldsolid"])
            .block(IRON, "iron", IRON, false, &["ironblock", "metal", "silver"])
            .block(DOUBLE_SLAB, "doubleslab", DOUBLE_SLAB, false, &["doublestair", "doublestep"])
            .block(SLAB, "slab", SLAB, false, &["stair", "step", "halfblock"])
            .block(BRICK, "brick", BRICK, false, &["bricks", "brickblock"])
            .block(TNT, "tnt", TNT, false, &["dynamite", "explosive"])
            .block(BOOKSHELF, "bookshelf", BOOKSHELF, false, &["books", "shelf", "bookcase"])
            .block(MOSSY_COBBLESTONE, "mossycobblestone", MOSSY_COBBLESTONE, false, &["mossy", "moss", "mossystone"])
            .block(OBSIDIAN, "obsidian", OBSIDIAN, false, &["darkrock"])
            .block(COBBLESTONE_SLAB, "cobblestoneslab", SLAB, false, &["cobbleslab"])
            .block(ROPE, "rope", BROWN_MUSHROOM, true, &["ladder"])
            .block(SANDSTONE, "sandstone", SAND, false, &[])
            .block(SNOW, "snow", AIR, true, &[])
            .block(FIRE, "fire", LAVA, true, &["flame"])
            .block(LIGHT_PINK, "lightpink", PINK, false, &["lightpinkwool"])
            .block(FOREST_GREEN, "forestgreen", GREEN, false, &["forestgreenwool"])
            .block(BROWN, "brown", DIRT, false, &["brownwool"])
            .block(DEEP_BLUE, "deepblue", BLUE, false, &["deepbluewool", "navy"])
            .block(TURQUOISE, "turquoise", CYAN, false, &["turquoisewool"])
            .block(ICE, "ice", GLASS, true, &["frozenwater"])
            .block(TILE, "tile", IRON, false, &["ceramictile", "ceramic"])
            .block(MAGMA, "magma", OBSIDIAN, false, &["magmablock"])
            .block(PILLAR, "pillar", WHITE, false, &["column"])
            .block(CRATE, "crate", PLANKS, false, &["box"])
            .block(STONE_BRICK, "stonebrick", STONE, false, &["stonebricks"])
    }

    /// Case-insensitive, total name lookup: canonical names, aliases, and
    /// numeric id strings. Returns [`BlockId::UNDEFINED`] on a miss.
    pub fn resolve(&self, name: &str) -> BlockId {
        let key = name.trim().to_ascii_lowercase();
        if let Ok(raw) = key.parse::<u8>() {
            let id = BlockId(raw);
            return if self.is_known(id) { id } else { BlockId::UNDEFINED };
        }
        self.by_name.get(&key).copied().unwrap_or(BlockId::UNDEFINED)
    }

    /// Canonical name of a registered block, if any.
    pub fn canonical_name(&self, id: BlockId) -> Option<&str> {
        self.canonical.get(&id.0).map(String::as_str)
    }

    /// Legacy substitute for clients without extended-block support.
    /// Identity for legacy blocks, down-mapped for extended and custom ones.
    pub fn fallback(&self, id: BlockId) -> BlockId {
        if self.is_known(id) {
            BlockId(self.fallback[id.0 as usize])
        } else {
            BlockId::AIR
        }
    }

    /// Full 256-entry fallback table, usable with
    /// [`crate::store::BlockStore::write_compressed_mapped`] and
    /// [`crate::store::BlockStore::remap_blocks`]. Unknown ids map to air.
    pub fn fallback_table(&self) -> [u8; 256] {
        let mut table = [0u8; 256];
        for i in 0..256 {
            if self.known[i] {
                table[i] = self.fallback[i];
            }
        }
        table
    }

    /// Identity-for-known-ids table: remapping through it replaces every id
    /// absent from this registry with air.
    pub fn known_or_air_table(&self) -> [u8; 256] {
        let mut table = [0u8; 256];
        for i in 0..256 {
            if self.known[i] {
                table[i] = i as u8;
            }
        }
        table
    }

    /// Whether shadow scans see through this block (air, glass, leaves,
    /// water, plus anything custom-registered transparent).
    pub fn is_transparent(&self, id: BlockId) -> bool {
        self.transparent[id.0 as usize]
    }

    pub fn is_known(&self, id: BlockId) -> bool {
        !id.is_undefined() && self.known[id.0 as usize]
    }

    /// All registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.canonical.keys().map(|&raw| BlockId(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_case_insensitive_and_total() {
        let reg = BlockRegistry::standard();
        assert_eq!(reg.resolve("Stone"), STONE);
        assert_eq!(reg.resolve("  ADMINCRETE "), BEDROCK);
        assert_eq!(reg.resolve("49"), OBSIDIAN);
        assert_eq!(reg.resolve("no-such-block"), BlockId::UNDEFINED);
        assert_eq!(reg.resolve("200"), BlockId::UNDEFINED);
    }

    #[test]
    fn canonical_names_round_trip() {
        let reg = BlockRegistry::standard();
        for id in reg.ids().collect::<Vec<_>>() {
            let name = reg.canonical_name(id).expect("registered block has a name");
            assert_eq!(reg.resolve(name), id, "round trip failed for {name}");
        }
    }

    #[test]
    fn fallback_is_identity_for_legacy_blocks() {
        let reg = BlockRegistry::standard();
        for raw in 0..=49u8 {
            assert_eq!(reg.fallback(BlockId(raw)), BlockId(raw));
        }
        assert_eq!(reg.fallback(SANDSTONE), SAND);
        assert_eq!(reg.fallback(SNOW), AIR);
        assert_eq!(reg.fallback(BlockId(200)), AIR);
    }

    #[test]
    fn custom_blocks_extend_the_registry() {
        let reg = BlockRegistry::standard_builder()
            .block(BlockId(70), "forcefield", GLASS, true, &["barrier"])
            .finish();
        assert_eq!(reg.resolve("ForceField"), BlockId(70));
        assert_eq!(reg.resolve("barrier"), BlockId(70));
        assert_eq!(reg.fallback(BlockId(70)), GLASS);
        assert!(reg.is_transparent(BlockId(70)));
        assert_eq!(reg.resolve("70"), BlockId(70));
    }

    #[test]
    fn engine_aliases_win_over_custom_ones() {
        let reg = BlockRegistry::standard_builder()
            .block(BlockId(70), "stone", AIR, false, &[])
            .finish();
        assert_eq!(reg.resolve("stone"), STONE);
    }
}
