//! Data models for named mobs and their special drops.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Game-world position as reported by the upstream database.
///
/// Each component is optional because the upstream feed regularly omits some
/// of them; a position without both `x` and `y` cannot be projected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCoords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl SourceCoords {
    pub fn new(x: f64, y: f64, z: Option<f64>) -> Self {
        Self { x: Some(x), y: Some(y), z }
    }

    /// The planar (x, y) pair, if both components are present.
    pub fn planar(&self) -> Option<(f64, f64)> {
        Some((self.x?, self.y?))
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }
}

/// How a map coordinate pair was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provenance {
    /// Two-point scale and offset fit.
    ScaleOffset,
    /// Least-squares affine fit over three or more points.
    AffineFit,
    /// Placed by hand on the map.
    Manual,
    /// Any tag written by older tooling, kept verbatim.
    Other(String),
}

impl Provenance {
    pub fn as_str(&self) -> &str {
        match self {
            Provenance::ScaleOffset => "scale-offset",
            Provenance::AffineFit => "affine-fit",
            Provenance::Manual => "manual",
            Provenance::Other(tag) => tag,
        }
    }

    /// True for values computed from a transform rather than placed by an operator.
    pub fn is_derived(&self) -> bool {
        match self {
            Provenance::ScaleOffset | Provenance::AffineFit => true,
            Provenance::Manual => false,
            // Legacy tags from the old triangulation scripts ("least_squares_12_points",
            // "2-point linear", "triangulated", ...) are all fits.
            Provenance::Other(tag) => !tag.eq_ignore_ascii_case("manual"),
        }
    }
}

impl From<String> for Provenance {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "scale-offset" => Provenance::ScaleOffset,
            "affine-fit" => Provenance::AffineFit,
            "manual" => Provenance::Manual,
            _ => Provenance::Other(tag),
        }
    }
}

impl From<Provenance> for String {
    fn from(provenance: Provenance) -> Self {
        provenance.as_str().to_string()
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position on the map tiles, plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapCoords {
    pub lat: f64,
    pub lng: f64,
    pub provenance: Provenance,
}

/// Whether a mob is drawn on the map. Replaces deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

impl Visibility {
    pub fn from_hidden_flag(hidden: bool) -> Self {
        if hidden { Visibility::Hidden } else { Visibility::Visible }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Visibility::Hidden)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Visible => f.write_str("SHOWN"),
            Visibility::Hidden => f.write_str("HIDDEN"),
        }
    }
}

/// A special drop belonging to exactly one mob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropItem {
    pub name: String,
    pub url: Option<String>,
    pub rarity: Option<String>,
    pub item_type: Option<String>,
    /// Position among the mob's drops, unique per mob. Display order only.
    pub drop_order: i32,
    pub drop_chance: Option<String>,
}

/// A named mob as held in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobRecord {
    pub id: Option<i64>,
    pub name: String,
    pub slug: Option<String>,
    pub level: Option<i64>,
    pub level_range: Option<String>,
    pub respawn_time: Option<String>,
    pub respawn_minutes: Option<i64>,
    pub url: Option<String>,
    pub location: SourceCoords,
    pub map_coords: Option<MapCoords>,
    pub visibility: Visibility,
    pub special_drop_category: Option<String>,
    pub drop_items: Vec<DropItem>,
}

impl MobRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            slug: None,
            level: None,
            level_range: None,
            respawn_time: None,
            respawn_minutes: None,
            url: None,
            location: SourceCoords::default(),
            map_coords: None,
            visibility: Visibility::Visible,
            special_drop_category: None,
            drop_items: Vec::new(),
        }
    }
}

/// Check that drop orders are unique within one mob's item set.
pub fn validate_drop_order(mob_name: &str, items: &[DropItem]) -> crate::Result<()> {
    let mut seen = std::collections::HashSet::new();
    for item in items {
        if !seen.insert(item.drop_order) {
            return Err(crate::MobmapError::DuplicateEntry(format!(
                "drop order {} used twice for {}",
                item.drop_order, mob_name
            )));
        }
    }
    Ok(())
}

/// Summary row used by the visibility listing.
#[derive(Debug, Clone)]
pub struct VisibilityRow {
    pub id: i64,
    pub name: String,
    pub level: Option<i64>,
    pub item_count: i64,
    pub visibility: Visibility,
}

/// Store-wide counts for the status command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub mobs: usize,
    pub with_items: usize,
    pub with_map_coords: usize,
    pub hidden: usize,
}
