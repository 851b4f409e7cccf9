//! Import feed: already-fetched upstream mob descriptions in JSON.

use crate::classify::{ClassificationRules, item_code};
use crate::error::{MobmapError, Result};
use crate::file_utils::read_utf8_file;
use crate::models::{DropItem, MobRecord, SourceCoords};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedDrop {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub drop_chance: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedMob {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub level: Option<i64>,
    #[serde(default)]
    pub level_range: Option<String>,
    #[serde(default)]
    pub respawn_time: Option<String>,
    #[serde(default)]
    pub respawn_minutes: Option<i64>,
    #[serde(default, alias = "codex_url")]
    pub url: Option<String>,
    #[serde(default)]
    pub location_x: Option<f64>,
    #[serde(default)]
    pub location_y: Option<f64>,
    #[serde(default)]
    pub location_z: Option<f64>,
    #[serde(default)]
    pub special_drops: Vec<FeedDrop>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedDocument {
    List(Vec<FeedMob>),
    Wrapped { mobs: Vec<FeedMob> },
}

/// Parse a feed document: either a bare array of mobs or `{ "mobs": [...] }`.
pub fn parse_feed(content: &str) -> Result<Vec<FeedMob>> {
    let document: FeedDocument = serde_json::from_str(content)?;
    let mobs = match document {
        FeedDocument::List(mobs) => mobs,
        FeedDocument::Wrapped { mobs } => mobs,
    };

    for mob in &mobs {
        if mob.name.trim().is_empty() {
            return Err(MobmapError::MissingField("name".to_string()));
        }
    }
    Ok(mobs)
}

pub fn load_feed(path: &Path) -> Result<Vec<FeedMob>> {
    let content = read_utf8_file(path)?;
    parse_feed(&content)
}

impl FeedMob {
    /// Convert to a mob record, classifying and ordering its drops.
    ///
    /// Drops whose item code matches a skip prefix are dropped; the remaining
    /// drops get `drop_order` 1..n in feed order.
    pub fn into_record(self, rules: &ClassificationRules) -> MobRecord {
        let drop_items = self
            .special_drops
            .into_iter()
            .filter(|drop| {
                let skipped = drop
                    .url
                    .as_deref()
                    .and_then(item_code)
                    .is_some_and(|code| rules.is_skipped(code));
                if skipped {
                    tracing::debug!("Skipping non-special drop {} of {}", drop.name, self.name);
                }
                !skipped
            })
            .enumerate()
            .map(|(idx, drop)| {
                let item_type = drop.item_type.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| {
                    rules.classify(drop.url.as_deref().and_then(item_code), &drop.name)
                });
                DropItem {
                    name: drop.name,
                    url: drop.url,
                    rarity: drop.rarity,
                    item_type: Some(item_type),
                    drop_order: idx as i32 + 1,
                    drop_chance: drop.drop_chance,
                }
            })
            .collect();

        MobRecord {
            slug: self.slug,
            level: self.level,
            level_range: self.level_range,
            respawn_time: self.respawn_time,
            respawn_minutes: self.respawn_minutes,
            url: self.url,
            location: SourceCoords {
                x: self.location_x,
                y: self.location_y,
                z: self.location_z,
            },
            drop_items,
            ..MobRecord::new(self.name)
        }
    }
}

/// Convert a whole feed.
pub fn into_records(feed: Vec<FeedMob>, rules: &ClassificationRules) -> Vec<MobRecord> {
    feed.into_iter().map(|mob| mob.into_record(rules)).collect()
}
