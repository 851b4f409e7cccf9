//! Field-by-field reconciliation of an incoming record set against the local one.
//!
//! Rules per incoming record:
//! - key unknown locally: inserted as-is and reported under `added`;
//! - key known: every non-owned field that differs is overwritten and reported,
//!   owned fields are only filled while the local value is empty.
//!
//! Local keys the incoming set no longer mentions are reported as
//! `missing_upstream` and left in place. Running the same merge twice yields
//! no additions and no field changes on the second run.

use crate::error::{MobmapError, Result};
use crate::models::{DropItem, MapCoords, MobRecord, SourceCoords};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A typed field value, used for comparison and for the change report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Empty,
    Int(i64),
    Text(String),
    Location(SourceCoords),
    MapCoords(MapCoords),
    Items(Vec<DropItem>),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::Location(coords) => coords.is_empty(),
            FieldValue::Items(items) => items.is_empty(),
            FieldValue::Int(_) | FieldValue::MapCoords(_) => false,
        }
    }

    fn from_int(value: Option<i64>) -> Self {
        value.map(FieldValue::Int).unwrap_or(FieldValue::Empty)
    }

    fn from_text(value: &Option<String>) -> Self {
        value.clone().map(FieldValue::Text).unwrap_or(FieldValue::Empty)
    }

    fn into_int(self, field: &str) -> Result<Option<i64>> {
        match self {
            FieldValue::Empty => Ok(None),
            FieldValue::Int(v) => Ok(Some(v)),
            other => Err(type_mismatch(field, &other)),
        }
    }

    fn into_text(self, field: &str) -> Result<Option<String>> {
        match self {
            FieldValue::Empty => Ok(None),
            FieldValue::Text(v) => Ok(Some(v)),
            other => Err(type_mismatch(field, &other)),
        }
    }
}

fn type_mismatch(field: &str, value: &FieldValue) -> MobmapError {
    MobmapError::Validation(format!("unexpected value {:?} for field '{}'", value, field))
}

/// A record that can take part in a merge.
pub trait MergeRecord: Clone {
    /// Every mergeable field name, in report order.
    const FIELDS: &'static [&'static str];

    /// Stable natural key.
    fn key(&self) -> &str;

    fn field(&self, name: &str) -> Result<FieldValue>;

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()>;
}

impl MergeRecord for MobRecord {
    const FIELDS: &'static [&'static str] = &[
        "slug",
        "level",
        "level_range",
        "respawn_time",
        "respawn_minutes",
        "url",
        "location",
        "map_coords",
        "drop_items",
    ];

    fn key(&self) -> &str {
        &self.name
    }

    fn field(&self, name: &str) -> Result<FieldValue> {
        Ok(match name {
            "slug" => FieldValue::from_text(&self.slug),
            "level" => FieldValue::from_int(self.level),
            "level_range" => FieldValue::from_text(&self.level_range),
            "respawn_time" => FieldValue::from_text(&self.respawn_time),
            "respawn_minutes" => FieldValue::from_int(self.respawn_minutes),
            "url" => FieldValue::from_text(&self.url),
            "location" => FieldValue::Location(self.location),
            "map_coords" => self
                .map_coords
                .clone()
                .map(FieldValue::MapCoords)
                .unwrap_or(FieldValue::Empty),
            "drop_items" => FieldValue::Items(self.drop_items.clone()),
            other => return Err(MobmapError::NotFound(format!("mob field '{}'", other))),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        match name {
            "slug" => self.slug = value.into_text(name)?,
            "level" => self.level = value.into_int(name)?,
            "level_range" => self.level_range = value.into_text(name)?,
            "respawn_time" => self.respawn_time = value.into_text(name)?,
            "respawn_minutes" => self.respawn_minutes = value.into_int(name)?,
            "url" => self.url = value.into_text(name)?,
            "location" => {
                self.location = match value {
                    FieldValue::Empty => SourceCoords::default(),
                    FieldValue::Location(coords) => coords,
                    other => return Err(type_mismatch(name, &other)),
                }
            }
            "map_coords" => {
                self.map_coords = match value {
                    FieldValue::Empty => None,
                    FieldValue::MapCoords(coords) => Some(coords),
                    other => return Err(type_mismatch(name, &other)),
                }
            }
            "drop_items" => {
                self.drop_items = match value {
                    FieldValue::Empty => Vec::new(),
                    FieldValue::Items(items) => items,
                    other => return Err(type_mismatch(name, &other)),
                }
            }
            other => return Err(MobmapError::NotFound(format!("mob field '{}'", other))),
        }
        Ok(())
    }
}

/// Field names that belong to the local store once set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFields {
    names: BTreeSet<String>,
}

impl OwnedFields {
    /// Build an owned set for record type `R`, rejecting unknown field names.
    pub fn for_record<R: MergeRecord, S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut owned = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            if !R::FIELDS.contains(&name) {
                return Err(MobmapError::Config(format!(
                    "unknown owned field '{}' (expected one of: {})",
                    name,
                    R::FIELDS.join(", ")
                )));
            }
            owned.insert(name.to_string());
        }
        Ok(Self { names: owned })
    }

    pub fn none() -> Self {
        Self { names: BTreeSet::new() }
    }

    /// Release a field so the next merge overwrites it like any other.
    pub fn without(mut self, name: &str) -> Self {
        self.names.remove(name);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// One field that changed during the merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub key: String,
    pub field: String,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// An owned field that was kept although the incoming value differed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreservedField {
    pub key: String,
    pub field: String,
}

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub added: Vec<String>,
    /// Changes grouped by field name.
    pub field_changed: BTreeMap<String, Vec<FieldChange>>,
    pub missing_upstream: Vec<String>,
    pub preserved: Vec<PreservedField>,
    pub duplicate_incoming: Vec<String>,
}

impl MergeReport {
    /// True when the merge added records or changed any field.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.field_changed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.field_changed.values().map(Vec::len).sum()
    }

    /// Keys of existing records with at least one changed field.
    pub fn changed_keys(&self) -> BTreeSet<&str> {
        self.field_changed
            .values()
            .flatten()
            .map(|change| change.key.as_str())
            .collect()
    }

    /// Keys whose given field changed.
    pub fn keys_with_changed_field(&self, field: &str) -> BTreeSet<&str> {
        self.field_changed
            .get(field)
            .into_iter()
            .flatten()
            .map(|change| change.key.as_str())
            .collect()
    }

    fn record_change(&mut self, change: FieldChange) {
        self.field_changed
            .entry(change.field.clone())
            .or_default()
            .push(change);
    }
}

/// Merge `incoming` into `local` in place and report what happened.
pub fn merge<R: MergeRecord>(
    local: &mut BTreeMap<String, R>,
    incoming: impl IntoIterator<Item = R>,
    owned: &OwnedFields,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();

    // Collapse repeated keys first so a rerun diffs the same final record.
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, R> = HashMap::new();
    for record in incoming {
        let key = record.key().to_string();
        if latest.insert(key.clone(), record).is_some() {
            tracing::warn!("Incoming set lists '{}' more than once, keeping the last entry", key);
            if !report.duplicate_incoming.contains(&key) {
                report.duplicate_incoming.push(key);
            }
        } else {
            order.push(key);
        }
    }

    for key in &order {
        let Some(record) = latest.remove(key) else {
            continue;
        };

        let Some(existing) = local.get_mut(key) else {
            tracing::debug!("New record: {}", key);
            report.added.push(key.clone());
            local.insert(key.clone(), record);
            continue;
        };

        for &field in R::FIELDS {
            let old = existing.field(field)?;
            let new = record.field(field)?;
            if old == new {
                continue;
            }

            if owned.contains(field) {
                if new.is_empty() {
                    continue;
                }
                if !old.is_empty() {
                    report.preserved.push(PreservedField {
                        key: key.clone(),
                        field: field.to_string(),
                    });
                    continue;
                }
            }

            tracing::debug!("{}: {} changed", key, field);
            existing.set_field(field, new.clone())?;
            report.record_change(FieldChange {
                key: key.clone(),
                field: field.to_string(),
                old,
                new,
            });
        }
    }

    let seen: BTreeSet<&str> = order.iter().map(String::as_str).collect();
    report.missing_upstream = local
        .keys()
        .filter(|key| !seen.contains(key.as_str()))
        .cloned()
        .collect();

    Ok(report)
}
