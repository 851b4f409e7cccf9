//! Operator-placed control points and their resolution against mobs.
//!
//! A control point starts as a labelled map position, either a marker whose
//! label carries the reference tag ("REF Wormwig", "Wormwig REF") or a row of
//! a `label,lat,lng` CSV file. The label is matched against mob names and slugs
//! to pick up the mob's game-world position. Labels that match nothing, match
//! several mobs, or match a mob without a position are skipped, not fatal.

use crate::config::TriangulationConfig;
use crate::error::{MobmapError, Result};
use crate::models::MobRecord;
use crate::transform::ControlPoint;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// A map position with the operator's label for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledPoint {
    pub label: String,
    pub lat: f64,
    pub lng: f64,
}

/// A labelled point paired with the mob it names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedControlPoint {
    pub label: String,
    pub mob_name: String,
    pub point: ControlPoint,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub resolved: Vec<ResolvedControlPoint>,
    /// Why each skipped label was skipped.
    pub skipped: Vec<MobmapError>,
}

impl Resolution {
    pub fn points(&self) -> Vec<ControlPoint> {
        self.resolved.iter().map(|r| r.point).collect()
    }
}

/// Read control points from a CSV file with a `label,lat,lng` header.
pub fn load_csv(path: &Path) -> Result<Vec<LabeledPoint>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    for record in reader.deserialize() {
        let point: LabeledPoint = record?;
        points.push(point);
    }
    Ok(points)
}

/// True when `label` carries the reference tag as its first or last word.
pub fn is_reference_label(label: &str, tag: &str) -> bool {
    let mut words = label.split_whitespace();
    let first = words.next();
    let last = words.last();
    first.is_some_and(|w| w.eq_ignore_ascii_case(tag)) || last.is_some_and(|w| w.eq_ignore_ascii_case(tag))
}

/// Strip the reference tag, lowercase, collapse whitespace and apply aliases.
pub fn normalize_label(label: &str, config: &TriangulationConfig) -> String {
    let tag = config.reference_tag.as_str();
    let collapsed = WHITESPACE.replace_all(label.trim(), " ").to_lowercase();

    let mut hint = collapsed.as_str();
    if let Some((first, rest)) = hint.split_once(' ') {
        if first.eq_ignore_ascii_case(tag) {
            hint = rest;
        }
    }
    if let Some((rest, last)) = hint.rsplit_once(' ') {
        if last.eq_ignore_ascii_case(tag) {
            hint = rest;
        }
    }
    if hint.eq_ignore_ascii_case(tag) {
        hint = "";
    }

    config
        .aliases
        .iter()
        .find(|alias| hint.contains(&alias.contains.to_lowercase()))
        .map(|alias| alias.canonical.to_lowercase())
        .unwrap_or_else(|| hint.to_string())
}

fn matches_exactly(mob: &MobRecord, hint: &str) -> bool {
    mob.name.to_lowercase() == hint
        || mob
            .slug
            .as_deref()
            .is_some_and(|slug| slug.to_lowercase() == hint.replace(' ', "-"))
}

fn matches_partially(mob: &MobRecord, hint: &str) -> bool {
    mob.name.to_lowercase().contains(hint)
        || mob
            .slug
            .as_deref()
            .is_some_and(|slug| slug.to_lowercase().contains(&hint.replace(' ', "-")))
}

/// Find the single mob a label refers to: exact name/slug match first, then a
/// unique substring match.
pub fn find_mob<'a>(label: &str, mobs: &'a [MobRecord], config: &TriangulationConfig) -> Result<&'a MobRecord> {
    let hint = normalize_label(label, config);
    if hint.is_empty() {
        return Err(MobmapError::NotFound(format!("no mob name in label '{}'", label)));
    }

    let exact: Vec<&MobRecord> = mobs.iter().filter(|m| matches_exactly(m, &hint)).collect();
    let candidates = if exact.is_empty() {
        mobs.iter().filter(|m| matches_partially(m, &hint)).collect()
    } else {
        exact
    };

    match candidates.as_slice() {
        [] => Err(MobmapError::NotFound(format!("no mob matches '{}' (from '{}')", hint, label))),
        [mob] => Ok(*mob),
        many => Err(MobmapError::AmbiguousMatch {
            label: label.to_string(),
            candidates: many.iter().map(|m| m.name.clone()).collect(),
        }),
    }
}

/// Resolve every labelled point; failures are collected, not returned.
pub fn resolve(labels: &[LabeledPoint], mobs: &[MobRecord], config: &TriangulationConfig) -> Resolution {
    let mut resolution = Resolution::default();

    for labeled in labels {
        let mob = match find_mob(&labeled.label, mobs, config) {
            Ok(mob) => mob,
            Err(e) => {
                tracing::warn!("Skipping control point '{}': {}", labeled.label, e);
                resolution.skipped.push(e);
                continue;
            }
        };

        let Some((x, y)) = mob.location.planar() else {
            tracing::warn!("Skipping control point '{}': {} has no game coordinates", labeled.label, mob.name);
            resolution
                .skipped
                .push(MobmapError::MissingField(format!("location of {}", mob.name)));
            continue;
        };

        tracing::info!(
            "Control point '{}' -> {} (game {:.0}, {:.0} / map {:.3}, {:.3})",
            labeled.label,
            mob.name,
            x,
            y,
            labeled.lat,
            labeled.lng
        );
        resolution.resolved.push(ResolvedControlPoint {
            label: labeled.label.clone(),
            mob_name: mob.name.clone(),
            point: ControlPoint::new(x, y, labeled.lat, labeled.lng),
        });
    }

    resolution
}
