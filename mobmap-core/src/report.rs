//! Operator-facing reports for import and triangulation runs.

use crate::control_points::ResolvedControlPoint;
use crate::error::Result;
use crate::merge::{FieldValue, MergeReport};
use crate::models::MobRecord;
use crate::transform::{Fit, PointResidual, ProjectionPlan};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

const RULE: &str = "============================================================";

fn describe(value: &FieldValue) -> String {
    match value {
        FieldValue::Empty => "(none)".to_string(),
        FieldValue::Int(v) => v.to_string(),
        FieldValue::Text(v) => v.clone(),
        FieldValue::Location(c) => {
            let part = |v: Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "?".to_string());
            format!("({}, {}, {})", part(c.x), part(c.y), part(c.z))
        }
        FieldValue::MapCoords(c) => format!("({:.3}, {:.3}) [{}]", c.lat, c.lng, c.provenance),
        FieldValue::Items(items) => format!("{} items", items.len()),
    }
}

/// Mobs whose game-world position changed in `report` while their stored map
/// position came from a fit. Those map positions no longer match.
pub fn stale_map_positions(report: &MergeReport, stored: &[MobRecord]) -> Vec<String> {
    let moved = report.keys_with_changed_field("location");
    stored
        .iter()
        .filter(|mob| moved.contains(mob.name.as_str()))
        .filter(|mob| mob.map_coords.as_ref().is_some_and(|c| c.provenance.is_derived()))
        .map(|mob| mob.name.clone())
        .collect()
}

struct ImportReport<'a> {
    report: &'a MergeReport,
    incoming: &'a [MobRecord],
    stale: &'a [String],
    at: DateTime<Local>,
}

impl fmt::Display for ImportReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "CODEX IMPORT REPORT")?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Date: {}", self.at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f)?;

        if !report.added.is_empty() {
            writeln!(f, "NEW MOBS ({}):", report.added.len())?;
            for name in &report.added {
                match self.incoming.iter().find(|m| &m.name == name) {
                    Some(mob) => {
                        let level = mob.level.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string());
                        writeln!(f, "   + {} (Level {}) - {} drops", name, level, mob.drop_items.len())?;
                    }
                    None => writeln!(f, "   + {}", name)?,
                }
            }
            writeln!(f)?;
        }

        for (field, changes) in &report.field_changed {
            writeln!(f, "{} CHANGES ({}):", field.to_uppercase().replace('_', " "), changes.len())?;
            for change in changes {
                writeln!(f, "   ~ {}: {} -> {}", change.key, describe(&change.old), describe(&change.new))?;
            }
            writeln!(f)?;
        }

        if !self.stale.is_empty() {
            writeln!(f, "STALE MAP POSITIONS ({}):", self.stale.len())?;
            for name in self.stale {
                writeln!(f, "   ! {} (re-run triangulate --overwrite-derived)", name)?;
            }
            writeln!(f)?;
        }

        if !report.preserved.is_empty() {
            writeln!(f, "PRESERVED LOCAL VALUES ({}):", report.preserved.len())?;
            for kept in &report.preserved {
                writeln!(f, "   = {} ({})", kept.key, kept.field)?;
            }
            writeln!(f)?;
        }

        if !report.duplicate_incoming.is_empty() {
            writeln!(f, "DUPLICATES IN FEED ({}):", report.duplicate_incoming.len())?;
            for name in &report.duplicate_incoming {
                writeln!(f, "   ! {}", name)?;
            }
            writeln!(f)?;
        }

        if !report.missing_upstream.is_empty() {
            writeln!(f, "MISSING FROM FEED ({}):", report.missing_upstream.len())?;
            for name in &report.missing_upstream {
                writeln!(f, "   - {} (consider hiding)", name)?;
            }
            writeln!(f)?;
        }

        if !report.has_changes() {
            writeln!(f, "No additions or field changes.")?;
            writeln!(f)?;
        }

        writeln!(f, "RECOMMENDATIONS:")?;
        writeln!(f, "   * Review respawn time changes for accuracy")?;
        writeln!(f, "   * Triangulate new mobs that have no map coordinates")?;
        writeln!(f, "   * Hide mobs missing from the feed instead of deleting them")?;
        writeln!(f, "{}", RULE)
    }
}

/// Render a merge report as plain text.
///
/// `incoming` supplies level and drop counts for the added mobs; `stale`
/// lists mobs from [`stale_map_positions`].
pub fn render_import_report(
    report: &MergeReport,
    incoming: &[MobRecord],
    stale: &[String],
    at: DateTime<Local>,
) -> String {
    ImportReport { report, incoming, stale, at }.to_string()
}

/// One control point with how well the fit reproduces it.
#[derive(Debug, Clone, Serialize)]
pub struct ControlPointCheck {
    pub label: String,
    pub mob_name: String,
    pub source: (f64, f64),
    #[serde(flatten)]
    pub residual: PointResidual,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectionCounts {
    pub updated: usize,
    pub kept: usize,
    pub unprojectable: usize,
}

/// Machine-readable record of a triangulation run.
#[derive(Debug, Clone, Serialize)]
pub struct TriangulationReport {
    pub generated_at: String,
    pub method: String,
    pub fit: Fit,
    pub mean_error: f64,
    pub control_points: Vec<ControlPointCheck>,
    pub skipped: Vec<String>,
    pub projection: ProjectionCounts,
    pub dry_run: bool,
}

impl TriangulationReport {
    pub fn new(
        fit: &Fit,
        resolved: &[ResolvedControlPoint],
        skipped: &[String],
        plan: &ProjectionPlan,
        dry_run: bool,
        at: DateTime<Local>,
    ) -> Self {
        let points: Vec<_> = resolved.iter().map(|r| r.point).collect();
        let control_points = resolved
            .iter()
            .zip(fit.residuals(&points))
            .map(|(r, residual)| ControlPointCheck {
                label: r.label.clone(),
                mob_name: r.mob_name.clone(),
                source: (r.point.source_x, r.point.source_y),
                residual,
            })
            .collect();

        Self {
            generated_at: at.to_rfc3339(),
            method: fit.provenance().to_string(),
            fit: *fit,
            mean_error: fit.mean_error(&points),
            control_points,
            skipped: skipped.to_vec(),
            projection: ProjectionCounts {
                updated: plan.updates.len(),
                kept: plan.kept.len(),
                unprojectable: plan.unprojectable.len(),
            },
            dry_run,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
