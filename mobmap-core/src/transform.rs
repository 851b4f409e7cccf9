//! Fitting a 2D transform from game-world coordinates to map coordinates.
//!
//! Two control points give a per-axis scale and offset. Three or more give a
//! full six-parameter affine map solved by linear least squares:
//!
//! ```text
//! dest_x = a * src_x + b * src_y + tx
//! dest_y = c * src_x + d * src_y + ty
//! ```
//!
//! There is no outlier rejection and no acceptance threshold. The fit reports
//! its RMS residual and the caller decides whether that is good enough.

use crate::error::{MobmapError, Result};
use crate::models::{MapCoords, MobRecord, Provenance, SourceCoords};
use serde::{Deserialize, Serialize};

/// Minimum number of control points accepted by [`estimate`].
pub const MIN_CONTROL_POINTS: usize = 2;

/// Relative determinant below which the source points are treated as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-12;

/// A known source-space position paired with its known destination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub source_x: f64,
    pub source_y: f64,
    pub dest_x: f64,
    pub dest_y: f64,
}

impl ControlPoint {
    pub fn new(source_x: f64, source_y: f64, dest_x: f64, dest_y: f64) -> Self {
        Self { source_x, source_y, dest_x, dest_y }
    }
}

/// Fitted transform parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    ScaleOffset {
        scale_x: f64,
        scale_y: f64,
        offset_x: f64,
        offset_y: f64,
    },
    Affine {
        a: f64,
        b: f64,
        c: f64,
        d: f64,
        tx: f64,
        ty: f64,
    },
}

impl Transform {
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Transform::ScaleOffset { scale_x, scale_y, offset_x, offset_y } => {
                (scale_x * x + offset_x, scale_y * y + offset_y)
            }
            Transform::Affine { a, b, c, d, tx, ty } => (a * x + b * y + tx, c * x + d * y + ty),
        }
    }

    /// Project a game-world position. `None` when x or y is missing.
    pub fn apply_coords(&self, coords: &SourceCoords) -> Option<(f64, f64)> {
        let (x, y) = coords.planar()?;
        Some(self.apply(x, y))
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            Transform::ScaleOffset { .. } => Provenance::ScaleOffset,
            Transform::Affine { .. } => Provenance::AffineFit,
        }
    }
}

/// Result of a fit: parameters plus root-mean-square residual over the
/// control points (0 for the exact two-point case).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    pub transform: Transform,
    pub rmse: f64,
    pub points_used: usize,
}

/// Per-point validation of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointResidual {
    pub expected: (f64, f64),
    pub predicted: (f64, f64),
    /// Euclidean distance between expected and predicted.
    pub error: f64,
}

impl Fit {
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        self.transform.apply(x, y)
    }

    pub fn provenance(&self) -> Provenance {
        self.transform.provenance()
    }

    pub fn residuals(&self, points: &[ControlPoint]) -> Vec<PointResidual> {
        points
            .iter()
            .map(|p| {
                let predicted = self.apply(p.source_x, p.source_y);
                let error = (predicted.0 - p.dest_x).hypot(predicted.1 - p.dest_y);
                PointResidual {
                    expected: (p.dest_x, p.dest_y),
                    predicted,
                    error,
                }
            })
            .collect()
    }

    /// Mean Euclidean error over the given points.
    pub fn mean_error(&self, points: &[ControlPoint]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let residuals = self.residuals(points);
        residuals.iter().map(|r| r.error).sum::<f64>() / residuals.len() as f64
    }
}

/// Fit a transform to the control points.
///
/// Exactly two points give a scale/offset fit, three or more an affine
/// least-squares fit.
pub fn estimate(points: &[ControlPoint]) -> Result<Fit> {
    let transform = match points.len() {
        n if n < MIN_CONTROL_POINTS => {
            return Err(MobmapError::InsufficientPoints {
                found: n,
                required: MIN_CONTROL_POINTS,
            });
        }
        2 => fit_scale_offset(&points[0], &points[1])?,
        _ => fit_affine(points)?,
    };

    let rmse = match transform {
        Transform::ScaleOffset { .. } => 0.0,
        Transform::Affine { .. } => rms_residual(&transform, points),
    };

    tracing::debug!(
        "Fitted {} transform over {} points (rmse {:.6})",
        transform.provenance(),
        points.len(),
        rmse
    );

    Ok(Fit {
        transform,
        rmse,
        points_used: points.len(),
    })
}

fn fit_scale_offset(p1: &ControlPoint, p2: &ControlPoint) -> Result<Transform> {
    let delta_source_x = p2.source_x - p1.source_x;
    let delta_source_y = p2.source_y - p1.source_y;

    if delta_source_x == 0.0 || delta_source_y == 0.0 {
        return Err(MobmapError::DegenerateControlPoints(format!(
            "two-point fit needs distinct source x and y values, got deltas ({}, {})",
            delta_source_x, delta_source_y
        )));
    }

    let scale_x = (p2.dest_x - p1.dest_x) / delta_source_x;
    let scale_y = (p2.dest_y - p1.dest_y) / delta_source_y;

    Ok(Transform::ScaleOffset {
        scale_x,
        scale_y,
        offset_x: p1.dest_x - scale_x * p1.source_x,
        offset_y: p1.dest_y - scale_y * p1.source_y,
    })
}

/// Least squares over the stacked 2n x 6 system.
///
/// The system is block diagonal (the x and y rows share the design matrix
/// `[sx, sy, 1]`), so it reduces to two 3x3 normal-equation solves. Centring
/// on the source centroid removes the translation column, leaving one shared
/// 2x2 matrix, which keeps precision with source values in the hundreds of
/// thousands.
fn fit_affine(points: &[ControlPoint]) -> Result<Transform> {
    let n = points.len() as f64;
    let mean = |f: fn(&ControlPoint) -> f64| points.iter().map(f).sum::<f64>() / n;

    let mean_sx = mean(|p| p.source_x);
    let mean_sy = mean(|p| p.source_y);
    let mean_dx = mean(|p| p.dest_x);
    let mean_dy = mean(|p| p.dest_y);

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    let (mut sx_dx, mut sy_dx, mut sx_dy, mut sy_dy) = (0.0, 0.0, 0.0, 0.0);

    for p in points {
        let sx = p.source_x - mean_sx;
        let sy = p.source_y - mean_sy;
        let dx = p.dest_x - mean_dx;
        let dy = p.dest_y - mean_dy;

        sxx += sx * sx;
        sxy += sx * sy;
        syy += sy * sy;
        sx_dx += sx * dx;
        sy_dx += sy * dx;
        sx_dy += sx * dy;
        sy_dy += sy * dy;
    }

    let det = sxx * syy - sxy * sxy;
    if sxx == 0.0 || syy == 0.0 || det.abs() <= COLLINEAR_TOLERANCE * sxx * syy {
        return Err(MobmapError::DegenerateControlPoints(format!(
            "{} source points are collinear or coincident",
            points.len()
        )));
    }

    let (a, b) = solve_2x2(sxx, sxy, syy, det, sx_dx, sy_dx);
    let (c, d) = solve_2x2(sxx, sxy, syy, det, sx_dy, sy_dy);

    Ok(Transform::Affine {
        a,
        b,
        c,
        d,
        tx: mean_dx - a * mean_sx - b * mean_sy,
        ty: mean_dy - c * mean_sx - d * mean_sy,
    })
}

/// Solve `[[sxx, sxy], [sxy, syy]] * [u, v] = [r0, r1]`.
fn solve_2x2(sxx: f64, sxy: f64, syy: f64, det: f64, r0: f64, r1: f64) -> (f64, f64) {
    ((syy * r0 - sxy * r1) / det, (sxx * r1 - sxy * r0) / det)
}

fn rms_residual(transform: &Transform, points: &[ControlPoint]) -> f64 {
    let sum_sq: f64 = points
        .iter()
        .map(|p| {
            let (px, py) = transform.apply(p.source_x, p.source_y);
            (px - p.dest_x).powi(2) + (py - p.dest_y).powi(2)
        })
        .sum();
    (sum_sq / (2 * points.len()) as f64).sqrt()
}

/// A mob whose map position will be (re)computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedMob {
    pub id: Option<i64>,
    pub name: String,
    pub coords: MapCoords,
    pub previous: Option<MapCoords>,
}

/// What applying a fit to the stored mobs would do.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectionPlan {
    pub updates: Vec<ProjectedMob>,
    /// Mobs whose existing map position is kept.
    pub kept: Vec<String>,
    /// Mobs without both game-world x and y.
    pub unprojectable: Vec<String>,
}

/// Decide which mobs get map coordinates from `fit`.
///
/// Mobs without map coordinates are always projected. Mobs that already have
/// them keep them, unless `overwrite_derived` is set and the stored value came
/// from an earlier fit. Manually placed positions are never replaced.
pub fn plan_projection(fit: &Fit, mobs: &[MobRecord], overwrite_derived: bool) -> ProjectionPlan {
    let mut plan = ProjectionPlan::default();

    for mob in mobs {
        if let Some(existing) = &mob.map_coords {
            if !(overwrite_derived && existing.provenance.is_derived()) {
                plan.kept.push(mob.name.clone());
                continue;
            }
        }

        match fit.transform.apply_coords(&mob.location) {
            Some((lat, lng)) => plan.updates.push(ProjectedMob {
                id: mob.id,
                name: mob.name.clone(),
                coords: MapCoords {
                    lat,
                    lng,
                    provenance: fit.provenance(),
                },
                previous: mob.map_coords.clone(),
            }),
            None => plan.unprojectable.push(mob.name.clone()),
        }
    }

    plan
}
