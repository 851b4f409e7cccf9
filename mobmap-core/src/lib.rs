//! Core library for the named-mob map toolkit.

pub mod classify;
pub mod config;
pub mod control_points;
pub mod database;
pub mod error;
pub mod feed;
pub mod file_utils;
pub mod merge;
pub mod models;
pub mod report;
pub mod transform;

pub use error::{MobmapError, Result};
pub use merge::{MergeRecord, MergeReport, OwnedFields, merge};
pub use transform::{ControlPoint, Fit, Transform, estimate};
