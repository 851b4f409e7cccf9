use thiserror::Error;

#[derive(Error, Debug)]
pub enum MobmapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Need at least {required} control points, got {found}")]
    InsufficientPoints { found: usize, required: usize },

    #[error("Degenerate control points: {0}")]
    DegenerateControlPoints(String),

    #[error("Ambiguous match for '{label}': {}", candidates.join(", "))]
    AmbiguousMatch { label: String, candidates: Vec<String> },
}

pub type Result<T> = std::result::Result<T, MobmapError>;
