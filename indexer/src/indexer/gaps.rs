//! Missing-height detection

use sqlx::SqlitePool;

use crate::database::queries::GapQueries;
use crate::database::Database;
use crate::error::Result;
use crate::models::MissingRange;

pub struct GapDetector {
    pool: SqlitePool,
}

impl GapDetector {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    /// Every missing range below the stored tip, lowest first. Empty when
    /// the mirror is contiguous from genesis.
    pub async fn detect_missing(&self) -> Result<Vec<MissingRange>> {
        GapQueries::missing_ranges(&self.pool).await
    }
}
