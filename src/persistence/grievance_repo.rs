//! Grievance repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::grievance::Grievance;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for recorded failure events.
#[derive(Clone)]
pub struct GrievanceRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct GrievanceRow {
    id: String,
    source: String,
    content: String,
    embedding: Option<String>,
    created_at: String,
}

impl GrievanceRow {
    fn into_grievance(self) -> Result<Grievance> {
        let embedding = match self.embedding {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| AppError::Db(format!("invalid embedding: {e}")))?,
            ),
            None => None,
        };
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Grievance {
            id: self.id,
            source: self.source,
            content: self.content,
            embedding,
            created_at,
        })
    }
}

impl GrievanceRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a grievance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn record(&self, grievance: &Grievance) -> Result<()> {
        let embedding = grievance
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO grievance (id, source, content, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&grievance.id)
        .bind(&grievance.source)
        .bind(&grievance.content)
        .bind(embedding)
        .bind(grievance.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// The newest `limit` grievances, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn recent(&self, limit: u32) -> Result<Vec<Grievance>> {
        let rows: Vec<GrievanceRow> = sqlx::query_as(
            "SELECT id, source, content, embedding, created_at FROM grievance
             ORDER BY created_at DESC
             LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(GrievanceRow::into_grievance).collect()
    }

    /// Delete grievances created before `before`.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM grievance WHERE created_at < ?1")
            .bind(before.to_rfc3339())
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
