//! Grievance recording with best-effort embeddings.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::grievance::Grievance;
use crate::persistence::grievance_repo::GrievanceRepo;
use crate::rpc::Reasoner;

/// Records failures for later prompt context.
#[derive(Clone)]
pub struct GrievanceLog {
    repo: GrievanceRepo,
    reasoner: Arc<dyn Reasoner>,
}

impl GrievanceLog {
    /// Create a log writing through `repo`, embedding with `reasoner`.
    #[must_use]
    pub fn new(repo: GrievanceRepo, reasoner: Arc<dyn Reasoner>) -> Self {
        Self { repo, reasoner }
    }

    /// Underlying repository.
    #[must_use]
    pub fn repo(&self) -> &GrievanceRepo {
        &self.repo
    }

    /// Record a grievance. Never fails; storage errors are logged.
    ///
    /// The embedding is omitted when the backend cannot produce one.
    pub async fn record(&self, source: &str, content: &str) {
        let embedding = match self.reasoner.embed(content).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                debug!(%err, "grievance stored without embedding");
                None
            }
        };

        let grievance = Grievance::new(source, content, embedding);
        warn!(source, content, "grievance recorded");
        if let Err(err) = self.repo.record(&grievance).await {
            warn!(%err, "failed to store grievance");
        }
    }
}
