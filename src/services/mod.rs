//! Business logic services

pub mod loans;
pub mod stats;

use crate::{config::LoansConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
    pub stats: stats::StatsService,
    repository: Repository,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(repository: Repository, loans_config: LoansConfig) -> Self {
        Self {
            loans: loans::LoansService::new(repository.clone(), loans_config),
            stats: stats::StatsService::new(repository.clone()),
            repository,
        }
    }

    /// Round-trip to the loan store, used by the readiness probe
    pub async fn ping(&self) -> crate::error::AppResult<()> {
        self.repository.loans.count().await.map(|_| ())
    }
}
