//! Statistics service

use chrono::Utc;

use crate::{
    error::{AppError, AppResult, Entity},
    models::{
        loan::{BorrowerStatistics, LoanStatistics},
        Borrower, LoanRecord, LoanStatus,
    },
    repository::Repository,
};

/// Average used until a borrower has returned at least one book
const DEFAULT_AVG_BORROW_DAYS: i64 = 30;

#[derive(Clone)]
pub struct StatsService {
    repository: Repository,
}

impl StatsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Library-wide loan counters.
    ///
    /// Read-only: past-due loans are counted as overdue without being
    /// flagged. A store failure is reported as an error, never as zeros.
    pub async fn loan_statistics(&self) -> AppResult<LoanStatistics> {
        let result = self.count_loans().await;
        if let Err(e) = &result {
            tracing::error!("Failed to compute loan statistics: {}", e);
        }
        result
    }

    async fn count_loans(&self) -> AppResult<LoanStatistics> {
        let loans = &self.repository.loans;
        let now = Utc::now();

        let total = loans.count().await?;
        let borrowed = loans.find_by_status(LoanStatus::Borrowed).await?;
        let returned = loans.find_by_status(LoanStatus::Returned).await?;

        Ok(LoanStatistics {
            total,
            current: borrowed.len() as i64,
            overdue: borrowed.iter().filter(|l| l.is_past_due(now)).count() as i64,
            returned: returned.len() as i64,
        })
    }

    /// Lending history summary of one borrower
    pub async fn borrower_statistics(&self, borrower_id: &str) -> AppResult<BorrowerStatistics> {
        let borrower = self
            .repository
            .users
            .find_by_id(borrower_id)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::Borrower, borrower_id))?;

        let records = self.repository.loans.find_by_borrower(borrower_id).await?;
        Ok(summarize(&borrower, &records))
    }
}

fn summarize(borrower: &Borrower, records: &[LoanRecord]) -> BorrowerStatistics {
    let with_status = |status: LoanStatus| records.iter().filter(|r| r.status == status).count() as i64;

    let kept_days: Vec<i64> = records.iter().filter_map(LoanRecord::borrow_days).collect();
    let avg_borrow_days = if kept_days.is_empty() {
        DEFAULT_AVG_BORROW_DAYS
    } else {
        kept_days.iter().sum::<i64>() / kept_days.len() as i64
    };

    let borrow_dates = || records.iter().map(|r| r.borrowed_at.date_naive());

    BorrowerStatistics {
        borrower_id: borrower.id.clone(),
        username: borrower.username.clone(),
        max_borrow: borrower.max_borrow,
        current: with_status(LoanStatus::Borrowed),
        overdue: with_status(LoanStatus::Overdue),
        total: records.len() as i64,
        returned: with_status(LoanStatus::Returned),
        avg_borrow_days,
        last_borrow_date: borrow_dates().max(),
        first_borrow_date: borrow_dates().min(),
    }
}
