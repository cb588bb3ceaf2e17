//! Loan records repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{LoanRecord, LoanStatus, NewLoanRecord},
};

use super::LoanStore;

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoanStore for LoansRepository {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<LoanRecord>> {
        let loan = sqlx::query_as::<_, LoanRecord>("SELECT * FROM loan_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn find_by_borrower(&self, borrower_id: &str) -> AppResult<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM loan_records WHERE borrower_id = $1 ORDER BY borrowed_at",
        )
        .bind(borrower_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn find_by_borrower_and_status(
        &self,
        borrower_id: &str,
        status: LoanStatus,
    ) -> AppResult<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            r#"
            SELECT * FROM loan_records
            WHERE borrower_id = $1 AND status = $2
            ORDER BY borrowed_at
            "#,
        )
        .bind(borrower_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn find_by_status(&self, status: LoanStatus) -> AppResult<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM loan_records WHERE status = $1 ORDER BY due_at",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn find_by_book(&self, book_id: &str) -> AppResult<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM loan_records WHERE book_id = $1 ORDER BY borrowed_at",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn find_all(&self) -> AppResult<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM loan_records ORDER BY borrowed_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loan_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert(&self, loan: NewLoanRecord, max_active: i32) -> AppResult<LoanRecord> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        // Borrows by the same borrower queue on this row lock until commit
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(&loan.borrower_id)
            .fetch_optional(&mut *tx)
            .await?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loan_records WHERE borrower_id = $1 AND status = $2",
        )
        .bind(&loan.borrower_id)
        .bind(LoanStatus::Borrowed)
        .fetch_one(&mut *tx)
        .await?;

        if active >= i64::from(max_active) {
            return Err(AppError::LimitExceeded {
                current: active as usize,
                max: max_active,
            });
        }

        let record = sqlx::query_as::<_, LoanRecord>(
            r#"
            INSERT INTO loan_records (
                id, borrower_id, borrower_name, book_id, book_title,
                borrowed_at, due_at, returned_at, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, $6)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&loan.borrower_id)
        .bind(&loan.borrower_name)
        .bind(&loan.book_id)
        .bind(&loan.book_title)
        .bind(loan.borrowed_at)
        .bind(loan.due_at)
        .bind(LoanStatus::Borrowed)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            // uq_loan_records_active
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::AlreadyBorrowed,
            other => AppError::Database(other),
        })?;

        tx.commit().await?;
        Ok(record)
    }

    async fn update_if_status(
        &self,
        record: &LoanRecord,
        expected: LoanStatus,
    ) -> AppResult<Option<LoanRecord>> {
        let updated = sqlx::query_as::<_, LoanRecord>(
            r#"
            UPDATE loan_records
            SET due_at = $2, returned_at = $3, status = $4
            WHERE id = $1 AND status = $5
            RETURNING *
            "#,
        )
        .bind(&record.id)
        .bind(record.due_at)
        .bind(record.returned_at)
        .bind(record.status)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn mark_overdue(&self, ids: &[String], now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let flagged = sqlx::query_as::<_, LoanRecord>(
            r#"
            UPDATE loan_records
            SET status = $2
            WHERE id = ANY($1) AND status = $3 AND due_at < $4
            RETURNING *
            "#,
        )
        .bind(ids)
        .bind(LoanStatus::Overdue)
        .bind(LoanStatus::Borrowed)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(flagged)
    }
}
