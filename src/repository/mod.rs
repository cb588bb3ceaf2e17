//! Repository layer: store contracts used by the lending workflow
//!
//! Each store is an object-safe async trait so the services can run against
//! PostgreSQL in production and the in-memory store in development and tests.

pub mod books;
pub mod loans;
pub mod memory;
pub mod users;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{Book, Borrower, LoanRecord, LoanStatus, NewLoanRecord},
};

/// Book inventory: lookups plus atomic copy-count updates
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Book>>;

    /// Take one copy if any is available. `None` when the book is missing
    /// or has no copies left.
    async fn decrement_available(&self, id: &str) -> AppResult<Option<Book>>;

    /// Put one copy back, never exceeding `total_copies`. `None` when the
    /// book is missing.
    async fn increment_available(&self, id: &str) -> AppResult<Option<Book>>;
}

/// Read-only view of registered borrowers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Borrower>>;
}

/// Persistence of loan records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<LoanRecord>>;

    async fn find_by_borrower(&self, borrower_id: &str) -> AppResult<Vec<LoanRecord>>;

    async fn find_by_borrower_and_status(
        &self,
        borrower_id: &str,
        status: LoanStatus,
    ) -> AppResult<Vec<LoanRecord>>;

    async fn find_by_status(&self, status: LoanStatus) -> AppResult<Vec<LoanRecord>>;

    async fn find_by_book(&self, book_id: &str) -> AppResult<Vec<LoanRecord>>;

    async fn find_all(&self) -> AppResult<Vec<LoanRecord>>;

    async fn count(&self) -> AppResult<i64>;

    /// Persist a new record and return it with its assigned id.
    ///
    /// The borrower's `BORROWED` records are counted in the same atomic step:
    /// fails with `LimitExceeded` when they already hold `max_active`, and
    /// with `AlreadyBorrowed` if they already have this book.
    async fn insert(&self, loan: NewLoanRecord, max_active: i32) -> AppResult<LoanRecord>;

    /// Write `record` only if the stored status is still `expected`.
    /// `None` means the record is gone or another writer moved it first.
    async fn update_if_status(
        &self,
        record: &LoanRecord,
        expected: LoanStatus,
    ) -> AppResult<Option<LoanRecord>>;

    /// Flag the given `BORROWED` records that are due before `now` as
    /// `OVERDUE`. Returns the records that changed.
    async fn mark_overdue(&self, ids: &[String], now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>>;
}

/// Main repository struct holding the three stores
#[derive(Clone)]
pub struct Repository {
    pub books: Arc<dyn BookStore>,
    pub users: Arc<dyn UserDirectory>,
    pub loans: Arc<dyn LoanStore>,
}

impl Repository {
    /// Create a PostgreSQL-backed repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: Arc::new(books::BooksRepository::new(pool.clone())),
            users: Arc::new(users::UsersRepository::new(pool.clone())),
            loans: Arc::new(loans::LoansRepository::new(pool)),
        }
    }

    /// Create a repository where all stores share one in-memory state
    pub fn in_memory(store: memory::MemoryStore) -> Self {
        Self {
            books: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            loans: Arc::new(store),
        }
    }

    pub fn from_stores(
        books: Arc<dyn BookStore>,
        users: Arc<dyn UserDirectory>,
        loans: Arc<dyn LoanStore>,
    ) -> Self {
        Self { books, users, loans }
    }
}
