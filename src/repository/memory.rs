//! In-memory store used for development and tests.
//!
//! All three store traits share one lock, so every conditional update below
//! is atomic in the same way a single SQL statement is.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Book, Borrower, LoanRecord, LoanStatus, NewLoanRecord, Role},
};

use super::{BookStore, LoanStore, UserDirectory};

#[derive(Default)]
struct State {
    books: HashMap<String, Book>,
    users: HashMap<String, Borrower>,
    /// Insertion order doubles as creation order
    loans: Vec<LoanRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the accounts and titles of a fresh installation
    pub async fn with_demo_data() -> Self {
        let store = Self::new();

        store
            .insert_borrower(Borrower {
                id: "admin".to_string(),
                username: "admin".to_string(),
                role: Role::Admin,
                max_borrow: 99,
            })
            .await;
        store
            .insert_borrower(Borrower {
                id: "librarian".to_string(),
                username: "librarian".to_string(),
                role: Role::Admin,
                max_borrow: 10,
            })
            .await;
        for reader in ["testuser", "reader1", "reader2", "reader3"] {
            store.insert_borrower(Borrower::reader(reader, reader, 5)).await;
        }

        let titles = [
            ("book-1", "The Left Hand of Darkness", 3),
            ("book-2", "Dune", 2),
            ("book-3", "Foundation", 1),
            ("book-4", "Solaris", 4),
        ];
        for (id, title, copies) in titles {
            store.insert_book(Book::new(id, title, copies)).await;
        }

        store
    }

    pub async fn insert_book(&self, book: Book) {
        self.state.write().await.books.insert(book.id.clone(), book);
    }

    pub async fn insert_borrower(&self, borrower: Borrower) {
        self.state
            .write()
            .await
            .users
            .insert(borrower.id.clone(), borrower);
    }

    /// Insert or overwrite a loan record as-is, bypassing workflow rules
    pub async fn put_loan(&self, record: LoanRecord) {
        let mut state = self.state.write().await;
        match state.loans.iter_mut().find(|l| l.id == record.id) {
            Some(existing) => *existing = record,
            None => state.loans.push(record),
        }
    }

    fn filter_loans<F>(state: &State, predicate: F) -> Vec<LoanRecord>
    where
        F: Fn(&LoanRecord) -> bool,
    {
        state.loans.iter().filter(|l| predicate(l)).cloned().collect()
    }
}

#[async_trait]
impl BookStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Book>> {
        Ok(self.state.read().await.books.get(id).cloned())
    }

    async fn decrement_available(&self, id: &str) -> AppResult<Option<Book>> {
        let mut state = self.state.write().await;
        Ok(state
            .books
            .get_mut(id)
            .filter(|book| book.available_copies > 0)
            .map(|book| {
                book.available_copies -= 1;
                book.clone()
            }))
    }

    async fn increment_available(&self, id: &str) -> AppResult<Option<Book>> {
        let mut state = self.state.write().await;
        Ok(state.books.get_mut(id).map(|book| {
            book.available_copies = (book.available_copies + 1).min(book.total_copies);
            book.clone()
        }))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Borrower>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<LoanRecord>> {
        let state = self.state.read().await;
        Ok(state.loans.iter().find(|l| l.id == id).cloned())
    }

    async fn find_by_borrower(&self, borrower_id: &str) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.read().await;
        Ok(Self::filter_loans(&state, |l| l.borrower_id == borrower_id))
    }

    async fn find_by_borrower_and_status(
        &self,
        borrower_id: &str,
        status: LoanStatus,
    ) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.read().await;
        Ok(Self::filter_loans(&state, |l| {
            l.borrower_id == borrower_id && l.status == status
        }))
    }

    async fn find_by_status(&self, status: LoanStatus) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.read().await;
        let mut loans = Self::filter_loans(&state, |l| l.status == status);
        loans.sort_by_key(|l| l.due_at);
        Ok(loans)
    }

    async fn find_by_book(&self, book_id: &str) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.read().await;
        Ok(Self::filter_loans(&state, |l| l.book_id == book_id))
    }

    async fn find_all(&self) -> AppResult<Vec<LoanRecord>> {
        Ok(self.state.read().await.loans.clone())
    }

    async fn count(&self) -> AppResult<i64> {
        Ok(self.state.read().await.loans.len() as i64)
    }

    async fn insert(&self, loan: NewLoanRecord, max_active: i32) -> AppResult<LoanRecord> {
        let mut state = self.state.write().await;

        let active: Vec<&LoanRecord> = state
            .loans
            .iter()
            .filter(|l| l.status == LoanStatus::Borrowed && l.borrower_id == loan.borrower_id)
            .collect();

        if active.len() as i64 >= i64::from(max_active) {
            return Err(AppError::LimitExceeded {
                current: active.len(),
                max: max_active,
            });
        }
        if active.iter().any(|l| l.book_id == loan.book_id) {
            return Err(AppError::AlreadyBorrowed);
        }

        let record = loan.into_record(Uuid::new_v4().to_string());
        state.loans.push(record.clone());
        Ok(record)
    }

    async fn update_if_status(
        &self,
        record: &LoanRecord,
        expected: LoanStatus,
    ) -> AppResult<Option<LoanRecord>> {
        let mut state = self.state.write().await;
        Ok(state
            .loans
            .iter_mut()
            .find(|l| l.id == record.id && l.status == expected)
            .map(|stored| {
                stored.due_at = record.due_at;
                stored.returned_at = record.returned_at;
                stored.status = record.status;
                stored.clone()
            }))
    }

    async fn mark_overdue(&self, ids: &[String], now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>> {
        let mut state = self.state.write().await;
        let mut flagged = Vec::new();
        for loan in state.loans.iter_mut() {
            if ids.contains(&loan.id) && loan.is_past_due(now) {
                loan.status = LoanStatus::Overdue;
                flagged.push(loan.clone());
            }
        }
        Ok(flagged)
    }
}
