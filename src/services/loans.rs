//! Loan workflow service: borrow, return, renew and overdue tracking

use chrono::{Duration, Utc};

use crate::{
    config::LoansConfig,
    error::{AppError, AppResult, Entity},
    models::{loan::OverdueReport, LoanRecord, LoanStatus, NewLoanRecord},
    repository::Repository,
};

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    config: LoansConfig,
}

impl LoansService {
    pub fn new(repository: Repository, config: LoansConfig) -> Self {
        Self { repository, config }
    }

    fn loan_period(&self) -> Duration {
        Duration::days(self.config.duration_days)
    }

    fn renewal_period(&self) -> Duration {
        Duration::days(self.config.renewal_days)
    }

    /// Get a loan record by ID
    pub async fn get_loan(&self, loan_id: &str) -> AppResult<LoanRecord> {
        self.repository
            .loans
            .find_by_id(loan_id)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::Loan, loan_id))
    }

    /// Borrow a book.
    ///
    /// Checks run in a fixed order and the first failing one decides the
    /// error: borrower exists, book exists, a copy is available, the borrower
    /// is under their limit, and the borrower does not already hold this book.
    /// Nothing is written before all of them pass. The store repeats the limit
    /// and duplicate checks atomically with the insert, and the copy is given
    /// back if that insert is refused.
    pub async fn borrow(&self, borrower_id: &str, book_id: &str) -> AppResult<LoanRecord> {
        let borrower = self
            .repository
            .users
            .find_by_id(borrower_id)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::Borrower, borrower_id))?;

        let book = self
            .repository
            .books
            .find_by_id(book_id)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::Book, book_id))?;

        if !book.is_available() {
            tracing::warn!(book_id, "Borrow rejected: no copies available");
            return Err(AppError::OutOfStock);
        }

        let current = self
            .repository
            .loans
            .find_by_borrower_and_status(borrower_id, LoanStatus::Borrowed)
            .await?;

        if current.len() as i64 >= i64::from(borrower.max_borrow) {
            tracing::warn!(borrower_id, "Borrow rejected: loan limit reached");
            return Err(AppError::LimitExceeded {
                current: current.len(),
                max: borrower.max_borrow,
            });
        }

        if current.iter().any(|loan| loan.book_id == book_id) {
            return Err(AppError::AlreadyBorrowed);
        }

        // Conditional decrement: a concurrent borrower may have taken the last copy
        if self
            .repository
            .books
            .decrement_available(book_id)
            .await?
            .is_none()
        {
            return Err(AppError::OutOfStock);
        }

        let now = Utc::now();
        let new_loan = NewLoanRecord {
            borrower_id: borrower.id,
            borrower_name: borrower.username,
            book_id: book.id,
            book_title: book.title,
            borrowed_at: now,
            due_at: now + self.loan_period(),
        };

        match self
            .repository
            .loans
            .insert(new_loan, borrower.max_borrow)
            .await
        {
            Ok(loan) => {
                tracing::info!(
                    loan_id = %loan.id,
                    borrower_id,
                    book_id,
                    due_at = %loan.due_at,
                    "Book borrowed"
                );
                Ok(loan)
            }
            Err(e) => {
                if let Err(restore_err) = self.repository.books.increment_available(book_id).await {
                    tracing::error!(
                        book_id,
                        "Failed to restore copy after loan insert failure: {}",
                        restore_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Return a borrowed or overdue book and put the copy back on the shelf.
    ///
    /// If the copy cannot be put back, the loan is moved back to its previous
    /// status so the return can be retried.
    pub async fn return_book(&self, loan_id: &str) -> AppResult<LoanRecord> {
        let original = self.get_loan(loan_id).await?;
        let mut loan = original.clone();
        let previous = loan.mark_returned(Utc::now())?;

        let loan = match self.repository.loans.update_if_status(&loan, previous).await? {
            Some(loan) => loan,
            None => return Err(self.lost_transition(loan_id, "return").await),
        };

        let restored = match self.repository.books.increment_available(&loan.book_id).await {
            Ok(book) => book,
            Err(e) => {
                // RETURNED is terminal, so nobody else can have moved the record since
                if let Err(revert_err) = self
                    .repository
                    .loans
                    .update_if_status(&original, LoanStatus::Returned)
                    .await
                {
                    tracing::error!(
                        loan_id,
                        "Failed to revert return after inventory update failure: {}",
                        revert_err
                    );
                }
                return Err(e);
            }
        };

        match restored {
            Some(book) => tracing::debug!(
                book_id = %book.id,
                available = book.available_copies,
                "Copy returned to inventory"
            ),
            None => tracing::warn!(
                book_id = %loan.book_id,
                "Returned book no longer exists, copy count not updated"
            ),
        }

        tracing::info!(loan_id, borrower_id = %loan.borrower_id, "Book returned");
        Ok(loan)
    }

    /// Extend the due date of a borrowed book by one renewal period
    pub async fn renew(&self, loan_id: &str) -> AppResult<LoanRecord> {
        let mut loan = self.get_loan(loan_id).await?;
        let expected = loan.extend_due_date(self.renewal_period())?;

        let loan = match self.repository.loans.update_if_status(&loan, expected).await? {
            Some(loan) => loan,
            None => return Err(self.lost_transition(loan_id, "renew").await),
        };

        tracing::info!(loan_id, due_at = %loan.due_at, "Loan renewed");
        Ok(loan)
    }

    /// Build the error for a conditional write that found the record changed
    async fn lost_transition(&self, loan_id: &str, action: &'static str) -> AppError {
        match self.get_loan(loan_id).await {
            Ok(current) => AppError::InvalidState {
                status: current.status,
                action,
            },
            Err(e) => e,
        }
    }

    /// `BORROWED` records whose due date has passed. Read-only.
    pub async fn overdue_candidates(&self) -> AppResult<Vec<LoanRecord>> {
        let now = Utc::now();
        let borrowed = self
            .repository
            .loans
            .find_by_status(LoanStatus::Borrowed)
            .await?;

        Ok(borrowed
            .into_iter()
            .filter(|loan| loan.is_past_due(now))
            .collect())
    }

    /// Flag the given records as `OVERDUE`; ids that are not past due
    /// `BORROWED` records are left alone
    pub async fn mark_overdue(&self, ids: &[String]) -> AppResult<Vec<LoanRecord>> {
        let flagged = self
            .repository
            .loans
            .mark_overdue(ids, Utc::now())
            .await?;

        if !flagged.is_empty() {
            tracing::info!(count = flagged.len(), "Loans flagged overdue");
        }
        Ok(flagged)
    }

    /// Find past-due loans and flag them in one call.
    ///
    /// This writes: every record returned has just been moved to `OVERDUE`.
    /// Use [`Self::overdue_candidates`] for a side-effect free listing.
    pub async fn list_overdue(&self) -> AppResult<Vec<LoanRecord>> {
        let ids: Vec<String> = self
            .overdue_candidates()
            .await?
            .into_iter()
            .map(|loan| loan.id)
            .collect();

        self.mark_overdue(&ids).await
    }

    /// Past-due and already flagged loans with their days overdue
    pub async fn overdue_report(&self) -> AppResult<OverdueReport> {
        let mut records = self.overdue_candidates().await?;
        records.extend(
            self.repository
                .loans
                .find_by_status(LoanStatus::Overdue)
                .await?,
        );
        records.sort_by_key(|loan| loan.due_at);

        Ok(OverdueReport::build(records, Utc::now()))
    }

    /// All loan records of a borrower
    pub async fn borrower_records(&self, borrower_id: &str) -> AppResult<Vec<LoanRecord>> {
        self.ensure_borrower(borrower_id).await?;
        self.repository.loans.find_by_borrower(borrower_id).await
    }

    /// Loans a borrower currently holds
    pub async fn current_borrows(&self, borrower_id: &str) -> AppResult<Vec<LoanRecord>> {
        self.ensure_borrower(borrower_id).await?;
        self.repository
            .loans
            .find_by_borrower_and_status(borrower_id, LoanStatus::Borrowed)
            .await
    }

    pub async fn all_records(&self) -> AppResult<Vec<LoanRecord>> {
        self.repository.loans.find_all().await
    }

    /// Lending history of a book; records outlive the catalog entry
    pub async fn book_records(&self, book_id: &str) -> AppResult<Vec<LoanRecord>> {
        self.repository.loans.find_by_book(book_id).await
    }

    async fn ensure_borrower(&self, borrower_id: &str) -> AppResult<()> {
        self.repository
            .users
            .find_by_id(borrower_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(Entity::Borrower, borrower_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::DateTime;

    use crate::{
        models::{Book, Borrower},
        repository::{memory::MemoryStore, BookStore, LoanStore, MockBookStore},
    };
    use tokio_test::assert_err;

    /// Hands control back to the scheduler after the reads `borrow` checks,
    /// so two borrows joined together both pass their checks before writing.
    struct Interleaved(MemoryStore);

    #[async_trait]
    impl BookStore for Interleaved {
        async fn find_by_id(&self, id: &str) -> AppResult<Option<Book>> {
            let book = BookStore::find_by_id(&self.0, id).await;
            tokio::task::yield_now().await;
            book
        }

        async fn decrement_available(&self, id: &str) -> AppResult<Option<Book>> {
            self.0.decrement_available(id).await
        }

        async fn increment_available(&self, id: &str) -> AppResult<Option<Book>> {
            self.0.increment_available(id).await
        }
    }

    #[async_trait]
    impl LoanStore for Interleaved {
        async fn find_by_id(&self, id: &str) -> AppResult<Option<LoanRecord>> {
            LoanStore::find_by_id(&self.0, id).await
        }

        async fn find_by_borrower(&self, borrower_id: &str) -> AppResult<Vec<LoanRecord>> {
            self.0.find_by_borrower(borrower_id).await
        }

        async fn find_by_borrower_and_status(
            &self,
            borrower_id: &str,
            status: LoanStatus,
        ) -> AppResult<Vec<LoanRecord>> {
            let loans = self.0.find_by_borrower_and_status(borrower_id, status).await;
            tokio::task::yield_now().await;
            loans
        }

        async fn find_by_status(&self, status: LoanStatus) -> AppResult<Vec<LoanRecord>> {
            self.0.find_by_status(status).await
        }

        async fn find_by_book(&self, book_id: &str) -> AppResult<Vec<LoanRecord>> {
            self.0.find_by_book(book_id).await
        }

        async fn find_all(&self) -> AppResult<Vec<LoanRecord>> {
            self.0.find_all().await
        }

        async fn count(&self) -> AppResult<i64> {
            self.0.count().await
        }

        async fn insert(&self, loan: NewLoanRecord, max_active: i32) -> AppResult<LoanRecord> {
            self.0.insert(loan, max_active).await
        }

        async fn update_if_status(
            &self,
            record: &LoanRecord,
            expected: LoanStatus,
        ) -> AppResult<Option<LoanRecord>> {
            self.0.update_if_status(record, expected).await
        }

        async fn mark_overdue(
            &self,
            ids: &[String],
            now: DateTime<Utc>,
        ) -> AppResult<Vec<LoanRecord>> {
            self.0.mark_overdue(ids, now).await
        }
    }

    fn interleaved_service(store: &MemoryStore) -> LoansService {
        let shared = Arc::new(Interleaved(store.clone()));
        LoansService::new(
            Repository::from_stores(shared.clone(), Arc::new(store.clone()), shared),
            LoansConfig::default(),
        )
    }

    async fn setup() -> (LoansService, MemoryStore) {
        let store = MemoryStore::new();
        store.insert_borrower(Borrower::reader("u1", "alice", 5)).await;
        store.insert_borrower(Borrower::reader("u2", "bob", 1)).await;
        store.insert_book(Book::new("b1", "Dune", 3)).await;
        store.insert_book(Book::new("b2", "Solaris", 1)).await;
        store
            .insert_book(Book {
                available_copies: 0,
                ..Book::new("b0", "Foundation", 2)
            })
            .await;

        let service = LoansService::new(Repository::in_memory(store.clone()), LoansConfig::default());
        (service, store)
    }

    async fn available(store: &MemoryStore, book_id: &str) -> i32 {
        BookStore::find_by_id(store, book_id)
            .await
            .unwrap()
            .map(|b| b.available_copies)
            .unwrap()
    }

    #[tokio::test]
    async fn test_borrow_creates_loan_and_takes_copy() {
        let (service, store) = setup().await;

        let loan = service.borrow("u1", "b1").await.unwrap();

        assert_eq!(loan.status, LoanStatus::Borrowed);
        assert_eq!(loan.due_at, loan.borrowed_at + Duration::days(30));
        assert_eq!(loan.borrower_name, "alice");
        assert_eq!(loan.book_title, "Dune");
        assert!(loan.returned_at.is_none());
        assert_eq!(available(&store, "b1").await, 2);
    }

    #[tokio::test]
    async fn test_borrow_checks_run_in_order() {
        let (service, _store) = setup().await;

        // Unknown borrower wins over unknown book
        assert!(matches!(
            service.borrow("nobody", "missing").await,
            Err(AppError::NotFound { entity: Entity::Borrower, .. })
        ));
        assert!(matches!(
            service.borrow("u1", "missing").await,
            Err(AppError::NotFound { entity: Entity::Book, .. })
        ));

        // Out of stock wins over the limit: u2 is at their limit of one
        service.borrow("u2", "b1").await.unwrap();
        assert!(matches!(
            service.borrow("u2", "b0").await,
            Err(AppError::OutOfStock)
        ));
        assert!(matches!(
            service.borrow("u2", "b2").await,
            Err(AppError::LimitExceeded { current: 1, max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_out_of_stock_changes_nothing() {
        let (service, store) = setup().await;

        assert!(matches!(
            service.borrow("u1", "b0").await,
            Err(AppError::OutOfStock)
        ));
        assert_eq!(available(&store, "b0").await, 0);
        assert!(service.borrower_records("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_book_cannot_be_borrowed_twice() {
        let (service, store) = setup().await;

        service.borrow("u1", "b1").await.unwrap();
        assert!(matches!(
            service.borrow("u1", "b1").await,
            Err(AppError::AlreadyBorrowed)
        ));
        assert_eq!(available(&store, "b1").await, 2);
    }

    #[tokio::test]
    async fn test_limit_counts_only_borrowed_records() {
        let (service, _store) = setup().await;

        let loan = service.borrow("u2", "b1").await.unwrap();
        service.return_book(&loan.id).await.unwrap();

        assert!(service.borrow("u2", "b2").await.is_ok());
    }

    #[tokio::test]
    async fn test_return_restores_copy() {
        let (service, store) = setup().await;

        let loan = service.borrow("u1", "b1").await.unwrap();
        let returned = service.return_book(&loan.id).await.unwrap();

        assert_eq!(returned.status, LoanStatus::Returned);
        assert!(returned.returned_at.is_some());
        assert_eq!(available(&store, "b1").await, 3);
    }

    #[tokio::test]
    async fn test_second_return_is_invalid() {
        let (service, _store) = setup().await;

        let loan = service.borrow("u1", "b1").await.unwrap();
        service.return_book(&loan.id).await.unwrap();

        let err = assert_err!(service.return_book(&loan.id).await);
        assert!(matches!(
            err,
            AppError::InvalidState { status: LoanStatus::Returned, .. }
        ));
    }

    #[tokio::test]
    async fn test_return_never_exceeds_total_copies() {
        let (service, store) = setup().await;

        let loan = service.borrow("u1", "b1").await.unwrap();
        // Someone restocked the shelf behind the workflow's back
        store.insert_book(Book::new("b1", "Dune", 3)).await;

        service.return_book(&loan.id).await.unwrap();
        assert_eq!(available(&store, "b1").await, 3);
    }

    #[tokio::test]
    async fn test_return_succeeds_when_book_was_removed() {
        let (service, store) = setup().await;
        let now = Utc::now();

        store
            .put_loan(LoanRecord {
                id: "orphan".to_string(),
                borrower_id: "u1".to_string(),
                borrower_name: "alice".to_string(),
                book_id: "deleted-book".to_string(),
                book_title: "Gone".to_string(),
                borrowed_at: now,
                due_at: now + Duration::days(30),
                returned_at: None,
                status: LoanStatus::Borrowed,
                created_at: now,
            })
            .await;

        let returned = service.return_book("orphan").await.unwrap();
        assert_eq!(returned.status, LoanStatus::Returned);
    }

    #[tokio::test]
    async fn test_overdue_loans_can_be_returned() {
        let (service, store) = setup().await;

        let mut loan = service.borrow("u1", "b1").await.unwrap();
        loan.due_at = Utc::now() - Duration::days(40);
        store.put_loan(loan.clone()).await;
        service.list_overdue().await.unwrap();

        let returned = service.return_book(&loan.id).await.unwrap();
        assert_eq!(returned.status, LoanStatus::Returned);
        assert_eq!(available(&store, "b1").await, 3);
    }

    #[tokio::test]
    async fn test_unknown_loan() {
        let (service, _store) = setup().await;

        assert!(matches!(
            service.return_book("nope").await,
            Err(AppError::NotFound { entity: Entity::Loan, .. })
        ));
        assert!(matches!(
            service.renew("nope").await,
            Err(AppError::NotFound { entity: Entity::Loan, .. })
        ));
        assert!(matches!(
            service.get_loan("nope").await,
            Err(AppError::NotFound { entity: Entity::Loan, .. })
        ));
    }

    #[tokio::test]
    async fn test_renew_keeps_extending_due_date() {
        let (service, store) = setup().await;

        let loan = service.borrow("u1", "b1").await.unwrap();
        let once = service.renew(&loan.id).await.unwrap();
        let twice = service.renew(&loan.id).await.unwrap();

        assert_eq!(once.due_at, loan.due_at + Duration::days(30));
        assert_eq!(twice.due_at, loan.due_at + Duration::days(60));
        assert_eq!(available(&store, "b1").await, 2);
    }

    #[tokio::test]
    async fn test_renew_rejects_overdue_and_returned() {
        let (service, store) = setup().await;

        let mut late = service.borrow("u1", "b1").await.unwrap();
        late.due_at = Utc::now() - Duration::days(1);
        store.put_loan(late.clone()).await;
        service.list_overdue().await.unwrap();

        assert!(matches!(
            service.renew(&late.id).await,
            Err(AppError::InvalidState { status: LoanStatus::Overdue, .. })
        ));

        let done = service.borrow("u1", "b2").await.unwrap();
        service.return_book(&done.id).await.unwrap();
        assert!(matches!(
            service.renew(&done.id).await,
            Err(AppError::InvalidState { status: LoanStatus::Returned, .. })
        ));
    }

    #[tokio::test]
    async fn test_candidates_do_not_write() {
        let (service, store) = setup().await;

        let mut loan = service.borrow("u1", "b1").await.unwrap();
        loan.due_at = Utc::now() - Duration::days(40);
        store.put_loan(loan.clone()).await;

        let candidates = service.overdue_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(service.get_loan(&loan.id).await.unwrap().status, LoanStatus::Borrowed);
    }

    #[tokio::test]
    async fn test_list_overdue_flags_once() {
        let (service, store) = setup().await;

        let mut loan = service.borrow("u1", "b1").await.unwrap();
        loan.due_at = Utc::now() - Duration::days(40);
        store.put_loan(loan.clone()).await;
        service.borrow("u1", "b2").await.unwrap();

        let overdue = service.list_overdue().await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, loan.id);
        assert_eq!(overdue[0].status, LoanStatus::Overdue);
        assert_eq!(service.get_loan(&loan.id).await.unwrap().status, LoanStatus::Overdue);

        assert!(service.list_overdue().await.unwrap().is_empty());
        assert_eq!(service.get_loan(&loan.id).await.unwrap().status, LoanStatus::Overdue);
    }

    #[tokio::test]
    async fn test_mark_overdue_ignores_current_loans() {
        let (service, _store) = setup().await;

        let loan = service.borrow("u1", "b1").await.unwrap();
        let flagged = service.mark_overdue(&[loan.id.clone(), "unknown".into()]).await.unwrap();

        assert!(flagged.is_empty());
        assert_eq!(service.get_loan(&loan.id).await.unwrap().status, LoanStatus::Borrowed);
    }

    #[tokio::test]
    async fn test_overdue_report_includes_flagged_records() {
        let (service, store) = setup().await;
        let now = Utc::now();

        let mut flagged = service.borrow("u1", "b1").await.unwrap();
        flagged.due_at = now - Duration::days(40);
        store.put_loan(flagged).await;
        service.list_overdue().await.unwrap();

        let mut pending = service.borrow("u1", "b2").await.unwrap();
        pending.due_at = now - Duration::days(3);
        store.put_loan(pending).await;

        let report = service.overdue_report().await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.over_7_days, 1);
        assert_eq!(report.over_30_days, 1);
    }

    #[tokio::test]
    async fn test_record_queries() {
        let (service, _store) = setup().await;

        let first = service.borrow("u1", "b1").await.unwrap();
        service.borrow("u1", "b2").await.unwrap();
        service.borrow("u2", "b1").await.unwrap();
        service.return_book(&first.id).await.unwrap();

        assert_eq!(service.borrower_records("u1").await.unwrap().len(), 2);
        assert_eq!(service.current_borrows("u1").await.unwrap().len(), 1);
        assert_eq!(service.book_records("b1").await.unwrap().len(), 2);
        assert_eq!(service.all_records().await.unwrap().len(), 3);
        assert!(matches!(
            service.borrower_records("ghost").await,
            Err(AppError::NotFound { entity: Entity::Borrower, .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_borrows_of_last_copy() {
        let (_, store) = setup().await;
        let service = interleaved_service(&store);

        let (first, second) = tokio::join!(service.borrow("u1", "b2"), service.borrow("u2", "b2"));

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(AppError::OutOfStock))));
        assert_eq!(available(&store, "b2").await, 0);
        assert_eq!(service.all_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_borrows_respect_limit() {
        let (_, store) = setup().await;
        let service = interleaved_service(&store);

        // bob may hold a single book
        let (first, second) = tokio::join!(service.borrow("u2", "b1"), service.borrow("u2", "b2"));

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(AppError::LimitExceeded { current: 1, max: 1 }))));
        assert_eq!(service.current_borrows("u2").await.unwrap().len(), 1);
        // The refused borrow gave its copy back
        assert_eq!(available(&store, "b1").await + available(&store, "b2").await, 3);
    }

    #[tokio::test]
    async fn test_return_is_undone_when_inventory_update_fails() {
        let (service, store) = setup().await;
        let loan = service.borrow("u1", "b2").await.unwrap();

        let mut books = MockBookStore::new();
        books
            .expect_increment_available()
            .returning(|_| Err(AppError::Internal("books store down".to_string())));
        let failing = LoansService::new(
            Repository::from_stores(
                Arc::new(books),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
            ),
            LoansConfig::default(),
        );

        assert!(matches!(
            failing.return_book(&loan.id).await,
            Err(AppError::Internal(_))
        ));
        let stored = service.get_loan(&loan.id).await.unwrap();
        assert_eq!(stored.status, LoanStatus::Borrowed);
        assert!(stored.returned_at.is_none());
        assert_eq!(available(&store, "b2").await, 0);

        let returned = service.return_book(&loan.id).await.unwrap();
        assert_eq!(returned.status, LoanStatus::Returned);
        assert_eq!(available(&store, "b2").await, 1);
    }
}
