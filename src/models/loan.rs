//! Loan record model and related types

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

/// Lifecycle state of a loan record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoanStatus {
    Borrowed,
    Returned,
    Overdue,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Borrowed => "BORROWED",
            LoanStatus::Returned => "RETURNED",
            LoanStatus::Overdue => "OVERDUE",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BORROWED" => Ok(LoanStatus::Borrowed),
            "RETURNED" => Ok(LoanStatus::Returned),
            "OVERDUE" => Ok(LoanStatus::Overdue),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

// SQLx conversion for LoanStatus (stored as TEXT)
impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// One borrowing transaction.
///
/// `borrower_name` and `book_title` are snapshots taken when the loan was
/// created and are never refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanRecord {
    pub id: String,
    pub borrower_id: String,
    pub borrower_name: String,
    pub book_id: String,
    pub book_title: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
}

impl LoanRecord {
    /// Still marked `BORROWED` although the due date has passed
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Borrowed && self.due_at < now
    }

    /// Whole days elapsed since the due date, zero when not yet due
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        (now - self.due_at).num_days().max(0)
    }

    /// Whole days the book was kept, for returned records
    pub fn borrow_days(&self) -> Option<i64> {
        self.returned_at
            .map(|returned| (returned - self.borrowed_at).num_days())
    }

    /// Close the loan. Borrowed and overdue records can both be returned.
    ///
    /// Returns the status the record had before, for the conditional write.
    pub fn mark_returned(&mut self, at: DateTime<Utc>) -> AppResult<LoanStatus> {
        match self.status {
            LoanStatus::Borrowed | LoanStatus::Overdue => {
                let previous = self.status;
                self.status = LoanStatus::Returned;
                self.returned_at = Some(at);
                Ok(previous)
            }
            LoanStatus::Returned => Err(AppError::InvalidState {
                status: self.status,
                action: "return",
            }),
        }
    }

    /// Push the due date back by `period`, counted from the current due date
    pub fn extend_due_date(&mut self, period: Duration) -> AppResult<LoanStatus> {
        if self.status != LoanStatus::Borrowed {
            return Err(AppError::InvalidState {
                status: self.status,
                action: "renew",
            });
        }
        self.due_at += period;
        Ok(LoanStatus::Borrowed)
    }
}

/// A loan about to be persisted; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewLoanRecord {
    pub borrower_id: String,
    pub borrower_name: String,
    pub book_id: String,
    pub book_title: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

impl NewLoanRecord {
    pub fn into_record(self, id: String) -> LoanRecord {
        LoanRecord {
            id,
            borrower_id: self.borrower_id,
            borrower_name: self.borrower_name,
            book_id: self.book_id,
            book_title: self.book_title,
            borrowed_at: self.borrowed_at,
            due_at: self.due_at,
            returned_at: None,
            status: LoanStatus::Borrowed,
            created_at: self.borrowed_at,
        }
    }
}

/// Library-wide loan counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct LoanStatistics {
    /// All loan records ever created
    pub total: i64,
    /// Records currently `BORROWED`
    pub current: i64,
    /// `BORROWED` records whose due date has passed
    pub overdue: i64,
    /// Records `RETURNED`
    pub returned: i64,
}

/// Lending history summary for a single borrower
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BorrowerStatistics {
    pub borrower_id: String,
    pub username: String,
    pub max_borrow: i32,
    pub current: i64,
    pub overdue: i64,
    pub total: i64,
    pub returned: i64,
    /// Mean days kept over returned loans, 30 when nothing was returned yet
    pub avg_borrow_days: i64,
    /// `None` when the borrower has no records
    pub last_borrow_date: Option<NaiveDate>,
    pub first_borrow_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OverdueEntry {
    pub loan: LoanRecord,
    pub days_overdue: i64,
}

/// Overdue loans grouped for the admin overview
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OverdueReport {
    pub entries: Vec<OverdueEntry>,
    pub total: usize,
    pub over_7_days: usize,
    pub over_30_days: usize,
}

impl OverdueReport {
    pub fn build(records: Vec<LoanRecord>, now: DateTime<Utc>) -> Self {
        let entries: Vec<OverdueEntry> = records
            .into_iter()
            .map(|loan| OverdueEntry {
                days_overdue: loan.days_overdue(now),
                loan,
            })
            .collect();

        Self {
            total: entries.len(),
            over_7_days: entries.iter().filter(|e| e.days_overdue > 7).count(),
            over_30_days: entries.iter().filter(|e| e.days_overdue > 30).count(),
            entries,
        }
    }
}
