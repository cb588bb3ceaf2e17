//! Data models for the lending workflow

pub mod book;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use book::Book;
pub use loan::{LoanRecord, LoanStatus, NewLoanRecord};
pub use user::{Borrower, Role, UserClaims};
