//! Data models for Libris

pub mod book;
pub mod loan;
pub mod member;
pub mod report;

// Re-export commonly used types
pub use book::Book;
pub use loan::{LoanRecord, LoanStatus, LoanView};
pub use member::{Member, MemberView};
