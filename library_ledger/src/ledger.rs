use std::collections::HashMap;

use serde::Serialize;

use crate::api::{Book, BookId, Loan, LoanId};

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("No copy of book {0} is available")]
    NoCopyAvailable(BookId),

    #[error("Copy {copy} of book {book_id} is held by several active loans {loan_ids:?}")]
    DuplicateActiveCopy {
        book_id: BookId,
        copy: String,
        loan_ids: Vec<LoanId>,
    },
}

/// Copy bookkeeping of a single book against its loans
pub struct LoanLedger<'a> {
    book: &'a Book,
    active_loans: Vec<&'a Loan>,
}

impl<'a> LoanLedger<'a> {
    /// Loans of other books are skipped, so the full loan list can be passed in
    pub fn new(book: &'a Book, loans: impl IntoIterator<Item = &'a Loan>) -> Self {
        let active_loans = loans
            .into_iter()
            .filter(|loan| loan.book_id == book.id && loan.is_active())
            .collect();
        Self { book, active_loans }
    }

    pub fn total_copies(&self) -> usize {
        self.book.isbn.len()
    }

    pub fn active_loans(&self) -> &[&'a Loan] {
        &self.active_loans
    }

    pub fn borrowed_copies(&self) -> usize {
        self.active_loans.len().min(self.total_copies())
    }

    /// Always within `0..=total_copies`
    pub fn available_copies(&self) -> usize {
        self.total_copies().saturating_sub(self.active_loans.len())
    }

    pub fn is_copy_out(&self, copy: &str) -> bool {
        self.active_loans
            .iter()
            .any(|loan| loan.book_isbn.as_deref() == Some(copy))
    }

    /// Copy identifiers not held by any active loan, in inventory order
    pub fn free_copies(&self) -> Vec<&'a str> {
        self.book
            .isbn
            .iter()
            .map(String::as_str)
            .filter(|copy| !self.is_copy_out(copy))
            .collect()
    }

    pub fn can_borrow(&self) -> bool {
        self.select_copy_for_borrow().is_ok()
    }

    /// Picks the first free copy in inventory order
    /// Loans without a recorded copy still consume capacity, so a free identifier alone is not enough
    pub fn select_copy_for_borrow(&self) -> Result<&'a str, LedgerError> {
        if self.available_copies() == 0 {
            return Err(LedgerError::NoCopyAvailable(self.book.id));
        }
        self.free_copies()
            .into_iter()
            .next()
            .ok_or(LedgerError::NoCopyAvailable(self.book.id))
    }

    /// Checks that no copy is handed out twice
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut holders: HashMap<&str, Vec<LoanId>> = HashMap::new();
        for loan in self.active_loans.iter() {
            if let Some(copy) = loan.book_isbn.as_deref() {
                holders.entry(copy).or_default().push(loan.id);
            }
        }
        // inventory order keeps the reported copy deterministic
        for copy in self.book.isbn.iter() {
            if let Some(loan_ids) = holders.remove(copy.as_str()) {
                if loan_ids.len() > 1 {
                    return Err(LedgerError::DuplicateActiveCopy {
                        book_id: self.book.id,
                        copy: copy.clone(),
                        loan_ids,
                    });
                }
            }
        }
        if let Some((copy, loan_ids)) = holders.into_iter().find(|(_, ids)| ids.len() > 1) {
            return Err(LedgerError::DuplicateActiveCopy {
                book_id: self.book.id,
                copy: copy.to_string(),
                loan_ids,
            });
        }
        Ok(())
    }

    pub fn availability(&self) -> Availability {
        Availability {
            book_id: self.book.id,
            title: self.book.title.clone(),
            total_copies: self.total_copies(),
            borrowed_copies: self.borrowed_copies(),
            available_copies: self.available_copies(),
            free_copies: self.free_copies().into_iter().map(str::to_string).collect(),
            active_loan_ids: self.active_loans.iter().map(|loan| loan.id).collect(),
            can_borrow: self.can_borrow(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct Availability {
    pub book_id: BookId,
    pub title: String,
    pub total_copies: usize,
    pub borrowed_copies: usize,
    pub available_copies: usize,
    pub free_copies: Vec<String>,
    pub active_loan_ids: Vec<LoanId>,
    pub can_borrow: bool,
}
