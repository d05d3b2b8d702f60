use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use library_ledger::api::{
    Amount, Book, BookId, BookPatch, Fine, FineId, FinePatch, Loan, LoanId, LoanPatch, Member,
    MemberId, MemberPatch, NewFine, NewLoan,
};
use library_ledger::fines::{charged_by_loan, FinePolicy};
use library_ledger::ledger::{LedgerError, LoanLedger};

use crate::backend::BackendError;
use crate::fines_cache::{FinesCacheError, LocalFinesCache};
use crate::records::LibraryRecords;

/// Writes performed by a borrow, a return or a fine collection, in execution order
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CirculationStep {
    CreateLoan,
    VerifyCopy,
    UpdateBookAvailability,
    UpdateMemberBorrowedBooks,
    CloseLoan,
    RecordFine,
    RecordCollectedFine,
    MarkFineCollected,
    CollectManualFines,
}

impl fmt::Display for CirculationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CirculationStep::CreateLoan => "create loan",
            CirculationStep::VerifyCopy => "verify copy",
            CirculationStep::UpdateBookAvailability => "update book availability",
            CirculationStep::UpdateMemberBorrowedBooks => "update member borrowed books",
            CirculationStep::CloseLoan => "close loan",
            CirculationStep::RecordFine => "record fine",
            CirculationStep::RecordCollectedFine => "record collected fine",
            CirculationStep::MarkFineCollected => "mark fine collected",
            CirculationStep::CollectManualFines => "collect manual fines",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    Completed,
    /// Steps whose compensation failed, records are left inconsistent
    Incomplete { steps: Vec<CirculationStep> },
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackOutcome::Completed => write!(f, "completed"),
            RollbackOutcome::Incomplete { steps } => {
                let steps: Vec<String> = steps.iter().map(|step| step.to_string()).collect();
                write!(f, "incomplete, could not undo: {}", steps.join(", "))
            }
        }
    }
}

/// Failure of a single step
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    FinesCache(#[from] FinesCacheError),
}

#[derive(Debug, thiserror::Error)]
pub enum CirculationError {
    #[error("Book {0} not found")]
    BookNotFound(BookId),

    #[error("Member {0} not found")]
    MemberNotFound(MemberId),

    #[error("Loan {0} not found")]
    LoanNotFound(LoanId),

    #[error("Loan {0} was already returned")]
    LoanAlreadyReturned(LoanId),

    #[error("Due date {due_date} is before start date {start_date}")]
    DueBeforeStart {
        start_date: NaiveDate,
        due_date: NaiveDate,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Backend failure {0}")]
    Backend(#[from] BackendError),

    #[error("Fines cache failure {0}")]
    FinesCache(#[from] FinesCacheError),

    #[error("Copy was lent concurrently: {conflict}, rollback {rollback}")]
    ConcurrentBorrow {
        conflict: LedgerError,
        rollback: RollbackOutcome,
    },

    #[error("Step '{step}' failed after earlier writes were applied: {cause}, rollback {rollback}")]
    PartiallyApplied {
        step: CirculationStep,
        cause: StepFailure,
        rollback: RollbackOutcome,
    },
}

impl CirculationError {
    /// Rejections caused by the request itself, nothing was written
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CirculationError::BookNotFound(_)
                | CirculationError::MemberNotFound(_)
                | CirculationError::LoanNotFound(_)
                | CirculationError::LoanAlreadyReturned(_)
                | CirculationError::DueBeforeStart { .. }
                | CirculationError::Ledger(_)
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BorrowRequest {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReturnRequest {
    pub loan_id: LoanId,
    pub return_date: NaiveDate,
    pub damaged: bool,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ReturnOutcome {
    pub loan: Loan,
    /// Fine recorded for a late or damaged return, minus what was already charged for the loan
    pub fine: Option<Fine>,
}

/// Amounts settled by [`Circulation::collect_fines`]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FineCollection {
    pub member_id: MemberId,
    /// Outstanding loan fines, recorded as collected
    pub derived: Amount,
    pub recorded: Amount,
    pub manual: Amount,
}

impl FineCollection {
    pub fn total(&self) -> Amount {
        self.derived + self.recorded + self.manual
    }
}

/// Write that reverts an already applied step
#[derive(Debug, Clone)]
enum Compensation {
    DeleteLoan(LoanId),
    RestoreBook { book_id: BookId, patch: BookPatch },
    RestoreMember { member_id: MemberId, patch: MemberPatch },
    ReopenLoan { loan_id: LoanId, was_damaged: bool },
    DeleteFine(FineId),
    ReopenFine(FineId),
}

impl Compensation {
    fn undoes(&self) -> CirculationStep {
        match self {
            Compensation::DeleteLoan(_) => CirculationStep::CreateLoan,
            Compensation::RestoreBook { .. } => CirculationStep::UpdateBookAvailability,
            Compensation::RestoreMember { .. } => CirculationStep::UpdateMemberBorrowedBooks,
            Compensation::ReopenLoan { .. } => CirculationStep::CloseLoan,
            Compensation::DeleteFine(_) => CirculationStep::RecordCollectedFine,
            Compensation::ReopenFine(_) => CirculationStep::MarkFineCollected,
        }
    }

    async fn apply(&self, records: &LibraryRecords) -> Result<(), BackendError> {
        match self {
            Compensation::DeleteLoan(loan_id) => records.delete::<Loan>(*loan_id).await,
            Compensation::RestoreBook { book_id, patch } => {
                records.patch::<Book>(*book_id, patch).await.map(|_| ())
            }
            Compensation::RestoreMember { member_id, patch } => {
                records.patch::<Member>(*member_id, patch).await.map(|_| ())
            }
            Compensation::ReopenLoan {
                loan_id,
                was_damaged,
            } => {
                let reopen = LoanPatch {
                    return_date: Some(None),
                    is_damaged: Some(*was_damaged),
                    ..LoanPatch::default()
                };
                records.patch::<Loan>(*loan_id, &reopen).await.map(|_| ())
            }
            Compensation::DeleteFine(fine_id) => records.delete::<Fine>(*fine_id).await,
            Compensation::ReopenFine(fine_id) => {
                let reopen = FinePatch {
                    collected: Some(false),
                    ..FinePatch::default()
                };
                records.patch::<Fine>(*fine_id, &reopen).await.map(|_| ())
            }
        }
    }
}

/// Compensations of the writes applied so far
struct Saga<'a> {
    records: &'a LibraryRecords,
    applied: Vec<Compensation>,
}

impl<'a> Saga<'a> {
    fn new(records: &'a LibraryRecords) -> Self {
        Self {
            records,
            applied: vec![],
        }
    }

    fn applied(&mut self, compensation: Compensation) {
        self.applied.push(compensation);
    }

    /// Undoes applied writes in reverse order
    async fn rollback(self) -> RollbackOutcome {
        let mut failed_steps = vec![];
        for compensation in self.applied.iter().rev() {
            if let Err(err) = compensation.apply(self.records).await {
                tracing::error!(
                    "Failed to undo '{}' with {:?}: {}",
                    compensation.undoes(),
                    compensation,
                    err
                );
                failed_steps.push(compensation.undoes());
            }
        }
        if failed_steps.is_empty() {
            RollbackOutcome::Completed
        } else {
            RollbackOutcome::Incomplete {
                steps: failed_steps,
            }
        }
    }

    /// Rolls back after `step` failed
    /// A failure of the very first write is a plain failure
    async fn abort(self, step: CirculationStep, cause: impl Into<StepFailure>) -> CirculationError {
        let cause = cause.into();
        if self.applied.is_empty() {
            tracing::error!("Step '{}' failed: {}", step, cause);
            return match cause {
                StepFailure::Backend(err) => CirculationError::Backend(err),
                StepFailure::FinesCache(err) => CirculationError::FinesCache(err),
            };
        }

        tracing::error!(
            "Step '{}' failed after {} applied writes, rolling back: {}",
            step,
            self.applied.len(),
            cause
        );
        let rollback = self.rollback().await;
        CirculationError::PartiallyApplied {
            step,
            cause,
            rollback,
        }
    }
}

/// One lock per book, held from reading the loans until the last write
#[derive(Clone, Default)]
struct BookLocks(Arc<parking_lot::Mutex<HashMap<BookId, Arc<Mutex<()>>>>>);

impl BookLocks {
    async fn lock(&self, book_id: BookId) -> OwnedMutexGuard<()> {
        let lock = self.0.lock().entry(book_id).or_default().clone();
        lock.lock_owned().await
    }
}

/// Borrow and return as compensating transaction scripts over loan, book and member records
/// Borrows and returns of the same book are serialized within one process
#[derive(Clone)]
pub struct Circulation {
    records: LibraryRecords,
    fine_policy: FinePolicy,
    book_locks: BookLocks,
}

impl Circulation {
    pub fn new(records: LibraryRecords, fine_policy: FinePolicy) -> Self {
        Self {
            records,
            fine_policy,
            book_locks: BookLocks::default(),
        }
    }

    /// Lends the first free copy of the book
    /// 1. Creates the loan
    /// 2. Checks no other active loan holds the same copy, a concurrent writer may have lent it
    /// 3. Updates book availability
    /// 4. Adds the book to the member's borrowed books
    pub async fn borrow(&self, request: BorrowRequest) -> Result<Loan, CirculationError> {
        if request.due_date < request.start_date {
            return Err(CirculationError::DueBeforeStart {
                start_date: request.start_date,
                due_date: request.due_date,
            });
        }
        let _book_lock = self.book_locks.lock(request.book_id).await;
        let book = self
            .records
            .find::<Book>(request.book_id)
            .await?
            .ok_or(CirculationError::BookNotFound(request.book_id))?;
        let member = self
            .records
            .find::<Member>(request.member_id)
            .await?
            .ok_or(CirculationError::MemberNotFound(request.member_id))?;
        let loans = self.records.list::<Loan>().await?;

        let ledger = LoanLedger::new(&book, &loans);
        let copy = match ledger.select_copy_for_borrow() {
            Ok(copy) => copy.to_string(),
            Err(err) => {
                tracing::warn!("Borrow of book {} rejected: {}", book.id, err);
                return Err(err.into());
            }
        };
        let available_before = ledger.available_copies();

        let mut saga = Saga::new(&self.records);

        let new_loan = NewLoan {
            book_id: book.id,
            book_isbn: Some(copy.clone()),
            member_id: member.id,
            start_date: request.start_date,
            due_date: request.due_date,
            return_date: None,
            is_damaged: false,
        };
        let loan: Loan = match self.records.create(&new_loan).await {
            Ok(loan) => loan,
            Err(err) => return Err(saga.abort(CirculationStep::CreateLoan, err).await),
        };
        saga.applied(Compensation::DeleteLoan(loan.id));

        let loans_after = match self.records.list::<Loan>().await {
            Ok(loans) => loans,
            Err(err) => return Err(saga.abort(CirculationStep::VerifyCopy, err).await),
        };
        let holders: Vec<LoanId> = LoanLedger::new(&book, &loans_after)
            .active_loans()
            .iter()
            .filter(|held| held.book_isbn.as_deref() == Some(copy.as_str()))
            .map(|held| held.id)
            .collect();
        if holders.len() > 1 {
            let conflict = LedgerError::DuplicateActiveCopy {
                book_id: book.id,
                copy: copy.clone(),
                loan_ids: holders,
            };
            tracing::error!("Withdrawing loan {}: {}", loan.id, conflict);
            let rollback = saga.rollback().await;
            return Err(CirculationError::ConcurrentBorrow { conflict, rollback });
        }

        let availability = BookPatch::availability(available_before - 1);
        if let Err(err) = self.records.patch::<Book>(book.id, &availability).await {
            return Err(saga
                .abort(CirculationStep::UpdateBookAvailability, err)
                .await);
        }
        saga.applied(Compensation::RestoreBook {
            book_id: book.id,
            patch: BookPatch::availability(available_before),
        });

        if !member.borrowed_books.contains(&book.id) {
            let mut borrowed_books = member.borrowed_books.clone();
            borrowed_books.push(book.id);
            if let Err(err) = self
                .records
                .patch::<Member>(member.id, &MemberPatch::borrowed_books(borrowed_books))
                .await
            {
                return Err(saga
                    .abort(CirculationStep::UpdateMemberBorrowedBooks, err)
                    .await);
            }
        }

        tracing::info!(
            "Member {} borrowed copy {} of book {} as loan {}",
            member.id,
            copy,
            book.id,
            loan.id
        );
        Ok(loan)
    }

    /// Closes an active loan
    /// 1. Sets the return date (and damage flag) on the loan
    /// 2. Updates book availability
    /// 3. Removes the book from the member's borrowed books unless another copy is still out
    /// 4. Records the part of the fine not already charged for the loan
    pub async fn return_loan(
        &self,
        request: ReturnRequest,
    ) -> Result<ReturnOutcome, CirculationError> {
        let book_id = self
            .records
            .find::<Loan>(request.loan_id)
            .await?
            .ok_or(CirculationError::LoanNotFound(request.loan_id))?
            .book_id;
        let _book_lock = self.book_locks.lock(book_id).await;
        // read again under the lock, a concurrent return may have closed it
        let loan = self
            .records
            .find::<Loan>(request.loan_id)
            .await?
            .ok_or(CirculationError::LoanNotFound(request.loan_id))?;
        if !loan.is_active() {
            tracing::warn!("Loan {} was already returned", loan.id);
            return Err(CirculationError::LoanAlreadyReturned(loan.id));
        }
        let book = self.records.find::<Book>(loan.book_id).await?;
        let member = self.records.find::<Member>(loan.member_id).await?;
        let (loans, fines) = tokio::try_join!(
            self.records.list::<Loan>(),
            self.records.list::<Fine>()
        )?;
        let already_charged = charged_by_loan(&fines)
            .get(&loan.id)
            .copied()
            .unwrap_or_default();

        let mut saga = Saga::new(&self.records);

        let close = LoanPatch {
            return_date: Some(Some(request.return_date)),
            is_damaged: Some(loan.is_damaged || request.damaged),
            ..LoanPatch::default()
        };
        let closed: Loan = match self.records.patch(loan.id, &close).await {
            Ok(closed) => closed,
            Err(err) => return Err(saga.abort(CirculationStep::CloseLoan, err).await),
        };
        saga.applied(Compensation::ReopenLoan {
            loan_id: loan.id,
            was_damaged: loan.is_damaged,
        });

        match book {
            Some(book) => {
                let available_before = LoanLedger::new(&book, &loans).available_copies();
                let available_after =
                    LoanLedger::new(&book, loans.iter().filter(|other| other.id != loan.id))
                        .available_copies();
                let availability = BookPatch::availability(available_after);
                if let Err(err) = self.records.patch::<Book>(book.id, &availability).await {
                    return Err(saga
                        .abort(CirculationStep::UpdateBookAvailability, err)
                        .await);
                }
                saga.applied(Compensation::RestoreBook {
                    book_id: book.id,
                    patch: BookPatch::availability(available_before),
                });
            }
            None => tracing::warn!(
                "Book {} of loan {} no longer exists, availability not updated",
                loan.book_id,
                loan.id
            ),
        }

        match member {
            Some(member) => {
                let still_borrowing = loans.iter().any(|other| {
                    other.id != loan.id
                        && other.is_active()
                        && other.member_id == member.id
                        && other.book_id == loan.book_id
                });
                if !still_borrowing && member.borrowed_books.contains(&loan.book_id) {
                    let borrowed_books = member
                        .borrowed_books
                        .iter()
                        .filter(|book_id| **book_id != loan.book_id)
                        .cloned()
                        .collect();
                    if let Err(err) = self
                        .records
                        .patch::<Member>(member.id, &MemberPatch::borrowed_books(borrowed_books))
                        .await
                    {
                        return Err(saga
                            .abort(CirculationStep::UpdateMemberBorrowedBooks, err)
                            .await);
                    }
                    saga.applied(Compensation::RestoreMember {
                        member_id: member.id,
                        patch: MemberPatch::borrowed_books(member.borrowed_books.clone()),
                    });
                }
            }
            None => tracing::warn!(
                "Member {} of loan {} no longer exists, borrowed books not updated",
                loan.member_id,
                loan.id
            ),
        }

        let fine = match self
            .fine_policy
            .outstanding(&closed, already_charged, request.return_date)
        {
            Some(assessed) => {
                let new_fine = NewFine {
                    loan_id: Some(closed.id),
                    member_id: closed.member_id,
                    book_id: closed.book_id,
                    reason: assessed.reason.to_string(),
                    amount: assessed.amount,
                    date: request.return_date,
                    collected: false,
                };
                match self.records.create::<Fine>(&new_fine).await {
                    Ok(fine) => Some(fine),
                    Err(err) => return Err(saga.abort(CirculationStep::RecordFine, err).await),
                }
            }
            None => None,
        };

        tracing::info!(
            "Loan {} of book {} returned on {}",
            closed.id,
            closed.book_id,
            request.return_date
        );
        Ok(ReturnOutcome { loan: closed, fine })
    }

    /// Settles every outstanding fine of the member
    /// 1. Loan fines not recorded yet are recorded as collected
    /// 2. Recorded fines are marked collected on the backend
    /// 3. Manual fines are marked collected in the local cache
    pub async fn collect_fines(
        &self,
        member_id: MemberId,
        fines_cache: &LocalFinesCache,
        today: NaiveDate,
    ) -> Result<FineCollection, CirculationError> {
        let member = self
            .records
            .find::<Member>(member_id)
            .await?
            .ok_or(CirculationError::MemberNotFound(member_id))?;
        let (loans, fines) = tokio::try_join!(
            self.records.list::<Loan>(),
            self.records.list::<Fine>()
        )?;
        let mut collection = FineCollection {
            member_id: member.id,
            derived: 0,
            recorded: 0,
            manual: 0,
        };

        let mut saga = Saga::new(&self.records);

        let owed = self.fine_policy.derived_fines(
            loans.iter().filter(|loan| loan.member_id == member.id),
            &fines,
            today,
        );
        for fine in owed {
            let settled = NewFine {
                loan_id: Some(fine.loan_id),
                member_id: member.id,
                book_id: fine.book_id,
                reason: fine.reason.to_string(),
                amount: fine.amount,
                date: today,
                collected: true,
            };
            let recorded: Fine = match self.records.create(&settled).await {
                Ok(recorded) => recorded,
                Err(err) => {
                    return Err(saga
                        .abort(CirculationStep::RecordCollectedFine, err)
                        .await)
                }
            };
            saga.applied(Compensation::DeleteFine(recorded.id));
            collection.derived += fine.amount;
        }

        let mark_collected = FinePatch {
            collected: Some(true),
            ..FinePatch::default()
        };
        for fine in fines
            .iter()
            .filter(|fine| fine.member_id == member.id && !fine.collected)
        {
            if let Err(err) = self
                .records
                .patch::<Fine>(fine.id, &mark_collected)
                .await
            {
                return Err(saga.abort(CirculationStep::MarkFineCollected, err).await);
            }
            saga.applied(Compensation::ReopenFine(fine.id));
            collection.recorded += fine.amount;
        }

        collection.manual = match fines_cache.collect_for_member(member.id) {
            Ok(amount) => amount,
            Err(err) => return Err(saga.abort(CirculationStep::CollectManualFines, err).await),
        };

        tracing::info!(
            "Collected {} in fines from member {}",
            collection.total(),
            member.id
        );
        Ok(collection)
    }
}
