use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;

use crate::api::{Amount, Book, BookId, Loan, LoanId, MemberId};
use crate::ledger::LoanLedger;
use crate::snapshot::LibrarySnapshot;

/// Number of returned loans shown in member activity
const RECENT_RETURNS: usize = 6;

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct BookPopularity {
    pub book_id: BookId,
    pub loans: usize,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct LibraryReport {
    /// Loans not yet returned
    pub total_issued: usize,
    pub total_returned: usize,
    /// Sum of the rent of every loaned book, not the fines
    pub total_revenue: Amount,
    pub most_borrowed: Option<BookId>,
    pub most_borrowed_title: Option<String>,
    pub popularity: Vec<BookPopularity>,
    pub total_books: usize,
    /// Books with at least one copy that can be lent
    pub available_books: usize,
    pub unavailable_books: usize,
    pub total_members: usize,
}

pub fn total_issued(loans: &[Loan]) -> usize {
    loans.iter().filter(|loan| loan.is_active()).count()
}

pub fn total_returned(loans: &[Loan]) -> usize {
    loans.iter().filter(|loan| !loan.is_active()).count()
}

/// Loans of unknown books or books without rent count as zero
pub fn total_revenue(books: &[Book], loans: &[Loan]) -> Amount {
    let rent_per_book: HashMap<BookId, Amount> = books
        .iter()
        .map(|book| (book.id, book.rent.unwrap_or_default()))
        .collect();
    loans
        .iter()
        .map(|loan| {
            rent_per_book.get(&loan.book_id).cloned().unwrap_or_else(|| {
                tracing::warn!("Loan {} references unknown book {}", loan.id, loan.book_id);
                0
            })
        })
        .sum()
}

/// Loan count per book, most borrowed first
/// Equal counts keep the order in which the book first appears in `loans`
pub fn popularity(loans: &[Loan]) -> Vec<BookPopularity> {
    let counts = loans.iter().map(|loan| loan.book_id).counts();
    loans
        .iter()
        .map(|loan| loan.book_id)
        .unique()
        .map(|book_id| BookPopularity {
            book_id,
            loans: counts.get(&book_id).cloned().unwrap_or_default(),
        })
        .sorted_by_key(|entry| Reverse(entry.loans))
        .collect()
}

pub fn most_borrowed(loans: &[Loan]) -> Option<BookId> {
    popularity(loans).first().map(|entry| entry.book_id)
}

impl LibraryReport {
    pub fn build(snapshot: &LibrarySnapshot) -> Self {
        let popularity = popularity(&snapshot.loans);
        let most_borrowed = popularity.first().map(|entry| entry.book_id);
        let available_books = snapshot
            .books
            .iter()
            .filter(|book| LoanLedger::new(book, &snapshot.loans).can_borrow())
            .count();

        Self {
            total_issued: total_issued(&snapshot.loans),
            total_returned: total_returned(&snapshot.loans),
            total_revenue: total_revenue(&snapshot.books, &snapshot.loans),
            most_borrowed,
            most_borrowed_title: most_borrowed
                .and_then(|book_id| snapshot.book(book_id))
                .map(|book| book.title.clone()),
            popularity,
            total_books: snapshot.books.len(),
            available_books,
            unavailable_books: snapshot.books.len() - available_books,
            total_members: snapshot.members.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct LoanHistoryRow {
    pub loan_id: LoanId,
    pub member_id: MemberId,
    pub member_name: String,
    pub book_id: BookId,
    pub book_title: Option<String>,
    pub copy: Option<String>,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub rent: Amount,
}

impl LoanHistoryRow {
    fn from_loan(snapshot: &LibrarySnapshot, loan: &Loan) -> Self {
        let book = snapshot.book(loan.book_id);
        Self {
            loan_id: loan.id,
            member_id: loan.member_id,
            member_name: snapshot
                .member(loan.member_id)
                .map(|member| member.display_name())
                .unwrap_or_else(|| format!("Member #{}", loan.member_id)),
            book_id: loan.book_id,
            book_title: book.map(|book| book.title.clone()),
            copy: loan.book_isbn.clone(),
            start_date: loan.start_date,
            due_date: loan.due_date,
            return_date: loan.return_date,
            rent: book.and_then(|book| book.rent).unwrap_or_default(),
        }
    }
}

/// Every loan in snapshot order
pub fn loan_history(snapshot: &LibrarySnapshot) -> Vec<LoanHistoryRow> {
    snapshot
        .loans
        .iter()
        .map(|loan| LoanHistoryRow::from_loan(snapshot, loan))
        .collect()
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct MemberActivity {
    pub member_id: MemberId,
    pub member_name: String,
    pub active_loans: Vec<LoanHistoryRow>,
    /// Latest returns first
    pub recent_returns: Vec<LoanHistoryRow>,
}

impl MemberActivity {
    pub fn build(snapshot: &LibrarySnapshot, member_id: MemberId) -> Option<Self> {
        let member = snapshot.member(member_id)?;
        let (active, returned): (Vec<&Loan>, Vec<&Loan>) = snapshot
            .loans_for_member(member_id)
            .partition(|loan| loan.is_active());

        Some(Self {
            member_id,
            member_name: member.display_name(),
            active_loans: active
                .into_iter()
                .map(|loan| LoanHistoryRow::from_loan(snapshot, loan))
                .collect(),
            recent_returns: returned
                .into_iter()
                .sorted_by_key(|loan| Reverse(loan.return_date))
                .take(RECENT_RETURNS)
                .map(|loan| LoanHistoryRow::from_loan(snapshot, loan))
                .collect(),
        })
    }
}

#[cfg(test)]
mod reports_tests {
    use super::*;
    use crate::test_utils::{book, date, loan, member, returned, with_rent};

    #[test]
    fn test_most_borrowed_counts_loans_per_book() {
        let loans = vec![loan(1, 1, 1, None), loan(2, 1, 2, None), loan(3, 2, 1, None)];
        assert_eq!(most_borrowed(&loans), Some(1));
        assert_eq!(
            popularity(&loans),
            vec![
                BookPopularity {
                    book_id: 1,
                    loans: 2
                },
                BookPopularity {
                    book_id: 2,
                    loans: 1
                },
            ]
        );
    }

    #[test]
    fn test_most_borrowed_tie_goes_to_first_encountered() {
        let loans = vec![
            loan(1, 5, 1, None),
            loan(2, 3, 1, None),
            loan(3, 3, 2, None),
            loan(4, 5, 2, None),
        ];
        assert_eq!(most_borrowed(&loans), Some(5));
        assert_eq!(most_borrowed(&[]), None);
    }

    #[test]
    fn test_issued_returned_and_revenue() {
        let books = vec![with_rent(book(1, &["a"]), 30), book(2, &["b"])];
        let loans = vec![
            loan(1, 1, 1, Some("a")),
            returned(loan(2, 1, 2, Some("a")), date("2024-01-05")),
            loan(3, 2, 1, Some("b")),
            loan(4, 99, 1, None),
        ];

        assert_eq!(total_issued(&loans), 3);
        assert_eq!(total_returned(&loans), 1);
        assert_eq!(total_revenue(&books, &loans), 60);
    }

    #[test]
    fn test_library_report() {
        let snapshot = LibrarySnapshot {
            books: vec![with_rent(book(1, &["a"]), 10), book(2, &["b", "c"])],
            members: vec![member(1, "Ada"), member(2, "Alan")],
            loans: vec![loan(1, 1, 1, Some("a")), loan(2, 2, 2, Some("b"))],
            fines: vec![],
        };

        let report = LibraryReport::build(&snapshot);
        assert_eq!(report.total_issued, 2);
        assert_eq!(report.total_returned, 0);
        assert_eq!(report.total_revenue, 10);
        assert_eq!(report.most_borrowed, Some(1));
        assert_eq!(report.most_borrowed_title.as_deref(), Some("title1"));
        assert_eq!(report.total_books, 2);
        assert_eq!(report.available_books, 1);
        assert_eq!(report.unavailable_books, 1);
        assert_eq!(report.total_members, 2);
    }

    #[test]
    fn test_loan_history_names_unknown_members() {
        let snapshot = LibrarySnapshot {
            books: vec![with_rent(book(1, &["a"]), 10)],
            members: vec![member(1, "Ada")],
            loans: vec![loan(1, 1, 1, Some("a")), loan(2, 1, 7, None)],
            fines: vec![],
        };

        let rows = loan_history(&snapshot);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].member_name, "Ada Member");
        assert_eq!(rows[0].rent, 10);
        assert_eq!(rows[1].member_name, "Member #7");
    }

    #[test]
    fn test_member_activity_lists_latest_returns_first() {
        let mut loans: Vec<Loan> = (1..=8)
            .map(|id| returned(loan(id, 1, 1, None), date(&format!("2024-02-0{}", id + 1))))
            .collect();
        loans.push(loan(20, 1, 1, Some("a")));
        loans.push(loan(21, 1, 2, None));
        let snapshot = LibrarySnapshot {
            books: vec![book(1, &["a"])],
            members: vec![member(1, "Ada"), member(2, "Alan")],
            loans,
            fines: vec![],
        };

        let activity = MemberActivity::build(&snapshot, 1).unwrap();
        assert_eq!(activity.active_loans.len(), 1);
        assert_eq!(activity.active_loans[0].loan_id, 20);
        let returned_ids: Vec<LoanId> = activity.recent_returns.iter().map(|r| r.loan_id).collect();
        assert_eq!(returned_ids, vec![8, 7, 6, 5, 4, 3]);

        assert!(MemberActivity::build(&snapshot, 42).is_none());
    }
}
