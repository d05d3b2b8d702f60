use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::{Amount, BookId, Fine, FineId, Loan, LoanId, Member, MemberId};
use crate::snapshot::LibrarySnapshot;

pub const DEFAULT_DAILY_RATE: Amount = 20;
pub const DEFAULT_DAMAGE_SURCHARGE: Amount = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
/// Flat penalty rates applied to late or damaged loans
pub struct FinePolicy {
    #[serde(default = "default_daily_rate")]
    pub daily_rate: Amount,
    #[serde(default = "default_damage_surcharge")]
    pub damage_surcharge: Amount,
}

fn default_daily_rate() -> Amount {
    DEFAULT_DAILY_RATE
}

fn default_damage_surcharge() -> Amount {
    DEFAULT_DAMAGE_SURCHARGE
}

impl Default for FinePolicy {
    fn default() -> Self {
        Self {
            daily_rate: DEFAULT_DAILY_RATE,
            damage_surcharge: DEFAULT_DAMAGE_SURCHARGE,
        }
    }
}

impl FinePolicy {
    /// Whole days between the due date and the return date (or `today` while still out)
    pub fn days_late(due_date: NaiveDate, return_date: Option<NaiveDate>, today: NaiveDate) -> i64 {
        let reference_date = return_date.unwrap_or(today);
        (reference_date - due_date).num_days().max(0)
    }

    pub fn fine(
        &self,
        due_date: NaiveDate,
        return_date: Option<NaiveDate>,
        damaged: bool,
        today: NaiveDate,
    ) -> Amount {
        let late_fee = Self::days_late(due_date, return_date, today) * self.daily_rate;
        if damaged {
            late_fee + self.damage_surcharge
        } else {
            late_fee
        }
    }

    pub fn loan_fine(&self, loan: &Loan, today: NaiveDate) -> Amount {
        self.fine(loan.due_date, loan.return_date, loan.is_damaged, today)
    }

    /// Fine owed for a loan, `None` when nothing is owed
    pub fn assess(&self, loan: &Loan, today: NaiveDate) -> Option<DerivedFine> {
        let amount = self.loan_fine(loan, today);
        if amount == 0 {
            return None;
        }
        let reason = if loan.is_damaged {
            FineReason::Damage
        } else if loan.is_active() {
            FineReason::Overdue
        } else {
            FineReason::LateReturn
        };
        Some(DerivedFine {
            loan_id: loan.id,
            member_id: loan.member_id,
            book_id: loan.book_id,
            reason,
            days_late: Self::days_late(loan.due_date, loan.return_date, today),
            amount,
            date: loan.return_date.unwrap_or(today),
        })
    }

    /// Part of the loan fine not covered by `already_charged`, `None` when nothing is left
    pub fn outstanding(
        &self,
        loan: &Loan,
        already_charged: Amount,
        today: NaiveDate,
    ) -> Option<DerivedFine> {
        let assessed = self.assess(loan, today)?;
        let amount = assessed.amount - already_charged;
        if amount <= 0 {
            return None;
        }
        Some(DerivedFine { amount, ..assessed })
    }

    /// Fines computed from loans, minus what persisted fines of the same loan already charged
    pub fn derived_fines<'a>(
        &self,
        loans: impl IntoIterator<Item = &'a Loan>,
        persisted: &[Fine],
        today: NaiveDate,
    ) -> Vec<DerivedFine> {
        let charged = charged_by_loan(persisted);
        loans
            .into_iter()
            .filter_map(|loan| {
                let already_charged = charged.get(&loan.id).copied().unwrap_or_default();
                self.outstanding(loan, already_charged, today)
            })
            .collect()
    }
}

/// Sum of persisted fines per loan, collected or not
pub fn charged_by_loan(persisted: &[Fine]) -> HashMap<LoanId, Amount> {
    let mut charged = HashMap::new();
    for fine in persisted {
        if let Some(loan_id) = fine.loan_id {
            *charged.entry(loan_id).or_default() += fine.amount;
        }
    }
    charged
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum FineReason {
    Damage,
    Overdue,
    LateReturn,
}

impl fmt::Display for FineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FineReason::Damage => write!(f, "Damage"),
            FineReason::Overdue => write!(f, "Overdue"),
            FineReason::LateReturn => write!(f, "Late return"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct DerivedFine {
    pub loan_id: LoanId,
    pub member_id: MemberId,
    pub book_id: BookId,
    pub reason: FineReason,
    pub days_late: i64,
    pub amount: Amount,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FineSource {
    /// Computed from a loan on every request
    Derived,
    /// Persisted on the backend
    Recorded,
    /// Entered by staff, kept in the local cache
    Manual,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct FineEntry {
    pub source: FineSource,
    pub fine_id: Option<FineId>,
    pub loan_id: Option<LoanId>,
    pub book_id: BookId,
    pub book_title: Option<String>,
    pub copies: Vec<String>,
    pub reason: String,
    pub amount: Amount,
    pub date: NaiveDate,
    pub collected: bool,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct MemberFineStatement {
    pub member_id: MemberId,
    pub member_name: String,
    pub entries: Vec<FineEntry>,
    pub total_outstanding: Amount,
    pub total_collected: Amount,
}

impl MemberFineStatement {
    /// Derived, recorded then manual fines, each group newest first
    pub fn build(
        policy: &FinePolicy,
        snapshot: &LibrarySnapshot,
        manual_fines: &[Fine],
        member: &Member,
        today: NaiveDate,
    ) -> Self {
        let entry_for_book = |book_id: BookId| {
            let book = snapshot.book(book_id);
            (
                book.map(|book| book.title.clone()),
                book.map(|book| book.isbn.clone()).unwrap_or_default(),
            )
        };

        let mut derived: Vec<FineEntry> = policy
            .derived_fines(
                snapshot.loans_for_member(member.id),
                &snapshot.fines,
                today,
            )
            .into_iter()
            .map(|fine| {
                let (book_title, copies) = entry_for_book(fine.book_id);
                FineEntry {
                    source: FineSource::Derived,
                    fine_id: None,
                    loan_id: Some(fine.loan_id),
                    book_id: fine.book_id,
                    book_title,
                    copies,
                    reason: fine.reason.to_string(),
                    amount: fine.amount,
                    date: fine.date,
                    collected: false,
                }
            })
            .collect();
        derived.sort_by(|a, b| b.date.cmp(&a.date));

        let stored_entries = |fines: Vec<&Fine>, source: FineSource| {
            let mut entries: Vec<FineEntry> = fines
                .into_iter()
                .map(|fine| {
                    let (book_title, copies) = entry_for_book(fine.book_id);
                    FineEntry {
                        source,
                        fine_id: Some(fine.id),
                        loan_id: fine.loan_id,
                        book_id: fine.book_id,
                        book_title,
                        copies,
                        reason: fine.reason.clone(),
                        amount: fine.amount,
                        date: fine.date,
                        collected: fine.collected,
                    }
                })
                .collect();
            entries.sort_by(|a, b| b.date.cmp(&a.date));
            entries
        };

        let recorded = stored_entries(
            snapshot.fines_for_member(member.id).collect(),
            FineSource::Recorded,
        );
        let manual = stored_entries(
            manual_fines
                .iter()
                .filter(|fine| fine.member_id == member.id)
                .collect(),
            FineSource::Manual,
        );

        let entries: Vec<FineEntry> = derived.into_iter().chain(recorded).chain(manual).collect();
        let total_outstanding = entries
            .iter()
            .filter(|entry| !entry.collected)
            .map(|entry| entry.amount)
            .sum();
        let total_collected = entries
            .iter()
            .filter(|entry| entry.collected)
            .map(|entry| entry.amount)
            .sum();

        Self {
            member_id: member.id,
            member_name: member.display_name(),
            entries,
            total_outstanding,
            total_collected,
        }
    }
}

/// One statement per member in snapshot order
pub fn fine_statements(
    policy: &FinePolicy,
    snapshot: &LibrarySnapshot,
    manual_fines: &[Fine],
    today: NaiveDate,
) -> Vec<MemberFineStatement> {
    snapshot
        .members
        .iter()
        .map(|member| MemberFineStatement::build(policy, snapshot, manual_fines, member, today))
        .collect()
}

#[cfg(test)]
mod fine_policy_tests {
    use super::*;
    use crate::api::Fine;
    use crate::test_utils::{book, date, loan, member, returned};

    fn loan_due(due: &str) -> Loan {
        Loan {
            due_date: date(due),
            ..loan(1, 1, 1, Some("a"))
        }
    }

    #[test]
    fn test_returned_three_days_late() {
        let loan = returned(loan_due("2024-01-01"), date("2024-01-04"));
        let policy = FinePolicy::default();

        assert_eq!(policy.loan_fine(&loan, date("2030-01-01")), 60);
    }

    #[test]
    fn test_outstanding_loan_uses_today() {
        let loan = loan_due("2024-01-01");
        let policy = FinePolicy::default();

        assert_eq!(FinePolicy::days_late(loan.due_date, None, date("2024-01-10")), 9);
        assert_eq!(policy.loan_fine(&loan, date("2024-01-10")), 180);
    }

    #[test]
    fn test_early_return_owes_nothing_unless_damaged() {
        let policy = FinePolicy::default();
        let early = returned(loan_due("2024-01-10"), date("2024-01-02"));
        assert_eq!(policy.loan_fine(&early, date("2024-02-01")), 0);
        assert_eq!(policy.assess(&early, date("2024-02-01")), None);

        let damaged = Loan {
            is_damaged: true,
            ..early
        };
        assert_eq!(policy.loan_fine(&damaged, date("2024-02-01")), 50);
    }

    #[test]
    fn test_late_and_damaged_adds_surcharge() {
        let policy = FinePolicy {
            daily_rate: 5,
            damage_surcharge: 100,
        };
        let loan = Loan {
            is_damaged: true,
            ..returned(loan_due("2024-01-01"), date("2024-01-03"))
        };
        assert_eq!(policy.loan_fine(&loan, date("2024-01-03")), 110);
        assert_eq!(
            policy.assess(&loan, date("2024-01-03")).map(|fine| fine.reason),
            Some(FineReason::Damage)
        );
    }

    #[test]
    fn test_fine_is_deterministic() {
        let policy = FinePolicy::default();
        let loan = loan_due("2024-01-01");
        let today = date("2024-03-01");

        assert_eq!(policy.loan_fine(&loan, today), policy.loan_fine(&loan, today));
        assert_eq!(policy.assess(&loan, today), policy.assess(&loan, today));
    }

    #[test]
    fn test_derived_fines_skip_settled_loans() {
        let policy = FinePolicy::default();
        let loans = vec![
            loan_due("2024-01-01"),
            Loan {
                id: 2,
                ..returned(loan_due("2024-01-01"), date("2024-01-02"))
            },
            Loan {
                id: 3,
                ..returned(loan_due("2024-01-05"), date("2024-01-02"))
            },
        ];
        let persisted = vec![Fine {
            id: 9,
            loan_id: Some(2),
            member_id: 1,
            book_id: 1,
            reason: "Late return".to_string(),
            amount: 20,
            date: date("2024-01-02"),
            collected: false,
        }];

        let derived = policy.derived_fines(&loans, &persisted, date("2024-01-03"));
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].loan_id, 1);
        assert_eq!(derived[0].reason, FineReason::Overdue);
        assert_eq!(derived[0].amount, 40);
        assert_eq!(derived[0].date, date("2024-01-03"));
    }

    #[test]
    /// A loan collected while still overdue only owes the days after the collection
    fn test_partially_charged_loan_owes_the_difference() {
        let policy = FinePolicy::default();
        let loan = loan_due("2024-01-08");
        let collected = Fine {
            id: 1,
            loan_id: Some(loan.id),
            member_id: 1,
            book_id: 1,
            reason: "Overdue".to_string(),
            amount: 240,
            date: date("2024-01-20"),
            collected: true,
        };
        let persisted = vec![collected];

        assert!(policy
            .derived_fines([&loan], &persisted, date("2024-01-20"))
            .is_empty());

        let later = policy.derived_fines([&loan], &persisted, date("2024-01-22"));
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].amount, 40);
        assert_eq!(later[0].days_late, 14);

        let returned_late = returned(loan.clone(), date("2024-01-22"));
        assert_eq!(
            policy
                .outstanding(&returned_late, 240, date("2024-02-01"))
                .map(|fine| (fine.amount, fine.reason)),
            Some((40, FineReason::LateReturn))
        );
        assert_eq!(policy.outstanding(&returned_late, 280, date("2024-02-01")), None);
        assert_eq!(charged_by_loan(&persisted).get(&loan.id), Some(&240));
    }

    #[test]
    fn test_member_statement_merges_all_sources() {
        let policy = FinePolicy::default();
        let member = member(1, "Ada");
        let snapshot = LibrarySnapshot {
            books: vec![book(1, &["a"])],
            members: vec![member.clone()],
            loans: vec![loan_due("2024-01-01")],
            fines: vec![Fine {
                id: 4,
                loan_id: None,
                member_id: 1,
                book_id: 1,
                reason: "Lost cover".to_string(),
                amount: 30,
                date: date("2024-01-02"),
                collected: true,
            }],
        };
        let manual = vec![
            Fine {
                id: 1,
                loan_id: None,
                member_id: 1,
                book_id: 1,
                reason: "Torn page".to_string(),
                amount: 15,
                date: date("2024-01-03"),
                collected: false,
            },
            Fine {
                id: 2,
                loan_id: None,
                member_id: 2,
                book_id: 1,
                reason: "Other member".to_string(),
                amount: 99,
                date: date("2024-01-03"),
                collected: false,
            },
        ];

        let statement =
            MemberFineStatement::build(&policy, &snapshot, &manual, &member, date("2024-01-03"));

        let sources: Vec<FineSource> = statement.entries.iter().map(|e| e.source).collect();
        assert_eq!(
            sources,
            vec![FineSource::Derived, FineSource::Recorded, FineSource::Manual]
        );
        assert_eq!(statement.total_outstanding, 40 + 15);
        assert_eq!(statement.total_collected, 30);
        assert_eq!(statement.entries[0].book_title.as_deref(), Some("title1"));
        assert_eq!(statement.member_name, "Ada Member");

        let all = fine_statements(&policy, &snapshot, &manual, date("2024-01-03"));
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], statement);
    }
}
