use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

pub type BookId = i32;
pub type MemberId = i32;
pub type LoanId = i32;
pub type FineId = i32;

/// Whole currency units
pub type Amount = i64;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Book record as stored under `/books`
/// Every entry of `isbn` identifies one lendable copy
pub struct Book {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: BookId,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub isbn: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(
        default,
        alias = "publicationYear",
        skip_serializing_if = "Option::is_none"
    )]
    pub published_year: Option<i32>,
    #[serde(default, alias = "pageCount", skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_copies: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_copies: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl NewBook {
    /// New books start with every copy on the shelf
    pub fn into_record_fields(self) -> NewBookRecord {
        let copies = self.isbn.len() as u32;
        NewBookRecord {
            book: self,
            total_copies: copies,
            available_copies: copies,
            is_available: copies > 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewBookRecord {
    #[serde(flatten)]
    pub book: NewBook,
    pub total_copies: u32,
    pub available_copies: u32,
    pub is_available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Partial update of a book, absent fields are left untouched
pub struct BookPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rent: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_copies: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
}

impl BookPatch {
    pub fn availability(available_copies: usize) -> Self {
        Self {
            available_copies: Some(available_copies as u32),
            is_available: Some(available_copies > 0),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: MemberId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde_as(as = "Vec<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub borrowed_books: Vec<BookId>,
}

impl Member {
    /// First name followed by the last name, falling back to `name`
    pub fn display_name(&self) -> String {
        let last = self
            .last_name
            .as_deref()
            .filter(|last| !last.is_empty())
            .or(self.name.as_deref())
            .unwrap_or_default();
        format!("{} {}", self.first_name, last).trim().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMember {
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_type: Option<String>,
    pub join_date: NaiveDate,
    pub status: MemberStatus,
    pub borrowed_books: Vec<BookId>,
}

#[derive(Debug, Clone, Default, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MemberStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrowed_books: Option<Vec<BookId>>,
}

impl MemberPatch {
    pub fn borrowed_books(borrowed_books: Vec<BookId>) -> Self {
        Self {
            borrowed_books: Some(borrowed_books),
            ..Self::default()
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: LoanId,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub book_id: BookId,
    /// Copy handed out, older records may not carry it
    #[serde(default, alias = "isbn")]
    pub book_isbn: Option<String>,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub member_id: MemberId,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_damaged: bool,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.return_date.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewLoan {
    pub book_id: BookId,
    pub book_isbn: Option<String>,
    pub member_id: MemberId,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub is_damaged: bool,
}

#[derive(Debug, Clone, Default, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanPatch {
    /// `Some(None)` clears the return date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_date: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_damaged: Option<bool>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fine {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: FineId,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<LoanId>,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub member_id: MemberId,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub book_id: BookId,
    pub reason: String,
    pub amount: Amount,
    pub date: NaiveDate,
    #[serde(default)]
    pub collected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewFine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<LoanId>,
    pub member_id: MemberId,
    pub book_id: BookId,
    pub reason: String,
    pub amount: Amount,
    pub date: NaiveDate,
    #[serde(default)]
    pub collected: bool,
}

impl NewFine {
    pub fn with_id(self, id: FineId) -> Fine {
        Fine {
            id,
            loan_id: self.loan_id,
            member_id: self.member_id,
            book_id: self.book_id,
            reason: self.reason,
            amount: self.amount,
            date: self.date,
            collected: self.collected,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collected: Option<bool>,
}
