use chrono::NaiveDate;
use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

use library_ledger::api::{
    Amount, BookId, FinePatch, Member, MemberId, MemberStatus, NewBook, NewMember,
};
use library_records::circulation::{CirculationStep, FineCollection, RollbackOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LoginResponse {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct AddBookRequest {
    pub title: String,
    pub author: String,
    /// One identifier per lendable copy
    pub isbn: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rent: Option<Amount>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub published_year: Option<i32>,
    #[serde(default)]
    pub language: Option<String>,
}

impl From<AddBookRequest> for NewBook {
    fn from(request: AddBookRequest) -> Self {
        NewBook {
            title: request.title,
            author: request.author,
            isbn: request.isbn,
            category: request.category,
            rent: request.rent,
            description: request.description,
            publisher: request.publisher,
            published_year: request.published_year,
            language: request.language,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub membership_type: Option<String>,
    /// Defaults to today
    #[serde(default)]
    pub join_date: Option<NaiveDate>,
}

impl AddMemberRequest {
    pub fn into_new_member(self, today: NaiveDate) -> NewMember {
        NewMember {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            address: self.address,
            date_of_birth: self.date_of_birth,
            membership_type: self.membership_type,
            join_date: self.join_date.unwrap_or(today),
            status: MemberStatus::Active,
            borrowed_books: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
/// Full replacement of the editable member details
pub struct UpdateMemberRequest {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub membership_type: Option<String>,
    #[serde(default)]
    pub join_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: MemberStatusField,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatusField {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl From<MemberStatusField> for MemberStatus {
    fn from(status: MemberStatusField) -> Self {
        match status {
            MemberStatusField::Active => MemberStatus::Active,
            MemberStatusField::Inactive => MemberStatus::Inactive,
            MemberStatusField::Suspended => MemberStatus::Suspended,
        }
    }
}

impl UpdateMemberRequest {
    /// Keeps the id and borrowed books of `member`
    pub fn apply_to(self, member: Member) -> Member {
        Member {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            address: self.address,
            date_of_birth: self.date_of_birth,
            membership_type: self.membership_type,
            join_date: self.join_date.or(member.join_date),
            status: self.status.into(),
            ..member
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct BorrowBookRequest {
    pub member_id: MemberId,
    /// Defaults to today
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Defaults to the start date plus the configured loan period
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnBookRequest {
    /// Defaults to today
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub damaged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct ManualFineRequest {
    pub book_id: BookId,
    pub reason: String,
    pub amount: Amount,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManualFineRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub amount: Option<Amount>,
}

impl From<UpdateManualFineRequest> for FinePatch {
    fn from(request: UpdateManualFineRequest) -> Self {
        FinePatch {
            reason: request.reason,
            amount: request.amount,
            collected: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct CollectedFines {
    pub member_id: MemberId,
    /// Outstanding loan fines settled by recording them as collected
    pub derived: Amount,
    pub recorded: Amount,
    pub manual: Amount,
    pub total: Amount,
}

impl From<FineCollection> for CollectedFines {
    fn from(collection: FineCollection) -> Self {
        Self {
            member_id: collection.member_id,
            derived: collection.derived,
            recorded: collection.recorded,
            manual: collection.manual,
            total: collection.total(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<CirculationStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
}

impl ErrorResponse {
    pub fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            failed_step: None,
            rollback: None,
        }
    }
}
