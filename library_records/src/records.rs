use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use library_ledger::api::{
    Book, BookPatch, Fine, FinePatch, Loan, LoanPatch, Member, MemberPatch, NewBookRecord,
    NewFine, NewLoan, NewMember,
};
use library_ledger::snapshot::LibrarySnapshot;

use crate::backend::{BackendError, Collection, LibraryBackend, RecordId};

/// Typed record stored in one of the backend collections
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;
    /// Body sent on create, the backend assigns the id
    type Draft: Serialize + Send + Sync;
    /// Body sent on partial update
    type Patch: Serialize + Send + Sync;

    fn record_id(&self) -> RecordId;
}

impl Record for Book {
    const COLLECTION: Collection = Collection::Books;
    type Draft = NewBookRecord;
    type Patch = BookPatch;

    fn record_id(&self) -> RecordId {
        self.id
    }
}

impl Record for Member {
    const COLLECTION: Collection = Collection::Members;
    type Draft = NewMember;
    type Patch = MemberPatch;

    fn record_id(&self) -> RecordId {
        self.id
    }
}

impl Record for Loan {
    const COLLECTION: Collection = Collection::Loans;
    type Draft = NewLoan;
    type Patch = LoanPatch;

    fn record_id(&self) -> RecordId {
        self.id
    }
}

impl Record for Fine {
    const COLLECTION: Collection = Collection::Fines;
    type Draft = NewFine;
    type Patch = FinePatch;

    fn record_id(&self) -> RecordId {
        self.id
    }
}

fn decode<R: Record>(value: Value) -> Result<R, BackendError> {
    Ok(serde_json::from_value(value)?)
}

/// Typed view over a [`LibraryBackend`]
#[derive(Clone)]
pub struct LibraryRecords {
    backend: Arc<dyn LibraryBackend>,
}

impl LibraryRecords {
    pub fn new(backend: Arc<dyn LibraryBackend>) -> Self {
        Self { backend }
    }

    pub async fn list<R: Record>(&self) -> Result<Vec<R>, BackendError> {
        self.backend
            .list(R::COLLECTION)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn get<R: Record>(&self, id: RecordId) -> Result<R, BackendError> {
        decode(self.backend.get(R::COLLECTION, id).await?)
    }

    /// Like [`Self::get`] but a missing record is `None` instead of an error
    pub async fn find<R: Record>(&self, id: RecordId) -> Result<Option<R>, BackendError> {
        match self.get(id).await {
            Ok(record) => Ok(Some(record)),
            Err(BackendError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn create<R: Record>(&self, draft: &R::Draft) -> Result<R, BackendError> {
        let body = serde_json::to_value(draft)?;
        let created = decode::<R>(self.backend.create(R::COLLECTION, body).await?)?;
        tracing::info!("Created {} record {}", R::COLLECTION, created.record_id());
        Ok(created)
    }

    pub async fn replace<R: Record>(&self, record: &R) -> Result<R, BackendError> {
        let body = serde_json::to_value(record)?;
        decode(
            self.backend
                .replace(R::COLLECTION, record.record_id(), body)
                .await?,
        )
    }

    pub async fn patch<R: Record>(&self, id: RecordId, patch: &R::Patch) -> Result<R, BackendError> {
        let body = serde_json::to_value(patch)?;
        let updated = decode(self.backend.patch(R::COLLECTION, id, body).await?)?;
        tracing::info!("Updated {} record {}", R::COLLECTION, id);
        Ok(updated)
    }

    pub async fn delete<R: Record>(&self, id: RecordId) -> Result<(), BackendError> {
        self.backend.delete(R::COLLECTION, id).await?;
        tracing::info!("Deleted {} record {}", R::COLLECTION, id);
        Ok(())
    }

    /// Fetches all four collections concurrently
    pub async fn fetch_snapshot(&self) -> Result<LibrarySnapshot, BackendError> {
        let (books, members, loans, fines) = tokio::try_join!(
            self.list::<Book>(),
            self.list::<Member>(),
            self.list::<Loan>(),
            self.list::<Fine>(),
        )?;
        Ok(LibrarySnapshot {
            books,
            members,
            loans,
            fines,
        })
    }
}

#[cfg(test)]
mod library_records_tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use library_ledger::api::{MemberStatus, NewBook};

    use super::*;
    use crate::backend::InMemoryLibraryBackend;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    /// Simple test to cover typed access
    /// 1. Creates a book and a member
    /// 2. Patches the member
    /// 3. Finds missing records as None
    /// 4. Fetches snapshot
    async fn test_typed_records_and_snapshot() {
        let records = LibraryRecords::new(Arc::new(InMemoryLibraryBackend::default()));

        let book: Book = records
            .create(
                &NewBook {
                    title: "Dune".to_string(),
                    author: "Frank Herbert".to_string(),
                    isbn: vec!["d-1".to_string(), "d-2".to_string()],
                    rent: Some(30),
                    ..NewBook::default()
                }
                .into_record_fields(),
            )
            .await
            .unwrap();
        assert_eq!(book.available_copies, Some(2));
        assert_eq!(book.is_available, Some(true));

        let member: Member = records
            .create(&NewMember {
                first_name: "Ada".to_string(),
                last_name: Some("Lovelace".to_string()),
                email: "ada@library.com".to_string(),
                phone: "555".to_string(),
                address: None,
                date_of_birth: None,
                membership_type: None,
                join_date: date("2024-01-01"),
                status: MemberStatus::Active,
                borrowed_books: vec![],
            })
            .await
            .unwrap();

        let member: Member = records
            .patch(member.id, &MemberPatch::borrowed_books(vec![book.id]))
            .await
            .unwrap();
        assert_eq!(member.borrowed_books, vec![book.id]);
        assert_eq!(member.first_name, "Ada");

        assert_eq!(records.find::<Loan>(12345).await.unwrap(), None);
        assert!(records.get::<Loan>(12345).await.unwrap_err().is_not_found());

        let snapshot = records.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.books, vec![book.clone()]);
        assert_eq!(snapshot.members, vec![member]);
        assert!(snapshot.loans.is_empty());

        records.delete::<Book>(book.id).await.unwrap();
        assert_eq!(records.list::<Book>().await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn test_malformed_record_is_reported() {
        let backend = Arc::new(InMemoryLibraryBackend::default());
        backend
            .create(Collection::Loans, json!({ "bookId": "not a number" }))
            .await
            .unwrap();
        let records = LibraryRecords::new(backend);

        assert!(matches!(
            records.list::<Loan>().await,
            Err(BackendError::Serialization(..))
        ));
    }
}
