use std::sync::Arc;
use std::time::UNIX_EPOCH;

use reqwest::StatusCode;
use serde_json::{json, Value};

use library_admin::api::{
    AddBookRequest, AddMemberRequest, BorrowBookRequest, LoginRequest, ReturnBookRequest,
};
use library_ledger::api::{Book, BookPatch, Loan, Member, NewBook};
use library_records::client::LibraryRestClient;
use library_records::records::LibraryRecords;

use crate::{ADMIN_URL, BACKEND_URL};

fn unique_suffix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[tokio::test]
/// Simple test for the REST backend
/// Creates a book
/// Gets the book
/// Patches the availability of the book
/// Lists books and checks the book is there
/// Deletes the book
async fn library_backend_e2e_test() {
    let client = LibraryRestClient::new(BACKEND_URL).expect("Failed to create client");
    let records = LibraryRecords::new(Arc::new(client));

    let title = format!("Solaris {}", unique_suffix());
    let book: Book = records
        .create(
            &NewBook {
                title: title.clone(),
                author: "Stanislaw Lem".to_string(),
                isbn: vec!["s-1".to_string(), "s-2".to_string()],
                rent: Some(25),
                ..NewBook::default()
            }
            .into_record_fields(),
        )
        .await
        .expect("Failed to add book");

    let returned_book: Book = records.get(book.id).await.expect("Failed to get book");
    assert_eq!(returned_book, book);

    let patched: Book = records
        .patch(book.id, &BookPatch::availability(1))
        .await
        .expect("Failed to patch book");
    assert_eq!(patched.available_copies, Some(1));
    assert_eq!(patched.title, title);

    let books: Vec<Book> = records.list().await.expect("Failed to list books");
    assert!(books.iter().any(|listed| listed.id == book.id));

    records
        .delete::<Book>(book.id)
        .await
        .expect("Failed to delete book");
    assert_eq!(
        records.find::<Book>(book.id).await.expect("Failed to find book"),
        None
    );
}

#[tokio::test]
/// Circulation through the admin service
/// Logs in
/// Adds a book with a single copy and a member
/// Borrows the book, second borrow is rejected
/// Returns the book damaged
/// Checks the recorded fine, member activity and report
async fn library_admin_e2e_test() {
    let client = reqwest::Client::new();
    let suffix = unique_suffix();

    // LOGIN
    let response = client
        .post(format!("{}/api/login", ADMIN_URL))
        .json(&LoginRequest {
            email: "admin@library.com".to_string(),
            password: "admin123".to_string(),
        })
        .send()
        .await
        .expect("Failed to login");
    assert_eq!(response.status(), StatusCode::OK);

    // ADD BOOK AND MEMBER
    let book: Book = client
        .post(format!("{}/api/books", ADMIN_URL))
        .json(&AddBookRequest {
            title: format!("Dune {}", suffix),
            author: "Frank Herbert".to_string(),
            isbn: vec![format!("dune-{}", suffix)],
            category: Some("Science fiction".to_string()),
            rent: Some(30),
            description: None,
            publisher: None,
            published_year: Some(1965),
            language: None,
        })
        .send()
        .await
        .expect("Failed to add book")
        .json()
        .await
        .expect("Failed to read book");

    let member: Member = client
        .post(format!("{}/api/members", ADMIN_URL))
        .json(&AddMemberRequest {
            first_name: "Ada".to_string(),
            last_name: Some(format!("Lovelace{}", suffix)),
            email: format!("ada{}@library.com", suffix),
            phone: "555".to_string(),
            address: None,
            date_of_birth: None,
            membership_type: None,
            join_date: None,
        })
        .send()
        .await
        .expect("Failed to add member")
        .json()
        .await
        .expect("Failed to read member");

    // BORROW
    let borrow = BorrowBookRequest {
        member_id: member.id,
        start_date: None,
        due_date: None,
    };
    let response = client
        .post(format!("{}/api/books/{}/borrow", ADMIN_URL, book.id))
        .json(&borrow)
        .send()
        .await
        .expect("Failed to borrow book");
    assert_eq!(response.status(), StatusCode::CREATED);
    let loan: Loan = response.json().await.expect("Failed to read loan");
    assert_eq!(loan.book_isbn, Some(format!("dune-{}", suffix)));

    // BORROW AGAIN - no copy left
    let response = client
        .post(format!("{}/api/books/{}/borrow", ADMIN_URL, book.id))
        .json(&borrow)
        .send()
        .await
        .expect("Failed to borrow book");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // RETURN DAMAGED
    let outcome: Value = client
        .post(format!("{}/api/loans/{}/return", ADMIN_URL, loan.id))
        .json(&ReturnBookRequest {
            return_date: None,
            damaged: true,
        })
        .send()
        .await
        .expect("Failed to return book")
        .json()
        .await
        .expect("Failed to read return outcome");
    assert_eq!(outcome["fine"]["reason"], json!("Damage"));
    assert_eq!(outcome["fine"]["amount"], json!(50));

    // MEMBER ACTIVITY
    let activity: Value = client
        .get(format!("{}/api/members/{}/activity", ADMIN_URL, member.id))
        .send()
        .await
        .expect("Failed to get member activity")
        .json()
        .await
        .expect("Failed to read member activity");
    assert_eq!(activity["active_loans"], json!([]));
    assert_eq!(activity["recent_returns"][0]["loan_id"], json!(loan.id));

    // FINES
    let fines: Value = client
        .get(format!("{}/api/members/{}/fines", ADMIN_URL, member.id))
        .send()
        .await
        .expect("Failed to get member fines")
        .json()
        .await
        .expect("Failed to read member fines");
    assert_eq!(fines["total_outstanding"], json!(50));

    // REPORT
    let report: Value = client
        .get(format!("{}/api/reports/summary", ADMIN_URL))
        .send()
        .await
        .expect("Failed to get report")
        .json()
        .await
        .expect("Failed to read report");
    assert!(report["total_returned"].as_u64().unwrap_or_default() >= 1);
}
