use chrono::NaiveDate;

use crate::api::{Book, BookId, Loan, LoanId, Member, MemberId, MemberStatus};

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("Invalid test date")
}

pub fn book(id: BookId, copies: &[&str]) -> Book {
    Book {
        id,
        title: format!("title{}", id),
        author: "Author".to_string(),
        isbn: copies.iter().map(|copy| copy.to_string()).collect(),
        category: None,
        rent: None,
        description: None,
        publisher: None,
        published_year: None,
        pages: None,
        language: None,
        image: None,
        total_copies: Some(copies.len() as u32),
        available_copies: None,
        is_available: None,
    }
}

pub fn with_rent(book: Book, rent: i64) -> Book {
    Book {
        rent: Some(rent),
        ..book
    }
}

pub fn member(id: MemberId, first_name: &str) -> Member {
    Member {
        id,
        first_name: first_name.to_string(),
        last_name: Some("Member".to_string()),
        name: None,
        email: format!("{}@library.com", first_name.to_lowercase()),
        phone: "123456".to_string(),
        address: None,
        date_of_birth: None,
        membership_type: None,
        join_date: Some(date("2023-06-01")),
        status: MemberStatus::Active,
        borrowed_books: vec![],
    }
}

/// Active loan started 2024-01-01 and due 2024-01-08
pub fn loan(id: LoanId, book_id: BookId, member_id: MemberId, copy: Option<&str>) -> Loan {
    Loan {
        id,
        book_id,
        book_isbn: copy.map(str::to_string),
        member_id,
        start_date: date("2024-01-01"),
        due_date: date("2024-01-08"),
        return_date: None,
        is_damaged: false,
    }
}

pub fn returned(loan: Loan, return_date: NaiveDate) -> Loan {
    Loan {
        return_date: Some(return_date),
        ..loan
    }
}
