use crate::api::{Book, BookId, Fine, Loan, Member, MemberId};

/// Last fetched state of every collection
/// Passed explicitly to every computation, nothing here is refreshed behind the caller's back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrarySnapshot {
    pub books: Vec<Book>,
    pub members: Vec<Member>,
    pub loans: Vec<Loan>,
    /// Fines persisted on the backend
    pub fines: Vec<Fine>,
}

impl LibrarySnapshot {
    pub fn book(&self, book_id: BookId) -> Option<&Book> {
        self.books.iter().find(|book| book.id == book_id)
    }

    pub fn member(&self, member_id: MemberId) -> Option<&Member> {
        self.members.iter().find(|member| member.id == member_id)
    }

    pub fn loans_for_member(&self, member_id: MemberId) -> impl Iterator<Item = &Loan> {
        self.loans
            .iter()
            .filter(move |loan| loan.member_id == member_id)
    }

    pub fn fines_for_member(&self, member_id: MemberId) -> impl Iterator<Item = &Fine> {
        self.fines
            .iter()
            .filter(move |fine| fine.member_id == member_id)
    }
}
