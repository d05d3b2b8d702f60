use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::{Error, HttpResponse};
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use library_ledger::api::{
    Book, BookId, FineId, FinePatch, Loan, LoanId, Member, MemberId, NewBook, NewFine,
};
use library_ledger::fines::{fine_statements, MemberFineStatement};
use library_ledger::ledger::{Availability, LoanLedger};
use library_ledger::reports::{loan_history, LibraryReport, MemberActivity};
use library_ledger::snapshot::LibrarySnapshot;
use library_records::backend::BackendError;
use library_records::circulation::{
    BorrowRequest, CirculationError, CirculationStep, ReturnRequest,
};
use library_records::fines_cache::FinesCacheError;

use crate::api::{
    AddBookRequest, AddMemberRequest, BorrowBookRequest, CollectedFines, ErrorResponse,
    LoginRequest, LoginResponse, ManualFineRequest, ReturnBookRequest, UpdateManualFineRequest,
    UpdateMemberRequest,
};
use crate::state::ConsoleState;

fn backend_failure(operation: &str, err: BackendError) -> HttpResponse {
    tracing::error!("{} failed {}", operation, err);
    let body = ErrorResponse::new(&err);
    match err {
        BackendError::NotFound { .. } => HttpResponse::NotFound().json(body),
        BackendError::Status { .. } | BackendError::Transport(_) => {
            HttpResponse::BadGateway().json(body)
        }
        BackendError::Serialization(_) | BackendError::Other(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn circulation_failure(operation: &str, err: CirculationError) -> HttpResponse {
    if err.is_validation() {
        tracing::warn!("{} rejected {}", operation, err);
    }
    let body = ErrorResponse::new(&err);
    match err {
        CirculationError::BookNotFound(_)
        | CirculationError::MemberNotFound(_)
        | CirculationError::LoanNotFound(_) => HttpResponse::NotFound().json(body),
        CirculationError::LoanAlreadyReturned(_) | CirculationError::Ledger(_) => {
            HttpResponse::Conflict().json(body)
        }
        CirculationError::DueBeforeStart { .. } => HttpResponse::UnprocessableEntity().json(body),
        CirculationError::Backend(err) => backend_failure(operation, err),
        CirculationError::FinesCache(err) => fines_cache_failure(operation, err),
        CirculationError::ConcurrentBorrow { rollback, .. } => {
            tracing::error!("{} lost a race for the copy {}", operation, body.error);
            HttpResponse::Conflict().json(ErrorResponse {
                failed_step: Some(CirculationStep::VerifyCopy),
                rollback: Some(rollback),
                ..body
            })
        }
        CirculationError::PartiallyApplied { step, rollback, .. } => {
            tracing::error!("{} partially applied {}", operation, body.error);
            HttpResponse::BadGateway().json(ErrorResponse {
                failed_step: Some(step),
                rollback: Some(rollback),
                ..body
            })
        }
    }
}

fn fines_cache_failure(operation: &str, err: FinesCacheError) -> HttpResponse {
    tracing::error!("{} failed {}", operation, err);
    match err {
        FinesCacheError::NotFound(_) => HttpResponse::NotFound().json(ErrorResponse::new(err)),
        _ => HttpResponse::InternalServerError().json(ErrorResponse::new(err)),
    }
}

fn unprocessable(message: &str) -> HttpResponse {
    tracing::warn!("Rejected request: {}", message);
    HttpResponse::UnprocessableEntity().json(ErrorResponse::new(message))
}

async fn fetch_snapshot(state: &ConsoleState) -> Result<LibrarySnapshot, HttpResponse> {
    state
        .records
        .fetch_snapshot()
        .await
        .map_err(|err| backend_failure("Fetch snapshot", err))
}

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn login(
    state: Data<ConsoleState>,
    credentials: web::Json<LoginRequest>,
) -> Result<HttpResponse, Error> {
    let credentials = credentials.into_inner();
    Ok(
        if state.admin.matches(&credentials.email, &credentials.password) {
            tracing::info!("Administrator {} logged in", credentials.email);
            HttpResponse::Ok().json(LoginResponse {
                email: state.admin.email.clone(),
            })
        } else {
            tracing::warn!("Rejected login for {}", credentials.email);
            HttpResponse::Unauthorized().json(ErrorResponse::new("Invalid email or password"))
        },
    )
}

#[api_v2_operation]
pub async fn get_all_books(state: Data<ConsoleState>) -> Result<HttpResponse, Error> {
    Ok(match state.records.list::<Book>().await {
        Ok(books) => HttpResponse::Ok().json(books),
        Err(err) => backend_failure("Get all books", err),
    })
}

#[api_v2_operation]
pub async fn add_book(
    state: Data<ConsoleState>,
    request: web::Json<AddBookRequest>,
) -> Result<HttpResponse, Error> {
    let new_book = NewBook::from(request.into_inner());
    if new_book.title.trim().is_empty() {
        return Ok(unprocessable("Book title must not be empty"));
    }
    Ok(
        match state
            .records
            .create::<Book>(&new_book.into_record_fields())
            .await
        {
            Ok(book) => HttpResponse::Created()
                .append_header((LOCATION, format!("/api/books/{}", book.id)))
                .json(book),
            Err(err) => backend_failure("Add book", err),
        },
    )
}

/// Refused while any copy of the book is lent
#[api_v2_operation]
pub async fn delete_book(
    state: Data<ConsoleState>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    let book_id = book_id.into_inner();
    let (book, loans) = match tokio::try_join!(
        state.records.find::<Book>(book_id),
        state.records.list::<Loan>()
    ) {
        Ok(found) => found,
        Err(err) => return Ok(backend_failure("Delete book", err)),
    };
    let Some(book) = book else {
        return Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Book {} not found",
            book_id
        ))));
    };
    let active_loans = LoanLedger::new(&book, &loans).active_loans().len();
    if active_loans > 0 {
        tracing::warn!(
            "Delete of book {} rejected, {} copies are lent",
            book.id,
            active_loans
        );
        return Ok(HttpResponse::Conflict().json(ErrorResponse::new(format!(
            "Book {} has {} active loans",
            book.id, active_loans
        ))));
    }
    Ok(match state.records.delete::<Book>(book.id).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(err) => backend_failure("Delete book", err),
    })
}

#[api_v2_operation]
pub async fn get_all_availability(state: Data<ConsoleState>) -> Result<HttpResponse, Error> {
    let (books, loans) = match tokio::try_join!(
        state.records.list::<Book>(),
        state.records.list::<Loan>()
    ) {
        Ok(collections) => collections,
        Err(err) => return Ok(backend_failure("Get availability", err)),
    };
    let availability: Vec<Availability> = books
        .iter()
        .map(|book| LoanLedger::new(book, &loans).availability())
        .collect();
    Ok(HttpResponse::Ok().json(availability))
}

#[api_v2_operation]
pub async fn get_book_availability(
    state: Data<ConsoleState>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    let book_id = book_id.into_inner();
    let (book, loans) = match tokio::try_join!(
        state.records.find::<Book>(book_id),
        state.records.list::<Loan>()
    ) {
        Ok(found) => found,
        Err(err) => return Ok(backend_failure("Get book availability", err)),
    };
    let Some(book) = book else {
        return Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Book {} not found",
            book_id
        ))));
    };
    let ledger = LoanLedger::new(&book, &loans);
    if let Err(err) = ledger.validate() {
        tracing::warn!("Inconsistent loans for book {}: {}", book.id, err);
    }
    Ok(HttpResponse::Ok().json(ledger.availability()))
}

#[api_v2_operation]
pub async fn borrow_book(
    state: Data<ConsoleState>,
    book_id: web::Path<BookId>,
    request: web::Json<BorrowBookRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();
    let start_date = request.start_date.unwrap_or_else(|| state.today());
    let borrow = BorrowRequest {
        book_id: book_id.into_inner(),
        member_id: request.member_id,
        start_date,
        due_date: request
            .due_date
            .unwrap_or_else(|| state.due_date_from(start_date)),
    };
    Ok(match state.circulation.borrow(borrow).await {
        Ok(loan) => HttpResponse::Created().json(loan),
        Err(err) => circulation_failure("Borrow book", err),
    })
}

#[api_v2_operation]
pub async fn return_book(
    state: Data<ConsoleState>,
    loan_id: web::Path<LoanId>,
    request: web::Json<ReturnBookRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();
    let return_request = ReturnRequest {
        loan_id: loan_id.into_inner(),
        return_date: request.return_date.unwrap_or_else(|| state.today()),
        damaged: request.damaged,
    };
    Ok(match state.circulation.return_loan(return_request).await {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(err) => circulation_failure("Return book", err),
    })
}

#[api_v2_operation]
pub async fn get_all_members(state: Data<ConsoleState>) -> Result<HttpResponse, Error> {
    Ok(match state.records.list::<Member>().await {
        Ok(members) => HttpResponse::Ok().json(members),
        Err(err) => backend_failure("Get all members", err),
    })
}

#[api_v2_operation]
pub async fn add_member(
    state: Data<ConsoleState>,
    request: web::Json<AddMemberRequest>,
) -> Result<HttpResponse, Error> {
    let new_member = request.into_inner().into_new_member(state.today());
    if new_member.first_name.trim().is_empty() || new_member.email.trim().is_empty() {
        return Ok(unprocessable("Member first name and email must not be empty"));
    }
    Ok(match state.records.create::<Member>(&new_member).await {
        Ok(member) => HttpResponse::Created()
            .append_header((LOCATION, format!("/api/members/{}", member.id)))
            .json(member),
        Err(err) => backend_failure("Add member", err),
    })
}

/// Replaces the member's details, borrowed books are kept
#[api_v2_operation]
pub async fn update_member(
    state: Data<ConsoleState>,
    member_id: web::Path<MemberId>,
    request: web::Json<UpdateMemberRequest>,
) -> Result<HttpResponse, Error> {
    let member_id = member_id.into_inner();
    let request = request.into_inner();
    if request.first_name.trim().is_empty() || request.email.trim().is_empty() {
        return Ok(unprocessable("Member first name and email must not be empty"));
    }
    let member = match state.records.find::<Member>(member_id).await {
        Ok(Some(member)) => member,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
                "Member {} not found",
                member_id
            ))))
        }
        Err(err) => return Ok(backend_failure("Update member", err)),
    };
    Ok(match state.records.replace(&request.apply_to(member)).await {
        Ok(member) => HttpResponse::Ok().json(member),
        Err(err) => backend_failure("Update member", err),
    })
}

/// Refused while the member holds any active loan
#[api_v2_operation]
pub async fn delete_member(
    state: Data<ConsoleState>,
    member_id: web::Path<MemberId>,
) -> Result<HttpResponse, Error> {
    let member_id = member_id.into_inner();
    let (member, loans) = match tokio::try_join!(
        state.records.find::<Member>(member_id),
        state.records.list::<Loan>()
    ) {
        Ok(found) => found,
        Err(err) => return Ok(backend_failure("Delete member", err)),
    };
    if member.is_none() {
        return Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Member {} not found",
            member_id
        ))));
    }
    let active_loans = loans
        .iter()
        .filter(|loan| loan.member_id == member_id && loan.is_active())
        .count();
    if active_loans > 0 {
        tracing::warn!(
            "Delete of member {} rejected, {} loans are active",
            member_id,
            active_loans
        );
        return Ok(HttpResponse::Conflict().json(ErrorResponse::new(format!(
            "Member {} has {} active loans",
            member_id, active_loans
        ))));
    }
    Ok(match state.records.delete::<Member>(member_id).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(err) => backend_failure("Delete member", err),
    })
}

#[api_v2_operation]
pub async fn get_member_activity(
    state: Data<ConsoleState>,
    member_id: web::Path<MemberId>,
) -> Result<HttpResponse, Error> {
    let member_id = member_id.into_inner();
    let snapshot = match fetch_snapshot(&state).await {
        Ok(snapshot) => snapshot,
        Err(response) => return Ok(response),
    };
    Ok(match MemberActivity::build(&snapshot, member_id) {
        Some(activity) => HttpResponse::Ok().json(activity),
        None => HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Member {} not found",
            member_id
        ))),
    })
}

#[api_v2_operation]
pub async fn get_report_summary(state: Data<ConsoleState>) -> Result<HttpResponse, Error> {
    Ok(match fetch_snapshot(&state).await {
        Ok(snapshot) => HttpResponse::Ok().json(LibraryReport::build(&snapshot)),
        Err(response) => response,
    })
}

#[api_v2_operation]
pub async fn get_loan_history(state: Data<ConsoleState>) -> Result<HttpResponse, Error> {
    Ok(match fetch_snapshot(&state).await {
        Ok(snapshot) => HttpResponse::Ok().json(loan_history(&snapshot)),
        Err(response) => response,
    })
}

#[api_v2_operation]
pub async fn get_all_fines(state: Data<ConsoleState>) -> Result<HttpResponse, Error> {
    Ok(match fetch_snapshot(&state).await {
        Ok(snapshot) => HttpResponse::Ok().json(fine_statements(
            &state.fine_policy,
            &snapshot,
            &state.fines_cache.list(),
            state.today(),
        )),
        Err(response) => response,
    })
}

#[api_v2_operation]
pub async fn get_member_fines(
    state: Data<ConsoleState>,
    member_id: web::Path<MemberId>,
) -> Result<HttpResponse, Error> {
    let member_id = member_id.into_inner();
    let snapshot = match fetch_snapshot(&state).await {
        Ok(snapshot) => snapshot,
        Err(response) => return Ok(response),
    };
    Ok(match snapshot.member(member_id) {
        Some(member) => HttpResponse::Ok().json(MemberFineStatement::build(
            &state.fine_policy,
            &snapshot,
            &state.fines_cache.list_for_member(member_id),
            member,
            state.today(),
        )),
        None => HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Member {} not found",
            member_id
        ))),
    })
}

#[api_v2_operation]
pub async fn add_manual_fine(
    state: Data<ConsoleState>,
    member_id: web::Path<MemberId>,
    request: web::Json<ManualFineRequest>,
) -> Result<HttpResponse, Error> {
    let member_id = member_id.into_inner();
    let request = request.into_inner();
    if request.amount <= 0 {
        return Ok(unprocessable("Fine amount must be positive"));
    }
    if request.reason.trim().is_empty() {
        return Ok(unprocessable("Fine reason must not be empty"));
    }
    match tokio::try_join!(
        state.records.find::<Member>(member_id),
        state.records.find::<Book>(request.book_id)
    ) {
        Ok((Some(_), Some(_))) => {}
        Ok(_) => {
            tracing::warn!(
                "Manual fine for member {} and book {} rejected, record missing",
                member_id,
                request.book_id
            );
            return Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
                "Member {} or book {} not found",
                member_id, request.book_id
            ))));
        }
        Err(err) => return Ok(backend_failure("Add manual fine", err)),
    }
    let new_fine = NewFine {
        loan_id: None,
        member_id,
        book_id: request.book_id,
        reason: request.reason,
        amount: request.amount,
        date: request.date.unwrap_or_else(|| state.today()),
        collected: false,
    };
    Ok(match state.fines_cache.add(new_fine) {
        Ok(fine) => HttpResponse::Created().json(fine),
        Err(err) => fines_cache_failure("Add manual fine", err),
    })
}

fn is_manual_fine_of(state: &ConsoleState, member_id: MemberId, fine_id: FineId) -> bool {
    state
        .fines_cache
        .list_for_member(member_id)
        .iter()
        .any(|fine| fine.id == fine_id)
}

#[api_v2_operation]
pub async fn delete_manual_fine(
    state: Data<ConsoleState>,
    path: web::Path<(MemberId, FineId)>,
) -> Result<HttpResponse, Error> {
    let (member_id, fine_id) = path.into_inner();
    if !is_manual_fine_of(&state, member_id, fine_id) {
        return Ok(fines_cache_failure(
            "Delete manual fine",
            FinesCacheError::NotFound(fine_id),
        ));
    }
    Ok(match state.fines_cache.remove(fine_id) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(err) => fines_cache_failure("Delete manual fine", err),
    })
}

#[api_v2_operation]
pub async fn update_manual_fine(
    state: Data<ConsoleState>,
    path: web::Path<(MemberId, FineId)>,
    request: web::Json<UpdateManualFineRequest>,
) -> Result<HttpResponse, Error> {
    let (member_id, fine_id) = path.into_inner();
    let patch = FinePatch::from(request.into_inner());
    if patch.amount.is_some_and(|amount| amount <= 0) {
        return Ok(unprocessable("Fine amount must be positive"));
    }
    if patch
        .reason
        .as_deref()
        .is_some_and(|reason| reason.trim().is_empty())
    {
        return Ok(unprocessable("Fine reason must not be empty"));
    }
    if !is_manual_fine_of(&state, member_id, fine_id) {
        return Ok(fines_cache_failure(
            "Update manual fine",
            FinesCacheError::NotFound(fine_id),
        ));
    }
    Ok(match state.fines_cache.update(fine_id, patch) {
        Ok(fine) => HttpResponse::Ok().json(fine),
        Err(err) => fines_cache_failure("Update manual fine", err),
    })
}

/// Settles every outstanding loan, recorded and manual fine of the member
#[api_v2_operation]
pub async fn collect_member_fines(
    state: Data<ConsoleState>,
    member_id: web::Path<MemberId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match state
            .circulation
            .collect_fines(member_id.into_inner(), &state.fines_cache, state.today())
            .await
        {
            Ok(collection) => HttpResponse::Ok().json(CollectedFines::from(collection)),
            Err(err) => circulation_failure("Collect fines", err),
        },
    )
}
