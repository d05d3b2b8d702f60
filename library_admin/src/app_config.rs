use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(web::resource("/login").route(web::post().to(handlers::login)))
                .service(
                    web::resource("/books")
                        .route(web::get().to(handlers::get_all_books))
                        .route(web::post().to(handlers::add_book)),
                )
                .service(
                    web::resource("/books/availability")
                        .route(web::get().to(handlers::get_all_availability)),
                )
                .service(
                    web::scope("/books/{book_id}")
                        .service(
                            web::resource("").route(web::delete().to(handlers::delete_book)),
                        )
                        .service(
                            web::resource("/availability")
                                .route(web::get().to(handlers::get_book_availability)),
                        )
                        .service(
                            web::resource("/borrow").route(web::post().to(handlers::borrow_book)),
                        ),
                )
                .service(
                    web::resource("/loans/{loan_id}/return")
                        .route(web::post().to(handlers::return_book)),
                )
                .service(
                    web::resource("/members")
                        .route(web::get().to(handlers::get_all_members))
                        .route(web::post().to(handlers::add_member)),
                )
                .service(
                    web::scope("/members/{member_id}")
                        .service(
                            web::resource("")
                                .route(web::put().to(handlers::update_member))
                                .route(web::delete().to(handlers::delete_member)),
                        )
                        .service(
                            web::resource("/activity")
                                .route(web::get().to(handlers::get_member_activity)),
                        )
                        .service(
                            web::resource("/fines")
                                .route(web::get().to(handlers::get_member_fines))
                                .route(web::post().to(handlers::add_manual_fine)),
                        )
                        .service(
                            web::resource("/fines/collect")
                                .route(web::post().to(handlers::collect_member_fines)),
                        )
                        .service(
                            web::resource("/fines/{fine_id}")
                                .route(web::patch().to(handlers::update_manual_fine))
                                .route(web::delete().to(handlers::delete_manual_fine)),
                        ),
                )
                .service(web::resource("/fines").route(web::get().to(handlers::get_all_fines)))
                .service(
                    web::scope("/reports")
                        .service(
                            web::resource("/summary")
                                .route(web::get().to(handlers::get_report_summary)),
                        )
                        .service(
                            web::resource("/loans").route(web::get().to(handlers::get_loan_history)),
                        ),
                ),
        );
}
