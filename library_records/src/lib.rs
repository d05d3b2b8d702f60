pub mod backend;
pub mod circulation;
pub mod fines_cache;
pub mod records;

#[cfg(any(feature = "client", test))]
pub mod client;
