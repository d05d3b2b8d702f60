pub mod api;
pub mod fines;
pub mod ledger;
pub mod reports;
pub mod snapshot;

#[cfg(test)]
mod test_utils;
