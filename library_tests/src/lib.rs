//! Tests against running services, by default the json-server backend on port 3000
//! and `library_admin` on port 8080 using that backend

#[cfg(feature = "system_tests")]
mod system_tests;


pub const BACKEND_URL: &str = "http://127.0.0.1:3000";
pub const ADMIN_URL: &str = "http://127.0.0.1:8080";
