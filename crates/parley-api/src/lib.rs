pub mod auth;
pub mod conversations;
pub mod devices;
pub mod error;
pub mod history;
pub mod middleware;
