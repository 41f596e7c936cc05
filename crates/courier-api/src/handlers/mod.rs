//! Request handlers.

pub mod health;
pub mod reset_password;
