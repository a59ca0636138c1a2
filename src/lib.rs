pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod mail;
pub mod pagination;
pub mod state;
pub mod table;
pub mod users;
pub mod validation;
