pub mod a1;
pub mod auth;
pub mod cache;
pub mod client;
pub mod columns;
pub mod commands;
pub mod template;
