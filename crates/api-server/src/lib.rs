#![warn(clippy::unwrap_used)]

pub mod campaigns;
pub mod communications;
pub mod customers;
pub mod rest;
pub mod segments;
pub mod server;

pub use rest::AppState;
pub use server::ApiServer;
