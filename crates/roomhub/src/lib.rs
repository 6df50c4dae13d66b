pub mod api;
pub mod availability;
pub mod client;
pub mod config;
pub mod error;
pub mod mutation;
pub mod query;
pub mod sandbox;
pub mod telemetry;
pub mod upload;

pub use client::RentalClient;
pub use error::AppError;
