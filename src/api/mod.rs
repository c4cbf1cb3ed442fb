//! API client module for Google Drive

mod about;
pub mod client;

pub use client::{ApiClient, ApiError, ClientFactory, ClientHandle, DriveClient, DriveClientFactory};
