//! Multi-account OAuth credential management for Google Drive
//!
//! Each named account gets a [`auth::CredentialSession`] that loads its cached
//! token, refreshes it, or falls back to browser consent; a
//! [`auth::SessionRegistry`] addresses the sessions by name.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
