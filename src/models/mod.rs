//! Data models for Drive entities

mod user;

pub use user::*;
