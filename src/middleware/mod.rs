//! Request middleware and extractors

pub mod auth;
pub mod permissions;
pub mod rate_limit;
pub mod tenant;
