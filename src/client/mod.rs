//! Client Module
//!
//! HTTP transport and status classification.

pub mod http;

pub use http::{classify_status, mentions_quota, HttpClient};
