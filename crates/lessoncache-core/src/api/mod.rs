//! HTTP access to the lesson content API.
//!
//! This module provides the `ApiClient` used both as the interceptor's
//! network path and by the synchronizer for typed bulk fetches.

pub mod client;
pub mod error;
pub mod types;

pub use client::ApiClient;
pub use error::ApiError;
pub use types::{BulkQuestion, HttpResponse, Request, ResponseType};
