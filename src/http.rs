//! Convenient re-exports of http types that are part of `scenario-mock`'s public API.
pub use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
