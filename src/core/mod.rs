//! Core types for the filter chain.
//!
//! - [`Request`] - HTTP request with a mutable attribute bag
//! - [`Response`] - HTTP response with builder pattern
//! - [`Attributes`] - string-keyed opaque values shared along one request
//! - [`Error`] - chain error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use filter_chain::core::{Request, Response};
//!
//! let mut req = Request::get("/hello".parse()?);
//! req.set_attribute("foo", "bar");
//!
//! let res = Response::ok(req.attributes().get_str("foo").unwrap_or_default().to_string());
//! ```

mod attributes;
mod error;
mod request;
mod response;

pub use attributes::Attributes;
pub use error::{Error, Result};
pub use request::Request;
pub use response::{Response, ResponseBuilder};
