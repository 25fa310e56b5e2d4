//! Built-in filters.

mod access_log;

pub use access_log::AccessLog;
