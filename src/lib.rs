//! Scroll-driven, cache-backed chapter loading for serialized books.
//!
//! - `chapter_index`: resolve a book's chapter list once, cache first.
//! - `fetch`: load single chapters off-thread, one request per chapter.
//! - `pagination`: grow the window of resident chapters as the reader scrolls.
//! - `session`: wire configuration, cache, server and window together.

pub mod cancellation;
pub mod chapter_index;
pub mod config;
pub mod error;
pub mod fetch;
pub mod pagination;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;
