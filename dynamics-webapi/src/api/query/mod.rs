//! OData Query Builder Module
//!
//! Pure string construction: query options, record keys, percent encoding
//! and FetchXML paging. Nothing in here performs I/O.

pub mod builder;
pub mod fetchxml;
pub mod keys;

pub use builder::{ComposedQuery, Expand, QueryOptions, compose};
pub use fetchxml::{PagingInfo, inject_paging, parse_paging_cookie};
