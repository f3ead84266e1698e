//! Multi-tier, request-scoped data caching and coordination for clients of
//! RESTful backends.
//!
//! A [`SourceList`] cascades reads and writes over an ordered stack of
//! sources (on-device [`LocalSource`]s in front, a [`RestSource`] behind
//! them) such that:
//! - the first source able to answer authoritatively wins;
//! - results propagate backward into earlier local sources as a
//!   write-through cache;
//! - each distinct read request (by filter + pagination) carries its own
//!   cache identity, so a later identical request hits locally without
//!   conflating unrelated requests;
//! - deletions invalidate every cache entry that references the id, in
//!   every tier.
//!
//! Entities stay opaque: the core reaches them through the [`Entity`] trait
//! and a [`Bindings`] record of URL factories. Persistence is pluggable
//! behind the [`store`] contracts, with in-memory and SQLite-backed
//! implementations included.

mod bindings;
mod details;
mod list;
mod outcome;
mod source;
pub mod store;
pub mod transport;

pub use bindings::{Bindings, Entity};
pub use details::{Filter, Pagination, ParamFilter, RequestDetails, RequestType, DEFAULT_PAGE_SIZE};
pub use list::SourceList;
pub use outcome::{
  BulkRead, BulkReadResult, DeleteResult, ErrorKind, Failure, ReadResult, WriteListResult,
  WriteResult,
};
pub use source::{LocalSource, RemoteOptions, RestSource, Source, SourceKind};
