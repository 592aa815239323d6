//! Feed module
//!
//! The device side of the feed: URL construction, token lookup, and the
//! device state built from server pushes.

pub mod adapter;
pub mod auth;
pub mod devices;
pub mod endpoint;
