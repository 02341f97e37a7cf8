//! One handler per transport verb category.
//!
//! Handlers are synchronous: each runs on a blocking thread from start to
//! finish, holding the session lock across the engine call and the response
//! marshalling so arena-backed output buffers stay valid until the batch is
//! encoded.

pub mod action;
pub mod exchange;
pub mod get;
pub mod put;
