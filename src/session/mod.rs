//! Session management module.
//!
//! This module provides:
//! - `SessionId`: the `(client, transaction)` identity of a session
//! - `SessionManager`: the bounded pool of transaction handles and arenas
//! - `SessionLock`: scoped exclusive access to one session's resources

pub mod id;
pub mod manager;

pub use id::{ClientId, SessionId, TxnId};
pub use manager::{ActiveSession, SessionLock, SessionManager};
