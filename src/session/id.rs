//! Session identity types.
//!
//! A session is the pair of a client identity and a transaction id. The
//! client identity is derived deterministically from the transport-level
//! peer address, so requests arriving over one physical connection map to
//! the same sessions; only equality and hashing are ever required of it.

use std::fmt;
use std::hash::Hasher;

use siphasher::sip::SipHasher13;
use uuid::Uuid;

/// Stable identifier of one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Hash a transport peer address into a client identity.
    pub fn from_peer(peer: &str) -> Self {
        let mut hasher = SipHasher13::new();
        hasher.write(peer.as_bytes());
        Self(hasher.finish())
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A 64-bit transaction id; zero means "no transaction".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TxnId(u64);

impl TxnId {
    pub const NONE: TxnId = TxnId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// A random non-zero id, backed by OS randomness. `std::rand`-grade
    /// generators collide on birthday scale at ~2^32 sessions.
    pub fn random() -> Self {
        loop {
            let (id, _) = Uuid::new_v4().as_u64_pair();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_txn(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TxnId {
    /// 16-character lowercase hex, the wire format of transaction ids.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The `(client, transaction)` identity a session is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub client: ClientId,
    pub txn: TxnId,
}

impl SessionId {
    pub fn new(client: ClientId, txn: TxnId) -> Self {
        Self { client, txn }
    }

    pub fn is_txn(&self) -> bool {
        self.txn.is_txn()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}/{}", self.client.0, self.txn)
    }
}
