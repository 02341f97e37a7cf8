//! Control-plane actions: collections, snapshots, transactions.

use tracing::{debug, info};

use crate::engine::DropMode;
use crate::error::ServerError;
use crate::service::{ServerState, Verb};
use crate::session::{ClientId, SessionId, TxnId};
use crate::uri::{parse_dec_id, parse_hex_id, RequestParams};

/// Dispatch one action. Returns the scalar response body, if the verb has
/// one; the buffer is allocated per call.
pub fn handle(
    state: &ServerState,
    client: ClientId,
    command: &str,
    body: &[u8],
) -> Result<Option<Vec<u8>>, ServerError> {
    let verb =
        Verb::parse(command).ok_or_else(|| ServerError::NotImplemented(command.to_string()))?;
    let params = RequestParams::parse(client, command);
    let options = params.options();
    debug!(verb = verb.name(), "action");

    match verb {
        Verb::CollectionOpen => {
            let name = params
                .col_name
                .ok_or_else(|| ServerError::invalid_argument("missing collection name argument"))?;
            let config = collection_config(body)?;
            let id = state.engine.collection_create(name, config.as_deref())?;
            Ok(Some(id.to_le_bytes().to_vec()))
        }
        Verb::CollectionDrop => {
            let col = params
                .col
                .ok_or_else(|| ServerError::invalid_argument("missing collection id argument"))?;
            let mode = DropMode::from_param(params.drop_mode);
            state.engine.collection_drop(parse_hex_id(col), mode)?;
            Ok(None)
        }
        Verb::SnapshotOpen => {
            if params.snap.is_some() {
                return Err(ServerError::invalid_argument(
                    "snapshot id must not be provided when opening",
                ));
            }
            let id = state.engine.snapshot_create()?;
            Ok(Some(id.to_le_bytes().to_vec()))
        }
        Verb::SnapshotDrop => {
            let snap = params
                .snap
                .ok_or_else(|| ServerError::invalid_argument("missing snapshot id argument"))?;
            state.engine.snapshot_drop(parse_dec_id(snap))?;
            Ok(None)
        }
        Verb::TxnBegin => {
            // An absent, zero or malformed id gets a server-assigned one.
            let txn_id = if params.session.txn.is_txn() {
                params.session.txn
            } else {
                TxnId::random()
            };
            let session = SessionId::new(client, txn_id);

            let mut active = state.sessions.request_txn(session)?;
            if let Err(err) = state.engine.transaction_init(&mut active.txn, options) {
                state.sessions.release_txn(session, active);
                return Err(err.into());
            }
            state.sessions.hold_txn(session, active);
            info!(txn = %txn_id, "transaction started");
            Ok(Some(txn_id.raw().to_le_bytes().to_vec()))
        }
        Verb::TxnCommit => {
            if params.txn.is_none() {
                return Err(ServerError::invalid_argument(
                    "missing transaction id argument",
                ));
            }
            let session = params.session;
            let mut active = state.sessions.continue_txn(session)?;
            let committed = state.engine.transaction_commit(&mut active.txn, options);
            // The session is released on success and failure alike; a failed
            // commit terminates the transaction.
            state.sessions.release_txn(session, active);
            committed?;
            info!(txn = %session.txn, "transaction committed");
            Ok(None)
        }
        _ => Err(ServerError::NotImplemented(command.to_string())),
    }
}

/// The optional collection config rides in the action body, read up to its
/// first NUL.
fn collection_config(body: &[u8]) -> Result<Option<String>, ServerError> {
    if body.is_empty() {
        return Ok(None);
    }
    let end = body.iter().position(|&byte| byte == 0).unwrap_or(body.len());
    let text = std::str::from_utf8(&body[..end])
        .map_err(|_| ServerError::invalid_argument("collection config must be utf-8"))?;
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::engine::Engine;
    use crate::session::SessionManager;

    use super::*;

    fn state() -> ServerState {
        ServerState::new(
            Engine::open("{}").expect("open"),
            SessionManager::new(4, Duration::from_secs(30)),
        )
    }

    fn client() -> ClientId {
        ClientId::from_peer("action-tests")
    }

    #[test]
    fn collection_open_returns_a_little_endian_id() {
        let state = state();
        let body = handle(&state, client(), "collection_open?col_name=col1", b"")
            .expect("open")
            .expect("scalar");
        let id = u64::from_le_bytes(body.try_into().expect("8 bytes"));
        assert_ne!(id, 0);

        // Re-opening by name yields the same id.
        let body = handle(&state, client(), "collection_open?col_name=col1", b"")
            .expect("reopen")
            .expect("scalar");
        assert_eq!(u64::from_le_bytes(body.try_into().expect("8 bytes")), id);
    }

    #[test]
    fn collection_open_requires_a_name() {
        let state = state();
        let err = handle(&state, client(), "collection_open", b"").expect_err("missing name");
        assert!(matches!(err, ServerError::InvalidArgument(_)));
    }

    #[test]
    fn snapshot_open_rejects_an_explicit_id() {
        let state = state();
        let err = handle(&state, client(), "snapshot_open?snap=5", b"").expect_err("explicit id");
        assert!(matches!(err, ServerError::InvalidArgument(_)));

        let body = handle(&state, client(), "snapshot_open", b"")
            .expect("open")
            .expect("scalar");
        assert_eq!(u64::from_le_bytes(body.try_into().expect("8 bytes")), 1);
    }

    #[test]
    fn txn_begin_echoes_the_requested_id_and_commit_releases_it() {
        let state = state();
        let body = handle(&state, client(), "txn_begin?txn=deadbeef", b"")
            .expect("begin")
            .expect("scalar");
        assert_eq!(
            u64::from_le_bytes(body.try_into().expect("8 bytes")),
            0xdead_beef
        );

        assert!(handle(&state, client(), "txn_commit?txn=deadbeef", b"")
            .expect("commit")
            .is_none());

        // The session is gone after the commit.
        let err =
            handle(&state, client(), "txn_commit?txn=deadbeef", b"").expect_err("recommit");
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[test]
    fn txn_begin_assigns_an_id_when_absent() {
        let state = state();
        let body = handle(&state, client(), "txn_begin", b"")
            .expect("begin")
            .expect("scalar");
        assert_ne!(u64::from_le_bytes(body.try_into().expect("8 bytes")), 0);
    }

    #[test]
    fn duplicate_begin_is_a_conflict() {
        let state = state();
        handle(&state, client(), "txn_begin?txn=aa", b"").expect("begin");
        let err = handle(&state, client(), "txn_begin?txn=aa", b"").expect_err("duplicate");
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[test]
    fn unknown_actions_are_not_implemented() {
        let state = state();
        let err = handle(&state, client(), "mystery_verb", b"").expect_err("unknown");
        assert!(matches!(err, ServerError::NotImplemented(_)));
    }
}
