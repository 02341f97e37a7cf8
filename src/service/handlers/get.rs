//! No-body listings: collections and snapshots.

use arrow_array::RecordBatch;
use tracing::debug;

use crate::columnar::{batch as output, names};
use crate::error::ServerError;
use crate::service::{ServerState, Verb};
use crate::session::ClientId;
use crate::uri::RequestParams;

pub fn handle(
    state: &ServerState,
    client: ClientId,
    command: &str,
) -> Result<RecordBatch, ServerError> {
    let verb =
        Verb::parse(command).ok_or_else(|| ServerError::NotImplemented(command.to_string()))?;
    let params = RequestParams::parse(client, command);
    debug!(verb = verb.name(), session = %params.session, "get");

    let mut lock = state.sessions.lock(params.session)?;

    match verb {
        Verb::ListCols => {
            let (_, arena) = lock.parts();
            state.engine.collection_list(arena)?;
            let arena = lock.arena();
            output::batch(vec![
                output::u64_column(names::COLS, &arena.ids),
                output::utf8_column(names::NAMES, &arena.offsets, &arena.values)?,
            ])
        }
        Verb::ListSnaps => {
            let (_, arena) = lock.parts();
            state.engine.snapshot_list(arena)?;
            let arena = lock.arena();
            output::batch(vec![output::u64_column(names::SNAPS, &arena.ids)])
        }
        _ => Err(ServerError::invalid_argument(format!(
            "{} is not a get command",
            verb.name()
        ))),
    }
}
