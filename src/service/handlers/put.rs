//! Batch-in, status-out data plane: writes and path writes.
//!
//! Null entries in the values column delete the corresponding keys; a
//! missing values column deletes every addressed key.

use arrow_array::RecordBatch;
use tracing::debug;

use crate::columnar::{input, names};
use crate::engine::BytesSpan;
use crate::error::ServerError;
use crate::service::{ServerState, Verb};
use crate::session::ClientId;
use crate::uri::RequestParams;

pub fn handle(
    state: &ServerState,
    client: ClientId,
    command: &str,
    request: &RecordBatch,
) -> Result<(), ServerError> {
    let verb =
        Verb::parse(command).ok_or_else(|| ServerError::NotImplemented(command.to_string()))?;
    let params = RequestParams::parse(client, command);
    let options = params.options();
    let collections = input::collections_input(request, params.collection_id())?;
    let tasks = request.num_rows();
    debug!(verb = verb.name(), tasks, session = %params.session, "put");

    match verb {
        Verb::Write => {
            let keys = input::keys_column(request, names::KEYS)?.ok_or_else(|| {
                ServerError::invalid_argument("keys must be provided for writes")
            })?;
            let values = input::bytes_column(request, names::VALS)?
                .map(|column| column.span)
                .unwrap_or_else(BytesSpan::absent);

            let mut lock = state.sessions.lock(params.session)?;
            let (txn, _) = lock.parts();
            state
                .engine
                .write(txn, collections, keys, values, tasks, options)?;
            Ok(())
        }
        Verb::WritePath => {
            let paths = input::bytes_column(request, names::PATHS)?.ok_or_else(|| {
                ServerError::invalid_argument("paths must be provided for writes")
            })?;
            let values = input::bytes_column(request, names::VALS)?
                .map(|column| column.span)
                .unwrap_or_else(BytesSpan::absent);

            let mut lock = state.sessions.lock(params.session)?;
            let (txn, _) = lock.parts();
            state.engine.paths_write(
                txn,
                collections,
                paths.span,
                paths.separator,
                values,
                tasks,
                options,
            )?;
            Ok(())
        }
        _ => Err(ServerError::invalid_argument(format!(
            "{} is not a put command",
            verb.name()
        ))),
    }
}
