//! Batch-in, batch-out data plane: reads, path reads, pattern matches,
//! scans and samples.

use arrow_array::RecordBatch;
use tracing::debug;

use crate::columnar::{batch as output, input, names};
use crate::engine::{BytesSpan, ReadPart};
use crate::error::ServerError;
use crate::service::{ServerState, Verb};
use crate::session::ClientId;
use crate::uri::RequestParams;

/// Dispatch one exchange command against the input batch and marshal the
/// engine's arena-backed outputs into the response batch. The session lock
/// is held until the response is assembled.
pub fn handle(
    state: &ServerState,
    client: ClientId,
    command: &str,
    request: &RecordBatch,
) -> Result<RecordBatch, ServerError> {
    let verb =
        Verb::parse(command).ok_or_else(|| ServerError::NotImplemented(command.to_string()))?;
    let params = RequestParams::parse(client, command);
    let options = params.options();
    let collections = input::collections_input(request, params.collection_id())?;
    let tasks = request.num_rows();
    debug!(verb = verb.name(), tasks, session = %params.session, "exchange");

    let mut lock = state.sessions.lock(params.session)?;

    match verb {
        Verb::Read => {
            let keys = input::keys_column(request, names::KEYS)?.ok_or_else(|| {
                ServerError::invalid_argument("keys must be provided for reads")
            })?;
            let part = ReadPart::from_param(params.part);

            let (txn, arena) = lock.parts();
            state.engine.read(
                txn.as_deref(),
                params.snapshot_id(),
                collections,
                keys,
                tasks,
                part,
                options,
                arena,
            )?;

            let arena = lock.arena();
            let column = match part {
                ReadPart::Contents => output::binary_column(
                    names::VALS,
                    Some(&arena.presences),
                    &arena.offsets,
                    &arena.values,
                )?,
                ReadPart::Lengths => {
                    output::u32_column(names::LENGTHS, Some(&arena.presences), &arena.lengths)
                }
                ReadPart::Presences => output::u8_column(names::PRESENCES, &arena.presences),
            };
            output::batch(vec![column])
        }
        Verb::ReadPath => {
            let paths = input::bytes_column(request, names::PATHS)?.ok_or_else(|| {
                ServerError::invalid_argument("paths must be provided for reads")
            })?;
            let part = ReadPart::from_param(params.part);

            let (txn, arena) = lock.parts();
            state.engine.paths_read(
                txn.as_deref(),
                collections,
                paths.span,
                paths.separator,
                tasks,
                part,
                options,
                arena,
            )?;

            let arena = lock.arena();
            let column = match part {
                ReadPart::Contents => output::binary_column(
                    names::VALS,
                    Some(&arena.presences),
                    &arena.offsets,
                    &arena.values,
                )?,
                ReadPart::Lengths => {
                    output::u32_column(names::LENGTHS, Some(&arena.presences), &arena.lengths)
                }
                ReadPart::Presences => output::u8_column(names::PRESENCES, &arena.presences),
            };
            output::batch(vec![column])
        }
        Verb::MatchPath => {
            let patterns = input::bytes_column(request, names::PATTERNS)?.ok_or_else(|| {
                ServerError::invalid_argument("patterns must be provided for matching")
            })?;
            let previous = input::bytes_column(request, names::PREVIOUS)?
                .map(|column| column.span)
                .unwrap_or_else(BytesSpan::absent);
            let limits = input::limits_column(request, names::COUNT_LIMITS)?.ok_or_else(|| {
                ServerError::invalid_argument("count_limits must be provided for matching")
            })?;
            let lengths_only = ReadPart::from_param(params.part) == ReadPart::Lengths;

            let (txn, arena) = lock.parts();
            let total = state.engine.paths_match(
                txn.as_deref(),
                collections,
                patterns.span,
                previous,
                limits,
                tasks,
                options,
                arena,
            )?;

            let arena = lock.arena();
            if lengths_only {
                return output::batch(vec![output::u32_column(
                    names::LENGTHS,
                    None,
                    &arena.counts,
                )]);
            }
            // Batch columns must share one length; the per-task counts and
            // the per-match values are padded to the longer of the two, and
            // clients read the meaningful prefixes.
            let rows = tasks.max(total);
            let mut counts = arena.counts.clone();
            counts.resize(rows, 0);
            let mut offsets = arena.offsets.clone();
            let last = offsets.last().copied().unwrap_or(0);
            offsets.resize(rows + 1, last);
            output::batch(vec![
                output::u32_column(names::LENGTHS, None, &counts),
                output::binary_column(names::VALS, None, &offsets, &arena.values)?,
            ])
        }
        Verb::Scan => {
            let start_keys = input::keys_column(request, names::SCAN_STARTS)?.ok_or_else(|| {
                ServerError::invalid_argument("scan_starts must be provided for scans")
            })?;
            let limits = input::limits_column(request, names::COUNT_LIMITS)?.ok_or_else(|| {
                ServerError::invalid_argument("count_limits must be provided for scans")
            })?;

            let (txn, arena) = lock.parts();
            let total = state.engine.scan(
                txn.as_deref(),
                collections,
                start_keys,
                limits,
                tasks,
                options,
                arena,
            )?;

            scan_shaped_response(lock.arena(), tasks, total)
        }
        Verb::Sample => {
            let limits = input::limits_column(request, names::COUNT_LIMITS)?.ok_or_else(|| {
                ServerError::invalid_argument("count_limits must be provided for sampling")
            })?;

            let (txn, arena) = lock.parts();
            let total = state.engine.sample(
                txn.as_deref(),
                collections,
                limits,
                tasks,
                options,
                arena,
            )?;

            scan_shaped_response(lock.arena(), tasks, total)
        }
        _ => Err(ServerError::invalid_argument(format!(
            "{} is not an exchange command",
            verb.name()
        ))),
    }
}

/// The two-column `keys`/`offsets` shape shared by scans and samples. The
/// offsets column has `tasks + 1` meaningful entries; both columns are
/// padded to a common length, offsets by repeating the total.
fn scan_shaped_response(
    arena: &crate::engine::Arena,
    tasks: usize,
    total: usize,
) -> Result<RecordBatch, ServerError> {
    let rows = total.max(tasks + 1);
    let mut keys = arena.keys.clone();
    keys.resize(rows, 0);
    let mut offsets = arena.key_offsets.clone();
    let last = offsets.last().copied().unwrap_or(0);
    offsets.resize(rows, last);
    output::batch(vec![
        output::i64_column(names::KEYS, &keys),
        output::i64_column(names::OFFSETS, &offsets),
    ])
}
