//! Arrow Flight RPC surface.
//!
//! Four verb categories map onto the Flight protocol: `DoAction` for
//! control-plane scalars, `DoExchange` for batch-in/batch-out reads,
//! `DoPut` for writes and `DoGet` for listings. Each command string names a
//! verb from the closed set below, optionally followed by `?k=v&...`
//! parameters. Handlers are synchronous and run on blocking threads; this
//! layer only decodes and encodes Flight streams around them.
//!
//! Flight allows concurrent calls from one client; transactions are not
//! thread-safe, so per-session exclusion is enforced by the session manager
//! underneath.

pub mod handlers;

use std::pin::Pin;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_flight::flight_service_server::FlightService;
use arrow_flight::utils::{batches_to_flight_data, flight_data_to_batches};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, Result as FlightResult,
    SchemaResult, Ticket,
};
use futures::stream::{self, Stream};
use futures::TryStreamExt;
use tonic::{Request, Response, Status, Streaming};

use crate::engine::Engine;
use crate::session::{ClientId, SessionManager};
use crate::uri;

/// The closed set of transport verbs. Dispatch is a match on this enum; no
/// open extension is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Write,
    WritePath,
    Read,
    ReadPath,
    MatchPath,
    Scan,
    Sample,
    ListCols,
    ListSnaps,
    CollectionOpen,
    CollectionDrop,
    SnapshotOpen,
    SnapshotDrop,
    TxnBegin,
    TxnCommit,
}

impl Verb {
    pub const ALL: [Verb; 15] = [
        Verb::Write,
        Verb::WritePath,
        Verb::Read,
        Verb::ReadPath,
        Verb::MatchPath,
        Verb::Scan,
        Verb::Sample,
        Verb::ListCols,
        Verb::ListSnaps,
        Verb::CollectionOpen,
        Verb::CollectionDrop,
        Verb::SnapshotOpen,
        Verb::SnapshotDrop,
        Verb::TxnBegin,
        Verb::TxnCommit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Verb::Write => "write",
            Verb::WritePath => "write_path",
            Verb::Read => "read",
            Verb::ReadPath => "read_path",
            Verb::MatchPath => "match_path",
            Verb::Scan => "scan",
            Verb::Sample => "sample",
            Verb::ListCols => "list_cols",
            Verb::ListSnaps => "list_snaps",
            Verb::CollectionOpen => "collection_open",
            Verb::CollectionDrop => "collection_drop",
            Verb::SnapshotOpen => "snapshot_open",
            Verb::SnapshotDrop => "snapshot_drop",
            Verb::TxnBegin => "txn_begin",
            Verb::TxnCommit => "txn_commit",
        }
    }

    /// Match a command string, alone or followed by `?params`.
    pub fn parse(command: &str) -> Option<Verb> {
        Verb::ALL
            .into_iter()
            .find(|verb| uri::command_is(command, verb.name()))
    }
}

/// The advertised action set.
pub fn action_types() -> Vec<ActionType> {
    fn action(verb: Verb, description: &str) -> ActionType {
        ActionType {
            r#type: verb.name().to_string(),
            description: description.to_string(),
        }
    }
    vec![
        action(Verb::CollectionOpen, "Find a collection descriptor by name."),
        action(Verb::CollectionDrop, "Delete a named collection."),
        action(Verb::SnapshotOpen, "Create a snapshot and return its ID."),
        action(Verb::SnapshotDrop, "Delete a snapshot."),
        action(Verb::TxnBegin, "Start an ACID transaction and return its ID."),
        action(Verb::TxnCommit, "Commit a previously started transaction."),
    ]
}

/// Everything the handlers share: the engine and the session pool.
pub struct ServerState {
    pub engine: Engine,
    pub sessions: SessionManager,
}

impl ServerState {
    pub fn new(engine: Engine, sessions: SessionManager) -> Self {
        Self { engine, sessions }
    }
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

#[derive(Clone)]
pub struct UStoreFlightService {
    state: Arc<ServerState>,
}

impl UStoreFlightService {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Derive the stable client identity from the transport peer address.
    fn client_id<T>(request: &Request<T>) -> ClientId {
        let peer = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        ClientId::from_peer(&peer)
    }

    /// Drain a Flight input stream into its command string and the single
    /// record batch every data-plane operation carries.
    async fn decode_input(
        stream: Streaming<FlightData>,
    ) -> Result<(String, RecordBatch), Status> {
        let messages: Vec<FlightData> = stream.try_collect().await?;
        let descriptor: FlightDescriptor = messages
            .iter()
            .find_map(|message| message.flight_descriptor.clone())
            .ok_or_else(|| Status::invalid_argument("missing flight descriptor"))?;
        let command = String::from_utf8(descriptor.cmd.to_vec())
            .map_err(|_| Status::invalid_argument("command must be utf-8"))?;

        let mut batches = flight_data_to_batches(&messages)
            .map_err(|err| Status::invalid_argument(format!("malformed input batch: {err}")))?;
        if batches.len() != 1 {
            return Err(Status::invalid_argument(format!(
                "expected a single input batch, got {}",
                batches.len()
            )));
        }
        Ok((command, batches.remove(0)))
    }

    fn encode_output(batch: RecordBatch) -> Result<Vec<FlightData>, Status> {
        let schema = batch.schema();
        batches_to_flight_data(schema.as_ref(), vec![batch])
            .map_err(|err| Status::internal(format!("failed to encode response batch: {err}")))
    }

    fn data_stream(data: Vec<FlightData>) -> ResponseStream<FlightData> {
        Box::pin(stream::iter(data.into_iter().map(Ok)))
    }

    fn join_status(err: tokio::task::JoinError) -> Status {
        if err.is_panic() {
            Status::internal("request handler panicked")
        } else {
            Status::cancelled("request handler was cancelled")
        }
    }
}

#[tonic::async_trait]
impl FlightService for UStoreFlightService {
    type HandshakeStream = ResponseStream<HandshakeResponse>;
    type ListFlightsStream = ResponseStream<FlightInfo>;
    type DoGetStream = ResponseStream<FlightData>;
    type DoPutStream = ResponseStream<PutResult>;
    type DoActionStream = ResponseStream<FlightResult>;
    type ListActionsStream = ResponseStream<ActionType>;
    type DoExchangeStream = ResponseStream<FlightData>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake is not required"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        Ok(Response::new(Box::pin(stream::empty())))
    }

    async fn get_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("get_flight_info is not supported"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info is not supported"))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("get_schema is not supported"))
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        Ok(Response::new(Box::pin(stream::iter(
            action_types().into_iter().map(Ok),
        ))))
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let client = Self::client_id(&request);
        let action = request.into_inner();
        let state = Arc::clone(&self.state);
        let scalar = tokio::task::spawn_blocking(move || {
            handlers::action::handle(&state, client, &action.r#type, action.body.as_ref())
        })
        .await
        .map_err(Self::join_status)?
        .map_err(Status::from)?;

        let results: Vec<Result<FlightResult, Status>> = scalar
            .into_iter()
            .map(|body| Ok(FlightResult { body: body.into() }))
            .collect();
        Ok(Response::new(Box::pin(stream::iter(results))))
    }

    async fn do_get(&self, request: Request<Ticket>) -> Result<Response<Self::DoGetStream>, Status> {
        let client = Self::client_id(&request);
        let ticket = request.into_inner();
        let command = String::from_utf8(ticket.ticket.to_vec())
            .map_err(|_| Status::invalid_argument("ticket must be utf-8"))?;

        let state = Arc::clone(&self.state);
        let response =
            tokio::task::spawn_blocking(move || handlers::get::handle(&state, client, &command))
                .await
                .map_err(Self::join_status)?
                .map_err(Status::from)?;
        Ok(Response::new(Self::data_stream(Self::encode_output(
            response,
        )?)))
    }

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        let client = Self::client_id(&request);
        let (command, batch) = Self::decode_input(request.into_inner()).await?;

        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            handlers::put::handle(&state, client, &command, &batch)
        })
        .await
        .map_err(Self::join_status)?
        .map_err(Status::from)?;
        Ok(Response::new(Box::pin(stream::empty())))
    }

    async fn do_exchange(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        let client = Self::client_id(&request);
        let (command, batch) = Self::decode_input(request.into_inner()).await?;

        let state = Arc::clone(&self.state);
        let response = tokio::task::spawn_blocking(move || {
            handlers::exchange::handle(&state, client, &command, &batch)
        })
        .await
        .map_err(Self::join_status)?
        .map_err(Status::from)?;
        Ok(Response::new(Self::data_stream(Self::encode_output(
            response,
        )?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_parse_with_and_without_parameters() {
        assert_eq!(Verb::parse("read"), Some(Verb::Read));
        assert_eq!(Verb::parse("read?txn=ff"), Some(Verb::Read));
        assert_eq!(Verb::parse("read_path?col=1"), Some(Verb::ReadPath));
        assert_eq!(Verb::parse("write_path"), Some(Verb::WritePath));
        assert_eq!(Verb::parse("readx"), None);
        assert_eq!(Verb::parse("unknown"), None);
    }

    #[test]
    fn the_action_set_is_advertised() {
        let actions = action_types();
        assert_eq!(actions.len(), 6);
        assert!(actions.iter().any(|action| action.r#type == "txn_begin"));
        assert!(actions
            .iter()
            .all(|action| !action.description.is_empty()));
    }
}
