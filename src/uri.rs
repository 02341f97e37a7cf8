//! URI-style command parsing.
//!
//! Every RPC carries a command of the form `verb[?k1=v1&k2=v2&...]`. A key
//! only matches when it sits on a parameter boundary: the preceding character
//! must be `?`, `&` or `/`, and the following one `=`, `&`, `/` or the end
//! of the string. Anything else is a substring of a larger key and is
//! skipped, so `col` never matches inside `col_name`. Unknown parameters are
//! ignored; a key without `=` is a bare flag with an empty value.

use crate::engine::{CollectionId, Options, SnapshotId};
use crate::session::{ClientId, SessionId, TxnId};

pub const PARAM_TXN: &str = "txn";
pub const PARAM_SNAPSHOT: &str = "snap";
pub const PARAM_COLLECTION_ID: &str = "col";
pub const PARAM_COLLECTION_NAME: &str = "col_name";
pub const PARAM_DROP_MODE: &str = "drop_mode";
pub const PARAM_READ_PART: &str = "part";
pub const PARAM_FLAG_FLUSH: &str = "flush";
pub const PARAM_FLAG_DONT_WATCH: &str = "dont_watch";
pub const PARAM_FLAG_SHARED_MEM: &str = "shared_mem";

/// Look up a parameter value in the `?k=v&...` tail of a command.
pub fn param_value<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    if name.is_empty() {
        return None;
    }
    let bytes = query.as_bytes();
    let mut from = 0;
    while let Some(found) = query[from..].find(name) {
        let at = from + found;
        let preceding = if at == 0 { None } else { Some(bytes[at - 1]) };
        if !matches!(preceding, Some(b'?') | Some(b'&') | Some(b'/')) {
            from = at + 1;
            continue;
        }
        let after = at + name.len();
        match bytes.get(after) {
            None | Some(b'&') | Some(b'/') => return Some(""),
            Some(b'=') => {
                let value_start = after + 1;
                let value_end = query[value_start..]
                    .find('&')
                    .map_or(query.len(), |p| value_start + p);
                return Some(&query[value_start..value_end]);
            }
            _ => {
                from = at + 1;
            }
        }
    }
    None
}

/// Whether a command string names the given verb, alone or with parameters.
pub fn command_is(command: &str, verb: &str) -> bool {
    match command.strip_prefix(verb) {
        Some("") => true,
        Some(rest) => rest.starts_with('?'),
        None => false,
    }
}

/// Parse a hex id (collection or transaction); malformed input falls back
/// to the reserved id 0.
pub fn parse_hex_id(text: &str) -> u64 {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).unwrap_or(0)
}

/// Parse a decimal id (snapshot); malformed input falls back to 0.
pub fn parse_dec_id(text: &str) -> u64 {
    text.parse().unwrap_or(0)
}

/// Everything a handler needs from a command string and the caller's peer
/// identity.
#[derive(Debug)]
pub struct RequestParams<'a> {
    pub session: SessionId,
    pub txn: Option<&'a str>,
    pub snap: Option<&'a str>,
    pub col_name: Option<&'a str>,
    pub col: Option<&'a str>,
    pub drop_mode: Option<&'a str>,
    pub part: Option<&'a str>,
    pub flush: bool,
    pub dont_watch: bool,
    pub shared_mem: bool,
}

impl<'a> RequestParams<'a> {
    pub fn parse(client: ClientId, command: &'a str) -> Self {
        let query = command
            .find('?')
            .map(|at| &command[at..])
            .unwrap_or("");

        let txn = param_value(query, PARAM_TXN);
        let txn_id = txn.map(parse_hex_id).map(TxnId::new).unwrap_or(TxnId::NONE);

        Self {
            session: SessionId::new(client, txn_id),
            txn,
            snap: param_value(query, PARAM_SNAPSHOT),
            col_name: param_value(query, PARAM_COLLECTION_NAME),
            col: param_value(query, PARAM_COLLECTION_ID),
            drop_mode: param_value(query, PARAM_DROP_MODE),
            part: param_value(query, PARAM_READ_PART),
            flush: param_value(query, PARAM_FLAG_FLUSH).is_some(),
            dont_watch: param_value(query, PARAM_FLAG_DONT_WATCH).is_some(),
            shared_mem: param_value(query, PARAM_FLAG_SHARED_MEM).is_some(),
        }
    }

    pub fn options(&self) -> Options {
        Options {
            flush: self.flush,
            dont_watch: self.dont_watch,
            shared_mem: self.shared_mem,
        }
    }

    /// The `col` parameter as an id, when present.
    pub fn collection_id(&self) -> Option<CollectionId> {
        self.col.map(parse_hex_id)
    }

    /// The `snap` parameter as an id; 0 means no snapshot.
    pub fn snapshot_id(&self) -> Option<SnapshotId> {
        self.snap.map(parse_dec_id).filter(|&id| id != 0)
    }
}
