//! Wire argument bundles and response documents.
//!
//! Serialization transport lives outside this crate; the coordinator
//! consumes already-parsed argument structs and fills dynamic key/value
//! documents whose field names are part of the wire contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ReplicaSetConfig;
use crate::core::{ElectionRound, HostAndPort, MemberState, OpTime};

/// Outbound heartbeat request bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatArgs {
    #[serde(rename = "pv")]
    pub protocol_version: u32,
    #[serde(rename = "replSetHeartbeat")]
    pub set_name: String,
    #[serde(rename = "fromId")]
    pub sender_id: i32,
    #[serde(rename = "from")]
    pub sender_host: String,
    #[serde(rename = "v")]
    pub config_version: i64,
    #[serde(rename = "checkEmpty")]
    pub check_empty: bool,
}

/// Parsed heartbeat response from a peer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeartbeatResponse {
    pub set_name: Option<String>,
    pub state: Option<MemberState>,
    pub election_time: Option<OpTime>,
    pub optime: Option<OpTime>,
    pub config_version: i64,
    pub config: Option<ReplicaSetConfig>,
    pub electable: Option<bool>,
    pub hbmsg: String,
    pub syncing_to: Option<HostAndPort>,
    pub time_secs: u64,
}

/// Sync-freshness query from an election candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct FreshArgs {
    pub set_name: String,
    pub cfgver: i64,
    pub id: i32,
    pub who: HostAndPort,
    pub optime: OpTime,
}

/// Vote request from an election candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct ElectArgs {
    pub set_name: String,
    pub round: ElectionRound,
    pub cfgver: i64,
    pub whoid: i32,
}

/// Cancellation handle for response builders.
///
/// A canceled context makes every builder return ShutdownInProgress with an
/// untouched response body and no state change.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallbackContext {
    canceled: bool,
}

impl CallbackContext {
    pub fn new() -> Self {
        Self { canceled: false }
    }

    pub fn canceled() -> Self {
        Self { canceled: true }
    }

    pub fn is_canceled(self) -> bool {
        self.canceled
    }
}

/// Dynamic key/value response document.
///
/// Field names written through this builder are bit-exact wire names; a
/// serializer outside the core turns the document into bytes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseDoc {
    fields: serde_json::Map<String, Value>,
}

impl ResponseDoc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl std::ops::Index<&str> for ResponseDoc {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(key).unwrap_or(&NULL)
    }
}
