//! Persists a request/reply pair to an external key-value store, keyed by a
//! token built from configured attribute lists. Talks to the store through a
//! small trait so the backend and its tests never need a live Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::{Map, Value};
use tracing::{error, instrument};

use crate::codec::PacketView;
use crate::config::RedisStorageConfig;
use crate::enums::PacketCode;
use crate::error::RadGuardError;

/// Storage-facing abstraction over "push a serialized dialog, set its TTL".
#[async_trait]
pub trait DialogStore: Send + Sync {
    async fn persist(&self, token: &str, payload: &[u8], expiry_seconds: u64) -> Result<(), RadGuardError>;
}

/// The reference [`DialogStore`] backed by a Redis-protocol connection.
pub struct RedisDialogStore {
    conn: ConnectionManager,
}

impl RedisDialogStore {
    pub async fn connect(url: &str) -> Result<Self, RadGuardError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisDialogStore { conn })
    }
}

const STORE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

#[async_trait]
impl DialogStore for RedisDialogStore {
    #[instrument(level = "debug", skip(self, payload))]
    async fn persist(&self, token: &str, payload: &[u8], expiry_seconds: u64) -> Result<(), RadGuardError> {
        let mut conn = self.conn.clone();
        let write = redis::pipe()
            .atomic()
            .rpush(token, payload)
            .ignore()
            .expire(token, expiry_seconds as i64)
            .ignore()
            .query_async::<()>(&mut conn);

        match tokio::time::timeout(STORE_TIMEOUT, write).await {
            Ok(result) => result.map_err(RadGuardError::from),
            Err(_) => Err(RadGuardError::StoreError(format!(
                "dialog store write timed out after {STORE_TIMEOUT:?}"
            ))),
        }
    }
}

/// Builds the dialog key for a request code from the configured attribute
/// lists, then serializes and persists the request/reply pair. Store
/// failures are logged and swallowed — persistence never blocks a reply.
pub struct DialogLogger<S: DialogStore> {
    store: S,
    prefix: String,
    expiry_seconds: u64,
    auth_keys: Vec<String>,
    acct_keys: Vec<String>,
    coa_keys: Vec<String>,
    disc_keys: Vec<String>,
}

impl<S: DialogStore> DialogLogger<S> {
    pub fn new(store: S, config: &RedisStorageConfig) -> Self {
        DialogLogger {
            store,
            prefix: config.prefix.clone(),
            expiry_seconds: config.expiry_seconds,
            auth_keys: config.auth.clone(),
            acct_keys: config.acct.clone(),
            coa_keys: config.coa.clone(),
            disc_keys: config.disc.clone(),
        }
    }

    fn key_list_for(&self, code: u8) -> &[String] {
        match PacketCode::from(code) {
            PacketCode::AccessRequest => &self.auth_keys,
            PacketCode::AccountingRequest => &self.acct_keys,
            PacketCode::CoARequest => &self.coa_keys,
            PacketCode::DisconnectRequest => &self.disc_keys,
            _ => &[],
        }
    }

    /// Builds the token for a request, looking up each key part from the
    /// request first and falling back to the reply when present.
    pub fn build_token(&self, request: &dyn PacketView, reply: Option<&dyn PacketView>) -> String {
        let keys = self.key_list_for(request.code());
        let parts: Vec<String> = keys
            .iter()
            .map(|key| resolve_token_part(key, request, reply))
            .collect();
        format!("{}{}", self.prefix, parts.join("__"))
    }

    /// Serializes and stores the dialog. On store failure, logs at ERROR and
    /// returns `None` (fail-open) instead of propagating — the caller still
    /// gets its reply out the door.
    #[instrument(level = "debug", skip(self, request, reply, source_host))]
    pub async fn store_dialog(
        &self,
        request: &dyn PacketView,
        reply: Option<&dyn PacketView>,
        source_host: &str,
        source_port: u16,
        now_ms: i64,
        now_str: &str,
    ) -> Option<String> {
        let token = self.build_token(request, reply);
        let payload = build_dialog_payload(request, reply, source_host, source_port, now_ms, now_str);
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, "failed to serialize dialog payload");
                return None;
            }
        };
        match self.store.persist(&token, &bytes, self.expiry_seconds).await {
            Ok(()) => Some(token),
            Err(err) => {
                error!(error = %err, token, "failed to persist dialog");
                None
            }
        }
    }
}

fn resolve_token_part(key: &str, request: &dyn PacketView, reply: Option<&dyn PacketView>) -> String {
    match key {
        "code" => request.code().to_string(),
        "id" => request.id().to_string(),
        _ => request
            .get(key)
            .and_then(|values| values.first())
            .map(|v| v.as_display_string())
            .or_else(|| {
                reply.and_then(|reply| {
                    reply
                        .get(key)
                        .and_then(|values| values.first())
                        .map(|v| v.as_display_string())
                })
            })
            .unwrap_or_default(),
    }
}

fn packet_snapshot(view: &dyn PacketView) -> Map<String, Value> {
    let mut map = Map::new();
    for name in view.attribute_names() {
        if name == "User-Password" {
            map.insert(name.to_string(), Value::String("encryptedValue".to_string()));
            continue;
        }
        let values = view.get(name).unwrap_or(&[]);
        let rendered: Vec<Value> = values
            .iter()
            .map(|v| Value::String(v.as_display_string()))
            .collect();
        let value = if rendered.len() == 1 {
            rendered.into_iter().next().unwrap()
        } else {
            Value::Array(rendered)
        };
        map.insert(name.to_string(), value);
    }
    map
}

fn build_dialog_payload(
    request: &dyn PacketView,
    reply: Option<&dyn PacketView>,
    source_host: &str,
    source_port: u16,
    now_ms: i64,
    now_str: &str,
) -> Value {
    let mut request_snapshot = packet_snapshot(request);
    request_snapshot.insert("_code".to_string(), Value::from(request.code()));
    request_snapshot.insert("_id".to_string(), Value::from(request.id()));
    request_snapshot.insert("_host".to_string(), Value::String(source_host.to_string()));
    request_snapshot.insert("_port".to_string(), Value::from(source_port));

    let mut reply_snapshot = match reply {
        Some(reply) => {
            let mut snapshot = packet_snapshot(reply);
            snapshot.insert("_code".to_string(), Value::from(reply.code()));
            snapshot.insert("_id".to_string(), Value::from(reply.id()));
            snapshot
        }
        None => {
            let mut snapshot = Map::new();
            snapshot.insert("_code".to_string(), Value::Null);
            snapshot.insert("_id".to_string(), Value::Null);
            snapshot
        }
    };
    reply_snapshot.insert("_ts".to_string(), Value::from(now_ms));
    reply_snapshot.insert("_tsStr".to_string(), Value::String(now_str.to_string()));

    let mut root = Map::new();
    root.insert("request".to_string(), Value::Object(request_snapshot));
    root.insert("reply".to_string(), Value::Object(reply_snapshot));
    Value::Object(root)
}
