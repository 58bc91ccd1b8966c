//! The policy engine: matches an incoming packet to a pool and reply
//! template, materializes the reply, and hands the pair to the dialog store.

use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::codec::{PacketView, StaticPacketView};
use crate::config::ServerConfig;
use crate::dialog_store::DialogLogger;
use crate::dialog_store::DialogStore;
use crate::enums::{AttributeValue, ReplyCategory};
use crate::matching::MatchEngine;
use crate::pools::PoolRuntimes;
use crate::reply::build_attributes;

const DEFAULT_TARGET: &str = "default";

/// Outcome of [`Backend::handle_request`]: a reply the server should encode
/// and send, or `reply_code = None` when the packet gets no reply at all.
#[derive(Debug, Clone)]
pub struct BackendResult {
    pub reply_code: Option<u8>,
    pub reply_attributes: Option<IndexMap<String, AttributeValue>>,
    pub dialog_token: Option<String>,
}

impl BackendResult {
    fn silent() -> Self {
        BackendResult {
            reply_code: None,
            reply_attributes: None,
            dialog_token: None,
        }
    }
}

/// Ties the match engine, pool runtimes, and reply builder together into
/// the single `handle_request` entry point the UDP server calls per datagram.
pub struct Backend<S: DialogStore> {
    match_engine: MatchEngine,
    pools: PoolRuntimes,
    config: ServerConfig,
    dialog_logger: Option<DialogLogger<S>>,
}

impl<S: DialogStore> Backend<S> {
    pub fn new(
        config: ServerConfig,
        match_engine: MatchEngine,
        pools: PoolRuntimes,
        dialog_logger: Option<DialogLogger<S>>,
    ) -> Self {
        Backend {
            match_engine,
            pools,
            config,
            dialog_logger,
        }
    }

    #[instrument(level = "debug", skip(self, request), fields(code = request.code(), id = request.id()))]
    pub async fn handle_request(
        &self,
        request: &dyn PacketView,
        source_host: &str,
        source_port: u16,
    ) -> BackendResult {
        let mut result = match request.code() {
            1 => self.handle_access_request(request),
            4 => self.handle_accounting_request(request),
            other => {
                debug!(code = other, "no handler for this packet code");
                BackendResult::silent()
            }
        };

        if let (Some(logger), Some(reply_code)) = (&self.dialog_logger, result.reply_code) {
            let reply_attrs = result.reply_attributes.clone().unwrap_or_default();
            let reply_view = StaticPacketView::new(
                reply_code,
                request.id(),
                reply_attrs
                    .into_iter()
                    .map(|(k, v)| (k, vec![v]))
                    .collect(),
            );
            let now_ms = chrono::Utc::now().timestamp_millis();
            let now_str = chrono::Local::now().format("%d.%m.%Y, %H:%M:%S").to_string();
            result.dialog_token = logger
                .store_dialog(
                    request,
                    Some(&reply_view),
                    source_host,
                    source_port,
                    now_ms,
                    &now_str,
                )
                .await;
        }

        result
    }

    fn handle_access_request(&self, request: &dyn PacketView) -> BackendResult {
        let pool_name = self.match_engine.select_pool(request, DEFAULT_TARGET);
        let pool = self.pools.get(&pool_name);

        let reply_name = self
            .match_engine
            .select_reply(ReplyCategory::Auth, request, DEFAULT_TARGET);
        let template = match self.config.reply_definitions.auth.get(&reply_name) {
            Some(template) => template,
            None => {
                debug!(reply_name, "no auth reply template matched this request");
                return BackendResult::silent();
            }
        };

        let (attrs, error) = build_attributes(request, &template.attributes, pool);
        match error {
            Some(_) => BackendResult {
                reply_code: Some(3),
                reply_attributes: Some(attrs),
                dialog_token: None,
            },
            None => BackendResult {
                reply_code: Some(template.code),
                reply_attributes: Some(attrs),
                dialog_token: None,
            },
        }
    }

    fn handle_accounting_request(&self, request: &dyn PacketView) -> BackendResult {
        let reply_name = self
            .match_engine
            .select_reply(ReplyCategory::Acct, request, DEFAULT_TARGET);
        let template = match self.config.reply_definitions.acct.get(&reply_name) {
            Some(template) => template,
            None => {
                debug!(reply_name, "no acct reply template matched this request");
                return BackendResult::silent();
            }
        };

        let attrs: IndexMap<String, AttributeValue> = template
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), json_literal(value)))
            .collect();

        BackendResult {
            reply_code: Some(template.code),
            reply_attributes: Some(attrs),
            dialog_token: None,
        }
    }
}

fn json_literal(value: &serde_json::Value) -> AttributeValue {
    match value {
        serde_json::Value::String(s) => AttributeValue::Text(s.clone()),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                if let Ok(i) = u32::try_from(i) {
                    return AttributeValue::Integer(i);
                }
            }
            AttributeValue::Text(n.to_string())
        }
        other => AttributeValue::Text(other.to_string()),
    }
}
