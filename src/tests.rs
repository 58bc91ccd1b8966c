//! End-to-end scenarios wiring the match engine, pool runtime, reply
//! builder, and dialog store together through the backend orchestrator.

use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::backend::Backend;
use crate::codec::StaticPacketView;
use crate::config::{
    AddressPool, MatchPredicate, MatchRuleGroup, RedisStorageConfig, ReplyDefinitions,
    ReplyMatchConfig, ReplyTemplate, ServerConfig,
};
use crate::dialog_store::{DialogLogger, DialogStore};
use crate::enums::AttributeValue;
use crate::error::RadGuardError;
use crate::matching::MatchEngine;
use crate::pools::PoolRuntimes;

#[derive(Default)]
struct CapturingStore {
    writes: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl DialogStore for CapturingStore {
    async fn persist(&self, token: &str, payload: &[u8], _expiry_seconds: u64) -> Result<(), RadGuardError> {
        self.writes
            .lock()
            .unwrap()
            .push((token.to_string(), payload.to_vec()));
        Ok(())
    }
}

fn single_key_group(target: &str, attr: &str, pattern: &str) -> MatchRuleGroup {
    let mut predicate = IndexMap::new();
    predicate.insert(attr.to_string(), pattern.to_string());
    MatchRuleGroup {
        target: target.to_string(),
        predicates: vec![MatchPredicate(predicate)],
    }
}

fn base_config(pool_cidr: &str) -> ServerConfig {
    let mut pools = IndexMap::new();
    pools.insert(
        "pool1".to_string(),
        AddressPool {
            shuffle: false,
            ipv4: if pool_cidr.is_empty() {
                vec![]
            } else {
                vec![pool_cidr.to_string()]
            },
            ipv6: vec![],
            ipv6_delegated: vec![],
        },
    );

    let mut auth_attrs = IndexMap::new();
    auth_attrs.insert(
        "Reply-Message".to_string(),
        serde_json::Value::String("OK".to_string()),
    );
    auth_attrs.insert(
        "Framed-IP-Address".to_string(),
        serde_json::Value::String("-> fromPool".to_string()),
    );
    let mut auth = IndexMap::new();
    auth.insert(
        "ok".to_string(),
        ReplyTemplate {
            code: 2,
            attributes: auth_attrs,
        },
    );

    let mut acct = IndexMap::new();
    acct.insert(
        "acct_ok".to_string(),
        ReplyTemplate {
            code: 5,
            attributes: IndexMap::new(),
        },
    );

    ServerConfig {
        address: "127.0.0.1".to_string(),
        auth_port: 1812,
        acct_port: 1813,
        max_concurrent: crate::MAX_IN_FLIGHT,
        log_level: "info".to_string(),
        address_pools: pools,
        reply_definitions: ReplyDefinitions { auth, acct },
        pool_match_rules: vec![single_key_group("pool1", "User-Name", "alice")],
        reply_match_rules: ReplyMatchConfig {
            auth: vec![single_key_group("ok", "User-Name", "alice")],
            acct: vec![single_key_group("acct_ok", "User-Name", "alice")],
        },
        redis_storage: Some(RedisStorageConfig {
            url: "redis://localhost".to_string(),
            prefix: "tE4.radiusServer.".to_string(),
            expiry_seconds: 60,
            auth: vec!["User-Name".to_string()],
            acct: vec!["User-Name".to_string()],
            coa: vec!["code".to_string()],
            disc: vec!["code".to_string()],
        }),
        shared_secret: "testing123".to_string(),
    }
}

fn build_backend(config: ServerConfig) -> Backend<CapturingStore> {
    let match_engine = MatchEngine::build(
        &config.pool_match_rules,
        &config.reply_match_rules.auth,
        &config.reply_match_rules.acct,
    )
    .unwrap();
    let pools = PoolRuntimes::build(&config.address_pools).unwrap();
    let logger = config
        .redis_storage
        .as_ref()
        .map(|store_config| DialogLogger::new(CapturingStore::default(), store_config));
    Backend::new(config, match_engine, pools, logger)
}

fn request_with(code: u8, id: u8, attrs: &[(&str, &str)]) -> StaticPacketView {
    let mut map = IndexMap::new();
    for (k, v) in attrs {
        map.insert(k.to_string(), vec![AttributeValue::Text(v.to_string())]);
    }
    StaticPacketView::new(code, id, map)
}

#[tokio::test]
async fn s1_auth_match_pool_allocation_and_persist() {
    let backend = build_backend(base_config("10.0.0.0/30"));
    let request = request_with(1, 7, &[("User-Name", "alice")]);

    let result = backend.handle_request(&request, "127.0.0.1", 1812).await;

    assert_eq!(result.reply_code, Some(2));
    let attrs = result.reply_attributes.unwrap();
    assert_eq!(attrs.get("Reply-Message").unwrap().as_display_string(), "OK");
    assert_eq!(
        attrs.get("Framed-IP-Address").unwrap().as_display_string(),
        "10.0.0.1"
    );
    assert_eq!(result.dialog_token.as_deref(), Some("tE4.radiusServer.alice"));
}

#[tokio::test]
async fn s2_acct_pass_through() {
    let backend = build_backend(base_config("10.0.0.0/30"));
    let request = request_with(4, 9, &[("User-Name", "alice")]);

    let result = backend.handle_request(&request, "127.0.0.1", 1813).await;

    assert_eq!(result.reply_code, Some(5));
    assert!(result.reply_attributes.unwrap().is_empty());
    assert_eq!(result.dialog_token.as_deref(), Some("tE4.radiusServer.alice"));
}

#[tokio::test]
async fn s3_pool_exhaustion_yields_access_reject() {
    let backend = build_backend(base_config(""));
    let request = request_with(1, 1, &[("User-Name", "alice")]);

    let result = backend.handle_request(&request, "127.0.0.1", 1812).await;

    assert_eq!(result.reply_code, Some(3));
    assert_eq!(
        result
            .reply_attributes
            .unwrap()
            .get("Reply-Message")
            .unwrap()
            .as_display_string(),
        "IP Address in pool is exhausted"
    );
}

#[tokio::test]
async fn s6_token_built_from_code_and_id_only() {
    let redis_config = RedisStorageConfig {
        url: "redis://localhost".to_string(),
        prefix: "x.".to_string(),
        expiry_seconds: 60,
        auth: vec!["code".to_string(), "id".to_string()],
        acct: vec![],
        coa: vec![],
        disc: vec![],
    };
    let logger = DialogLogger::new(CapturingStore::default(), &redis_config);
    let request = request_with(1, 99, &[]);
    let token = logger.build_token(&request, None);
    assert_eq!(token, "x.1__99");
}
