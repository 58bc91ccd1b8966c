use concread::cowcell::asynch::{CowCell, CowCellReadTxn};
use config::{Config, File};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io::ErrorKind;

use crate::error::RadGuardError;

/// A single predicate: every `(attribute, pattern)` pair must match (AND).
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MatchPredicate(pub IndexMap<String, String>);

/// A target plus its ordered list of alternative predicates (OR across the
/// list). An empty predicate list is a catch-all.
///
/// On the wire this is a single-key map, eg `{"pool1": [{"User-Name": "^a"}]}`.
/// Construction validates that exactly one key was supplied.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRuleGroup {
    pub target: String,
    pub predicates: Vec<MatchPredicate>,
}

impl<'de> Deserialize<'de> for MatchRuleGroup {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: IndexMap<String, Vec<MatchPredicate>> = IndexMap::deserialize(deserializer)?;
        MatchRuleGroup::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<IndexMap<String, Vec<MatchPredicate>>> for MatchRuleGroup {
    type Error = String;

    fn try_from(mut raw: IndexMap<String, Vec<MatchPredicate>>) -> Result<Self, Self::Error> {
        if raw.len() != 1 {
            return Err(format!(
                "match rule group must have exactly one target, found {}",
                raw.len()
            ));
        }
        let (target, predicates) = raw.pop().expect("checked len == 1 above");
        Ok(MatchRuleGroup { target, predicates })
    }
}

/// A named, allocatable collection of CIDRs. `shuffle` randomizes allocation
/// order at pool-runtime construction time.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct AddressPool {
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
    #[serde(default)]
    pub ipv6_delegated: Vec<String>,
}

/// A reply template: an outgoing packet code plus an ordered attribute map.
/// Attribute values that are strings beginning with `"-> "` are directives,
/// evaluated by the reply builder (see [`crate::reply`]).
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ReplyTemplate {
    pub code: u8,
    #[serde(default)]
    pub attributes: IndexMap<String, serde_json::Value>,
}

pub const VALID_AUTH_CODES: [u8; 3] = [2, 3, 11];
pub const VALID_ACCT_CODES: [u8; 1] = [5];

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ReplyDefinitions {
    #[serde(default)]
    pub auth: IndexMap<String, ReplyTemplate>,
    #[serde(default)]
    pub acct: IndexMap<String, ReplyTemplate>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ReplyMatchConfig {
    #[serde(default)]
    pub auth: Vec<MatchRuleGroup>,
    #[serde(default)]
    pub acct: Vec<MatchRuleGroup>,
}

/// Dialog-store configuration: which attributes feed the token for each
/// packet class, and where entries land.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RedisStorageConfig {
    pub url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub expiry_seconds: u64,
    pub auth: Vec<String>,
    pub acct: Vec<String>,
    pub coa: Vec<String>,
    pub disc: Vec<String>,
}

fn default_prefix() -> String {
    String::new()
}

/// The full validated configuration driving the backend. This is the
/// RADIUS-domain equivalent of a loaded, checked config file: every field
/// here has already passed [`ServerConfig::validate`].
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listener address for both auth and acct sockets, default 127.0.0.1
    #[serde(default = "default_address")]
    pub address: String,
    /// Access-Request / Access-Accept listener port, default 1812
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,
    /// Accounting-Request listener port, default 1813
    #[serde(default = "default_acct_port")]
    pub acct_port: u16,
    /// In-flight datagram handler cap per listener, default 512
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Default is "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub address_pools: IndexMap<String, AddressPool>,
    #[serde(default)]
    pub reply_definitions: ReplyDefinitions,
    pub pool_match_rules: Vec<MatchRuleGroup>,
    pub reply_match_rules: ReplyMatchConfig,
    pub redis_storage: Option<RedisStorageConfig>,
    /// Shared secret used to compute/verify the RADIUS response authenticator.
    #[serde(default)]
    pub shared_secret: String,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}
fn default_auth_port() -> u16 {
    1812
}
fn default_acct_port() -> u16 {
    1813
}
fn default_max_concurrent() -> usize {
    crate::MAX_IN_FLIGHT
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut attributes = IndexMap::new();
        attributes.insert(
            "Reply-Message".to_string(),
            serde_json::Value::String("OK".to_string()),
        );
        let mut auth = IndexMap::new();
        auth.insert(
            "ok".to_string(),
            ReplyTemplate {
                code: 2,
                attributes,
            },
        );

        ServerConfig {
            address: default_address(),
            auth_port: default_auth_port(),
            acct_port: default_acct_port(),
            max_concurrent: default_max_concurrent(),
            log_level: default_log_level(),
            address_pools: IndexMap::new(),
            reply_definitions: ReplyDefinitions {
                auth,
                acct: IndexMap::new(),
            },
            pool_match_rules: vec![],
            reply_match_rules: ReplyMatchConfig {
                auth: vec![MatchRuleGroup {
                    target: "ok".to_string(),
                    predicates: vec![],
                }],
                acct: vec![],
            },
            redis_storage: None,
            shared_secret: String::new(),
        }
    }
}

impl Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "address=\"{}\" auth_port={} acct_port={} max_concurrent={} pools={} log_level={}",
            self.address,
            self.auth_port,
            self.acct_port,
            self.max_concurrent,
            self.address_pools.len(),
            self.log_level
        )
    }
}

impl ServerConfig {
    pub fn as_json_pretty(&self) -> Result<String, RadGuardError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn auth_listener_address(&self) -> String {
        format!("{}:{}", self.address, self.auth_port)
    }

    pub fn acct_listener_address(&self) -> String {
        format!("{}:{}", self.address, self.acct_port)
    }

    /// Structural checks that mirror a schema validator: non-empty pools,
    /// single-key match groups (already enforced at deserialize time),
    /// in-range reply codes, non-empty dialog-store attribute lists.
    pub fn validate(&self) -> Result<(), RadGuardError> {
        let mut errors: Vec<String> = vec![];

        if self.address_pools.is_empty() {
            errors.push("address_pools must not be empty".to_string());
        }

        for (name, reply) in &self.reply_definitions.auth {
            if !VALID_AUTH_CODES.contains(&reply.code) {
                errors.push(format!(
                    "reply_definitions.auth.{name}.code={} is not one of {VALID_AUTH_CODES:?}",
                    reply.code
                ));
            }
        }
        for (name, reply) in &self.reply_definitions.acct {
            if !VALID_ACCT_CODES.contains(&reply.code) {
                errors.push(format!(
                    "reply_definitions.acct.{name}.code={} is not one of {VALID_ACCT_CODES:?}",
                    reply.code
                ));
            }
        }

        if self.reply_match_rules.auth.is_empty() {
            errors.push("reply_match_rules.auth must not be empty".to_string());
        }
        if self.reply_match_rules.acct.is_empty() {
            errors.push("reply_match_rules.acct must not be empty".to_string());
        }

        if let Some(store) = &self.redis_storage {
            if store.auth.is_empty()
                || store.acct.is_empty()
                || store.coa.is_empty()
                || store.disc.is_empty()
            {
                errors.push(
                    "redis_storage key lists (auth/acct/coa/disc) must all be non-empty"
                        .to_string(),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RadGuardError::ConfigError(errors.join("; ")))
        }
    }

    /// Wraps [`Self::try_from_path`] in a [`CowCell`] (moo) for cheap
    /// lock-free reads across the UDP listener tasks.
    pub fn try_as_cowcell(
        config_path: Option<&String>,
    ) -> Result<CowCell<ServerConfig>, RadGuardError> {
        Ok(CowCell::new(ServerConfig::try_from_path(config_path)?))
    }

    /// Loads configuration from a given file or from the default locations.
    ///
    /// Default locations are `./radguard.json` and `~/.config/radguard.json`.
    pub fn try_from_path(config_path: Option<&String>) -> Result<ServerConfig, RadGuardError> {
        let file_locations = match config_path {
            Some(value) => vec![value.to_owned()],
            None => CONFIG_LOCATIONS.iter().map(|x| x.to_string()).collect(),
        };

        let found_files: Vec<String> = file_locations
            .iter()
            .filter_map(|f| {
                let path = shellexpand::tilde(&f).into_owned();
                let filepath = std::path::Path::new(&path);
                match filepath.exists() {
                    false => {
                        eprintln!("Config file {path} doesn't exist, skipping.");
                        None
                    }
                    true => Some(path),
                }
            })
            .collect();

        if found_files.is_empty() {
            return Err(RadGuardError::IoError(std::io::Error::new(
                ErrorKind::NotFound,
                format!(
                    "No configuration files found, tried: {}",
                    file_locations.join(", ")
                ),
            )));
        }

        for config_filename in found_files {
            let format = if config_filename.ends_with(".yaml") || config_filename.ends_with(".yml")
            {
                config::FileFormat::Yaml
            } else {
                config::FileFormat::Json
            };

            let builder = Config::builder()
                .add_source(File::new(&config_filename, format))
                .add_source(config::Environment::with_prefix("radguard").separator("__"));

            match builder.build() {
                Ok(built) => {
                    let parsed: ServerConfig = built.try_deserialize()?;
                    parsed.validate()?;
                    eprintln!("Successfully loaded config from: {config_filename}");
                    return Ok(parsed);
                }
                Err(err) => eprintln!("Couldn't load config from {config_filename}: {err:?}"),
            }
        }

        Err(RadGuardError::ConfigError(
            "no configuration file could be loaded".to_string(),
        ))
    }
}

lazy_static::lazy_static! {
    static ref CONFIG_LOCATIONS: Vec<&'static str> =
        ["./radguard.json", "~/.config/radguard.json"].to_vec();
}

pub type ConfigReadTxn = CowCellReadTxn<ServerConfig>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_rule_group_rejects_zero_keys() {
        let raw: IndexMap<String, Vec<MatchPredicate>> = IndexMap::new();
        let result = MatchRuleGroup::try_from(raw);
        assert!(result.is_err());
    }

    #[test]
    fn match_rule_group_rejects_multiple_keys() {
        let mut raw: IndexMap<String, Vec<MatchPredicate>> = IndexMap::new();
        raw.insert("pool_a".to_string(), vec![]);
        raw.insert("pool_b".to_string(), vec![]);
        let result = MatchRuleGroup::try_from(raw);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("exactly one target"));
    }

    #[test]
    fn validate_rejects_auth_reply_code_out_of_range() {
        let mut config = ServerConfig::default();
        config.address_pools.insert(
            "default".to_string(),
            AddressPool {
                shuffle: false,
                ipv4: vec!["10.0.0.0/30".to_string()],
                ipv6: vec![],
                ipv6_delegated: vec![],
            },
        );
        config.reply_definitions.auth.insert(
            "bad".to_string(),
            ReplyTemplate {
                code: 99,
                attributes: IndexMap::new(),
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reply_definitions.auth.bad.code"));
    }

    #[test]
    fn validate_rejects_empty_address_pools() {
        let config = ServerConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_top_level_key_is_rejected_at_deserialize_time() {
        let json = r#"{
            "address_pools": {"default": {"ipv4": ["10.0.0.0/30"]}},
            "reply_definitions": {},
            "pool_match_rules": [],
            "reply_match_rules": {"auth": [{"ok": []}], "acct": [{"ok": []}]},
            "redis_storage": null,
            "unknown_field": true
        }"#;
        let result: Result<ServerConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
