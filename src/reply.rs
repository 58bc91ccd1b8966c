//! Reply attribute materialization: evaluates the small, regex-checked
//! directive grammar against a request and a pool, in declared-attribute
//! order (directive evaluation is side-effectful — pool allocation consumes
//! an address the moment its directive runs).
//!
//! Never widen this to evaluate the config string as code; the grammar is a
//! deliberate allow-list.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::instrument;
use uuid::Uuid;

use crate::codec::PacketView;
use crate::enums::AttributeValue;
use crate::pools::PoolRuntime;

static FROM_REQUEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^fromRequest\.([A-Za-z0-9\-_]+)(.*)$").unwrap());
static SPLIT_INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\.split\((?P<q>['"])(?P<sep>.*?)(?P=q)\)\[(?P<idx>-?\d+)\]$"#).unwrap());

/// Builds the outgoing attribute map for a reply template. On the first
/// directive failure, returns a single `Reply-Message` attribute carrying
/// the error text and `Some(message)`; callers convert that into an
/// Access-Reject.
#[instrument(level = "debug", skip(request, template, pool))]
pub fn build_attributes(
    request: &dyn PacketView,
    template: &IndexMap<String, serde_json::Value>,
    pool: Option<&PoolRuntime>,
) -> (IndexMap<String, AttributeValue>, Option<String>) {
    let mut attributes = IndexMap::new();

    for (name, raw) in template {
        let value = match raw.as_str() {
            Some(s) if s.starts_with("-> ") => {
                let directive = &s[3..];
                match apply_directive(name, directive, request, pool) {
                    Ok(value) => value,
                    Err(message) => {
                        let mut err_attrs = IndexMap::new();
                        err_attrs.insert(
                            "Reply-Message".to_string(),
                            AttributeValue::Text(message.clone()),
                        );
                        return (err_attrs, Some(message));
                    }
                }
            }
            _ => json_value_to_attribute(raw),
        };
        attributes.insert(name.clone(), value);
    }

    (attributes, None)
}

fn json_value_to_attribute(value: &serde_json::Value) -> AttributeValue {
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

fn apply_directive(
    attr_name: &str,
    directive: &str,
    request: &dyn PacketView,
    pool: Option<&PoolRuntime>,
) -> Result<AttributeValue, String> {
    if directive == "fromUuid" {
        return Ok(AttributeValue::Text(Uuid::new_v4().to_string()));
    }
    if directive == "fromPool" {
        return from_pool(attr_name, pool);
    }
    if let Some(captures) = FROM_REQUEST_RE.captures(directive) {
        let attr = &captures[1];
        let suffix = &captures[2];
        return from_request(attr, suffix, request);
    }
    Err(format!("unknown directive '{directive}'"))
}

fn from_pool(attr_name: &str, pool: Option<&PoolRuntime>) -> Result<AttributeValue, String> {
    let pool = match pool {
        Some(pool) => pool,
        None => return Err("pool missing".to_string()),
    };

    let allocated = match attr_name {
        "Framed-IP-Address" => pool.allocate_ipv4(),
        "Framed-IPv6-Prefix" => pool.allocate_ipv6(),
        "Delegated-IPv6-Prefix" => pool.allocate_ipv6_delegated(),
        other => return Err(format!("fromPool not supported for {other}")),
    };

    match allocated {
        Some(value) => match attr_name {
            "Framed-IP-Address" => value
                .parse()
                .map(AttributeValue::IpAddr)
                .map_err(|_| "IP Address in pool is exhausted".to_string()),
            _ => Ok(AttributeValue::Text(value)),
        },
        None => Err("IP Address in pool is exhausted".to_string()),
    }
}

fn from_request(attr: &str, suffix: &str, request: &dyn PacketView) -> Result<AttributeValue, String> {
    let value = request
        .get(attr)
        .and_then(|values| values.first())
        .map(|v| v.as_display_string())
        .ok_or_else(|| format!("missing avp {attr} in incoming request"))?;

    apply_safe_transform(&value, suffix).map(AttributeValue::Text)
}

fn apply_safe_transform(value: &str, suffix: &str) -> Result<String, String> {
    if suffix.is_empty() {
        return Ok(value.to_string());
    }
    if suffix == ".lower()" {
        return Ok(value.to_lowercase());
    }
    if suffix == ".upper()" {
        return Ok(value.to_uppercase());
    }
    if let Some(captures) = SPLIT_INDEX_RE.captures(suffix) {
        let sep = &captures["sep"];
        let idx: i64 = captures["idx"]
            .parse()
            .map_err(|_| format!("unsupported transform '{suffix}' (eval is disabled)"))?;
        let parts: Vec<&str> = value.split(sep).collect();
        let resolved_idx = if idx < 0 {
            parts.len() as i64 + idx
        } else {
            idx
        };
        if resolved_idx < 0 || resolved_idx as usize >= parts.len() {
            return Err(format!(
                "split index {idx} out of range for value split by '{sep}'"
            ));
        }
        return Ok(parts[resolved_idx as usize].to_string());
    }
    Err(format!("unsupported transform '{suffix}' (eval is disabled)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StaticPacketView;
    use crate::config::AddressPool;

    fn request_with(attrs: &[(&str, &str)]) -> StaticPacketView {
        let mut map = IndexMap::new();
        for (k, v) in attrs {
            map.insert(k.to_string(), vec![AttributeValue::Text(v.to_string())]);
        }
        StaticPacketView::new(1, 1, map)
    }

    #[test]
    fn literal_templates_pass_through() {
        let mut template = IndexMap::new();
        template.insert(
            "Reply-Message".to_string(),
            serde_json::Value::String("OK".to_string()),
        );
        let req = request_with(&[]);
        let (attrs, err) = build_attributes(&req, &template, None);
        assert!(err.is_none());
        assert_eq!(
            attrs.get("Reply-Message"),
            Some(&AttributeValue::Text("OK".to_string()))
        );
    }

    #[test]
    fn from_uuid_is_well_formed() {
        let mut template = IndexMap::new();
        template.insert(
            "Class".to_string(),
            serde_json::Value::String("-> fromUuid".to_string()),
        );
        let req = request_with(&[]);
        let (attrs, err) = build_attributes(&req, &template, None);
        assert!(err.is_none());
        let class = attrs.get("Class").unwrap().as_display_string();
        let re = Regex::new(
            r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
        )
        .unwrap();
        assert!(re.is_match(&class));
    }

    #[test]
    fn from_pool_exhaustion_yields_canonical_message() {
        let pool = PoolRuntime::build(&AddressPool {
            shuffle: false,
            ipv4: vec![],
            ipv6: vec![],
            ipv6_delegated: vec![],
        })
        .unwrap();
        let mut template = IndexMap::new();
        template.insert(
            "Framed-IP-Address".to_string(),
            serde_json::Value::String("-> fromPool".to_string()),
        );
        let req = request_with(&[]);
        let (attrs, err) = build_attributes(&req, &template, Some(&pool));
        assert_eq!(err.as_deref(), Some("IP Address in pool is exhausted"));
        assert_eq!(
            attrs.get("Reply-Message").unwrap().as_display_string(),
            "IP Address in pool is exhausted"
        );
    }

    #[test]
    fn from_pool_with_no_pool_reports_pool_missing() {
        let mut template = IndexMap::new();
        template.insert(
            "Framed-IP-Address".to_string(),
            serde_json::Value::String("-> fromPool".to_string()),
        );
        let req = request_with(&[]);
        let (_attrs, err) = build_attributes(&req, &template, None);
        assert_eq!(err.as_deref(), Some("pool missing"));
    }

    #[test]
    fn from_request_split_index_with_negative_index() {
        let mut template = IndexMap::new();
        template.insert(
            "Reply-Message".to_string(),
            serde_json::Value::String(
                "-> fromRequest.User-Name.split('#')[5]".to_string(),
            ),
        );
        let req = request_with(&[("User-Name", "a#b#c#d#e#f")]);
        let (attrs, err) = build_attributes(&req, &template, None);
        assert!(err.is_none());
        assert_eq!(
            attrs.get("Reply-Message").unwrap().as_display_string(),
            "f"
        );
    }

    #[test]
    fn from_request_missing_attr_is_an_error() {
        let mut template = IndexMap::new();
        template.insert(
            "Reply-Message".to_string(),
            serde_json::Value::String("-> fromRequest.User-Name".to_string()),
        );
        let req = request_with(&[]);
        let (_attrs, err) = build_attributes(&req, &template, None);
        assert_eq!(
            err.as_deref(),
            Some("missing avp User-Name in incoming request")
        );
    }

    #[test]
    fn unsupported_transform_is_rejected() {
        let mut template = IndexMap::new();
        template.insert(
            "Reply-Message".to_string(),
            serde_json::Value::String("-> fromRequest.User-Name.strip()".to_string()),
        );
        let req = request_with(&[("User-Name", "alice")]);
        let (_attrs, err) = build_attributes(&req, &template, None);
        assert_eq!(
            err.as_deref(),
            Some("unsupported transform '.strip()' (eval is disabled)")
        );
    }
}
