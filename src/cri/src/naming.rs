//! Container id naming.
//!
//! A container id is `k8s_<name>_<sandbox_id>_<attempt>`. The sandbox
//! infrastructure container is `k8s_POD_<sandbox_id>` since it exists at most
//! once per sandbox.
//!
//! Components are escaped before joining so that the `_` delimiter can never
//! appear inside one: `%` becomes `%25` and `_` becomes `%5F`. Decoding only
//! accepts those two escapes.

use ctrshim_core::api::ContainerMetadata;
use ctrshim_core::error::{Result, ShimError};

/// Prefix shared by every id this shim creates.
pub const ID_PREFIX: &str = "k8s";

/// Name of the sandbox infrastructure container.
pub const INFRA_CONTAINER_NAME: &str = "POD";

const DELIMITER: char = '_';

/// A decoded container id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub sandbox_id: String,
    pub metadata: ContainerMetadata,
}

/// Build the backend id for a container of `sandbox_id`.
pub fn encode(sandbox_id: &str, metadata: &ContainerMetadata) -> String {
    if metadata.name == INFRA_CONTAINER_NAME {
        return format!(
            "{}{d}{}{d}{}",
            ID_PREFIX,
            INFRA_CONTAINER_NAME,
            escape(sandbox_id),
            d = DELIMITER
        );
    }
    format!(
        "{}{d}{}{d}{}{d}{}",
        ID_PREFIX,
        escape(&metadata.name),
        escape(sandbox_id),
        metadata.attempt,
        d = DELIMITER
    )
}

/// Recover sandbox id and metadata from a backend id.
pub fn decode(id: &str) -> Result<ContainerIdentity> {
    let malformed = |reason: &str| ShimError::MalformedIdentity(format!("{:?}: {}", id, reason));

    let parts: Vec<&str> = id.split(DELIMITER).collect();
    if parts[0] != ID_PREFIX {
        return Err(malformed("missing k8s prefix"));
    }
    if parts[1..].iter().any(|p| p.is_empty()) {
        return Err(malformed("empty component"));
    }

    match parts.len() {
        3 if parts[1] == INFRA_CONTAINER_NAME => Ok(ContainerIdentity {
            sandbox_id: unescape(parts[2]).map_err(|r| malformed(r.as_str()))?,
            metadata: ContainerMetadata {
                name: INFRA_CONTAINER_NAME.to_string(),
                attempt: 0,
            },
        }),
        4 => {
            let name = unescape(parts[1]).map_err(|r| malformed(r.as_str()))?;
            if name == INFRA_CONTAINER_NAME {
                return Err(malformed("infra container id carries an attempt"));
            }
            let sandbox_id = unescape(parts[2]).map_err(|r| malformed(r.as_str()))?;
            let attempt = parse_attempt(parts[3]).ok_or_else(|| malformed("non-numeric attempt"))?;
            Ok(ContainerIdentity {
                sandbox_id,
                metadata: ContainerMetadata { name, attempt },
            })
        }
        n => Err(malformed(format!("expected 4 fields, found {}", n).as_str())),
    }
}

fn parse_attempt(field: &str) -> Option<u32> {
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Leading zeros would not survive a round trip.
    if field.len() > 1 && field.starts_with('0') {
        return None;
    }
    field.parse().ok()
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(component: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3).unwrap_or(&rest[pos..]);
        match escape {
            "%25" => out.push('%'),
            "%5F" => out.push('_'),
            other => return Err(format!("invalid escape {:?}", other)),
        }
        rest = &rest[pos + escape.len()..];
    }
    out.push_str(rest);
    Ok(out)
}
