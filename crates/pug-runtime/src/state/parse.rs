//! State file parsing.
//!
//! Two layouts are accepted:
//!
//! - the raw state file printed by `terraform state pull`, with a
//!   top-level `resources` array whose entries carry `instances`;
//! - the `terraform show -json` layout, where resources sit under
//!   `values.root_module` and nest through `child_modules`.

use crate::PugError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A resource read from a state file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResource {
    pub address: String,
    pub attributes: Value,
    pub tainted: bool,
}

/// Resources keyed by address, plus the state serial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedState {
    pub serial: i64,
    pub resources: BTreeMap<String, ParsedResource>,
}

#[derive(Deserialize)]
struct RawState {
    #[serde(default)]
    serial: i64,
    #[serde(default)]
    resources: Option<Vec<RawResource>>,
    #[serde(default)]
    values: Option<Values>,
}

#[derive(Deserialize)]
struct RawResource {
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    mode: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Deserialize)]
struct RawInstance {
    #[serde(default)]
    index_key: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    attributes: Value,
}

#[derive(Deserialize)]
struct Values {
    root_module: ModuleValues,
}

#[derive(Deserialize)]
struct ModuleValues {
    #[serde(default)]
    resources: Vec<ValueResource>,
    #[serde(default)]
    child_modules: Vec<ModuleValues>,
}

#[derive(Deserialize)]
struct ValueResource {
    address: String,
    #[serde(default)]
    values: Value,
    #[serde(default)]
    tainted: bool,
}

/// Parses a state file. Empty input is an empty state.
///
/// # Errors
///
/// Returns [`PugError::Parse`] if the input is not a state file.
pub fn parse_state(input: &[u8]) -> Result<ParsedState, PugError> {
    if input.iter().all(u8::is_ascii_whitespace) {
        return Ok(ParsedState::default());
    }
    let raw: RawState = serde_json::from_slice(input).map_err(|e| PugError::parse("state", e))?;

    let mut state = ParsedState {
        serial: raw.serial,
        resources: BTreeMap::new(),
    };
    if let Some(resources) = raw.resources {
        for mut r in resources {
            let instances = std::mem::take(&mut r.instances);
            for inst in instances {
                let address = address(&r, inst.index_key.as_ref());
                state.resources.insert(
                    address.clone(),
                    ParsedResource {
                        address,
                        attributes: inst.attributes,
                        tainted: inst.status.as_deref() == Some("tainted"),
                    },
                );
            }
        }
    } else if let Some(values) = raw.values {
        walk(values.root_module, &mut state.resources);
    } else {
        return Err(PugError::parse("state", "neither resources nor values present"));
    }
    Ok(state)
}

fn walk(module: ModuleValues, out: &mut BTreeMap<String, ParsedResource>) {
    for r in module.resources {
        out.insert(
            r.address.clone(),
            ParsedResource {
                address: r.address,
                attributes: r.values,
                tainted: r.tainted,
            },
        );
    }
    for child in module.child_modules {
        walk(child, out);
    }
}

fn address(r: &RawResource, index: Option<&Value>) -> String {
    let mut addr = String::new();
    if let Some(module) = r.module.as_deref().filter(|m| !m.is_empty()) {
        addr.push_str(module);
        addr.push('.');
    }
    if r.mode == "data" {
        addr.push_str("data.");
    }
    addr.push_str(&r.kind);
    addr.push('.');
    addr.push_str(&r.name);
    match index {
        Some(Value::Number(n)) => addr.push_str(&format!("[{n}]")),
        Some(Value::String(s)) => addr.push_str(&format!("[\"{s}\"]")),
        _ => {}
    }
    addr
}
