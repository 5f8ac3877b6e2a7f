//! Loading the tracer's JSON document
//!
//! The instrumentation runtime writes one document per run:
//!
//! ```text
//! {"version":"1.0","events":[
//!   {"id":0,"type":"func_enter","addr":"0x401136","func":"main","depth":0,"ts":...},
//!   {"id":1,"type":"declare","name":"x","varType":"int","file":"prog.c","line":4,...},
//!   ...
//! ],"total_events":N}
//! ```
//!
//! Events are flushed one at a time, so a process that crashes leaves the
//! document without its closing `]}`. [`parse_trace`] recovers every complete
//! record from such a document instead of rejecting the whole run.
//!
//! Records that cannot be turned into a [`RawEvent`] are skipped and reported
//! in [`LoadedTrace::skipped`]; they never abort loading.

use super::value::{parse_address, Address, Value};
use super::{normalize_function_name, EventKind, RawEvent, SourceLocation};
use crate::engine::errors::TraceError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Value types the `TRACE_*` probes write into the `type` field
const VALUE_PROBE_TYPES: &[&str] = &["int", "long", "double", "pointer", "string"];

/// How many closing braces to try when repairing a truncated document
const MAX_REPAIR_ATTEMPTS: usize = 16;

/// Result of loading a trace document
#[derive(Debug)]
pub struct LoadedTrace {
    pub version: Option<String>,
    pub events: Vec<RawEvent>,
    /// Records that were dropped, with the reason
    pub skipped: Vec<TraceError>,
    /// `total_events` as written by the tracer, absent for truncated documents
    pub declared_total: Option<u64>,
    /// The document was cut short and had to be closed by the loader
    pub truncated: bool,
}

/// Read and parse a trace document from disk
pub fn load_trace_file(path: &Path) -> Result<LoadedTrace, TraceError> {
    let text = fs::read_to_string(path)?;
    parse_trace(&text)
}

/// Parse a trace document (wrapped object or bare event array)
pub fn parse_trace(text: &str) -> Result<LoadedTrace, TraceError> {
    let (document, truncated) = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(doc) => (doc, false),
        Err(err) if err.is_eof() => match repair_truncated(text) {
            Some(doc) => {
                warn!("trace document was truncated; recovered complete records only");
                (doc, true)
            }
            None => return Err(err.into()),
        },
        Err(err) => return Err(err.into()),
    };

    let (version, records, declared_total) = match document {
        serde_json::Value::Array(items) => (None, items, None),
        serde_json::Value::Object(mut map) => {
            let version = map
                .get("version")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let total = map.get("total_events").and_then(|v| v.as_u64());
            match map.remove("events") {
                Some(serde_json::Value::Array(items)) => (version, items, total),
                _ => return Err(TraceError::MissingEvents),
            }
        }
        _ => return Err(TraceError::MissingEvents),
    };

    if let Some(total) = declared_total {
        if total != records.len() as u64 {
            warn!(
                "trace declares {} events but contains {}",
                total,
                records.len()
            );
        }
    }

    let mut events = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();
    for (ordinal, record) in records.into_iter().enumerate() {
        let parsed = serde_json::from_value::<WireRecord>(record)
            .map_err(|e| TraceError::InvalidRecord {
                index: ordinal,
                reason: e.to_string(),
            })
            .and_then(|r| r.into_event(ordinal as u64));
        match parsed {
            Ok(event) => events.push(event),
            Err(err) => {
                debug!("skipping record {}: {}", ordinal, err);
                skipped.push(err);
            }
        }
    }

    Ok(LoadedTrace {
        version,
        events,
        skipped,
        declared_total,
        truncated,
    })
}

/// Close a document that ends mid-array by cutting back to a complete record
fn repair_truncated(text: &str) -> Option<serde_json::Value> {
    let mut end = text.len();
    for _ in 0..MAX_REPAIR_ATTEMPTS {
        let pos = text[..end].rfind('}')?;
        let head = &text[..=pos];
        for suffix in ["]}", "]"] {
            if let Ok(doc) = serde_json::from_str(&format!("{}{}", head, suffix)) {
                return Some(doc);
            }
        }
        end = pos;
    }
    None
}

/// One record as the tracer writes it. Every field is optional on the wire;
/// [`WireRecord::into_event`] decides which ones each kind requires.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub id: Option<u64>,
    #[serde(rename = "type", alias = "kind")]
    pub kind: Option<String>,
    pub addr: Option<serde_json::Value>,
    pub address: Option<serde_json::Value>,
    pub heap_addr: Option<serde_json::Value>,
    pub aliased_address: Option<serde_json::Value>,
    pub func: Option<String>,
    #[serde(alias = "ptrName")]
    pub name: Option<String>,
    pub var_type: Option<String>,
    pub value: Option<serde_json::Value>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub size: Option<u64>,
    pub base_type: Option<String>,
    pub dimensions: Option<Vec<i64>>,
    pub dim1: Option<i64>,
    pub dim2: Option<i64>,
    pub dim3: Option<i64>,
    pub is_stack: Option<bool>,
    pub values: Option<Vec<serde_json::Value>>,
    #[serde(alias = "string")]
    pub str_literal: Option<String>,
    pub indices: Option<Vec<i64>>,
    pub idx1: Option<i64>,
    pub idx2: Option<i64>,
    pub idx3: Option<i64>,
    #[serde(alias = "targetName")]
    pub target: Option<String>,
    pub decayed_from_array: Option<bool>,
    pub loop_id: Option<u32>,
    pub loop_type: Option<String>,
    pub result: Option<serde_json::Value>,
    pub control_type: Option<String>,
    pub block_depth: Option<u32>,
    pub return_type: Option<String>,
    pub destination_symbol: Option<String>,
}

impl WireRecord {
    /// Convert into a typed event; `ordinal` stands in for a missing `id`
    pub fn into_event(self, ordinal: u64) -> Result<RawEvent, TraceError> {
        let id = self.id.unwrap_or(ordinal);
        let raw_kind = self.kind.clone().unwrap_or_default();

        // `TRACE_*` probes write their value type into the same key as the
        // event type, so the parsed map only keeps the value type.
        let is_probe = raw_kind == "var"
            || (VALUE_PROBE_TYPES.contains(&raw_kind.as_str()) && self.name.is_some());
        let kind_name = if is_probe { "var" } else { raw_kind.as_str() };

        let missing = |field: &'static str| TraceError::MalformedEvent {
            id,
            kind: kind_name.to_string(),
            field,
        };

        let location = SourceLocation {
            file: self
                .file
                .clone()
                .filter(|f| !f.is_empty() && f != "unknown"),
            line: self.line.unwrap_or(0),
        };
        let function = self
            .func
            .clone()
            .filter(|f| f != "unknown" && Some(f) != self.name.as_ref());

        let kind = match kind_name {
            "func_enter" | "func_exit" => {
                let raw = self
                    .func
                    .as_deref()
                    .or(self.name.as_deref())
                    .filter(|f| !f.is_empty() && *f != "unknown")
                    .ok_or_else(|| missing("func"))?;
                let name = normalize_function_name(raw).to_string();
                if kind_name == "func_enter" {
                    EventKind::FuncEnter { name }
                } else {
                    EventKind::FuncExit { name }
                }
            }
            "declare" => EventKind::Declare {
                name: self.name.clone().ok_or_else(|| missing("name"))?,
                var_type: self.var_type.clone(),
                address: first_address(&[&self.address, &self.addr]),
            },
            "assign" => EventKind::Assign {
                name: self.name.clone().ok_or_else(|| missing("name"))?,
                value: self.value_with_hint(self.var_type.as_deref()),
            },
            "var" => {
                let probe_type = if raw_kind == "var" {
                    self.var_type.clone()
                } else {
                    Some(raw_kind.clone())
                };
                EventKind::VarTrace {
                    name: self.name.clone().ok_or_else(|| missing("name"))?,
                    value: self.value_with_hint(probe_type.as_deref()),
                    var_type: probe_type,
                }
            }
            "array_create" => EventKind::ArrayCreate {
                name: self.name.clone().ok_or_else(|| missing("name"))?,
                base_type: self.base_type.clone(),
                dimensions: collect_extents(
                    self.dimensions.clone(),
                    [self.dim1, self.dim2, self.dim3],
                    1,
                ),
                is_stack: self.is_stack.unwrap_or(true),
                address: first_address(&[&self.address, &self.addr]),
            },
            "array_init" | "array_init_string" => {
                let name = self.name.clone().ok_or_else(|| missing("name"))?;
                let values = if let Some(literal) = &self.str_literal {
                    literal
                        .bytes()
                        .map(|b| Value::Int(i64::from(b)))
                        .chain(std::iter::once(Value::Int(0)))
                        .collect()
                } else {
                    self.values
                        .as_ref()
                        .ok_or_else(|| missing("values"))?
                        .iter()
                        .map(|v| Value::from_json(v, self.base_type.as_deref()))
                        .collect()
                };
                EventKind::ArrayInit { name, values }
            }
            "array_index_assign" => EventKind::ArrayIndexAssign {
                name: self.name.clone().ok_or_else(|| missing("name"))?,
                indices: collect_extents(
                    self.indices.clone(),
                    [self.idx1, self.idx2, self.idx3],
                    0,
                ),
                value: self.value_with_hint(None),
            },
            "pointer_alias" => EventKind::PointerAlias {
                pointer: self.name.clone().ok_or_else(|| missing("name"))?,
                target: self.target.clone().filter(|t| !t.is_empty()),
                address: first_address(&[&self.aliased_address, &self.address, &self.addr]),
                decayed_from_array: self.decayed_from_array.unwrap_or(false),
            },
            "pointer_heap_init" => EventKind::PointerHeapInit {
                pointer: self.name.clone().ok_or_else(|| missing("name"))?,
                address: first_address(&[&self.heap_addr, &self.address, &self.addr]),
            },
            "pointer_deref_write" => EventKind::PointerDerefWrite {
                pointer: self.name.clone().ok_or_else(|| missing("name"))?,
                value: self.value_with_hint(None),
            },
            "heap_alloc" => EventKind::HeapAlloc {
                address: first_address(&[&self.addr, &self.address])
                    .ok_or_else(|| missing("addr"))?,
                size: self.size.ok_or_else(|| missing("size"))?,
            },
            "heap_free" => EventKind::HeapFree {
                address: first_address(&[&self.addr, &self.address])
                    .ok_or_else(|| missing("addr"))?,
            },
            "heap_write" => EventKind::HeapWrite {
                address: first_address(&[&self.addr, &self.address])
                    .ok_or_else(|| missing("addr"))?,
                value: self.value_with_hint(self.var_type.as_deref()),
            },
            "loop_start" => EventKind::LoopStart {
                loop_id: self.loop_id.ok_or_else(|| missing("loopId"))?,
                loop_type: self.loop_type.clone(),
            },
            "loop_condition" => EventKind::LoopCondition {
                loop_id: self.loop_id.ok_or_else(|| missing("loopId"))?,
                result: self.result.as_ref().is_some_and(truthy),
            },
            "loop_body_start" => EventKind::LoopBodyStart {
                loop_id: self.loop_id.ok_or_else(|| missing("loopId"))?,
            },
            "loop_iteration_end" => EventKind::LoopIterationEnd {
                loop_id: self.loop_id.ok_or_else(|| missing("loopId"))?,
            },
            "loop_end" => EventKind::LoopEnd {
                loop_id: self.loop_id.ok_or_else(|| missing("loopId"))?,
            },
            "control_flow" => EventKind::ControlFlow {
                control_type: self
                    .control_type
                    .clone()
                    .ok_or_else(|| missing("controlType"))?,
            },
            "block_enter" => EventKind::BlockEnter {
                depth: self.block_depth,
            },
            "block_exit" => EventKind::BlockExit {
                depth: self.block_depth,
            },
            "return" => EventKind::Return {
                value: self.value_with_hint(self.return_type.as_deref()),
                return_type: self.return_type.clone(),
                destination: self.destination_symbol.clone().filter(|d| !d.is_empty()),
            },
            "" => return Err(missing("type")),
            other => EventKind::Unrecognized {
                kind: other.to_string(),
            },
        };

        Ok(RawEvent {
            id,
            location,
            function,
            address: first_address(&[&self.addr]),
            kind,
        })
    }

    fn value_with_hint(&self, hint: Option<&str>) -> Value {
        self.value
            .as_ref()
            .map(|v| Value::from_json(v, hint))
            .unwrap_or_default()
    }
}

/// First non-null address among the candidate fields
fn first_address(candidates: &[&Option<serde_json::Value>]) -> Option<Address> {
    candidates
        .iter()
        .filter_map(|c| c.as_ref())
        .filter_map(|raw| match raw {
            serde_json::Value::String(s) => parse_address(s),
            serde_json::Value::Number(n) => n.as_u64(),
            _ => None,
        })
        .find(|addr| *addr != 0)
}

/// Dimensions or indices, given either as a list or as the tracer's
/// `dim1..dim3` / `idx1..idx3` with `-1` marking unused slots
fn collect_extents(list: Option<Vec<i64>>, parts: [Option<i64>; 3], min: i64) -> Vec<usize> {
    list.unwrap_or_else(|| parts.into_iter().flatten().collect())
        .into_iter()
        .take_while(|n| *n >= min)
        .map(|n| n as usize)
        .collect()
}

fn truthy(raw: &serde_json::Value) -> bool {
    match raw {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        _ => false,
    }
}
