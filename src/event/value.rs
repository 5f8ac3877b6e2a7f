//! Traced value representation
//!
//! This module defines the [`Value`] enum, which represents every value the
//! instrumentation runtime can report for a variable, array element, heap cell
//! or return. The runtime writes values as JSON scalars; [`Value::from_json`]
//! turns them back into a tagged value, using the reported C type as a hint.
//!
//! # Value Types
//!
//! - [`Value::Int`]: any integral value (`int`, `long`, `char`, `bool`)
//! - [`Value::Float`]: `float` / `double`
//! - [`Value::Pointer`]: a raw address printed with `%p`
//! - [`Value::Text`]: string values
//! - [`Value::Uninitialized`]: declared but not yet assigned (`null` on the wire)

use serde::{Serialize, Serializer};
use std::fmt;

/// Memory address type (64-bit)
pub type Address = u64;

/// Values carried by raw events and semantic steps
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    Int(i64),
    Float(f64),
    Pointer(Address),
    Text(String),
    #[default]
    Uninitialized,
}

impl Value {
    /// Convert a JSON scalar written by the tracer into a value.
    ///
    /// `type_hint` is the C type the tracer attached to the record, if any.
    /// Pointer-typed strings are parsed as addresses; every other string is
    /// kept as text.
    pub fn from_json(raw: &serde_json::Value, type_hint: Option<&str>) -> Value {
        match raw {
            serde_json::Value::Null => Value::Uninitialized,
            serde_json::Value::Bool(b) => Value::Int(i64::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    // Above i64::MAX
                    i64::try_from(u)
                        .map(Value::Int)
                        .unwrap_or_else(|_| Value::Float(u as f64))
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => {
                let pointer_typed = type_hint.is_some_and(|t| t == "pointer" || t.contains('*'));
                match parse_address(s) {
                    Some(addr) if pointer_typed => Value::Pointer(addr),
                    _ => Value::Text(s.clone()),
                }
            }
            other => Value::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Pointer(addr) => write!(f, "0x{:x}", addr),
            Value::Text(s) => write!(f, "\"{}\"", s),
            Value::Uninitialized => write!(f, "?"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Pointer(addr) => serializer.serialize_str(&format!("0x{:x}", addr)),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Uninitialized => serializer.serialize_none(),
        }
    }
}

/// Parse an address printed with `%p`.
///
/// Accepts `0x`-prefixed hex, bare hex (MinGW prints without prefix), and the
/// glibc spellings of the null pointer.
pub fn parse_address(raw: &str) -> Option<Address> {
    let s = raw.trim();
    match s {
        "(nil)" | "(null)" | "0" => return Some(0),
        "" => return None,
        _ => {}
    }
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    Address::from_str_radix(digits, 16).ok()
}

/// Serialize an optional address as a hex string (JSON numbers lose precision above 2^53)
pub fn serialize_opt_address<S: Serializer>(
    addr: &Option<Address>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match addr {
        Some(a) => serializer.serialize_str(&format!("0x{:x}", a)),
        None => serializer.serialize_none(),
    }
}

/// Serialize an address as a hex string
pub fn serialize_address<S: Serializer>(addr: &Address, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{:x}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(parse_address("0x7ffd1000"), Some(0x7ffd_1000));
        assert_eq!(parse_address("000000000062FE1C"), Some(0x62_fe1c));
        assert_eq!(parse_address("(nil)"), Some(0));
        assert_eq!(parse_address("not an address"), None);
        assert_eq!(parse_address(""), None);
    }

    #[test]
    fn test_from_json_uses_type_hint() {
        assert_eq!(Value::from_json(&json!(5), Some("int")), Value::Int(5));
        assert_eq!(Value::from_json(&json!(2.5), None), Value::Float(2.5));
        assert_eq!(Value::from_json(&json!(null), None), Value::Uninitialized);
        assert_eq!(
            Value::from_json(&json!("0x10"), Some("pointer")),
            Value::Pointer(0x10)
        );
        // Without a pointer hint, hex-looking strings stay text
        assert_eq!(
            Value::from_json(&json!("0x10"), Some("string")),
            Value::Text("0x10".to_string())
        );
        assert_eq!(Value::from_json(&json!(true), Some("bool")), Value::Int(1));
    }

    #[test]
    fn test_from_json_large_unsigned_does_not_wrap() {
        assert_eq!(
            Value::from_json(&json!(i64::MAX as u64), Some("unsigned long")),
            Value::Int(i64::MAX)
        );
        assert_eq!(
            Value::from_json(&json!(u64::MAX), Some("unsigned long")),
            Value::Float(u64::MAX as f64)
        );
    }

    #[test]
    fn test_display_and_serialize() {
        assert_eq!(Value::Pointer(255).to_string(), "0xff");
        assert_eq!(Value::Uninitialized.to_string(), "?");
        assert_eq!(serde_json::to_value(Value::Int(9)).unwrap(), json!(9));
        assert_eq!(
            serde_json::to_value(Value::Pointer(16)).unwrap(),
            json!("0x10")
        );
        assert_eq!(
            serde_json::to_value(Value::Uninitialized).unwrap(),
            json!(null)
        );
    }
}
