//! Reflected runtime values.
//!
//! A loaded module is represented by its export surface, [`ModuleExports`],
//! rather than by live code. Values carry just enough structure (kind,
//! members, inheritance) to check them against a signature and to be
//! written to the persistent cache as descriptors.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, json};

use crate::signature::Kind;

/// A reflected value exported by a module.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Pattern {
        source: String,
        flags: String,
    },
    Function {
        name: String,
        params: Vec<String>,
    },
    Class {
        name: String,
        /// Superclass chain, nearest first.
        extends: Vec<String>,
        implements: Vec<String>,
        methods: Vec<String>,
        static_methods: Vec<String>,
        properties: Vec<String>,
    },
    Object {
        /// Constructor chain for instances, nearest first; empty for literals.
        prototype_chain: Vec<String>,
        entries: BTreeMap<String, Value>,
    },
    Array(Vec<Value>),
}

impl Value {
    /// The kind this value would satisfy in a signature, if any.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Self::Class { .. } => Some(Kind::Class),
            Self::Function { .. } => Some(Kind::Function),
            Self::Object { .. } => Some(Kind::Object),
            _ => None,
        }
    }

    /// Declared name for classes and functions, constructor name for instances.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Class { name, .. } | Self::Function { name, .. } => Some(name),
            Self::Object {
                prototype_chain, ..
            } => prototype_chain.first().map(String::as_str),
            _ => None,
        }
    }

    /// Callable members reachable on the value.
    pub fn method_names(&self) -> Vec<&str> {
        match self {
            Self::Class {
                methods,
                static_methods,
                ..
            } => methods
                .iter()
                .chain(static_methods.iter())
                .map(String::as_str)
                .collect(),
            Self::Object { entries, .. } => entries
                .iter()
                .filter(|(_, v)| matches!(v, Self::Function { .. } | Self::Class { .. }))
                .map(|(k, _)| k.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Non-callable members (plus accessors) reachable on the value.
    pub fn property_names(&self) -> Vec<&str> {
        match self {
            Self::Class { properties, .. } => properties.iter().map(String::as_str).collect(),
            Self::Object { entries, .. } => entries.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.method_names().contains(&name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property_names().contains(&name)
    }

    /// `true` when `base` appears in the value's inheritance relation.
    pub fn derives_from(&self, base: &str) -> bool {
        match self {
            Self::Class {
                extends,
                implements,
                ..
            } => extends.iter().chain(implements.iter()).any(|b| b == base),
            _ => false,
        }
    }

    /// `true` when the value is an instance of `class`.
    pub fn is_instance_of(&self, class: &str) -> bool {
        match self {
            Self::Object {
                prototype_chain, ..
            } => prototype_chain.iter().any(|c| c == class) || class == "Object",
            Self::Class { .. } | Self::Function { .. } => class == "Function",
            Self::Array(_) => class == "Array",
            Self::Pattern { .. } => class == "RegExp",
            _ => false,
        }
    }
}

// ── Descriptors ────────────────────────────────────────────────────

/// Serialize a value into a JSON descriptor.
///
/// Patterns become `{"__type":"RegExp"}` and functions
/// `{"__type":"Function","name":...}`; behavior is not preserved, only the
/// shape needed to validate a later re-load.
pub fn serialize_cache_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => json!(s),
        Value::Pattern { source, flags } => json!({
            "__type": "RegExp",
            "source": source,
            "flags": flags,
        }),
        Value::Function { name, .. } => json!({ "__type": "Function", "name": name }),
        Value::Class {
            name,
            extends,
            implements,
            methods,
            static_methods,
            properties,
        } => json!({
            "__type": "Class",
            "name": name,
            "extends": extends,
            "implements": implements,
            "methods": methods,
            "staticMethods": static_methods,
            "properties": properties,
        }),
        Value::Object {
            prototype_chain,
            entries,
        } => {
            let mut map: Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), serialize_cache_value(v)))
                .collect();
            if prototype_chain.is_empty() {
                serde_json::Value::Object(map)
            } else {
                let entries = serde_json::Value::Object(std::mem::take(&mut map));
                json!({
                    "__type": "Instance",
                    "prototypeChain": prototype_chain,
                    "entries": entries,
                })
            }
        }
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(serialize_cache_value).collect())
        }
    }
}

/// Inverse of [`serialize_cache_value`]. Unknown tags read as plain objects.
pub fn deserialize_cache_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(deserialize_cache_value).collect())
        }
        serde_json::Value::Object(map) => {
            let tag = map.get("__type").and_then(serde_json::Value::as_str);
            match tag {
                Some("RegExp") => Value::Pattern {
                    source: str_field(map, "source"),
                    flags: str_field(map, "flags"),
                },
                Some("Function") => Value::Function {
                    name: str_field(map, "name"),
                    params: list_field(map, "params"),
                },
                Some("Class") => Value::Class {
                    name: str_field(map, "name"),
                    extends: list_field(map, "extends"),
                    implements: list_field(map, "implements"),
                    methods: list_field(map, "methods"),
                    static_methods: list_field(map, "staticMethods"),
                    properties: list_field(map, "properties"),
                },
                Some("Instance") => Value::Object {
                    prototype_chain: list_field(map, "prototypeChain"),
                    entries: map
                        .get("entries")
                        .and_then(serde_json::Value::as_object)
                        .map(object_entries)
                        .unwrap_or_default(),
                },
                _ => Value::Object {
                    prototype_chain: Vec::new(),
                    entries: object_entries(map),
                },
            }
        }
    }
}

fn object_entries(map: &Map<String, serde_json::Value>) -> BTreeMap<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), deserialize_cache_value(v)))
        .collect()
}

fn str_field(map: &Map<String, serde_json::Value>, key: &str) -> String {
    map.get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn list_field(map: &Map<String, serde_json::Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ── Module export surface ──────────────────────────────────────────

/// The export surface of a loaded module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleExports {
    pub default: Option<Value>,
    pub named: BTreeMap<String, Value>,
}

impl ModuleExports {
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.named.is_empty()
    }

    /// The module itself viewed as a value (namespace object).
    pub fn as_module_value(&self) -> Value {
        let mut entries = self.named.clone();
        if let Some(default) = &self.default {
            entries
                .entry("default".to_string())
                .or_insert_with(|| default.clone());
        }
        Value::Object {
            prototype_chain: Vec::new(),
            entries,
        }
    }

    /// Look up an export by access path.
    pub fn get(&self, access: &Access) -> Option<Value> {
        match access.kind {
            AccessKind::Default => self.default.clone(),
            AccessKind::Named => access
                .name
                .as_deref()
                .and_then(|n| self.named.get(n))
                .cloned(),
            AccessKind::Module => Some(self.as_module_value()),
        }
    }

    /// Descriptor form: `{"default": <value>?, "named": {...}}`.
    pub fn to_descriptor(&self) -> serde_json::Value {
        let named: Map<String, serde_json::Value> = self
            .named
            .iter()
            .map(|(k, v)| (k.clone(), serialize_cache_value(v)))
            .collect();
        json!({
            "default": self.default.as_ref().map(serialize_cache_value),
            "named": named,
        })
    }

    pub fn from_descriptor(json: &serde_json::Value) -> Self {
        let default = json
            .get("default")
            .filter(|v| !v.is_null())
            .map(deserialize_cache_value);
        let named = json
            .get("named")
            .and_then(serde_json::Value::as_object)
            .map(object_entries)
            .unwrap_or_default();
        Self { default, named }
    }
}

// ── Resolution result ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Default,
    Named,
    Module,
}

/// How a target is obtained from its module's export surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Access {
    #[serde(rename = "type")]
    pub kind: AccessKind,
    pub name: Option<String>,
}

impl Access {
    pub fn default_export() -> Self {
        Self {
            kind: AccessKind::Default,
            name: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            kind: AccessKind::Named,
            name: Some(name.into()),
        }
    }

    pub fn module() -> Self {
        Self {
            kind: AccessKind::Module,
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMetadata {
    pub path: PathBuf,
    pub language: String,
    pub score: f64,
    pub cache_key: String,
}

/// A resolved value plus how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub value: Value,
    pub access: Access,
    /// `module-stem.ExportName` style name used in diagnostics and scaffolds.
    pub full_name: String,
    pub metadata: TargetMetadata,
}

impl ResolvedTarget {
    pub fn name(&self) -> &str {
        self.value
            .name()
            .or(self.access.name.as_deref())
            .unwrap_or(&self.full_name)
    }
}
