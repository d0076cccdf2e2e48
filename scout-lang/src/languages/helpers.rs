use std::collections::{BTreeSet, HashMap};

use tree_sitter::Node;

use crate::value::Value;
use crate::{Entity, TextRange};

/// Extract the source text for a tree-sitter node.
pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// Find the first child with a specific kind.
pub fn find_child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .find(|child| child.kind() == kind)
}

/// Find a child by field name.
pub fn child_by_field<'a>(node: Node<'a>, field: &str) -> Option<Node<'a>> {
    node.child_by_field_name(field)
}

/// Named children of a node, collected so callers can recurse freely.
pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// `true` if any direct child (named or anonymous) has the given kind.
pub fn has_child_kind(node: Node<'_>, kind: &str) -> bool {
    find_child_by_kind(node, kind).is_some()
}

/// Build a qualified name from a context stack using `.` separator.
pub fn dotted_name(context: &[String], name: &str) -> String {
    if context.is_empty() {
        name.to_string()
    } else {
        format!("{}.{name}", context.join("."))
    }
}

/// Convert a tree-sitter node to a `TextRange`.
pub fn node_range(node: Node<'_>) -> TextRange {
    node.range().into()
}

/// First `ERROR` or missing node in document order.
pub fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

/// Collect the text of every node whose kind is in `kinds`.
pub fn collect_identifiers(node: Node<'_>, source: &str, kinds: &[&str]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if kinds.contains(&current.kind()) {
            out.insert(node_text(current, source).to_string());
        }
        let mut cursor = current.walk();
        stack.extend(current.children(&mut cursor));
    }
    out
}

/// Push `item` unless already present.
pub fn push_unique(list: &mut Vec<String>, item: impl Into<String>) {
    let item = item.into();
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

/// Strip one layer of matching quotes from a string literal.
pub fn unquote(text: &str) -> &str {
    let trimmed = text.trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

/// Strip generic arguments and pointer/reference sigils from a type name.
pub fn base_type_name(text: &str) -> String {
    let trimmed = text.trim().trim_start_matches(['*', '&']).trim();
    let trimmed = trimmed.strip_prefix("mut ").unwrap_or(trimmed);
    let end = trimmed.find(['<', '[', '(']).unwrap_or(trimmed.len());
    trimmed[..end].trim().to_string()
}

/// Superclass chain for a class, following same-file `extends` links.
pub fn ancestry(entity: &Entity, by_name: &HashMap<&str, &Entity>) -> Vec<String> {
    let mut chain = Vec::new();
    let mut next = entity.extends.clone();
    while let Some(base) = next {
        if chain.contains(&base) || base == entity.name {
            break;
        }
        next = by_name.get(base.as_str()).and_then(|e| e.extends.clone());
        chain.push(base);
    }
    chain
}

/// Reflect a single entity as a value, resolving inheritance within the file.
pub fn entity_value(entity: &Entity, by_name: &HashMap<&str, &Entity>) -> Value {
    use crate::signature::Kind;

    match entity.kind {
        Kind::Class => {
            let mut methods = entity.methods.clone();
            let mut properties = entity.properties.clone();
            // Inherited members from same-file superclasses.
            for base in ancestry(entity, by_name) {
                if let Some(parent) = by_name.get(base.as_str()) {
                    for m in &parent.methods {
                        push_unique(&mut methods, m.clone());
                    }
                    for p in &parent.properties {
                        push_unique(&mut properties, p.clone());
                    }
                }
            }
            Value::Class {
                name: entity.name.clone(),
                extends: ancestry(entity, by_name),
                implements: entity.implements.clone(),
                methods,
                static_methods: entity.static_methods.clone(),
                properties,
            }
        }
        Kind::Function => Value::Function {
            name: entity.name.clone(),
            params: entity.params.clone(),
        },
        Kind::Object | Kind::Module => {
            let mut prototype_chain = Vec::new();
            let mut entries = std::collections::BTreeMap::new();
            if let Some(class) = &entity.instance_of {
                prototype_chain.push(class.clone());
                if let Some(parent) = by_name.get(class.as_str()) {
                    prototype_chain.extend(ancestry(parent, by_name));
                    for m in &parent.methods {
                        entries.insert(
                            m.clone(),
                            Value::Function {
                                name: m.clone(),
                                params: Vec::new(),
                            },
                        );
                    }
                    for p in &parent.properties {
                        entries.entry(p.clone()).or_insert(Value::Null);
                    }
                }
            }
            for m in &entity.methods {
                entries.insert(
                    m.clone(),
                    Value::Function {
                        name: m.clone(),
                        params: Vec::new(),
                    },
                );
            }
            for p in &entity.properties {
                entries.entry(p.clone()).or_insert(Value::Null);
            }
            Value::Object {
                prototype_chain,
                entries,
            }
        }
    }
}

/// Index entities by bare name.
pub fn index_by_name(entities: &[Entity]) -> HashMap<&str, &Entity> {
    entities.iter().map(|e| (e.name.as_str(), e)).collect()
}

// ── Scaffolding text helpers ───────────────────────────────────────

/// `CalculatorService` → `calculator_service`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else if ch.is_alphanumeric() {
            out.push(ch);
            prev_lower = true;
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// `add_item` → `AddItem`.
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect()
}

/// Quote a string for embedding in generated JS/Python source.
pub fn quoted(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}
