// Shared ECMAScript walker for JavaScript and TypeScript.
//
// Both grammars share node kinds for declarations, classes, and module
// syntax; TypeScript adds heritage clauses, field definitions, and enums,
// which are handled here behind kind checks.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use tree_sitter::Node;

use crate::signature::Kind;
use crate::value::{ModuleExports, ResolvedTarget, Value};
use crate::{Entity, ExportKind, FileMetadata, content_hash};

use super::TestOptions;
use super::helpers::{
    base_type_name, child_by_field, collect_identifiers, entity_value, has_child_kind,
    index_by_name, named_children, node_range, node_text, push_unique, quoted, unquote,
};

const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "property_identifier",
    "shorthand_property_identifier",
    "type_identifier",
];

const FUNCTION_VALUE_KINDS: &[&str] = &[
    "function",
    "function_expression",
    "arrow_function",
    "generator_function",
];

/// Export recorded by name before the entity it refers to is known.
#[derive(Debug)]
struct PendingExport {
    local: String,
    kind: ExportKind,
    alias: Option<String>,
}

/// `Owner.prototype.m = ...` or `Owner.m = ...` seen at top level.
#[derive(Debug)]
struct PendingMember {
    owner: String,
    member: String,
    is_static: bool,
}

#[derive(Debug, Default)]
struct EcmaState {
    entities: Vec<Entity>,
    imports: Vec<String>,
    exports: Vec<PendingExport>,
    members: Vec<PendingMember>,
}

/// Extract metadata from a JavaScript or TypeScript tree.
pub fn extract(
    tree: &tree_sitter::Tree,
    source: &str,
    path: &Path,
    language: &'static str,
) -> FileMetadata {
    let root = tree.root_node();
    let mut state = EcmaState::default();

    for child in named_children(root) {
        walk_statement(child, source, &mut state, None);
    }
    collect_requires(root, source, &mut state.imports);
    apply_members(&mut state);
    apply_exports(&mut state);

    FileMetadata {
        path: path.to_path_buf(),
        language,
        entities: state.entities,
        imports: state.imports,
        identifiers: collect_identifiers(root, source, IDENTIFIER_KINDS),
        source: Arc::from(source),
        content_hash: content_hash(source.as_bytes()),
    }
}

/// Reflect the export surface of an ECMAScript module.
pub fn reflect(metadata: &FileMetadata) -> ModuleExports {
    let index = index_by_name(&metadata.entities);
    let mut exports = ModuleExports::default();
    for entity in &metadata.entities {
        let value = entity_value(entity, &index);
        match entity.export {
            Some(ExportKind::Default) => exports.default = Some(value),
            Some(ExportKind::Named) => {
                exports.named.insert(entity.exported_name().to_string(), value);
            }
            None => {}
        }
    }
    exports
}

fn walk_statement(
    node: Node<'_>,
    source: &str,
    state: &mut EcmaState,
    export: Option<ExportKind>,
) {
    match node.kind() {
        "class_declaration" | "abstract_class_declaration" | "class" => {
            let mut entity = class_entity(node, source, "default");
            entity.export = export;
            state.entities.push(entity);
        }
        "function_declaration" | "generator_function_declaration" => {
            let name = child_by_field(node, "name")
                .map_or("default", |n| node_text(n, source));
            let mut entity = function_entity(node, source, name);
            entity.export = export;
            state.entities.push(entity);
        }
        "lexical_declaration" | "variable_declaration" => {
            for declarator in named_children(node) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let Some(name_node) = child_by_field(declarator, "name") else {
                    continue;
                };
                if name_node.kind() != "identifier" {
                    continue;
                }
                let name = node_text(name_node, source);
                if let Some(value) = child_by_field(declarator, "value") {
                    if let Some(mut entity) = value_entity(value, source, name) {
                        entity.span = node_range(declarator);
                        entity.export = export;
                        state.entities.push(entity);
                    }
                }
            }
        }
        "enum_declaration" => {
            if let Some(name_node) = child_by_field(node, "name") {
                let mut entity = Entity::new(
                    node_text(name_node, source),
                    Kind::Object,
                    node_range(node),
                );
                if let Some(body) = child_by_field(node, "body") {
                    for member in named_children(body) {
                        let member_name = match member.kind() {
                            "property_identifier" => Some(member),
                            "enum_assignment" => child_by_field(member, "name"),
                            _ => None,
                        };
                        if let Some(n) = member_name {
                            push_unique(&mut entity.properties, node_text(n, source));
                        }
                    }
                }
                entity.export = export;
                state.entities.push(entity);
            }
        }
        "export_statement" => walk_export(node, source, state),
        "expression_statement" => {
            if let Some(expr) = node.named_child(0) {
                if expr.kind() == "assignment_expression" {
                    walk_assignment(expr, source, state);
                }
            }
        }
        "import_statement" => {
            if let Some(src) = child_by_field(node, "source") {
                push_unique(&mut state.imports, unquote(node_text(src, source)));
            }
        }
        _ => {}
    }
}

fn walk_export(node: Node<'_>, source: &str, state: &mut EcmaState) {
    let is_default = has_child_kind(node, "default");
    let kind = if is_default {
        ExportKind::Default
    } else {
        ExportKind::Named
    };

    if let Some(decl) = child_by_field(node, "declaration") {
        walk_statement(decl, source, state, Some(kind));
        return;
    }

    if let Some(value) = child_by_field(node, "value") {
        if value.kind() == "identifier" {
            state.exports.push(PendingExport {
                local: node_text(value, source).to_string(),
                kind: ExportKind::Default,
                alias: None,
            });
        } else if let Some(mut entity) = value_entity(value, source, "default") {
            entity.export = Some(ExportKind::Default);
            state.entities.push(entity);
        }
        return;
    }

    if let Some(src) = child_by_field(node, "source") {
        // Re-exports from another module are not reflected locally.
        push_unique(&mut state.imports, unquote(node_text(src, source)));
        return;
    }

    for clause in named_children(node) {
        if clause.kind() != "export_clause" {
            continue;
        }
        for spec in named_children(clause) {
            if spec.kind() != "export_specifier" {
                continue;
            }
            let Some(local) = child_by_field(spec, "name") else {
                continue;
            };
            let alias = child_by_field(spec, "alias").map(|a| node_text(a, source).to_string());
            let kind = if alias.as_deref() == Some("default") {
                ExportKind::Default
            } else {
                ExportKind::Named
            };
            state.exports.push(PendingExport {
                local: node_text(local, source).to_string(),
                kind,
                alias: alias.filter(|a| a != "default"),
            });
        }
    }
}

fn walk_assignment(node: Node<'_>, source: &str, state: &mut EcmaState) {
    let (Some(left), Some(right)) = (child_by_field(node, "left"), child_by_field(node, "right"))
    else {
        return;
    };
    let left_text = node_text(left, source);

    if left_text == "module.exports" {
        walk_module_exports(right, source, state);
        return;
    }

    if left.kind() != "member_expression" {
        return;
    }
    let (Some(object), Some(property)) = (
        child_by_field(left, "object"),
        child_by_field(left, "property"),
    ) else {
        return;
    };
    let object_text = node_text(object, source);
    let member = node_text(property, source);

    if object_text == "exports" || object_text == "module.exports" {
        if right.kind() == "identifier" {
            let local = node_text(right, source);
            state.exports.push(PendingExport {
                local: local.to_string(),
                kind: ExportKind::Named,
                alias: (local != member).then(|| member.to_string()),
            });
        } else if let Some(mut entity) = value_entity(right, source, member) {
            entity.export = Some(ExportKind::Named);
            state.entities.push(entity);
        }
        return;
    }

    if let Some(owner) = object_text.strip_suffix(".prototype") {
        state.members.push(PendingMember {
            owner: owner.to_string(),
            member: member.to_string(),
            is_static: false,
        });
    } else if object.kind() == "identifier" && FUNCTION_VALUE_KINDS.contains(&right.kind()) {
        state.members.push(PendingMember {
            owner: object_text.to_string(),
            member: member.to_string(),
            is_static: true,
        });
    }
}

fn walk_module_exports(right: Node<'_>, source: &str, state: &mut EcmaState) {
    match right.kind() {
        "identifier" => state.exports.push(PendingExport {
            local: node_text(right, source).to_string(),
            kind: ExportKind::Default,
            alias: None,
        }),
        "object" => {
            for prop in named_children(right) {
                match prop.kind() {
                    "shorthand_property_identifier" => state.exports.push(PendingExport {
                        local: node_text(prop, source).to_string(),
                        kind: ExportKind::Named,
                        alias: None,
                    }),
                    "pair" => {
                        let (Some(key), Some(value)) =
                            (child_by_field(prop, "key"), child_by_field(prop, "value"))
                        else {
                            continue;
                        };
                        let key = unquote(node_text(key, source));
                        if value.kind() == "identifier" {
                            let local = node_text(value, source);
                            state.exports.push(PendingExport {
                                local: local.to_string(),
                                kind: ExportKind::Named,
                                alias: (local != key).then(|| key.to_string()),
                            });
                        } else if let Some(mut entity) = value_entity(value, source, key) {
                            entity.export = Some(ExportKind::Named);
                            state.entities.push(entity);
                        }
                    }
                    "method_definition" => {
                        if let Some(name) = child_by_field(prop, "name") {
                            let mut entity =
                                function_entity(prop, source, node_text(name, source));
                            entity.export = Some(ExportKind::Named);
                            state.entities.push(entity);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {
            if let Some(mut entity) = value_entity(right, source, "default") {
                entity.export = Some(ExportKind::Default);
                state.entities.push(entity);
            }
        }
    }
}

/// Build an entity for the value bound to `name`, if the value has a shape
/// worth reflecting.
fn value_entity(value: Node<'_>, source: &str, name: &str) -> Option<Entity> {
    match value.kind() {
        "class" => {
            let mut entity = class_entity(value, source, name);
            if name != "default" {
                entity.name = name.to_string();
                entity.qualified_name = name.to_string();
            }
            Some(entity)
        }
        kind if FUNCTION_VALUE_KINDS.contains(&kind) => Some(function_entity(value, source, name)),
        "object" => {
            let mut entity = Entity::new(name, Kind::Object, node_range(value));
            for prop in named_children(value) {
                match prop.kind() {
                    "method_definition" => {
                        if let Some(n) = child_by_field(prop, "name") {
                            push_unique(&mut entity.methods, node_text(n, source));
                        }
                    }
                    "pair" => {
                        let (Some(key), Some(val)) =
                            (child_by_field(prop, "key"), child_by_field(prop, "value"))
                        else {
                            continue;
                        };
                        let key = unquote(node_text(key, source));
                        if FUNCTION_VALUE_KINDS.contains(&val.kind()) {
                            push_unique(&mut entity.methods, key);
                        } else {
                            push_unique(&mut entity.properties, key);
                        }
                    }
                    "shorthand_property_identifier" => {
                        push_unique(&mut entity.properties, node_text(prop, source));
                    }
                    _ => {}
                }
            }
            Some(entity)
        }
        "new_expression" => {
            let constructor = child_by_field(value, "constructor")?;
            let mut entity = Entity::new(name, Kind::Object, node_range(value));
            entity.instance_of = Some(base_type_name(node_text(constructor, source)));
            Some(entity)
        }
        _ => None,
    }
}

fn class_entity(node: Node<'_>, source: &str, fallback: &str) -> Entity {
    let name = child_by_field(node, "name").map_or(fallback, |n| node_text(n, source));
    let mut entity = Entity::new(name, Kind::Class, node_range(node));

    for child in named_children(node) {
        if child.kind() != "class_heritage" {
            continue;
        }
        for clause in named_children(child) {
            match clause.kind() {
                "extends_clause" => {
                    let base = child_by_field(clause, "value").or_else(|| clause.named_child(0));
                    if let Some(base) = base {
                        entity.extends = Some(base_type_name(node_text(base, source)));
                    }
                }
                "implements_clause" => {
                    for iface in named_children(clause) {
                        push_unique(
                            &mut entity.implements,
                            base_type_name(node_text(iface, source)),
                        );
                    }
                }
                // Plain JavaScript: `extends <expression>`.
                _ => entity.extends = Some(base_type_name(node_text(clause, source))),
            }
        }
    }

    if let Some(body) = child_by_field(node, "body") {
        for member in named_children(body) {
            class_member(member, source, &mut entity);
        }
    }
    entity
}

fn class_member(member: Node<'_>, source: &str, entity: &mut Entity) {
    let is_static = has_child_kind(member, "static");
    match member.kind() {
        "method_definition" | "method_signature" | "abstract_method_signature" => {
            let Some(name_node) = child_by_field(member, "name") else {
                return;
            };
            let name = node_text(name_node, source);
            if name.starts_with('#') {
                return;
            }
            if name == "constructor" {
                if let Some(body) = child_by_field(member, "body") {
                    collect_this_assignments(body, source, &mut entity.properties);
                }
            } else if has_child_kind(member, "get") || has_child_kind(member, "set") {
                push_unique(&mut entity.properties, name);
            } else if is_static {
                push_unique(&mut entity.static_methods, name);
            } else {
                push_unique(&mut entity.methods, name);
            }
        }
        "field_definition" | "public_field_definition" => {
            let name_node =
                child_by_field(member, "property").or_else(|| child_by_field(member, "name"));
            let Some(name_node) = name_node else {
                return;
            };
            let name = node_text(name_node, source);
            if name.starts_with('#') {
                return;
            }
            let is_function = child_by_field(member, "value")
                .is_some_and(|v| FUNCTION_VALUE_KINDS.contains(&v.kind()));
            match (is_function, is_static) {
                (true, true) => push_unique(&mut entity.static_methods, name),
                (true, false) => push_unique(&mut entity.methods, name),
                (false, _) => push_unique(&mut entity.properties, name),
            }
        }
        _ => {}
    }
}

fn collect_this_assignments(node: Node<'_>, source: &str, properties: &mut Vec<String>) {
    if node.kind() == "assignment_expression" {
        if let Some(left) = child_by_field(node, "left") {
            if left.kind() == "member_expression"
                && child_by_field(left, "object").is_some_and(|o| o.kind() == "this")
            {
                if let Some(prop) = child_by_field(left, "property") {
                    push_unique(properties, node_text(prop, source));
                }
            }
        }
    }
    for child in named_children(node) {
        // Nested functions and classes have their own `this`.
        if matches!(
            child.kind(),
            "function_declaration" | "function_expression" | "function" | "class"
        ) {
            continue;
        }
        collect_this_assignments(child, source, properties);
    }
}

fn function_entity(node: Node<'_>, source: &str, name: &str) -> Entity {
    let mut entity = Entity::new(name, Kind::Function, node_range(node));
    let params = child_by_field(node, "parameters").or_else(|| child_by_field(node, "parameter"));
    if let Some(params) = params {
        if params.kind() == "identifier" {
            entity.params.push(node_text(params, source).to_string());
        } else {
            for param in named_children(params) {
                let name_node = match param.kind() {
                    "identifier" => Some(param),
                    "assignment_pattern" => child_by_field(param, "left"),
                    "required_parameter" | "optional_parameter" => child_by_field(param, "pattern"),
                    "rest_pattern" => param.named_child(0),
                    _ => None,
                };
                if let Some(n) = name_node {
                    entity.params.push(node_text(n, source).to_string());
                }
            }
        }
    }
    entity
}

fn collect_requires(node: Node<'_>, source: &str, imports: &mut Vec<String>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == "call_expression"
            && child_by_field(current, "function").is_some_and(|f| node_text(f, source) == "require")
        {
            if let Some(arg) = child_by_field(current, "arguments").and_then(|a| a.named_child(0)) {
                if arg.kind() == "string" {
                    push_unique(imports, unquote(node_text(arg, source)));
                }
            }
        }
        stack.extend(named_children(current));
    }
}

fn apply_members(state: &mut EcmaState) {
    for pending in std::mem::take(&mut state.members) {
        let Some(owner) = state
            .entities
            .iter_mut()
            .find(|e| e.name == pending.owner)
        else {
            continue;
        };
        if pending.is_static {
            push_unique(&mut owner.static_methods, pending.member);
        } else {
            // A constructor function with prototype methods behaves as a class.
            if owner.kind == Kind::Function {
                owner.kind = Kind::Class;
            }
            push_unique(&mut owner.methods, pending.member);
        }
    }
}

fn apply_exports(state: &mut EcmaState) {
    for pending in std::mem::take(&mut state.exports) {
        let Some(index) = state.entities.iter().position(|e| e.name == pending.local) else {
            continue;
        };
        let entity = &mut state.entities[index];
        match (entity.export, pending.kind) {
            (None, kind) => {
                entity.export = Some(kind);
                entity.export_alias = pending.alias;
            }
            // Already exported one way; the second export form gets its own entry.
            (Some(existing), kind) if existing != kind || pending.alias.is_some() => {
                let mut copy = entity.clone();
                copy.export = Some(kind);
                copy.export_alias = pending.alias;
                state.entities.push(copy);
            }
            _ => {}
        }
    }
}

/// Jest-style scaffold shared by the JavaScript and TypeScript plugins.
pub fn jest_scaffold(target: &ResolvedTarget, options: &TestOptions, esm: bool) -> String {
    let name = target.name();
    let module = quoted(&options.discovery_module);
    let mut out = String::new();
    if esm {
        let _ = writeln!(out, "import {{ discover }} from {module};");
    } else {
        let _ = writeln!(out, "const {{ discover }} = require({module});");
    }
    out.push('\n');

    let kind = target.value.kind().map_or("object", Kind::as_str);
    let _ = writeln!(out, "describe({}, () => {{", quoted(name));
    out.push_str("  let target;\n\n");
    out.push_str("  beforeAll(async () => {\n");
    let _ = writeln!(
        out,
        "    target = await discover({{ name: {}, type: {} }});",
        quoted(name),
        quoted(kind)
    );
    out.push_str("  });\n\n");
    out.push_str("  it('is discoverable', () => {\n");
    out.push_str("    expect(target).toBeDefined();\n");
    out.push_str("  });\n");

    if options.method_stubs {
        for method in target.value.method_names() {
            out.push('\n');
            let _ = writeln!(out, "  it({}, () => {{", quoted(&format!("{method} works")));
            let _ = writeln!(out, "    // TODO: exercise {method}");
            let receiver = match &target.value {
                Value::Class { static_methods, .. }
                    if !static_methods.iter().any(|s| s == method) =>
                {
                    "target.prototype"
                }
                _ => "target",
            };
            let _ = writeln!(
                out,
                "    expect(typeof {receiver}.{method}).toBe('function');"
            );
            out.push_str("  });\n");
        }
    }
    out.push_str("});\n");
    out
}
