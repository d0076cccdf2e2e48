use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tree_sitter::Node;

use crate::signature::{Kind, Signature};
use crate::value::{ModuleExports, ResolvedTarget};
use crate::{CandidateDescriptor, Entity, ExportKind, FileMetadata, Result, content_hash};

use super::helpers::{
    base_type_name, child_by_field, collect_identifiers, entity_value, find_child_by_kind,
    index_by_name, named_children, node_range, node_text, push_unique, snake_case, unquote,
};
use super::{
    DEFAULT_PARSE_CACHE_SIZE, LanguagePlugin, ParseCache, TestOptions, entity_name_bonus,
    export_bonus,
};

const UNSAFE_PATTERNS: &[&str] = &[
    r"\bsys\.exit\s*\(",
    r"\bos\._exit\s*\(",
    r"\bos\.(system|kill|remove|unlink|rmdir)\s*\(",
    r"\bshutil\.rmtree\s*\(",
    r"(?m)^\s*(import\s+subprocess|from\s+subprocess\s+import)\b",
    r"\bsubprocess\.",
];

/// Score adjustment for `_private` names.
const PRIVATE_PENALTY: f64 = -10.0;

#[derive(Debug)]
pub struct PythonPlugin {
    skip: Vec<Regex>,
    cache: ParseCache,
}

impl PythonPlugin {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_PARSE_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        // Both run code on import under common tooling.
        let skip = [r"^setup\.py$", r"^conftest\.py$"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            skip,
            cache: ParseCache::new(cache_size),
        }
    }
}

impl Default for PythonPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguagePlugin for PythonPlugin {
    fn id(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn skip_patterns(&self) -> &[Regex] {
        &self.skip
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn parse_cache(&self) -> &ParseCache {
        &self.cache
    }

    fn extract_metadata(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        path: &Path,
    ) -> Result<FileMetadata> {
        let root = tree.root_node();
        let mut entities = Vec::new();
        let mut imports = Vec::new();
        let mut all: Option<Vec<String>> = None;

        for child in named_children(root) {
            walk_module_statement(child, source, &mut entities, &mut imports, &mut all);
        }

        // `__all__` decides the public surface when present; otherwise every
        // name without a leading underscore is public.
        for entity in &mut entities {
            let public = match &all {
                Some(names) => names.contains(&entity.name),
                None => !entity.name.starts_with('_'),
            };
            if public {
                entity.export = Some(ExportKind::Named);
            }
        }

        Ok(FileMetadata {
            path: path.to_path_buf(),
            language: self.id(),
            entities,
            imports,
            identifiers: collect_identifiers(root, source, &["identifier"]),
            source: Arc::from(source),
            content_hash: content_hash(source.as_bytes()),
        })
    }

    fn reflect_exports(&self, metadata: &FileMetadata) -> ModuleExports {
        let index = index_by_name(&metadata.entities);
        let named = metadata
            .entities
            .iter()
            .filter(|e| e.is_exported())
            .map(|e| (e.exported_name().to_string(), entity_value(e, &index)))
            .collect();
        ModuleExports {
            default: None,
            named,
        }
    }

    fn generate_test_content(&self, target: &ResolvedTarget, options: &TestOptions) -> String {
        let name = target.name();
        let kind = target.value.kind().map_or("object", Kind::as_str);
        let slug = snake_case(name);
        let mut out = String::new();

        out.push_str("import pytest\n");
        let _ = writeln!(out, "from {} import discover", options.discovery_module);
        out.push_str("\n\n@pytest.fixture(scope=\"module\")\n");
        out.push_str("def target():\n");
        let _ = writeln!(
            out,
            "    return discover({{\"name\": {name:?}, \"type\": {kind:?}}})"
        );
        out.push_str("\n\n");
        let _ = writeln!(out, "def test_{slug}_is_discoverable(target):");
        out.push_str("    assert target is not None\n");

        if options.method_stubs {
            for method in target.value.method_names() {
                out.push_str("\n\n");
                let _ = writeln!(out, "def test_{}(target):", snake_case(method));
                let _ = writeln!(out, "    assert callable(getattr(target, {method:?}))");
            }
        }
        out
    }

    fn unsafe_patterns(&self) -> &'static [&'static str] {
        UNSAFE_PATTERNS
    }

    fn score_language_specific(
        &self,
        candidate: &CandidateDescriptor,
        signature: &Signature,
    ) -> f64 {
        let private = !candidate.module_level
            && candidate.name.starts_with('_')
            && !candidate.name.starts_with("__");
        let penalty = if private { PRIVATE_PENALTY } else { 0.0 };
        entity_name_bonus(candidate, signature) + export_bonus(candidate, signature) + penalty
    }
}

fn walk_module_statement(
    node: Node<'_>,
    source: &str,
    entities: &mut Vec<Entity>,
    imports: &mut Vec<String>,
    all: &mut Option<Vec<String>>,
) {
    match node.kind() {
        "class_definition" => entities.push(class_entity(node, source)),
        "function_definition" => {
            if let Some(entity) = function_entity(node, source) {
                entities.push(entity);
            }
        }
        "decorated_definition" => {
            if let Some(def) = child_by_field(node, "definition") {
                walk_module_statement(def, source, entities, imports, all);
            }
        }
        "expression_statement" => {
            let Some(assign) = node.named_child(0).filter(|n| n.kind() == "assignment") else {
                return;
            };
            let (Some(left), Some(right)) =
                (child_by_field(assign, "left"), child_by_field(assign, "right"))
            else {
                return;
            };
            if left.kind() != "identifier" {
                return;
            }
            let name = node_text(left, source);
            if name == "__all__" {
                *all = Some(string_list(right, source));
                return;
            }
            if let Some(mut entity) = value_entity(right, source, name) {
                entity.span = node_range(assign);
                entities.push(entity);
            }
        }
        "import_statement" => {
            for child in named_children(node) {
                let module = match child.kind() {
                    "dotted_name" => Some(child),
                    "aliased_import" => child_by_field(child, "name"),
                    _ => None,
                };
                if let Some(module) = module {
                    push_unique(imports, node_text(module, source));
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = child_by_field(node, "module_name") {
                push_unique(imports, node_text(module, source));
            }
        }
        _ => {}
    }
}

fn class_entity(node: Node<'_>, source: &str) -> Entity {
    let name = child_by_field(node, "name").map_or("", |n| node_text(n, source));
    let mut entity = Entity::new(name, Kind::Class, node_range(node));

    if let Some(supers) = child_by_field(node, "superclasses") {
        let mut bases = named_children(supers)
            .into_iter()
            .filter(|b| matches!(b.kind(), "identifier" | "attribute"))
            .map(|b| base_type_name(node_text(b, source)))
            .filter(|b| b != "object");
        entity.extends = bases.next();
        entity.implements = bases.collect();
    }

    let Some(body) = child_by_field(node, "body") else {
        return entity;
    };
    for member in named_children(body) {
        let (def, decorators) = if member.kind() == "decorated_definition" {
            let decorators: Vec<String> = named_children(member)
                .into_iter()
                .filter(|d| d.kind() == "decorator")
                .map(|d| node_text(d, source).trim_start_matches('@').trim().to_string())
                .collect();
            match child_by_field(member, "definition") {
                Some(def) => (def, decorators),
                None => continue,
            }
        } else {
            (member, Vec::new())
        };

        match def.kind() {
            "function_definition" => {
                let Some(method) = child_by_field(def, "name").map(|n| node_text(n, source)) else {
                    continue;
                };
                if method == "__init__" {
                    if let Some(init_body) = child_by_field(def, "body") {
                        collect_self_assignments(init_body, source, &mut entity.properties);
                    }
                    continue;
                }
                if method.starts_with("__") && method.ends_with("__") {
                    continue;
                }
                let decorated = |name: &str| decorators.iter().any(|d| d == name);
                if decorated("property") || decorators.iter().any(|d| d.ends_with(".setter")) {
                    push_unique(&mut entity.properties, method);
                } else if decorated("staticmethod") || decorated("classmethod") {
                    push_unique(&mut entity.static_methods, method);
                } else {
                    push_unique(&mut entity.methods, method);
                }
            }
            "expression_statement" => {
                if let Some(left) = def
                    .named_child(0)
                    .filter(|n| n.kind() == "assignment")
                    .and_then(|a| child_by_field(a, "left"))
                    .filter(|l| l.kind() == "identifier")
                {
                    push_unique(&mut entity.properties, node_text(left, source));
                }
            }
            _ => {}
        }
    }
    entity
}

fn collect_self_assignments(node: Node<'_>, source: &str, properties: &mut Vec<String>) {
    if matches!(node.kind(), "assignment" | "augmented_assignment") {
        if let Some(left) = child_by_field(node, "left").filter(|l| l.kind() == "attribute") {
            let is_self = child_by_field(left, "object")
                .is_some_and(|o| node_text(o, source) == "self");
            if is_self {
                if let Some(attr) = child_by_field(left, "attribute") {
                    push_unique(properties, node_text(attr, source));
                }
            }
        }
    }
    for child in named_children(node) {
        if matches!(child.kind(), "function_definition" | "class_definition") {
            continue;
        }
        collect_self_assignments(child, source, properties);
    }
}

fn function_entity(node: Node<'_>, source: &str) -> Option<Entity> {
    let name = node_text(child_by_field(node, "name")?, source);
    let mut entity = Entity::new(name, Kind::Function, node_range(node));
    if let Some(params) = child_by_field(node, "parameters") {
        for param in named_children(params) {
            let ident = match param.kind() {
                "identifier" => Some(param),
                "default_parameter" | "typed_default_parameter" => child_by_field(param, "name"),
                "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    find_child_by_kind(param, "identifier")
                }
                _ => None,
            };
            if let Some(ident) = ident {
                entity.params.push(node_text(ident, source).to_string());
            }
        }
    }
    Some(entity)
}

/// Module-level assignment worth reflecting: instances and dict literals.
fn value_entity(value: Node<'_>, source: &str, name: &str) -> Option<Entity> {
    match value.kind() {
        "call" => {
            let callee = child_by_field(value, "function")?;
            let callee = node_text(callee, source);
            let class = callee.rsplit('.').next().unwrap_or(callee);
            // Calls to capitalized names are taken to be constructors.
            if !class.starts_with(|c: char| c.is_ascii_uppercase()) {
                return None;
            }
            let mut entity = Entity::new(name, Kind::Object, node_range(value));
            entity.instance_of = Some(class.to_string());
            Some(entity)
        }
        "dictionary" => {
            let mut entity = Entity::new(name, Kind::Object, node_range(value));
            for pair in named_children(value) {
                if pair.kind() != "pair" {
                    continue;
                }
                let (Some(key), Some(val)) =
                    (child_by_field(pair, "key"), child_by_field(pair, "value"))
                else {
                    continue;
                };
                if key.kind() != "string" {
                    continue;
                }
                let key = unquote(node_text(key, source));
                if val.kind() == "lambda" {
                    push_unique(&mut entity.methods, key);
                } else {
                    push_unique(&mut entity.properties, key);
                }
            }
            Some(entity)
        }
        "lambda" => Some(Entity::new(name, Kind::Function, node_range(value))),
        _ => None,
    }
}

fn string_list(node: Node<'_>, source: &str) -> Vec<String> {
    named_children(node)
        .into_iter()
        .filter(|n| n.kind() == "string")
        .map(|n| unquote(node_text(n, source)).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureInput;
    use crate::value::{Access, TargetMetadata, Value};

    fn parse(source: &str) -> FileMetadata {
        PythonPlugin::new()
            .parse_source(source, Path::new("pkg/calculator.py"))
            .unwrap()
    }

    #[test]
    fn class_members_and_properties() {
        let meta = parse(
            "class Calculator(Base, Mixin):\n\
             \x20   unit = 'si'\n\
             \n\
             \x20   def __init__(self):\n\
             \x20       self.total = 0\n\
             \n\
             \x20   def add(self, a, b):\n\
             \x20       return a + b\n\
             \n\
             \x20   @property\n\
             \x20   def value(self):\n\
             \x20       return self.total\n\
             \n\
             \x20   @staticmethod\n\
             \x20   def create():\n\
             \x20       return Calculator()\n",
        );
        let calc = meta.entity("Calculator").unwrap();
        assert_eq!(calc.extends.as_deref(), Some("Base"));
        assert_eq!(calc.implements, vec!["Mixin"]);
        assert_eq!(calc.methods, vec!["add"]);
        assert_eq!(calc.static_methods, vec!["create"]);
        assert_eq!(calc.properties, vec!["unit", "total", "value"]);
        assert!(calc.is_exported());
    }

    #[test]
    fn dunder_all_limits_exports() {
        let meta = parse(
            "__all__ = ['add']\n\
             def add(a, b=1):\n\
             \x20   return a + b\n\
             def sub(a, b):\n\
             \x20   return a - b\n",
        );
        let exports = PythonPlugin::new().reflect_exports(&meta);
        assert_eq!(exports.named.keys().collect::<Vec<_>>(), vec!["add"]);
        assert!(exports.default.is_none());
        assert_eq!(meta.entity("add").unwrap().params, vec!["a", "b"]);
    }

    #[test]
    fn private_names_are_not_exported_and_penalized() {
        let plugin = PythonPlugin::new();
        let meta = plugin
            .parse_source(
                "class _Calculator:\n    pass\n\nclass Calculator:\n    pass\n",
                Path::new("calc.py"),
            )
            .unwrap();
        assert!(!meta.entity("_Calculator").unwrap().is_exported());
        let candidates = plugin.extract_candidates(&meta);
        let sig = Signature::normalize(SignatureInput::named("/Calculator/").kind(Kind::Class));
        let private = candidates.iter().find(|c| c.name == "_Calculator").unwrap();
        let public = candidates.iter().find(|c| c.name == "Calculator").unwrap();
        assert!(
            plugin.score_language_specific(public, &sig)
                > plugin.score_language_specific(private, &sig)
        );
    }

    #[test]
    fn module_instances_reference_their_class() {
        let meta = parse(
            "class Store:\n    def get(self):\n        pass\n\nstore = Store()\nlimit = compute()\n",
        );
        let exports = PythonPlugin::new().reflect_exports(&meta);
        let store = exports.named.get("store").unwrap();
        assert!(store.is_instance_of("Store"));
        assert!(store.has_method("get"));
        assert!(!exports.named.contains_key("limit"));
    }

    #[test]
    fn imports_are_collected() {
        let meta = parse("import os.path\nimport numpy as np\nfrom collections import deque\n");
        assert_eq!(meta.imports, vec!["os.path", "numpy", "collections"]);
    }

    #[test]
    fn scaffold_is_pytest() {
        let target = ResolvedTarget {
            value: Value::Function {
                name: "add".into(),
                params: vec!["a".into(), "b".into()],
            },
            access: Access::named("add"),
            full_name: "calculator.add".into(),
            metadata: TargetMetadata {
                path: "pkg/calculator.py".into(),
                language: "python".into(),
                score: 40.0,
                cache_key: "k".into(),
            },
        };
        let text = PythonPlugin::new().generate_test_content(&target, &TestOptions::default());
        assert!(text.contains("from scout import discover"));
        assert!(text.contains("def test_add_is_discoverable(target):"));
        assert!(text.contains("\"type\": \"function\""));
    }
}
