use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tree_sitter::Node;

use crate::signature::Kind;
use crate::value::{ModuleExports, ResolvedTarget};
use crate::{Entity, ExportKind, FileMetadata, Result, content_hash};

use super::helpers::{
    base_type_name, child_by_field, collect_identifiers, entity_value, index_by_name,
    named_children, node_range, node_text, pascal_case, push_unique, unquote,
};
use super::{DEFAULT_PARSE_CACHE_SIZE, LanguagePlugin, ParseCache, TestOptions};

const UNSAFE_PATTERNS: &[&str] = &[
    r"\bos\.(Exit|RemoveAll)\s*\(",
    r"\bsyscall\.(Kill|Exit)\s*\(",
    r"\bexec\.Command\s*\(",
    r"\blog\.Fatal(f|ln)?\s*\(",
    r"\bhttp\.ListenAndServe\s*\(",
];

const IDENTIFIER_KINDS: &[&str] = &["identifier", "field_identifier", "type_identifier"];

#[derive(Debug)]
pub struct GoPlugin {
    skip: Vec<Regex>,
    cache: ParseCache,
}

impl GoPlugin {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_PARSE_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        let skip = [r"_test\.go$"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            skip,
            cache: ParseCache::new(cache_size),
        }
    }
}

impl Default for GoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn is_exported_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_uppercase())
}

impl LanguagePlugin for GoPlugin {
    fn id(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn skip_patterns(&self) -> &[Regex] {
        &self.skip
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
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
        // (receiver type, method name)
        let mut methods: Vec<(String, String)> = Vec::new();

        for decl in named_children(root) {
            match decl.kind() {
                "type_declaration" => {
                    for spec in named_children(decl) {
                        if spec.kind() == "type_spec" {
                            if let Some(entity) = type_entity(spec, source) {
                                entities.push(entity);
                            }
                        }
                    }
                }
                "function_declaration" => {
                    if let Some(name) = child_by_field(decl, "name") {
                        let mut entity = Entity::new(
                            node_text(name, source),
                            Kind::Function,
                            node_range(decl),
                        );
                        entity.params = param_names(decl, source);
                        entities.push(entity);
                    }
                }
                "method_declaration" => {
                    let receiver = child_by_field(decl, "receiver")
                        .and_then(|r| named_children(r).into_iter().next())
                        .and_then(|p| child_by_field(p, "type"));
                    if let (Some(receiver), Some(name)) = (receiver, child_by_field(decl, "name"))
                    {
                        methods.push((
                            base_type_name(node_text(receiver, source)),
                            node_text(name, source).to_string(),
                        ));
                    }
                }
                "var_declaration" => {
                    for spec in named_children(decl) {
                        if spec.kind() == "var_spec" {
                            entities.extend(var_entity(spec, source));
                        }
                    }
                }
                "import_declaration" => collect_imports(decl, source, &mut imports),
                _ => {}
            }
        }

        for (receiver, method) in methods {
            if !is_exported_name(&method) {
                continue;
            }
            if let Some(owner) = entities.iter_mut().find(|e| e.name == receiver) {
                push_unique(&mut owner.methods, method);
            }
        }
        for entity in &mut entities {
            if is_exported_name(&entity.name) {
                entity.export = Some(ExportKind::Named);
            }
        }

        Ok(FileMetadata {
            path: path.to_path_buf(),
            language: self.id(),
            entities,
            imports,
            identifiers: collect_identifiers(root, source, IDENTIFIER_KINDS),
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
            .map(|e| (e.name.clone(), entity_value(e, &index)))
            .collect();
        ModuleExports {
            default: None,
            named,
        }
    }

    fn generate_test_content(&self, target: &ResolvedTarget, options: &TestOptions) -> String {
        let name = target.name();
        let kind = target.value.kind().map_or("object", Kind::as_str);
        let package = target
            .metadata
            .path
            .parent()
            .and_then(Path::file_name)
            .map_or_else(|| "main".to_string(), |p| p.to_string_lossy().to_string());
        let mut out = String::new();

        let _ = writeln!(out, "package {package}_test");
        out.push('\n');
        out.push_str("import (\n\t\"testing\"\n\n");
        let _ = writeln!(out, "\t\"{}\"", options.discovery_module);
        out.push_str(")\n\n");
        let _ = writeln!(out, "func Test{}IsDiscoverable(t *testing.T) {{", pascal_case(name));
        let _ = writeln!(
            out,
            "\ttarget, err := {}.Discover(map[string]any{{\"name\": \"{name}\", \"type\": \"{kind}\"}})",
            options.discovery_module
        );
        out.push_str("\tif err != nil {\n\t\tt.Fatal(err)\n\t}\n");
        if options.method_stubs {
            for method in target.value.method_names() {
                let _ = writeln!(
                    out,
                    "\tif !target.HasMethod(\"{method}\") {{\n\t\tt.Errorf(\"missing method {method}\")\n\t}}"
                );
            }
        }
        out.push_str("}\n");
        out
    }

    fn unsafe_patterns(&self) -> &'static [&'static str] {
        UNSAFE_PATTERNS
    }
}

fn type_entity(spec: Node<'_>, source: &str) -> Option<Entity> {
    let name = node_text(child_by_field(spec, "name")?, source);
    let ty = child_by_field(spec, "type")?;
    if ty.kind() != "struct_type" {
        return None;
    }
    let mut entity = Entity::new(name, Kind::Class, node_range(spec));
    let Some(fields) = named_children(ty)
        .into_iter()
        .find(|n| n.kind() == "field_declaration_list")
    else {
        return Some(entity);
    };
    for field in named_children(fields) {
        if field.kind() != "field_declaration" {
            continue;
        }
        let names: Vec<Node<'_>> = named_children(field)
            .into_iter()
            .filter(|n| n.kind() == "field_identifier")
            .collect();
        if names.is_empty() {
            // Embedded type: Go's form of inheritance.
            if let Some(embedded) = child_by_field(field, "type") {
                let base = base_type_name(node_text(embedded, source));
                if entity.extends.is_none() {
                    entity.extends = Some(base);
                } else {
                    push_unique(&mut entity.implements, base);
                }
            }
        } else {
            for n in names {
                let field_name = node_text(n, source);
                if is_exported_name(field_name) {
                    push_unique(&mut entity.properties, field_name);
                }
            }
        }
    }
    Some(entity)
}

fn var_entity(spec: Node<'_>, source: &str) -> Option<Entity> {
    let name = node_text(child_by_field(spec, "name")?, source);
    let value = child_by_field(spec, "value")?.named_child(0)?;
    let literal = if value.kind() == "unary_expression" {
        child_by_field(value, "operand")?
    } else {
        value
    };
    if literal.kind() != "composite_literal" {
        return None;
    }
    let ty = child_by_field(literal, "type")?;
    let mut entity = Entity::new(name, Kind::Object, node_range(spec));
    entity.instance_of = Some(base_type_name(node_text(ty, source)));
    Some(entity)
}

fn param_names(func: Node<'_>, source: &str) -> Vec<String> {
    let Some(params) = child_by_field(func, "parameters") else {
        return Vec::new();
    };
    named_children(params)
        .into_iter()
        .flat_map(|decl| {
            named_children(decl)
                .into_iter()
                .filter(|n| n.kind() == "identifier")
                .map(|n| node_text(n, source).to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn collect_imports(node: Node<'_>, source: &str, imports: &mut Vec<String>) {
    for child in named_children(node) {
        match child.kind() {
            "import_spec" => {
                if let Some(path) = child_by_field(child, "path") {
                    push_unique(imports, unquote(node_text(path, source)));
                }
            }
            "import_spec_list" => collect_imports(child, source, imports),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> FileMetadata {
        GoPlugin::new()
            .parse_source(source, Path::new("calc/calculator.go"))
            .unwrap()
    }

    #[test]
    fn structs_gain_receiver_methods() {
        let meta = parse(
            "package calc\n\n\
             import (\n\t\"fmt\"\n\t\"strings\"\n)\n\n\
             type Base struct{}\n\n\
             type Calculator struct {\n\tBase\n\tTotal int\n\tcache map[string]int\n}\n\n\
             func (c *Calculator) Add(a, b int) int { return a + b }\n\
             func (c Calculator) reset() {}\n\
             func NewCalculator() *Calculator { return &Calculator{} }\n",
        );
        let calc = meta.entity("Calculator").unwrap();
        assert_eq!(calc.kind, Kind::Class);
        assert_eq!(calc.methods, vec!["Add"]);
        assert_eq!(calc.properties, vec!["Total"]);
        assert_eq!(calc.extends.as_deref(), Some("Base"));
        assert!(calc.is_exported());
        assert_eq!(meta.imports, vec!["fmt", "strings"]);
    }

    #[test]
    fn lowercase_names_stay_private() {
        let meta = parse(
            "package calc\n\n\
             type Store struct{}\n\
             func (s *Store) Get() {}\n\
             var Default = &Store{}\n\
             func helper(x int) {}\n",
        );
        let exports = GoPlugin::new().reflect_exports(&meta);
        assert!(exports.named.contains_key("Store"));
        assert!(!exports.named.contains_key("helper"));
        let default = exports.named.get("Default").unwrap();
        assert!(default.is_instance_of("Store"));
        assert!(default.has_method("Get"));
        assert_eq!(meta.entity("helper").unwrap().params, vec!["x"]);
    }

    #[test]
    fn go_tests_are_skipped() {
        let plugin = GoPlugin::new();
        assert!(!plugin.should_scan_file(Path::new("calc/calculator_test.go")));
        assert!(plugin.should_scan_file(Path::new("calc/calculator.go")));
    }
}
