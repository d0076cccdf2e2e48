use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tree_sitter::Node;

use crate::signature::Kind;
use crate::value::{ModuleExports, ResolvedTarget};
use crate::{Entity, ExportKind, FileMetadata, Result, content_hash};

use super::helpers::{
    base_type_name, child_by_field, collect_identifiers, dotted_name, entity_value,
    has_child_kind, index_by_name, named_children, node_range, node_text, push_unique, snake_case,
};
use super::{DEFAULT_PARSE_CACHE_SIZE, LanguagePlugin, ParseCache, TestOptions};

const UNSAFE_PATTERNS: &[&str] = &[
    r"\bprocess::(exit|abort)\s*\(",
    r"\bfs::remove_dir_all\s*\(",
    r"\bCommand::new\s*\(",
];

const IDENTIFIER_KINDS: &[&str] = &["identifier", "field_identifier", "type_identifier"];

#[derive(Debug)]
pub struct RustPlugin {
    skip: Vec<Regex>,
    cache: ParseCache,
}

impl RustPlugin {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_PARSE_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        // Build scripts run arbitrary code at compile time.
        let skip = [r"^build\.rs$"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            skip,
            cache: ParseCache::new(cache_size),
        }
    }
}

impl Default for RustPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguagePlugin for RustPlugin {
    fn id(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn skip_patterns(&self) -> &[Regex] {
        &self.skip
    }

    fn tree_sitter_language(&self, _path: &Path) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
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
        let mut impls = Vec::new();
        let mut context = Vec::new();

        walk_items(
            root,
            source,
            &mut context,
            true,
            &mut entities,
            &mut imports,
            &mut impls,
        );

        for block in impls {
            let Some(owner) = entities
                .iter_mut()
                .find(|e| e.qualified_name == block.owner || e.name == block.owner)
            else {
                continue;
            };
            if let Some(iface) = block.trait_name {
                push_unique(&mut owner.implements, iface);
            }
            for method in block.methods {
                push_unique(&mut owner.methods, method);
            }
            for method in block.static_methods {
                push_unique(&mut owner.static_methods, method);
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
            .map(|e| (e.qualified_name.clone(), entity_value(e, &index)))
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

        let _ = writeln!(out, "use {}::discover;", snake_case(&options.discovery_module));
        out.push('\n');
        out.push_str("#[tokio::test]\n");
        let _ = writeln!(out, "async fn {slug}_is_discoverable() {{");
        let _ = writeln!(
            out,
            "    let target = discover(r#\"{{\"name\":\"{name}\",\"type\":\"{kind}\"}}\"#)"
        );
        out.push_str("        .await\n");
        out.push_str("        .expect(\"target should resolve\");\n");
        let _ = writeln!(out, "    assert_eq!(target.name(), \"{name}\");");

        if options.method_stubs {
            for method in target.value.method_names() {
                let _ = writeln!(out, "    assert!(target.value.has_method(\"{method}\"));");
            }
        }
        out.push_str("}\n");
        out
    }

    fn unsafe_patterns(&self) -> &'static [&'static str] {
        UNSAFE_PATTERNS
    }
}

/// Methods found in one `impl` block, attached to their type afterwards.
#[derive(Debug)]
struct ImplBlock {
    owner: String,
    trait_name: Option<String>,
    methods: Vec<String>,
    static_methods: Vec<String>,
}

fn is_pub(node: Node<'_>) -> bool {
    has_child_kind(node, "visibility_modifier")
}

fn walk_items(
    node: Node<'_>,
    source: &str,
    context: &mut Vec<String>,
    visible: bool,
    entities: &mut Vec<Entity>,
    imports: &mut Vec<String>,
    impls: &mut Vec<ImplBlock>,
) {
    for item in named_children(node) {
        match item.kind() {
            "struct_item" | "enum_item" | "union_item" => {
                let Some(name) = child_by_field(item, "name") else {
                    continue;
                };
                let name = node_text(name, source);
                let mut entity = Entity::new(name, Kind::Class, node_range(item));
                entity.qualified_name = dotted_name(context, name);
                if let Some(body) = child_by_field(item, "body") {
                    for member in named_children(body) {
                        let field = match member.kind() {
                            "field_declaration" | "enum_variant" => child_by_field(member, "name"),
                            _ => None,
                        };
                        if let Some(field) = field {
                            push_unique(&mut entity.properties, node_text(field, source));
                        }
                    }
                }
                if visible && is_pub(item) {
                    entity.export = Some(ExportKind::Named);
                }
                entities.push(entity);
            }
            "function_item" => {
                let Some(name) = child_by_field(item, "name") else {
                    continue;
                };
                let name = node_text(name, source);
                let mut entity = Entity::new(name, Kind::Function, node_range(item));
                entity.qualified_name = dotted_name(context, name);
                entity.params = param_names(item, source);
                if visible && is_pub(item) {
                    entity.export = Some(ExportKind::Named);
                }
                entities.push(entity);
            }
            "impl_item" => {
                let Some(owner) = child_by_field(item, "type") else {
                    continue;
                };
                let trait_name =
                    child_by_field(item, "trait").map(|t| base_type_name(node_text(t, source)));
                let mut block = ImplBlock {
                    owner: dotted_name(context, &base_type_name(node_text(owner, source))),
                    methods: Vec::new(),
                    static_methods: Vec::new(),
                    trait_name,
                };
                if let Some(body) = child_by_field(item, "body") {
                    for func in named_children(body) {
                        if func.kind() != "function_item" {
                            continue;
                        }
                        // Trait methods are public whenever the trait is.
                        if block.trait_name.is_none() && !is_pub(func) {
                            continue;
                        }
                        let Some(name) = child_by_field(func, "name") else {
                            continue;
                        };
                        let takes_self = child_by_field(func, "parameters")
                            .is_some_and(|p| has_child_kind(p, "self_parameter"));
                        let list = if takes_self {
                            &mut block.methods
                        } else {
                            &mut block.static_methods
                        };
                        push_unique(list, node_text(name, source));
                    }
                }
                impls.push(block);
            }
            "mod_item" => {
                let Some(name) = child_by_field(item, "name") else {
                    continue;
                };
                let Some(body) = child_by_field(item, "body") else {
                    continue;
                };
                context.push(node_text(name, source).to_string());
                walk_items(
                    body,
                    source,
                    context,
                    visible && is_pub(item),
                    entities,
                    imports,
                    impls,
                );
                context.pop();
            }
            "use_declaration" => {
                if let Some(arg) = child_by_field(item, "argument") {
                    push_unique(imports, node_text(arg, source));
                }
            }
            _ => {}
        }
    }
}

fn param_names(func: Node<'_>, source: &str) -> Vec<String> {
    let Some(params) = child_by_field(func, "parameters") else {
        return Vec::new();
    };
    named_children(params)
        .into_iter()
        .filter(|p| p.kind() == "parameter")
        .filter_map(|p| child_by_field(p, "pattern"))
        .map(|p| node_text(p, source).trim_start_matches("mut ").to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> FileMetadata {
        RustPlugin::new()
            .parse_source(source, Path::new("src/calculator.rs"))
            .unwrap()
    }

    #[test]
    fn structs_collect_impl_methods() {
        let meta = parse(
            "pub struct Calculator { total: i64 }\n\
             impl Calculator {\n\
             \x20   pub fn new() -> Self { Self { total: 0 } }\n\
             \x20   pub fn add(&mut self, n: i64) { self.total += n; }\n\
             \x20   fn reset(&mut self) {}\n\
             }\n\
             impl Default for Calculator { fn default() -> Self { Self::new() } }\n",
        );
        let calc = meta.entity("Calculator").unwrap();
        assert_eq!(calc.kind, Kind::Class);
        assert_eq!(calc.methods, vec!["add"]);
        assert_eq!(calc.static_methods, vec!["new", "default"]);
        assert_eq!(calc.properties, vec!["total"]);
        assert_eq!(calc.implements, vec!["Default"]);
        assert!(calc.is_exported());
    }

    #[test]
    fn only_reachable_items_are_exported() {
        let meta = parse(
            "pub fn add(a: i32, mut b: i32) -> i32 { a + b }\n\
             fn helper() {}\n\
             pub mod shapes { pub struct Circle; struct Hidden; }\n\
             mod private { pub struct Secret; }\n",
        );
        let exports = RustPlugin::new().reflect_exports(&meta);
        let names: Vec<&str> = exports.named.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["add", "shapes.Circle"]);
        assert_eq!(meta.entity("add").unwrap().params, vec!["a", "b"]);
    }

    #[test]
    fn build_scripts_are_skipped() {
        let plugin = RustPlugin::new();
        assert!(!plugin.should_scan_file(Path::new("crate/build.rs")));
        assert!(plugin.should_scan_file(Path::new("crate/src/lib.rs")));
    }
}
