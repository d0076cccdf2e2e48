//! Candidate evaluation: a static safety gate before any load, choosing
//! which export to read, and checking the loaded value against the
//! signature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use scout_lang::{
    Access, AccessKind, CandidateDescriptor, ExportKind, FileMetadata, Kind, LanguagePlugin,
    ModuleExports, Signature, Value,
};
use tracing::warn;

/// Patterns rejected for every language: process termination, shelling
/// out, and destructive filesystem calls.
pub const GENERIC_UNSAFE_PATTERNS: &[&str] = &[
    r"\bprocess\.exit\s*\(",
    r#"require\s*\(\s*['"](node:)?child_process['"]\s*\)"#,
    r"\bos\.system\s*\(",
    r"\bsubprocess\.",
    r"\bshutil\.rmtree\s*\(",
    r"\bsys\.exit\s*\(",
    r"\bstd::process::(exit|abort)\b",
    r"\bstd::process::Command\b",
    r"\bfs::remove_dir_all\s*\(",
    r"\beval\s*\(",
];

/// `true` when no pattern matches anywhere in `content`.
pub fn is_candidate_safe(content: &str, patterns: &[Regex]) -> bool {
    first_unsafe_match(content, patterns).is_none()
}

/// The first pattern that matches `content`, by source text.
pub fn first_unsafe_match<'a>(content: &str, patterns: &'a [Regex]) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| p.is_match(content))
        .map(Regex::as_str)
}

/// Compiled denylists, one per plugin: generic patterns, configured extras,
/// then the plugin's own patterns.
#[derive(Debug)]
pub struct SafetyPolicy {
    base: Vec<Regex>,
    per_plugin: Mutex<HashMap<&'static str, Arc<Vec<Regex>>>>,
}

impl SafetyPolicy {
    /// Invalid extra patterns are logged and skipped.
    pub fn new(extra: &[String]) -> Self {
        let base = GENERIC_UNSAFE_PATTERNS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Skipping invalid unsafe pattern");
                    None
                }
            })
            .collect();
        Self {
            base,
            per_plugin: Mutex::new(HashMap::new()),
        }
    }

    pub fn patterns_for(&self, plugin: &dyn LanguagePlugin) -> Arc<Vec<Regex>> {
        let mut cache = self.per_plugin.lock().expect("safety policy mutex poisoned");
        let compiled = cache.entry(plugin.id()).or_insert_with(|| {
            let mut patterns = self.base.clone();
            patterns.extend(plugin.unsafe_patterns().iter().filter_map(|p| {
                Regex::new(p)
                    .inspect_err(|e| {
                        warn!(plugin = plugin.id(), pattern = %p, error = %e, "Skipping invalid plugin pattern");
                    })
                    .ok()
            }));
            Arc::new(patterns)
        });
        Arc::clone(compiled)
    }

    /// The matching pattern when `content` must not be loaded.
    pub fn check(&self, plugin: &dyn LanguagePlugin, content: &str) -> Option<String> {
        let patterns = self.patterns_for(plugin);
        first_unsafe_match(content, &patterns).map(str::to_string)
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Access path implied by a descriptor, without looking at the module.
pub fn plan_access(descriptor: &CandidateDescriptor) -> Option<Access> {
    if descriptor.module_level {
        return Some(Access::module());
    }
    match descriptor.export? {
        ExportKind::Default => Some(Access::default_export()),
        ExportKind::Named => Some(Access::named(
            descriptor
                .export_name
                .clone()
                .unwrap_or_else(|| descriptor.name.clone()),
        )),
    }
}

/// Pick an access path from file-level metadata alone.
///
/// Preference: the signature's explicit export name, an export whose name
/// matches the signature, then the default export.
pub fn select_export_from_metadata(
    metadata: &FileMetadata,
    signature: &Signature,
) -> Option<Access> {
    if let Some(wanted) = signature.exports() {
        if let Some(entity) = metadata
            .entities
            .iter()
            .find(|e| e.is_exported() && e.exported_name() == wanted)
        {
            return Some(match entity.export {
                Some(ExportKind::Default) => Access::default_export(),
                _ => Access::named(wanted),
            });
        }
    }
    let by_name = metadata.entities.iter().find(|e| {
        e.export == Some(ExportKind::Named)
            && (signature.name_matches(&e.name) || signature.name_matches(e.exported_name()))
    });
    if let Some(entity) = by_name {
        return Some(Access::named(entity.exported_name()));
    }
    metadata.default_export().map(|_| Access::default_export())
}

fn kind_fits(value: &Value, signature: &Signature) -> bool {
    match (signature.kind(), value.kind()) {
        (None, _) => true,
        (Some(Kind::Module), Some(Kind::Object)) => true,
        (Some(wanted), Some(actual)) => wanted == actual,
        (Some(_), None) => false,
    }
}

/// `true` when the export a resolution reached answers to the signature's
/// name.
///
/// Named exports match on the export key or the value's own name. Default
/// exports match on the value's name; anonymous defaults and instances
/// stand for the module. The module itself matches on `module_name`, and a
/// `None` module name accepts anything that depends on it.
pub fn name_fits(
    value: &Value,
    access: &Access,
    signature: &Signature,
    module_name: Option<&str>,
) -> bool {
    let Some(name) = signature.name() else {
        return true;
    };
    let module_fits = || module_name.is_none_or(|m| name.is_match(m) || name.matches_ignore_case(m));
    match access.kind {
        AccessKind::Module => module_fits(),
        AccessKind::Named => {
            access.name.as_deref().is_some_and(|n| name.is_match(n))
                || value.name().is_some_and(|n| name.is_match(n))
        }
        AccessKind::Default => match value.name().filter(|n| !n.is_empty()) {
            Some(n) if name.is_match(n) => true,
            Some(_) if !matches!(value, Value::Object { .. }) => false,
            _ => module_fits(),
        },
    }
}

/// Locate the target inside a loaded module.
///
/// Tries, in order: the preferred access when its kind and name fit, the
/// signature's explicit export name, the default export, named exports in
/// key order, and finally the module itself for module signatures.
pub fn resolve_target_from_module(
    exports: &ModuleExports,
    signature: &Signature,
    preferred: Option<&Access>,
) -> Option<(Value, Access)> {
    if let Some(access) = preferred {
        if let Some(value) = exports.get(access) {
            let fits = if access.kind == AccessKind::Module {
                matches!(signature.kind(), None | Some(Kind::Module))
            } else {
                kind_fits(&value, signature) && name_fits(&value, access, signature, None)
            };
            if fits {
                return Some((value, access.clone()));
            }
        }
    }

    if let Some(wanted) = signature.exports() {
        if let Some(value) = exports.named.get(wanted) {
            return Some((value.clone(), Access::named(wanted)));
        }
    }

    if let Some(default) = &exports.default {
        let named = default.name().is_none_or(|n| signature.name_matches(n));
        if named && default.kind().is_some() && kind_fits(default, signature) {
            return Some((default.clone(), Access::default_export()));
        }
    }

    let named = exports.named.iter().find(|(key, value)| {
        value.kind().is_some()
            && kind_fits(value, signature)
            && (signature.name_matches(key) || value.name().is_some_and(|n| signature.name_matches(n)))
    });
    if let Some((key, value)) = named {
        return Some((value.clone(), Access::named(key.clone())));
    }

    (signature.kind() == Some(Kind::Module)).then(|| (exports.as_module_value(), Access::module()))
}

/// Check a loaded value against every structural requirement of the
/// signature. Returns every unmet requirement.
pub fn validate_target(value: &Value, signature: &Signature) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    if let Some(wanted) = signature.kind() {
        let ok = match (wanted, value.kind()) {
            (Kind::Module, Some(Kind::Object)) => true,
            (wanted, Some(actual)) => wanted == actual,
            (_, None) => false,
        };
        if !ok {
            problems.push(format!(
                "expected {wanted}, found {}",
                value.kind().map_or("a plain value", Kind::as_str)
            ));
        }
    }
    for method in signature.methods() {
        if !value.has_method(method) {
            problems.push(format!("missing method `{method}`"));
        }
    }
    for property in signature.properties() {
        if !value.has_property(property) {
            problems.push(format!("missing property `{property}`"));
        }
    }
    if let Some(base) = signature.extends() {
        if !value.derives_from(base) {
            problems.push(format!("does not extend `{base}`"));
        }
    }
    if let Some(class) = signature.instance_of() {
        if !value.is_instance_of(class) {
            problems.push(format!("is not an instance of `{class}`"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// [`validate_target`] plus the name check, for a value reached through
/// `access` in the module whose file stem is `module_name`.
pub fn validate_resolution(
    value: &Value,
    access: &Access,
    signature: &Signature,
    module_name: &str,
) -> Result<(), Vec<String>> {
    let mut problems = validate_target(value, signature).err().unwrap_or_default();
    if let Some(name) = signature.name() {
        if !name_fits(value, access, signature, Some(module_name)) {
            let found = match access.kind {
                AccessKind::Module => module_name,
                AccessKind::Named => access.name.as_deref().or(value.name()).unwrap_or("?"),
                AccessKind::Default => value.name().unwrap_or("default"),
            };
            problems.insert(0, format!("name `{found}` does not match `{name}`"));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use scout_lang::SignatureInput;
    use scout_lang::languages::javascript::JavaScriptPlugin;
    use scout_lang::languages::python::PythonPlugin;

    use super::*;

    fn calculator() -> Value {
        Value::Class {
            name: "Calculator".into(),
            extends: vec!["Base".into()],
            implements: Vec::new(),
            methods: vec!["add".into(), "subtract".into()],
            static_methods: Vec::new(),
            properties: vec!["total".into()],
        }
    }

    fn sig(input: SignatureInput) -> Signature {
        Signature::normalize(input)
    }

    #[test]
    fn generic_patterns_catch_process_exit() {
        let policy = SafetyPolicy::default();
        let plugin = JavaScriptPlugin::new();
        assert!(policy.check(&plugin, "class A {}\nprocess.exit(1);\n").is_some());
        assert!(policy.check(&plugin, "class A { exit() {} }\n").is_none());
    }

    #[test]
    fn plugin_patterns_only_apply_to_their_language() {
        let policy = SafetyPolicy::default();
        let js = JavaScriptPlugin::new();
        let py = PythonPlugin::new();
        let source = "const out = execSync('ls');";
        assert!(policy.check(&js, source).is_some());
        assert!(policy.check(&py, source).is_none());
    }

    #[test]
    fn configured_extras_are_added_and_bad_ones_skipped() {
        let policy = SafetyPolicy::new(&["dangerZone\\(".into(), "(".into()]);
        let plugin = JavaScriptPlugin::new();
        assert!(policy.check(&plugin, "dangerZone()").is_some());
        assert!(is_candidate_safe("fine()", &policy.patterns_for(&plugin)));
    }

    #[test]
    fn validation_reports_every_problem() {
        let s = sig(
            SignatureInput::named("Calculator")
                .kind(Kind::Class)
                .methods(["add", "multiply"])
                .properties(["total", "memory"])
                .extends("Base"),
        );
        let problems = validate_target(&calculator(), &s).unwrap_err();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("multiply"));
        assert!(problems[1].contains("memory"));

        let ok = sig(SignatureInput::named("Calculator").kind(Kind::Class).methods(["add"]).extends("Base"));
        assert!(validate_target(&calculator(), &ok).is_ok());
    }

    #[test]
    fn kind_mismatch_fails_validation() {
        let s = sig(SignatureInput::named("Calculator").kind(Kind::Function));
        assert!(validate_target(&calculator(), &s).is_err());
        let module = sig(SignatureInput::named("calc").kind(Kind::Module));
        let namespace = Value::Object {
            prototype_chain: Vec::new(),
            entries: BTreeMap::new(),
        };
        assert!(validate_target(&namespace, &module).is_ok());
    }

    #[test]
    fn instance_of_checks_prototype_chain() {
        let instance = Value::Object {
            prototype_chain: vec!["Calculator".into()],
            entries: BTreeMap::new(),
        };
        let s = sig(SignatureInput::named("calc").kind(Kind::Object).instance_of("Calculator"));
        assert!(validate_target(&instance, &s).is_ok());
        let other = sig(SignatureInput::named("calc").instance_of("Parser"));
        assert!(validate_target(&instance, &other).is_err());
    }

    #[test]
    fn resolution_prefers_explicit_access_then_default_then_named() {
        let mut exports = ModuleExports::default();
        exports.named.insert("Parser".into(), Value::Function { name: "Parser".into(), params: Vec::new() });
        exports.named.insert("Calculator".into(), calculator());

        let s = sig(SignatureInput::named("Calculator").kind(Kind::Class));
        let (value, access) = resolve_target_from_module(&exports, &s, None).unwrap();
        assert_eq!(value, calculator());
        assert_eq!(access, Access::named("Calculator"));

        exports.default = Some(calculator());
        let (_, access) = resolve_target_from_module(&exports, &s, None).unwrap();
        assert_eq!(access, Access::default_export());

        let preferred = Access::named("Calculator");
        let (_, access) = resolve_target_from_module(&exports, &s, Some(&preferred)).unwrap();
        assert_eq!(access, preferred);
    }

    #[test]
    fn stale_preferred_access_falls_back() {
        let mut exports = ModuleExports::default();
        exports.named.insert("Calculator".into(), calculator());
        let s = sig(SignatureInput::named("Calculator").kind(Kind::Class));
        let stale = Access::named("Gone");
        let (_, access) = resolve_target_from_module(&exports, &s, Some(&stale)).unwrap();
        assert_eq!(access, Access::named("Calculator"));
    }

    #[test]
    fn module_signature_resolves_to_namespace() {
        let mut exports = ModuleExports::default();
        exports.named.insert("add".into(), Value::Function { name: "add".into(), params: Vec::new() });
        let s = sig(SignatureInput::named("math").kind(Kind::Module).methods(["add"]));
        let (value, access) = resolve_target_from_module(&exports, &s, None).unwrap();
        assert_eq!(access, Access::module());
        assert!(validate_target(&value, &s).is_ok());
    }

    #[test]
    fn preferred_access_must_carry_the_name() {
        let mut exports = ModuleExports::default();
        let helper = Value::Class {
            name: "Helper".into(),
            extends: Vec::new(),
            implements: Vec::new(),
            methods: vec!["add".into(), "subtract".into()],
            static_methods: Vec::new(),
            properties: Vec::new(),
        };
        exports.named.insert("Helper".into(), helper.clone());
        let s = sig(SignatureInput::named("Calculator").kind(Kind::Class).methods(["add"]));
        assert!(resolve_target_from_module(&exports, &s, Some(&Access::named("Helper"))).is_none());
        assert!(resolve_target_from_module(&exports, &s, Some(&Access::module())).is_none());

        let problems =
            validate_resolution(&helper, &Access::named("Helper"), &s, "Calculator").unwrap_err();
        assert_eq!(problems, vec!["name `Helper` does not match `Calculator`"]);
        assert!(validate_target(&helper, &s).is_ok());
    }

    #[test]
    fn names_fit_by_key_value_or_module() {
        let s = sig(SignatureInput::named("Calculator"));
        let calc = calculator();
        assert!(name_fits(&calc, &Access::named("Calc"), &s, Some("index")));
        assert!(name_fits(&calc, &Access::default_export(), &s, Some("index")));
        let anonymous = Value::Function { name: String::new(), params: Vec::new() };
        assert!(name_fits(&anonymous, &Access::default_export(), &s, Some("calculator")));
        assert!(!name_fits(&anonymous, &Access::default_export(), &s, Some("index")));
        let namespace = Value::Object { prototype_chain: Vec::new(), entries: BTreeMap::new() };
        assert!(name_fits(&namespace, &Access::module(), &s, Some("Calculator")));
        assert!(!name_fits(&namespace, &Access::module(), &s, Some("math")));
        assert!(name_fits(&namespace, &Access::module(), &sig(SignatureInput::default()), Some("math")));
    }

    #[test]
    fn nothing_matching_resolves_to_none() {
        let exports = ModuleExports::default();
        let s = sig(SignatureInput::named("Calculator").kind(Kind::Class));
        assert!(resolve_target_from_module(&exports, &s, None).is_none());
    }

    #[test]
    fn metadata_selection_uses_exports_then_names_then_default() {
        let plugin = JavaScriptPlugin::new();
        let meta = plugin
            .parse_source(
                "export class Parser {}\nexport class Calculator {}\nexport default function main() {}\n",
                Path::new("src/index.js"),
            )
            .unwrap();
        let by_name = sig(SignatureInput::named("Calculator"));
        assert_eq!(select_export_from_metadata(&meta, &by_name), Some(Access::named("Calculator")));
        let explicit = sig(SignatureInput::named("Anything").exports("Parser"));
        assert_eq!(select_export_from_metadata(&meta, &explicit), Some(Access::named("Parser")));
        let unknown = sig(SignatureInput::named("Nope"));
        assert_eq!(select_export_from_metadata(&meta, &unknown), Some(Access::default_export()));
    }

    #[test]
    fn descriptors_plan_their_access() {
        let mut d = CandidateDescriptor {
            name: "Calc".into(),
            qualified_name: "Calc".into(),
            kind: Kind::Class,
            export: Some(ExportKind::Named),
            export_name: Some("Calculator".into()),
            methods: Vec::new(),
            properties: Vec::new(),
            extends: None,
            module_level: false,
        };
        assert_eq!(plan_access(&d), Some(Access::named("Calculator")));
        d.export = Some(ExportKind::Default);
        assert_eq!(plan_access(&d), Some(Access::default_export()));
        d.export = None;
        assert_eq!(plan_access(&d), None);
        d.module_level = true;
        assert_eq!(plan_access(&d), Some(Access::module()));
    }
}
