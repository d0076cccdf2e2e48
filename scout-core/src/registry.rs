use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use scout_lang::LanguagePlugin;
use scout_lang::languages::builtin_plugins;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::ScoutConfig;
use crate::error::RegistryError;

/// Origin recorded for plugins compiled into Scout.
pub const BUILTIN_ORIGIN: &str = "<builtin>";

#[derive(Debug, Clone)]
struct Registered {
    plugin: Arc<dyn LanguagePlugin>,
    origin: PathBuf,
}

#[derive(Debug, Default)]
struct Inner {
    plugins: HashMap<String, Registered>,
    extension_map: HashMap<String, String>,
}

/// Registry of enabled language plugins.
///
/// Constructed once by the embedding application and shared by `Arc`;
/// registration is interior so plugins can be added after construction.
#[derive(Debug)]
pub struct PluginRegistry {
    inner: RwLock<Inner>,
    disabled: BTreeSet<String>,
    parse_cache_size: usize,
}

/// Counts for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub plugins: usize,
    pub extensions: usize,
    pub builtin: usize,
    pub external: usize,
    pub disabled: usize,
}

impl PluginRegistry {
    /// An empty registry honoring `disabled`.
    pub fn new<I, S>(disabled: I, parse_cache_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: RwLock::new(Inner::default()),
            disabled: disabled.into_iter().map(Into::into).collect(),
            parse_cache_size,
        }
    }

    /// A registry with every built-in plugin that is not disabled.
    pub fn with_builtins(config: &ScoutConfig) -> Self {
        let registry = Self::new(
            config.discovery.plugins.disabled.iter().cloned(),
            config.cache.parse_cache_size,
        );
        registry.register_builtins();
        registry
    }

    fn register_builtins(&self) {
        for plugin in builtin_plugins(self.parse_cache_size) {
            let name = plugin.id();
            if let Err(e) = self.register_plugin(name, plugin, BUILTIN_ORIGIN) {
                error!(plugin = name, error = %e, "Built-in plugin rejected");
            }
        }
    }

    /// Validate and register a plugin under `name`.
    ///
    /// Disabled names are skipped without error. Re-registering a name
    /// replaces the earlier plugin.
    pub fn register_plugin(
        &self,
        name: &str,
        plugin: Arc<dyn LanguagePlugin>,
        origin: impl Into<PathBuf>,
    ) -> Result<(), RegistryError> {
        let origin = origin.into();
        if self.is_plugin_disabled(name) {
            info!(plugin = name, "Plugin disabled by configuration, not registering");
            return Ok(());
        }
        validate_plugin(name, plugin.as_ref())?;

        let mut inner = self.inner.write().expect("plugin registry lock poisoned");
        for ext in plugin.extensions() {
            let ext = ext.to_ascii_lowercase();
            if let Some(existing) = inner.extension_map.get(&ext) {
                if existing != name {
                    return Err(RegistryError::ExtensionConflict {
                        extension: ext,
                        existing: existing.clone(),
                        name: name.to_string(),
                    });
                }
            }
        }

        inner.extension_map.retain(|_, owner| owner != name);
        for ext in plugin.extensions() {
            inner
                .extension_map
                .insert(ext.to_ascii_lowercase(), name.to_string());
        }
        debug!(plugin = name, origin = %origin.display(), "Registered plugin");
        inner
            .plugins
            .insert(name.to_string(), Registered { plugin, origin });
        Ok(())
    }

    pub fn is_plugin_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
    }

    /// The plugin that scans `path`, if any.
    pub fn for_file(&self, path: &Path) -> Option<Arc<dyn LanguagePlugin>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let inner = self.inner.read().expect("plugin registry lock poisoned");
        let name = inner.extension_map.get(&ext)?;
        let plugin = &inner.plugins.get(name)?.plugin;
        plugin.should_scan_file(path).then(|| Arc::clone(plugin))
    }

    /// Get a plugin by its identifier.
    pub fn get(&self, name: &str) -> Option<Arc<dyn LanguagePlugin>> {
        let inner = self.inner.read().expect("plugin registry lock poisoned");
        inner.plugins.get(name).map(|r| Arc::clone(&r.plugin))
    }

    /// Where a plugin was registered from.
    pub fn origin(&self, name: &str) -> Option<PathBuf> {
        let inner = self.inner.read().expect("plugin registry lock poisoned");
        inner.plugins.get(name).map(|r| r.origin.clone())
    }

    /// Registered plugin identifiers, sorted.
    pub fn plugin_names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("plugin registry lock poisoned");
        let mut names: Vec<String> = inner.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every parsed file held by any plugin.
    pub fn clear_parse_caches(&self) {
        let inner = self.inner.read().expect("plugin registry lock poisoned");
        for registered in inner.plugins.values() {
            registered.plugin.parse_cache().clear();
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().expect("plugin registry lock poisoned");
        let builtin = inner
            .plugins
            .values()
            .filter(|r| r.origin.as_os_str() == BUILTIN_ORIGIN)
            .count();
        RegistryStats {
            plugins: inner.plugins.len(),
            extensions: inner.extension_map.len(),
            builtin,
            external: inner.plugins.len() - builtin,
            disabled: self.disabled.len(),
        }
    }

    /// Forget every registration and rebuild the built-in set.
    pub fn reset_for_testing(&self) {
        {
            let mut inner = self.inner.write().expect("plugin registry lock poisoned");
            *inner = Inner::default();
        }
        self.register_builtins();
    }
}

fn validate_plugin(name: &str, plugin: &dyn LanguagePlugin) -> Result<(), RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidPlugin {
        name: name.to_string(),
        reason,
    };
    if name.trim().is_empty() {
        return Err(invalid("name must not be empty".into()));
    }
    if plugin.id() != name {
        return Err(invalid(format!("plugin id `{}` does not match", plugin.id())));
    }
    if plugin.extensions().is_empty() {
        return Err(invalid("no file extensions".into()));
    }
    for ext in plugin.extensions() {
        let well_formed = !ext.is_empty()
            && ext
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'));
        if !well_formed {
            return Err(invalid(format!("malformed extension `{ext}`")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_lang::languages::javascript::JavaScriptPlugin;
    use scout_lang::languages::python::PythonPlugin;

    fn registry() -> PluginRegistry {
        PluginRegistry::with_builtins(&ScoutConfig::default())
    }

    /// Delegates to the JavaScript plugin but reports a configurable id and
    /// extension set.
    #[derive(Debug)]
    struct Renamed {
        id: &'static str,
        extensions: &'static [&'static str],
        inner: JavaScriptPlugin,
    }

    impl LanguagePlugin for Renamed {
        fn id(&self) -> &'static str {
            self.id
        }
        fn extensions(&self) -> &'static [&'static str] {
            self.extensions
        }
        fn skip_patterns(&self) -> &[regex::Regex] {
            self.inner.skip_patterns()
        }
        fn tree_sitter_language(&self, path: &Path) -> tree_sitter::Language {
            self.inner.tree_sitter_language(path)
        }
        fn parse_cache(&self) -> &scout_lang::languages::ParseCache {
            self.inner.parse_cache()
        }
        fn extract_metadata(
            &self,
            tree: &tree_sitter::Tree,
            source: &str,
            path: &Path,
        ) -> scout_lang::Result<scout_lang::FileMetadata> {
            self.inner.extract_metadata(tree, source, path)
        }
        fn reflect_exports(&self, metadata: &scout_lang::FileMetadata) -> scout_lang::ModuleExports {
            self.inner.reflect_exports(metadata)
        }
        fn generate_test_content(
            &self,
            target: &scout_lang::ResolvedTarget,
            options: &scout_lang::TestOptions,
        ) -> String {
            self.inner.generate_test_content(target, options)
        }
    }

    fn renamed(id: &'static str, extensions: &'static [&'static str]) -> Arc<dyn LanguagePlugin> {
        Arc::new(Renamed {
            id,
            extensions,
            inner: JavaScriptPlugin::new(),
        })
    }

    #[test]
    fn builtins_cover_each_language() {
        let reg = registry();
        assert_eq!(
            reg.plugin_names(),
            vec!["go", "javascript", "python", "rust", "typescript"]
        );
        let stats = reg.stats();
        assert_eq!(stats.plugins, 5);
        assert_eq!(stats.builtin, 5);
        assert_eq!(stats.external, 0);
    }

    #[test]
    fn for_file_dispatches_on_extension_and_skip_patterns() {
        let reg = registry();
        assert_eq!(
            reg.for_file(Path::new("src/Calculator.js")).map(|p| p.id()),
            Some("javascript")
        );
        assert_eq!(reg.for_file(Path::new("pkg/calc.py")).map(|p| p.id()), Some("python"));
        assert_eq!(
            reg.for_file(Path::new("src/Calculator.JS")).map(|p| p.id()),
            Some("javascript")
        );
        assert!(reg.for_file(Path::new("dist/app.min.js")).is_none());
        assert!(reg.for_file(Path::new("README.md")).is_none());
        assert!(reg.for_file(Path::new("Makefile")).is_none());
    }

    #[test]
    fn disabled_plugins_are_not_registered() {
        let mut config = ScoutConfig::default();
        config.discovery.plugins.disabled = vec!["python".into()];
        let reg = PluginRegistry::with_builtins(&config);
        assert!(reg.is_plugin_disabled("python"));
        assert!(reg.get("python").is_none());
        assert!(reg.for_file(Path::new("calc.py")).is_none());
        assert_eq!(reg.stats().disabled, 1);

        reg.register_plugin("python", Arc::new(PythonPlugin::new()), "/plugins/py")
            .unwrap();
        assert!(reg.get("python").is_none());
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let reg = PluginRegistry::new(Vec::<String>::new(), 8);
        let err = reg
            .register_plugin("ecmascript", renamed("javascript", &["es"]), "/p")
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPlugin { .. }), "got {err:?}");
        assert!(reg.get("ecmascript").is_none());
    }

    #[test]
    fn malformed_or_missing_extensions_are_rejected() {
        let reg = PluginRegistry::new(Vec::<String>::new(), 8);
        assert!(reg.register_plugin("dotted", renamed("dotted", &[".js"]), "/p").is_err());
        assert!(reg.register_plugin("none", renamed("none", &[]), "/p").is_err());
        assert!(reg.register_plugin("", renamed("", &["x"]), "/p").is_err());
        assert_eq!(reg.stats().plugins, 0);
    }

    #[test]
    fn extension_conflicts_are_rejected_without_side_effects() {
        let reg = registry();
        let err = reg
            .register_plugin("flow", renamed("flow", &["flow", "js"]), "/plugins/flow")
            .unwrap_err();
        assert!(matches!(err, RegistryError::ExtensionConflict { .. }), "got {err:?}");
        assert!(reg.get("flow").is_none());
        assert!(reg.for_file(Path::new("a.flow")).is_none());
        assert_eq!(
            reg.for_file(Path::new("a.js")).map(|p| p.id()),
            Some("javascript")
        );
    }

    #[test]
    fn external_plugins_register_and_reset_removes_them() {
        let reg = registry();
        reg.register_plugin("flow", renamed("flow", &["flow"]), "/plugins/flow")
            .unwrap();
        assert_eq!(reg.for_file(Path::new("a.flow")).map(|p| p.id()), Some("flow"));
        assert_eq!(reg.origin("flow"), Some(PathBuf::from("/plugins/flow")));
        assert_eq!(reg.stats().external, 1);

        reg.reset_for_testing();
        assert!(reg.get("flow").is_none());
        assert_eq!(reg.stats().plugins, 5);
    }
}
