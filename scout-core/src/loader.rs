//! Module loading seam.
//!
//! Resolution never evaluates candidate code inside the engine. A
//! [`ModuleLoader`] produces a module's export surface, either by asking the
//! owning plugin to reflect it from static metadata or by running an
//! external introspection command that prints an export descriptor.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use scout_lang::{LanguagePlugin, ModuleExports};
use tracing::{debug, warn};

use crate::config::LoaderConfig;
use crate::error::LoadError;

/// Produces the export surface of one module file.
#[async_trait::async_trait]
pub trait ModuleLoader: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn load(
        &self,
        path: &Path,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Result<ModuleExports, LoadError>;
}

/// Build the loader selected in config.
pub fn loader_from_config(config: &LoaderConfig) -> Arc<dyn ModuleLoader> {
    match config {
        LoaderConfig::Plugin => Arc::new(PluginLoader),
        LoaderConfig::Command {
            program,
            args,
            timeout_ms,
        } => Arc::new(CommandLoader::new(
            program.clone(),
            args.clone(),
            Duration::from_millis(*timeout_ms),
        )),
    }
}

/// Reflects exports through [`LanguagePlugin::load_module`] on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginLoader;

#[async_trait::async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl ModuleLoader for PluginLoader {
    fn name(&self) -> &str {
        "plugin"
    }

    async fn load(
        &self,
        path: &Path,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Result<ModuleExports, LoadError> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || plugin.load_module(&owned))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))?
            .map_err(LoadError::Plugin)
    }
}

/// Runs `program [args..] <path>` and parses its stdout as an export
/// descriptor (`{"default": ..., "named": {...}}`).
///
/// The child is killed if it outlives the timeout or the load is dropped.
#[derive(Debug, Clone)]
pub struct CommandLoader {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandLoader {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    fn timeout_error(&self, path: &Path) -> LoadError {
        LoadError::Timeout {
            path: path.to_path_buf(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[async_trait::async_trait]
impl ModuleLoader for CommandLoader {
    fn name(&self) -> &str {
        &self.program
    }

    async fn load(
        &self,
        path: &Path,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Result<ModuleExports, LoadError> {
        debug!(program = %self.program, path = %path.display(), language = plugin.id(), "Running loader command");

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .env("SCOUT_LANGUAGE", plugin.id())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| self.timeout_error(path))?
            .map_err(|e| LoadError::Command {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(program = %self.program, status = %output.status, "Loader command failed");
            return Err(LoadError::Command {
                program: self.program.clone(),
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        parse_descriptor(&output.stdout)
    }
}

/// Parse loader output. Anything but a JSON object is rejected.
pub fn parse_descriptor(stdout: &[u8]) -> Result<ModuleExports, LoadError> {
    let json: serde_json::Value =
        serde_json::from_slice(stdout).map_err(|e| LoadError::Descriptor(e.to_string()))?;
    if !json.is_object() {
        return Err(LoadError::Descriptor(format!(
            "expected an object, got {}",
            json_type(&json)
        )));
    }
    Ok(ModuleExports::from_descriptor(&json))
}

fn json_type(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use scout_lang::languages::javascript::JavaScriptPlugin;

    use super::*;

    #[tokio::test]
    async fn plugin_loader_reflects_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Calculator.js");
        std::fs::write(&path, "export class Calculator { add(a, b) { return a + b; } }\n").unwrap();

        let exports = PluginLoader
            .load(&path, Arc::new(JavaScriptPlugin::new()))
            .await
            .unwrap();
        let calc = exports.named.get("Calculator").unwrap();
        assert!(calc.has_method("add"));
    }

    #[tokio::test]
    async fn plugin_loader_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.js");
        std::fs::write(&path, "export class {{{").unwrap();

        let err = PluginLoader
            .load(&path, Arc::new(JavaScriptPlugin::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Plugin(_)), "got {err:?}");
    }

    #[test]
    fn descriptor_must_be_an_object() {
        let err = parse_descriptor(b"[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
        assert!(matches!(parse_descriptor(b"not json"), Err(LoadError::Descriptor(_))));

        let exports = parse_descriptor(
            br#"{"named": {"Calculator": {"__type": "Class", "name": "Calculator", "methods": ["add"]}}}"#,
        )
        .unwrap();
        assert!(exports.named.contains_key("Calculator"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_loader_runs_program_with_path() {
        let loader = CommandLoader::new(
            "sh".into(),
            vec!["-c".into(), r#"echo '{"named": {}}'; test -n "$0""#.into()],
            Duration::from_secs(5),
        );
        let exports = loader
            .load(Path::new("/tmp/whatever.js"), Arc::new(JavaScriptPlugin::new()))
            .await
            .unwrap();
        assert!(exports.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_loader_times_out() {
        let loader = CommandLoader::new(
            "sh".into(),
            vec!["-c".into(), "sleep 5".into()],
            Duration::from_millis(50),
        );
        let err = loader
            .load(Path::new("a.js"), Arc::new(JavaScriptPlugin::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Timeout { timeout_ms: 50, .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_loader_reports_failure_status() {
        let loader = CommandLoader::new(
            "sh".into(),
            vec!["-c".into(), "echo boom >&2; exit 3".into()],
            Duration::from_secs(5),
        );
        let err = loader
            .load(Path::new("a.js"), Arc::new(JavaScriptPlugin::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "got {err}");
    }
}
