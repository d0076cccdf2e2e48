// Integration test utilities and fixture trees for Scout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use scout_core::config::ScoutConfig;
use scout_core::error::LoadError;
use scout_core::loader::{ModuleLoader, PluginLoader};
use scout_core::registry::PluginRegistry;
use scout_core::DiscoveryEngine;
use scout_lang::{LanguagePlugin, ModuleExports};

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. `RUST_LOG` overrides the
/// default `warn` filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A temporary project tree.
#[derive(Debug)]
pub struct TestTree {
    pub dir: tempfile::TempDir,
}

impl TestTree {
    pub fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `text` at `rel`, creating parent directories.
    pub fn write(&self, rel: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dirs");
        }
        std::fs::write(&path, text).expect("write fixture file");
        path
    }

    /// Rewrite a file so its fingerprint differs even within one mtime tick.
    pub fn rewrite(&self, rel: &str, text: &str) -> PathBuf {
        std::thread::sleep(Duration::from_millis(5));
        self.write(rel, text)
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.dir.path().join(rel)).expect("remove fixture file");
    }

    /// `src/Calculator.js` plus a same-named copy under `test/`.
    pub fn calculator() -> Self {
        let tree = Self::empty();
        tree.write("src/Calculator.js", CALCULATOR_JS);
        tree.write("test/Calculator.js", CALCULATOR_JS);
        tree.write(
            "test/Calculator.test.js",
            "const { Calculator } = require('../src/Calculator');\n\
             describe('Calculator', () => {\n  it('adds', () => {\n    expect(new Calculator().add(1, 2)).toBe(3);\n  });\n});\n",
        );
        tree
    }

    /// One file per built-in language, each exporting a `Calculator`.
    pub fn multi_lang() -> Self {
        let tree = Self::empty();
        tree.write("web/Calculator.ts", CALCULATOR_TS);
        tree.write("py/calculator.py", CALCULATOR_PY);
        tree.write("rust/src/calculator.rs", CALCULATOR_RS);
        tree.write("go/calc/calculator.go", CALCULATOR_GO);
        tree
    }

    pub fn engine(&self) -> DiscoveryEngine {
        self.engine_with(ScoutConfig::default())
    }

    pub fn engine_with(&self, config: ScoutConfig) -> DiscoveryEngine {
        DiscoveryEngine::new(self.path(), config).expect("build engine")
    }

    /// Engine whose loads go through `loader`.
    pub fn engine_with_loader(
        &self,
        config: ScoutConfig,
        loader: Arc<dyn ModuleLoader>,
    ) -> DiscoveryEngine {
        let registry = Arc::new(PluginRegistry::with_builtins(&config));
        DiscoveryEngine::with_loader(self.path(), config, registry, loader).expect("build engine")
    }
}

pub const CALCULATOR_JS: &str = "\
export class Calculator {
  constructor() {
    this.total = 0;
  }

  add(a, b) {
    return a + b;
  }

  subtract(a, b) {
    return a - b;
  }
}
";

pub const CALCULATOR_TS: &str = "\
export interface Arithmetic {
  add(a: number, b: number): number;
}

export class Calculator implements Arithmetic {
  total: number = 0;

  add(a: number, b: number): number {
    return a + b;
  }

  subtract(a: number, b: number): number {
    return a - b;
  }
}
";

pub const CALCULATOR_PY: &str = "\
class Calculator:
    def __init__(self):
        self.total = 0

    def add(self, a, b):
        return a + b

    def subtract(self, a, b):
        return a - b
";

pub const CALCULATOR_RS: &str = "\
pub struct Calculator {
    pub total: i64,
}

impl Calculator {
    pub fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    pub fn subtract(&self, a: i64, b: i64) -> i64 {
        a - b
    }
}
";

pub const CALCULATOR_GO: &str = "\
package calc

type Calculator struct {
\tTotal int
}

func (c *Calculator) Add(a, b int) int { return a + b }

func (c *Calculator) Subtract(a, b int) int { return a - b }
";

/// Loader that counts and records every load, then reflects through the plugin.
#[derive(Debug, Default)]
pub struct CountingLoader {
    loads: AtomicUsize,
    paths: Mutex<Vec<PathBuf>>,
    delay: Option<Duration>,
}

impl CountingLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Each load sleeps for `delay` first, widening race windows.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().expect("loader paths poisoned").clone()
    }
}

#[async_trait::async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl ModuleLoader for CountingLoader {
    fn name(&self) -> &str {
        "counting"
    }

    async fn load(
        &self,
        path: &Path,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Result<ModuleExports, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.paths
            .lock()
            .expect("loader paths poisoned")
            .push(path.to_path_buf());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        tracing::debug!(path = %path.display(), "Counting loader load");
        PluginLoader.load(path, plugin).await
    }
}
