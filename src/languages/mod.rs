//! Language plugins and the process-wide registry
//!
//! A language plugin is a capability record: it knows its default image, how
//! to materialize files for a run, how to build the inline and run-app
//! commands, and optionally how to install dependencies inside the container.

mod javascript;
mod python;
mod shell;
mod typescript;

pub use javascript::JavaScriptPlugin;
pub use python::PythonPlugin;
pub use shell::ShellPlugin;
pub use typescript::TypeScriptPlugin;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::container::ContainerManager;
use crate::error::Result;
use crate::types::{ExecOutput, ExecutionOptions, OutputSink};

/// Everything a dependency installer needs to run inside the container
pub struct InstallContext<'a> {
    /// Container manager for exec access
    pub containers: &'a ContainerManager,
    /// Target container
    pub container_id: &'a str,
    /// Dependency tokens as supplied by the caller
    pub dependencies: &'a [String],
    /// Install working directory: `/workspace` for inline runs, the app cwd
    /// in run-app mode
    pub working_dir: &'a str,
    /// Live sink for install stdout
    pub stdout_sink: Option<&'a Arc<dyn OutputSink>>,
    /// Live sink for install stderr
    pub stderr_sink: Option<&'a Arc<dyn OutputSink>>,
}

impl<'a> InstallContext<'a> {
    /// Run a command in the install working directory, forwarding chunks to
    /// the install sinks
    pub async fn exec(&self, cmd: Vec<String>) -> Result<ExecOutput> {
        self.containers
            .exec_capture(
                self.container_id,
                cmd,
                Some(self.working_dir),
                self.stdout_sink,
                self.stderr_sink,
            )
            .await
    }
}

/// A language known to the orchestrator
#[async_trait]
pub trait LanguagePlugin: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// Container image used when the session does not override it
    fn default_image(&self) -> &str;

    /// In-workspace filename for inline snippets
    fn inline_filename(&self) -> &str;

    /// Write the snippet and any manifest files into the host workspace
    fn materialize(&self, options: &ExecutionOptions, dir: &Path) -> Result<()>;

    /// Command for an inline snippet run (cwd `/workspace`)
    fn inline_command(&self, deps_installed: bool) -> Vec<String>;

    /// Command for running an existing app entry file
    fn run_app_command(&self, entry_file: &str, deps_installed: bool) -> Vec<String>;

    /// Install dependencies inside the container
    ///
    /// `None` means the language has no install routine; the engine treats
    /// that as success with empty streams.
    async fn install_dependencies(
        &self,
        ctx: &InstallContext<'_>,
    ) -> Result<Option<ExecOutput>> {
        let _ = ctx;
        Ok(None)
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn LanguagePlugin>>>> = Lazy::new(|| {
    let mut plugins: HashMap<String, Arc<dyn LanguagePlugin>> = HashMap::new();
    for plugin in [
        Arc::new(JavaScriptPlugin) as Arc<dyn LanguagePlugin>,
        Arc::new(TypeScriptPlugin) as Arc<dyn LanguagePlugin>,
        Arc::new(PythonPlugin) as Arc<dyn LanguagePlugin>,
        Arc::new(ShellPlugin) as Arc<dyn LanguagePlugin>,
    ] {
        plugins.insert(plugin.name().to_string(), plugin);
    }
    RwLock::new(plugins)
});

/// Look up a plugin by language name
pub fn get(name: &str) -> Option<Arc<dyn LanguagePlugin>> {
    REGISTRY
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(name)
        .cloned()
}

/// Register a plugin, replacing any existing one with the same name
pub fn register(plugin: Arc<dyn LanguagePlugin>) {
    REGISTRY
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(plugin.name().to_string(), plugin);
}

/// All registered language names
pub fn names() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        for name in ["javascript", "typescript", "python", "shell"] {
            assert!(get(name).is_some(), "missing builtin {}", name);
        }
        assert!(get("cobol").is_none());
    }

    #[test]
    fn test_names_sorted() {
        let names = names();
        assert!(names.len() >= 4);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
