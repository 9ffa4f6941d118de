//! Python

use async_trait::async_trait;
use std::fs;
use std::path::Path;

use super::{InstallContext, LanguagePlugin};
use crate::error::Result;
use crate::types::{ExecOutput, ExecutionOptions};

/// Python plugin
pub struct PythonPlugin;

// Slim images ship either python3 or python on PATH, never reliably both
fn interpreter_script(file: &str) -> String {
    format!(
        "if command -v python3 >/dev/null 2>&1; then exec python3 -u {file}; else exec python -u {file}; fi"
    )
}

#[async_trait]
impl LanguagePlugin for PythonPlugin {
    fn name(&self) -> &str {
        "python"
    }

    fn default_image(&self) -> &str {
        "python:3.9-slim"
    }

    fn inline_filename(&self) -> &str {
        "code.py"
    }

    fn materialize(&self, options: &ExecutionOptions, dir: &Path) -> Result<()> {
        if let Some(code) = &options.code {
            fs::write(dir.join(self.inline_filename()), code)?;
        }
        if !options.dependencies.is_empty() {
            let mut requirements = options.dependencies.join("\n");
            requirements.push('\n');
            fs::write(dir.join("requirements.txt"), requirements)?;
        }
        Ok(())
    }

    fn inline_command(&self, _deps_installed: bool) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            interpreter_script(self.inline_filename()),
        ]
    }

    fn run_app_command(&self, entry_file: &str, _deps_installed: bool) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            interpreter_script(entry_file),
        ]
    }

    async fn install_dependencies(
        &self,
        ctx: &InstallContext<'_>,
    ) -> Result<Option<ExecOutput>> {
        let output = ctx
            .exec(vec![
                "pip".to_string(),
                "install".to_string(),
                "-r".to_string(),
                "requirements.txt".to_string(),
            ])
            .await?;
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_materialize_requirements_only_with_deps() {
        let dir = tempdir().unwrap();
        let opts = ExecutionOptions::new("python", "print('hi')");
        PythonPlugin.materialize(&opts, dir.path()).unwrap();
        assert!(dir.path().join("code.py").is_file());
        assert!(!dir.path().join("requirements.txt").exists());

        let opts = opts.with_dependencies(["requests", "flask==3.0"]);
        PythonPlugin.materialize(&opts, dir.path()).unwrap();
        let requirements = fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        assert_eq!(requirements, "requests\nflask==3.0\n");
    }

    #[test]
    fn test_command_locates_interpreter() {
        let cmd = PythonPlugin.inline_command(true);
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[1], "-c");
        assert!(cmd[2].contains("python3 -u code.py"));
        assert!(cmd[2].contains("python -u code.py"));
    }
}
