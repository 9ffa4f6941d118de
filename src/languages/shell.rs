//! POSIX shell (Alpine)

use async_trait::async_trait;
use std::fs;
use std::path::Path;

use super::{InstallContext, LanguagePlugin};
use crate::error::Result;
use crate::types::{ExecOutput, ExecutionOptions};

/// Shell plugin; dependencies are Alpine package names
pub struct ShellPlugin;

#[async_trait]
impl LanguagePlugin for ShellPlugin {
    fn name(&self) -> &str {
        "shell"
    }

    fn default_image(&self) -> &str {
        "alpine:latest"
    }

    fn inline_filename(&self) -> &str {
        "code.sh"
    }

    fn materialize(&self, options: &ExecutionOptions, dir: &Path) -> Result<()> {
        if let Some(code) = &options.code {
            let path = dir.join(self.inline_filename());
            fs::write(&path, code)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(())
    }

    fn inline_command(&self, _deps_installed: bool) -> Vec<String> {
        vec!["sh".to_string(), self.inline_filename().to_string()]
    }

    fn run_app_command(&self, entry_file: &str, _deps_installed: bool) -> Vec<String> {
        vec!["sh".to_string(), entry_file.to_string()]
    }

    async fn install_dependencies(
        &self,
        ctx: &InstallContext<'_>,
    ) -> Result<Option<ExecOutput>> {
        // Index refresh first; apk add fails on a stale or absent index
        let update = ctx
            .exec(vec!["apk".to_string(), "update".to_string()])
            .await?;
        if !update.success() {
            return Ok(Some(update));
        }

        let mut cmd = vec![
            "apk".to_string(),
            "add".to_string(),
            "--no-cache".to_string(),
        ];
        cmd.extend(ctx.dependencies.iter().cloned());
        let add = ctx.exec(cmd).await?;

        Ok(Some(ExecOutput {
            stdout: format!("{}{}", update.stdout, add.stdout),
            stderr: format!("{}{}", update.stderr, add.stderr),
            exit_code: add.exit_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_materialize_marks_executable() {
        let dir = tempdir().unwrap();
        let opts = ExecutionOptions::new("shell", "echo hello");
        ShellPlugin.materialize(&opts, dir.path()).unwrap();

        let path = dir.path().join("code.sh");
        assert_eq!(fs::read_to_string(&path).unwrap(), "echo hello");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o755, 0o755);
        }
    }

    #[test]
    fn test_commands() {
        let plugin = ShellPlugin;
        assert_eq!(plugin.inline_command(false), vec!["sh", "code.sh"]);
        assert_eq!(plugin.run_app_command("boot.sh", true), vec!["sh", "boot.sh"]);
    }
}
