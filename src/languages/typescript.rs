//! Typed ECMAScript (ts-node on Node.js)

use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::Path;

use super::javascript::{npm_install, write_manifest};
use super::{InstallContext, LanguagePlugin};
use crate::error::Result;
use crate::types::{ExecOutput, ExecutionOptions};

/// ts-node plugin sharing the Node.js image
pub struct TypeScriptPlugin;

#[async_trait]
impl LanguagePlugin for TypeScriptPlugin {
    fn name(&self) -> &str {
        "typescript"
    }

    fn default_image(&self) -> &str {
        "node:18-alpine"
    }

    fn inline_filename(&self) -> &str {
        "code.ts"
    }

    fn materialize(&self, options: &ExecutionOptions, dir: &Path) -> Result<()> {
        if let Some(code) = &options.code {
            fs::write(dir.join(self.inline_filename()), code)?;
        }
        // The launcher itself comes from the manifest so npm install brings it in
        write_manifest(
            dir,
            &options.dependencies,
            &[("typescript", "^5"), ("ts-node", "^10")],
        )?;
        let tsconfig = json!({
            "compilerOptions": {
                "target": "ES2020",
                "module": "commonjs",
                "esModuleInterop": true,
                "strict": false,
                "skipLibCheck": true,
            }
        });
        fs::write(
            dir.join("tsconfig.json"),
            serde_json::to_string_pretty(&tsconfig)?,
        )?;
        Ok(())
    }

    fn inline_command(&self, deps_installed: bool) -> Vec<String> {
        // Without an install, let npx fetch the launcher on demand
        let mut cmd = vec!["npx".to_string()];
        if !deps_installed {
            cmd.push("--yes".to_string());
        }
        cmd.push("ts-node".to_string());
        cmd.push(self.inline_filename().to_string());
        cmd
    }

    fn run_app_command(&self, entry_file: &str, deps_installed: bool) -> Vec<String> {
        let mut cmd = vec!["npx".to_string()];
        if !deps_installed {
            cmd.push("--yes".to_string());
        }
        cmd.push("ts-node".to_string());
        cmd.push(entry_file.to_string());
        cmd
    }

    async fn install_dependencies(
        &self,
        ctx: &InstallContext<'_>,
    ) -> Result<Option<ExecOutput>> {
        npm_install(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_materialize_includes_launcher_and_tsconfig() {
        let dir = tempdir().unwrap();
        let opts = ExecutionOptions::new("typescript", "const x: number = 1;")
            .with_dependencies(["zod"]);

        TypeScriptPlugin.materialize(&opts, dir.path()).unwrap();

        assert!(dir.path().join("code.ts").is_file());
        assert!(dir.path().join("tsconfig.json").is_file());

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("package.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["dependencies"]["zod"], "*");
        assert_eq!(manifest["dependencies"]["ts-node"], "^10");
        assert_eq!(manifest["dependencies"]["typescript"], "^5");
    }

    #[test]
    fn test_inline_command_falls_back_without_install() {
        let plugin = TypeScriptPlugin;
        assert_eq!(
            plugin.inline_command(true),
            vec!["npx", "ts-node", "code.ts"]
        );
        assert_eq!(
            plugin.inline_command(false),
            vec!["npx", "--yes", "ts-node", "code.ts"]
        );
    }
}
