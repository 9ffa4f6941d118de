//! Plain ECMAScript (Node.js)

use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::Path;

use super::{InstallContext, LanguagePlugin};
use crate::error::Result;
use crate::types::{ExecOutput, ExecutionOptions};

/// Node.js plugin
pub struct JavaScriptPlugin;

/// Split a dependency token into a package name and version requirement
///
/// `express` maps to `*`; `express@4.18.2` pins the version. The split point
/// is the last `@` past position zero so scoped packages keep their prefix.
pub(crate) fn dependency_spec(token: &str) -> (&str, &str) {
    if token.is_empty() {
        return (token, "*");
    }
    match token[1..].rfind('@') {
        Some(idx) => (&token[..idx + 1], &token[idx + 2..]),
        None => (token, "*"),
    }
}

/// Write a minimal package.json enumerating the declared dependencies
pub(crate) fn write_manifest(
    dir: &Path,
    dependencies: &[String],
    extra: &[(&str, &str)],
) -> Result<()> {
    let mut deps = serde_json::Map::new();
    for token in dependencies {
        let (name, version) = dependency_spec(token);
        deps.insert(name.to_string(), json!(version));
    }
    for (name, version) in extra {
        deps.entry(name.to_string()).or_insert_with(|| json!(version));
    }
    let manifest = json!({
        "name": "runbox-workspace",
        "version": "1.0.0",
        "private": true,
        "dependencies": deps,
    });
    fs::write(
        dir.join("package.json"),
        serde_json::to_string_pretty(&manifest)?,
    )?;
    Ok(())
}

/// Run `npm install` against the materialized manifest
pub(crate) async fn npm_install(ctx: &InstallContext<'_>) -> Result<Option<ExecOutput>> {
    let output = ctx
        .exec(vec!["npm".to_string(), "install".to_string()])
        .await?;
    Ok(Some(output))
}

#[async_trait]
impl LanguagePlugin for JavaScriptPlugin {
    fn name(&self) -> &str {
        "javascript"
    }

    fn default_image(&self) -> &str {
        "node:18-alpine"
    }

    fn inline_filename(&self) -> &str {
        "code.js"
    }

    fn materialize(&self, options: &ExecutionOptions, dir: &Path) -> Result<()> {
        if let Some(code) = &options.code {
            fs::write(dir.join(self.inline_filename()), code)?;
        }
        write_manifest(dir, &options.dependencies, &[])
    }

    fn inline_command(&self, _deps_installed: bool) -> Vec<String> {
        vec!["node".to_string(), self.inline_filename().to_string()]
    }

    fn run_app_command(&self, entry_file: &str, _deps_installed: bool) -> Vec<String> {
        vec!["node".to_string(), entry_file.to_string()]
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
    fn test_dependency_spec() {
        assert_eq!(dependency_spec("express"), ("express", "*"));
        assert_eq!(dependency_spec("express@4.18.2"), ("express", "4.18.2"));
        assert_eq!(dependency_spec("@types/node"), ("@types/node", "*"));
        assert_eq!(dependency_spec("@scope/pkg@1.2.0"), ("@scope/pkg", "1.2.0"));
    }

    #[test]
    fn test_materialize_writes_snippet_and_manifest() {
        let dir = tempdir().unwrap();
        let opts = ExecutionOptions::new("javascript", "console.log('hi')")
            .with_dependencies(["express@4.18.2", "lodash"]);

        JavaScriptPlugin.materialize(&opts, dir.path()).unwrap();

        let code = fs::read_to_string(dir.path().join("code.js")).unwrap();
        assert_eq!(code, "console.log('hi')");

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("package.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["dependencies"]["express"], "4.18.2");
        assert_eq!(manifest["dependencies"]["lodash"], "*");
    }

    #[test]
    fn test_commands() {
        let plugin = JavaScriptPlugin;
        assert_eq!(plugin.inline_command(true), vec!["node", "code.js"]);
        assert_eq!(
            plugin.run_app_command("server.js", true),
            vec!["node", "server.js"]
        );
    }
}
