//! Install and build subprocesses.

use async_trait::async_trait;
use pagecast_core::{BuildDescriptor, ProjectKind};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::detect::{BUILD_SCRIPTS, detect, resolve_output};
use crate::{BuildError, BuildResult, StaticExportGuard};

/// Bytes of subprocess output kept in error messages.
const OUTPUT_TAIL: usize = 4096;

/// Builds a checked-out project into a publishable directory.
#[async_trait]
pub trait ProjectBuilder: Send + Sync {
    async fn build(&self, project_dir: &Path) -> BuildResult<BuildDescriptor>;
}

/// Runs `install` then the selected build script with an npm-compatible CLI.
#[derive(Debug, Clone)]
pub struct NpmBuilder {
    program: String,
    /// Leading arguments from the configured command, e.g. `corepack pnpm`.
    prefix_args: Vec<String>,
    timeout: Option<Duration>,
}

impl Default for NpmBuilder {
    fn default() -> Self {
        Self::new("npm")
    }
}

impl NpmBuilder {
    /// `command` is split on whitespace into the program and leading arguments.
    pub fn new(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "npm".to_string());
        Self {
            program,
            prefix_args: parts.collect(),
            timeout: None,
        }
    }

    /// Bound each subprocess step. Timed-out processes are killed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, project_dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .args(args)
            .current_dir(project_dir)
            .env("NEXT_TELEMETRY_DISABLED", "1")
            .env("CI", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path.replace('\\', "/"));
        }
        cmd
    }

    /// Run one step to completion, returning its combined output.
    async fn run_step(&self, project_dir: &Path, args: &[&str]) -> BuildResult<String> {
        let step = args.join(" ");
        info!(dir = %project_dir.display(), step = %step, "Running build step");

        let mut cmd = self.command(project_dir, args);
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    BuildError::BuildExecution(format!(
                        "{} timed out after {}s",
                        step,
                        limit.as_secs_f64()
                    ))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| {
            BuildError::BuildExecution(format!("failed to spawn {} {}: {}", self.program, step, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}\n{}", stdout, stderr);
        debug!(step = %step, output = %combined, "Build step output");

        if !output.status.success() {
            error!(step = %step, status = %output.status, "Build step failed");
            return Err(BuildError::BuildExecution(format!(
                "{} exited with {}: {}",
                step,
                output.status,
                tail(combined.trim(), OUTPUT_TAIL)
            )));
        }
        Ok(combined)
    }
}

#[async_trait]
impl ProjectBuilder for NpmBuilder {
    async fn build(&self, project_dir: &Path) -> BuildResult<BuildDescriptor> {
        let project = detect(project_dir).await?;
        let script = project.script.ok_or_else(|| {
            BuildError::BuildExecution(format!(
                "no build script: package.json declares none of {}",
                BUILD_SCRIPTS.join(", ")
            ))
        })?;
        info!(kind = ?project.kind, script, "Detected project");

        self.run_step(project_dir, &["install"]).await?;

        let guard = match project.kind {
            ProjectKind::FrameworkSsg => Some(StaticExportGuard::apply(project_dir)?),
            ProjectKind::Generic => None,
        };
        let built = self.run_step(project_dir, &["run", script]).await;
        let restored = guard.map(StaticExportGuard::restore).transpose();
        built?;
        restored?;

        let build_path = resolve_output(project_dir, project.kind).await?;
        info!(output = %build_path.display(), "Build complete");
        Ok(BuildDescriptor {
            build_path,
            project_kind: project.kind,
        })
    }
}

/// Last `max` bytes of `s`, cut on a character boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_splitting() {
        let b = NpmBuilder::new("corepack  pnpm");
        assert_eq!(b.program, "corepack");
        assert_eq!(b.prefix_args, vec!["pnpm"]);

        let b = NpmBuilder::new("   ");
        assert_eq!(b.program, "npm");
        assert!(b.prefix_args.is_empty());
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aéb", 2), "b");
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use crate::export::{EXPORT_CONFIG, PATCH_FILE};
        use std::path::PathBuf;
        use tempfile::TempDir;

        /// A project directory plus a shell script standing in for npm.
        /// Every invocation appends its arguments to `calls.log` in the project.
        struct Fixture {
            _root: TempDir,
            project: PathBuf,
            builder: NpmBuilder,
        }

        fn fixture(manifest: &str, run_body: &str) -> Fixture {
            let root = tempfile::tempdir().unwrap();
            let project = root.path().join("project");
            std::fs::create_dir(&project).unwrap();
            std::fs::write(project.join("package.json"), manifest).unwrap();

            let script = root.path().join("fake-npm.sh");
            std::fs::write(
                &script,
                format!(
                    "echo \"$@\" >> calls.log\ncase \"$1\" in\n  install) exit 0 ;;\n  run)\n{}\n  ;;\nesac\n",
                    run_body
                ),
            )
            .unwrap();

            let builder = NpmBuilder::new(&format!("sh {}", script.display()));
            Fixture {
                _root: root,
                project,
                builder,
            }
        }

        fn calls(project: &Path) -> String {
            std::fs::read_to_string(project.join("calls.log")).unwrap_or_default()
        }

        #[tokio::test]
        async fn test_generic_build() {
            let f = fixture(
                r#"{"scripts":{"build":"vite build"}}"#,
                "mkdir -p dist && echo '<h1>hi</h1>' > dist/index.html",
            );

            let descriptor = f.builder.build(&f.project).await.unwrap();
            assert_eq!(descriptor.project_kind, ProjectKind::Generic);
            assert!(descriptor.build_path.ends_with("dist"));
            assert!(descriptor.build_path.join("index.html").is_file());
            assert_eq!(calls(&f.project), "install\nrun build\n");
        }

        #[tokio::test]
        async fn test_falls_back_to_dev_script() {
            let f = fixture(r#"{"scripts":{"dev":"vite"}}"#, "mkdir -p dist");
            f.builder.build(&f.project).await.unwrap();
            assert_eq!(calls(&f.project), "install\nrun dev\n");
        }

        #[tokio::test]
        async fn test_no_build_script() {
            let f = fixture(r#"{"scripts":{"test":"jest"}}"#, "exit 0");
            let err = f.builder.build(&f.project).await.unwrap_err();
            assert!(matches!(err, BuildError::BuildExecution(msg) if msg.contains("no build script")));
            assert_eq!(calls(&f.project), "");
        }

        #[tokio::test]
        async fn test_framework_build_patches_and_restores() {
            let f = fixture(
                r#"{"scripts":{"build":"next build"}}"#,
                "cp next.config.js seen-config.js && mkdir -p out && echo ok > out/index.html",
            );
            let original = "export default { basePath: '/docs' }\n";
            std::fs::write(f.project.join("next.config.ts"), original).unwrap();

            let descriptor = f.builder.build(&f.project).await.unwrap();
            assert_eq!(descriptor.project_kind, ProjectKind::FrameworkSsg);
            assert!(descriptor.build_path.ends_with("out"));

            let seen = std::fs::read_to_string(f.project.join("seen-config.js")).unwrap();
            assert_eq!(seen, EXPORT_CONFIG);
            assert!(!f.project.join(PATCH_FILE).exists());
            assert_eq!(
                std::fs::read_to_string(f.project.join("next.config.ts")).unwrap(),
                original
            );
        }

        #[tokio::test]
        async fn test_config_restored_after_failed_build() {
            let f = fixture(
                r#"{"scripts":{"build":"next build"}}"#,
                "echo 'Type error: boom' >&2; exit 3",
            );
            let original = "module.exports = { reactStrictMode: true }\n";
            std::fs::write(f.project.join("next.config.js"), original).unwrap();

            let err = f.builder.build(&f.project).await.unwrap_err();
            assert!(matches!(&err, BuildError::BuildExecution(msg) if msg.contains("Type error: boom")));
            assert_eq!(
                std::fs::read_to_string(f.project.join("next.config.js")).unwrap(),
                original
            );
        }

        #[tokio::test]
        async fn test_missing_output() {
            let f = fixture(r#"{"scripts":{"build":"tsc"}}"#, "exit 0");
            let err = f.builder.build(&f.project).await.unwrap_err();
            assert!(matches!(err, BuildError::BuildOutputNotFound(p) if p.ends_with("dist")));
        }

        #[tokio::test]
        async fn test_missing_manifest() {
            let f = fixture("{}", "exit 0");
            std::fs::remove_file(f.project.join("package.json")).unwrap();
            let err = f.builder.build(&f.project).await.unwrap_err();
            assert!(matches!(err, BuildError::ManifestNotFound(_)));
        }

        #[tokio::test]
        async fn test_timeout_kills_step() {
            let f = fixture(r#"{"scripts":{"build":"slow"}}"#, "sleep 5");
            let builder = f.builder.clone().with_timeout(Some(Duration::from_millis(200)));
            let err = builder.build(&f.project).await.unwrap_err();
            assert!(matches!(err, BuildError::BuildExecution(msg) if msg.contains("timed out")));
        }

        #[tokio::test]
        async fn test_spawn_failure() {
            let f = fixture(r#"{"scripts":{"build":"x"}}"#, "exit 0");
            let builder = NpmBuilder::new("/nonexistent/pagecast-npm");
            let err = builder.build(&f.project).await.unwrap_err();
            assert!(matches!(err, BuildError::BuildExecution(msg) if msg.contains("failed to spawn")));
        }
    }
}
