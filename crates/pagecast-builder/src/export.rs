//! Static-export patch for framework projects.
//!
//! [`StaticExportGuard::apply`] swaps the project's framework config for one
//! that forces a fully static output tree. The original files come back when
//! the guard is restored or dropped, whichever happens first.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::detect::FRAMEWORK_CONFIGS;

/// File the patch is written to.
pub const PATCH_FILE: &str = "next.config.js";

pub const EXPORT_CONFIG: &str = r#"/** @type {import('next').NextConfig} */
const nextConfig = {
  output: 'export',
  trailingSlash: true,
  images: {
    unoptimized: true
  }
}

module.exports = nextConfig
"#;

/// Scoped ownership of the patched framework config in one project directory.
#[derive(Debug)]
pub struct StaticExportGuard {
    dir: PathBuf,
    /// Original config files, removed while the patch is active.
    backups: Vec<(PathBuf, Vec<u8>)>,
    restored: bool,
}

impl StaticExportGuard {
    /// Back up existing framework configs and write the export patch.
    pub fn apply(dir: &Path) -> std::io::Result<Self> {
        let mut guard = Self {
            dir: dir.to_path_buf(),
            backups: Vec::new(),
            restored: false,
        };

        // Failures past this point drop `guard`, which puts back what was taken.
        for name in FRAMEWORK_CONFIGS {
            let path = dir.join(name);
            match std::fs::read(&path) {
                Ok(content) => {
                    std::fs::remove_file(&path)?;
                    guard.backups.push((path, content));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        std::fs::write(dir.join(PATCH_FILE), EXPORT_CONFIG)?;
        debug!(dir = %dir.display(), backups = guard.backups.len(), "Applied static-export patch");
        Ok(guard)
    }

    /// Remove the patch and rewrite the original configs.
    pub fn restore(mut self) -> std::io::Result<()> {
        self.restore_files()
    }

    fn restore_files(&mut self) -> std::io::Result<()> {
        self.restored = true;

        match std::fs::remove_file(self.dir.join(PATCH_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        for (path, content) in &self.backups {
            std::fs::write(path, content)?;
        }
        debug!(dir = %self.dir.display(), "Restored framework config");
        Ok(())
    }
}

impl Drop for StaticExportGuard {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = self.restore_files() {
                warn!(dir = %self.dir.display(), error = %e, "Failed to restore framework config");
            }
        }
    }
}
