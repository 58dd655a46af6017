//! Shared test utilities for integration and E2E tests.
//!
//! This module provides a fixture that lays out a complete workspace: a git
//! checkout, a patch catalog, override files with a mapping list, and a
//! `.overlay-patch.yaml` tying them together.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_checkout(&[("setup.py", "setup()\n")]);
//!     fixture.command().arg("ls").assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{configs, files, git_available, TestFixture};
}

/// Common configuration YAML snippets for testing.
#[allow(dead_code)]
pub mod configs {
    /// Catalog, overrides and an explicit overlay next to the checkout.
    pub const OVERLAY: &str = r#"
source_root: checkout
patches: patches
overrides:
  root: overrides
  list: overrides.txt
overlay: overlay
search_path:
  dir: site-packages
transforms:
  - name: env-preference
    kind: env-fallback
    target: pkg/envs.py
    old: OLD_HOME
    new: NEW_HOME
  - name: reductions
    kind: reduction-sweep
    target: csrc
fallbacks:
  0002-env-rename: env-preference
sweeps: [reductions]
"#;

    /// Same workspace with the overlay disabled.
    pub const DIRECT: &str = r#"
source_root: checkout
patches: patches
overrides:
  root: overrides
  list: overrides.txt
overlay: off
transforms:
  - name: env-preference
    kind: env-fallback
    target: pkg/envs.py
    old: OLD_HOME
    new: NEW_HOME
"#;

    /// Invalid YAML for error testing.
    pub const INVALID_YAML: &str = "source_root: [unclosed";
}

/// File contents shared by the fixtures.
#[allow(dead_code)]
pub mod files {
    pub const SETUP: &str = "from setuptools import setup\nsetup(name='demo')\n";
    pub const ENVS: &str = "import os\nHOME = os.getenv(\"OLD_HOME\", \"/opt\")\n";
    pub const OPS: &str = "float r = BlockReduce(tmp).Sum(v);\n";

    /// Applies cleanly to `SETUP`.
    pub const RENAME_PATCH: &str = "--- a/setup.py\n+++ b/setup.py\n@@ -1,2 +1,2 @@\n from setuptools import setup\n-setup(name='demo')\n+setup(name='demo-overlay')\n";

    /// Written against an older `ENVS`; only its fallback can resolve it.
    pub const STALE_ENV_PATCH: &str = "--- a/pkg/envs.py\n+++ b/pkg/envs.py\n@@ -1,2 +1,2 @@\n import os\n-HOME = os.environ[\"OLD_HOME\"]\n+HOME = os.environ[\"NEW_HOME\"]\n";
}

/// Whether a usable `git` binary is on the PATH.
#[allow(dead_code)]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A temporary workspace holding a checkout and its overlay inputs.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

#[allow(dead_code)]
impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create `checkout/` with the given files and commit them.
    pub fn with_checkout(self, files: &[(&str, &str)]) -> Self {
        for (path, content) in files {
            self.temp_dir
                .child("checkout")
                .child(path)
                .write_str(content)
                .expect("Failed to write checkout file");
        }
        let checkout = self.checkout();
        self.git(&["init", "-q"]);
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", "initial"]);
        assert!(checkout.join(".git").exists());
        self
    }

    /// The standard checkout: a buildable package with a CUDA source.
    pub fn with_default_checkout(self) -> Self {
        self.with_checkout(&[
            ("setup.py", files::SETUP),
            ("pkg/envs.py", files::ENVS),
            ("csrc/ops.cu", files::OPS),
        ])
    }

    /// Add a `.overlay-patch.yaml` configuration file with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.temp_dir
            .child(".overlay-patch.yaml")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    /// Add a catalog entry under `patches/`.
    pub fn with_patch(self, name: &str, content: &str) -> Self {
        self.with_file(&format!("patches/{}", name), content)
    }

    /// Add an override file and append its mapping line.
    pub fn with_override(self, line: &str, source: &str, content: &str) -> Self {
        let list = self.temp_dir.child("overrides.txt");
        let mut current = std::fs::read_to_string(list.path()).unwrap_or_default();
        current.push_str(line);
        current.push('\n');
        list.write_str(&current).expect("Failed to write mapping list");
        self.with_file(&format!("overrides/{}", source), content)
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The git checkout.
    pub fn checkout(&self) -> PathBuf {
        self.temp_dir.path().join("checkout")
    }

    /// The overlay root used by `configs::OVERLAY`.
    pub fn overlay(&self) -> PathBuf {
        self.temp_dir.path().join("overlay")
    }

    /// Read a file of the checkout.
    pub fn read_checkout(&self, path: &str) -> String {
        std::fs::read_to_string(self.checkout().join(path)).expect("Failed to read checkout file")
    }

    /// Run git in the checkout with a throwaway identity.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .current_dir(self.checkout())
            .args([
                "-c",
                "user.name=Overlay Test",
                "-c",
                "user.email=overlay@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .env("GIT_CEILING_DIRECTORIES", self.path())
            .output()
            .expect("Failed to run git");
        assert!(output.status.success(), "git {:?} failed: {:?}", args, output);
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Tracked files of the checkout that differ from HEAD.
    pub fn git_status(&self) -> String {
        self.git(&["status", "--porcelain", "--untracked-files=no"])
    }

    /// Create a command configured to run in this fixture's directory.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("overlay-patch");
        cmd.current_dir(self.path())
            .env_remove("OVERLAY_PATCH_OVERLAY")
            .env_remove("OVERLAY_PATCH_CONFIG")
            .env_remove("OVERLAY_PATCH_GUARD_CAP")
            .arg("--color")
            .arg("never");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.path().exists());
    }

    #[test]
    fn test_fixture_with_override_appends_mapping_lines() {
        let fixture = TestFixture::new()
            .with_override("a.py", "a.py", "a\n")
            .with_override("b.py -> pkg/b.py", "b.py", "b\n");
        let list = std::fs::read_to_string(fixture.path().join("overrides.txt")).unwrap();
        assert_eq!(list, "a.py\nb.py -> pkg/b.py\n");
        assert!(fixture.path().join("overrides/b.py").exists());
    }
}
