//! Where change scripts live on disk.

use std::path::{Path, PathBuf};

/// Script kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Forward script.
    Deploy,
    /// Backward script.
    Revert,
    /// Verification script.
    Verify,
}

impl ScriptKind {
    /// Lowercase name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Revert => "revert",
            Self::Verify => "verify",
        }
    }
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Script directories: `{top_dir}/{deploy|revert|verify}/{name}.sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLayout {
    top_dir: PathBuf,
    deploy_dir: PathBuf,
    revert_dir: PathBuf,
    verify_dir: PathBuf,
}

impl ScriptLayout {
    /// Creates a layout with the default directory names under `top_dir`.
    #[must_use]
    pub fn new(top_dir: impl Into<PathBuf>) -> Self {
        Self {
            top_dir: top_dir.into(),
            deploy_dir: PathBuf::from("deploy"),
            revert_dir: PathBuf::from("revert"),
            verify_dir: PathBuf::from("verify"),
        }
    }

    /// Sets the deploy directory.
    #[must_use]
    pub fn with_deploy_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.deploy_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the revert directory.
    #[must_use]
    pub fn with_revert_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.revert_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the verify directory.
    #[must_use]
    pub fn with_verify_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.verify_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Directory holding scripts of the given kind.
    #[must_use]
    pub fn dir(&self, kind: ScriptKind) -> PathBuf {
        let sub = match kind {
            ScriptKind::Deploy => &self.deploy_dir,
            ScriptKind::Revert => &self.revert_dir,
            ScriptKind::Verify => &self.verify_dir,
        };
        self.top_dir.join(sub)
    }

    /// Path of a change's script of the given kind.
    #[must_use]
    pub fn script(&self, kind: ScriptKind, change: &str) -> PathBuf {
        self.dir(kind).join(format!("{change}.sql"))
    }

    /// Path of a change's deploy script.
    #[must_use]
    pub fn deploy_script(&self, change: &str) -> PathBuf {
        self.script(ScriptKind::Deploy, change)
    }

    /// Path of a change's revert script.
    #[must_use]
    pub fn revert_script(&self, change: &str) -> PathBuf {
        self.script(ScriptKind::Revert, change)
    }

    /// Path of a change's verify script.
    #[must_use]
    pub fn verify_script(&self, change: &str) -> PathBuf {
        self.script(ScriptKind::Verify, change)
    }
}
