//! Dependency bootstrap for fresh worktrees.
//!
//! An explicit setup command from config wins; otherwise the installer is
//! picked by lockfile. Install failures are logged and never abort sandbox
//! creation — a task can still edit code in a tree whose deps didn't resolve.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::git::run_command;

/// Every installer gets five minutes.
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Lockfile -> install command, checked in order. First match wins.
const INSTALLERS: &[(&str, &str)] = &[
    ("pnpm-lock.yaml", "pnpm install --frozen-lockfile"),
    ("bun.lockb", "bun install"),
    ("bun.lock", "bun install"),
    ("yarn.lock", "yarn install --frozen-lockfile"),
    ("package-lock.json", "npm ci"),
    ("requirements.txt", "pip install -r requirements.txt"),
    ("poetry.lock", "poetry install"),
    ("uv.lock", "uv sync"),
    ("Gemfile.lock", "bundle install"),
    ("composer.lock", "composer install"),
    ("Podfile.lock", "pod install"),
];

/// Pick the install command for `dir`: explicit override first, then
/// lockfile detection. None when nothing matches.
pub fn detect_install_command(dir: &Path, override_cmd: Option<&str>) -> Option<String> {
    if let Some(cmd) = override_cmd {
        if !cmd.trim().is_empty() {
            return Some(cmd.to_string());
        }
    }
    INSTALLERS
        .iter()
        .find(|(lockfile, _)| dir.join(lockfile).exists())
        .map(|(_, cmd)| cmd.to_string())
}

/// Run the bootstrap step. Best effort: failures are logged, not returned.
pub async fn bootstrap(dir: &Path, override_cmd: Option<&str>) {
    let Some(cmd) = detect_install_command(dir, override_cmd) else {
        return;
    };

    info!(command = %cmd, dir = %dir.display(), "bootstrapping sandbox dependencies");
    match run_command(dir, "sh", &["-c", &cmd], INSTALL_TIMEOUT).await {
        Ok(out) if out.success => {
            info!(command = %cmd, "dependency install finished");
        }
        Ok(out) => {
            warn!(command = %cmd, stderr = %out.stderr.trim(), "dependency install failed (continuing)");
        }
        Err(e) => {
            warn!(command = %cmd, error = %e, "dependency install errored (continuing)");
        }
    }
}
