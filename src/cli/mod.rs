//! Command-line surface of the installer.
//!
//! Verbs are flags, mutually exclusive, defaulting to install:
//!
//! | Flag | Effect |
//! |------|--------|
//! | (none) | install the latest version, or heal the current one |
//! | `--upgrade` | stage the latest version for the next relaunch |
//! | `--relaunch --relaunch-pid N` | wait for PID N, promote, relaunch |
//! | `--uninstall` | remove managed files from the base directory |
//! | `--info` | print the multiverse state and exit |
//!
//! Trailing arguments are forwarded to the application when it is
//! launched. Exit code is 0 on success, 1 on any surfaced error.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::multiverse::{BuildFolder, Multiverse, MultiverseParams};
use crate::setup::{Installer, InstallerSettings};
use crate::utils::platform;

/// itch-setup: installs, heals, and upgrades a desktop application.
#[derive(Debug, Parser)]
#[command(name = "itch-setup", version, about)]
pub struct Cli {
    /// Logical application identity used in CDN paths and install-dir
    /// naming.
    #[arg(long = "appname", default_value = "itch")]
    pub app_name: String,

    /// Before installing, try to launch the current version; skip the
    /// install if that works.
    #[arg(long)]
    pub prefer_launch: bool,

    /// Check for an update and stage it for the next relaunch.
    #[arg(long, conflicts_with_all = ["uninstall", "relaunch", "info"])]
    pub upgrade: bool,

    /// Remove managed files from the base directory, preserving user data.
    #[arg(long, conflicts_with_all = ["relaunch", "info"])]
    pub uninstall: bool,

    /// Wait for the old process to exit, promote the pending version,
    /// launch the result.
    #[arg(long, conflicts_with = "info", requires = "relaunch_pid")]
    pub relaunch: bool,

    /// PID the relaunch verb waits on.
    #[arg(long)]
    pub relaunch_pid: Option<u32>,

    /// Print the current multiverse state and exit.
    #[arg(long)]
    pub info: bool,

    /// Do not open any UI; log to stderr only.
    #[arg(long)]
    pub silent: bool,

    /// Do not fall back from an arm64 channel to amd64.
    #[arg(long)]
    pub no_fallback: bool,

    /// Arguments forwarded to the launched application.
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Runs the selected verb.
    pub async fn execute(self) -> Result<()> {
        let base_dir = platform::base_dir(&self.app_name)?;
        let mut mv = Multiverse::open(MultiverseParams::new(&self.app_name, base_dir))?;

        if self.info {
            return self.print_info(&mv);
        }

        if self.uninstall {
            mv.lock()?;
            info!("uninstalling {} from {}", self.app_name, mv.base_dir().display());
            return mv.uninstall();
        }

        let installer = Installer::new(InstallerSettings {
            app_name: self.app_name.clone(),
            no_fallback: self.no_fallback,
            on_source: None,
        });

        if self.upgrade {
            let result = installer.upgrade(&mut mv).await?;
            info!("did upgrade: {}", result.did_upgrade);
            return Ok(());
        }

        if self.relaunch {
            let pid = self.relaunch_pid.context("--relaunch requires --relaunch-pid")?;
            let build = installer.relaunch(&mut mv, pid).await?;
            let build = build.context("nothing is installed, nothing to relaunch")?;
            return self.launch(&build);
        }

        // Default verb: install.
        if self.prefer_launch {
            if let Some(build) = mv.current_build() {
                match self.launch(&build) {
                    Ok(()) => {
                        info!("launched current version {}, skipping install", build.version);
                        return Ok(());
                    }
                    Err(err) => {
                        warn!("could not launch current version ({err:#}), installing");
                    }
                }
            }
        }

        installer.install(&mut mv).await
        // The platform layer launches the freshly-installed app; the core
        // is done once the multiverse says current is in place.
    }

    /// Launches a build's executable detached, forwarding trailing args.
    fn launch(&self, build: &BuildFolder) -> Result<()> {
        let exe = build.path.join(platform::app_executable_name(&self.app_name));
        info!("launching {}", exe.display());
        std::process::Command::new(&exe)
            .args(&self.args)
            .current_dir(&build.path)
            .spawn()
            .with_context(|| format!("failed to launch {}", exe.display()))?;
        Ok(())
    }

    fn print_info(&self, mv: &Multiverse) -> Result<()> {
        let state = mv.state();
        let info = serde_json::json!({
            "appName": self.app_name,
            "baseDir": mv.base_dir().display().to_string(),
            "current": state.current,
            "ready": state.ready,
        });
        println!("{info}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_verb_is_install() {
        let cli = Cli::parse_from(["itch-setup", "--appname", "kitch"]);
        assert_eq!(cli.app_name, "kitch");
        assert!(!cli.upgrade && !cli.uninstall && !cli.relaunch && !cli.info);
    }

    #[test]
    fn test_verbs_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["itch-setup", "--upgrade", "--uninstall"]).is_err());
        assert!(Cli::try_parse_from(["itch-setup", "--upgrade", "--info"]).is_err());
        assert!(
            Cli::try_parse_from(["itch-setup", "--relaunch", "--relaunch-pid", "1", "--info"])
                .is_err()
        );
    }

    #[test]
    fn test_relaunch_requires_pid() {
        assert!(Cli::try_parse_from(["itch-setup", "--relaunch"]).is_err());
        let cli =
            Cli::parse_from(["itch-setup", "--relaunch", "--relaunch-pid", "4242"]);
        assert!(cli.relaunch);
        assert_eq!(cli.relaunch_pid, Some(4242));
    }

    #[test]
    fn test_trailing_args_pass_through() {
        let cli = Cli::parse_from(["itch-setup", "--silent", "--", "--open", "game/123"]);
        assert!(cli.silent);
        assert_eq!(cli.args, vec!["--open", "game/123"]);
    }
}
