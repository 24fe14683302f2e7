use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Optional system-wide configuration file (any format the `config` crate
/// recognises by extension).
pub const CONFIG_FILE: &str = "/etc/binfmt-support/config";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Administrative database of installed formats.
    pub admindir: PathBuf,
    /// Format descriptions shipped by packages, for `--import`.
    pub importdir: PathBuf,
    /// Where the kernel's binfmt_misc interface lives.
    pub procdir: PathBuf,
    /// Kernel list of supported filesystem types.
    pub filesystems: PathBuf,
    /// Detector proxy registered in place of an interpreter.
    pub run_detectors: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    pub modprobe: String,
    pub mount: String,
    pub umount: String,
    pub fusermount: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            admindir: PathBuf::from("/var/lib/binfmts"),
            importdir: PathBuf::from("/usr/share/binfmts"),
            procdir: PathBuf::from("/proc/sys/fs/binfmt_misc"),
            filesystems: PathBuf::from("/proc/filesystems"),
            run_detectors: PathBuf::from("/usr/lib/binfmt-support/run-detectors"),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            modprobe: "/sbin/modprobe".to_string(),
            mount: "/bin/mount".to_string(),
            umount: "/bin/umount".to_string(),
            fusermount: "fusermount".to_string(),
        }
    }
}

impl Config {
    /// Built-in defaults, overlaid by [`CONFIG_FILE`] if present, overlaid by
    /// `BINFMTS_*` environment variables (`__` separates nested keys, e.g.
    /// `BINFMTS_PATHS__ADMINDIR`).
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix("BINFMTS").prefix_separator("_").separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
