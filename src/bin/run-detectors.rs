//! Detector proxy registered with the kernel in place of an interpreter.
//!
//! The kernel hands us the file it matched; we redo the match, let detectors
//! have their say, and exec the first interpreter that will start.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use clap::Parser;
use tracing::{debug, error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use binfmt_support::config::Config;
use binfmt_support::format::FormatRecord;
use binfmt_support::kernel::{BinfmtKernel, ProcBinfmtMisc};
use binfmt_support::registry::RecordStore;
use binfmt_support::resolve::{ProcessDetector, Resolver};

#[derive(Parser, Debug)]
#[command(name = "run-detectors", version, about = "Run the interpreter for a binary format")]
struct Args {
    /// Use DIRECTORY instead of /var/lib/binfmts as the database
    #[arg(long, value_name = "DIRECTORY")]
    admindir: Option<PathBuf>,

    /// Use DIRECTORY instead of /proc/sys/fs/binfmt_misc
    #[arg(long, value_name = "DIRECTORY", hide = true)]
    procdir: Option<PathBuf>,

    /// Program to run, then the arguments it was started with. Options are
    /// only recognised before the program.
    #[arg(value_name = "PROGRAM", required = true, num_args = 1.., trailing_var_arg = true)]
    command: Vec<OsString>,
}

impl Args {
    fn target(&self) -> &Path {
        self.command.first().map(Path::new).unwrap_or(Path::new(""))
    }

    fn passthrough(&self) -> &[OsString] {
        self.command.get(1..).unwrap_or_default()
    }

    fn configure(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.admindir {
            config.paths.admindir = dir.clone();
        }
        if let Some(dir) = &self.procdir {
            config.paths.procdir = dir.clone();
        }
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "binfmt_support=info,warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .init();

    let args = Args::parse();

    match run(&args) {
        // Only returns if nothing could be exec'd.
        Ok(()) => {
            error!("unable to find an interpreter for {}", args.target().display());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = args.configure(Config::load()?);

    for record in interpreters(args, &config)? {
        debug!(name = %record.name, interpreter = %record.interpreter, "Trying interpreter");
        let err = interpreter_command(&record, args.target(), args.passthrough()).exec();
        warn!("unable to exec {}: {}", record.interpreter, err);
    }

    Ok(())
}

/// Records the kernel currently has that claim the target, best first.
fn interpreters(args: &Args, config: &Config) -> anyhow::Result<Vec<FormatRecord>> {
    let kernel = ProcBinfmtMisc::new(&config.paths, &config.commands);
    let store = RecordStore::new(&config.paths.admindir);

    // The kernel only sends us files for formats it has; disabled ones
    // must not be picked up here either.
    let resolver = Resolver::from_store_filtered(&store, |name| kernel.is_enabled(name))?;
    Ok(resolver.resolve(args.target(), &ProcessDetector)?)
}

fn interpreter_command(record: &FormatRecord, target: &Path, args: &[OsString]) -> Command {
    let mut command = Command::new(&record.interpreter);
    command.arg0(&record.interpreter).arg(target).args(args);
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use binfmt_support::format::FormatSpec;
    use std::ffi::OsStr;
    use std::fs;
    use tempfile::TempDir;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    fn passthrough(args: &Args) -> Vec<&str> {
        args.passthrough().iter().map(|arg| arg.to_str().unwrap()).collect()
    }

    fn record(name: &str) -> FormatRecord {
        FormatSpec {
            magic: Some("#!".to_string()),
            interpreter: Some(format!("/usr/bin/{}", name)),
            ..Default::default()
        }
        .build(name)
        .unwrap()
    }

    #[test]
    fn test_target_and_arguments() {
        let args = parse(&["run-detectors", "/tmp/script", "one", "two"]);
        assert_eq!(args.target(), Path::new("/tmp/script"));
        assert_eq!(passthrough(&args), vec!["one", "two"]);
    }

    #[test]
    fn test_flags_after_target_pass_through() {
        let args = parse(&["run-detectors", "/tmp/script", "--help"]);
        assert_eq!(args.target(), Path::new("/tmp/script"));
        assert_eq!(passthrough(&args), vec!["--help"]);

        let args = parse(&["run-detectors", "/tmp/script", "-V", "--version", "-x"]);
        assert_eq!(passthrough(&args), vec!["-V", "--version", "-x"]);
    }

    #[test]
    fn test_own_options_after_target_pass_through() {
        let args = parse(&["run-detectors", "/tmp/script", "--admindir", "/elsewhere"]);
        assert_eq!(args.admindir, None);
        assert_eq!(passthrough(&args), vec!["--admindir", "/elsewhere"]);
    }

    #[test]
    fn test_options_before_target() {
        let args = parse(&["run-detectors", "--admindir", "/db", "/tmp/script", "a"]);
        assert_eq!(args.admindir, Some(PathBuf::from("/db")));
        assert_eq!(args.target(), Path::new("/tmp/script"));
        assert_eq!(passthrough(&args), vec!["a"]);
    }

    #[test]
    fn test_target_required() {
        assert!(Args::try_parse_from(["run-detectors"]).is_err());
        assert!(Args::try_parse_from(["run-detectors", "--admindir", "/db"]).is_err());
    }

    #[test]
    fn test_configure_overrides_paths() {
        let args = parse(&["run-detectors", "--admindir", "/db", "--procdir", "/proc-x", "/t"]);
        let config = args.configure(Config::default());
        assert_eq!(config.paths.admindir, PathBuf::from("/db"));
        assert_eq!(config.paths.procdir, PathBuf::from("/proc-x"));
    }

    #[test]
    fn test_interpreter_command_line() {
        let args = parse(&["run-detectors", "/tmp/script", "--help", "x"]);
        let command = interpreter_command(&record("sh"), args.target(), args.passthrough());

        assert_eq!(command.get_program(), OsStr::new("/usr/bin/sh"));
        let argv: Vec<&OsStr> = command.get_args().collect();
        assert_eq!(argv, vec![OsStr::new("/tmp/script"), OsStr::new("--help"), OsStr::new("x")]);
    }

    #[test]
    fn test_interpreters_only_from_enabled_formats() {
        let dir = TempDir::new().unwrap();
        let admindir = dir.path().join("admin");
        let procdir = dir.path().join("binfmt_misc");
        fs::create_dir(&admindir).unwrap();
        fs::create_dir(&procdir).unwrap();

        let store = RecordStore::new(&admindir);
        store.write(&record("on")).unwrap();
        store.write(&record("off")).unwrap();
        fs::write(procdir.join("on"), "enabled\n").unwrap();

        let target = dir.path().join("script");
        fs::write(&target, "#!/bin/sh\n").unwrap();

        let argv = [
            OsStr::new("run-detectors"),
            OsStr::new("--admindir"),
            admindir.as_os_str(),
            OsStr::new("--procdir"),
            procdir.as_os_str(),
            target.as_os_str(),
        ];
        let args = Args::try_parse_from(argv).unwrap();
        let config = args.configure(Config::default());

        let found = interpreters(&args, &config).unwrap();
        let names: Vec<&str> = found.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["on"]);
    }

    #[test]
    fn test_no_interpreter_for_unmatched_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data");
        fs::write(&target, b"\x7fELF").unwrap();

        let mut config = Config::default();
        config.paths.admindir = dir.path().join("admin");
        config.paths.procdir = dir.path().join("binfmt_misc");
        fs::create_dir(&config.paths.admindir).unwrap();

        let args = Args::try_parse_from([OsStr::new("run-detectors"), target.as_os_str()]).unwrap();
        assert!(interpreters(&args, &config).unwrap().is_empty());
    }
}
