use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{ArgGroup, CommandFactory, Parser};
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use binfmt_support::config::Config;
use binfmt_support::error::BinfmtError;
use binfmt_support::format::{FormatSpec, LOCAL_OWNER, validate_name};
use binfmt_support::kernel::{ProcBinfmtMisc, is_executable};
use binfmt_support::registry::Registry;
use binfmt_support::resolve::ProcessDetector;

const SPEC_HELP: &str = "\
where <spec> is one of

      --magic <byte-sequence> [--mask <byte-sequence>] [--offset <offset>]
      --extension <extension>

The following argument may be added to any <spec> to have a userspace process
determine whether the file should be handled:

      --detector <path>";

#[derive(Parser, Debug)]
#[command(name = "update-binfmts", version, about = "Maintain registry of executable binary formats")]
#[command(override_usage = "update-binfmts [OPTIONS] --install <name> <path> <spec>
       update-binfmts [OPTIONS] --remove <name> <path>
       update-binfmts [OPTIONS] --import [<name>]
       update-binfmts [OPTIONS] --display [<name>]
       update-binfmts [OPTIONS] --enable [<name>]
       update-binfmts [OPTIONS] --disable [<name>]
       update-binfmts [OPTIONS] --find <path>")]
#[command(after_help = SPEC_HELP)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["install", "remove", "import", "display", "enable", "disable", "find"]),
))]
struct Cli {
    /// Install a new binary format
    #[arg(long, num_args = 2, value_names = ["NAME", "PATH"], hide = true)]
    install: Option<Vec<String>>,

    /// Remove a binary format
    #[arg(long, num_args = 2, value_names = ["NAME", "PATH"], hide = true)]
    remove: Option<Vec<String>>,

    /// Import a packaged format file (all of them if NAME is omitted)
    #[arg(long, value_name = "NAME")]
    import: Option<Option<String>>,

    /// Display information about a binary format (all if NAME is omitted)
    #[arg(long, value_name = "NAME")]
    display: Option<Option<String>>,

    /// Enable a binary format in the kernel (all if NAME is omitted)
    #[arg(long, value_name = "NAME")]
    enable: Option<Option<String>>,

    /// Disable a binary format in the kernel (all if NAME is omitted)
    #[arg(long, value_name = "NAME")]
    disable: Option<Option<String>>,

    /// Find the interpreters that would handle PATH
    #[arg(long, value_name = "PATH", hide = true)]
    find: Option<PathBuf>,

    /// Match files starting with BYTE-SEQUENCE
    #[arg(long, value_name = "BYTE-SEQUENCE", allow_hyphen_values = true)]
    magic: Option<String>,

    /// Match files whose bytes, after AND with BYTE-SEQUENCE, equal the magic
    #[arg(long, value_name = "BYTE-SEQUENCE", allow_hyphen_values = true)]
    mask: Option<String>,

    /// Look for the magic at OFFSET
    #[arg(long, value_name = "OFFSET", hide = true)]
    offset: Option<String>,

    /// Match files whose names end in .EXTENSION
    #[arg(long, value_name = "EXTENSION", conflicts_with = "magic", hide = true)]
    extension: Option<String>,

    /// Program deciding whether a matched file should be handled
    #[arg(long, value_name = "PATH", hide = true)]
    detector: Option<String>,

    /// Keep the original file's credentials when running the interpreter
    #[arg(long, value_name = "YES/NO", hide = true)]
    credentials: Option<String>,

    /// For --install and --remove, specify the current package
    #[arg(long, value_name = "PACKAGE-NAME")]
    package: Option<String>,

    /// Use DIRECTORY instead of /var/lib/binfmts as the database
    #[arg(long, value_name = "DIRECTORY")]
    admindir: Option<PathBuf>,

    /// Use DIRECTORY instead of /usr/share/binfmts for --import
    #[arg(long, value_name = "DIRECTORY")]
    importdir: Option<PathBuf>,

    /// Use DIRECTORY instead of /proc/sys/fs/binfmt_misc
    #[arg(long, value_name = "DIRECTORY", hide = true)]
    procdir: Option<PathBuf>,

    /// Don't do anything, just report what would be done
    #[arg(long)]
    test: bool,
}

impl Cli {
    /// Reject what clap's declarative rules can't express, with clap's own
    /// usage-error exit status.
    fn check(&self) {
        let Some(install) = &self.install else {
            return;
        };

        let mut cmd = Cli::command();
        if self.magic.is_none() && self.extension.is_none() {
            cmd.error(ErrorKind::MissingRequiredArgument, "--install requires a <spec> option")
                .exit();
        }
        if let Err(e) = validate_name(&install[0]) {
            cmd.error(ErrorKind::ValueValidation, e).exit();
        }
    }

    fn format_spec(&self, interpreter: &str) -> FormatSpec {
        FormatSpec {
            package: self.package.clone(),
            kind: None,
            offset: self.offset.clone(),
            magic: self.magic.clone(),
            mask: self.mask.clone(),
            extension: self.extension.clone(),
            interpreter: Some(interpreter.to_string()),
            detector: self.detector.clone(),
            credentials: self.credentials.clone(),
            preserve: None,
        }
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

    let cli = Cli::parse();
    cli.check();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!("{}", e);
            error!("exiting due to previous errors");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cfg!(not(target_os = "linux")) {
        return Err(BinfmtError::UnsupportedOs.into());
    }

    let mut config = Config::load()?;
    if let Some(dir) = &cli.admindir {
        config.paths.admindir = dir.clone();
    }
    if let Some(dir) = &cli.importdir {
        config.paths.importdir = dir.clone();
    }
    if let Some(dir) = &cli.procdir {
        config.paths.procdir = dir.clone();
    }

    let kernel = ProcBinfmtMisc::new(&config.paths, &config.commands);
    let registry = Registry::new(&config.paths, kernel).with_dry_run(cli.test);

    if let Some(install) = &cli.install {
        let (name, interpreter) = (&install[0], &install[1]);
        for program in [Some(interpreter), cli.detector.as_ref()].into_iter().flatten() {
            if !is_executable(program) {
                warn!("no executable {} found, but continuing anyway as you request", program);
            }
        }
        let record = cli.format_spec(interpreter).build(name)?;
        registry.install(record)?;
    } else if let Some(remove) = &cli.remove {
        let owner = cli.package.as_deref().unwrap_or(LOCAL_OWNER);
        registry.remove(&remove[0], owner)?;
    } else if let Some(name) = &cli.import {
        registry.import(name.as_deref())?;
    } else if let Some(name) = &cli.display {
        for status in registry.display(name.as_deref())? {
            print!("{}", status);
        }
    } else if let Some(name) = &cli.enable {
        registry.enable(name.as_deref())?;
    } else if let Some(name) = &cli.disable {
        registry.disable(name.as_deref())?;
    } else if let Some(path) = &cli.find {
        for record in registry.find(path, &ProcessDetector)? {
            println!("{}", record.interpreter);
        }
    }

    Ok(())
}
