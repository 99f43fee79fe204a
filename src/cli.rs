use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::domain::DomainAction;
use crate::output::{self, OutputMode};
use crate::task::{TaskError, TaskKind};
use crate::theme::Theme;
use crate::{backup, cleanup, domain, inventory, monitor, optimize, progress, task, update, version};

#[derive(Parser)]
#[command(name = "sysmate")]
#[command(version)]
#[command(about = "Windows system maintenance: inventory, cleanup, backups, domain and updates")]
#[command(long_about = "Sysmate keeps a Windows workstation in shape from the command line.\n\n\
    Examples:\n  \
    sysmate software                 # List installed applications\n  \
    sysmate cleanup -y               # Remove temp and cache files\n  \
    sysmate backup -s C:\\Work -d D:\\Backups\n  \
    sysmate update check             # Check the update manifest\n  \
    sysmate status --json            # Machine-readable system snapshot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List installed software from the registry and the Microsoft Store
    #[command(visible_alias = "sw")]
    Software {
        /// Filter by name or publisher (case-insensitive substring)
        #[arg(long, value_name = "TEXT")]
        filter: Option<String>,

        /// Output results as JSON for scripting
        #[arg(long)]
        json: bool,

        /// Launch the uninstaller for the named application
        #[arg(long, value_name = "NAME", conflicts_with_all = ["filter", "json"])]
        uninstall: Option<String>,
    },

    /// Remove temporary and cache files
    #[command(visible_alias = "clean")]
    Cleanup {
        /// Extra directory to clean (repeatable)
        #[arg(long, value_name = "PATH")]
        target: Vec<PathBuf>,

        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Run system optimization steps (DNS flush, chkdsk, defrag)
    Optimize,

    /// Back up directories to a timestamped archive
    Backup {
        /// Directory to back up (repeatable)
        #[arg(short = 's', long, value_name = "PATH")]
        source: Vec<PathBuf>,

        /// Destination directory (falls back to config)
        #[arg(short = 'd', long, value_name = "PATH")]
        destination: Option<PathBuf>,

        /// Copy files instead of writing a zip archive
        #[arg(long)]
        no_compress: bool,
    },

    /// Restore a backup archive
    Restore {
        /// Archive produced by the backup command
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Directory to restore into
        #[arg(short = 'd', long, value_name = "PATH")]
        destination: PathBuf,
    },

    /// Join, leave or repair Active Directory domain membership
    Domain {
        #[command(subcommand)]
        action: DomainCommands,
    },

    /// Check for and install application updates
    Update {
        #[command(subcommand)]
        action: UpdateCommands,
    },

    /// Show a system snapshot with threshold alerts
    Status {
        /// Output the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// View or modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum DomainCommands {
    /// Show current computer name and domain membership
    Info,

    /// Join the computer to a domain (requires restart)
    Join {
        /// Domain name, e.g. corp.example.com
        #[arg(value_name = "DOMAIN")]
        domain: String,

        /// Account authorized to join machines
        #[arg(short = 'u', long, value_name = "USER")]
        username: String,

        /// Password for the account (prompted when omitted)
        #[arg(short = 'p', long, value_name = "PASSWORD")]
        password: Option<String>,
    },

    /// Remove the computer from its domain (requires restart)
    Leave,

    /// Repair the secure channel with the domain controller
    Repair,
}

#[derive(Subcommand)]
pub enum UpdateCommands {
    /// Compare the current version against the update manifest
    Check {
        /// Manifest URL or local file (falls back to config)
        #[arg(long, value_name = "SOURCE")]
        manifest: Option<String>,
    },

    /// Download, verify and unpack the latest update
    Install {
        /// Manifest URL or local file (falls back to config)
        #[arg(long, value_name = "SOURCE")]
        manifest: Option<String>,

        /// Install even when the manifest does not require it
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current configuration as JSON
    Show,

    /// Set a single value by dotted key, e.g. monitoring.cpu_threshold 75
    Set {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(value_name = "VALUE")]
        value: String,
    },

    /// Reset the configuration file to defaults
    Reset,

    /// Print the configuration file location
    Path,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn run(self, config: &Config) -> Result<()> {
        let mode = OutputMode::from_flags(self.verbose, self.quiet);

        match self.command {
            Commands::Software {
                filter,
                json,
                uninstall,
            } => run_software(mode, filter.as_deref(), json, uninstall.as_deref()),
            Commands::Cleanup { target, yes } => run_cleanup(mode, target, yes),
            Commands::Optimize => run_optimize(mode),
            Commands::Backup {
                source,
                destination,
                no_compress,
            } => run_backup(config, mode, source, destination, no_compress),
            Commands::Restore {
                archive,
                destination,
            } => run_restore(mode, archive, destination),
            Commands::Domain { action } => run_domain(mode, action),
            Commands::Update { action } => run_update(config, mode, action),
            Commands::Status { json } => run_status(config, mode, json),
            Commands::Config { action } => run_config(config, action),
        }
    }
}

/// Unwrap a task's terminal result into the command exit path.
fn finish<T>(result: std::result::Result<T, TaskError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(TaskError::Cancelled) => bail!("operation cancelled"),
        Err(TaskError::Failed(message)) => bail!(message),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{self, Write};

    print!("{} [y/N] ", Theme::warning(prompt));
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn run_software(
    mode: OutputMode,
    filter: Option<&str>,
    json: bool,
    uninstall: Option<&str>,
) -> Result<()> {
    let handle = task::spawn(TaskKind::SoftwareScan, |ctx| inventory::scan(ctx))?;
    let inv = finish(progress::drive(handle, mode, "Scanning installed software"))?;
    info!(applications = inv.entries.len(), "software scan complete");

    if let Some(name) = uninstall {
        let entry = inv
            .find(name)
            .with_context(|| format!("No installed application matches \"{name}\""))?;
        inventory::launch_uninstall(entry)?;
        if mode != OutputMode::Quiet {
            println!(
                "{} launched uninstaller for {}",
                Theme::success("OK"),
                Theme::value(&entry.name)
            );
        }
        return Ok(());
    }

    if json {
        output::print_inventory_json(&inv)
    } else {
        output::print_inventory(&inv, mode, filter);
        Ok(())
    }
}

fn run_cleanup(mode: OutputMode, extra: Vec<PathBuf>, yes: bool) -> Result<()> {
    let mut targets = cleanup::default_targets();
    targets.extend(extra);

    if !yes && mode != OutputMode::Quiet {
        println!("{}", Theme::header("Cleanup targets"));
        for target in &targets {
            println!("  {}", target.display());
        }
        if !confirm("Remove files from these locations?")? {
            println!("{}", Theme::muted("Aborted."));
            return Ok(());
        }
    }

    let handle = task::spawn(TaskKind::Cleanup, move |ctx| cleanup::run(ctx, &targets))?;
    let report = finish(progress::drive(handle, mode, "Cleaning up"))?;
    info!(
        files = report.files_removed,
        bytes = report.space_saved,
        errors = report.errors,
        "cleanup complete"
    );
    output::print_cleanup(&report, mode);
    Ok(())
}

fn run_optimize(mode: OutputMode) -> Result<()> {
    let handle = task::spawn(TaskKind::Optimize, |ctx| optimize::run(ctx))?;
    let report = finish(progress::drive(handle, mode, "Optimizing system"))?;
    if report.steps_failed > 0 {
        warn!(failed = report.steps_failed, "optimization steps failed");
    }
    output::print_optimize(&report, mode);
    Ok(())
}

fn run_backup(
    config: &Config,
    mode: OutputMode,
    source: Vec<PathBuf>,
    destination: Option<PathBuf>,
    no_compress: bool,
) -> Result<()> {
    if source.is_empty() {
        bail!("No sources given; pass --source at least once");
    }
    let destination = match destination {
        Some(dest) => dest,
        None if !config.backup.backup_path.is_empty() => {
            PathBuf::from(&config.backup.backup_path)
        }
        None => bail!("No backup destination given; pass --destination or set backup.backup_path"),
    };

    let options = backup::BackupOptions {
        sources: source,
        destination,
        compress: if no_compress {
            false
        } else {
            config.backup.compress_backup
        },
        max_backups: config.backup.max_backups,
    };

    let handle = task::spawn(TaskKind::Backup, move |ctx| backup::run(ctx, &options))?;
    let report = finish(progress::drive(handle, mode, "Backing up"))?;
    info!(
        archive = %report.archive.display(),
        files = report.files_copied,
        "backup complete"
    );
    output::print_backup(&report, mode);
    Ok(())
}

fn run_restore(mode: OutputMode, archive: PathBuf, destination: PathBuf) -> Result<()> {
    let handle = task::spawn(TaskKind::Restore, move |ctx| {
        backup::restore(ctx, &archive, &destination)
    })?;
    let restored = finish(progress::drive(handle, mode, "Restoring backup"))?;
    if mode != OutputMode::Quiet {
        println!(
            "{} restored {} entries",
            Theme::success("OK"),
            Theme::value(&restored.to_string())
        );
    }
    Ok(())
}

fn run_domain(mode: OutputMode, command: DomainCommands) -> Result<()> {
    let (kind, action) = match command {
        DomainCommands::Info => {
            let info = domain::info();
            output::print_domain_info(&info, mode);
            return Ok(());
        }
        DomainCommands::Join {
            domain,
            username,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password(&username)?,
            };
            (
                TaskKind::DomainJoin,
                DomainAction::Join {
                    domain,
                    username,
                    password,
                },
            )
        }
        DomainCommands::Leave => (TaskKind::DomainLeave, DomainAction::Leave),
        DomainCommands::Repair => (TaskKind::DomainRepair, DomainAction::Repair),
    };

    let label = action.label();
    let handle = task::spawn(kind, move |ctx| domain::run(ctx, &action))?;
    finish(progress::drive(handle, mode, label))?;
    if mode != OutputMode::Quiet {
        println!(
            "{} {} succeeded. A restart may be required.",
            Theme::success("OK"),
            label
        );
    }
    Ok(())
}

fn prompt_password(username: &str) -> Result<String> {
    use std::io::{self, Write};

    print!("Password for {username}: ");
    io::stdout().flush()?;
    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("A password is required to join a domain");
    }
    Ok(password)
}

fn manifest_source(config: &Config, flag: Option<String>) -> Result<String> {
    match flag {
        Some(source) => Ok(source),
        None if !config.update_manifest.is_empty() => Ok(config.update_manifest.clone()),
        None => bail!("No update manifest given; pass --manifest or set update_manifest"),
    }
}

fn run_update(config: &Config, mode: OutputMode, command: UpdateCommands) -> Result<()> {
    match command {
        UpdateCommands::Check { manifest } => {
            let source = manifest_source(config, manifest)?;
            let handle = task::spawn(TaskKind::UpdateCheck, move |ctx| {
                update::check(ctx, &source, version::CURRENT_VERSION)
            })?;
            let status = finish(progress::drive(handle, mode, "Checking for updates"))?;
            output::print_update_status(&status, mode);
            Ok(())
        }
        UpdateCommands::Install { manifest, yes } => {
            let source = manifest_source(config, manifest)?;
            let check_handle = task::spawn(TaskKind::UpdateCheck, {
                let source = source.clone();
                move |ctx| update::check(ctx, &source, version::CURRENT_VERSION)
            })?;
            let status = finish(progress::drive(check_handle, mode, "Checking for updates"))?;
            output::print_update_status(&status, mode);

            if !status.available {
                return Ok(());
            }
            if !yes && !status.required && mode != OutputMode::Quiet {
                if !confirm("Download and install this update?")? {
                    println!("{}", Theme::muted("Aborted."));
                    return Ok(());
                }
            }

            let url = status
                .download_url
                .clone()
                .context("Manifest offers an update but no download URL")?;
            let version = status.latest_version.clone();
            let hash = status.hash.clone();
            let verify = config.security.verify_updates;

            let handle = task::spawn(TaskKind::UpdateCheck, move |ctx| {
                update::download(ctx, &url, &version, hash.as_deref(), verify)
            })?;
            let unpacked = finish(progress::drive(handle, mode, "Downloading update"))?;
            info!(path = %unpacked.display(), "update unpacked");
            if mode != OutputMode::Quiet {
                println!(
                    "{} update {} unpacked to {}",
                    Theme::success("OK"),
                    Theme::value(&status.latest_version),
                    unpacked.display()
                );
                println!(
                    "{}",
                    Theme::muted("Close the application and run the installer from that folder.")
                );
            }
            Ok(())
        }
    }
}

fn run_status(config: &Config, mode: OutputMode, json: bool) -> Result<()> {
    // Sampling blocks for the CPU refresh interval.
    let spinner = (mode != OutputMode::Quiet && !json)
        .then(|| progress::create_spinner("Sampling system..."));
    let snapshot = monitor::snapshot();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    if json {
        return output::print_snapshot_json(&snapshot);
    }
    let alerts = monitor::alerts(&snapshot, &config.monitoring);
    for alert in &alerts {
        warn!("{alert}");
    }
    output::print_snapshot(&snapshot, &alerts, mode);
    Ok(())
}

fn run_config(config: &Config, command: ConfigCommands) -> Result<()> {
    let path = config::config_path()?;
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        }
        ConfigCommands::Set { key, value } => {
            let mut updated = config.clone();
            updated.set_key(&key, &value)?;
            updated.save(&path)?;
            println!(
                "{} {} = {}",
                Theme::success("Set"),
                Theme::value(&key),
                value
            );
            Ok(())
        }
        ConfigCommands::Reset => {
            Config::default().save(&path)?;
            println!(
                "{} configuration reset to defaults: {}",
                Theme::success("OK"),
                path.display()
            );
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}
