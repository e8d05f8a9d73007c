//! sshfs-sentry - keep sshfs mounts alive
//!
//! Registers remote SFTP mounts, installs a periodic check for each one,
//! and repairs mounts that dropped or stopped responding.

mod cli;
mod error;
mod health;
mod journal;
mod manifest;
mod mount;
mod prompt;
mod provision;
mod registry;
mod render;
mod scheduler;
mod server;
mod status;
mod sys;
mod update;

use clap::Parser;
use cli::{Cli, Commands, ServerArgs};
use error::{Error, Result};
use health::HealthChecker;
use health::checker::{self, CheckTarget};
use manifest::Layout;
use mount::{SshfsMounter, SystemMounts, SystemUnmounter};
use prompt::Prompter;
use provision::Provisioner;
use registry::Registry;
use scheduler::{NoopServiceManager, ServiceManager, Systemctl};
use server::ServerConfig;
use status::ServerStatus;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version go to stdout and are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

/// Execute the parsed command, returning the process exit code
fn run(cli: Cli) -> Result<i32> {
    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(0);
    }

    let mut settings = match manifest::load(&cli.settings) {
        Ok(settings) => settings,
        Err(e) => return settings_failure(&cli, e),
    };
    if let Some(dir) = cli.config_dir {
        settings.layout.config_dir = dir;
    }
    tracing::debug!(settings = %cli.settings.display(), layout = ?settings.layout, "settings loaded");

    let mounts = SystemMounts::default();
    let unmounter = SystemUnmounter;

    match cli.command {
        Commands::Add { name, fields } => {
            sys::require_root("add")?;
            let layout = &settings.layout;
            let registry = Registry::new(layout);
            if let Some(name) = &name
                && registry.exists(name)
            {
                return Err(Error::DuplicateName(name.clone()));
            }

            let config = gather_config(name.as_deref(), &fields, None, layout)?;
            let manager = service_manager(fields.no_activate);
            let backend = fields.scheduler.unwrap_or(settings.scheduler.backend);
            let provisioner =
                Provisioner::new(layout, &*manager, &mounts, &unmounter, current_exe()?)
                    .settings(absolute(&cli.settings)?)
                    .backend(backend);

            let config = provisioner.add(&config)?;
            println!("Added '{}'", config.name);
            print_artifacts(&provisioner, layout, &config);
            if fields.no_activate {
                println!("\nUnits were written but not enabled (--no-activate).");
            }
            Ok(0)
        }

        Commands::Edit { name, fields } => {
            sys::require_root("edit")?;
            let layout = &settings.layout;
            let current = Registry::new(layout).read(&name)?;

            let config = gather_config(Some(&name), &fields, Some(&current), layout)?;
            let manager = service_manager(fields.no_activate);
            let provisioner =
                Provisioner::new(layout, &*manager, &mounts, &unmounter, current_exe()?)
                    .settings(absolute(&cli.settings)?);
            let backend = fields
                .scheduler
                .or_else(|| provisioner.installed_backend(&name))
                .unwrap_or(settings.scheduler.backend);
            let provisioner = provisioner.backend(backend);

            let config = provisioner.edit(&name, &config)?;
            println!("Updated '{}'", config.name);
            print_artifacts(&provisioner, layout, &config);
            Ok(0)
        }

        Commands::List { json } => {
            let layout = &settings.layout;
            let statuses = collect_statuses(layout, &mounts, None, false)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
                return Ok(0);
            }

            if statuses.is_empty() {
                println!("No servers registered.");
                return Ok(0);
            }

            println!(
                "{:<20} {:<30} {:<28} {:<9} {:<10}",
                "NAME", "REMOTE", "MOUNT POINT", "INTERVAL", "STATE"
            );
            for s in &statuses {
                println!(
                    "{:<20} {:<30} {:<28} {:<9} {:<10}",
                    s.name,
                    s.remote,
                    s.mount_point,
                    format!("{}m", s.interval_minutes),
                    s.state()
                );
            }
            Ok(0)
        }

        Commands::Status { name, json } => {
            let layout = &settings.layout;
            let statuses = collect_statuses(layout, &mounts, name.as_deref(), true)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
                return Ok(0);
            }

            if statuses.is_empty() {
                println!("No servers registered.");
            }
            for (i, s) in statuses.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_status(s);
            }
            Ok(0)
        }

        Commands::Remove { name, yes } => {
            sys::require_root("remove")?;
            let layout = &settings.layout;
            if !Registry::new(layout).exists(&name) {
                return Err(Error::NotFound(name));
            }
            if !yes && !Prompter::stdio().confirm(&format!("Remove server '{}'?", name), false)? {
                return Err(Error::Aborted);
            }

            let manager = Systemctl;
            let provisioner =
                Provisioner::new(layout, &manager, &mounts, &unmounter, current_exe()?);
            provisioner.remove(&name)?;
            println!("Removed '{}'", name);
            Ok(0)
        }

        Commands::Uninstall { yes } => {
            sys::require_root("uninstall")?;
            if !yes
                && !Prompter::stdio().confirm(
                    "Remove every server, its mount check, logs and settings?",
                    false,
                )?
            {
                return Err(Error::Aborted);
            }

            let manager = Systemctl;
            let provisioner = Provisioner::new(
                &settings.layout,
                &manager,
                &mounts,
                &unmounter,
                current_exe()?,
            );
            let removed = provisioner.uninstall(&cli.settings)?;
            for name in &removed {
                println!("Removed '{}'", name);
            }
            println!("sshfs-sentry uninstalled ({} servers removed)", removed.len());
            Ok(0)
        }

        Commands::Update { json } => {
            let status = update::check(&settings.update)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else if status.update_available {
                println!(
                    "A newer version is available: {} (running {})",
                    status.latest, status.current
                );
                println!("  {}", status.url);
            } else {
                println!("sshfs-sentry {} is up to date", status.current);
            }
            Ok(0)
        }

        Commands::Check {
            name,
            config_file,
            log_file,
            lock_dir,
        } => {
            let target = check_target(&settings.layout, name, config_file, log_file, lock_dir)?;
            let mounter = SshfsMounter::from_settings(&settings.mount);

            let report = HealthChecker::new(&mounts, &mounter, &unmounter)
                .settle(Duration::from_secs(settings.mount.settle_secs))
                .run(&target)?;

            println!("{}", report.outcome);
            Ok(report.outcome.exit_code())
        }

        Commands::Completion { .. } => Ok(0),
    }
}

/// Real service manager, or one that only writes files
fn service_manager(no_activate: bool) -> Box<dyn ServiceManager> {
    if no_activate {
        Box::new(NoopServiceManager)
    } else {
        Box::new(Systemctl)
    }
}

/// Path of the running binary, baked into generated scripts
fn current_exe() -> Result<PathBuf> {
    Ok(std::env::current_exe()?)
}

/// Absolute form of a path, so generated scripts work from any directory
fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// Settings that fail to load end a `check` with a logged `config-invalid`
///
/// Every other command reports the error as usual.
fn settings_failure(cli: &Cli, error: Error) -> Result<i32> {
    let Commands::Check { name, log_file, .. } = &cli.command else {
        return Err(error);
    };

    let log_path = match (log_file, name) {
        (Some(path), _) => path.clone(),
        (None, Some(name)) if server::is_valid_name(name) => Layout::default().log_path(name),
        _ => return Err(error),
    };

    let report = checker::settings_failure(&log_path, &cli.settings, &error)?;
    println!("{}", report.outcome);
    Ok(report.outcome.exit_code())
}

/// Fill in a server config from flags and, unless disabled, prompts
fn gather_config(
    name: Option<&str>,
    fields: &ServerArgs,
    current: Option<&ServerConfig>,
    layout: &Layout,
) -> Result<ServerConfig> {
    if fields.non_interactive {
        prompt::config_from_args(name, fields, current, layout)
    } else {
        prompt::complete_config(&mut Prompter::stdio(), name, fields, current, layout)
    }
}

/// Resolve the files a `check` invocation works on
fn check_target(
    layout: &Layout,
    name: Option<String>,
    config_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
    lock_dir: Option<PathBuf>,
) -> Result<CheckTarget> {
    match (name, config_file, log_file) {
        (Some(name), _, _) => {
            if !server::is_valid_name(&name) {
                return Err(Error::InvalidName(name));
            }
            let mut target = CheckTarget::for_server(layout, &name);
            if lock_dir.is_some() {
                target.lock_dir = lock_dir;
            }
            Ok(target)
        }
        (None, Some(config_path), Some(log_path)) => Ok(CheckTarget {
            config_path,
            log_path,
            lock_dir,
        }),
        (None, None, _) => Err(Error::MissingField("--config-file")),
        (None, Some(_), None) => Err(Error::MissingField("--log-file")),
    }
}

/// Status of one or every registered server
fn collect_statuses(
    layout: &Layout,
    mounts: &SystemMounts,
    only: Option<&str>,
    deep: bool,
) -> Result<Vec<ServerStatus>> {
    let registry = Registry::new(layout);
    let manager = NoopServiceManager;
    let unmounter = SystemUnmounter;
    let provisioner = Provisioner::new(layout, &manager, mounts, &unmounter, PathBuf::new());

    let configs: Vec<ServerConfig> = match only {
        Some(name) => vec![registry.read(name)?],
        None => registry
            .list()?
            .filter_map(|r| match r {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable server record");
                    None
                }
            })
            .collect(),
    };

    Ok(configs
        .iter()
        .map(|c| ServerStatus::probe(c, layout, mounts, provisioner.trigger(&c.name), deep))
        .collect())
}

fn print_status(s: &ServerStatus) {
    println!("{}", s.name);
    println!("  Remote:      {}", s.remote);
    println!("  Mount point: {}", s.mount_point);
    println!("  Interval:    every {} min", s.interval_minutes);
    println!(
        "  Trigger:     {}",
        s.trigger.as_deref().unwrap_or("not installed")
    );
    match &s.access {
        Some(access) => println!("  State:       {} ({})", s.state(), access),
        None => println!("  State:       {}", s.state()),
    }
    println!(
        "  Last log:    {}",
        s.last_log.as_deref().unwrap_or("(no checks logged yet)")
    );
}

fn print_artifacts(provisioner: &Provisioner, layout: &Layout, config: &ServerConfig) {
    println!("  Config:  {}", layout.config_path(&config.name).display());
    println!("  Script:  {}", layout.script_path(&config.name).display());
    println!("  Log:     {}", layout.log_path(&config.name).display());
    if let Some(trigger) = provisioner.trigger(&config.name) {
        println!("  Trigger: {} (every {} min)", trigger, config.check_interval);
    }
    println!("  Mount:   {}", config.mount_point.display());
}
