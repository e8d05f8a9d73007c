//! Interactive prompts for server fields
//!
//! Fields given as flags are used as-is; the rest are asked for on the
//! terminal with a default in brackets (the current value when editing).
//! With `--non-interactive` a missing field without a default is an error.

use crate::cli::ServerArgs;
use crate::error::{Error, Result};
use crate::manifest::Layout;
use crate::server::{ConfigKey, DEFAULT_CHECK_INTERVAL, ServerConfig, is_valid_name};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

/// Suggested key when none is configured yet
pub const DEFAULT_SSH_KEY: &str = "/root/.ssh/id_ed25519";

/// Line-based question/answer session
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<io::StdinLock<'static>, io::Stdout> {
    /// Prompt on the process's terminal
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Read one trimmed line; end of input aborts
    fn read_answer(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(Error::Aborted);
        }
        Ok(line.trim().to_string())
    }

    /// Ask until `check` accepts a non-empty answer (or the default)
    pub fn ask_with<F>(&mut self, label: &str, default: Option<&str>, check: F) -> Result<String>
    where
        F: Fn(&str) -> std::result::Result<(), String>,
    {
        loop {
            match default {
                Some(d) => write!(self.output, "{} [{}]: ", label, d)?,
                None => write!(self.output, "{}: ", label)?,
            }
            self.output.flush()?;

            let answer = self.read_answer()?;
            let value = match (answer.is_empty(), default) {
                (false, _) => answer,
                (true, Some(d)) => d.to_string(),
                (true, None) => {
                    writeln!(self.output, "  A value is required.")?;
                    continue;
                }
            };

            match check(&value) {
                Ok(()) => return Ok(value),
                Err(msg) => writeln!(self.output, "  {}", msg)?,
            }
        }
    }

    /// Ask for any non-empty string
    pub fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String> {
        self.ask_with(label, default, |_| Ok(()))
    }

    /// Ask for a value parsed with `FromStr`
    pub fn ask_parsed<T>(&mut self, label: &str, default: Option<&str>) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let answer = self.ask_with(label, default, |s| {
            s.parse::<T>().map(|_| ()).map_err(|e| format!("Invalid value: {}", e))
        })?;
        answer
            .parse::<T>()
            .map_err(|e| Error::InvalidField {
                field: "input",
                message: e.to_string(),
            })
    }

    /// Yes/no question
    pub fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            write!(self.output, "{} [{}]: ", question, hint)?;
            self.output.flush()?;

            match self.read_answer()?.to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "  Please answer y or n.")?,
            }
        }
    }
}

/// Build a config from flags, prompting for whatever is missing
///
/// `current` supplies defaults when editing an existing server.
pub fn complete_config<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    name: Option<&str>,
    args: &ServerArgs,
    current: Option<&ServerConfig>,
    layout: &Layout,
) -> Result<ServerConfig> {
    let name = match name {
        Some(n) => n.to_string(),
        None => prompter.ask_with("Server name", None, |s| {
            if is_valid_name(s) {
                Ok(())
            } else {
                Err("Use only letters, digits, '-' and '_'.".to_string())
            }
        })?,
    };

    let ssh_key = match &args.ssh_key {
        Some(k) => k.clone(),
        None => {
            let default = current
                .map(|c| c.ssh_key.display().to_string())
                .unwrap_or_else(|| DEFAULT_SSH_KEY.to_string());
            PathBuf::from(prompter.ask("SSH key", Some(&default))?)
        }
    };

    let user_host = match &args.user_host {
        Some(u) => u.clone(),
        None => prompter.ask_with(
            "Remote login (user@host)",
            current.map(|c| c.user_host.as_str()),
            |s| match s.split_once('@') {
                Some((user, host)) if !user.is_empty() && !host.is_empty() => Ok(()),
                _ => Err("Expected user@host.".to_string()),
            },
        )?,
    };

    let remote_path = match &args.remote_path {
        Some(r) => r.clone(),
        None => prompter.ask("Remote path", current.map(|c| c.remote_path.as_str()))?,
    };

    let mount_point = match &args.mount_point {
        Some(m) => m.clone(),
        None => {
            let default = current
                .map(|c| c.mount_point.clone())
                .unwrap_or_else(|| layout.default_mount_point(&name));
            PathBuf::from(prompter.ask("Local mount point", Some(&default.display().to_string()))?)
        }
    };

    let check_interval = match args.interval {
        Some(i) => i,
        None => {
            let default = current
                .map(|c| c.check_interval)
                .unwrap_or(DEFAULT_CHECK_INTERVAL)
                .to_string();
            loop {
                let minutes: u32 = prompter.ask_parsed("Check interval in minutes", Some(&default))?;
                if minutes >= 1 {
                    break minutes;
                }
                writeln!(prompter.output, "  The interval must be at least 1 minute.")?;
            }
        }
    };

    Ok(ServerConfig {
        name,
        ssh_key,
        user_host,
        remote_path,
        mount_point,
        check_interval,
    })
}

/// Build a config from flags alone
///
/// Mount point and interval fall back to `current` or the defaults; the
/// other fields must be given unless `current` has them.
pub fn config_from_args(
    name: Option<&str>,
    args: &ServerArgs,
    current: Option<&ServerConfig>,
    layout: &Layout,
) -> Result<ServerConfig> {
    let name = name
        .map(str::to_string)
        .ok_or(Error::MissingField(ConfigKey::ServerName.as_str()))?;

    let ssh_key = args
        .ssh_key
        .clone()
        .or_else(|| current.map(|c| c.ssh_key.clone()))
        .ok_or(Error::MissingField(ConfigKey::SshKey.as_str()))?;
    let user_host = args
        .user_host
        .clone()
        .or_else(|| current.map(|c| c.user_host.clone()))
        .ok_or(Error::MissingField(ConfigKey::UserHost.as_str()))?;
    let remote_path = args
        .remote_path
        .clone()
        .or_else(|| current.map(|c| c.remote_path.clone()))
        .ok_or(Error::MissingField(ConfigKey::RemotePath.as_str()))?;
    let mount_point = args
        .mount_point
        .clone()
        .or_else(|| current.map(|c| c.mount_point.clone()))
        .unwrap_or_else(|| layout.default_mount_point(&name));
    let check_interval = args
        .interval
        .or_else(|| current.map(|c| c.check_interval))
        .unwrap_or(DEFAULT_CHECK_INTERVAL);

    Ok(ServerConfig {
        name,
        ssh_key,
        user_host,
        remote_path,
        mount_point,
        check_interval,
    })
}
