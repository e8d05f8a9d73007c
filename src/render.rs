//! Artifact templates
//!
//! Templates live in `templates/` and are embedded at compile time. Each one
//! declares the variables it needs; `${var}` placeholders are substituted in
//! a single pass, so values are never themselves expanded. Placeholders with
//! no value in the context are left as-is.

use crate::error::{Error, Result};
use crate::manifest::Layout;
use crate::server::ServerConfig;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// An embedded template and the variables it requires
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub name: &'static str,
    body: &'static str,
    required: &'static [&'static str],
}

pub const CHECK_SCRIPT: Template = Template {
    name: "check.sh",
    body: include_str!("../templates/check.sh.in"),
    required: &["name", "exe", "settings", "config_file", "log_file", "lock_args"],
};

pub const SERVICE_UNIT: Template = Template {
    name: "sentry.service",
    body: include_str!("../templates/sentry.service.in"),
    required: &["name", "script"],
};

pub const TIMER_UNIT: Template = Template {
    name: "sentry.timer",
    body: include_str!("../templates/sentry.timer.in"),
    required: &["name", "interval", "unit"],
};

pub const CRON_ENTRY: Template = Template {
    name: "cron",
    body: include_str!("../templates/cron.in"),
    required: &["name", "schedule", "script"],
};

pub const LOGROTATE: Template = Template {
    name: "logrotate",
    body: include_str!("../templates/logrotate.in"),
    required: &["log_dir"],
};

/// Variables available to a template
#[derive(Debug, Default, Clone)]
pub struct Context {
    vars: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    /// Get a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// Replace every `${name}` that has a value; leave the rest untouched
    pub fn substitute(&self, input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.get(name) {
                        Some(value) => result.push_str(value),
                        None => {
                            result.push_str("${");
                            result.push_str(name);
                            result.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        result.push_str(rest);
        result
    }
}

impl Template {
    /// Render with `ctx`, failing if a required variable is missing
    pub fn render(&self, ctx: &Context) -> Result<String> {
        if let Some(missing) = self.required.iter().find(|v| ctx.get(v).is_none()) {
            return Err(Error::TemplateRender {
                template: self.name.to_string(),
                variable: missing.to_string(),
            });
        }
        Ok(ctx.substitute(self.body))
    }
}

/// Per-server check script exec'ing `exe check` with baked-in paths
///
/// `settings` is the settings file the scheduled check loads its mount
/// options and settle delay from.
pub fn check_script(
    layout: &Layout,
    config: &ServerConfig,
    exe: &Path,
    settings: &Path,
) -> Result<String> {
    let lock_args = match &layout.lock_dir {
        Some(dir) => format!(" --lock-dir \"{}\"", dir.display()),
        None => String::new(),
    };

    let ctx = Context::new()
        .with("name", &config.name)
        .with("exe", exe.display().to_string())
        .with("settings", settings.display().to_string())
        .with("config_file", layout.config_path(&config.name).display().to_string())
        .with("log_file", layout.log_path(&config.name).display().to_string())
        .with("lock_args", lock_args);
    CHECK_SCRIPT.render(&ctx)
}

/// systemd oneshot service running the check script
pub fn service_unit(config: &ServerConfig, script: &Path) -> Result<String> {
    let ctx = Context::new()
        .with("name", &config.name)
        .with("script", script.display().to_string());
    SERVICE_UNIT.render(&ctx)
}

/// systemd timer firing the service every `check_interval` minutes
pub fn timer_unit(layout: &Layout, config: &ServerConfig) -> Result<String> {
    let ctx = Context::new()
        .with("name", &config.name)
        .with("interval", config.check_interval.to_string())
        .with("unit", layout.unit_name(&config.name));
    TIMER_UNIT.render(&ctx)
}

/// cron.d entry running the check script as root
pub fn cron_entry(config: &ServerConfig, script: &Path) -> Result<String> {
    let ctx = Context::new()
        .with("name", &config.name)
        .with("schedule", cron_schedule(config.check_interval)?)
        .with("script", script.display().to_string());
    CRON_ENTRY.render(&ctx)
}

/// Shared logrotate policy for every server log
pub fn logrotate(layout: &Layout) -> Result<String> {
    let ctx = Context::new().with("log_dir", layout.log_dir.display().to_string());
    LOGROTATE.render(&ctx)
}

/// Write a generated artifact with the given permission bits
pub fn write_artifact(path: &Path, contents: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Cron schedule for an interval in minutes
///
/// Cron steps restart at the top of each hour and day, so only intervals
/// dividing an hour, whole hours dividing a day, or a full day keep an even
/// spacing.
pub fn cron_schedule(minutes: u32) -> Result<String> {
    match minutes {
        1 => Ok("* * * * *".to_string()),
        m if (2..60).contains(&m) && 60 % m == 0 => Ok(format!("*/{} * * * *", m)),
        60 => Ok("0 * * * *".to_string()),
        m if m > 60 && m < 1440 && m % 60 == 0 && 24 % (m / 60) == 0 => {
            Ok(format!("0 */{} * * *", m / 60))
        }
        1440 => Ok("0 0 * * *".to_string()),
        _ => Err(invalid_interval(minutes)),
    }
}

fn invalid_interval(minutes: u32) -> Error {
    Error::InvalidField {
        field: "CHECK_INTERVAL",
        message: format!(
            "{} minutes cannot be scheduled evenly with cron \
             (use a divisor of 60 minutes, a divisor of 24 hours, or 1440)",
            minutes
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn plex() -> ServerConfig {
        ServerConfig::new(
            "plex-media",
            "/root/.ssh/id_ed25519",
            "u@h",
            "/r",
            "/mnt/plex-media",
        )
    }

    #[test]
    fn test_substitute_leaves_unknown_placeholders() {
        let ctx = Context::new().with("name", "plex");
        assert_eq!(ctx.substitute("${name} ${other} $name"), "plex ${other} $name");
        assert_eq!(ctx.substitute("tail ${name"), "tail ${name");
    }

    #[test]
    fn test_substitute_does_not_expand_values() {
        let ctx = Context::new().with("a", "${b}").with("b", "x");
        assert_eq!(ctx.substitute("${a}${b}"), "${b}x");
    }

    #[test]
    fn test_missing_variable_fails() {
        let err = TIMER_UNIT
            .render(&Context::new().with("name", "plex"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TemplateRender { ref template, ref variable }
                if template == "sentry.timer" && variable == "interval"
        ));
    }

    #[test]
    fn test_check_script() {
        let layout = Layout::default();
        let script = check_script(
            &layout,
            &plex(),
            &PathBuf::from("/usr/local/bin/sshfs-sentry"),
            Path::new("/etc/sshfs-sentry/sentry.toml"),
        )
        .unwrap();

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(
            "exec \"/usr/local/bin/sshfs-sentry\" check \
             --settings \"/etc/sshfs-sentry/sentry.toml\" \
             --config-file \"/etc/sshfs-sentry/servers/plex-media.conf\" \
             --log-file \"/var/log/sshfs-sentry/plex-media.log\" \
             --lock-dir \"/run/sshfs-sentry\""
        ));
        assert!(!script.contains("${"));
    }

    #[test]
    fn test_check_script_without_lock_dir() {
        let layout = Layout {
            lock_dir: None,
            ..Layout::default()
        };
        let script = check_script(
            &layout,
            &plex(),
            Path::new("/bin/sshfs-sentry"),
            Path::new("/srv/sentry.toml"),
        )
        .unwrap();
        assert!(script.contains("--settings \"/srv/sentry.toml\""));
        assert!(!script.contains("--lock-dir"));
        assert!(script.trim_end().ends_with("plex-media.log\""));
    }

    #[test]
    fn test_systemd_units() {
        let layout = Layout::default();
        let config = plex().with_interval(10);

        let service = service_unit(&config, &layout.script_path("plex-media")).unwrap();
        assert!(service.contains("Type=oneshot"));
        assert!(service.contains("User=root"));
        assert!(service.contains("ExecStart=/usr/local/lib/sshfs-sentry/check-plex-media.sh"));

        let timer = timer_unit(&layout, &config).unwrap();
        assert!(timer.contains("OnBootSec=1min"));
        assert!(timer.contains("OnUnitActiveSec=10min"));
        assert!(timer.contains("Persistent=true"));
        assert!(timer.contains("Unit=sshfs-sentry-plex-media.service"));
    }

    #[test]
    fn test_cron_entry() {
        let script = Layout::default().script_path("plex-media");
        let entry = cron_entry(&plex(), &script).unwrap();
        assert!(entry.contains("*/5 * * * * root /usr/local/lib/sshfs-sentry/check-plex-media.sh"));
    }

    #[test]
    fn test_cron_schedule() {
        assert_eq!(cron_schedule(1).unwrap(), "* * * * *");
        assert_eq!(cron_schedule(15).unwrap(), "*/15 * * * *");
        assert_eq!(cron_schedule(60).unwrap(), "0 * * * *");
        assert_eq!(cron_schedule(180).unwrap(), "0 */3 * * *");
        assert_eq!(cron_schedule(1440).unwrap(), "0 0 * * *");
        assert_eq!(cron_schedule(720).unwrap(), "0 */12 * * *");
        assert!(cron_schedule(0).is_err());
        assert!(cron_schedule(90).is_err());
    }

    #[test]
    fn test_cron_schedule_rejects_uneven_steps() {
        // */7 would fire at :56 and again at :00
        for minutes in [7, 25, 45, 300, 600, 1000] {
            assert!(
                matches!(
                    cron_schedule(minutes),
                    Err(Error::InvalidField { field: "CHECK_INTERVAL", .. })
                ),
                "{} accepted",
                minutes
            );
        }
    }

    #[test]
    fn test_write_artifact_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin/check-plex-media.sh");

        write_artifact(&path, "#!/bin/sh\n", 0o755).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(fs::read_to_string(&path).unwrap(), "#!/bin/sh\n");
    }

    #[test]
    fn test_logrotate_policy() {
        let policy = logrotate(&Layout::default()).unwrap();
        assert!(policy.contains("/var/log/sshfs-sentry/*.log {"));
        for directive in ["daily", "rotate 7", "compress", "missingok", "notifempty"] {
            assert!(policy.contains(directive), "missing {}", directive);
        }
    }
}
