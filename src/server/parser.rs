//! Server config file parsing
//!
//! The format looks like shell variable assignments but is never executed:
//! every line is either blank, a `#` comment, or `KEY=VALUE` with one of the
//! known keys. Anything else is rejected with its line number.

use crate::error::{Error, Result};
use crate::server::{ConfigKey, DEFAULT_CHECK_INTERVAL, ServerConfig};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, space0, space1},
    combinator::{opt, rest},
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Parse config file contents into a `ServerConfig`
///
/// Only the file syntax and the presence of values are checked here;
/// callers run `ServerConfig::validate` for the record invariants.
pub fn parse_config(content: &str, path: &Path) -> Result<ServerConfig> {
    let mut values: HashMap<ConfigKey, String> = HashMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key_name, value) = parse_line(line).map_err(|message| Error::ConfigParse {
            path: path.to_path_buf(),
            line: line_no,
            message,
        })?;

        let key = ConfigKey::from_name(key_name).ok_or_else(|| Error::ConfigParse {
            path: path.to_path_buf(),
            line: line_no,
            message: format!("unknown key '{}'", key_name),
        })?;

        if values.insert(key, value).is_some() {
            return Err(Error::ConfigParse {
                path: path.to_path_buf(),
                line: line_no,
                message: format!("duplicate key '{}'", key),
            });
        }
    }

    let required = |key: ConfigKey| -> Result<String> {
        match values.get(&key) {
            None => Err(Error::MissingField(key.as_str())),
            Some(v) if v.trim().is_empty() => Err(Error::EmptyField(key.as_str())),
            Some(v) => Ok(v.clone()),
        }
    };

    let name = required(ConfigKey::ServerName)?;
    let ssh_key = required(ConfigKey::SshKey)?;
    let user_host = required(ConfigKey::UserHost)?;
    let remote_path = required(ConfigKey::RemotePath)?;
    let mount_point = required(ConfigKey::MountPoint)?;

    let check_interval = match values.get(&ConfigKey::CheckInterval) {
        None => DEFAULT_CHECK_INTERVAL,
        Some(v) if v.trim().is_empty() => {
            return Err(Error::EmptyField(ConfigKey::CheckInterval.as_str()));
        }
        Some(v) => v.trim().parse::<u32>().map_err(|_| Error::InvalidField {
            field: ConfigKey::CheckInterval.as_str(),
            message: format!("expected a whole number of minutes, got '{}'", v),
        })?,
    };

    Ok(ServerConfig {
        name,
        ssh_key: PathBuf::from(ssh_key),
        user_host,
        remote_path,
        mount_point: PathBuf::from(mount_point),
        check_interval,
    })
}

/// Parse one non-comment line into its key and unquoted value
fn parse_line(line: &str) -> std::result::Result<(&str, String), String> {
    match parse_assignment(line) {
        Ok(("", parsed)) => Ok(parsed),
        Ok((remaining, _)) if remaining.starts_with('"') || remaining.starts_with('\'') => {
            Err("unterminated quoted value".into())
        }
        Ok((remaining, _)) => Err(format!("unexpected text '{}'", remaining)),
        Err(_) => {
            let value = line.split_once('=').map(|(_, v)| v.trim_start());
            match value {
                None => Err(format!("expected KEY=VALUE, got '{}'", line)),
                Some(v) if v.starts_with('"') || v.starts_with('\'') => {
                    Err("unterminated quoted value".into())
                }
                Some(_) => Err(format!("malformed assignment '{}'", line)),
            }
        }
    }
}

// Nom parsers

fn parse_assignment(input: &str) -> IResult<&str, (&str, String)> {
    let (input, _) = opt(pair(tag("export"), space1)).parse(input)?;
    let (input, key) = parse_key(input)?;
    let (input, _) = char('=').parse(input)?;
    let (input, value) = parse_value(input)?;
    let (input, _) = space0.parse(input)?;
    let (input, _) = opt(preceded(char('#'), rest)).parse(input)?;

    Ok((input, (key, value.to_string())))
}

fn parse_key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_').parse(input)
}

fn parse_value(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_till(|c: char| c == '"'), char('"')),
        delimited(char('\''), take_till(|c: char| c == '\''), char('\'')),
        take_till(|c: char| {
            c.is_whitespace()
                || matches!(c, '#' | '"' | '\'' | '$' | '`' | '\\' | '(' | ')' | ';' | '|' | '&')
        }),
    ))
    .parse(input)
}
