//! Config registry
//!
//! CRUD over `ServerConfig` records, one `<name>.conf` file per server under
//! the layout's servers directory. Operations are expected to run one at a
//! time from a single operator session, so there is no locking.

use crate::error::{Error, Result};
use crate::manifest::Layout;
use crate::server::{self, ServerConfig, is_valid_name};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// File-backed registry of server definitions
#[derive(Debug, Clone)]
pub struct Registry {
    /// Directory holding `<name>.conf` files
    dir: PathBuf,
}

impl Registry {
    /// Create a registry over the layout's servers directory
    pub fn new(layout: &Layout) -> Self {
        Self {
            dir: layout.servers_dir(),
        }
    }

    /// Path of the record file for `name`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.conf", name))
    }

    /// Check whether a record exists
    pub fn exists(&self, name: &str) -> bool {
        is_valid_name(name) && self.path_for(name).is_file()
    }

    /// Persist a new record
    pub fn create(&self, config: &ServerConfig) -> Result<ServerConfig> {
        if !is_valid_name(&config.name) {
            return Err(Error::InvalidName(config.name.clone()));
        }
        if self.exists(&config.name) {
            return Err(Error::DuplicateName(config.name.clone()));
        }
        config.validate()?;

        self.write(config)?;
        tracing::debug!(server = %config.name, path = %self.path_for(&config.name).display(), "created server record");
        Ok(config.clone())
    }

    /// Read a record by name
    pub fn read(&self, name: &str) -> Result<ServerConfig> {
        if !is_valid_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }

        let path = self.path_for(name);
        if !path.is_file() {
            return Err(Error::NotFound(name.to_string()));
        }

        server::load(&path)
    }

    /// Replace every field of an existing record
    pub fn update(&self, name: &str, config: &ServerConfig) -> Result<ServerConfig> {
        if !self.exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        if config.name != name {
            return Err(Error::InvalidField {
                field: "SERVER_NAME",
                message: format!("cannot rename '{}' to '{}'", name, config.name),
            });
        }
        config.validate()?;

        self.write(config)?;
        tracing::debug!(server = %name, "updated server record");
        Ok(config.clone())
    }

    /// Remove a record, returning what was stored
    ///
    /// A record that no longer parses is still removed; the returned value is
    /// `None` in that case so callers fall back to name-derived teardown.
    pub fn delete(&self, name: &str) -> Result<Option<ServerConfig>> {
        if !self.exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }

        let path = self.path_for(name);
        let previous = match server::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "removing unreadable server record");
                None
            }
        };

        fs::remove_file(&path)?;
        tracing::debug!(server = %name, "deleted server record");
        Ok(previous)
    }

    /// Names of every record, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("conf") || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && is_valid_name(stem)
            {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Lazily iterate over every record
    ///
    /// The directory is re-read on each call; each item is parsed only when
    /// the iterator reaches it.
    pub fn list(&self) -> Result<impl Iterator<Item = Result<ServerConfig>> + '_> {
        let names = self.names()?;
        Ok(names.into_iter().map(move |name| self.read(&name)))
    }

    /// Write a record atomically (temp file + rename)
    fn write(&self, config: &ServerConfig) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&config.name);
        let tmp = self.dir.join(format!(".{}.conf.tmp", config.name));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(config.to_file_contents().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(dir.path());
        let registry = Registry::new(&layout);
        (dir, registry)
    }

    fn plex() -> ServerConfig {
        ServerConfig::new("plex-media", "/k", "u@h", "/r", "/mnt/plex-media")
    }

    #[test]
    fn test_create_then_read() {
        let (_dir, registry) = registry();
        let created = registry.create(&plex()).unwrap();
        assert_eq!(created, plex());
        assert_eq!(registry.read("plex-media").unwrap(), plex());
    }

    #[test]
    fn test_delete_then_read() {
        let (_dir, registry) = registry();
        registry.create(&plex()).unwrap();
        let removed = registry.delete("plex-media").unwrap();
        assert_eq!(removed, Some(plex()));
        assert!(matches!(registry.read("plex-media"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_duplicate_leaves_existing_untouched() {
        let (_dir, registry) = registry();
        registry.create(&plex()).unwrap();

        let other = ServerConfig::new("plex-media", "/other", "x@y", "/z", "/mnt/other");
        assert!(matches!(registry.create(&other), Err(Error::DuplicateName(_))));
        assert_eq!(registry.read("plex-media").unwrap(), plex());
    }

    #[test]
    fn test_invalid_name() {
        let (_dir, registry) = registry();
        let bad = ServerConfig::new("bad name!", "/k", "u@h", "/r", "/mnt/bad");
        assert!(matches!(registry.create(&bad), Err(Error::InvalidName(_))));
        assert!(matches!(registry.read("bad name!"), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_update_replaces_fields() {
        let (_dir, registry) = registry();
        registry.create(&plex()).unwrap();

        let updated = ServerConfig::new("plex-media", "/k2", "v@h2", "/r2", "/srv/plex").with_interval(15);
        registry.update("plex-media", &updated).unwrap();
        assert_eq!(registry.read("plex-media").unwrap(), updated);
    }

    #[test]
    fn test_update_missing() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.update("plex-media", &plex()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_missing() {
        let (_dir, registry) = registry();
        assert!(matches!(registry.delete("ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_is_sorted_and_restartable() {
        let (_dir, registry) = registry();
        assert_eq!(registry.list().unwrap().count(), 0);

        for name in ["zeta", "alpha", "mid"] {
            let config = ServerConfig::new(name, "/k", "u@h", "/r", format!("/mnt/{}", name));
            registry.create(&config).unwrap();
        }
        fs::write(registry.dir.join("README"), "not a record").unwrap();

        let names: Vec<String> = registry
            .list()
            .unwrap()
            .map(|r| r.unwrap().name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);

        registry.delete("mid").unwrap();
        assert_eq!(registry.list().unwrap().count(), 2);
    }

    #[test]
    fn test_list_reports_broken_record() {
        let (_dir, registry) = registry();
        registry.create(&plex()).unwrap();
        fs::write(registry.path_for("broken"), "USER_HOST=\n").unwrap();

        let results: Vec<_> = registry.list().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
