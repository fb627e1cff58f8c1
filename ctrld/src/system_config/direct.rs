use std::{
    fmt::Write as _,
    fs,
    io::{ErrorKind, Write as _},
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use tempfile::NamedTempFile;

use super::{OSConfig, OSConfigurator};
use crate::common::error::Error;

const RESOLV_CONF: &str = "/etc/resolv.conf";
const BACKUP_SUFFIX: &str = ".ctrld-backup";
const RESOLV_CONF_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Original {
    /// The file, or the symlink itself, was copied to the backup path.
    Saved,
    Missing,
}

/// Manages DNS by replacing resolv.conf. The first write saves the original
/// file, keeping a symlink as a symlink; `close` puts it back. Every write
/// goes through a temporary file renamed over the path, so readers see
/// either the old or the new file, and a symlink target is never modified.
pub struct DirectManager {
    path: PathBuf,
    backup: PathBuf,
    original: Mutex<Option<Original>>,
}

impl DirectManager {
    pub fn new() -> Self {
        Self::with_path(RESOLV_CONF)
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut backup = path.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        Self {
            path,
            backup: backup.into(),
            original: Mutex::new(None),
        }
    }

    fn save_original(&self) -> anyhow::Result<Original> {
        let meta = match fs::symlink_metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Original::Missing),
            Err(e) => {
                return Err(e).with_context(|| format!("inspecting {}", self.path.display()))
            }
        };

        match fs::remove_file(&self.backup) {
            Ok(()) => tracing::warn!(
                backup = %self.backup.display(),
                "dns: replacing stale resolv.conf backup"
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("removing stale backup"),
        }

        let ctx = || format!("backing up {} to {}", self.path.display(), self.backup.display());
        if meta.file_type().is_symlink() {
            let target = fs::read_link(&self.path).with_context(ctx)?;
            symlink(&target, &self.backup).with_context(ctx)?;
            tracing::debug!(target = %target.display(), "dns: resolv.conf is a symlink");
        } else {
            fs::copy(&self.path, &self.backup).with_context(ctx)?;
        }
        Ok(Original::Saved)
    }

    fn replace_resolv_conf(&self, content: &str) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(RESOLV_CONF_MODE))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl Default for DirectManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the resolv.conf body for `config`.
pub fn render_resolv_conf(config: &OSConfig) -> String {
    let mut out = String::from("# Generated by ctrld\n");
    for ns in config.ipv4_nameservers() {
        let _ = writeln!(out, "nameserver {}", ns);
    }
    for ns in config.ipv6_nameservers() {
        let _ = writeln!(out, "nameserver {}", ns);
    }
    let search: Vec<String> = config
        .search_domains
        .iter()
        .map(|d| d.to_string().trim_end_matches('.').to_owned())
        .filter(|d| !d.is_empty())
        .collect();
    if !search.is_empty() {
        let _ = writeln!(out, "search {}", search.join(" "));
    }
    out
}

impl OSConfigurator for DirectManager {
    fn set_dns(&self, config: &OSConfig) -> Result<(), Error> {
        if config.is_split_dns() {
            tracing::warn!(
                match_domains = ?config.match_domains,
                "dns: direct mode cannot do split dns, match domains are ignored"
            );
        }

        let mut original = self.original.lock().unwrap_or_else(|e| e.into_inner());
        if original.is_none() {
            *original = Some(self.save_original()?);
        }

        self.replace_resolv_conf(&render_resolv_conf(config))?;
        tracing::info!(path = %self.path.display(), "dns: wrote resolv.conf");
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        let mut original = self.original.lock().unwrap_or_else(|e| e.into_inner());
        match original.take() {
            Some(Original::Saved) => {
                fs::rename(&self.backup, &self.path)
                    .with_context(|| format!("restoring {}", self.path.display()))?;
            }
            Some(Original::Missing) => match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
            None => {}
        }
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "# Generated by NetworkManager\nnameserver 192.168.1.1\n";

    #[test]
    fn writes_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        fs::write(&path, ORIGINAL).unwrap();
        let manager = DirectManager::with_path(&path);

        let config = OSConfig::new(["127.0.0.1".parse().unwrap(), "::1".parse().unwrap()])
            .with_search_domains(["lan."])
            .unwrap();
        manager.set_dns(&config).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# Generated by ctrld\nnameserver 127.0.0.1\nnameserver ::1\nsearch lan\n"
        );

        // a second apply must not clobber the saved original
        manager
            .set_dns(&OSConfig::new(["127.0.0.2".parse().unwrap()]))
            .unwrap();
        manager.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), ORIGINAL);
        assert!(!manager.backup.exists());
    }

    #[test]
    fn symlinked_resolv_conf_is_restored_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("stub-resolv.conf");
        fs::write(&stub, ORIGINAL).unwrap();
        let path = dir.path().join("resolv.conf");
        symlink(&stub, &path).unwrap();
        let manager = DirectManager::with_path(&path);

        manager
            .set_dns(&OSConfig::new(["127.0.0.1".parse().unwrap()]))
            .unwrap();
        assert_eq!(fs::read_to_string(&stub).unwrap(), ORIGINAL);
        assert!(!fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# Generated by ctrld\nnameserver 127.0.0.1\n"
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, RESOLV_CONF_MODE);

        manager.close().unwrap();
        assert!(fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&path).unwrap(), stub);
        assert_eq!(fs::read_to_string(&path).unwrap(), ORIGINAL);
        assert!(fs::symlink_metadata(&manager.backup).is_err());
    }

    #[test]
    fn missing_original_is_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        let manager = DirectManager::with_path(&path);

        let config = OSConfig::new(["127.0.0.1".parse().unwrap()])
            .with_match_domains(["corp.example"])
            .unwrap();
        manager.set_dns(&config).unwrap();
        assert!(path.exists());
        assert!(!fs::read_to_string(&path).unwrap().contains("corp.example"));

        manager.close().unwrap();
        assert!(!path.exists());
        assert_eq!(manager.mode(), "direct");
    }
}
