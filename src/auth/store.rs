//! Filesystem-backed registry of named credential profiles
//!
//! Each profile lives in its own file named after its alias. A symbolic link
//! named `current` points at the selected profile's file; when the link is
//! absent no profile is selected.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::credentials::{
    CURRENT_ALIAS, Profile, StoredCredentials, is_scratch_name, validate_alias,
};
use crate::error::{Result, SpacectlError};

/// Directory under the user's home holding profiles
const STORE_DIR_NAME: &str = ".spacelift";

// Distinguishes concurrent temp files created by one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Profile store rooted at one directory
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    /// Create a store at the default location (`~/.spacelift`)
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Self::default_root(),
        }
    }

    /// Create a store with a custom root directory
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root directory
    #[must_use]
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STORE_DIR_NAME)
    }

    /// Root directory of this store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `alias`
    #[must_use]
    pub fn profile_path(&self, alias: &str) -> PathBuf {
        self.root.join(alias)
    }

    /// Path of the `current` link
    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_ALIAS)
    }

    /// Create the root directory with user-only permissions if it is missing.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the directory cannot be created.
    pub fn init(&self) -> Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        builder
            .create(&self.root)
            .map_err(|e| SpacectlError::filesystem("creating profile directory", &self.root, e))
    }

    /// All stored profiles, ordered by alias.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or any profile file cannot be read.
    pub fn list(&self) -> Result<Vec<Profile>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SpacectlError::filesystem(
                    "listing profiles in",
                    &self.root,
                    e,
                ));
            }
        };

        let mut aliases = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| SpacectlError::filesystem("listing profiles in", &self.root, e))?;
            let Some(alias) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // Skips the `current` link and in-flight temp files.
            if alias == CURRENT_ALIAS || is_scratch_name(&alias) {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| SpacectlError::filesystem("inspecting", entry.path(), e))?;
            if file_type.is_file() {
                aliases.push(alias);
            }
        }
        aliases.sort();

        aliases.iter().map(|alias| self.read_profile(alias)).collect()
    }

    /// Load the profile named `alias`.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::ProfileNotFound` if it does not exist, or a
    /// validation error for an empty or reserved alias.
    pub fn get(&self, alias: &str) -> Result<Profile> {
        validate_alias(alias)?;
        self.read_profile(alias)
    }

    /// The currently selected profile, if any.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::DanglingCurrent` if the `current` link points at
    /// a missing file.
    pub fn current(&self) -> Result<Option<Profile>> {
        let Some(alias) = self.current_alias()? else {
            return Ok(None);
        };

        match self.read_profile(&alias) {
            Ok(profile) => Ok(Some(profile)),
            Err(SpacectlError::ProfileNotFound(_)) => {
                Err(SpacectlError::DanglingCurrent(self.current_path()))
            }
            Err(e) => Err(e),
        }
    }

    /// Alias the `current` link points at, without loading the profile
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the link exists but cannot be read.
    pub fn current_alias(&self) -> Result<Option<String>> {
        let link = self.current_path();
        let target = match std::fs::read_link(&link) {
            Ok(target) => target,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SpacectlError::filesystem("reading link", &link, e)),
        };

        let alias = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SpacectlError::DanglingCurrent(link.clone()))?;
        Ok(Some(alias.to_string()))
    }

    /// Validate and persist `profile`, then select it as current.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed profile, or a filesystem
    /// error if the file or link cannot be written.
    pub fn create(&self, profile: &Profile) -> Result<()> {
        self.save(profile)?;
        self.select(&profile.alias)
    }

    /// Validate and persist `profile` without changing the selection.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed profile, or a filesystem
    /// error if the file cannot be written.
    pub fn save(&self, profile: &Profile) -> Result<()> {
        profile.validate()?;
        self.init()?;

        let path = self.profile_path(&profile.alias);
        let content = serde_json::to_vec_pretty(&profile.credentials)?;
        write_private(&self.root, &path, &content)?;
        tracing::debug!(alias = %profile.alias, kind = %profile.credentials.kind, "profile written");
        Ok(())
    }

    /// Point `current` at an existing profile.
    ///
    /// The link is replaced through a rename, so readers observe either the
    /// old or the new target and never a link to a missing file.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::ProfileNotFound` if no such profile exists.
    pub fn select(&self, alias: &str) -> Result<()> {
        validate_alias(alias)?;

        let path = self.profile_path(alias);
        if !path.is_file() {
            return Err(SpacectlError::profile_not_found(alias));
        }
        let target = std::path::absolute(&path)
            .map_err(|e| SpacectlError::filesystem("resolving", &path, e))?;

        let temp = self.temp_path(CURRENT_ALIAS);
        symlink_file(&target, &temp)
            .map_err(|e| SpacectlError::filesystem("creating link", &temp, e))?;

        let link = self.current_path();
        if let Err(e) = std::fs::rename(&temp, &link) {
            if let Err(cleanup) = std::fs::remove_file(&temp) {
                tracing::warn!(path = %temp.display(), "failed to remove temporary link: {cleanup}");
            }
            return Err(SpacectlError::filesystem("replacing link", &link, e));
        }

        tracing::debug!(alias, "profile selected");
        Ok(())
    }

    /// Remove a profile, unselecting it first if it is current.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::ProfileNotFound` if no such profile exists.
    pub fn delete(&self, alias: &str) -> Result<()> {
        validate_alias(alias)?;

        let path = self.profile_path(alias);
        if !path.is_file() {
            return Err(SpacectlError::profile_not_found(alias));
        }

        // The link goes first so it never outlives its target.
        if self.current_alias()?.as_deref() == Some(alias) {
            let link = self.current_path();
            std::fs::remove_file(&link)
                .map_err(|e| SpacectlError::filesystem("removing link", &link, e))?;
        }

        std::fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SpacectlError::profile_not_found(alias),
            _ => SpacectlError::filesystem("removing profile", &path, e),
        })?;

        tracing::debug!(alias, "profile deleted");
        Ok(())
    }

    /// Create a profile from a JSON credentials file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting profile is invalid.
    pub fn import(&self, alias: &str, source: &Path) -> Result<Profile> {
        let content = std::fs::read_to_string(source)
            .map_err(|e| SpacectlError::filesystem("reading", source, e))?;
        let credentials: StoredCredentials = serde_json::from_str(&content).map_err(|e| {
            SpacectlError::invalid_profile(format!("could not parse {}: {e}", source.display()))
        })?;

        let profile = Profile::new(alias, credentials);
        self.create(&profile)?;
        Ok(profile)
    }

    fn read_profile(&self, alias: &str) -> Result<Profile> {
        let path = self.profile_path(alias);
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SpacectlError::profile_not_found(alias),
            _ => SpacectlError::filesystem("reading profile", &path, e),
        })?;

        let credentials: StoredCredentials = serde_json::from_str(&content).map_err(|e| {
            SpacectlError::invalid_profile(format!("could not parse {}: {e}", path.display()))
        })?;

        Ok(Profile::new(alias, credentials))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{name}.{}.{n}.tmp", std::process::id()))
    }
}

/// Write `content` to `path` with mode 0600 via a temp file in `dir`
fn write_private(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp = dir.join(format!(".profile.{}.{n}.tmp", std::process::id()));

    let write = || -> std::io::Result<()> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp)?;
        file.write_all(content)?;
        file.sync_all()?;

        // umask can only narrow the mode; this pins it exactly.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&temp, path)
    };

    write().map_err(|e| {
        if let Err(cleanup) = std::fs::remove_file(&temp) {
            if cleanup.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %temp.display(), "failed to remove temporary file: {cleanup}");
            }
        }
        SpacectlError::filesystem("writing profile", path, e)
    })
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
