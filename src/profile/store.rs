//! On-disk profile store
//!
//! Profiles live in `<root>/profiles/<name>/profile.yaml`. Loading never
//! writes anything; adding copies a directory (or an unpacked `.zip`) in and
//! validates it, removing it again if validation fails.

use super::{validation, Profile, DESCRIPTOR_FILE};
use crate::error::ProfileError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Access to the profiles directory
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Create a store rooted at the given profiles directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn profile_dir(&self, name: &str) -> Result<PathBuf, ProfileError> {
        // Names are single path components
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(ProfileError::NotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Whether a profile directory with a descriptor exists
    pub fn exists(&self, name: &str) -> bool {
        self.profile_dir(name)
            .map(|dir| dir.join(DESCRIPTOR_FILE).is_file())
            .unwrap_or(false)
    }

    /// Load and validate a profile by name
    pub fn load(&self, name: &str) -> Result<Profile, ProfileError> {
        let dir = self.profile_dir(name)?;
        load_dir(name, &dir)
    }

    /// Names of every profile directory that carries a descriptor, sorted
    ///
    /// Invalid profiles are still listed; use [`ProfileStore::load`] to
    /// check them.
    pub fn list(&self) -> Result<Vec<String>, ProfileError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join(DESCRIPTOR_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a profile directory
    pub fn remove(&self, name: &str) -> Result<(), ProfileError> {
        let dir = self.profile_dir(name)?;
        if !dir.is_dir() {
            return Err(ProfileError::NotFound(name.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        tracing::info!("Removed profile '{}'", name);
        Ok(())
    }

    /// Copy a profile directory into the store and validate it
    ///
    /// The profile is stored under its descriptor name. If validation fails
    /// the copy is removed again and the validation error returned.
    pub fn add_from_dir(&self, source: &Path) -> Result<Profile, ProfileError> {
        self.install(&name_hint(source), source)
    }

    fn install(&self, hint: &str, source: &Path) -> Result<Profile, ProfileError> {
        // Validate in place first so we know the real name
        let candidate = load_dir(hint, source)?;
        let name = candidate.name().to_string();

        let target = self.profile_dir(&name)?;
        if target.exists() {
            return Err(ProfileError::AlreadyExists(name));
        }

        fs::create_dir_all(&self.root)?;
        if let Err(e) = copy_dir(source, &target) {
            let _ = fs::remove_dir_all(&target);
            return Err(e.into());
        }

        match load_dir(&name, &target) {
            Ok(profile) => {
                tracing::info!("Added profile '{}' from {:?}", name, source);
                Ok(profile)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&target);
                Err(e)
            }
        }
    }

    /// Install a profile from a directory or a `.zip` archive
    pub fn add(&self, source: &Path) -> Result<Profile, ProfileError> {
        if source.is_dir() {
            self.add_from_dir(source)
        } else {
            self.add_from_zip(source)
        }
    }

    /// Unpack a profile archive and install it like [`ProfileStore::add_from_dir`]
    ///
    /// The descriptor may sit at the archive root or inside a single
    /// top-level directory.
    pub fn add_from_zip(&self, archive: &Path) -> Result<Profile, ProfileError> {
        let archive_error = |reason: String| ProfileError::Archive {
            path: archive.display().to_string(),
            reason,
        };

        let file = fs::File::open(archive)?;
        let mut zip = ZipArchive::new(file).map_err(|e| archive_error(e.to_string()))?;
        let unpacked = tempfile::tempdir()?;
        zip.extract(unpacked.path())
            .map_err(|e| archive_error(e.to_string()))?;

        let root = descriptor_root(unpacked.path())?
            .ok_or_else(|| archive_error(format!("no {} found", DESCRIPTOR_FILE)))?;
        tracing::debug!("Unpacked {:?} into {:?}", archive, root);
        self.install(&name_hint(archive), &root)
    }

    /// Write an installed profile to a `.zip` archive
    ///
    /// Entries are stored relative to the profile directory, so the archive
    /// can be fed straight back into [`ProfileStore::add_from_zip`].
    pub fn export(&self, name: &str, output: &Path) -> Result<(), ProfileError> {
        let profile = self.load(name)?;

        let result = write_archive(profile.dir(), output);
        if result.is_err() {
            let _ = fs::remove_file(output);
        }
        result.map_err(|e| ProfileError::Archive {
            path: output.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!("Exported profile '{}' to {:?}", name, output);
        Ok(())
    }
}

/// Find the directory holding the descriptor in an unpacked archive
fn descriptor_root(dir: &Path) -> io::Result<Option<PathBuf>> {
    if dir.join(DESCRIPTOR_FILE).is_file() {
        return Ok(Some(dir.to_path_buf()));
    }

    let entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    let [only] = entries.as_slice() else {
        return Ok(None);
    };
    let nested = only.path();
    Ok(nested.join(DESCRIPTOR_FILE).is_file().then_some(nested))
}

/// Name used in errors until the descriptor has been read
fn name_hint(source: &Path) -> String {
    source
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("profile")
        .to_string()
}

fn write_archive(dir: &Path, output: &Path) -> zip::result::ZipResult<()> {
    let mut writer = ZipWriter::new(fs::File::create(output)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries: Vec<_> = fs::read_dir(&current)?.collect::<io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            // Archive paths always use forward slashes
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type()?.is_dir() {
                writer.add_directory(format!("{}/", name), options)?;
                pending.push(path);
            } else {
                writer.start_file(name, options)?;
                io::copy(&mut fs::File::open(&path)?, &mut writer)?;
            }
        }
    }

    writer.finish()?;
    Ok(())
}

/// Load and validate the descriptor in `dir`
pub fn load_dir(name: &str, dir: &Path) -> Result<Profile, ProfileError> {
    let descriptor = dir.join(DESCRIPTOR_FILE);
    if !dir.is_dir() {
        return Err(ProfileError::NotFound(name.to_string()));
    }
    if !descriptor.is_file() {
        return Err(ProfileError::invalid(
            name,
            format!("Missing {}.", DESCRIPTOR_FILE),
        ));
    }

    let contents = fs::read_to_string(&descriptor)?;
    let doc: serde_yml::Value =
        serde_yml::from_str(&contents).map_err(|e| ProfileError::Parse {
            profile: name.to_string(),
            reason: e.to_string(),
        })?;

    let profile = validation::validate(name, dir, &doc)?;
    tracing::debug!(
        "Loaded profile '{}' ({} {}, {} sources)",
        profile.name(),
        profile.device(),
        profile.kind().as_str(),
        profile.sources.len()
    );
    Ok(profile)
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&path, &dest)?;
        } else {
            fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}
