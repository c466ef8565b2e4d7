//! Sound profiles
//!
//! A profile is a directory under `<root>/profiles/` holding a
//! `profile.yaml` descriptor and the audio (or video) assets it references.
//! The descriptor names a set of sources and maps key or button names onto
//! them, with an optional default for everything else.
//!
//! Profiles are only ever constructed by [`validation::validate`], so a
//! [`Profile`] value always satisfies the reference and asset invariants.

pub mod store;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub use store::ProfileStore;

/// File name of the descriptor inside a profile directory
pub const DESCRIPTOR_FILE: &str = "profile.yaml";

/// Which kind of input device a profile (and a playback task) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Keyboard,
    Mouse,
}

impl DeviceClass {
    /// Name of the mapping section used by this device class
    pub fn section(self) -> &'static str {
        match self {
            DeviceClass::Keyboard => "keys",
            DeviceClass::Mouse => "buttons",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Keyboard => "keyboard",
            DeviceClass::Mouse => "mouse",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the sources of a profile are stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    /// One audio file (or press/release pair) per source
    Files,
    /// Time ranges cut out of a single shared video container
    VideoExtract,
    /// One press-only audio file per source
    OneShot,
}

impl ProfileType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "files" => Some(ProfileType::Files),
            "video-extract" => Some(ProfileType::VideoExtract),
            "one-shot" => Some(ProfileType::OneShot),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileType::Files => "files",
            ProfileType::VideoExtract => "video-extract",
            ProfileType::OneShot => "one-shot",
        }
    }
}

/// Descriptive metadata from the `profile` block
#[derive(Debug, Clone)]
pub struct ProfileMeta {
    pub name: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub device: DeviceClass,
    pub kind: ProfileType,
    /// Container asset for video-extract profiles
    pub video: Option<String>,
}

/// Where the audio for a source comes from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    /// A single asset, played on press only
    Single(String),
    /// A press asset with an optional release asset
    PressRelease {
        press: String,
        release: Option<String>,
    },
    /// A window into the profile's shared container, in seconds
    Range { start: f64, end: Option<f64> },
}

/// A named logical sound
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub spec: SourceSpec,
}

/// A reference from a mapping to one or more source ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundRef {
    One(String),
    /// Uniform random choice at resolution time
    Choice(Vec<String>),
}

impl SoundRef {
    /// All source ids this reference may resolve to
    pub fn ids(&self) -> Vec<&str> {
        match self {
            SoundRef::One(id) => vec![id.as_str()],
            SoundRef::Choice(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// An explicit key/button to sound mapping
#[derive(Debug, Clone)]
pub struct Mapping {
    pub id: Option<String>,
    /// Canonical (lowercase) key or button names
    pub inputs: Vec<String>,
    pub sound: SoundRef,
}

impl Mapping {
    pub fn matches(&self, name: &str) -> bool {
        self.inputs.iter().any(|input| input == name)
    }
}

/// The `keys` or `buttons` section of a profile
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    pub default: Option<SoundRef>,
    /// Scanned in declaration order, first match wins
    pub other: Vec<Mapping>,
}

/// A validated profile
#[derive(Debug, Clone)]
pub struct Profile {
    pub meta: ProfileMeta,
    pub sources: Vec<Source>,
    pub mappings: MappingSet,
    dir: PathBuf,
}

impl Profile {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn device(&self) -> DeviceClass {
        self.meta.device
    }

    pub fn kind(&self) -> ProfileType {
        self.meta.kind
    }

    /// Directory the profile was loaded from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve an asset reference relative to the profile directory
    pub fn asset_path(&self, asset: &str) -> PathBuf {
        self.dir.join(asset)
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }
}
