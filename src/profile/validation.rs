//! Profile descriptor validation
//!
//! Walks the raw YAML document in a fixed order and either produces a fully
//! typed [`Profile`] or the first problem found. No partially valid profile
//! ever leaves this module.

use super::{
    DeviceClass, Mapping, MappingSet, Profile, ProfileMeta, ProfileType, SoundRef, Source,
    SourceSpec, DESCRIPTOR_FILE,
};
use crate::error::ProfileError;
use serde_yml::{Mapping as YamlMap, Value};
use std::collections::HashSet;
use std::path::{Component, Path};

pub const SUPPORTED_AUDIO_FORMATS: &[&str] = &["wav", "mp3"];
pub const SUPPORTED_VIDEO_FORMATS: &[&str] = &["mp4"];

/// Validate a parsed descriptor found in `dir`
///
/// `fallback_name` (normally the directory name) is used in error messages
/// until the descriptor's own name has been read.
pub fn validate(fallback_name: &str, dir: &Path, doc: &Value) -> Result<Profile, ProfileError> {
    let root = doc.as_mapping().ok_or_else(|| {
        ProfileError::invalid(fallback_name, format!("{} must be a mapping.", DESCRIPTOR_FILE))
    })?;

    for required in ["profile", "sources"] {
        if get(root, required).is_none() {
            return Err(ProfileError::invalid(
                fallback_name,
                format!("Missing '{}' in {}.", required, DESCRIPTOR_FILE),
            ));
        }
    }

    let meta = validate_meta(fallback_name, dir, root)?;
    let name = meta.name.clone();
    let sources = validate_sources(&name, dir, &meta, root)?;
    let mappings = validate_mappings(&name, &meta, &sources, root)?;

    Ok(Profile {
        meta,
        sources,
        mappings,
        dir: dir.to_path_buf(),
    })
}

fn get<'a>(map: &'a YamlMap, key: &str) -> Option<&'a Value> {
    map.get(Value::String(key.to_string()))
}

fn optional_string(name: &str, map: &YamlMap, key: &str) -> Result<Option<String>, ProfileError> {
    match get(map, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProfileError::invalid(
            name,
            format!("Invalid '{}' in {}.", key, DESCRIPTOR_FILE),
        )),
    }
}

fn validate_meta(fallback_name: &str, dir: &Path, root: &YamlMap) -> Result<ProfileMeta, ProfileError> {
    let block = get(root, "profile").and_then(Value::as_mapping).ok_or_else(|| {
        ProfileError::invalid(fallback_name, format!("Invalid 'profile' in {}.", DESCRIPTOR_FILE))
    })?;

    let name = match get(block, "name") {
        None => {
            return Err(ProfileError::invalid(
                fallback_name,
                format!("Missing 'name' in {}.", DESCRIPTOR_FILE),
            ))
        }
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(_) => {
            return Err(ProfileError::invalid(
                fallback_name,
                format!("'name' in {} must be a non-empty string.", DESCRIPTOR_FILE),
            ))
        }
    };

    let device = match optional_string(&name, block, "device")? {
        None => DeviceClass::Keyboard,
        Some(d) => match d.as_str() {
            "keyboard" => DeviceClass::Keyboard,
            "mouse" => DeviceClass::Mouse,
            _ => {
                return Err(ProfileError::invalid(
                    &name,
                    format!("Invalid 'device' '{}' in {}.", d, DESCRIPTOR_FILE),
                ))
            }
        },
    };

    let kind = match optional_string(&name, block, "type")? {
        None => ProfileType::Files,
        Some(t) => ProfileType::parse(&t).ok_or_else(|| {
            ProfileError::invalid(&name, format!("Invalid 'type' '{}' in {}.", t, DESCRIPTOR_FILE))
        })?,
    };

    let author = optional_string(&name, block, "author")?;
    let description = optional_string(&name, block, "description")?;

    let video = if kind == ProfileType::VideoExtract {
        let video = optional_string(&name, block, "video")?.ok_or_else(|| {
            ProfileError::invalid(&name, format!("Missing 'video' in {}.", DESCRIPTOR_FILE))
        })?;
        check_asset(&name, dir, "video", &video, SUPPORTED_VIDEO_FORMATS)?;
        Some(video)
    } else {
        None
    };

    Ok(ProfileMeta {
        name,
        author,
        description,
        device,
        kind,
        video,
    })
}

fn validate_sources(
    name: &str,
    dir: &Path,
    meta: &ProfileMeta,
    root: &YamlMap,
) -> Result<Vec<Source>, ProfileError> {
    let entries = get(root, "sources").and_then(Value::as_sequence).ok_or_else(|| {
        ProfileError::invalid(name, format!("Invalid 'sources' in {}.", DESCRIPTOR_FILE))
    })?;

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(entries.len());

    for entry in entries {
        let source = entry.as_mapping().ok_or_else(|| {
            ProfileError::invalid(name, format!("Invalid entry in 'sources' in {}.", DESCRIPTOR_FILE))
        })?;

        let id = match get(source, "id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(_) => {
                return Err(ProfileError::invalid(
                    name,
                    "Invalid 'id' in one or more sources.",
                ))
            }
            None => {
                return Err(ProfileError::invalid(
                    name,
                    "Missing 'id' in one or more sources.",
                ))
            }
        };

        if !seen.insert(id.clone()) {
            return Err(ProfileError::invalid(
                name,
                format!("Duplicate source id '{}'.", id),
            ));
        }

        let spec = match meta.kind {
            ProfileType::Files | ProfileType::OneShot => {
                validate_file_source(name, dir, meta.kind, &id, source)?
            }
            ProfileType::VideoExtract => validate_range_source(name, &id, source)?,
        };

        sources.push(Source { id, spec });
    }

    Ok(sources)
}

fn validate_file_source(
    name: &str,
    dir: &Path,
    kind: ProfileType,
    id: &str,
    source: &YamlMap,
) -> Result<SourceSpec, ProfileError> {
    match get(source, "source") {
        None => Err(ProfileError::invalid(
            name,
            format!("Missing 'source' in source '{}'.", id),
        )),
        Some(Value::String(asset)) => {
            check_asset(name, dir, &format!("source of '{}'", id), asset, SUPPORTED_AUDIO_FORMATS)?;
            Ok(SourceSpec::Single(asset.clone()))
        }
        Some(Value::Mapping(pair)) => {
            if kind == ProfileType::OneShot {
                return Err(ProfileError::invalid(
                    name,
                    format!(
                        "Source '{}' uses a press/release pair, which one-shot profiles do not allow.",
                        id
                    ),
                ));
            }
            let press = match get(pair, "press") {
                Some(Value::String(p)) => p.clone(),
                Some(_) => {
                    return Err(ProfileError::invalid(
                        name,
                        format!("Invalid 'press' in source '{}'.", id),
                    ))
                }
                None => {
                    return Err(ProfileError::invalid(
                        name,
                        format!("Missing 'press' in source '{}'.", id),
                    ))
                }
            };
            check_asset(name, dir, &format!("press of '{}'", id), &press, SUPPORTED_AUDIO_FORMATS)?;

            let release = match get(pair, "release") {
                None | Some(Value::Null) => None,
                Some(Value::String(r)) => {
                    check_asset(name, dir, &format!("release of '{}'", id), r, SUPPORTED_AUDIO_FORMATS)?;
                    Some(r.clone())
                }
                Some(_) => {
                    return Err(ProfileError::invalid(
                        name,
                        format!("Invalid 'release' in source '{}'.", id),
                    ))
                }
            };

            Ok(SourceSpec::PressRelease { press, release })
        }
        Some(_) => Err(ProfileError::invalid(
            name,
            format!("Invalid 'source' in source '{}'.", id),
        )),
    }
}

fn validate_range_source(name: &str, id: &str, source: &YamlMap) -> Result<SourceSpec, ProfileError> {
    let start = match get(source, "start") {
        None => {
            return Err(ProfileError::invalid(
                name,
                format!("Missing 'start' in source '{}'.", id),
            ))
        }
        Some(v) => v.as_f64().ok_or_else(|| {
            ProfileError::invalid(name, format!("Invalid 'start' in source '{}'.", id))
        })?,
    };

    let end = match get(source, "end") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_f64().ok_or_else(|| {
            ProfileError::invalid(name, format!("Invalid 'end' in source '{}'.", id))
        })?),
    };

    if !start.is_finite() || start < 0.0 {
        return Err(ProfileError::invalid(
            name,
            format!("'start' in source '{}' must be a non-negative number.", id),
        ));
    }
    if let Some(end) = end {
        if !end.is_finite() || end <= start {
            return Err(ProfileError::invalid(
                name,
                format!("'end' in source '{}' must be greater than 'start'.", id),
            ));
        }
    }

    Ok(SourceSpec::Range { start, end })
}

/// Check that an asset reference stays inside the profile directory, has a
/// supported extension and exists
fn check_asset(
    name: &str,
    dir: &Path,
    field: &str,
    asset: &str,
    extensions: &[&str],
) -> Result<(), ProfileError> {
    let relative = Path::new(asset);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if asset.is_empty() || escapes {
        return Err(ProfileError::invalid(
            name,
            format!("Asset '{}' ({}) must be a path inside the profile folder.", asset, field),
        ));
    }

    let supported = relative
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if !supported {
        return Err(ProfileError::invalid(
            name,
            format!(
                "Asset '{}' ({}) has an unsupported format, expected one of: {}.",
                asset,
                field,
                extensions.join(", ")
            ),
        ));
    }

    let full = dir.join(relative);
    if !full.is_file() {
        return Err(ProfileError::invalid(
            name,
            format!("Missing file '{}' ({}) in profile folder.", asset, field),
        ));
    }

    // Symlinks may still point outside the folder
    if let (Ok(real), Ok(base)) = (full.canonicalize(), dir.canonicalize()) {
        if !real.starts_with(&base) {
            return Err(ProfileError::invalid(
                name,
                format!("Asset '{}' ({}) resolves outside the profile folder.", asset, field),
            ));
        }
    }

    Ok(())
}

fn validate_mappings(
    name: &str,
    meta: &ProfileMeta,
    sources: &[Source],
    root: &YamlMap,
) -> Result<MappingSet, ProfileError> {
    let section = meta.device.section();
    let other_section = match meta.device {
        DeviceClass::Keyboard => DeviceClass::Mouse.section(),
        DeviceClass::Mouse => DeviceClass::Keyboard.section(),
    };

    if get(root, other_section).is_some() {
        return Err(ProfileError::invalid(
            name,
            format!(
                "'{}' is not allowed in a {} profile, use '{}'.",
                other_section, meta.device, section
            ),
        ));
    }

    let block = match get(root, section) {
        None | Some(Value::Null) => return Ok(MappingSet::default()),
        Some(Value::Mapping(block)) => block,
        Some(_) => {
            return Err(ProfileError::invalid(
                name,
                format!("Invalid '{}' in {}.", section, DESCRIPTOR_FILE),
            ))
        }
    };

    let ids: HashSet<&str> = sources.iter().map(|s| s.id.as_str()).collect();

    let default = match get(block, "default") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_sound_ref(name, &format!("{}.default", section), value, &ids)?),
    };

    let other = match get(block, "other") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(entries)) => entries
            .iter()
            .map(|entry| parse_mapping(name, section, entry, &ids))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ProfileError::invalid(
                name,
                format!("Invalid 'other' in {}.", section),
            ))
        }
    };

    Ok(MappingSet { default, other })
}

fn parse_mapping(
    name: &str,
    section: &str,
    entry: &Value,
    ids: &HashSet<&str>,
) -> Result<Mapping, ProfileError> {
    let map = entry.as_mapping().ok_or_else(|| {
        ProfileError::invalid(name, format!("Invalid entry in {}.other.", section))
    })?;

    let id = optional_string(name, map, "id")?;
    let label = id.as_deref().unwrap_or("<unnamed>");

    let inputs = match get(map, section) {
        Some(Value::Sequence(values)) if !values.is_empty() => values
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.to_lowercase()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(ProfileError::invalid(
                    name,
                    format!("Invalid '{}' in mapping '{}'.", section, label),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::String(single)) => vec![single.to_lowercase()],
        Some(_) => {
            return Err(ProfileError::invalid(
                name,
                format!("'{}' in mapping '{}' must be a non-empty list.", section, label),
            ))
        }
        None => {
            return Err(ProfileError::invalid(
                name,
                format!("Missing '{}' in mapping '{}'.", section, label),
            ))
        }
    };

    let sound = match get(map, "sound") {
        Some(value) => parse_sound_ref(name, &format!("sound of mapping '{}'", label), value, ids)?,
        None => {
            return Err(ProfileError::invalid(
                name,
                format!("Missing 'sound' in mapping '{}'.", label),
            ))
        }
    };

    Ok(Mapping { id, inputs, sound })
}

fn parse_sound_ref(
    name: &str,
    field: &str,
    value: &Value,
    ids: &HashSet<&str>,
) -> Result<SoundRef, ProfileError> {
    let check = |id: &str| -> Result<(), ProfileError> {
        if ids.contains(id) {
            Ok(())
        } else {
            Err(ProfileError::invalid(
                name,
                format!("{} references unknown source '{}'.", field, id),
            ))
        }
    };

    match value {
        Value::String(id) => {
            check(id)?;
            Ok(SoundRef::One(id.clone()))
        }
        Value::Sequence(list) if !list.is_empty() => {
            let mut choice = Vec::with_capacity(list.len());
            for item in list {
                let id = item.as_str().ok_or_else(|| {
                    ProfileError::invalid(name, format!("Invalid id in {}.", field))
                })?;
                check(id)?;
                choice.push(id.to_string());
            }
            Ok(SoundRef::Choice(choice))
        }
        _ => Err(ProfileError::invalid(
            name,
            format!("Invalid {}: expected a source id or a non-empty list of ids.", field),
        )),
    }
}
