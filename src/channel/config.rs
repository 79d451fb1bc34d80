//! Channel configuration (§4.1 data model) and its YAML-file provider,
//! including the `!include path[:dotted.key]` tag used to split a channel's
//! program format and DSL reference into separate files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{RetrovueError, Result};

/// Technical output format for a channel, matching the AIR program-format
/// contract. Accepts either a flat or `{video:{...}, audio:{...}}` shape
/// when deserialized from YAML/JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProgramFormatShape")]
pub struct ProgramFormat {
    pub video_width: u32,
    pub video_height: u32,
    pub frame_rate: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
}

impl ProgramFormat {
    pub fn default_1080p30() -> Self {
        Self {
            video_width: 1920,
            video_height: 1080,
            frame_rate: "30/1".to_string(),
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}

impl Default for ProgramFormat {
    fn default() -> Self {
        Self::default_1080p30()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProgramFormatShape {
    Nested {
        video: NestedVideo,
        audio: NestedAudio,
    },
    Flat {
        video_width: u32,
        video_height: u32,
        frame_rate: String,
        audio_sample_rate: u32,
        audio_channels: u32,
    },
}

#[derive(Debug, Deserialize)]
struct NestedVideo {
    width: u32,
    height: u32,
    frame_rate: String,
}

#[derive(Debug, Deserialize)]
struct NestedAudio {
    sample_rate: u32,
    channels: u32,
}

impl TryFrom<ProgramFormatShape> for ProgramFormat {
    type Error = std::convert::Infallible;

    fn try_from(shape: ProgramFormatShape) -> std::result::Result<Self, Self::Error> {
        Ok(match shape {
            ProgramFormatShape::Nested { video, audio } => ProgramFormat {
                video_width: video.width,
                video_height: video.height,
                frame_rate: video.frame_rate,
                audio_sample_rate: audio.sample_rate,
                audio_channels: audio.channels,
            },
            ProgramFormatShape::Flat {
                video_width,
                video_height,
                frame_rate,
                audio_sample_rate,
                audio_channels,
            } => ProgramFormat {
                video_width,
                video_height,
                frame_rate,
                audio_sample_rate,
                audio_channels,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    pub channel_id_int: i64,
    pub name: String,
    #[serde(default)]
    pub program_format: ProgramFormat,
    pub dsl_path: String,
    #[serde(default)]
    pub filler_pool_path: Option<String>,
}

pub trait ChannelConfigProvider: Send + Sync {
    fn get_channel_config(&self, channel_id: &str) -> Option<ChannelConfig>;
    fn list_channel_ids(&self) -> Vec<String>;
}

/// Simple in-memory provider, mainly for tests and the mock grid.
pub struct InlineChannelConfigProvider {
    configs: DashMap<String, ChannelConfig>,
}

impl InlineChannelConfigProvider {
    pub fn new(configs: Vec<ChannelConfig>) -> Self {
        let map = DashMap::new();
        for c in configs {
            map.insert(c.channel_id.clone(), c);
        }
        Self { configs: map }
    }
}

impl ChannelConfigProvider for InlineChannelConfigProvider {
    fn get_channel_config(&self, channel_id: &str) -> Option<ChannelConfig> {
        self.configs.get(channel_id).map(|r| r.clone())
    }

    fn list_channel_ids(&self) -> Vec<String> {
        self.configs.iter().map(|e| e.key().clone()).collect()
    }
}

/// Loads one `ChannelConfig` per non-underscore-prefixed `*.yaml` file in a
/// directory, resolving `!include <path>` and `!include <path>:<dotted.key>`
/// tags relative to the including file.
///
/// `serde_yaml` has no custom-tag-constructor hook, so resolution is a
/// pre-pass: parse into a generic `Value` tree, walk it looking for the
/// `!include` tag on scalar nodes, splice in the referenced file's (sub)tree,
/// then deserialize the now-plain tree into `ChannelConfig`.
pub struct YamlChannelConfigProvider {
    configs: DashMap<String, ChannelConfig>,
}

impl YamlChannelConfigProvider {
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let configs = DashMap::new();

        let entries = std::fs::read_dir(dir)?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let is_yaml = path.extension().and_then(|e| e.to_str()) == Some("yaml")
                || path.extension().and_then(|e| e.to_str()) == Some("yml");
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !is_yaml || file_name.starts_with('_') {
                continue;
            }

            let config = load_channel_config_file(&path)?;
            configs.insert(config.channel_id.clone(), config);
        }

        Ok(Self { configs })
    }
}

impl ChannelConfigProvider for YamlChannelConfigProvider {
    fn get_channel_config(&self, channel_id: &str) -> Option<ChannelConfig> {
        self.configs.get(channel_id).map(|r| r.clone())
    }

    fn list_channel_ids(&self) -> Vec<String> {
        self.configs.iter().map(|e| e.key().clone()).collect()
    }
}

fn load_channel_config_file(path: &Path) -> Result<ChannelConfig> {
    let text = std::fs::read_to_string(path)?;
    let raw: Value = serde_yaml::from_str(&text)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let resolved = resolve_includes(raw, &base_dir)?;
    let config: ChannelConfig = serde_yaml::from_value(resolved)?;
    Ok(config)
}

const INCLUDE_TAG: &str = "!include";

fn resolve_includes(value: Value, base_dir: &Path) -> Result<Value> {
    match value {
        Value::Tagged(tagged) => {
            if tagged.tag.to_string() == INCLUDE_TAG {
                let directive = tagged
                    .value
                    .as_str()
                    .ok_or_else(|| RetrovueError::Config("!include directive must be a string".to_string()))?;
                resolve_include_directive(directive, base_dir)
            } else {
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value: resolve_includes(tagged.value, base_dir)?,
                })))
            }
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(resolve_includes(k, base_dir)?, resolve_includes(v, base_dir)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for v in seq {
                out.push(resolve_includes(v, base_dir)?);
            }
            Ok(Value::Sequence(out))
        }
        other => Ok(other),
    }
}

/// `directive` is `path` or `path:dotted.key`, relative to `base_dir`. Each
/// included file gets its own include resolution pass so a chain of
/// `!include`s composes.
fn resolve_include_directive(directive: &str, base_dir: &Path) -> Result<Value> {
    let (rel_path, dotted_key) = match directive.split_once(':') {
        Some((p, k)) => (p, Some(k)),
        None => (directive, None),
    };

    let full_path = base_dir.join(rel_path);
    let text = std::fs::read_to_string(&full_path)
        .map_err(|e| RetrovueError::Config(format!("!include {rel_path}: {e}")))?;
    let included: Value = serde_yaml::from_str(&text)?;
    let included_base_dir = full_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let included = resolve_includes(included, &included_base_dir)?;

    match dotted_key {
        Some(key) => navigate_dotted(&included, key),
        None => Ok(included),
    }
}

fn navigate_dotted(value: &Value, dotted_key: &str) -> Result<Value> {
    let mut current = value.clone();
    for part in dotted_key.split('.') {
        current = current
            .as_mapping()
            .and_then(|m| m.get(Value::String(part.to_string())))
            .cloned()
            .ok_or_else(|| RetrovueError::Config(format!("!include: key '{part}' not found in '{dotted_key}'")))?;
    }
    Ok(current)
}

/// Human-readable name derived from a path segment: `"retro1"` -> `"Retro1"`.
pub fn titleize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn program_format_parses_flat_and_nested() {
        let flat: ProgramFormat = serde_yaml::from_str(
            "video_width: 1280\nvideo_height: 720\nframe_rate: \"30/1\"\naudio_sample_rate: 44100\naudio_channels: 2\n",
        )
        .unwrap();
        assert_eq!(flat.video_width, 1280);

        let nested: ProgramFormat = serde_yaml::from_str(
            "video:\n  width: 1920\n  height: 1080\n  frame_rate: \"30/1\"\naudio:\n  sample_rate: 48000\n  channels: 2\n",
        )
        .unwrap();
        assert_eq!(nested.video_height, 1080);
        assert_eq!(nested.audio_sample_rate, 48_000);
    }

    #[test]
    fn inline_provider_round_trips() {
        let provider = InlineChannelConfigProvider::new(vec![ChannelConfig {
            channel_id: "retro1".into(),
            channel_id_int: 1,
            name: "Retro 1".into(),
            program_format: ProgramFormat::default(),
            dsl_path: "retro1.yaml".into(),
            filler_pool_path: None,
        }]);
        assert_eq!(provider.list_channel_ids(), vec!["retro1".to_string()]);
        assert!(provider.get_channel_config("retro1").is_some());
        assert!(provider.get_channel_config("missing").is_none());
    }

    #[test]
    fn yaml_provider_resolves_include_with_dotted_key() {
        let dir = tempfile::tempdir().unwrap();

        let mut formats = std::fs::File::create(dir.path().join("formats.yaml")).unwrap();
        writeln!(
            formats,
            "hd:\n  video_width: 1920\n  video_height: 1080\n  frame_rate: \"30/1\"\n  audio_sample_rate: 48000\n  audio_channels: 2\n"
        )
        .unwrap();

        let mut channel = std::fs::File::create(dir.path().join("retro1.yaml")).unwrap();
        writeln!(
            channel,
            "channel_id: retro1\nchannel_id_int: 1\nname: \"Retro 1\"\nprogram_format: !include formats.yaml:hd\ndsl_path: retro1_dsl.yaml\n"
        )
        .unwrap();

        let provider = YamlChannelConfigProvider::load_dir(dir.path()).unwrap();
        let config = provider.get_channel_config("retro1").unwrap();
        assert_eq!(config.program_format.video_width, 1920);
    }

    #[test]
    fn underscore_prefixed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("_shared.yaml"), "not_a_channel: true\n").unwrap();
        let provider = YamlChannelConfigProvider::load_dir(dir.path()).unwrap();
        assert!(provider.list_channel_ids().is_empty());
    }
}
