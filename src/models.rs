//! Data models for playlists and program guides

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Group assigned to channels whose directive carries no `group-title`
pub const DEFAULT_GROUP: &str = "General";

/// Title assigned to programmes without a `<title>`
pub const UNTITLED_PROGRAMME: &str = "Untitled";

/// Channel/Stream information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub logo_url: String,
    pub group: String,
    pub stream_url: String,
    /// `tvg-id` from the playlist, or the guide key for generated channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epg_id: Option<String>,
}

impl Channel {
    /// Build a channel, deriving its id from name and stream URL.
    /// Blank names and groups are not accepted here; callers substitute first.
    pub fn new(name: impl Into<String>, stream_url: impl Into<String>, group: impl Into<String>) -> Self {
        let name = name.into();
        let stream_url = stream_url.into();
        let mut group = group.into();
        if group.trim().is_empty() {
            group = DEFAULT_GROUP.to_string();
        }
        Self {
            id: crate::channel_id::generate_id(&name, &stream_url),
            name,
            logo_url: String::new(),
            group,
            stream_url,
            epg_id: None,
        }
    }

    pub fn with_logo(mut self, logo_url: impl Into<String>) -> Self {
        self.logo_url = logo_url.into();
        self
    }

    pub fn with_epg_id(mut self, epg_id: Option<String>) -> Self {
        self.epg_id = epg_id;
        self
    }
}

/// A single scheduled programme.
///
/// `start`/`stop` are `None` when the guide omitted or garbled them; such an
/// entry is kept but can never be "airing".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
}

impl ProgramEntry {
    /// Create an entry, clamping `stop` to `start` if it precedes it.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) -> Self {
        let stop = match (start, stop) {
            (Some(s), Some(e)) if e < s => Some(s),
            _ => stop,
        };
        Self {
            title: title.into(),
            description: description.into(),
            start,
            stop,
        }
    }

    /// Half-open containment: `start <= at < stop`.
    pub fn is_airing_at(&self, at: DateTime<Utc>) -> bool {
        matches!((self.start, self.stop), (Some(s), Some(e)) if s <= at && e > at)
    }
}

/// Programme timelines keyed by the guide's own channel key.
///
/// Every present key maps to a non-empty, start-sorted sequence. Entries with
/// no start sort first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, Vec<ProgramEntry>>", into = "HashMap<String, Vec<ProgramEntry>>")]
pub struct EpgTable {
    programs: HashMap<String, Vec<ProgramEntry>>,
}

impl From<HashMap<String, Vec<ProgramEntry>>> for EpgTable {
    fn from(mut programs: HashMap<String, Vec<ProgramEntry>>) -> Self {
        programs.retain(|_, entries| !entries.is_empty());
        for entries in programs.values_mut() {
            entries.sort_by_key(|p| p.start);
        }
        Self { programs }
    }
}

impl From<EpgTable> for HashMap<String, Vec<ProgramEntry>> {
    fn from(table: EpgTable) -> Self {
        table.programs
    }
}

impl EpgTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Number of guide channel keys
    pub fn channel_count(&self) -> usize {
        self.programs.len()
    }

    /// Total number of programmes
    pub fn program_count(&self) -> usize {
        self.programs.values().map(|v| v.len()).sum()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.programs.contains_key(key)
    }

    pub fn programs(&self, key: &str) -> Option<&[ProgramEntry]> {
        self.programs.get(key).map(Vec::as_slice)
    }

    /// Stored key and programmes for `key`
    pub fn get_key_value(&self, key: &str) -> Option<(&str, &[ProgramEntry])> {
        self.programs
            .get_key_value(key)
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Guide keys in sorted order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.programs.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// First programme starting after `at`
    pub fn next_program(&self, key: &str, at: DateTime<Utc>) -> Option<&ProgramEntry> {
        self.programs
            .get(key)?
            .iter()
            .find(|p| p.start.is_some_and(|s| s > at))
    }

    /// Programmes overlapping `[from, to)`
    pub fn programs_in_range(&self, key: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&ProgramEntry> {
        self.programs
            .get(key)
            .map(|progs| {
                progs
                    .iter()
                    .filter(|p| matches!((p.start, p.stop), (Some(s), Some(e)) if e > from && s < to))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Where the current playlist came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub guide_url: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub channel_count: usize,
}

/// Where the current guide came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideInfo {
    pub source: String,
    pub loaded_at: DateTime<Utc>,
}
