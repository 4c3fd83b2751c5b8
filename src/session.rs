//! Session state: the loaded playlist, favorites and guide
//!
//! A [`Session`] is owned by the host and passed to every operation; nothing
//! in the crate keeps global state. Playlist and guide have independent
//! lifecycles: either can be loaded, replaced or cleared without touching the
//! other.
//!
//! Loads come in two phases so a newer load can supersede one still in
//! flight: `begin_*_load` hands out a fresh cancellation token (cancelling
//! the previous one), the caller parses with it, and `commit_*` installs the
//! result only if the token is still live.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::categories::{compute_tally, compute_tally_chunked, CategorySelection, CategoryTally, ChannelFilter};
use crate::config::ParseConfig;
use crate::epg::{self, EpgParser};
use crate::error::{Error, Result};
use crate::m3u_parser::{generate_m3u, parse_m3u_chunked, M3uPlaylist};
use crate::models::{Channel, EpgTable, GuideInfo, PlaylistInfo, ProgramEntry};
use crate::store::{JsonStore, CHANNELS_KEY, EPG_KEY, FAVORITES_KEY, PLAYLIST_INFO_KEY};

/// Name and source recorded for channels generated from the guide
pub const GENERATED_PLAYLIST_NAME: &str = "Generated from guide";
pub const GENERATED_PLAYLIST_SOURCE: &str = "local://epg-generated";

const STREAM_SCHEMES: [&str; 3] = ["http://", "https://", "rtmp://"];

/// Guide snapshot as persisted under [`EPG_KEY`]
#[derive(Serialize, Deserialize)]
struct StoredGuide {
    source: String,
    loaded_at: DateTime<Utc>,
    data: EpgTable,
}

#[derive(Debug, Default)]
pub struct Session {
    parse: ParseConfig,
    channels: Vec<Channel>,
    favorites: HashSet<String>,
    epg: Option<EpgTable>,
    playlist_info: Option<PlaylistInfo>,
    guide_info: Option<GuideInfo>,
    playlist_load: Option<CancellationToken>,
    guide_load: Option<CancellationToken>,
}

impl Session {
    pub fn new(parse: ParseConfig) -> Self {
        Self {
            parse,
            ..Default::default()
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn favorites(&self) -> &HashSet<String> {
        &self.favorites
    }

    pub fn epg(&self) -> Option<&EpgTable> {
        self.epg.as_ref()
    }

    pub fn playlist_info(&self) -> Option<&PlaylistInfo> {
        self.playlist_info.as_ref()
    }

    pub fn guide_info(&self) -> Option<&GuideInfo> {
        self.guide_info.as_ref()
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Look a channel up by id, then by case-insensitive name
    pub fn find_channel(&self, query: &str) -> Option<&Channel> {
        self.channel(query).or_else(|| {
            self.channels
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(query.trim()))
        })
    }

    // ========== Playlist lifecycle ==========

    /// Start a playlist load, superseding any load still in flight
    pub fn begin_playlist_load(&mut self) -> CancellationToken {
        supersede(&mut self.playlist_load)
    }

    /// Install a parsed playlist. An empty playlist leaves the session as it was.
    pub fn commit_playlist(
        &mut self,
        token: &CancellationToken,
        playlist: M3uPlaylist,
        name: &str,
        source: &str,
    ) -> Result<PlaylistInfo> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.playlist_load = None;

        if playlist.channels.is_empty() {
            return Err(Error::NoChannels);
        }

        let info = PlaylistInfo {
            name: name.to_string(),
            source: source.to_string(),
            guide_url: playlist.epg_url,
            loaded_at: Utc::now(),
            channel_count: playlist.channels.len(),
        };
        info!("Loaded {} channels from {}", info.channel_count, source);
        self.channels = playlist.channels;
        self.playlist_info = Some(info.clone());
        Ok(info)
    }

    /// Parse and install a playlist, replacing the current channel list
    pub async fn load_playlist<P>(&mut self, text: &str, name: &str, source: &str, on_progress: P) -> Result<PlaylistInfo>
    where
        P: FnMut(f64),
    {
        let token = self.begin_playlist_load();
        let playlist = parse_m3u_chunked(text, self.parse.playlist_chunk_lines, &token, on_progress).await?;
        self.commit_playlist(&token, playlist, name, source)
    }

    pub fn cancel_playlist_load(&self) {
        if let Some(token) = &self.playlist_load {
            token.cancel();
        }
    }

    /// Drop channels, favorites and playlist info; the guide stays
    pub fn clear_channels(&mut self) {
        self.cancel_playlist_load();
        self.channels.clear();
        self.favorites.clear();
        self.playlist_info = None;
    }

    // ========== Guide lifecycle ==========

    /// Start a guide load, superseding any load still in flight
    pub fn begin_guide_load(&mut self) -> CancellationToken {
        supersede(&mut self.guide_load)
    }

    /// Install a parsed guide. An empty guide leaves the session as it was.
    pub fn commit_guide(&mut self, token: &CancellationToken, table: EpgTable, source: &str) -> Result<GuideInfo> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.guide_load = None;

        if table.is_empty() {
            return Err(Error::NoProgrammes);
        }

        info!(
            "Loaded guide from {}: {} channels, {} programmes",
            source,
            table.channel_count(),
            table.program_count()
        );
        let info = GuideInfo {
            source: source.to_string(),
            loaded_at: Utc::now(),
        };
        self.epg = Some(table);
        self.guide_info = Some(info.clone());
        Ok(info)
    }

    /// Parse and install a guide, replacing the current one
    pub async fn load_guide<P>(&mut self, xml: &str, source: &str, on_progress: P) -> Result<GuideInfo>
    where
        P: FnMut(f64),
    {
        let token = self.begin_guide_load();
        let options = self.parse.epg_options();
        let table = EpgParser::parse_chunked(xml, &options, &token, on_progress).await?;
        self.commit_guide(&token, table, source)
    }

    pub fn cancel_guide_load(&self) {
        if let Some(token) = &self.guide_load {
            token.cancel();
        }
    }

    /// Drop the guide; channels stay
    pub fn clear_guide(&mut self) {
        self.cancel_guide_load();
        self.epg = None;
        self.guide_info = None;
    }

    pub fn clear_all(&mut self) {
        self.clear_channels();
        self.clear_guide();
    }

    /// Placeholder channels for every guide key, replacing the channel list
    /// or appended to it. Returns how many were generated.
    pub fn channels_from_guide(&mut self, append: bool) -> Result<usize> {
        let table = self.epg.as_ref().ok_or(Error::NoProgrammes)?;
        let generated = epg::channels_from_epg(table);
        if generated.is_empty() {
            return Err(Error::NoProgrammes);
        }
        let count = generated.len();

        if append {
            self.channels.extend(generated);
        } else {
            self.channels = generated;
        }

        self.playlist_info = Some(PlaylistInfo {
            name: GENERATED_PLAYLIST_NAME.to_string(),
            source: GENERATED_PLAYLIST_SOURCE.to_string(),
            guide_url: self.guide_info.as_ref().map(|g| g.source.clone()),
            loaded_at: Utc::now(),
            channel_count: self.channels.len(),
        });
        info!("Generated {} channels from the guide", count);
        Ok(count)
    }

    // ========== Channel edits ==========

    /// Returns whether the channel is now a favorite
    pub fn toggle_favorite(&mut self, id: &str) -> bool {
        if self.favorites.remove(id) {
            debug!("Removed favorite {}", id);
            false
        } else {
            self.favorites.insert(id.to_string());
            debug!("Added favorite {}", id);
            true
        }
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorites.contains(id)
    }

    /// Replace a channel's stream URL. The id is kept so favorites survive.
    pub fn update_stream_url(&mut self, id: &str, url: &str) -> Result<()> {
        let url = url.trim();
        let lower = url.to_ascii_lowercase();
        if !STREAM_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
            return Err(Error::InvalidStreamUrl(url.to_string()));
        }

        let channel = self
            .channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::ChannelNotFound(id.to_string()))?;
        channel.stream_url = url.to_string();
        info!("Updated stream URL for {}", channel.name);
        Ok(())
    }

    // ========== Queries ==========

    /// Programme airing on a channel, using its guide id first and then its name.
    /// `Ok(None)` when nothing is airing or no guide is loaded.
    pub fn now_playing(&self, channel_id: &str, at: DateTime<Utc>) -> Result<Option<&ProgramEntry>> {
        let channel = self
            .channel(channel_id)
            .ok_or_else(|| Error::ChannelNotFound(channel_id.to_string()))?;
        Ok(self
            .epg
            .as_ref()
            .and_then(|table| epg::find_program_for_channel(channel, at, table)))
    }

    pub fn find_current_program(&self, channel_name: &str, at: DateTime<Utc>) -> Option<&ProgramEntry> {
        epg::find_current_program(channel_name, at, self.epg.as_ref()?)
    }

    pub fn tally(&self) -> CategoryTally {
        compute_tally(&self.channels, &self.favorites)
    }

    pub async fn tally_chunked<P>(&self, cancel: &CancellationToken, on_progress: P) -> Result<CategoryTally>
    where
        P: FnMut(f64),
    {
        compute_tally_chunked(
            &self.channels,
            &self.favorites,
            self.parse.tally_chunk_size,
            self.parse.tally_chunk_threshold,
            cancel,
            on_progress,
        )
        .await
    }

    pub fn filtered(&self, filter: &ChannelFilter) -> Vec<&Channel> {
        filter.apply(&self.channels, &self.favorites)
    }

    /// M3U text for all channels, the favorites or one group
    pub fn export_m3u(&self, selection: &CategorySelection) -> String {
        generate_m3u(
            self.channels
                .iter()
                .filter(|c| selection.matches(c, &self.favorites)),
        )
    }

    // ========== Snapshot ==========

    pub fn save_to(&self, store: &JsonStore) -> Result<()> {
        store.put(CHANNELS_KEY, &self.channels)?;

        let mut favorites: Vec<&String> = self.favorites.iter().collect();
        favorites.sort();
        store.put(FAVORITES_KEY, &favorites)?;

        match &self.playlist_info {
            Some(info) => store.put(PLAYLIST_INFO_KEY, info)?,
            None => store.remove(PLAYLIST_INFO_KEY)?,
        }

        match (&self.epg, &self.guide_info) {
            (Some(data), Some(info)) => store.put(
                EPG_KEY,
                &StoredGuide {
                    source: info.source.clone(),
                    loaded_at: info.loaded_at,
                    data: data.clone(),
                },
            )?,
            _ => store.remove(EPG_KEY)?,
        }
        Ok(())
    }

    /// Restore whatever the store holds. Unreadable entries are logged and
    /// left empty.
    pub fn restore_from(&mut self, store: &JsonStore) {
        if let Some(channels) = restore(store, CHANNELS_KEY) {
            self.channels = channels;
        }
        if let Some(favorites) = restore::<Vec<String>>(store, FAVORITES_KEY) {
            self.favorites = favorites.into_iter().collect();
        }
        self.playlist_info = restore(store, PLAYLIST_INFO_KEY);

        if let Some(guide) = restore::<StoredGuide>(store, EPG_KEY).filter(|g| !g.data.is_empty()) {
            self.guide_info = Some(GuideInfo {
                source: guide.source,
                loaded_at: guide.loaded_at,
            });
            self.epg = Some(guide.data);
        }
        debug!(
            "Restored {} channels, {} favorites, guide: {}",
            self.channels.len(),
            self.favorites.len(),
            self.epg.is_some()
        );
    }
}

fn supersede(slot: &mut Option<CancellationToken>) -> CancellationToken {
    if let Some(previous) = slot.take() {
        debug!("Superseding an in-flight load");
        previous.cancel();
    }
    let token = CancellationToken::new();
    *slot = Some(token.clone());
    token
}

fn restore<T: serde::de::DeserializeOwned>(store: &JsonStore, key: &str) -> Option<T> {
    store.get(key).unwrap_or_else(|e| {
        warn!("Could not restore {}: {}", key, e);
        None
    })
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
