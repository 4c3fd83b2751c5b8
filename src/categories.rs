//! Category counts and channel filtering

use std::collections::{BTreeMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::models::Channel;
use crate::scheduler::process_in_chunks;

pub const ALL_CATEGORY: &str = "all";
pub const FAVORITES_CATEGORY: &str = "favorites";

/// Channel count per group plus the synthetic "all" and "favorites" entries.
/// Always rebuilt from the full channel list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTally {
    groups: BTreeMap<String, usize>,
    all: usize,
    favorites: usize,
}

impl CategoryTally {
    /// Count for a category name; unknown groups count zero
    pub fn get(&self, name: &str) -> usize {
        match name {
            ALL_CATEGORY => self.all,
            FAVORITES_CATEGORY => self.favorites,
            group => self.groups.get(group).copied().unwrap_or(0),
        }
    }

    pub fn all(&self) -> usize {
        self.all
    }

    pub fn favorites(&self) -> usize {
        self.favorites
    }

    /// Groups in name order
    pub fn groups(&self) -> impl Iterator<Item = (&str, usize)> {
        self.groups.iter().map(|(g, n)| (g.as_str(), *n))
    }

    fn count(&mut self, channel: &Channel) {
        *self.groups.entry(channel.group.clone()).or_insert(0) += 1;
        self.all += 1;
    }
}

/// Tally in one pass
pub fn compute_tally(channels: &[Channel], favorites: &HashSet<String>) -> CategoryTally {
    let mut tally = CategoryTally {
        favorites: favorites.len(),
        ..Default::default()
    };
    for channel in channels {
        tally.count(channel);
    }
    tally
}

/// Tally large lists a chunk at a time. Lists of `threshold` channels or
/// fewer are counted in one go.
pub async fn compute_tally_chunked<P>(
    channels: &[Channel],
    favorites: &HashSet<String>,
    chunk_size: usize,
    threshold: usize,
    cancel: &CancellationToken,
    mut on_progress: P,
) -> Result<CategoryTally>
where
    P: FnMut(f64),
{
    if channels.len() <= threshold {
        let tally = compute_tally(channels, favorites);
        on_progress(1.0);
        return Ok(tally);
    }

    debug!("Counting {} channels in chunks of {}", channels.len(), chunk_size);
    let mut tally = CategoryTally {
        favorites: favorites.len(),
        ..Default::default()
    };
    process_in_chunks(channels.len(), chunk_size, cancel, |i| tally.count(&channels[i]), on_progress).await?;
    Ok(tally)
}

/// Which slice of the channel list to show
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategorySelection {
    #[default]
    All,
    Favorites,
    Group(String),
}

impl CategorySelection {
    /// "all" and "favorites" select the synthetic categories, anything else a group
    pub fn from_name(name: &str) -> Self {
        match name {
            ALL_CATEGORY => Self::All,
            FAVORITES_CATEGORY => Self::Favorites,
            group => Self::Group(group.to_string()),
        }
    }

    pub fn matches(&self, channel: &Channel, favorites: &HashSet<String>) -> bool {
        match self {
            Self::All => true,
            Self::Favorites => favorites.contains(&channel.id),
            Self::Group(group) => channel.group == *group,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    pub selection: CategorySelection,
    /// Case-insensitive substring of name or group; empty matches everything
    pub search: String,
}

impl ChannelFilter {
    pub fn new(selection: CategorySelection) -> Self {
        Self {
            selection,
            search: String::new(),
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    /// Channels passing the filter, in list order
    pub fn apply<'a>(&self, channels: &'a [Channel], favorites: &HashSet<String>) -> Vec<&'a Channel> {
        let needle = self.search.trim().to_lowercase();
        channels
            .iter()
            .filter(|ch| self.selection.matches(ch, favorites))
            .filter(|ch| {
                needle.is_empty()
                    || ch.name.to_lowercase().contains(&needle)
                    || ch.group.to_lowercase().contains(&needle)
            })
            .collect()
    }
}
