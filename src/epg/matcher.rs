//! Channel to guide-key resolution and "now playing" lookup

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{Channel, EpgTable, ProgramEntry};

/// Guide keys to try for a channel name, strongest first:
/// exact, lower-case, whitespace removed, non-alphanumerics removed,
/// whitespace runs as `_`, whitespace runs as `-`.
pub fn candidate_keys(name: &str) -> Vec<String> {
    vec![
        name.to_string(),
        name.to_lowercase(),
        replace_whitespace_runs(name, ""),
        name.chars().filter(char::is_ascii_alphanumeric).collect(),
        replace_whitespace_runs(name, "_"),
        replace_whitespace_runs(name, "-"),
    ]
}

fn replace_whitespace_runs(name: &str, with: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push_str(with);
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// First candidate key present in the table. Once a key is found no weaker
/// candidate is considered, even if that key has nothing airing.
pub fn resolve_key<'t>(name: &str, table: &'t EpgTable) -> Option<&'t str> {
    let (key, _) = candidate_keys(name)
        .iter()
        .find_map(|key| table.get_key_value(key))?;
    debug!("Matched channel {:?} to guide key {:?}", name, key);
    Some(key)
}

/// The programme airing at `at` within a start-sorted sequence.
pub fn current_in(programs: &[ProgramEntry], at: DateTime<Utc>) -> Option<&ProgramEntry> {
    // Everything past this index starts after `at`
    let end = programs.partition_point(|p| p.start.map_or(true, |s| s <= at));
    programs[..end].iter().find(|p| p.is_airing_at(at))
}

/// Programme airing at `at` on the guide channel matching `channel_name`.
pub fn find_current_program<'t>(
    channel_name: &str,
    at: DateTime<Utc>,
    table: &'t EpgTable,
) -> Option<&'t ProgramEntry> {
    let key = resolve_key(channel_name, table)?;
    current_in(table.programs(key)?, at)
}

/// Like [`find_current_program`], but a channel's own `epg_id` wins when the
/// guide has it.
pub fn find_program_for_channel<'t>(
    channel: &Channel,
    at: DateTime<Utc>,
    table: &'t EpgTable,
) -> Option<&'t ProgramEntry> {
    match channel.epg_id.as_deref().and_then(|id| table.programs(id)) {
        Some(programs) => current_in(programs, at),
        None => find_current_program(&channel.name, at, table),
    }
}
