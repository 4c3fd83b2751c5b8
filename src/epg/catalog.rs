//! Channels and listings derived from a guide alone

use chrono::{DateTime, Utc};

use super::matcher::current_in;
use super::{format_datetime, format_time};
use crate::channel_id::generate_id;
use crate::models::{Channel, EpgTable};

/// Group given to channels generated from a guide
pub const EPG_GROUP: &str = "EPG";

/// Readable name for a guide key: `_`/`-` become spaces and each word
/// starts upper-case. `None` when nothing readable is left.
pub fn display_name_for_key(key: &str) -> Option<String> {
    let mut name = String::with_capacity(key.len());
    let mut prev_is_word = false;
    for c in key.chars() {
        let c = if c == '_' || c == '-' { ' ' } else { c };
        let is_word = c.is_ascii_alphanumeric();
        if is_word && !prev_is_word {
            name.push(c.to_ascii_uppercase());
        } else {
            name.push(c);
        }
        prev_is_word = is_word;
    }

    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn key_names(table: &EpgTable) -> impl Iterator<Item = (&str, String)> {
    table.keys().into_iter().enumerate().map(|(index, key)| {
        let name = display_name_for_key(key).unwrap_or_else(|| format!("Channel {}", index + 1));
        (key, name)
    })
}

/// One placeholder channel per guide key, in key order. The stream URL must
/// be supplied later through `Session::update_stream_url`.
pub fn channels_from_epg(table: &EpgTable) -> Vec<Channel> {
    key_names(table)
        .map(|(key, name)| {
            let mut channel = Channel::new(name, format!("placeholder://{}", key), EPG_GROUP)
                .with_epg_id(Some(key.to_string()));
            channel.id = generate_id(&channel.name, &format!("placeholder_{}", key));
            channel
        })
        .collect()
}

/// Plain-text listing of every guide channel with what is airing at `at`.
pub fn epg_channel_listing(table: &EpgTable, at: DateTime<Utc>) -> String {
    let mut out = String::from("Guide channels\n");
    out.push_str(&format!("Generated: {}\n", format_datetime(at)));
    out.push_str(&format!("Total channels: {}\n", table.channel_count()));
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");

    for (index, (key, name)) in key_names(table).enumerate() {
        out.push_str(&format!("{}. {} (ID: {})\n", index + 1, name, key));

        let airing = table.programs(key).and_then(|progs| current_in(progs, at));
        if let Some(prog) = airing {
            if let (Some(start), Some(stop)) = (prog.start, prog.stop) {
                out.push_str(&format!(
                    "   Now: {} ({} - {})\n",
                    prog.title,
                    format_time(start),
                    format_time(stop)
                ));
            }
        }
        out.push('\n');
    }
    out
}
