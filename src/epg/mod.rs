//! EPG (Electronic Program Guide) module
//!
//! Contains the XMLTV parser, channel matching and guide-derived channels.

mod catalog;
mod matcher;
mod parser;

use chrono::{DateTime, Local, Utc};

// Re-export public types
pub use catalog::{channels_from_epg, display_name_for_key, epg_channel_listing, EPG_GROUP};
pub use matcher::{
    candidate_keys,
    current_in,
    find_current_program,
    find_program_for_channel,
    resolve_key,
};
pub use parser::{parse_xmltv_time, EpgOptions, EpgParser};

/// Format a timestamp as local time HH:MM
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M").to_string()
}

/// Format a timestamp as local datetime YYYY-MM-DD HH:MM
pub fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
