//! IPTV playlist and XMLTV guide ingestion
//!
//! Parses M3U playlists into channels with stable ids, parses XMLTV guides
//! into per-channel timelines, matches channels to guide keys and answers
//! "what is airing now". Large inputs are processed in cooperative chunks
//! that yield to the runtime and honour cancellation.

pub mod categories;
pub mod channel_id;
pub mod config;
pub mod epg;
pub mod error;
pub mod m3u_parser;
pub mod models;
pub mod scheduler;
pub mod session;
pub mod sources;
pub mod store;

pub use error::{Error, Result};
pub use models::{Channel, EpgTable, GuideInfo, PlaylistInfo, ProgramEntry};
pub use session::Session;
