//! M3U playlist parser and writer
//!
//! The parser is line oriented and never fails: a `#EXTINF:` directive opens a
//! record, the next line starting with `http` closes it, anything else is
//! skipped.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Channel, DEFAULT_GROUP};
use crate::scheduler::process_in_chunks;

const DIRECTIVE: &str = "#EXTINF:";

#[derive(Debug, Clone, Default)]
pub struct M3uPlaylist {
    pub channels: Vec<Channel>,
    pub epg_url: Option<String>,        // From x-tvg-url in header
}

/// Parse M3U and return playlist with EPG URL
pub fn parse_m3u_playlist(content: &str) -> M3uPlaylist {
    M3uPlaylist {
        channels: parse_m3u(content),
        epg_url: header_epg_url(content),
    }
}

/// Chunked variant of [`parse_m3u_playlist`] that yields to the runtime every
/// `chunk_lines` lines.
pub async fn parse_m3u_chunked<P>(
    content: &str,
    chunk_lines: usize,
    cancel: &CancellationToken,
    on_progress: P,
) -> Result<M3uPlaylist>
where
    P: FnMut(f64),
{
    let lines = playlist_lines(content);
    let mut scanner = M3uScanner::default();

    process_in_chunks(lines.len(), chunk_lines, cancel, |i| scanner.feed(lines[i]), on_progress).await?;

    let channels = scanner.finish();
    info!("Parsed {} channels from {} lines", channels.len(), lines.len());
    Ok(M3uPlaylist {
        channels,
        epg_url: header_epg_url(content),
    })
}

/// Parse M3U content and extract channels
pub fn parse_m3u(content: &str) -> Vec<Channel> {
    let mut scanner = M3uScanner::default();
    for line in playlist_lines(content) {
        scanner.feed(line);
    }
    let channels = scanner.finish();
    debug!("Parsed {} channels", channels.len());
    channels
}

fn playlist_lines(content: &str) -> Vec<&str> {
    strip_bom(content)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

/// `x-tvg-url="..."` or `url-tvg="..."` from the `#EXTM3U` header
fn header_epg_url(content: &str) -> Option<String> {
    let first = strip_bom(content)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?;
    let header = first.strip_prefix("#EXTM3U")?;
    let mut attrs = HashMap::new();
    extract_attrs(header, &mut attrs);
    attrs
        .remove("x-tvg-url")
        .or_else(|| attrs.remove("url-tvg"))
        .filter(|u| !u.is_empty())
}

/// Line-at-a-time parser state, shared by the plain and chunked parsers.
#[derive(Default)]
struct M3uScanner {
    channels: Vec<Channel>,
    pending: Option<Directive>,
    untitled: usize,
}

struct Directive {
    name: String,
    logo: String,
    group: String,
    tvg_id: Option<String>,
}

impl M3uScanner {
    fn feed(&mut self, line: &str) {
        if let Some(info) = line.strip_prefix(DIRECTIVE) {
            // A second directive before any URL replaces the first
            self.pending = Some(self.parse_directive(info));
        } else if line.starts_with("http") {
            if let Some(d) = self.pending.take() {
                self.channels.push(
                    Channel::new(d.name, line, d.group)
                        .with_logo(d.logo)
                        .with_epg_id(d.tvg_id),
                );
            }
        }
    }

    fn finish(self) -> Vec<Channel> {
        self.channels
    }

    fn parse_directive(&mut self, info: &str) -> Directive {
        let mut attrs = HashMap::new();
        extract_attrs(info, &mut attrs);

        // Display name is everything after the last comma
        let name = match info.rfind(',').map(|pos| info[pos + 1..].trim()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                self.untitled += 1;
                format!("Untitled Channel {}", self.untitled)
            }
        };

        let group = attrs
            .remove("group-title")
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());

        Directive {
            name,
            logo: attrs.remove("tvg-logo").unwrap_or_default(),
            group,
            tvg_id: attrs.remove("tvg-id").filter(|id| !id.is_empty()),
        }
    }
}

/// Extract `key="value"` / `key=value` pairs from a directive. Keys are
/// lower-cased; scanning stops at the first comma outside quotes that is not
/// followed by another attribute.
fn extract_attrs(info: &str, attrs: &mut HashMap<String, String>) {
    let mut chars = info.chars().peekable();

    // Skip the duration (e.g. "-1", "10.000000")
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '-' || c == '.' {
            chars.next();
        } else {
            break;
        }
    }

    while chars.peek().is_some() {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut key = String::new();
        let mut saw_equals = false;
        while let Some(c) = chars.next() {
            match c {
                '=' => {
                    saw_equals = true;
                    break;
                }
                // Rest of the line is the display name
                ',' => return,
                _ => key.push(c),
            }
        }
        if !saw_equals {
            return;
        }

        // Tolerate stray quotes around keys: "tvg-name="x"
        let key = key.trim().trim_matches('"').to_lowercase();

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' if chars.peek() == Some(&'"') => {
                        chars.next();
                        value.push('"');
                    }
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        if !key.is_empty() {
            attrs.insert(key, value);
        }
    }
}

/// Write channels back out as an extended M3U playlist.
pub fn generate_m3u<'a, I>(channels: I) -> String
where
    I: IntoIterator<Item = &'a Channel>,
{
    let mut out = String::from("#EXTM3U\n");
    for channel in channels {
        out.push_str("#EXTINF:-1");
        if let Some(id) = channel.epg_id.as_deref().filter(|id| !id.trim().is_empty()) {
            push_attr(&mut out, "tvg-id", id);
        }
        if !channel.logo_url.trim().is_empty() {
            push_attr(&mut out, "tvg-logo", &channel.logo_url);
        }
        if !channel.group.trim().is_empty() {
            push_attr(&mut out, "group-title", &channel.group);
        }
        out.push(',');
        out.push_str(&channel.name);
        out.push('\n');
        out.push_str(&channel.stream_url);
        out.push('\n');
    }
    out
}

/// ` key="value"`, with embedded quotes written the way `extract_attrs` reads them
fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&value.replace('"', "\\\""));
    out.push('"');
}

/// Stand-in URLs that cannot be played until a user supplies a real one
pub fn is_placeholder_url(url: &str) -> bool {
    !url.starts_with("http")
        || url.contains("placeholder")
        || url.contains("TODO")
        || url.contains("ejemplo.com")
}

#[cfg(test)]
#[path = "m3u_parser_tests.rs"]
mod tests;
