//! EPG (Electronic Program Guide) Parser
//! Streaming parser for XMLTV `programme` elements

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{EpgTable, ProgramEntry, UNTITLED_PROGRAMME};
use crate::scheduler::ChunkYielder;

/// Parser knobs
#[derive(Debug, Clone, Copy)]
pub struct EpgOptions {
    /// Apply the `+HHMM` suffix of XMLTV timestamps; when false the numeric
    /// part is read as UTC
    pub apply_timezone_offset: bool,
    /// Programmes between yields in [`EpgParser::parse_chunked`]
    pub yield_every: usize,
}

impl Default for EpgOptions {
    fn default() -> Self {
        Self {
            apply_timezone_offset: true,
            yield_every: 500,
        }
    }
}

/// EPG Parser for XMLTV format
pub struct EpgParser;

impl EpgParser {
    /// Parse with default options
    pub fn parse(xml: &str) -> EpgTable {
        Self::parse_with(xml, &EpgOptions::default())
    }

    /// Parse a whole guide. Structurally broken markup yields an empty table.
    pub fn parse_with(xml: &str, options: &EpgOptions) -> EpgTable {
        let xml = sanitize_xml(xml);
        let mut scanner = GuideScanner::new(&xml, *options);

        loop {
            match scanner.step() {
                Ok(Step::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Guide is not well-formed XML at byte {}: {}", scanner.position(), e);
                    return EpgTable::new();
                }
            }
        }

        scanner.finish()
    }

    /// Like [`EpgParser::parse_with`], yielding to the runtime every
    /// `options.yield_every` programmes and stopping early on cancellation.
    pub async fn parse_chunked<P>(
        xml: &str,
        options: &EpgOptions,
        cancel: &CancellationToken,
        mut on_progress: P,
    ) -> Result<EpgTable>
    where
        P: FnMut(f64),
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let xml = sanitize_xml(xml);
        let total = xml.len().max(1) as f64;
        let mut scanner = GuideScanner::new(&xml, *options);
        let mut yielder = ChunkYielder::new(options.yield_every, cancel);

        loop {
            match scanner.step() {
                Ok(Step::Eof) => break,
                Ok(Step::Programme) => {
                    if yielder.tick().await? {
                        on_progress((scanner.position() as f64 / total).min(1.0));
                    }
                }
                Ok(Step::Continue) => {}
                Err(e) => {
                    warn!("Guide is not well-formed XML at byte {}: {}", scanner.position(), e);
                    on_progress(1.0);
                    return Ok(EpgTable::new());
                }
            }
        }

        on_progress(1.0);
        Ok(scanner.finish())
    }
}

enum Step {
    Programme,
    Continue,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Title,
    Desc,
}

struct PendingProgramme {
    channel: String,
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    title: Option<String>,
    description: Option<String>,
}

/// Everything but the reader and its buffer, so event borrows stay disjoint
struct GuideState {
    options: EpgOptions,
    programs: HashMap<String, Vec<ProgramEntry>>,
    current: Option<PendingProgramme>,
    capture: Option<Field>,
    text_buf: String,
    parsed: usize,
    skipped: usize,
}

struct GuideScanner<'a> {
    reader: Reader<&'a [u8]>,
    buf: Vec<u8>,
    state: GuideState,
}

impl<'a> GuideScanner<'a> {
    fn new(xml: &'a str, options: EpgOptions) -> Self {
        Self {
            reader: Reader::from_str(xml),
            buf: Vec::with_capacity(8192),
            state: GuideState {
                options,
                programs: HashMap::new(),
                current: None,
                capture: None,
                text_buf: String::new(),
                parsed: 0,
                skipped: 0,
            },
        }
    }

    fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    fn step(&mut self) -> std::result::Result<Step, quick_xml::Error> {
        let state = &mut self.state;
        let step = match self.reader.read_event_into(&mut self.buf)? {
            Event::Start(ref e) => {
                state.open(e, false);
                Step::Continue
            }
            Event::Empty(ref e) => {
                if state.open(e, true) {
                    Step::Programme
                } else {
                    Step::Continue
                }
            }
            Event::Text(ref e) => {
                if state.capture.is_some() {
                    state.text_buf.push_str(&String::from_utf8_lossy(e));
                }
                Step::Continue
            }
            Event::CData(ref e) => {
                if state.capture.is_some() {
                    state.text_buf.push_str(&String::from_utf8_lossy(e));
                }
                Step::Continue
            }
            Event::GeneralRef(ref e) => {
                if state.capture.is_some() {
                    let name = e.decode().map(|n| n.into_owned()).unwrap_or_default();
                    match resolve_entity(&name) {
                        Some(c) => state.text_buf.push(c),
                        None => {
                            state.text_buf.push('&');
                            state.text_buf.push_str(&name);
                            state.text_buf.push(';');
                        }
                    }
                }
                Step::Continue
            }
            Event::End(ref e) => {
                let name = e.name();
                match name.as_ref() {
                    b"title" => {
                        state.close_field(Field::Title);
                        Step::Continue
                    }
                    b"desc" => {
                        state.close_field(Field::Desc);
                        Step::Continue
                    }
                    b"programme" => {
                        if state.close_programme() {
                            Step::Programme
                        } else {
                            Step::Continue
                        }
                    }
                    _ => Step::Continue,
                }
            }
            Event::Eof => Step::Eof,
            _ => Step::Continue,
        };
        self.buf.clear();
        Ok(step)
    }

    fn finish(self) -> EpgTable {
        let state = self.state;
        if state.skipped > 0 {
            debug!("Skipped {} programmes without a channel", state.skipped);
        }
        let table = EpgTable::from(state.programs);
        info!(
            "Parsed {} programmes for {} guide channels",
            state.parsed,
            table.channel_count()
        );
        table
    }
}

impl GuideState {
    /// Handle an opening (or self-closing) tag. Returns true when a
    /// self-closing `<programme/>` completed an entry.
    fn open(&mut self, e: &BytesStart, empty: bool) -> bool {
        let name = e.name();
        match name.as_ref() {
            b"programme" => {
                self.capture = None;
                let Some(channel) = get_attribute(e, b"channel").filter(|c| !c.is_empty()) else {
                    self.skipped += 1;
                    self.current = None;
                    return false;
                };
                let apply = self.options.apply_timezone_offset;
                self.current = Some(PendingProgramme {
                    channel,
                    start: get_attribute(e, b"start").and_then(|s| parse_xmltv_time(&s, apply)),
                    stop: get_attribute(e, b"stop").and_then(|s| parse_xmltv_time(&s, apply)),
                    title: None,
                    description: None,
                });
                empty && self.close_programme()
            }
            b"title" if !empty => {
                self.begin_field(Field::Title);
                false
            }
            b"desc" if !empty => {
                self.begin_field(Field::Desc);
                false
            }
            _ => false,
        }
    }

    /// Only the first `<title>`/`<desc>` of a programme counts
    fn begin_field(&mut self, field: Field) {
        let Some(ref prog) = self.current else { return };
        let taken = match field {
            Field::Title => prog.title.is_some(),
            Field::Desc => prog.description.is_some(),
        };
        if !taken && self.capture.is_none() {
            self.capture = Some(field);
            self.text_buf.clear();
        }
    }

    fn close_field(&mut self, field: Field) {
        if self.capture != Some(field) {
            return;
        }
        self.capture = None;
        let text = self.text_buf.trim();
        if let Some(ref mut prog) = self.current {
            let value = Some(text.to_string());
            match field {
                Field::Title if !text.is_empty() => prog.title = value,
                Field::Desc => prog.description = value,
                _ => {}
            }
        }
    }

    fn close_programme(&mut self) -> bool {
        self.capture = None;
        let Some(prog) = self.current.take() else {
            return false;
        };
        let entry = ProgramEntry::new(
            prog.title.unwrap_or_else(|| UNTITLED_PROGRAMME.to_string()),
            prog.description.unwrap_or_default(),
            prog.start,
            prog.stop,
        );
        self.programs.entry(prog.channel).or_default().push(entry);
        self.parsed += 1;
        true
    }
}

/// Repair the defects real-world guides most often ship with: bare `&` and
/// C0 control characters. Anything else is left for the XML reader to judge.
fn sanitize_xml(xml: &str) -> Cow<'_, str> {
    let bytes = xml.as_bytes();
    let mut out = String::new();
    // Bytes of `xml` already flushed into `out`
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' && bytes[i..].starts_with(b"<![CDATA[") {
            i = xml[i..].find("]]>").map_or(bytes.len(), |end| i + end + 3);
            continue;
        }

        let replacement = match bytes[i] {
            b'\t' | b'\n' | b'\r' => None,
            b'&' if !is_valid_entity_start(&bytes[i..]) => Some("&amp;"),
            0x00..=0x1F | 0x7F => Some(" "),
            _ => None,
        };
        if let Some(rep) = replacement {
            if out.is_empty() {
                out.reserve(xml.len() + 64);
            }
            out.push_str(&xml[copied..i]);
            out.push_str(rep);
            copied = i + 1;
        }
        i += 1;
    }

    if copied == 0 {
        return Cow::Borrowed(xml);
    }
    out.push_str(&xml[copied..]);
    Cow::Owned(out)
}

/// Check if bytes starting with & form a complete reference: `&name;`,
/// `&#123;` or `&#x1F;`
fn is_valid_entity_start(bytes: &[u8]) -> bool {
    let body = &bytes[1..bytes.len().min(11)];
    let Some(semi) = body.iter().position(|&b| b == b';') else {
        return false;
    };

    match &body[..semi] {
        [b'#', b'x' | b'X', hex @ ..] => !hex.is_empty() && hex.iter().all(u8::is_ascii_hexdigit),
        [b'#', digits @ ..] => !digits.is_empty() && digits.iter().all(u8::is_ascii_digit),
        name => !name.is_empty() && name.iter().all(u8::is_ascii_alphanumeric),
    }
}

/// Resolve an entity name (without `&`/`;`) to its character
fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Decode entities in a raw attribute value. Unknown entities are kept as-is.
fn decode_xml_entities(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        result.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail[1..]
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| resolve_entity(&tail[1..1 + semi]).map(|c| (c, semi + 2)));
        match decoded {
            Some((c, consumed)) => {
                result.push(c);
                rest = &tail[consumed..];
            }
            None => {
                result.push('&');
                rest = &tail[1..];
            }
        }
    }

    result.push_str(rest);
    result
}

/// Get attribute value from XML element
fn get_attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name {
            let raw = String::from_utf8_lossy(attr.value.as_ref());
            return Some(decode_xml_entities(&raw));
        }
    }
    None
}

/// Parse XMLTV time format: "20240115120000 +0000".
///
/// Twelve digits (no seconds) are accepted too. Anything else is `None`.
pub fn parse_xmltv_time(time_str: &str, apply_offset: bool) -> Option<DateTime<Utc>> {
    let time_str = time_str.trim();
    let digits = time_str.bytes().take_while(u8::is_ascii_digit).count();
    let (datetime, tz) = time_str.split_at(digits);

    if digits != 14 && digits != 12 {
        return None;
    }

    let field = |range: std::ops::Range<usize>| datetime.get(range)?.parse::<u32>().ok();
    let year = datetime.get(0..4)?.parse::<i32>().ok()?;
    let second = if digits == 14 { field(12..14)? } else { 0 };

    let naive = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?
        .and_hms_opt(field(8..10)?, field(10..12)?, second)?;

    match parse_tz_offset(tz) {
        Some(offset) if apply_offset => offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => Some(Utc.from_utc_datetime(&naive)),
    }
}

/// Parse timezone offset like "+0100" or "-0530"
fn parse_tz_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    let sign = match tz.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let tz = &tz[1..];

    let hours: i32 = tz.get(0..2)?.parse().ok()?;
    let minutes: i32 = match tz.get(2..4) {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
