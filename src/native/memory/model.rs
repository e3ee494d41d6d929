//! Records, publishers and text formats of the in-memory event log.

use crate::native::{FormatFlags, NativeError, NativeResult};
use crate::types::{Filetime, Guid, Sid, StatusCode, SystemProperty, TICKS_PER_SECOND};
use crate::variant::{Variant, VariantBufferBuilder};
use std::collections::HashMap;
use std::fmt::{self, Write};

/// An event to append to a channel.
#[derive(Clone, Debug, Default)]
pub struct SyntheticEvent {
    pub provider: String,
    pub provider_guid: Option<Guid>,
    pub event_id: u16,
    pub qualifiers: Option<u16>,
    pub level: u8,
    pub task: u16,
    pub opcode: u8,
    pub keywords: u64,
    pub process_id: u32,
    pub thread_id: u32,
    pub computer: String,
    pub user: Option<Sid>,
    pub version: u8,
    /// Insertion strings, also rendered as `<Data>` elements.
    pub data: Vec<String>,
    /// Creation time; the append time when `None`.
    pub time_created: Option<Filetime>,
    /// Render a values buffer with an out-of-bounds pointer.
    pub corrupt_values: bool,
}

impl SyntheticEvent {
    pub fn new(provider: impl Into<String>, event_id: u16) -> Self {
        Self {
            provider: provider.into(),
            event_id,
            level: 4,
            computer: "localhost".to_string(),
            ..Default::default()
        }
    }

    pub fn level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn task(mut self, task: u16) -> Self {
        self.task = task;
        self
    }

    pub fn opcode(mut self, opcode: u8) -> Self {
        self.opcode = opcode;
        self
    }

    pub fn keywords(mut self, keywords: u64) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn qualifiers(mut self, qualifiers: u16) -> Self {
        self.qualifiers = Some(qualifiers);
        self
    }

    pub fn process(mut self, process_id: u32, thread_id: u32) -> Self {
        self.process_id = process_id;
        self.thread_id = thread_id;
        self
    }

    pub fn computer(mut self, computer: impl Into<String>) -> Self {
        self.computer = computer.into();
        self
    }

    pub fn user(mut self, sid: Sid) -> Self {
        self.user = Some(sid);
        self
    }

    pub fn data<I, S>(mut self, data: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data = data.into_iter().map(Into::into).collect();
        self
    }

    pub fn time_created(mut self, at: Filetime) -> Self {
        self.time_created = Some(at);
        self
    }

    pub fn with_corrupt_values(mut self) -> Self {
        self.corrupt_values = true;
        self
    }
}

/// An appended record.
#[derive(Debug)]
pub(crate) struct StoredRecord {
    pub record_id: u64,
    pub channel: String,
    pub created: Filetime,
    pub event: SyntheticEvent,
}

impl StoredRecord {
    pub fn system_values(&self) -> VariantBufferBuilder {
        let e = &self.event;
        let mut values = vec![Variant::Null; SystemProperty::COUNT];
        let mut set = |prop: SystemProperty, value: Variant| values[prop.ordinal()] = value;

        set(SystemProperty::ProviderName, Variant::String(e.provider.clone()));
        if let Some(guid) = e.provider_guid {
            set(SystemProperty::ProviderGuid, Variant::Guid(guid));
        }
        set(SystemProperty::EventId, Variant::UInt16(e.event_id));
        if let Some(q) = e.qualifiers {
            set(SystemProperty::Qualifiers, Variant::UInt16(q));
        }
        set(SystemProperty::Level, Variant::Byte(e.level));
        set(SystemProperty::Task, Variant::UInt16(e.task));
        set(SystemProperty::Opcode, Variant::Byte(e.opcode));
        set(SystemProperty::Keywords, Variant::HexInt64(e.keywords));
        set(SystemProperty::TimeCreated, Variant::FileTime(self.created));
        set(SystemProperty::EventRecordId, Variant::UInt64(self.record_id));
        set(SystemProperty::ProcessId, Variant::UInt32(e.process_id));
        set(SystemProperty::ThreadId, Variant::UInt32(e.thread_id));
        set(SystemProperty::Channel, Variant::String(self.channel.clone()));
        set(SystemProperty::Computer, Variant::String(e.computer.clone()));
        if let Some(sid) = &e.user {
            set(SystemProperty::UserId, Variant::Sid(sid.clone()));
        }
        set(SystemProperty::Version, Variant::Byte(e.version));

        VariantBufferBuilder::from_values(values)
    }

    pub fn user_values(&self) -> VariantBufferBuilder {
        VariantBufferBuilder::from_values(
            self.event.data.iter().cloned().map(Variant::String).collect(),
        )
    }

    /// Event XML in the layout the native renderer produces.
    pub fn to_xml(&self) -> Result<String, fmt::Error> {
        let e = &self.event;
        let mut xml = String::new();
        xml.push_str("<Event xmlns='http://schemas.microsoft.com/win/2004/08/events/event'><System>");
        write!(xml, "<Provider Name='{}'", escape(&e.provider))?;
        if let Some(guid) = e.provider_guid {
            write!(xml, " Guid='{}'", guid)?;
        }
        xml.push_str("/>");
        match e.qualifiers {
            Some(q) => write!(xml, "<EventID Qualifiers='{}'>{}</EventID>", q, e.event_id)?,
            None => write!(xml, "<EventID>{}</EventID>", e.event_id)?,
        }
        write!(
            xml,
            "<Version>{}</Version><Level>{}</Level><Task>{}</Task><Opcode>{}</Opcode>\
             <Keywords>{:#018x}</Keywords><TimeCreated SystemTime='",
            e.version, e.level, e.task, e.opcode, e.keywords,
        )?;
        write_system_time(&mut xml, self.created)?;
        write!(
            xml,
            "'/><EventRecordID>{}</EventRecordID><Execution ProcessID='{}' ThreadID='{}'/>\
             <Channel>{}</Channel><Computer>{}</Computer>",
            self.record_id,
            e.process_id,
            e.thread_id,
            escape(&self.channel),
            escape(&e.computer),
        )?;
        match &e.user {
            Some(sid) => write!(xml, "<Security UserID='{}'/>", sid)?,
            None => xml.push_str("<Security/>"),
        }
        xml.push_str("</System><EventData>");
        for item in &e.data {
            write!(xml, "<Data>{}</Data>", escape(item))?;
        }
        xml.push_str("</EventData></Event>");
        Ok(xml)
    }
}

/// `YYYY-MM-DDThh:mm:ss.fffffffZ` with full 100ns tick precision.
fn write_system_time(out: &mut String, created: Filetime) -> fmt::Result {
    write!(
        out,
        "{}.{:07}Z",
        created.to_datetime().format("%Y-%m-%dT%H:%M:%S"),
        created.0 % TICKS_PER_SECOND
    )
}

/// Message resources of one provider.
#[derive(Clone, Debug, Default)]
pub struct PublisherMetadata {
    pub name: String,
    pub display_name: Option<String>,
    /// Event id → message template with `%1`..`%n` insertion points.
    pub messages: HashMap<u16, String>,
    pub levels: HashMap<u8, String>,
    pub tasks: HashMap<u16, String>,
    pub opcodes: HashMap<u8, String>,
    /// Keyword bit mask → name.
    pub keywords: Vec<(u64, String)>,
}

impl PublisherMetadata {
    /// A provider with the standard level and opcode names.
    pub fn new(name: impl Into<String>) -> Self {
        let levels = [
            (1, "Critical"),
            (2, "Error"),
            (3, "Warning"),
            (4, "Information"),
            (5, "Verbose"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();
        let opcodes = [(0, "Info"), (1, "Start"), (2, "Stop")]
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        Self {
            name: name.into(),
            levels,
            opcodes,
            ..Default::default()
        }
    }

    pub fn display_name(mut self, display: impl Into<String>) -> Self {
        self.display_name = Some(display.into());
        self
    }

    pub fn message(mut self, event_id: u16, template: impl Into<String>) -> Self {
        self.messages.insert(event_id, template.into());
        self
    }

    pub fn task(mut self, task: u16, name: impl Into<String>) -> Self {
        self.tasks.insert(task, name.into());
        self
    }

    pub fn keyword(mut self, mask: u64, name: impl Into<String>) -> Self {
        self.keywords.push((mask, name.into()));
        self
    }

    /// Resolve one display string. Keyword lists are NUL separated.
    pub(crate) fn format(&self, record: &StoredRecord, flags: FormatFlags) -> NativeResult<String> {
        let e = &record.event;
        let missing = NativeError::Status(StatusCode::EVT_MESSAGE_NOT_FOUND);
        match flags {
            FormatFlags::Event => self
                .messages
                .get(&e.event_id)
                .map(|template| insert_strings(template, &e.data))
                .ok_or(missing),
            FormatFlags::Id => self.messages.get(&e.event_id).cloned().ok_or(missing),
            FormatFlags::Level => self.levels.get(&e.level).cloned().ok_or(missing),
            FormatFlags::Task => self.tasks.get(&e.task).cloned().ok_or(missing),
            FormatFlags::Opcode => self.opcodes.get(&e.opcode).cloned().ok_or(missing),
            FormatFlags::Keyword => {
                let names: Vec<&str> = self
                    .keywords
                    .iter()
                    .filter(|(mask, _)| e.keywords & mask != 0)
                    .map(|(_, name)| name.as_str())
                    .collect();
                Ok(names.join("\0"))
            }
            FormatFlags::Channel => Ok(record.channel.clone()),
            FormatFlags::Provider => self.display_name.clone().ok_or(missing),
            FormatFlags::Xml => record
                .to_xml()
                .map_err(|_| NativeError::Status(StatusCode::INVALID_DATA)),
        }
    }
}

/// Replace `%1`..`%n` with insertion strings. Unmatched markers are kept.
fn insert_strings(template: &str, data: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        match digits.parse::<usize>().ok().and_then(|n| data.get(n.wrapping_sub(1))) {
            Some(value) => out.push_str(value),
            None => {
                out.push('%');
                out.push_str(&digits);
            }
        }
    }
    out
}

/// Subset of the XPath filter grammar understood by the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QueryFilter {
    All,
    EventId(u16),
    Level(u8),
}

impl QueryFilter {
    pub fn parse(query: &str) -> NativeResult<Self> {
        let invalid = NativeError::Status(StatusCode::EVT_INVALID_QUERY);
        let query = query.trim();
        if query == "*" {
            return Ok(QueryFilter::All);
        }
        let inner = query
            .strip_prefix("*[System[")
            .and_then(|s| s.strip_suffix("]]"))
            .ok_or(invalid)?;
        let inner = inner
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(inner);
        let (key, value) = inner.split_once('=').ok_or(invalid)?;
        let value = value.trim();
        match key.trim() {
            "EventID" => value.parse().map(QueryFilter::EventId).map_err(|_| invalid),
            "Level" => value.parse().map(QueryFilter::Level).map_err(|_| invalid),
            _ => Err(invalid),
        }
    }

    pub fn matches(&self, record: &StoredRecord) -> bool {
        match self {
            QueryFilter::All => true,
            QueryFilter::EventId(id) => record.event.event_id == *id,
            QueryFilter::Level(level) => record.event.level == *level,
        }
    }
}

/// Native bookmark state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct BookmarkState {
    pub channel: Option<String>,
    pub record_id: Option<u64>,
}

impl BookmarkState {
    pub fn to_xml(&self) -> String {
        match (&self.channel, self.record_id) {
            (Some(channel), Some(record_id)) => format!(
                "<BookmarkList>\r\n  <Bookmark Channel='{}' RecordId='{}' IsCurrent='true'/>\r\n</BookmarkList>",
                escape(channel),
                record_id
            ),
            _ => "<BookmarkList>\r\n</BookmarkList>".to_string(),
        }
    }

    pub fn parse(xml: &str) -> NativeResult<Self> {
        let invalid = NativeError::Status(StatusCode::INVALID_PARAMETER);
        let xml = xml.trim();
        if !xml.starts_with("<BookmarkList") {
            return Err(invalid);
        }
        let Some(start) = xml.find("<Bookmark ") else {
            return Ok(Self::default());
        };
        let element = &xml[start..];
        let channel = attribute(element, "Channel").ok_or(invalid)?;
        let record_id = attribute(element, "RecordId")
            .and_then(|v| v.parse().ok())
            .ok_or(invalid)?;
        Ok(Self {
            channel: Some(channel),
            record_id: Some(record_id),
        })
    }
}

fn attribute(element: &str, name: &str) -> Option<String> {
    let marker = format!("{}='", name);
    let start = element.find(&marker)? + marker.len();
    let len = element[start..].find('\'')?;
    Some(unescape(&element[start..start + len]))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: SyntheticEvent) -> StoredRecord {
        StoredRecord {
            record_id: 7,
            channel: "Application".into(),
            created: Filetime(0),
            event,
        }
    }

    #[test]
    fn test_insert_strings() {
        let data = vec!["Print Spooler".to_string(), "running".to_string()];
        assert_eq!(
            insert_strings("The %1 service entered the %2 state.", &data),
            "The Print Spooler service entered the running state."
        );
        assert_eq!(insert_strings("%3 and 100%", &data), "%3 and 100%");
    }

    #[test]
    fn test_query_filter_parse() {
        assert_eq!(QueryFilter::parse("*").unwrap(), QueryFilter::All);
        assert_eq!(
            QueryFilter::parse("*[System[(EventID=4624)]]").unwrap(),
            QueryFilter::EventId(4624)
        );
        assert_eq!(
            QueryFilter::parse("*[System[Level=2]]").unwrap(),
            QueryFilter::Level(2)
        );
        assert!(QueryFilter::parse("Event/System").is_err());
        assert!(QueryFilter::parse("*[System[Task=1]]").is_err());
    }

    #[test]
    fn test_bookmark_xml_roundtrip() {
        let state = BookmarkState {
            channel: Some("Microsoft-Windows-Sysmon/Operational".into()),
            record_id: Some(42),
        };
        let parsed = BookmarkState::parse(&state.to_xml()).unwrap();
        assert_eq!(parsed, state);

        let empty = BookmarkState::parse("<BookmarkList>\r\n</BookmarkList>").unwrap();
        assert_eq!(empty, BookmarkState::default());
        assert!(BookmarkState::parse("<Nope/>").is_err());
    }

    #[test]
    fn test_xml_escapes_data() {
        let rec = record(SyntheticEvent::new("P<1>", 1).data(["a&b"]));
        let xml = rec.to_xml().unwrap();
        assert!(xml.contains("Name='P&lt;1&gt;'"));
        assert!(xml.contains("<Data>a&amp;b</Data>"));
        assert!(xml.contains("<EventRecordID>7</EventRecordID>"));
    }

    #[test]
    fn test_xml_keeps_every_system_element() {
        let rec = StoredRecord {
            created: Filetime(15),
            ..record(
                SyntheticEvent::new("p", 4624)
                    .process(4, 96)
                    .computer("dc01")
                    .data(["x"]),
            )
        };
        let xml = rec.to_xml().unwrap();

        assert!(xml.contains("<TimeCreated SystemTime='1601-01-01T00:00:00.0000015Z'/>"));
        assert!(xml.contains("<EventRecordID>7</EventRecordID>"));
        assert!(xml.contains("<Execution ProcessID='4' ThreadID='96'/>"));
        assert!(xml.contains("<Channel>Application</Channel>"));
        assert!(xml.contains("<Computer>dc01</Computer>"));
        assert!(xml.contains("<Security/></System>"));
        assert!(xml.ends_with("<EventData><Data>x</Data></EventData></Event>"));
    }

    #[test]
    fn test_keyword_format_is_multi_string() {
        let publisher = PublisherMetadata::new("p")
            .keyword(0x1, "Audit Success")
            .keyword(0x2, "Classic");
        let rec = record(SyntheticEvent::new("p", 1).keywords(0x3));
        assert_eq!(
            publisher.format(&rec, FormatFlags::Keyword).unwrap(),
            "Audit Success\0Classic"
        );
    }
}
