//! Layouts render one event into text.
//!
//! [`PatternLayout`] understands the classic conversion-pattern syntax:
//!
//! | Conversion | Output |
//! |------------|--------|
//! | `%m` | rendered message |
//! | `%p` | level |
//! | `%c`, `%c{n}` | logger name, optionally only the last `n` segments |
//! | `%t` | thread name |
//! | `%d`, `%d{fmt}` | timestamp in local time; `fmt` uses strftime syntax |
//! | `%r` | milliseconds between layout creation and the event |
//! | `%X{key}`, `%X` | one mapped context entry, or the whole map |
//! | `%x` | nested context |
//! | `%F` `%L` `%M` `%l` | file, line, function, full call site |
//! | `%n` | platform line separator |
//! | `%%` | literal percent |
//!
//! Each conversion accepts `-` (left justify), a minimum width and `.max` truncation,
//! e.g. `%-5p` or `%.10c`. Truncation drops characters from the left.

use std::fmt::{self, Write as _};
use std::time::SystemTime;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

use crate::event::LogEvent;

/// Platform line separator appended by `%n` and after trace lines.
#[cfg(windows)]
pub const LINE_SEP: &str = "\r\n";
/// Platform line separator appended by `%n` and after trace lines.
#[cfg(not(windows))]
pub const LINE_SEP: &str = "\n";

/// Pattern used when none is supplied.
pub const DEFAULT_CONVERSION_PATTERN: &str = "%m%n";

/// Timestamp format used by a bare `%d`.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Renders events for the message body.
pub trait Layout: Send + Sync + fmt::Debug {
    fn format(&self, event: &LogEvent) -> String;

    fn header(&self) -> Option<String> {
        None
    }

    fn footer(&self) -> Option<String> {
        None
    }

    /// MIME type of the rendered text.
    fn content_type(&self) -> &str {
        "text/plain"
    }

    /// When true the layout leaves trace lines out of `format`, and the caller appends them.
    fn ignores_throwable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Modifier {
    left_align: bool,
    min: usize,
    max: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Conversion {
    Message,
    Level,
    Logger(Option<usize>),
    Thread,
    Date(String),
    Relative,
    Mdc(Option<String>),
    Ndc,
    File,
    Line,
    Method,
    Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Convert(Modifier, Conversion),
}

/// Conversion-pattern layout.
#[derive(Debug, Clone)]
pub struct PatternLayout {
    pattern: String,
    segments: Vec<Segment>,
    header: Option<String>,
    footer: Option<String>,
    content_type: String,
    created: SystemTime,
}

impl PatternLayout {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let segments = parse(&pattern);
        Self {
            pattern,
            segments,
            header: None,
            footer: None,
            content_type: "text/plain".into(),
            created: SystemTime::now(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    fn convert(&self, conversion: &Conversion, event: &LogEvent) -> String {
        match conversion {
            Conversion::Message => event.message.clone(),
            Conversion::Level => event.level.as_str().to_string(),
            Conversion::Logger(precision) => abbreviate(&event.logger_name, *precision),
            Conversion::Thread => event.thread_name.clone(),
            Conversion::Date(format) => {
                let local: DateTime<Local> = DateTime::from(event.timestamp);
                let mut out = String::new();
                // Items were validated when the pattern was parsed.
                let _ = write!(out, "{}", local.format(format));
                out
            }
            Conversion::Relative => event
                .timestamp
                .duration_since(self.created)
                .map(|d| d.as_millis().to_string())
                .unwrap_or_else(|_| "0".to_string()),
            Conversion::Mdc(Some(key)) => event.context.get(key).cloned().unwrap_or_default(),
            Conversion::Mdc(None) => {
                let pairs: Vec<String> =
                    event.context.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                format!("{{{}}}", pairs.join(", "))
            }
            Conversion::Ndc => event.nested_context.clone().unwrap_or_default(),
            Conversion::File => location_field(event, |l| l.file.clone()),
            Conversion::Line => location_field(event, |l| l.line.map(|n| n.to_string())),
            Conversion::Method => location_field(event, |l| l.function.clone()),
            Conversion::Location => {
                event.location.as_ref().map_or_else(|| "?".to_string(), |l| l.to_string())
            }
        }
    }
}

impl Default for PatternLayout {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERSION_PATTERN)
    }
}

impl Layout for PatternLayout {
    fn format(&self, event: &LogEvent) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Convert(modifier, conversion) => {
                    let value = self.convert(conversion, event);
                    apply_modifier(&mut out, &value, *modifier);
                }
            }
        }
        out
    }

    fn header(&self) -> Option<String> {
        self.header.clone()
    }

    fn footer(&self) -> Option<String> {
        self.footer.clone()
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// `LEVEL - message` per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleLayout;

impl Layout for SimpleLayout {
    fn format(&self, event: &LogEvent) -> String {
        format!("{} - {}{}", event.level, event.message, LINE_SEP)
    }
}

fn location_field<F>(event: &LogEvent, field: F) -> String
where
    F: Fn(&crate::event::Location) -> Option<String>,
{
    event.location.as_ref().and_then(field).unwrap_or_else(|| "?".to_string())
}

fn abbreviate(name: &str, precision: Option<usize>) -> String {
    let Some(keep) = precision else {
        return name.to_string();
    };
    if keep == 0 {
        return name.to_string();
    }
    let sep = if name.contains("::") { "::" } else { "." };
    let parts: Vec<&str> = name.split(sep).collect();
    if parts.len() <= keep {
        return name.to_string();
    }
    parts[parts.len() - keep..].join(sep)
}

fn apply_modifier(out: &mut String, value: &str, modifier: Modifier) {
    let mut value: &str = value;
    if let Some(max) = modifier.max {
        let count = value.chars().count();
        if count > max {
            let skip = count - max;
            let start = value.char_indices().nth(skip).map_or(value.len(), |(i, _)| i);
            value = &value[start..];
        }
    }
    let width = value.chars().count();
    let pad = modifier.min.saturating_sub(width);
    if modifier.left_align {
        out.push_str(value);
        out.extend(std::iter::repeat(' ').take(pad));
    } else {
        out.extend(std::iter::repeat(' ').take(pad));
        out.push_str(value);
    }
}

fn date_format(option: Option<String>) -> String {
    match option {
        Some(fmt) if !StrftimeItems::new(&fmt).any(|item| matches!(item, Item::Error)) => fmt,
        _ => DEFAULT_DATE_FORMAT.to_string(),
    }
}

fn parse(pattern: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }

        let mut raw = String::from('%');
        let mut modifier = Modifier::default();
        if chars.peek() == Some(&'-') {
            modifier.left_align = true;
            raw.push('-');
            chars.next();
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        raw.push_str(&digits);
        modifier.min = digits.parse().unwrap_or(0);
        if chars.peek() == Some(&'.') {
            chars.next();
            raw.push('.');
            let mut max = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                max.push(d);
                chars.next();
            }
            raw.push_str(&max);
            modifier.max = max.parse().ok();
        }

        let Some(kind) = chars.next() else {
            literal.push_str(&raw);
            break;
        };
        let option = if chars.peek() == Some(&'{') {
            let mut opt = String::new();
            let mut closed = false;
            let mut lookahead = chars.clone();
            lookahead.next();
            for o in lookahead.by_ref() {
                if o == '}' {
                    closed = true;
                    break;
                }
                opt.push(o);
            }
            if closed {
                chars = lookahead;
                Some(opt)
            } else {
                None
            }
        } else {
            None
        };

        let conversion = match kind {
            '%' => {
                literal.push('%');
                continue;
            }
            'n' => {
                literal.push_str(LINE_SEP);
                continue;
            }
            'm' => Conversion::Message,
            'p' => Conversion::Level,
            'c' => Conversion::Logger(option.and_then(|o| o.trim().parse().ok())),
            't' => Conversion::Thread,
            'd' => Conversion::Date(date_format(option)),
            'r' => Conversion::Relative,
            'X' => Conversion::Mdc(option),
            'x' => Conversion::Ndc,
            'F' => Conversion::File,
            'L' => Conversion::Line,
            'M' => Conversion::Method,
            'l' => Conversion::Location,
            other => {
                literal.push_str(&raw);
                literal.push(other);
                if let Some(opt) = option {
                    literal.push('{');
                    literal.push_str(&opt);
                    literal.push('}');
                }
                continue;
            }
        };
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Convert(modifier, conversion));
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}
