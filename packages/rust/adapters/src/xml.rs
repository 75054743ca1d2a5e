//! Minimal XML views over search feeds and document bodies (`quick-xml`).
//!
//! Elements are addressed by local name so namespace prefixes
//! (`dcterms:`, `sru:`, Atom default namespace) do not matter.

use std::collections::BTreeMap;

use policyharvest_shared::{PolicyHarvestError, Result};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::reader::Reader;

/// Elements that end a paragraph when flattening text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "para", "al", "title", "titel", "kop", "li", "tr", "h1", "h2", "h3", "div", "section",
];

#[derive(Debug, Clone, Default)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
}

/// Flat list of the elements inside one record, in document order.
#[derive(Debug, Clone, Default)]
pub(crate) struct XmlRecord {
    pub elements: Vec<XmlElement>,
}

impl XmlRecord {
    /// Text of the first non-empty element with this local name.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| e.name == name && !e.text.is_empty())
            .map(|e| e.text.as_str())
    }

    /// Text of every non-empty element with this local name.
    pub fn all(&self, name: &str) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|e| e.name == name && !e.text.is_empty())
            .map(|e| e.text.as_str())
            .collect()
    }

    /// Text of the first element `name` whose attribute `attr` equals `value`.
    pub fn first_where(&self, name: &str, attr: &str, value: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| {
                e.name == name
                    && !e.text.is_empty()
                    && e.attrs.get(attr).is_some_and(|v| v == value)
            })
            .map(|e| e.text.as_str())
    }

    /// Attribute `attr` of the first element `name` that carries it, optionally
    /// requiring another attribute match (e.g. `rel="alternate"`).
    pub fn attr(&self, name: &str, attr: &str, when: Option<(&str, &str)>) -> Option<&str> {
        self.elements
            .iter()
            .filter(|e| e.name == name)
            .filter(|e| when.is_none_or(|(k, v)| e.attrs.get(k).is_some_and(|a| a == v)))
            .find_map(|e| e.attrs.get(attr).map(String::as_str))
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> BTreeMap<String, String> {
    e.attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
            (key, value)
        })
        .collect()
}

fn text_of(t: &BytesText<'_>) -> String {
    t.unescape()
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(t).into_owned())
}

fn parse_error(e: impl std::fmt::Display, pos: u64) -> PolicyHarvestError {
    PolicyHarvestError::parse(format!("malformed XML at byte {pos}: {e}"))
}

/// Collect every `record_tag` element as an [`XmlRecord`].
pub(crate) fn records(xml: &str, record_tag: &str) -> Result<Vec<XmlRecord>> {
    collect(xml, Some(record_tag))
}

/// Every element below the document root as one [`XmlRecord`].
pub(crate) fn document(xml: &str) -> Result<XmlRecord> {
    Ok(collect(xml, None)?.into_iter().next().unwrap_or_default())
}

fn collect(xml: &str, record_tag: Option<&str>) -> Result<Vec<XmlRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut current: Option<XmlRecord> = None;
    let mut stack: Vec<XmlElement> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error(e, reader.buffer_position() as u64))?;
        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                if current.is_none() {
                    if record_tag.is_none_or(|tag| name == tag) {
                        current = Some(XmlRecord::default());
                    }
                    continue;
                }
                stack.push(XmlElement {
                    name,
                    attrs: attributes(&e),
                    text: String::new(),
                });
            }
            Event::Empty(e) => {
                if let Some(record) = current.as_mut() {
                    record.elements.push(XmlElement {
                        name: local_name(&e),
                        attrs: attributes(&e),
                        text: String::new(),
                    });
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    push_text(&mut top.text, &text_of(&t));
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    push_text(&mut top.text, &String::from_utf8_lossy(&c));
                }
            }
            Event::End(e) => {
                let Some(record) = current.as_mut() else {
                    continue;
                };
                match stack.pop() {
                    Some(element) => record.elements.push(element),
                    None => {
                        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        if record_tag.is_none_or(|tag| name == tag) {
                            out.extend(current.take());
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Flatten the text inside the first element named in `containers`, or the
/// whole document when none of them occurs. Paragraph structure is kept as
/// newlines.
pub(crate) fn text_within(xml: &str, containers: &[&str]) -> Result<String> {
    let scoped = flatten(xml, Some(containers))?;
    if scoped.is_empty() {
        flatten(xml, None)
    } else {
        Ok(scoped)
    }
}

fn flatten(xml: &str, containers: Option<&[&str]>) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = String::new();
    let mut depth: usize = 0;
    let mut done = false;
    let inside = |depth: usize| containers.is_none() || depth > 0;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error(e, reader.buffer_position() as u64))?;
        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                if let Some(names) = containers {
                    if !done && (depth > 0 || names.contains(&name.as_str())) {
                        depth += 1;
                    }
                }
            }
            Event::Text(t) if inside(depth) && !done => push_text(&mut buf, &text_of(&t)),
            Event::CData(c) if inside(depth) && !done => {
                push_text(&mut buf, &String::from_utf8_lossy(&c))
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if inside(depth) && !done && BLOCK_ELEMENTS.contains(&name.as_str()) {
                    buf.push('\n');
                }
                if containers.is_some() && depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        done = true;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(normalize_lines(&buf))
}

fn push_text(buf: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push(' ');
    }
    buf.push_str(text);
}

/// Collapse runs of whitespace inside lines and drop empty lines.
pub(crate) fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
