//! Vertical composition of SVG panels
//!
//! Each input document is nested unchanged as a positioned child `<svg>` of
//! one output document, stacked top to bottom in the order given with a fixed
//! gap. Only the root element's size is inspected; nothing else is parsed.

use super::{start_tag, write_declaration};
use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Gap between two stacked panels
pub const PANEL_SPACING: f64 = 10.0;

/// A panel's position in the composed document
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedPanel {
    pub path: PathBuf,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Structure of a composed document
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedLayout {
    pub width: f64,
    pub height: f64,
    pub panels: Vec<PlacedPanel>,
}

impl ComposedLayout {
    /// Stack panels of the given sizes top to bottom
    pub fn stack(sizes: &[(PathBuf, f64, f64)], spacing: f64) -> Self {
        let mut panels = Vec::with_capacity(sizes.len());
        let mut y = 0.0;
        let mut width: f64 = 0.0;

        for (i, (path, w, h)) in sizes.iter().enumerate() {
            if i > 0 {
                y += spacing;
            }
            panels.push(PlacedPanel {
                path: path.clone(),
                y,
                width: *w,
                height: *h,
            });
            y += h;
            width = width.max(*w);
        }

        Self {
            width,
            height: y,
            panels,
        }
    }
}

/// An input SVG split around its root start tag
struct SvgDocument {
    width: f64,
    height: f64,
    /// Root attributes other than position and size
    attributes: Vec<(String, String)>,
    /// Everything after the root start tag, including the closing `</svg>`
    body: Option<String>,
}

impl SvgDocument {
    fn parse(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);

        let (root, self_closing) = loop {
            match reader.read_event().context("Malformed SVG")? {
                Event::Start(e) => break (e.into_owned(), false),
                Event::Empty(e) => break (e.into_owned(), true),
                Event::Eof => bail!("Document has no root element"),
                _ => {}
            }
        };
        if root.local_name().as_ref() != b"svg" {
            bail!(
                "Root element is <{}>, not <svg>",
                String::from_utf8_lossy(root.name().as_ref())
            );
        }

        let body_start = usize::try_from(reader.buffer_position()).context("Document too large")?;
        let (width, height, attributes) = root_geometry(&root)?;

        Ok(Self {
            width,
            height,
            attributes,
            body: (!self_closing).then(|| text[body_start..].trim_end().to_string()),
        })
    }

    /// Write the document as a child `<svg>` placed at `y`
    fn write_nested<W: Write>(&self, writer: &mut Writer<W>, y: f64) -> Result<()> {
        let (y, width, height) = (y.to_string(), self.width.to_string(), self.height.to_string());
        let mut attributes = vec![
            ("x", "0"),
            ("y", y.as_str()),
            ("width", width.as_str()),
            ("height", height.as_str()),
        ];
        attributes.extend(self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let start = start_tag("svg", &attributes);

        match &self.body {
            Some(body) => {
                writer.write_event(Event::Start(start))?;
                // The body is copied verbatim, closing tag included
                writer.get_mut().write_all(body.as_bytes())?;
            }
            None => writer.write_event(Event::Empty(start))?,
        }
        writer.get_mut().write_all(b"\n")?;
        Ok(())
    }
}

/// Size of the root element plus the attributes to carry over
fn root_geometry(root: &BytesStart<'_>) -> Result<(f64, f64, Vec<(String, String)>)> {
    let mut width = None;
    let mut height = None;
    let mut view_box = None;
    let mut attributes = Vec::new();

    for attr in root.attributes() {
        let attr = attr.context("Malformed attribute on <svg>")?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().context("Malformed attribute value")?.into_owned();

        match key.as_str() {
            "width" => width = parse_length(&value),
            "height" => height = parse_length(&value),
            "x" | "y" => {}
            _ => {
                if key == "viewBox" {
                    view_box = parse_view_box(&value);
                }
                attributes.push((key, value));
            }
        }
    }

    let width = width.or(view_box.map(|(w, _)| w));
    let height = height.or(view_box.map(|(_, h)| h));
    match (width, height) {
        (Some(w), Some(h)) => Ok((w, h, attributes)),
        _ => bail!("SVG root has no usable width/height or viewBox"),
    }
}

/// Absolute length in user units; percentages and unknown units are rejected
fn parse_length(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = value.strip_suffix("px").unwrap_or(value);
    number.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_view_box(value: &str) -> Option<(f64, f64)> {
    let parts: Vec<f64> = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [_, _, w, h] if *w > 0.0 && *h > 0.0 => Some((*w, *h)),
        _ => None,
    }
}

/// Stack the SVG files at `inputs` (in order) into one document at `output`.
///
/// Inputs that do not exist are skipped.
pub fn compose(inputs: &[PathBuf], output: &Path, spacing: f64) -> Result<ComposedLayout> {
    let mut documents = Vec::with_capacity(inputs.len());
    for path in inputs {
        if !path.exists() {
            warn!("Skipping missing panel: {}", path.display());
            continue;
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read panel: {}", path.display()))?;
        let document = SvgDocument::parse(&text)
            .with_context(|| format!("Failed to parse panel: {}", path.display()))?;
        documents.push((path.clone(), document));
    }

    if documents.is_empty() {
        bail!("No panels to compose");
    }

    let sizes: Vec<(PathBuf, f64, f64)> = documents
        .iter()
        .map(|(path, doc)| (path.clone(), doc.width, doc.height))
        .collect();
    let layout = ComposedLayout::stack(&sizes, spacing);

    let (width, height) = (layout.width.to_string(), layout.height.to_string());
    let mut writer = Writer::new(Vec::new());
    write_declaration(&mut writer)?;
    writer.get_mut().write_all(b"\n")?;
    writer.write_event(Event::Start(start_tag(
        "svg",
        &[
            ("xmlns", "http://www.w3.org/2000/svg"),
            ("xmlns:xlink", "http://www.w3.org/1999/xlink"),
            ("width", width.as_str()),
            ("height", height.as_str()),
            ("viewBox", format!("0 0 {} {}", width, height).as_str()),
        ],
    )))?;
    writer.get_mut().write_all(b"\n")?;
    for ((_, document), placed) in documents.iter().zip(&layout.panels) {
        document.write_nested(&mut writer, placed.y)?;
    }
    writer.write_event(Event::End(BytesEnd::new("svg")))?;
    writer.get_mut().write_all(b"\n")?;

    std::fs::write(output, writer.into_inner())
        .with_context(|| format!("Failed to write composed document: {}", output.display()))?;
    info!(
        "Composed {} panel(s) into {} ({}x{})",
        layout.panels.len(),
        output.display(),
        layout.width,
        layout.height
    );

    Ok(layout)
}
