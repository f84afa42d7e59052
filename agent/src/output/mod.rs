//! Output generation: timeline panels, flame chart, HTML report and the
//! composed document

pub mod compose;
pub mod flamegraph;
pub mod html;
pub mod panel;

use anyhow::Result;
use perfstack_shared::DeviceIndex;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File names of every artifact a run produces, derived from one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    prefix: PathBuf,
}

impl ArtifactPaths {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Timeline HTML report
    pub fn report(&self) -> PathBuf {
        self.with_suffix(".html")
    }

    /// Flame chart (intermediate)
    pub fn flame_chart(&self) -> PathBuf {
        self.with_suffix("_cs.svg")
    }

    /// CPU/RAM panel (intermediate)
    pub fn cpu_panel(&self) -> PathBuf {
        self.with_suffix("_cpu.svg")
    }

    /// Panel of one GPU (intermediate)
    pub fn gpu_panel(&self, device: DeviceIndex) -> PathBuf {
        self.with_suffix(&format!("_gpu_{}.svg", device))
    }

    /// Raw profiler output (intermediate)
    pub fn profiler_raw(&self) -> PathBuf {
        self.with_suffix("_stacks.json")
    }

    /// Uncaught exception summary left by a Python target
    pub fn exception_report(&self) -> PathBuf {
        self.with_suffix("_exception.txt")
    }

    /// Final composed document
    pub fn composed(&self) -> PathBuf {
        self.with_suffix(".svg")
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Start tag carrying `attributes` in order; values are escaped on write
pub(crate) fn start_tag<'a>(name: &'a str, attributes: &[(&str, &str)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for &attribute in attributes {
        start.push_attribute(attribute);
    }
    start
}

/// `<name attributes...>text</name>`
pub(crate) fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(start_tag(name, attributes)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// `<?xml version="1.0" encoding="UTF-8" standalone="no"?>`
pub(crate) fn write_declaration<W: Write>(writer: &mut Writer<W>) -> Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;
    Ok(())
}
