//! HTML timeline report
//!
//! A single self-contained page: run summary, the flame chart inlined as the
//! timeline, and a collapsible call tree with total and self time per frame.

use super::{start_tag, write_text_element};
use crate::profiler::{CallNode, ProfileSession};
use anyhow::{Context, Result};
use perfstack_shared::utils::{format_rate, time::format_local};
use quick_xml::events::{BytesEnd, BytesText, Event};
use quick_xml::Writer;
use std::path::Path;
use tracing::info;

/// Nodes below this share of the total are folded away
const MIN_NODE_SHARE: f64 = 0.001;

/// Deepest call-tree level written out
const MAX_DEPTH: usize = 128;

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 2em; background: #fafafa; color: #222; }
table.summary td { padding: 2px 12px 2px 0; }
.timeline { overflow-x: auto; border: 1px solid #ddd; background: white; }
details { margin-left: 1.2em; }
summary { cursor: pointer; white-space: nowrap; font-family: monospace; }
.total { display: inline-block; width: 5.5em; text-align: right; color: #b03a2e; }
.self { display: inline-block; width: 5.5em; text-align: right; color: #888; }
.hidden { margin-left: 1.2em; color: #888; font-style: italic; }
"#;

/// Render the report page
pub fn render_html(session: &ProfileSession, flame_svg: &[u8], host: &str) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::DocType(BytesText::from_escaped("html")))?;
    writer.write_event(Event::Start(start_tag("html", &[])))?;
    writer.write_event(Event::Start(start_tag("head", &[])))?;
    writer.write_event(Event::Empty(start_tag("meta", &[("charset", "utf-8")])))?;
    write_text_element(&mut writer, "title", &[], &format!("{} - perfstack", session.program))?;
    writer.write_event(Event::Start(start_tag("style", &[])))?;
    writer.write_event(Event::Text(BytesText::from_escaped(STYLE)))?;
    writer.write_event(Event::End(BytesEnd::new("style")))?;
    writer.write_event(Event::End(BytesEnd::new("head")))?;
    writer.write_event(Event::Start(start_tag("body", &[])))?;
    write_text_element(&mut writer, "h1", &[], &session.program)?;

    writer.write_event(Event::Start(start_tag("table", &[("class", "summary")])))?;
    for (key, value) in [
        ("Host", host.to_string()),
        ("Recorded", format_local(session.started_at)),
        ("Duration", format!("{:.3} s", session.duration_secs)),
        ("Samples", session.sample_count().to_string()),
        ("Sampling rate", format_rate(session.interval)),
        ("Threads", session.threads.len().to_string()),
    ] {
        writer.write_event(Event::Start(start_tag("tr", &[])))?;
        write_text_element(&mut writer, "td", &[], key)?;
        write_text_element(&mut writer, "td", &[], &value)?;
        writer.write_event(Event::End(BytesEnd::new("tr")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("table")))?;

    write_text_element(&mut writer, "h2", &[], "Timeline")?;
    writer.write_event(Event::Start(start_tag("div", &[("class", "timeline")])))?;
    // Inlined as-is; only the prolog is dropped
    writer
        .get_mut()
        .extend_from_slice(strip_prolog(&String::from_utf8_lossy(flame_svg)).as_bytes());
    writer.write_event(Event::End(BytesEnd::new("div")))?;

    write_text_element(&mut writer, "h2", &[], "Call tree")?;
    if session.is_empty() {
        write_text_element(&mut writer, "p", &[], "No call-stack samples were collected.")?;
    } else {
        let tree = session.call_tree();
        let threshold = tree.total_secs * MIN_NODE_SHARE;
        writer.write_event(Event::Start(start_tag("p", &[])))?;
        write_text_element(&mut writer, "span", &[("class", "total")], "total")?;
        write_text_element(&mut writer, "span", &[("class", "self")], "self")?;
        writer.write_event(Event::End(BytesEnd::new("p")))?;
        write_node(&mut writer, &tree, tree.total_secs, threshold, 0)?;
    }

    writer.write_event(Event::End(BytesEnd::new("body")))?;
    writer.write_event(Event::End(BytesEnd::new("html")))?;

    String::from_utf8(writer.into_inner()).context("Report is not valid UTF-8")
}

fn write_node(
    writer: &mut Writer<Vec<u8>>,
    node: &CallNode,
    root_total: f64,
    threshold: f64,
    depth: usize,
) -> Result<()> {
    let share = if root_total > 0.0 {
        100.0 * node.total_secs / root_total
    } else {
        0.0
    };
    let details = if depth < 3 {
        start_tag("details", &[("open", "open")])
    } else {
        start_tag("details", &[])
    };

    writer.write_event(Event::Start(details))?;
    writer.write_event(Event::Start(start_tag("summary", &[])))?;
    write_text_element(writer, "span", &[("class", "total")], &format!("{:.3}s", node.total_secs))?;
    write_text_element(writer, "span", &[("class", "self")], &format!("{:.3}s", node.self_secs))?;
    writer.write_event(Event::Text(BytesText::new(&format!(" {:5.1}% {}", share, node.label))))?;
    writer.write_event(Event::End(BytesEnd::new("summary")))?;

    if depth < MAX_DEPTH {
        let mut hidden = 0usize;
        for child in &node.children {
            if child.total_secs < threshold {
                hidden += 1;
                continue;
            }
            write_node(writer, child, root_total, threshold, depth + 1)?;
        }
        if hidden > 0 {
            write_text_element(
                writer,
                "div",
                &[("class", "hidden")],
                &format!("{} insignificant call(s) hidden", hidden),
            )?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("details")))?;
    Ok(())
}

/// Drop the XML declaration and doctype so the SVG can be inlined in HTML
fn strip_prolog(svg: &str) -> &str {
    match svg.find("<svg") {
        Some(start) => &svg[start..],
        None => svg,
    }
}

/// Render the report and write it to `output_path`
pub fn generate_report(session: &ProfileSession, flame_svg: &[u8], output_path: &Path) -> Result<()> {
    info!("Generating HTML report: {}", output_path.display());

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    std::fs::write(output_path, render_html(session, flame_svg, &host)?)
        .with_context(|| format!("Failed to write report: {}", output_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::tests::session;
    use std::time::Duration;

    #[test]
    fn test_report_contains_tree_and_timeline() {
        let flame = br#"<?xml version="1.0"?><!DOCTYPE svg><svg width="10"></svg>"#;
        let html = render_html(&session(), flame, "build-box").unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<td>build-box</td>"));
        assert!(html.contains("<td>6</td>"));
        assert!(html.contains(r#"<div class="timeline">"#));
        assert!(html.contains(r#"<svg width="10"></svg>"#));
        assert!(!html.contains("<?xml"));
        assert!(html.contains("step (job.py:30)"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_report_escapes_program_and_host() {
        let mut session = session();
        session.program = "a<b>.py".to_string();
        let html = render_html(&session, b"<svg></svg>", "host & co").unwrap();

        assert!(html.contains("<h1>a&lt;b&gt;.py</h1>"));
        assert!(html.contains("<td>host &amp; co</td>"));
        assert!(!html.contains("a<b>"));
    }

    #[test]
    fn test_report_for_empty_session() {
        let session = ProfileSession::empty("job.py", Duration::from_millis(1));
        let html = render_html(&session, b"<svg></svg>", "h").unwrap();
        assert!(html.contains("No call-stack samples were collected."));
    }

    #[test]
    fn test_generate_report_writes_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("run.html");
        generate_report(&session(), b"<svg></svg>", &path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("Call tree"));
    }
}
