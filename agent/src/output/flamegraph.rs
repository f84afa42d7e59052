//! Flame chart generation
//!
//! Renders a profile session as a time-ordered flame chart using the inferno
//! library. Sessions without samples get a small placeholder SVG of the same
//! width so the composed document keeps its shape.

use super::{start_tag, write_declaration, write_text_element};
use crate::profiler::ProfileSession;
use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, Event};
use quick_xml::Writer;
use std::path::Path;
use tracing::{info, warn};

const PLACEHOLDER_HEIGHT: usize = 60;

/// Render the session as flame chart SVG markup
pub fn render_flame_chart(session: &ProfileSession, width: usize) -> Result<Vec<u8>> {
    let lines = session.folded_timeline();
    if lines.is_empty() {
        warn!("No call-stack samples collected; writing placeholder flame chart");
        return placeholder_svg(session, width);
    }

    let mut opts = inferno::flamegraph::Options::default();
    opts.title = session.program.clone();
    opts.subtitle = Some(format!(
        "{} samples over {:.2}s",
        session.sample_count(),
        session.duration_secs
    ));
    opts.count_name = "samples".to_string();
    opts.flame_chart = true;
    opts.image_width = Some(width);

    let mut svg = Vec::new();
    inferno::flamegraph::from_lines(&mut opts, lines.iter().map(|s| s.as_str()), &mut svg)
        .context("Failed to generate flame chart SVG")?;
    Ok(svg)
}

/// Render the flame chart and write it to `output_path`; returns the markup
pub fn generate_flame_chart(
    session: &ProfileSession,
    output_path: &Path,
    width: usize,
) -> Result<Vec<u8>> {
    info!("Generating flame chart: {}", output_path.display());

    let svg = render_flame_chart(session, width)?;
    std::fs::write(output_path, &svg)
        .with_context(|| format!("Failed to write flame chart: {}", output_path.display()))?;

    Ok(svg)
}

fn placeholder_svg(session: &ProfileSession, width: usize) -> Result<Vec<u8>> {
    let (w, h) = (width.to_string(), PLACEHOLDER_HEIGHT.to_string());

    let mut writer = Writer::new(Vec::new());
    write_declaration(&mut writer)?;
    writer.write_event(Event::Start(start_tag(
        "svg",
        &[
            ("xmlns", "http://www.w3.org/2000/svg"),
            ("width", w.as_str()),
            ("height", h.as_str()),
            ("viewBox", format!("0 0 {} {}", w, h).as_str()),
        ],
    )))?;
    writer.write_event(Event::Empty(start_tag(
        "rect",
        &[
            ("x", "0"),
            ("y", "0"),
            ("width", w.as_str()),
            ("height", h.as_str()),
            ("fill", "#eeeeee"),
        ],
    )))?;
    write_text_element(
        &mut writer,
        "text",
        &[
            ("x", (width / 2).to_string().as_str()),
            ("y", "36"),
            ("font-family", "sans-serif"),
            ("font-size", "17"),
            ("text-anchor", "middle"),
        ],
        &format!("{}: no call-stack samples collected", session.program),
    )?;
    writer.write_event(Event::End(BytesEnd::new("svg")))?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::tests::session;
    use std::time::Duration;

    #[test]
    fn test_generate_flame_chart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_path = temp_dir.path().join("run_cs.svg");

        let svg = generate_flame_chart(&session(), &output_path, 1200).unwrap();
        assert!(output_path.exists());

        let content = String::from_utf8(svg).unwrap();
        assert!(content.contains("<svg"));
        assert!(content.contains("job.py"));
        assert!(content.contains("train"));
    }

    #[test]
    fn test_empty_session_placeholder() {
        let session = ProfileSession::empty("a<b>.py", Duration::from_millis(1));
        let svg = String::from_utf8(render_flame_chart(&session, 1200).unwrap()).unwrap();

        assert!(svg.contains(r#"width="1200" height="60""#));
        assert!(svg.contains("a&lt;b&gt;.py"));
    }
}
