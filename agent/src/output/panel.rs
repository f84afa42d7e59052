//! Timeline panels
//!
//! A panel is a two-band stacked area chart of one [`Series`]: metric A fills
//! the lower half, metric B the upper half. Each band is scaled by a maximum
//! that is either the series' own or supplied by the caller, so several panels
//! can share one vertical scale.

use super::{start_tag, write_declaration, write_text_element};
use crate::config::PanelSize;
use anyhow::{Context, Result};
use perfstack_shared::Series;
use quick_xml::events::{BytesEnd, Event};
use quick_xml::Writer;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Fraction of the width left blank on each side of the time axis
const X_MARGIN: f64 = 0.009;

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const BACKGROUND: &str = "#1e1e1e";
const COLOR_A: &str = "#83e4eb";
const COLOR_B: &str = "#33ffc4";
const LABEL_COLOR: &str = "white";
const FONT_SIZE: f64 = 18.0;

/// Which half of the panel a bar belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// Metric A, lower half
    Lower,
    /// Metric B, upper half
    Upper,
}

/// What to draw and how to scale it
#[derive(Debug, Clone)]
pub struct PanelSpec {
    pub label_a: String,
    pub label_b: String,
    pub size: PanelSize,
    /// Scale for metric A; the series maximum when `None`
    pub max_a: Option<f64>,
    /// Scale for metric B; the series maximum when `None`
    pub max_b: Option<f64>,
}

impl PanelSpec {
    pub fn new(label_a: impl Into<String>, label_b: impl Into<String>, size: PanelSize) -> Self {
        Self {
            label_a: label_a.into(),
            label_b: label_b.into(),
            size,
            max_a: None,
            max_b: None,
        }
    }

    /// Use externally supplied maxima instead of the series' own
    pub fn with_maxima(mut self, max_a: f64, max_b: f64) -> Self {
        self.max_a = Some(max_a);
        self.max_b = Some(max_b);
        self
    }
}

/// One rectangle of the area chart, in SVG user units (y grows downwards)
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub band: Band,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub value: f64,
}

/// Geometry of a rendered panel
#[derive(Debug, Clone, PartialEq)]
pub struct PanelLayout {
    pub width: f64,
    pub height: f64,
    pub x_offset: f64,
    pub label_a: String,
    pub label_b: String,
    /// Effective scale of metric A
    pub max_a: f64,
    /// Effective scale of metric B
    pub max_b: f64,
    pub bars: Vec<Bar>,
}

impl PanelLayout {
    /// Map a series onto panel geometry
    pub fn build(series: &Series, spec: &PanelSpec) -> Self {
        let PanelSize { width, height } = spec.size;
        let half = height / 2.0;
        let x_offset = width * X_MARGIN;
        let max_a = spec.max_a.unwrap_or_else(|| series.max_a());
        let max_b = spec.max_b.unwrap_or_else(|| series.max_b());

        let mut bars = Vec::new();
        let span = series.span();

        // A single point (or none) has no time extent to draw.
        if series.len() >= 2 && span > 0.0 {
            let x_scale = (width - 2.0 * x_offset) / span;
            for pair in series.samples().windows(2) {
                let (prev, cur) = (&pair[0], &pair[1]);
                let x = x_offset + prev.timestamp * x_scale;
                let bar_width = (cur.timestamp - prev.timestamp) * x_scale;

                if let Some(h) = band_height(prev.value_a, max_a, half) {
                    bars.push(Bar {
                        band: Band::Lower,
                        x,
                        y: height - h,
                        width: bar_width,
                        height: h,
                        value: prev.value_a,
                    });
                }
                if let Some(h) = band_height(prev.value_b, max_b, half) {
                    bars.push(Bar {
                        band: Band::Upper,
                        x,
                        y: half - h,
                        width: bar_width,
                        height: h,
                        value: prev.value_b,
                    });
                }
            }
        } else {
            debug!(
                "Series has {} sample(s); rendering an empty panel",
                series.len()
            );
        }

        Self {
            width,
            height,
            x_offset,
            label_a: spec.label_a.clone(),
            label_b: spec.label_b.clone(),
            max_a,
            max_b,
            bars,
        }
    }

    /// Bars belonging to one band, in time order
    pub fn band(&self, band: Band) -> impl Iterator<Item = &Bar> {
        self.bars.iter().filter(move |bar| bar.band == band)
    }

    /// Header text of a band, showing its scale
    pub fn header(&self, band: Band) -> String {
        match band {
            Band::Lower => format!("{} (max {:.1})", self.label_a, self.max_a),
            Band::Upper => format!("{} (max {:.1})", self.label_b, self.max_b),
        }
    }

    /// Serialize the panel as a standalone SVG document
    pub fn write_svg<W: Write>(&self, w: W) -> Result<()> {
        let (width, height, half) = (self.width, self.height, self.height / 2.0);
        let axis_width = width - 2.0 * self.x_offset;
        let (w_attr, h_attr) = (width.to_string(), height.to_string());

        let mut writer = Writer::new(w);
        write_declaration(&mut writer)?;
        writer.write_event(Event::Start(start_tag(
            "svg",
            &[
                ("xmlns", SVG_NS),
                ("width", w_attr.as_str()),
                ("height", h_attr.as_str()),
                ("viewBox", format!("0 0 {} {}", width, height).as_str()),
            ],
        )))?;
        writer.write_event(Event::Empty(start_tag(
            "rect",
            &[
                ("x", "0"),
                ("y", "0"),
                ("width", w_attr.as_str()),
                ("height", h_attr.as_str()),
                ("fill", BACKGROUND),
            ],
        )))?;

        for bar in &self.bars {
            let (color, label) = match bar.band {
                Band::Lower => (COLOR_A, &self.label_a),
                Band::Upper => (COLOR_B, &self.label_b),
            };
            writer.write_event(Event::Start(start_tag(
                "rect",
                &[
                    ("x", coord(bar.x).as_str()),
                    ("y", coord(bar.y).as_str()),
                    ("width", coord(bar.width).as_str()),
                    ("height", coord(bar.height).as_str()),
                    ("fill", color),
                ],
            )))?;
            write_text_element(&mut writer, "title", &[], &format!("{}: {:.1}", label, bar.value))?;
            writer.write_event(Event::End(BytesEnd::new("rect")))?;
        }

        // Baselines of both bands
        for (baseline, color) in [(height, COLOR_A), (half, COLOR_B)] {
            writer.write_event(Event::Empty(start_tag(
                "rect",
                &[
                    ("x", coord(self.x_offset).as_str()),
                    ("y", coord(baseline - 1.0).as_str()),
                    ("width", coord(axis_width).as_str()),
                    ("height", "1"),
                    ("fill", color),
                ],
            )))?;
        }

        for (band, top) in [(Band::Lower, half), (Band::Upper, 0.0)] {
            write_text_element(
                &mut writer,
                "text",
                &[
                    ("x", coord(self.x_offset).as_str()),
                    ("y", coord(top + FONT_SIZE + 2.0).as_str()),
                    ("font-family", "sans-serif"),
                    ("font-size", FONT_SIZE.to_string().as_str()),
                    ("fill", LABEL_COLOR),
                ],
                &self.header(band),
            )?;
        }

        writer.write_event(Event::End(BytesEnd::new("svg")))?;
        Ok(())
    }
}

fn coord(value: f64) -> String {
    format!("{:.3}", value)
}

/// Height of a band for `value` on a `max` scale, or `None` when the band is
/// omitted because its scale is zero.
fn band_height(value: f64, max: f64, half: f64) -> Option<f64> {
    if max.is_nan() || max <= 0.0 {
        return None;
    }
    Some(half * (value / max).clamp(0.0, 1.0))
}

/// Render a series to an SVG panel at `output_path`
pub fn render_panel(series: &Series, spec: &PanelSpec, output_path: &Path) -> Result<PanelLayout> {
    info!("Rendering panel: {}", output_path.display());

    let layout = PanelLayout::build(series, spec);

    let file = File::create(output_path)
        .with_context(|| format!("Failed to create panel file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    layout.write_svg(&mut writer)?;
    writer.flush()?;

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfstack_shared::Sample;

    fn series(points: &[(f64, f64, f64)]) -> Series {
        Series::from_samples(points.iter().map(|&(t, a, b)| Sample::new(t, a, b))).unwrap()
    }

    fn spec() -> PanelSpec {
        PanelSpec::new("% CPU", "% RAM", PanelSize::default())
    }

    #[test]
    fn test_declared_max_is_series_max() {
        let s = series(&[(0.0, 12.0, 40.0), (1.0, 87.5, 41.0), (2.0, 30.0, 39.0)]);
        let layout = PanelLayout::build(&s, &spec());

        assert_eq!(layout.max_a, 87.5);
        assert_eq!(layout.max_b, 41.0);
        assert_eq!(layout.header(Band::Lower), "% CPU (max 87.5)");
        assert_eq!(layout.header(Band::Upper), "% RAM (max 41.0)");
    }

    #[test]
    fn test_time_axis_spans_panel() {
        let s = series(&[(0.0, 10.0, 10.0), (1.0, 20.0, 20.0), (4.0, 30.0, 30.0)]);
        let layout = PanelLayout::build(&s, &spec());
        let lower: Vec<_> = layout.band(Band::Lower).collect();

        assert_eq!(lower.len(), 2);
        assert!((lower[0].x - 10.8).abs() < 1e-9);
        let right_edge = lower[1].x + lower[1].width;
        assert!((right_edge - (1200.0 - 10.8)).abs() < 1e-9);
        // Bars use the value of the earlier sample of each pair
        assert_eq!(lower[0].value, 10.0);
        assert_eq!(lower[1].value, 20.0);
    }

    #[test]
    fn test_bands_are_stacked() {
        let s = series(&[(0.0, 50.0, 100.0), (1.0, 0.0, 0.0)]);
        let layout = PanelLayout::build(&s, &spec().with_maxima(100.0, 100.0));

        let lower = layout.band(Band::Lower).next().unwrap();
        assert_eq!(lower.height, 50.0);
        assert_eq!(lower.y, 150.0);

        let upper = layout.band(Band::Upper).next().unwrap();
        assert_eq!(upper.height, 100.0);
        assert_eq!(upper.y, 0.0);
    }

    #[test]
    fn test_shared_max_keeps_heights_proportional() {
        let gpu0 = series(&[(0.0, 80.0, 20.0), (1.0, 10.0, 20.0)]);
        let gpu1 = series(&[(0.0, 40.0, 20.0), (1.0, 10.0, 20.0)]);
        let shared = spec().with_maxima(80.0, 20.0);

        let h0 = PanelLayout::build(&gpu0, &shared).band(Band::Lower).next().unwrap().height;
        let h1 = PanelLayout::build(&gpu1, &shared).band(Band::Lower).next().unwrap().height;

        assert_eq!(h0, 100.0);
        assert_eq!(h1 / h0, 40.0 / 80.0);
    }

    #[test]
    fn test_zero_max_omits_band() {
        let s = series(&[(0.0, 0.0, 30.0), (1.0, 0.0, 35.0), (2.0, 0.0, 20.0)]);
        let layout = PanelLayout::build(&s, &spec());

        assert_eq!(layout.max_a, 0.0);
        assert_eq!(layout.band(Band::Lower).count(), 0);
        assert_eq!(layout.band(Band::Upper).count(), 2);
    }

    #[test]
    fn test_unusable_max_omits_band() {
        assert_eq!(band_height(10.0, f64::NAN, 100.0), None);
        assert_eq!(band_height(10.0, -1.0, 100.0), None);
        assert_eq!(band_height(10.0, 20.0, 100.0), Some(50.0));
    }

    #[test]
    fn test_labels_are_escaped() {
        let s = series(&[(0.0, 1.0, 1.0), (1.0, 2.0, 2.0)]);
        let spec = PanelSpec::new("<util> & co", "mem", PanelSize::default());
        let mut out = Vec::new();
        PanelLayout::build(&s, &spec).write_svg(&mut out).unwrap();

        let svg = String::from_utf8(out).unwrap();
        assert!(svg.contains("<title>&lt;util&gt; &amp; co: 1.0</title>"));
        assert!(!svg.contains("<util>"));
    }

    #[test]
    fn test_short_series_renders_flat_panel() {
        let single = series(&[(0.0, 50.0, 50.0)]);
        let layout = PanelLayout::build(&single, &spec());
        assert!(layout.bars.is_empty());
        assert_eq!(layout.max_a, 50.0);

        let empty = PanelLayout::build(&Series::new(), &spec());
        assert!(empty.bars.is_empty());
        assert_eq!(empty.max_a, 0.0);
    }

    #[test]
    fn test_render_panel_writes_svg() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cpu.svg");
        let s = series(&[(0.0, 10.0, 60.0), (0.5, 90.0, 61.0), (1.0, 40.0, 62.0)]);

        let layout = render_panel(&s, &spec(), &path).unwrap();
        assert_eq!(layout.bars.len(), 4);

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains(r#"width="1200" height="200""#));
        assert!(svg.contains("<title>% CPU: 10.0</title>"));
        assert!(svg.contains("% CPU (max 90.0)"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }
}
