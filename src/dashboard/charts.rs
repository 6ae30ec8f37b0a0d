//! SVG charts
//!
//! Plain SVG markup for the dashboard pages: line charts of scalar series
//! and bar charts of weight histograms.

use crate::dashboard::runs::ScalarPoint;
use crate::utils::metrics::WeightHistogram;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 90.0;

const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";
const COLOR_BAR: &str = "#3498db";

/// Series colours, assigned in order
pub const PALETTE: [&str; 5] = ["#3498db", "#e74c3c", "#2ecc71", "#9b59b6", "#f39c12"];

/// Most x-axis labels drawn on one chart
const MAX_X_TICKS: usize = 10;

/// One line of a line chart
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    /// `(x, y)` pairs in drawing order
    pub points: Vec<(f64, f64)>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: impl Into<String>, points: Vec<(f64, f64)>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points,
            color: color.into(),
        }
    }

    /// Series of a logged scalar, x = step
    pub fn from_scalars(name: impl Into<String>, points: &[ScalarPoint], color: impl Into<String>) -> Self {
        Self::new(
            name,
            points.iter().map(|p| (p.step as f64, p.value)).collect(),
            color,
        )
    }
}

fn svg_open(svg: &mut String, title: &str) {
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    ));
}

fn axes(svg: &mut String, x_label: &str, y_label: &str, y_min: f64, y_max: f64) {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    for i in 0..=5 {
        let y = MARGIN_TOP + plot_height - (i as f64 / 5.0) * plot_height;
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);

        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            COLOR_TEXT,
            tick_label(value)
        ));
    }

    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        MARGIN_LEFT + plot_width,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        COLOR_TEXT,
        escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0,
        COLOR_TEXT,
        CHART_HEIGHT / 2.0,
        escape_xml(y_label)
    ));
}

/// Line chart of one or more series; non-finite values are left out
pub fn line_chart(title: &str, x_label: &str, y_label: &str, series: &[DataSeries]) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let (x_min, x_max, y_min, y_max) = find_ranges(series);

    let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / (x_max - x_min)) * plot_width;
    let to_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / (y_max - y_min)) * plot_height;

    let mut svg = String::new();
    svg_open(&mut svg, title);
    axes(&mut svg, x_label, y_label, y_min, y_max);

    for s in series {
        let points: Vec<(f64, f64)> = s
            .points
            .iter()
            .copied()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        if points.is_empty() {
            continue;
        }

        let mut path = String::new();
        for (i, &(x, y)) in points.iter().enumerate() {
            let command = if i == 0 { "M" } else { " L" };
            path.push_str(&format!("{} {:.2} {:.2}", command, to_x(x), to_y(y)));
        }
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            path, s.color
        ));

        for &(x, y) in &points {
            svg.push_str(&format!(
                r#"<circle cx="{:.2}" cy="{:.2}" r="3" fill="{}"><title>{}: {}</title></circle>"#,
                to_x(x),
                to_y(y),
                s.color,
                x,
                y
            ));
        }
    }

    // x ticks from the first series with data
    if let Some(first) = series.iter().find(|s| !s.points.is_empty()) {
        let stride = first.points.len().div_ceil(MAX_X_TICKS).max(1);
        for &(x, _) in first.points.iter().step_by(stride) {
            if !x.is_finite() {
                continue;
            }
            svg.push_str(&format!(
                r#"<text x="{:.2}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
                to_x(x),
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                x
            ));
        }
    }

    let mut legend_y = MARGIN_TOP + 10.0;
    for s in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 150.0,
            legend_y,
            s.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 130.0,
            legend_y + 12.0,
            COLOR_TEXT,
            escape_xml(&s.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    svg
}

/// Bar chart of one weight histogram, one bar per bucket
pub fn histogram_chart(title: &str, histogram: &WeightHistogram) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let y_max = histogram.bucket_counts.iter().copied().max().unwrap_or(0).max(1) as f64;

    let mut svg = String::new();
    svg_open(&mut svg, title);
    axes(&mut svg, "value", "count", 0.0, y_max);

    let buckets = histogram.bucket_counts.len();
    if buckets > 0 {
        let slot = plot_width / buckets as f64;
        let mut left_edge = histogram.min;
        for (i, (&count, &right_edge)) in histogram
            .bucket_counts
            .iter()
            .zip(&histogram.bucket_limits)
            .enumerate()
        {
            let height = (count as f64 / y_max) * plot_height;
            svg.push_str(&format!(
                r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}"><title>[{:.4}, {:.4}): {}</title></rect>"#,
                MARGIN_LEFT + i as f64 * slot + slot * 0.05,
                MARGIN_TOP + plot_height - height,
                slot * 0.9,
                height,
                COLOR_BAR,
                left_edge,
                right_edge,
                count
            ));
            left_edge = right_edge;
        }

        for (x, value) in [(MARGIN_LEFT, histogram.min), (MARGIN_LEFT + plot_width, histogram.max)] {
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
                x,
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                tick_label(value)
            ));
        }
    }

    svg.push_str("</svg>");
    svg
}

/// `(x_min, x_max, y_min, y_max)` over the finite points; the y range
/// always includes 0 and neither range is empty
fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = 0.0f64;
    let mut y_max = f64::NEG_INFINITY;

    for s in series {
        for &(x, y) in &s.points {
            if !(x.is_finite() && y.is_finite()) {
                continue;
            }
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
    }

    if !x_min.is_finite() {
        return (0.0, 1.0, 0.0, 1.0);
    }
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }
    y_max = if y_max > y_min { y_max + (y_max - y_min) * 0.05 } else { y_min + 1.0 };

    (x_min, x_max, y_min, y_max)
}

fn tick_label(value: f64) -> String {
    if value != 0.0 && value.abs() < 1e-2 {
        format!("{:.1e}", value)
    } else {
        format!("{:.3}", value)
    }
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
