//! SVG Chart Generator for Evaluation Reports
//!
//! Writes standalone SVG files: ROC, precision-recall and calibration
//! curves, learning curves, confusion heatmaps and embedding scatter plots.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::evaluation::metrics::CalibrationCurve;
use crate::utils::error::Result;

/// Chart styling constants
const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 80.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_SECONDARY: &str = "#2ecc71";
pub const COLOR_TERTIARY: &str = "#e74c3c";
const COLOR_REFERENCE: &str = "#95a5a6";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Colors assigned to classes in scatter plots, in label order
const CLASS_COLORS: [&str; 4] = [COLOR_TERTIARY, COLOR_PRIMARY, COLOR_SECONDARY, "#9b59b6"];

const FONT: &str = "Arial, sans-serif";

/// A data series for line charts
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: &str, xs: &[f64], ys: &[f64], color: &str) -> Self {
        Self {
            name: name.to_string(),
            points: xs.iter().copied().zip(ys.iter().copied()).collect(),
            color: color.to_string(),
        }
    }
}

/// Axis ranges and decorations of a line chart
#[derive(Debug, Clone)]
pub struct LineChartOptions {
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    /// Dashed y = x reference line
    pub diagonal: bool,
    /// Draw a marker at every point
    pub markers: bool,
}

impl Default for LineChartOptions {
    fn default() -> Self {
        Self {
            x_range: (0.0, 1.0),
            y_range: (0.0, 1.0),
            diagonal: false,
            markers: false,
        }
    }
}

/// Plot area with linear mappings from data to pixel coordinates
struct Frame {
    x_range: (f64, f64),
    y_range: (f64, f64),
    width: f64,
    height: f64,
}

impl Frame {
    fn new(x_range: (f64, f64), y_range: (f64, f64)) -> Self {
        Self {
            x_range: widen(x_range),
            y_range: widen(y_range),
            width: CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
            height: CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
        }
    }

    fn px(&self, x: f64) -> f64 {
        MARGIN_LEFT + (x - self.x_range.0) / (self.x_range.1 - self.x_range.0) * self.width
    }

    fn py(&self, y: f64) -> f64 {
        MARGIN_TOP + self.height - (y - self.y_range.0) / (self.y_range.1 - self.y_range.0) * self.height
    }

    fn bottom(&self) -> f64 {
        MARGIN_TOP + self.height
    }

    fn right(&self) -> f64 {
        MARGIN_LEFT + self.width
    }
}

/// Avoid a zero-width range
fn widen((lo, hi): (f64, f64)) -> (f64, f64) {
    if !(lo.is_finite() && hi.is_finite()) {
        (0.0, 1.0)
    } else if hi - lo < 1e-12 {
        (lo - 0.5, hi + 0.5)
    } else {
        (lo, hi)
    }
}

fn svg_open(title: &str) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    );
    let _ = write!(svg, r#"<rect width="{}" height="{}" fill="white"/>"#, CHART_WIDTH, CHART_HEIGHT);
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="{}" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        FONT,
        COLOR_TEXT,
        escape_xml(title)
    );
    svg
}

fn svg_close(mut svg: String, output_path: &Path) -> Result<()> {
    svg.push_str("</svg>");
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, svg)?;
    Ok(())
}

fn text(svg: &mut String, x: f64, y: f64, anchor: &str, size: u32, color: &str, content: &str) {
    let _ = write!(
        svg,
        r#"<text x="{:.2}" y="{:.2}" text-anchor="{}" font-family="{}" font-size="{}" fill="{}">{}</text>"#,
        x,
        y,
        anchor,
        FONT,
        size,
        color,
        escape_xml(content)
    );
}

fn line(svg: &mut String, (x1, y1): (f64, f64), (x2, y2): (f64, f64), color: &str, width: f64, dashed: bool) {
    let dash = if dashed { r#" stroke-dasharray="6 4""# } else { "" };
    let _ = write!(
        svg,
        r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke="{}" stroke-width="{}"{}/>"#,
        x1, y1, x2, y2, color, width, dash
    );
}

/// Grid, axes, tick labels and axis titles
fn axes(svg: &mut String, frame: &Frame, x_label: &str, y_label: &str) {
    for i in 0..=5 {
        let t = i as f64 / 5.0;
        let yv = frame.y_range.0 + t * (frame.y_range.1 - frame.y_range.0);
        let xv = frame.x_range.0 + t * (frame.x_range.1 - frame.x_range.0);
        let y = frame.py(yv);
        let x = frame.px(xv);

        line(svg, (MARGIN_LEFT, y), (frame.right(), y), COLOR_GRID, 1.0, false);
        text(svg, MARGIN_LEFT - 10.0, y + 4.0, "end", 12, COLOR_TEXT, &format_tick(yv));
        text(svg, x, frame.bottom() + 20.0, "middle", 11, COLOR_TEXT, &format_tick(xv));
    }

    line(svg, (MARGIN_LEFT, frame.bottom()), (frame.right(), frame.bottom()), COLOR_AXIS, 2.0, false);
    line(svg, (MARGIN_LEFT, MARGIN_TOP), (MARGIN_LEFT, frame.bottom()), COLOR_AXIS, 2.0, false);

    text(svg, MARGIN_LEFT + frame.width / 2.0, CHART_HEIGHT - 20.0, "middle", 14, COLOR_TEXT, x_label);
    let _ = write!(
        svg,
        r#"<text x="20" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0,
        FONT,
        COLOR_TEXT,
        CHART_HEIGHT / 2.0,
        escape_xml(y_label)
    );
}

fn format_tick(v: f64) -> String {
    if v.abs() >= 100.0 || (v.fract() == 0.0 && v.abs() >= 1.0) {
        format!("{:.0}", v)
    } else {
        format!("{:.2}", v)
    }
}

fn polyline(svg: &mut String, frame: &Frame, points: &[(f64, f64)], color: &str, markers: bool) {
    if points.is_empty() {
        return;
    }
    let path: Vec<String> = points
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| format!("{} {:.2} {:.2}", if i == 0 { "M" } else { "L" }, frame.px(x), frame.py(y)))
        .collect();
    let _ = write!(
        svg,
        r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
        path.join(" "),
        color
    );

    if markers {
        for &(x, y) in points {
            let _ = write!(
                svg,
                r#"<circle cx="{:.2}" cy="{:.2}" r="5" fill="{}" stroke="white" stroke-width="2"/>"#,
                frame.px(x),
                frame.py(y),
                color
            );
        }
    }
}

fn legend(svg: &mut String, entries: &[(&str, &str)]) {
    let mut legend_y = MARGIN_TOP + 10.0;
    for (name, color) in entries {
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 170.0,
            legend_y,
            color
        );
        text(svg, CHART_WIDTH - MARGIN_RIGHT - 150.0, legend_y + 12.0, "start", 12, COLOR_TEXT, name);
        legend_y += 25.0;
    }
}

/// Line chart with optional y = x reference
pub fn line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    options: &LineChartOptions,
    output_path: &Path,
) -> Result<()> {
    let frame = Frame::new(options.x_range, options.y_range);
    let mut svg = svg_open(title);
    axes(&mut svg, &frame, x_label, y_label);

    if options.diagonal {
        let lo = frame.x_range.0.max(frame.y_range.0);
        let hi = frame.x_range.1.min(frame.y_range.1);
        line(&mut svg, (frame.px(lo), frame.py(lo)), (frame.px(hi), frame.py(hi)), COLOR_REFERENCE, 1.5, true);
    }

    for s in series {
        polyline(&mut svg, &frame, &s.points, &s.color, options.markers);
    }

    let entries: Vec<(&str, &str)> = series.iter().map(|s| (s.name.as_str(), s.color.as_str())).collect();
    legend(&mut svg, &entries);

    svg_close(svg, output_path)
}

/// ROC curve with the chance diagonal
pub fn roc_chart(fpr: &[f64], tpr: &[f64], auc: Option<f64>, output_path: &Path) -> Result<()> {
    let name = match auc {
        Some(v) => format!("AUC = {:.3}", v),
        None => "AUC undefined".to_string(),
    };
    line_chart(
        "ROC Curve",
        "False positive rate",
        "True positive rate",
        &[DataSeries::new(&name, fpr, tpr, COLOR_PRIMARY)],
        &LineChartOptions {
            diagonal: true,
            ..Default::default()
        },
        output_path,
    )
}

/// Precision-recall curve
pub fn pr_chart(precision: &[f64], recall: &[f64], average_precision: f64, output_path: &Path) -> Result<()> {
    line_chart(
        "Precision-Recall Curve",
        "Recall",
        "Precision",
        &[DataSeries::new(&format!("AP = {:.3}", average_precision), recall, precision, COLOR_SECONDARY)],
        &LineChartOptions::default(),
        output_path,
    )
}

/// Reliability diagram with the perfect-calibration diagonal
pub fn calibration_chart(curve: &CalibrationCurve, output_path: &Path) -> Result<()> {
    line_chart(
        "Calibration Curve",
        "Mean predicted probability",
        "Fraction of positives",
        &[DataSeries::new("Model", &curve.mean_predicted, &curve.fraction_positive, COLOR_PRIMARY)],
        &LineChartOptions {
            diagonal: true,
            markers: true,
            ..Default::default()
        },
        output_path,
    )
}

/// Train loss (left axis) and validation accuracy (right axis) per epoch
pub fn learning_curves_chart(train_losses: &[f64], val_accuracies: &[f64], output_path: &Path) -> Result<()> {
    let epochs = train_losses.len().max(val_accuracies.len());
    let x_range = (1.0, epochs.max(2) as f64);
    let loss_max = train_losses.iter().copied().fold(0.0f64, f64::max);
    let loss_frame = Frame::new(x_range, (0.0, if loss_max > 0.0 { loss_max * 1.1 } else { 1.0 }));
    let acc_frame = Frame::new(x_range, (0.0, 1.0));

    let mut svg = svg_open("Learning Curves");
    axes(&mut svg, &loss_frame, "Epoch", "Train loss");

    // Right axis for accuracy
    let right = acc_frame.right();
    line(&mut svg, (right, MARGIN_TOP), (right, acc_frame.bottom()), COLOR_AXIS, 2.0, false);
    for i in 0..=5 {
        let v = i as f64 / 5.0;
        text(&mut svg, right + 10.0, acc_frame.py(v) + 4.0, "start", 12, COLOR_SECONDARY, &format!("{:.1}", v));
    }
    let rx = CHART_WIDTH - 20.0;
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(90 {} {})">Validation accuracy</text>"#,
        rx,
        CHART_HEIGHT / 2.0,
        FONT,
        COLOR_SECONDARY,
        rx,
        CHART_HEIGHT / 2.0
    );

    let indexed = |values: &[f64]| -> Vec<(f64, f64)> {
        values.iter().enumerate().map(|(i, &v)| ((i + 1) as f64, v)).collect()
    };
    polyline(&mut svg, &loss_frame, &indexed(train_losses), COLOR_PRIMARY, true);
    polyline(&mut svg, &acc_frame, &indexed(val_accuracies), COLOR_SECONDARY, true);

    legend(&mut svg, &[("Train loss", COLOR_PRIMARY), ("Val accuracy", COLOR_SECONDARY)]);

    svg_close(svg, output_path)
}

/// Blend white to the primary blue by `t` in [0, 1]
fn blue_scale(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(255.0, 0x21 as f64), lerp(255.0, 0x66 as f64), lerp(255.0, 0xac as f64))
}

/// Annotated confusion heatmap (rows = actual, columns = predicted)
pub fn confusion_heatmap(
    title: &str,
    matrix: &[Vec<f64>],
    class_names: &[String],
    normalized: bool,
    output_path: &Path,
) -> Result<()> {
    let n = matrix.len().max(1);
    let size = (CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM).min(CHART_WIDTH - 2.0 * MARGIN_LEFT - 160.0);
    let cell = size / n as f64;
    let left = (CHART_WIDTH - size) / 2.0;
    let top = MARGIN_TOP;
    let max = matrix.iter().flatten().copied().fold(0.0f64, f64::max);

    let mut svg = svg_open(title);

    for (r, row) in matrix.iter().enumerate() {
        for (c, &value) in row.iter().enumerate() {
            let t = if max > 0.0 { value / max } else { 0.0 };
            let x = left + c as f64 * cell;
            let y = top + r as f64 * cell;
            let _ = write!(
                svg,
                r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}" stroke="white" stroke-width="2"/>"#,
                x,
                y,
                cell,
                cell,
                blue_scale(t)
            );
            let label = if normalized { format!("{:.2}", value) } else { format!("{:.0}", value) };
            let color = if t > 0.5 { "white" } else { COLOR_TEXT };
            text(&mut svg, x + cell / 2.0, y + cell / 2.0 + 6.0, "middle", 18, color, &label);
        }
    }

    for i in 0..n {
        let name = class_names.get(i).map(String::as_str).unwrap_or("?");
        let center = i as f64 * cell + cell / 2.0;
        text(&mut svg, left + center, top + size + 20.0, "middle", 12, COLOR_TEXT, name);
        text(&mut svg, left - 10.0, top + center + 4.0, "end", 12, COLOR_TEXT, name);
    }
    text(&mut svg, left + size / 2.0, CHART_HEIGHT - 20.0, "middle", 14, COLOR_TEXT, "Predicted");
    let _ = write!(
        svg,
        r#"<text x="{x}" y="{y}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 {x} {y})">Actual</text>"#,
        FONT,
        COLOR_TEXT,
        x = left - 100.0,
        y = top + size / 2.0
    );

    svg_close(svg, output_path)
}

/// Scatter plot colored by class
///
/// Each coordinate row has one or two components; one-component rows are
/// drawn on a horizontal line.
pub fn scatter_chart(
    title: &str,
    coords: &[Vec<f64>],
    labels: &[usize],
    class_names: &[String],
    output_path: &Path,
) -> Result<()> {
    let points: Vec<(f64, f64)> = coords
        .iter()
        .map(|row| (row.first().copied().unwrap_or(0.0), row.get(1).copied().unwrap_or(0.0)))
        .collect();
    let one_dimensional = coords.iter().all(|row| row.len() < 2);

    let range = |values: Vec<f64>| {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let pad = (hi - lo).abs() * 0.05;
        (lo - pad, hi + pad)
    };
    let frame = Frame::new(
        range(points.iter().map(|p| p.0).collect()),
        range(points.iter().map(|p| p.1).collect()),
    );

    let mut svg = svg_open(title);
    axes(&mut svg, &frame, "Component 1", if one_dimensional { "" } else { "Component 2" });

    for (&(x, y), &label) in points.iter().zip(labels) {
        let _ = write!(
            svg,
            r#"<circle cx="{:.2}" cy="{:.2}" r="5" fill="{}" fill-opacity="0.8" stroke="white" stroke-width="1"/>"#,
            frame.px(x),
            frame.py(y),
            CLASS_COLORS[label % CLASS_COLORS.len()]
        );
    }

    let entries: Vec<(&str, &str)> = class_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), CLASS_COLORS[i % CLASS_COLORS.len()]))
        .collect();
    legend(&mut svg, &entries);

    svg_close(svg, output_path)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
