use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use console::style;
use plotters::prelude::*;
use printpdf::{BuiltinFont, Mm, PdfDocument};

use crate::models::{Outcome, ScanReport};

/// Print the per-port table and summary to the terminal.
pub fn print_report(report: &ScanReport) {
    println!(
        "\nScan report for {} ({}): {} ports over {}",
        style(&report.target).bold(),
        report.target_ip,
        report.results.len(),
        report.protocol,
    );
    println!("{:>5}  {:<5}  {:<14}  DETAIL", "PORT", "PROTO", "STATUS");

    for (port, outcome) in &report.results {
        let status = match outcome {
            Outcome::Open => style(outcome.label()).green(),
            Outcome::Closed => style(outcome.label()).red(),
            Outcome::PossiblyOpen => style(outcome.label()).yellow(),
            Outcome::Unsupported => style(outcome.label()).dim(),
            Outcome::Error(_) => style(outcome.label()).magenta(),
        };
        println!(
            "{:>5}  {:<5}  {:<14}  {}",
            port,
            report.protocol.to_string(),
            status,
            outcome.detail()
        );
    }

    let s = report.summary();
    println!(
        "\n{} open, {} closed, {} possibly open, {} unsupported, {} errors",
        style(s.open).green(),
        style(s.closed).red(),
        style(s.possibly_open).yellow(),
        s.unsupported,
        s.errors,
    );
    println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
}

/// Write one CSV row per scanned port, ascending, header first.
/// Error and Unsupported ports are ordinary rows.
pub fn write_csv(report: &ScanReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    writer.write_record(["port", "protocol", "status", "detail"])?;
    for (port, outcome) in &report.results {
        writer.write_record([
            port.to_string(),
            report.protocol.to_string(),
            outcome.label().to_string(),
            outcome.detail(),
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;
    Ok(())
}

/// Save the full report as pretty JSON.
pub fn write_json(report: &ScanReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write JSON file: {}", path.display()))?;
    Ok(())
}

/// Chart file placed next to an output file, `<stem>_chart.svg`.
pub fn chart_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scan".to_string());
    output.with_file_name(format!("{stem}_chart.svg"))
}

/// Render the summary bar chart: one bar per outcome class.
pub fn write_chart(report: &ScanReport, path: &Path) -> Result<()> {
    let summary = report.summary();
    let labels = ["open", "closed", "possibly open", "unsupported", "error"];
    let counts: [u32; 5] = [
        summary.open as u32,
        summary.closed as u32,
        summary.possibly_open as u32,
        summary.unsupported as u32,
        summary.errors as u32,
    ];
    let palette = [
        RGBColor(46, 160, 67),   // open
        RGBColor(218, 54, 51),   // closed
        RGBColor(255, 165, 0),   // possibly open
        RGBColor(139, 148, 158), // unsupported
        RGBColor(163, 113, 247), // error
    ];
    let y_max = counts.iter().copied().max().unwrap_or(0).max(1);

    let root = SVGBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("chart fill: {e}"))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Port scan of {} ({})", report.target, report.protocol),
            ("sans-serif", 22),
        )
        .margin(12)
        .x_label_area_size(36)
        .y_label_area_size(44)
        .build_cartesian_2d((0u32..4u32).into_segmented(), 0u32..y_max)
        .map_err(|e| anyhow!("chart axes: {e}"))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc("ports")
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => labels.get(*i as usize).copied().unwrap_or("").to_string(),
            _ => String::new(),
        })
        .draw()
        .map_err(|e| anyhow!("chart mesh: {e}"))?;

    chart
        .draw_series(
            Histogram::vertical(&chart)
                .margin(20)
                .style_func(|x, _| {
                    let idx = match x {
                        SegmentValue::Exact(i) | SegmentValue::CenterOf(i) => *i as usize,
                        SegmentValue::Last => 0,
                    };
                    palette[idx.min(palette.len() - 1)].filled()
                })
                .data(counts.iter().enumerate().map(|(i, c)| (i as u32, *c))),
        )
        .map_err(|e| anyhow!("chart bars: {e}"))?;

    root.present().map_err(|e| anyhow!("chart save: {e}"))?;
    Ok(())
}

// printpdf's Mm wraps an f32, so the layout cursor stays f32 throughout.
const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;

/// Render the PDF report: header, summary, and a paginated per-port table.
pub fn write_pdf(report: &ScanReport, path: &Path) -> Result<()> {
    let (doc, first_page, first_layer) =
        PdfDocument::new("Port Scan Report", Mm(PAGE_W), Mm(PAGE_H), "report");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!("pdf font: {e}"))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow!("pdf font: {e}"))?;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut y = PAGE_H - 20.0;

    layer.use_text("Port Scan Report", 18.0, Mm(20.0), Mm(y), &bold);
    y -= 10.0;
    for line in [
        format!("Target: {} ({})", report.target, report.target_ip),
        format!("Protocol: {}", report.protocol),
        format!(
            "Started: {}",
            report.start_time.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!("Elapsed: {:.2}s", report.elapsed.as_secs_f64()),
    ] {
        layer.use_text(line, 11.0, Mm(20.0), Mm(y), &font);
        y -= 6.0;
    }

    let s = report.summary();
    y -= 4.0;
    layer.use_text(
        format!(
            "{} open, {} closed, {} possibly open, {} unsupported, {} errors",
            s.open, s.closed, s.possibly_open, s.unsupported, s.errors
        ),
        11.0,
        Mm(20.0),
        Mm(y),
        &bold,
    );
    y -= 10.0;

    layer.use_text("PORT", 10.0, Mm(20.0), Mm(y), &bold);
    layer.use_text("STATUS", 10.0, Mm(45.0), Mm(y), &bold);
    layer.use_text("DETAIL", 10.0, Mm(85.0), Mm(y), &bold);
    y -= 6.0;

    for (port, outcome) in &report.results {
        if y < 20.0 {
            let (page, page_layer) = doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "report");
            layer = doc.get_page(page).get_layer(page_layer);
            y = PAGE_H - 20.0;
        }
        layer.use_text(port.to_string(), 10.0, Mm(20.0), Mm(y), &font);
        layer.use_text(outcome.label(), 10.0, Mm(45.0), Mm(y), &font);
        let detail = outcome.detail();
        if !detail.is_empty() {
            layer.use_text(detail, 10.0, Mm(85.0), Mm(y), &font);
        }
        y -= 5.0;
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create PDF file: {}", path.display()))?;
    doc.save(&mut BufWriter::new(file))
        .map_err(|e| anyhow!("pdf save: {e}"))?;
    Ok(())
}
