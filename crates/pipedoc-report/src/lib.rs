//! # pipedoc-report
//!
//! Multi-sheet spreadsheet reports over the extraction results. Rows in
//! the comparison sheets are filled by reconciliation verdict: green for
//! MATCH, pink for MISMATCH, yellow for BOM_ONLY, blue for DRAWING_ONLY,
//! gray for N/A.

use std::path::Path;

use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook, Worksheet};
use tracing::info;

use pipedoc_bom::ExtractionStats;
use pipedoc_core::{
    Error, MatchStatus, PageBomRecord, PageComparison, Result, ValveExtract, ValveType,
};
use pipedoc_extract::TextPageExtract;

const HEADER_BG: Color = Color::RGB(0x2F5496);
const SUBHEADER_BG: Color = Color::RGB(0xD6E4F0);
const TOTAL_BG: Color = Color::RGB(0xFFF2CC);
const MATCH_BG: Color = Color::RGB(0xE2EFDA);
const MISMATCH_BG: Color = Color::RGB(0xFCE4EC);
const BOM_ONLY_BG: Color = Color::RGB(0xFFF2CC);
const DRAWING_ONLY_BG: Color = Color::RGB(0xDBEAFE);
const NA_BG: Color = Color::RGB(0xF5F5F5);

fn report_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Report(e.to_string())
}

fn header_format() -> Format {
    Format::new()
        .set_font_name("Arial")
        .set_font_size(10)
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(HEADER_BG)
        .set_border(FormatBorder::Thin)
}

fn data_format() -> Format {
    Format::new()
        .set_font_name("Arial")
        .set_font_size(9)
        .set_border(FormatBorder::Thin)
}

fn data_format_filled(background: Color) -> Format {
    data_format().set_background_color(background)
}

fn section_format() -> Format {
    Format::new()
        .set_font_name("Arial")
        .set_font_size(10)
        .set_bold()
        .set_background_color(SUBHEADER_BG)
}

fn total_format() -> Format {
    Format::new()
        .set_font_name("Arial")
        .set_font_size(10)
        .set_bold()
        .set_background_color(TOTAL_BG)
        .set_border(FormatBorder::Thin)
}

fn status_fill(status: MatchStatus) -> Color {
    match status {
        MatchStatus::Match => MATCH_BG,
        MatchStatus::Mismatch => MISMATCH_BG,
        MatchStatus::BomOnly => BOM_ONLY_BG,
        MatchStatus::DrawingOnly => DRAWING_ONLY_BG,
        MatchStatus::NotApplicable => NA_BG,
    }
}

fn write_headers(sheet: &mut Worksheet, headers: &[&str]) -> Result<()> {
    let format = header_format();
    for (col, title) in headers.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *title, &format)
            .map_err(report_err)?;
        sheet
            .set_column_width(col as u16, 16.0)
            .map_err(report_err)?;
    }
    Ok(())
}

/// Write the valve list report: manual valves, then control valves, then a
/// count summary.
///
/// # Errors
///
/// Returns [`Error::Report`] on any writer failure.
pub fn generate_valve_report(valves: &[ValveExtract], out_path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Valve List").map_err(report_err)?;

    write_headers(
        sheet,
        &[
            "No.", "Tag", "Type", "Subtype", "Size", "Fluid", "Location", "Piping Class",
            "Schedule", "Rating", "Material", "Description", "Source", "Sheet",
        ],
    )?;

    let data = data_format();
    let write_valve = |sheet: &mut Worksheet, row: u32, no: usize, v: &ValveExtract| -> Result<()> {
        let cells: [&str; 12] = [
            &v.tag,
            v.valve_type.map(|t| t.as_str()).unwrap_or(""),
            &v.valve_subtype,
            &v.size,
            &v.fluid,
            &v.location,
            &v.piping_class,
            &v.schedule,
            &v.pressure_rating,
            &v.material_code,
            &v.description,
            match v.source {
                pipedoc_core::Provenance::Regex => "regex",
                pipedoc_core::Provenance::Vlm => "vlm",
                pipedoc_core::Provenance::Both => "both",
                pipedoc_core::Provenance::Text => "text",
            },
        ];
        sheet
            .write_number_with_format(row, 0, no as f64, &data)
            .map_err(report_err)?;
        for (i, cell) in cells.iter().enumerate() {
            sheet
                .write_string_with_format(row, i as u16 + 1, *cell, &data)
                .map_err(report_err)?;
        }
        sheet
            .write_string_with_format(row, 13, format!("Sheet {}", v.sheet), &data)
            .map_err(report_err)?;
        Ok(())
    };

    let manual: Vec<&ValveExtract> = valves
        .iter()
        .filter(|v| v.valve_type != Some(ValveType::Control))
        .collect();
    let control: Vec<&ValveExtract> = valves
        .iter()
        .filter(|v| v.valve_type == Some(ValveType::Control))
        .collect();

    let mut row = 1u32;
    sheet
        .write_string_with_format(row, 0, "MANUAL VALVES", &section_format())
        .map_err(report_err)?;
    row += 1;
    for (no, valve) in manual.iter().enumerate() {
        write_valve(sheet, row, no + 1, valve)?;
        row += 1;
    }

    row += 1;
    sheet
        .write_string_with_format(row, 0, "CONTROL VALVES", &section_format())
        .map_err(report_err)?;
    row += 1;
    for (no, valve) in control.iter().enumerate() {
        write_valve(sheet, row, no + 1, valve)?;
        row += 1;
    }

    row += 1;
    let total = total_format();
    sheet
        .write_string_with_format(row, 0, "TOTAL VALVES", &total)
        .map_err(report_err)?;
    sheet
        .write_number_with_format(row, 1, valves.len() as f64, &total)
        .map_err(report_err)?;

    workbook.save(out_path).map_err(report_err)?;
    info!(path = %out_path.display(), valves = valves.len(), "valve report written");
    Ok(())
}

/// Write the text-extraction BOM report: per-page summary, weld detail,
/// and document statistics.
///
/// # Errors
///
/// Returns [`Error::Report`] on any writer failure.
pub fn generate_pipe_bom_report(pages: &[TextPageExtract], out_path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let data = data_format();

    let summary = workbook.add_worksheet();
    summary.set_name("Page Summary").map_err(report_err)?;
    write_headers(
        summary,
        &["Page", "Pipe Pieces", "Welds", "Dimensions", "Loose Parts", "Cover"],
    )?;
    for (i, page) in pages.iter().enumerate() {
        let row = i as u32 + 1;
        summary
            .write_number_with_format(row, 0, f64::from(page.page), &data)
            .map_err(report_err)?;
        summary
            .write_string_with_format(row, 1, page.pipe_pieces.join(", "), &data)
            .map_err(report_err)?;
        summary
            .write_number_with_format(row, 2, f64::from(page.weld_count), &data)
            .map_err(report_err)?;
        summary
            .write_number_with_format(row, 3, page.dimensions_mm.len() as f64, &data)
            .map_err(report_err)?;
        summary
            .write_string_with_format(row, 4, if page.has_loose { "YES" } else { "" }, &data)
            .map_err(report_err)?;
        summary
            .write_string_with_format(row, 5, if page.is_cover { "YES" } else { "" }, &data)
            .map_err(report_err)?;
    }

    let welds = workbook.add_worksheet();
    welds.set_name("Weld Item Detail").map_err(report_err)?;
    write_headers(welds, &["Page", "Weld ID", "Type"])?;
    let mut row = 1u32;
    for page in pages {
        for weld in &page.weld_items {
            welds
                .write_number_with_format(row, 0, f64::from(page.page), &data)
                .map_err(report_err)?;
            welds
                .write_string_with_format(row, 1, weld, &data)
                .map_err(report_err)?;
            let kind = if weld.to_uppercase().starts_with("FFW") {
                "field_fit_weld"
            } else {
                "shop_weld"
            };
            welds
                .write_string_with_format(row, 2, kind, &data)
                .map_err(report_err)?;
            row += 1;
        }
    }

    let stats = workbook.add_worksheet();
    stats.set_name("Statistics").map_err(report_err)?;
    let total_welds: u32 = pages.iter().map(|p| p.weld_count).sum();
    let total_pieces: usize = pages.iter().map(|p| p.pipe_pieces.len()).sum();
    let content_pages = pages
        .iter()
        .filter(|p| !p.is_cover && !p.pipe_pieces.is_empty())
        .count();
    let rows: [(&str, f64); 5] = [
        ("Total pages", pages.len() as f64),
        ("Content pages", content_pages as f64),
        ("Total pipe pieces", total_pieces as f64),
        ("Total welds", f64::from(total_welds)),
        (
            "Pages with loose parts",
            pages.iter().filter(|p| p.has_loose).count() as f64,
        ),
    ];
    let label = section_format();
    for (i, (name, value)) in rows.iter().enumerate() {
        stats
            .write_string_with_format(i as u32, 0, *name, &label)
            .map_err(report_err)?;
        stats
            .write_number_with_format(i as u32, 1, *value, &data)
            .map_err(report_err)?;
    }
    stats.set_column_width(0, 28.0).map_err(report_err)?;

    workbook.save(out_path).map_err(report_err)?;
    info!(path = %out_path.display(), pages = pages.len(), "pipe BOM report written");
    Ok(())
}

/// Write the vision-extraction report: page summary plus one sheet per
/// record list, with the reconciliation results colored by verdict.
///
/// # Errors
///
/// Returns [`Error::Report`] on any writer failure.
pub fn generate_vlm_bom_report(
    records: &[PageBomRecord],
    comparisons: &[PageComparison],
    stats: &ExtractionStats,
    out_path: &Path,
) -> Result<()> {
    let mut workbook = Workbook::new();
    let data = data_format();

    // Page Summary.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Page Summary").map_err(report_err)?;
        write_headers(
            sheet,
            &[
                "Page", "Drawing No.", "Line No.", "Pipe No.", "Description", "Pieces",
                "Components", "Welds", "BOM Items", "Cuts", "Drawing OK", "Table OK",
            ],
        )?;
        for (i, record) in records.iter().enumerate() {
            let row = i as u32 + 1;
            sheet
                .write_number_with_format(row, 0, f64::from(record.page), &data)
                .map_err(report_err)?;
            for (col, text) in [
                (1u16, record.drawing_number.as_str()),
                (2, record.line_no.as_str()),
                (3, record.pipe_no.as_str()),
                (4, record.line_description.as_str()),
            ] {
                sheet
                    .write_string_with_format(row, col, text, &data)
                    .map_err(report_err)?;
            }
            for (col, n) in [
                (5u16, record.pipe_pieces.len()),
                (6, record.components.len()),
                (7, record.total_weld_count as usize),
                (8, record.bom_table.len()),
                (9, record.cut_lengths.len()),
            ] {
                sheet
                    .write_number_with_format(row, col, n as f64, &data)
                    .map_err(report_err)?;
            }
            sheet
                .write_string_with_format(row, 10, ok_mark(record.drawing_analysis_ok), &data)
                .map_err(report_err)?;
            sheet
                .write_string_with_format(row, 11, ok_mark(record.table_analysis_ok), &data)
                .map_err(report_err)?;
        }
    }

    // Pipe Pieces.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Pipe Pieces").map_err(report_err)?;
        write_headers(sheet, &["Page", "Piece ID", "Size", "Schedule", "Material", "Source"])?;
        let mut row = 1u32;
        for record in records {
            for piece in &record.pipe_pieces {
                sheet
                    .write_number_with_format(row, 0, f64::from(record.page), &data)
                    .map_err(report_err)?;
                for (col, text) in [
                    (1u16, piece.id.as_str()),
                    (2, piece.size.as_str()),
                    (3, piece.schedule.as_str()),
                    (4, piece.material.as_str()),
                    (5, piece.source.as_str()),
                ] {
                    sheet
                        .write_string_with_format(row, col, text, &data)
                        .map_err(report_err)?;
                }
                row += 1;
            }
        }
    }

    // Components.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Components").map_err(report_err)?;
        write_headers(sheet, &["Page", "Type", "Subtype", "Size", "Description", "Tag", "Qty"])?;
        let mut row = 1u32;
        for record in records {
            for comp in &record.components {
                sheet
                    .write_number_with_format(row, 0, f64::from(record.page), &data)
                    .map_err(report_err)?;
                for (col, text) in [
                    (1u16, comp.kind.as_str()),
                    (2, comp.subtype.as_str()),
                    (3, comp.size.as_str()),
                    (4, comp.description.as_str()),
                    (5, comp.tag.as_str()),
                ] {
                    sheet
                        .write_string_with_format(row, col, text, &data)
                        .map_err(report_err)?;
                }
                sheet
                    .write_number_with_format(row, 6, comp.quantity, &data)
                    .map_err(report_err)?;
                row += 1;
            }
        }
    }

    // Weld Points.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Weld Points").map_err(report_err)?;
        write_headers(sheet, &["Page", "Weld ID", "Type"])?;
        let mut row = 1u32;
        for record in records {
            for weld in &record.weld_points {
                sheet
                    .write_number_with_format(row, 0, f64::from(record.page), &data)
                    .map_err(report_err)?;
                sheet
                    .write_string_with_format(row, 1, &weld.id, &data)
                    .map_err(report_err)?;
                sheet
                    .write_string_with_format(
                        row,
                        2,
                        match weld.kind {
                            pipedoc_core::WeldKind::ShopWeld => "shop_weld",
                            pipedoc_core::WeldKind::FieldFitWeld => "field_fit_weld",
                        },
                        &data,
                    )
                    .map_err(report_err)?;
                row += 1;
            }
        }
    }

    // Dimensions.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Dimensions").map_err(report_err)?;
        write_headers(sheet, &["Page", "From", "To", "Length (mm)", "Direction", "Source"])?;
        let mut row = 1u32;
        for record in records {
            for dim in &record.dimensions_mm {
                sheet
                    .write_number_with_format(row, 0, f64::from(record.page), &data)
                    .map_err(report_err)?;
                sheet
                    .write_string_with_format(row, 1, &dim.from_point, &data)
                    .map_err(report_err)?;
                sheet
                    .write_string_with_format(row, 2, &dim.to_point, &data)
                    .map_err(report_err)?;
                sheet
                    .write_number_with_format(row, 3, dim.length_mm, &data)
                    .map_err(report_err)?;
                sheet
                    .write_string_with_format(row, 4, &dim.direction, &data)
                    .map_err(report_err)?;
                sheet
                    .write_string_with_format(row, 5, &dim.source, &data)
                    .map_err(report_err)?;
                row += 1;
            }
        }
    }

    // Cut Lengths.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Cut Lengths").map_err(report_err)?;
        write_headers(sheet, &["Page", "Cut No.", "Length (mm)"])?;
        let mut row = 1u32;
        for record in records {
            for cut in &record.cut_lengths {
                sheet
                    .write_number_with_format(row, 0, f64::from(record.page), &data)
                    .map_err(report_err)?;
                sheet
                    .write_number_with_format(row, 1, f64::from(cut.cut_no), &data)
                    .map_err(report_err)?;
                sheet
                    .write_number_with_format(row, 2, cut.length_mm, &data)
                    .map_err(report_err)?;
                row += 1;
            }
        }
    }

    // Drawing Index.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Drawing Index").map_err(report_err)?;
        write_headers(sheet, &["Page", "Drawing No.", "Line No.", "Pipe No.", "Line Description"])?;
        let mut row = 1u32;
        for record in records {
            if record.drawing_number.is_empty() && record.line_no.is_empty() {
                continue;
            }
            sheet
                .write_number_with_format(row, 0, f64::from(record.page), &data)
                .map_err(report_err)?;
            for (col, text) in [
                (1u16, record.drawing_number.as_str()),
                (2, record.line_no.as_str()),
                (3, record.pipe_no.as_str()),
                (4, record.line_description.as_str()),
            ] {
                sheet
                    .write_string_with_format(row, col, text, &data)
                    .map_err(report_err)?;
            }
            row += 1;
        }
    }

    // Summary.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary").map_err(report_err)?;
        let label = section_format();
        let rows: [(&str, f64); 9] = [
            ("Total pages", stats.total_pages as f64),
            ("Pages with data", stats.pages_with_data as f64),
            ("Drawing analysis OK", stats.drawing_analysis_success as f64),
            ("Table analysis OK", stats.table_analysis_success as f64),
            ("Total pipe pieces", stats.total_pipe_pieces as f64),
            ("Total components", stats.total_components as f64),
            ("Total weld points", stats.total_weld_points as f64),
            ("Total BOM items", stats.total_bom_items as f64),
            ("Coverage %", stats.analysis_coverage_pct),
        ];
        for (i, (name, value)) in rows.iter().enumerate() {
            sheet
                .write_string_with_format(i as u32, 0, *name, &label)
                .map_err(report_err)?;
            sheet
                .write_number_with_format(i as u32, 1, *value, &data)
                .map_err(report_err)?;
        }
        sheet.set_column_width(0, 28.0).map_err(report_err)?;
    }

    // BOM Comparison, colored by verdict.
    if !comparisons.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name("BOM Comparison").map_err(report_err)?;
        write_headers(
            sheet,
            &[
                "Page", "Letter", "BOM Description", "BOM Qty", "Size", "Drawing Component",
                "Drawing Qty", "Status", "Diff", "Notes",
            ],
        )?;
        let mut row = 1u32;
        for comparison in comparisons {
            for item in &comparison.comparison_items {
                let format = data_format_filled(status_fill(item.match_status));
                sheet
                    .write_number_with_format(row, 0, f64::from(comparison.page), &format)
                    .map_err(report_err)?;
                for (col, text) in [
                    (1u16, item.bom_letter.as_str()),
                    (2, item.bom_description.as_str()),
                    (3, item.bom_quantity.as_str()),
                    (4, item.bom_size.as_str()),
                    (5, item.drawing_component.as_str()),
                ] {
                    sheet
                        .write_string_with_format(row, col, text, &format)
                        .map_err(report_err)?;
                }
                match item.drawing_quantity {
                    Some(qty) => sheet
                        .write_number_with_format(row, 6, qty, &format)
                        .map_err(report_err)?,
                    None => sheet
                        .write_string_with_format(row, 6, "", &format)
                        .map_err(report_err)?,
                };
                sheet
                    .write_string_with_format(row, 7, item.match_status.to_string(), &format)
                    .map_err(report_err)?;
                sheet
                    .write_number_with_format(row, 8, item.quantity_diff, &format)
                    .map_err(report_err)?;
                sheet
                    .write_string_with_format(row, 9, &item.notes, &format)
                    .map_err(report_err)?;
                row += 1;
            }
        }

        let sheet = workbook.add_worksheet();
        sheet.set_name("Comparison Summary").map_err(report_err)?;
        write_headers(
            sheet,
            &[
                "Page", "BOM Items", "Comparable", "Matched", "Mismatched", "BOM Only",
                "Drawing Only", "N/A", "Match Rate %",
            ],
        )?;
        for (i, comparison) in comparisons.iter().enumerate() {
            let row = i as u32 + 1;
            let s = comparison.summary;
            for (col, n) in [
                (0u16, f64::from(comparison.page)),
                (1, s.total_bom_items as f64),
                (2, s.comparable_items as f64),
                (3, s.matched as f64),
                (4, s.mismatched as f64),
                (5, s.bom_only as f64),
                (6, s.drawing_only as f64),
                (7, s.na_items as f64),
                (8, s.match_rate),
            ] {
                sheet
                    .write_number_with_format(row, col, n, &data)
                    .map_err(report_err)?;
            }
        }
        let totals = total_format();
        let total_row = comparisons.len() as u32 + 1;
        let matched: usize = comparisons.iter().map(|c| c.summary.matched).sum();
        let comparable: usize = comparisons.iter().map(|c| c.summary.comparable_items).sum();
        sheet
            .write_string_with_format(total_row, 0, "TOTAL", &totals)
            .map_err(report_err)?;
        sheet
            .write_number_with_format(total_row, 3, matched as f64, &totals)
            .map_err(report_err)?;
        sheet
            .write_number_with_format(total_row, 2, comparable as f64, &totals)
            .map_err(report_err)?;
        sheet
            .write_number_with_format(
                total_row,
                8,
                if comparable == 0 {
                    0.0
                } else {
                    (matched as f64 / comparable as f64 * 1000.0).round() / 10.0
                },
                &totals,
            )
            .map_err(report_err)?;
    }

    workbook.save(out_path).map_err(report_err)?;
    info!(
        path = %out_path.display(),
        pages = records.len(),
        comparisons = comparisons.len(),
        "vision BOM report written"
    );
    Ok(())
}

const fn ok_mark(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAIL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_bom::compute_extraction_stats;
    use pipedoc_core::{BomItem, Component, Provenance};

    #[test]
    fn valve_report_writes_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valve_list.xlsx");
        let valves = vec![
            ValveExtract {
                tag: "CSW9112".into(),
                valve_type: Some(ValveType::Butterfly),
                size: "12".into(),
                fluid: "SW".into(),
                source: Provenance::Both,
                sheet: 2,
                ..Default::default()
            },
            ValveExtract {
                tag: "FCV1234".into(),
                valve_type: Some(ValveType::Control),
                valve_subtype: "FLOW CONTROL VALVE".into(),
                source: Provenance::Vlm,
                sheet: 3,
                ..Default::default()
            },
        ];
        generate_valve_report(&valves, &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }

    #[test]
    fn pipe_bom_report_writes_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe_bom.xlsx");
        let pages = vec![TextPageExtract {
            page: 2,
            pipe_pieces: vec!["PG101-1".into()],
            weld_items: vec!["W1".into(), "FFW1".into()],
            weld_count: 2,
            dimensions_mm: vec![500.0],
            ..Default::default()
        }];
        generate_pipe_bom_report(&pages, &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }

    #[test]
    fn vlm_report_includes_comparison_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vlm_bom.xlsx");
        let records = vec![PageBomRecord {
            page: 2,
            drawing_number: "1-125.629.021".into(),
            components: vec![Component {
                kind: "fitting".into(),
                subtype: "tee".into(),
                quantity: 3.0,
                ..Default::default()
            }],
            bom_table: vec![BomItem {
                letter_code: "C".into(),
                quantity: "3".into(),
                description: "EQUAL TEE".into(),
                ..Default::default()
            }],
            drawing_analysis_ok: true,
            table_analysis_ok: true,
            ..Default::default()
        }];
        let comparisons = pipedoc_bom::compare_all_pages(&records);
        let stats = compute_extraction_stats(&records);
        generate_vlm_bom_report(&records, &comparisons, &stats, &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
