//! Phase 4a: re-locate descriptions on the page and derive crop bounds.
//!
//! The vision model's bounding boxes are too coarse to crop from directly,
//! so each surviving description is searched for in the text layer with
//! progressively shorter queries. Located rectangles are grouped into
//! columns by x-proximity; per-row vertical bounds come from the midpoints
//! between neighbouring rows, clamped below column and section headers; the
//! left crop edge snaps to the nearest long vertical grid rule.

use std::collections::HashMap;

use pipedoc_pdf::{PageTextIndex, Rect};

/// Column membership threshold: a row joins a column when its left edge is
/// within this distance of the column's median left edge.
const COLUMN_JOIN_PT: f32 = 50.0;

/// Width reserved for the symbol graphic left of its description.
pub const SYM_WIDTH_PT: f32 = 70.0;

/// Padding above/below first/last rows of a column.
const EDGE_PAD_PT: f32 = 20.0;

/// Header texts that bound symbol rows from above.
const COLUMN_HEADERS: [&str; 3] = ["SYMBOL", "DISCRIPTION", "DESCRIPTION"];
const SECTION_HEADERS: [&str; 4] = [
    "INSTRUMENT VALVE BODIES",
    "SAFETY DEVICE SYMBOLS",
    "ACTUATED VALVES",
    "ACTUATORS",
];

/// Find a description's rectangle using progressively shortened substring
/// queries (40/25/16/10 chars, then individual words longer than four
/// characters).
///
/// `bbox_hint` is the model-reported box centre as page fractions; when
/// several hits exist the nearest is taken, and a hit further than 0.25 of
/// the normalized page away is rejected.
#[must_use]
pub fn find_text_on_page(
    index: &PageTextIndex,
    description: &str,
    bbox_hint: Option<(f64, f64)>,
) -> Option<Rect> {
    let desc = description.trim();
    let (pw, ph) = (index.page_width, index.page_height);

    let pick_best = |hits: Vec<Rect>| -> Option<Rect> {
        let Some((hint_x_pct, hint_y_pct)) = bbox_hint else {
            return hits.first().copied();
        };
        let hint_x = hint_x_pct as f32 * pw;
        let hint_y = hint_y_pct as f32 * ph;
        let best = hits.into_iter().min_by(|a, b| {
            let da = (a.x0 - hint_x).powi(2) + (a.y0 - hint_y).powi(2);
            let db = (b.x0 - hint_x).powi(2) + (b.y0 - hint_y).powi(2);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })?;
        let dist_norm = ((best.x0 / pw - hint_x_pct as f32).powi(2)
            + (best.y0 / ph - hint_y_pct as f32).powi(2))
        .sqrt();
        if dist_norm > 0.25 {
            None
        } else {
            Some(best)
        }
    };

    for search_len in [40usize, 25, 16, 10] {
        let query: String = desc.chars().take(search_len).collect();
        let query = query.trim();
        if query.len() < 5 {
            continue;
        }
        let hits = index.search(query);
        if !hits.is_empty() {
            return pick_best(hits);
        }
    }

    // Individual significant words; short common words are skipped.
    for word in desc.split_whitespace().filter(|w| w.len() > 4).take(3) {
        let hits = index.search(word);
        if !hits.is_empty() {
            return pick_best(hits);
        }
    }

    None
}

/// Group located text rects into columns by x-proximity to each column's
/// median left edge. Columns come back sorted left to right; members keep
/// their symbol index.
#[must_use]
pub fn group_columns(text_rects: &HashMap<usize, Rect>) -> Vec<Vec<(usize, Rect)>> {
    let mut entries: Vec<(usize, Rect)> = text_rects.iter().map(|(i, r)| (*i, *r)).collect();
    entries.sort_by(|a, b| {
        (a.1.x0, a.1.y0)
            .partial_cmp(&(b.1.x0, b.1.y0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut columns: Vec<Vec<(usize, Rect)>> = Vec::new();
    for (idx, rect) in entries {
        let mut placed = false;
        for col in &mut columns {
            let mut xs: Vec<f32> = col.iter().map(|(_, r)| r.x0).collect();
            xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median_x = xs[xs.len() / 2];
            if (rect.x0 - median_x).abs() < COLUMN_JOIN_PT {
                col.push((idx, rect));
                placed = true;
                break;
            }
        }
        if !placed {
            columns.push(vec![(idx, rect)]);
        }
    }

    columns.sort_by(|a, b| {
        let ax = a.iter().map(|(_, r)| r.x0).fold(f32::INFINITY, f32::min);
        let bx = b.iter().map(|(_, r)| r.x0).fold(f32::INFINITY, f32::min);
        ax.partial_cmp(&bx).unwrap_or(std::cmp::Ordering::Equal)
    });
    columns
}

/// Grid labels (single letters at the left page margin) push the usable
/// area right; symbols are cropped after them.
#[must_use]
pub fn detect_left_margin(index: &PageTextIndex) -> f32 {
    let mut left_margin = 12.0f32;
    for span in &index.spans {
        let text = span.text.trim();
        if text.len() == 1
            && matches!(text.chars().next(), Some('A'..='H' | 'J' | 'K'))
            && span.rect.x0 < 45.0
            && span.rect.width() < 12.0
        {
            left_margin = left_margin.max(span.rect.x1 + 5.0);
        }
    }
    left_margin
}

/// Per-column left crop boundary: the nearest vertical grid rule left of
/// the column's text, provided it sits within plausible symbol width, plus
/// a small offset past the line.
#[must_use]
pub fn column_left_boundaries(
    columns: &[Vec<(usize, Rect)>],
    vertical_rules: &[f32],
    left_margin: f32,
) -> Vec<f32> {
    columns
        .iter()
        .map(|col| {
            let col_min_x = col.iter().map(|(_, r)| r.x0).fold(f32::INFINITY, f32::min);
            let mut best = left_margin;
            for &gx in vertical_rules {
                if gx < col_min_x - 3.0 && gx > best && col_min_x - gx < SYM_WIDTH_PT + 30.0 {
                    best = gx;
                }
            }
            best + 3.0
        })
        .collect()
}

/// All header rectangles on the page (column headers plus mid-column
/// section headers).
#[must_use]
pub fn header_rects(index: &PageTextIndex) -> Vec<Rect> {
    let mut rects = Vec::new();
    for header in COLUMN_HEADERS.iter().chain(SECTION_HEADERS.iter()) {
        rects.extend(index.search(header));
    }
    rects
}

/// Row bounds for each located symbol, plus its column index.
///
/// The top of a row is the midpoint with the previous row (or the column
/// header's bottom edge for the first row); the bottom is the midpoint with
/// the next row. Any header sitting between a row's top and its text pushes
/// the top below it.
#[must_use]
pub fn row_bounds(
    columns: &[Vec<(usize, Rect)>],
    headers: &[Rect],
    page_height: f32,
) -> (HashMap<usize, (f32, f32)>, HashMap<usize, usize>) {
    let mut bounds: HashMap<usize, (f32, f32)> = HashMap::new();
    let mut col_of: HashMap<usize, usize> = HashMap::new();

    for (ci, col) in columns.iter().enumerate() {
        let mut col = col.clone();
        col.sort_by(|a, b| {
            a.1.y0
                .partial_cmp(&b.1.y0)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Column header bottom, if one sits close above the first row.
        let header_y1 = col.first().and_then(|(_, first)| {
            headers
                .iter()
                .filter(|hr| {
                    (hr.x0 - first.x0).abs() < 120.0
                        && hr.y1 < first.y0
                        && first.y0 - hr.y1 < 50.0
                })
                .map(|hr| hr.y1)
                .fold(None, |acc: Option<f32>, y| Some(acc.map_or(y, |a| a.max(y))))
        });

        for i in 0..col.len() {
            let (idx, rect) = col[i];
            col_of.insert(idx, ci);

            let y_top = if i > 0 {
                let prev = col[i - 1].1;
                (prev.y1 + rect.y0) / 2.0
            } else if let Some(hy) = header_y1 {
                hy + 3.0
            } else {
                (rect.y0 - EDGE_PAD_PT).max(0.0)
            };

            let y_bottom = if i + 1 < col.len() {
                let next = col[i + 1].1;
                (rect.y1 + next.y0) / 2.0
            } else {
                (rect.y1 + EDGE_PAD_PT).min(page_height)
            };

            bounds.insert(idx, (y_top, y_bottom));
        }
    }

    // Clamp past any header between a row's top and its text; this handles
    // mid-column sub-section headers with their own SYMBOL/DESCRIPTION row.
    for col in columns {
        for (idx, text_rect) in col {
            if let Some((mut y_top, y_bottom)) = bounds.get(idx).copied() {
                for hr in headers {
                    if (hr.x0 - text_rect.x0).abs() < 150.0
                        && hr.y0 >= y_top - 2.0
                        && hr.y1 < text_rect.y0 - 1.0
                    {
                        y_top = y_top.max(hr.y1 + 3.0);
                    }
                }
                bounds.insert(*idx, (y_top, y_bottom));
            }
        }
    }

    (bounds, col_of)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_pdf::TextSpan;

    fn index_with(spans: Vec<(&str, Rect)>) -> PageTextIndex {
        PageTextIndex {
            page_width: 1000.0,
            page_height: 700.0,
            spans: spans
                .into_iter()
                .map(|(t, rect)| TextSpan {
                    rect,
                    text: t.to_string(),
                })
                .collect(),
            full_text: String::new(),
            vertical_rules: Vec::new(),
        }
    }

    #[test]
    fn progressive_search_falls_back_to_words() {
        // Only the word "STRAINER" appears; the full 40-char query misses.
        let index = index_with(vec![(
            "STRAINER",
            Rect::new(100.0, 50.0, 160.0, 58.0),
        )]);
        let hit = find_text_on_page(&index, "TEMPORARY STRAINER WITH EXTRA QUALIFIERS", None);
        assert!(hit.is_some());
    }

    #[test]
    fn hint_rejects_distant_matches() {
        let index = index_with(vec![("BALL VALVE", Rect::new(900.0, 650.0, 980.0, 660.0))]);
        // Hint points at the far top-left corner: normalized distance ≈ 1.3.
        let hit = find_text_on_page(&index, "BALL VALVE", Some((0.0, 0.0)));
        assert!(hit.is_none());
        // No hint: the single match is taken.
        assert!(find_text_on_page(&index, "BALL VALVE", None).is_some());
    }

    #[test]
    fn hint_picks_nearest_of_multiple() {
        let index = index_with(vec![
            ("GATE VALVE", Rect::new(100.0, 100.0, 180.0, 110.0)),
            ("GATE VALVE", Rect::new(100.0, 400.0, 180.0, 410.0)),
        ]);
        let hit = find_text_on_page(&index, "GATE VALVE", Some((0.1, 0.55))).unwrap();
        assert!((hit.y0 - 400.0).abs() < 1.0);
    }

    #[test]
    fn columns_group_by_left_edge() {
        let mut rects = HashMap::new();
        rects.insert(0, Rect::new(100.0, 50.0, 200.0, 60.0));
        rects.insert(1, Rect::new(110.0, 90.0, 210.0, 100.0));
        rects.insert(2, Rect::new(400.0, 50.0, 500.0, 60.0));
        let columns = group_columns(&rects);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].len(), 2);
        assert_eq!(columns[1].len(), 1);
    }

    #[test]
    fn row_bounds_use_midpoints_and_header() {
        let mut rects = HashMap::new();
        rects.insert(0, Rect::new(100.0, 100.0, 200.0, 110.0));
        rects.insert(1, Rect::new(100.0, 150.0, 200.0, 160.0));
        let columns = group_columns(&rects);
        let headers = vec![Rect::new(95.0, 80.0, 150.0, 88.0)];
        let (bounds, col_of) = row_bounds(&columns, &headers, 700.0);

        // First row: below header bottom + 3.
        let (top0, bottom0) = bounds[&0];
        assert!((top0 - 91.0).abs() < 0.5);
        // Shared midpoint between the rows: (110 + 150) / 2 = 130.
        assert!((bottom0 - 130.0).abs() < 0.5);
        let (top1, _) = bounds[&1];
        assert!((top1 - 130.0).abs() < 0.5);
        assert_eq!(col_of[&0], 0);
    }

    #[test]
    fn left_boundary_snaps_to_grid_rule() {
        let mut rects = HashMap::new();
        rects.insert(0, Rect::new(150.0, 100.0, 250.0, 110.0));
        let columns = group_columns(&rects);
        // A rule at 90 pt sits within SYM_WIDTH + 30 of the text; one at
        // 20 pt is too far left to be this column's boundary.
        let bounds = column_left_boundaries(&columns, &[20.0, 90.0], 12.0);
        assert!((bounds[0] - 93.0).abs() < 0.5);
        // Without a usable rule the page margin applies.
        let bounds = column_left_boundaries(&columns, &[20.0], 12.0);
        assert!((bounds[0] - 15.0).abs() < 0.5);
    }
}
