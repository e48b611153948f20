//! Deterministic SVG word cloud.
//!
//! Words are placed in rank order along an Archimedean spiral from the
//! centre; a word goes at the first spiral point where its bounding box fits
//! inside the canvas without overlapping an earlier word, and is skipped if
//! none exists. No randomness is involved.

use std::fmt::Write as _;

use jobpulse_shared::KeywordCount;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 500.0;
const MIN_FONT: f64 = 12.0;
const MAX_FONT: f64 = 64.0;
const SPIRAL_STEP: f64 = 0.12;
const SPIRAL_TURNS: usize = 6_000;
const PADDING: f64 = 2.0;

const PALETTE: &[&str] = &[
    "#1f77b4", "#d62728", "#2ca02c", "#ff7f0e", "#9467bd", "#8c564b", "#e377c2", "#17becf",
];

#[derive(Debug, Clone, Copy)]
struct Rect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Rect {
    fn centered(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self {
            x0: cx - w / 2.0 - PADDING,
            y0: cy - h / 2.0 - PADDING,
            x1: cx + w / 2.0 + PADDING,
            y1: cy + h / 2.0 + PADDING,
        }
    }

    fn overlaps(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    fn inside_canvas(&self) -> bool {
        self.x0 >= 0.0 && self.y0 >= 0.0 && self.x1 <= WIDTH && self.y1 <= HEIGHT
    }
}

/// Render up to `max_words` of the ranked keywords. `None` when there is
/// nothing to draw.
pub fn render_svg(keywords: &[KeywordCount], max_words: usize) -> Option<String> {
    let words = &keywords[..keywords.len().min(max_words)];
    let lo = words.iter().map(|k| k.count).min()?;
    let hi = words.iter().map(|k| k.count).max()?;

    let mut placed: Vec<Rect> = Vec::new();
    let mut body = String::new();

    for (rank, keyword) in words.iter().enumerate() {
        let size = font_size(keyword.count, lo, hi);
        let w = text_width(&keyword.keyword, size);
        let h = size;

        let Some((x, y, rect)) = find_slot(w, h, &placed) else {
            continue;
        };
        placed.push(rect);

        let color = PALETTE[rank % PALETTE.len()];
        let _ = writeln!(
            body,
            r#"  <text x="{x:.1}" y="{y:.1}" font-size="{size:.1}" fill="{color}" text-anchor="middle" dominant-baseline="central">{}</text>"#,
            escape_xml(&keyword.keyword)
        );
    }

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="'Noto Sans CJK SC', 'Microsoft YaHei', sans-serif">"#
    );
    let _ = writeln!(svg, r#"  <rect width="100%" height="100%" fill="white"/>"#);
    svg.push_str(&body);
    svg.push_str("</svg>\n");
    Some(svg)
}

/// Square-root scaling so a single dominant word does not dwarf the rest.
fn font_size(count: u64, lo: u64, hi: u64) -> f64 {
    if hi == lo {
        return (MIN_FONT + MAX_FONT) / 2.0;
    }
    let t = (count - lo) as f64 / (hi - lo) as f64;
    MIN_FONT + (MAX_FONT - MIN_FONT) * t.sqrt()
}

/// CJK glyphs are about one em wide, Latin glyphs a bit over half.
fn text_width(text: &str, size: f64) -> f64 {
    text.chars()
        .map(|c| if c.is_ascii() { 0.6 } else { 1.0 })
        .sum::<f64>()
        * size
}

fn find_slot(w: f64, h: f64, placed: &[Rect]) -> Option<(f64, f64, Rect)> {
    let (cx, cy) = (WIDTH / 2.0, HEIGHT / 2.0);
    let aspect = WIDTH / HEIGHT;
    (0..SPIRAL_TURNS).find_map(|step| {
        let t = step as f64 * SPIRAL_STEP;
        let r = 1.5 * t;
        let x = cx + r * t.cos() * aspect;
        let y = cy + r * t.sin();
        let rect = Rect::centered(x, y, w, h);
        (rect.inside_canvas() && !placed.iter().any(|p| p.overlaps(&rect))).then_some((x, y, rect))
    })
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
