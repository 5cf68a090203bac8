//! Deterministic document writers: markdown in, PDF/RTF/plain bytes
//! out. The layout is fixed — headings H1–H3, body lines, blanks, and
//! page breaks every 46 lines for PDF.

use regex::Regex;

/// Lines emitted per PDF page before a page break.
const PDF_LINES_PER_PAGE: usize = 46;

/// Line style classified from markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    H1,
    H2,
    H3,
    Body,
    Blank,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Markdown classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn strip_inline(s: &str) -> String {
    let mut out = s.to_string();
    for (pat, rep) in [
        (r"\*\*(.*?)\*\*", "$1"),
        (r"\*(.*?)\*", "$1"),
        (r"`(.*?)`", "$1"),
    ] {
        out = Regex::new(pat).expect("static regex").replace_all(&out, rep).to_string();
    }
    out
}

/// Classify markdown into styled lines; a fenced markdown block
/// wrapping the whole document is unwrapped first.
pub fn markdown_lines(content: &str) -> Vec<(String, LineStyle)> {
    let raw = content.replace("\r\n", "\n");
    let raw = raw.trim();
    let fence = Regex::new(r"(?is)^```(?:markdown|md)?\n([\s\S]*?)\n```$").expect("static regex");
    let text = fence
        .captures(raw)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| raw.to_string());

    let numbered = Regex::new(r"^\d+\.\s+").expect("static regex");
    let mut out = Vec::new();
    for row in text.split('\n') {
        let line = row.trim();
        if line.is_empty() {
            out.push((String::new(), LineStyle::Blank));
        } else if let Some(rest) = line.strip_prefix("### ") {
            out.push((strip_inline(rest.trim()), LineStyle::H3));
        } else if let Some(rest) = line.strip_prefix("## ") {
            out.push((strip_inline(rest.trim()), LineStyle::H2));
        } else if let Some(rest) = line.strip_prefix("# ") {
            out.push((strip_inline(rest.trim()), LineStyle::H1));
        } else if numbered.is_match(line) {
            out.push((strip_inline(line), LineStyle::H3));
        } else {
            out.push((strip_inline(line), LineStyle::Body));
        }
    }
    out
}

/// Strip markdown down to plain text.
pub fn as_plain_text(s: &str) -> String {
    let t = s.trim();
    if t.is_empty() {
        return "No content generated.".into();
    }
    let mut out = Regex::new(r"```[a-zA-Z0-9_-]*\n([\s\S]*?)```")
        .expect("static regex")
        .replace_all(t, "$1")
        .to_string();
    out = Regex::new(r"(?m)^#+\s*").expect("static regex").replace_all(&out, "").to_string();
    strip_inline(&out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PDF
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn escape_pdf_text(s: &str) -> String {
    s.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)")
}

fn latin1_lossy(s: &str) -> String {
    s.chars().map(|c| if (c as u32) < 256 { c } else { '?' }).collect()
}

/// Wrap styled lines to the page width.
fn wrapped_lines(content: &str) -> Vec<(String, LineStyle)> {
    let mut lines = Vec::new();
    for (row, style) in markdown_lines(content) {
        if row.is_empty() {
            lines.push((String::new(), LineStyle::Blank));
            continue;
        }
        let width = if matches!(style, LineStyle::H1 | LineStyle::H2) { 90 } else { 95 };
        let mut rest = latin1_lossy(&row);
        while rest.chars().count() > width {
            let head: String = rest.chars().take(width).collect();
            rest = rest.chars().skip(width).collect();
            lines.push((head, style));
        }
        lines.push((rest, style));
    }
    lines
}

fn page_content_stream(lines: &[(String, LineStyle)]) -> String {
    let mut content = String::from("BT\n/F1 11 Tf\n50 800 Td\n14 TL\n");
    for (line, style) in lines {
        match style {
            LineStyle::Blank => {
                content.push_str("T*\n");
                continue;
            }
            LineStyle::H1 => content.push_str("/F2 16 Tf\n"),
            LineStyle::H2 => content.push_str("/F2 14 Tf\n"),
            LineStyle::H3 => content.push_str("/F2 12 Tf\n"),
            LineStyle::Body => content.push_str("/F1 11 Tf\n"),
        }
        content.push_str(&format!("({}) Tj\nT*\n", escape_pdf_text(line)));
    }
    content.push_str("ET\n");
    content
}

/// Render markdown into a minimal multi-page PDF.
pub fn pdf_bytes(content: &str) -> Vec<u8> {
    let lines = wrapped_lines(content);
    let pages: Vec<&[(String, LineStyle)]> = if lines.is_empty() {
        vec![&[]]
    } else {
        lines.chunks(PDF_LINES_PER_PAGE).collect()
    };
    let n_pages = pages.len();

    // Object layout: 1 catalog, 2 pages node, then (page, content)
    // pairs, then the two fonts.
    let page_obj = |i: usize| 3 + 2 * i;
    let content_obj = |i: usize| 4 + 2 * i;
    let f1_obj = 3 + 2 * n_pages;
    let f2_obj = 4 + 2 * n_pages;

    let kids: Vec<String> = (0..n_pages).map(|i| format!("{} 0 R", page_obj(i))).collect();

    let mut objs: Vec<String> = Vec::new();
    objs.push("1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n".into());
    objs.push(format!(
        "2 0 obj\n<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
        kids.join(" "),
        n_pages
    ));
    for (i, page_lines) in pages.iter().enumerate() {
        objs.push(format!(
            "{} 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 842] \
             /Contents {} 0 R /Resources << /Font << /F1 {} 0 R /F2 {} 0 R >> >> >>\nendobj\n",
            page_obj(i),
            content_obj(i),
            f1_obj,
            f2_obj
        ));
        let stream = page_content_stream(page_lines);
        objs.push(format!(
            "{} 0 obj\n<< /Length {} >>\nstream\n{}endstream\nendobj\n",
            content_obj(i),
            stream.len(),
            stream
        ));
    }
    objs.push(format!(
        "{f1_obj} 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>\nendobj\n"
    ));
    objs.push(format!(
        "{f2_obj} 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>\nendobj\n"
    ));

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for obj in &objs {
        offsets.push(pdf.len());
        pdf.push_str(obj);
    }
    let xref_pos = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n", objs.len() + 1));
    pdf.push_str("0000000000 65535 f \n");
    for off in offsets {
        pdf.push_str(&format!("{off:010} 00000 n \n"));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objs.len() + 1,
        xref_pos
    ));

    pdf.into_bytes()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RTF ("doc")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render markdown into RTF, served as the `doc` format.
pub fn rtf_bytes(content: &str) -> Vec<u8> {
    let mut chunks = vec!["{\\rtf1\\ansi\\deff0\n".to_string()];
    for (row, style) in markdown_lines(content) {
        let esc = row.replace('\\', "\\\\").replace('{', "\\{").replace('}', "\\}");
        let chunk = match style {
            LineStyle::Blank => "\\par\n".to_string(),
            LineStyle::H1 => format!("\\b\\fs34 {esc}\\b0\\fs24\\par\n"),
            LineStyle::H2 => format!("\\b\\fs30 {esc}\\b0\\fs24\\par\n"),
            LineStyle::H3 => format!("\\b\\fs26 {esc}\\b0\\fs24\\par\n"),
            LineStyle::Body => format!("\\fs24 {esc}\\par\n"),
        };
        chunks.push(chunk);
    }
    chunks.push("}".into());
    chunks.concat().into_bytes()
}
