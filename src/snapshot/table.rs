// Box-drawn rendering of a TSV snapshot file for --pretty-print

use crate::error::Result;
use std::io::IsTerminal;
use std::path::Path;
use unicode_width::UnicodeWidthStr;

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn pretty_print(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    print!("{}", render(&content, std::io::stdout().is_terminal()));
    Ok(())
}

/// Render TSV `content` as an aligned table. The first row is the header.
pub fn render(content: &str, bold_header: bool) -> String {
    let rows: Vec<Vec<&str>> = content
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split('\t').collect())
        .collect();
    if rows.is_empty() {
        return String::new();
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.width());
        }
    }

    let mut out = String::new();
    out.push_str(&border(&widths, '┌', '┬', '┐'));
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&line(row, &widths, i == 0 && bold_header));
        if i == 0 && rows.len() > 1 {
            out.push_str(&border(&widths, '├', '┼', '┤'));
        }
    }
    out.push_str(&border(&widths, '└', '┴', '┘'));
    out
}

fn border(widths: &[usize], left: char, middle: char, right: char) -> String {
    let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
    format!("{}{}{}\n", left, segments.join(&middle.to_string()), right)
}

fn line(row: &[&str], widths: &[usize], bold: bool) -> String {
    let mut out = String::from("│");
    for (i, width) in widths.iter().enumerate() {
        let cell = row.get(i).copied().unwrap_or("");
        let padding = " ".repeat(width - cell.width());
        if bold {
            out.push_str(&format!(" {}{}{}{} │", BOLD, cell, RESET, padding));
        } else {
            out.push_str(&format!(" {}{} │", cell, padding));
        }
    }
    out.push('\n');
    out
}
