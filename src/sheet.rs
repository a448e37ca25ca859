//! Minimal XLSX first-worksheet reader.
//!
//! An .xlsx file is a zip container; the cells live in
//! `xl/worksheets/sheet1.xml` with string values indirected through
//! `xl/sharedStrings.xml`. This reads only what the bulk importer needs:
//! the first sheet projected to rows of raw strings, column order preserved,
//! no type coercion.

use anyhow::{anyhow, Context};
use std::io::{Cursor, Read};
use zip::ZipArchive;

pub fn read_first_sheet(bytes: &[u8]) -> anyhow::Result<Vec<Vec<String>>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .context("not a spreadsheet container (expected a zip-based workbook)")?;

    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Some(xml) => parse_shared_strings(&xml),
        None => Vec::new(),
    };

    let sheet_xml = read_entry(&mut archive, "xl/worksheets/sheet1.xml")
        .or_else(|| {
            // Some producers number sheets differently; take the first by name.
            let mut names: Vec<String> = (0..archive.len())
                .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
                .filter(|n| n.starts_with("xl/worksheets/") && n.ends_with(".xml"))
                .collect();
            names.sort();
            names.first().and_then(|n| read_entry(&mut archive, n))
        })
        .ok_or_else(|| anyhow!("workbook has no worksheet"))?;

    Ok(parse_sheet(&sheet_xml, &shared))
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut text = String::new();
    entry.read_to_string(&mut text).ok()?;
    Some(text)
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some((item, tail)) = next_element(rest, "si") {
        // A shared string may be split across several <t> runs.
        let mut text = String::new();
        let mut inner = item;
        while let Some((t, t_tail)) = next_element(inner, "t") {
            text.push_str(&unescape_xml(t));
            inner = t_tail;
        }
        out.push(text);
        rest = tail;
    }
    out
}

fn parse_sheet(xml: &str, shared: &[String]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let Some(data_start) = xml.find("<sheetData") else {
        return rows;
    };
    let data = &xml[data_start..];

    let mut rest = data;
    while let Some((row_body, tail)) = next_element(rest, "row") {
        rows.push(parse_row(row_body, shared));
        rest = tail;
    }
    rows
}

fn parse_row(body: &str, shared: &[String]) -> Vec<String> {
    let mut cells: Vec<String> = Vec::new();
    let mut rest = body;
    let mut next_col = 0usize;
    while let Some((tag, cell_body, tail)) = next_tagged_element(rest, "c") {
        let col = attr_value(&tag, "r")
            .and_then(|r| column_index(&r))
            .unwrap_or(next_col);
        while cells.len() <= col {
            cells.push(String::new());
        }

        let cell_type = attr_value(&tag, "t").unwrap_or_default();
        let value = match cell_type.as_str() {
            "s" => next_element(&cell_body, "v")
                .map(|(v, _)| v.trim().to_string())
                .and_then(|idx| idx.parse::<usize>().ok())
                .and_then(|idx| shared.get(idx).cloned())
                .unwrap_or_default(),
            "inlineStr" => {
                let mut text = String::new();
                let mut inner = cell_body.as_str();
                while let Some((t, t_tail)) = next_element(inner, "t") {
                    text.push_str(&unescape_xml(t));
                    inner = t_tail;
                }
                text
            }
            // "str", "b", "n" and untyped numeric cells all carry a raw <v>.
            _ => next_element(&cell_body, "v")
                .map(|(v, _)| unescape_xml(v))
                .unwrap_or_default(),
        };
        cells[col] = value;
        next_col = col + 1;
        rest = tail;
    }
    cells
}

/// Find the next `<name ...>body</name>` (or self-closing `<name .../>`),
/// returning the body and the remainder after the closing tag.
fn next_element<'a>(xml: &'a str, name: &str) -> Option<(&'a str, &'a str)> {
    let (_, body, rest) = next_tagged_element_borrowed(xml, name)?;
    Some((body, rest))
}

/// Like `next_element` but also yields the opening tag text (for attributes).
fn next_tagged_element<'a>(xml: &'a str, name: &str) -> Option<(String, String, &'a str)> {
    let (tag, body, rest) = next_tagged_element_borrowed(xml, name)?;
    Some((tag.to_string(), body.to_string(), rest))
}

fn next_tagged_element_borrowed<'a>(
    xml: &'a str,
    name: &str,
) -> Option<(&'a str, &'a str, &'a str)> {
    let open = format!("<{}", name);
    let mut search_from = 0;
    loop {
        let start = xml[search_from..].find(&open)? + search_from;
        // Reject prefix matches such as <row matching <rowBreaks.
        let after = xml[start + open.len()..].chars().next()?;
        if after != ' ' && after != '>' && after != '/' && after != '\t' && after != '\r' && after != '\n' {
            search_from = start + open.len();
            continue;
        }

        let tag_end = xml[start..].find('>')? + start;
        let tag = &xml[start..=tag_end];
        if tag.ends_with("/>") {
            return Some((tag, "", &xml[tag_end + 1..]));
        }
        let close = format!("</{}>", name);
        let body_start = tag_end + 1;
        let close_at = xml[body_start..].find(&close)? + body_start;
        return Some((tag, &xml[body_start..close_at], &xml[close_at + close.len()..]));
    }
}

fn attr_value(tag: &str, name: &str) -> Option<String> {
    let needle = format!(" {}=\"", name);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// "A1" -> 0, "B7" -> 1, "AA3" -> 26.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut idx = 0usize;
    for c in letters.chars() {
        idx = idx * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(idx - 1)
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
