//! sheet_data.rs – разобранный <sheetData> листа.
//!
//! Лист хранится тремя кусками: `head` (всё до `<sheetData`), строки и
//! `tail` (всё после `</sheetData>`). Строки и ячейки разбираются один раз при
//! открытии, тело ячейки (`<f>`, `<v>`, `<is>`) хранится сырыми байтами и
//! пересобирается только при записи значения.

use anyhow::{Context, Result, bail};
use quick_xml::{Reader, escape::escape, events::BytesStart, events::Event};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::coord::{coord, shift_ref_attributes, shift_refs, split_coord};
use crate::read_part::{CellValue, SharedStrings, parse_cell_value};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Cell {
    pub style: Option<u32>,
    /// атрибут `t`
    pub kind: Option<String>,
    /// прочие атрибуты <c> (cm, vm, ph), значения как в исходнике
    pub attrs: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Row {
    /// атрибуты <row> без `r` и `spans`
    pub attrs: Vec<(String, String)>,
    /// ключ – 0-based столбец
    pub cells: BTreeMap<u32, Cell>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SheetXml {
    pub head: Vec<u8>,
    pub rows: BTreeMap<u32, Row>,
    pub tail: Vec<u8>,
}

impl SheetXml {
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let open = memchr::memmem::find(xml, b"<sheetData")
            .context("<sheetData> not found on the current sheet")?;
        let open_end = memchr::memchr(b'>', &xml[open..])
            .map(|p| open + p + 1)
            .context("malformed <sheetData> tag")?;

        // <sheetData/> – пустой лист
        if xml[open_end - 2] == b'/' {
            return Ok(Self {
                head: xml[..open].to_vec(),
                rows: BTreeMap::new(),
                tail: xml[open_end..].to_vec(),
            });
        }

        let close = memchr::memmem::rfind(xml, b"</sheetData>")
            .context("</sheetData> tag not found")?;
        if close < open_end {
            bail!("</sheetData> before <sheetData>");
        }

        let rows = parse_rows(&xml[open_end..close])?;
        Ok(Self {
            head: xml[..open].to_vec(),
            rows,
            tail: xml[close + "</sheetData>".len()..].to_vec(),
        })
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.head.len() + self.tail.len() + self.rows.len() * 256);
        out.extend_from_slice(&self.head);
        out.extend_from_slice(b"<sheetData>");
        for (r, row) in &self.rows {
            out.extend_from_slice(format!(r#"<row r="{r}""#).as_bytes());
            for (k, v) in &row.attrs {
                out.extend_from_slice(format!(r#" {k}="{v}""#).as_bytes());
            }
            if row.cells.is_empty() {
                out.extend_from_slice(b"/>");
                continue;
            }
            out.push(b'>');
            for (c, cell) in &row.cells {
                write_cell(&mut out, *c, *r, cell);
            }
            out.extend_from_slice(b"</row>");
        }
        out.extend_from_slice(b"</sheetData>");
        out.extend_from_slice(&self.tail);
        out
    }

    pub fn cell(&self, col: u32, row: u32) -> Option<&Cell> {
        self.rows.get(&row)?.cells.get(&col)
    }

    /// Ячейка, созданная при необходимости (и строка под неё).
    pub fn cell_mut(&mut self, col: u32, row: u32) -> &mut Cell {
        self.rows.entry(row).or_default().cells.entry(col).or_default()
    }

    pub fn value(&self, col: u32, row: u32, shared: &SharedStrings) -> Result<CellValue> {
        match self.cell(col, row) {
            Some(c) => parse_cell_value(c.kind.as_deref(), &c.body, shared)
                .with_context(|| format!("cell {}", coord(col, row))),
            None => Ok(CellValue::Empty),
        }
    }

    /// Последняя строка, в которой есть хотя бы одна ячейка (0 – лист пуст).
    pub fn max_row(&self) -> u32 {
        self.rows
            .iter()
            .rev()
            .find(|(_, row)| !row.cells.is_empty())
            .map_or(0, |(r, _)| *r)
    }

    /// Количество столбцов до последней занятой ячейки включительно (1-based).
    pub fn max_column(&self) -> u32 {
        self.rows
            .values()
            .filter_map(|row| row.cells.keys().next_back())
            .max()
            .map_or(0, |c| c + 1)
    }

    /// Сдвигает ячейки с `at` и правее на `by` столбцов вместе со ссылками
    /// в head/tail (dimension, выделения, объединения, фильтр, условное
    /// форматирование, проверки данных, гиперссылки). Ширины <cols> не трогаются.
    pub fn insert_cols(&mut self, at: u32, by: u32) -> Result<()> {
        if by == 0 {
            return Ok(());
        }
        for row in self.rows.values_mut() {
            let moved = row.cells.split_off(&at);
            for (c, mut cell) in moved {
                cell.body = shift_shared_formula_ref(&cell.body, at, by)?;
                row.cells.insert(c + by, cell);
            }
        }
        self.head = shift_ref_attributes(&self.head, at, by)?;
        self.tail = shift_ref_attributes(&self.tail, at, by)?;
        Ok(())
    }
}

impl Cell {
    pub fn set_text(&mut self, text: &str) {
        self.kind = Some("inlineStr".into());
        let space = if text.trim() != text { r#" xml:space="preserve""# } else { "" };
        self.body = format!("<is><t{space}>{}</t></is>", escape(text)).into_bytes();
    }

    pub fn set_number(&mut self, n: f64) {
        self.kind = None;
        self.body = format!("<v>{n}</v>").into_bytes();
    }

    pub fn set_formula(&mut self, f: &str) {
        self.kind = None;
        self.body = format!("<f>{}</f>", escape(f)).into_bytes();
    }

    /// Убирает значение, стиль остаётся.
    pub fn clear(&mut self) {
        self.kind = None;
        self.body.clear();
    }
}

fn write_cell(out: &mut Vec<u8>, col: u32, row: u32, cell: &Cell) {
    out.extend_from_slice(format!(r#"<c r="{}""#, coord(col, row)).as_bytes());
    if let Some(s) = cell.style {
        out.extend_from_slice(format!(r#" s="{s}""#).as_bytes());
    }
    if let Some(t) = &cell.kind {
        out.extend_from_slice(format!(r#" t="{t}""#).as_bytes());
    }
    for (k, v) in &cell.attrs {
        out.extend_from_slice(format!(r#" {k}="{v}""#).as_bytes());
    }
    if cell.body.is_empty() {
        out.extend_from_slice(b"/>");
    } else {
        out.push(b'>');
        out.extend_from_slice(&cell.body);
        out.extend_from_slice(b"</c>");
    }
}

fn raw_attrs(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .map(|a| {
            (
                String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                String::from_utf8_lossy(&a.value).into_owned(),
            )
        })
        .collect()
}

fn parse_rows(xml: &[u8]) -> Result<BTreeMap<u32, Row>> {
    let mut rdr = Reader::from_reader(xml);
    rdr.config_mut().trim_text(true);

    let mut rows: BTreeMap<u32, Row> = BTreeMap::new();
    let mut cur_row = 0u32;
    let mut next_col = 0u32;

    loop {
        let ev = rdr.read_event().context("sheetData: malformed XML")?;
        match ev {
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"row" => {
                let mut attrs = raw_attrs(e);
                cur_row = match attrs.iter().position(|(k, _)| k == "r") {
                    Some(i) => attrs.remove(i).1.parse().context("bad row number")?,
                    None => cur_row + 1,
                };
                attrs.retain(|(k, _)| k != "spans");
                next_col = 0;
                rows.entry(cur_row).or_default().attrs = attrs;
            }
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"c" => {
                let mut cell = Cell::default();
                let mut col = next_col;
                for (k, v) in raw_attrs(e) {
                    match k.as_str() {
                        "r" => {
                            let (c, r) = split_coord(&v)?;
                            if r != cur_row {
                                bail!("cell {v} outside of its row {cur_row}");
                            }
                            col = c;
                        }
                        "s" => cell.style = Some(v.parse().context("bad style index")?),
                        "t" => cell.kind = Some(v),
                        _ => cell.attrs.push((k, v)),
                    }
                }
                if matches!(ev, Event::Start(_)) {
                    let span = rdr.read_to_end(e.name())?;
                    cell.body = xml[span.start as usize..span.end as usize].to_vec();
                }
                next_col = col + 1;
                rows.entry(cur_row).or_default().cells.insert(col, cell);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

/// `<f t="shared" ref="B2:B9" si="0">` – диапазон общей формулы едет вместе с ячейками.
fn shift_shared_formula_ref(body: &[u8], at: u32, by: u32) -> Result<Vec<u8>> {
    static F_REF: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(<f\b[^>]*\bref=")([^"]*)(")"#).expect("static formula-ref regex")
    });
    if memchr::memmem::find(body, b"<f").is_none() {
        return Ok(body.to_vec());
    }
    let text = std::str::from_utf8(body).context("cell body is not UTF-8")?;
    let out = F_REF.replace_all(text, |caps: &regex::Captures| {
        format!("{}{}{}", &caps[1], shift_refs(&caps[2], at, by), &caps[3])
    });
    Ok(out.into_owned().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:C3"/><sheetViews><sheetView workbookViewId="0"><selection activeCell="B2" sqref="B2"/></sheetView></sheetViews><sheetFormatPr defaultRowHeight="15"/><cols><col min="1" max="1" width="20" customWidth="1"/></cols><sheetData><row r="1" spans="1:3" ht="30" customHeight="1"><c r="A1" s="1" t="s"><v>0</v></c><c r="C1"><v>5</v></c></row><row r="3"><c r="B3"><f t="shared" ref="B3:C3" si="0">A3*2</f><v>0</v></c></row></sheetData><mergeCells count="1"><mergeCell ref="A1:B1"/></mergeCells></worksheet>"#;

    #[test]
    fn parse_keeps_rows_cells_and_surroundings() -> Result<()> {
        let sheet = SheetXml::parse(SHEET.as_bytes())?;
        assert_eq!(sheet.max_row(), 3);
        assert_eq!(sheet.max_column(), 3);
        let a1 = sheet.cell(0, 1).context("A1")?;
        assert_eq!(a1.style, Some(1));
        assert_eq!(a1.kind.as_deref(), Some("s"));
        assert_eq!(a1.body, b"<v>0</v>");
        assert_eq!(
            sheet.rows[&1].attrs,
            vec![("ht".to_string(), "30".to_string()), ("customHeight".to_string(), "1".to_string())]
        );
        assert!(std::str::from_utf8(&sheet.tail)?.contains("A1:B1"));
        Ok(())
    }

    #[test]
    fn insert_cols_moves_cells_and_references_but_not_widths() -> Result<()> {
        let mut sheet = SheetXml::parse(SHEET.as_bytes())?;
        sheet.insert_cols(0, 1)?;
        assert!(sheet.cell(0, 1).is_none());
        assert_eq!(sheet.cell(1, 1).and_then(|c| c.style), Some(1));
        assert!(sheet.cell(3, 1).is_some());
        assert_eq!(sheet.max_column(), 4);

        let xml = String::from_utf8(sheet.to_xml())?;
        assert!(xml.contains(r#"<dimension ref="B1:D3"/>"#));
        assert!(xml.contains(r#"activeCell="C2" sqref="C2""#));
        assert!(xml.contains(r#"<mergeCell ref="B1:C1"/>"#));
        assert!(xml.contains(r#"<col min="1" max="1" width="20" customWidth="1"/>"#));
        assert!(xml.contains(r#"<f t="shared" ref="C3:D3" si="0">A3*2</f>"#));
        assert!(xml.contains(r#"<c r="B1" s="1" t="s"><v>0</v></c>"#));
        Ok(())
    }

    #[test]
    fn cells_without_r_take_implied_positions() -> Result<()> {
        let xml = br#"<worksheet><sheetData><row><c><v>1</v></c><c><v>2</v></c></row><row><c r="C2"/></row></sheetData></worksheet>"#;
        let sheet = SheetXml::parse(xml)?;
        assert!(sheet.cell(0, 1).is_some());
        assert!(sheet.cell(1, 1).is_some());
        assert!(sheet.cell(2, 2).is_some());
        Ok(())
    }

    #[test]
    fn overlong_column_letters_are_an_error() {
        let xml = br#"<worksheet><sheetData><row r="1"><c r="AAAAAAAA1"><v>1</v></c></row></sheetData></worksheet>"#;
        assert!(SheetXml::parse(xml).is_err());
    }

    #[test]
    fn empty_sheet_data_round_trips() -> Result<()> {
        let xml = br#"<worksheet><sheetData/><pageMargins left="0.7"/></worksheet>"#;
        let mut sheet = SheetXml::parse(xml)?;
        assert_eq!(sheet.max_row(), 0);
        sheet.cell_mut(0, 1).set_text(" padded ");
        let out = String::from_utf8(sheet.to_xml())?;
        assert_eq!(
            out,
            r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t xml:space="preserve"> padded </t></is></c></row></sheetData><pageMargins left="0.7"/></worksheet>"#
        );
        Ok(())
    }
}
