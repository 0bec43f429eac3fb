//! read_part.rs – чтение значений: sharedStrings.xml и содержимое <c>.

use anyhow::{Context, Result};
use quick_xml::{Reader, escape::unescape, events::Event};
use std::fmt;

/// Значение ячейки в том виде, в каком его видит пользователь Excel.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Error(String),
    /// Формула без вычисленного значения (`<f>` без `<v>`), текст без `=`.
    Formula(String),
}

impl CellValue {
    /// Заполнена ли ячейка: пустая строка, 0 и FALSE считаются пустыми.
    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Empty => false,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Number(n) => *n != 0.0,
            CellValue::Bool(b) => *b,
            CellValue::Error(_) | CellValue::Formula(_) => true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) | CellValue::Error(s) => f.write_str(s),
            // 12.0 -> "12"
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
            CellValue::Formula(src) => write!(f, "={src}"),
        }
    }
}

/// Таблица общих строк книги.
#[derive(Debug, Clone, Default)]
pub struct SharedStrings {
    items: Vec<String>,
}

impl SharedStrings {
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut rdr = Reader::from_reader(xml);
        rdr.config_mut().trim_text(false);
        let mut items = Vec::new();

        loop {
            match rdr.read_event().context("sharedStrings.xml: malformed XML")? {
                Event::Start(ref e) if e.name().as_ref() == b"si" => {
                    let span = rdr.read_to_end(e.name())?;
                    let inner = &xml[span.start as usize..span.end as usize];
                    items.push(text_runs(inner)?);
                }
                Event::Empty(ref e) if e.name().as_ref() == b"si" => items.push(String::new()),
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(Self { items })
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.items.get(idx).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Склеивает все <t> внутри <si>/<is> (в том числе из <r>), пропуская фонетику <rPh>.
pub(crate) fn text_runs(xml: &[u8]) -> Result<String> {
    let mut rdr = Reader::from_reader(xml);
    rdr.config_mut().trim_text(false);
    let mut out = String::new();

    loop {
        match rdr.read_event()? {
            Event::Start(ref e) if e.name().as_ref() == b"t" => {
                let span = rdr.read_to_end(e.name())?;
                out.push_str(&unescape_span(xml, span.start as usize, span.end as usize)?);
            }
            Event::Start(ref e) if e.name().as_ref() == b"rPh" => {
                rdr.read_to_end(e.name())?;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn unescape_span(xml: &[u8], start: usize, end: usize) -> Result<String> {
    let raw = std::str::from_utf8(&xml[start..end]).context("cell text is not UTF-8")?;
    Ok(unescape(raw)
        .with_context(|| format!("bad XML escape in {raw:?}"))?
        .into_owned())
}

/// Разбирает тело <c>…</c> с учётом атрибута `t`.
pub(crate) fn parse_cell_value(
    kind: Option<&str>,
    body: &[u8],
    shared: &SharedStrings,
) -> Result<CellValue> {
    if kind == Some("inlineStr") {
        return Ok(match find_child(body, b"is")? {
            Some((s, e)) => CellValue::Text(text_runs(&body[s..e])?),
            None => CellValue::Empty,
        });
    }

    let Some((s, e)) = find_child(body, b"v")? else {
        // Excel ещё не пересчитал книгу, но ячейка заполнена
        return Ok(match find_child(body, b"f")? {
            Some((s, e)) => CellValue::Formula(unescape_span(body, s, e)?),
            None => CellValue::Empty,
        });
    };
    if s == e {
        return Ok(CellValue::Empty);
    }
    let raw = unescape_span(body, s, e)?;

    Ok(match kind {
        Some("s") => {
            let idx: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("bad shared string index {raw:?}"))?;
            let text = shared
                .get(idx)
                .with_context(|| format!("shared string #{idx} out of range"))?;
            CellValue::Text(text.to_owned())
        }
        Some("str") => CellValue::Text(raw),
        Some("b") => CellValue::Bool(raw.trim() == "1"),
        Some("e") => CellValue::Error(raw),
        _ => match raw.trim().parse::<f64>() {
            Ok(n) => CellValue::Number(n),
            Err(_) => CellValue::Text(raw),
        },
    })
}

/// Span содержимого первого дочернего элемента `name` (без самих тегов).
/// У пустого `<name/>` span нулевой длины.
fn find_child(xml: &[u8], name: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut rdr = Reader::from_reader(xml);
    rdr.config_mut().trim_text(false);
    loop {
        match rdr.read_event()? {
            Event::Start(ref e) if e.name().as_ref() == name => {
                let span = rdr.read_to_end(e.name())?;
                return Ok(Some((span.start as usize, span.end as usize)));
            }
            Event::Empty(ref e) if e.name().as_ref() == name => {
                let at = rdr.buffer_position() as usize;
                return Ok(Some((at, at)));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}
