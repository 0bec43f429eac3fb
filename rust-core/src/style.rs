//! style.rs – слой стилей (патчи поверх существующего xf) + нормализация <cols>

use anyhow::{Context, Result, bail};
use quick_xml::{Reader, events::Event};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use crate::XlsxEditor;
use crate::coord::{CellRange, col_index, col_letter};

static ATTRS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z:]+)\s*=\s*"([^"]*)""#).expect("static attrs regex")
});

/* ========================== ALIGNMENT API ================================= */

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HorizAlignment {
    Left,
    Center,
    Right,
    Fill,
    Justify,
}
impl fmt::Display for HorizAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HorizAlignment::Left => "left",
            HorizAlignment::Center => "center",
            HorizAlignment::Right => "right",
            HorizAlignment::Fill => "fill",
            HorizAlignment::Justify => "justify",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VertAlignment {
    Top,
    Center,
    Bottom,
    Justify,
}
impl fmt::Display for VertAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VertAlignment::Top => "top",
            VertAlignment::Center => "center",
            VertAlignment::Bottom => "bottom",
            VertAlignment::Justify => "justify",
        })
    }
}

/// Заданные поля перезаписывают выравнивание ячейки, остальные атрибуты
/// `<alignment>` (отступ, поворот) остаются.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AlignSpec {
    pub horiz: Option<HorizAlignment>,
    pub vert: Option<VertAlignment>,
    pub wrap: bool,
}

impl AlignSpec {
    pub fn center() -> Self {
        Self {
            horiz: Some(HorizAlignment::Center),
            vert: Some(VertAlignment::Center),
            wrap: false,
        }
    }
}

/* ========================== FONT / BORDER PATCHES ========================= */

/// Изменение шрифта поверх текущего шрифта ячейки.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FontPatch {
    pub bold: Option<bool>,
    /// ARGB, например `FFFFFFFF`
    pub color: Option<String>,
}

/// Одинаковая рамка со всех четырёх сторон.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BorderSpec {
    pub style: String,
    pub color: Option<String>,
}

impl BorderSpec {
    pub fn thin(color: &str) -> Self {
        Self {
            style: "thin".into(),
            color: Some(color.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StylePatch {
    pub font: Option<FontPatch>,
    pub border: Option<BorderSpec>,
    pub align: Option<AlignSpec>,
}

/// Уже созданные записи styles.xml, чтобы одинаковые патчи не плодили xf.
#[derive(Debug, Default)]
pub(crate) struct StyleCache {
    xfs: HashMap<(u32, StylePatch), u32>,
    fonts: HashMap<(u32, FontPatch), u32>,
    borders: HashMap<BorderSpec, u32>,
}

/* ========================== CORE STYLE STRUCT ============================= */

/// Одна запись `<xf>` из `<cellXfs>`: атрибуты как есть, `<alignment>` отдельно,
/// прочие дочерние элементы (`<protection>`, `<extLst>`) сырым текстом.
#[derive(Debug, Clone, Default)]
struct XfRecord {
    attrs: Vec<(String, String)>,
    alignment: Option<Vec<(String, String)>>,
    rest: String,
}

impl XfRecord {
    fn get(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, val: impl ToString) {
        set_attr(&mut self.attrs, key, val.to_string());
    }

    fn merge_alignment(&mut self, spec: &AlignSpec) {
        let al = self.alignment.get_or_insert_with(Vec::new);
        if let Some(h) = &spec.horiz {
            set_attr(al, "horizontal", h.to_string());
        }
        if let Some(v) = &spec.vert {
            set_attr(al, "vertical", v.to_string());
        }
        if spec.wrap {
            set_attr(al, "wrapText", "1".into());
        }
    }

    fn to_xml(&self) -> String {
        let mut xf = String::from("<xf");
        for (k, v) in &self.attrs {
            xf.push_str(&format!(r#" {k}="{v}""#));
        }
        if self.alignment.is_none() && self.rest.is_empty() {
            xf.push_str("/>");
            return xf;
        }
        xf.push('>');
        if let Some(al) = &self.alignment {
            xf.push_str("<alignment");
            for (k, v) in al {
                xf.push_str(&format!(r#" {k}="{v}""#));
            }
            xf.push_str("/>");
        }
        xf.push_str(&self.rest);
        xf.push_str("</xf>");
        xf
    }
}

fn set_attr(attrs: &mut Vec<(String, String)>, key: &str, val: String) {
    match attrs.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = val,
        None => attrs.push((key.to_string(), val)),
    }
}

fn parse_attrs(tag: &str) -> Vec<(String, String)> {
    ATTRS_RE
        .captures_iter(tag)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

/* ========================== PUBLIC API ==================================== */

impl XlsxEditor {
    pub fn set_border(&mut self, range: &str, border: &BorderSpec) -> Result<&mut Self> {
        self.apply_patch(
            range,
            &StylePatch {
                border: Some(border.clone()),
                ..Default::default()
            },
        )?;
        Ok(self)
    }

    pub fn set_font(&mut self, range: &str, font: &FontPatch) -> Result<&mut Self> {
        self.apply_patch(
            range,
            &StylePatch {
                font: Some(font.clone()),
                ..Default::default()
            },
        )?;
        Ok(self)
    }

    pub fn set_font_with_alignment(
        &mut self,
        range: &str,
        font: &FontPatch,
        align: &AlignSpec,
    ) -> Result<&mut Self> {
        self.apply_patch(
            range,
            &StylePatch {
                font: Some(font.clone()),
                align: Some(align.clone()),
                ..Default::default()
            },
        )?;
        Ok(self)
    }

    pub fn set_alignment(&mut self, range: &str, align: &AlignSpec) -> Result<&mut Self> {
        self.apply_patch(
            range,
            &StylePatch {
                align: Some(align.clone()),
                ..Default::default()
            },
        )?;
        Ok(self)
    }
}

/// Чтение итогового оформления ячейки, для проверок в тестах.
#[cfg(any(test, feature = "testkit"))]
impl XlsxEditor {
    /// Индекс xf ячейки (`s`), `None` – ячейки нет или стиль по умолчанию не задан явно.
    pub fn cell_style_id(&self, coord: &str) -> Result<Option<u32>> {
        let (c, r) = crate::coord::split_coord(coord)?;
        Ok(self.sheet.cell(c, r).and_then(|cell| cell.style))
    }

    /// Жирный ли шрифт у ячейки (через её xf).
    pub fn is_bold(&self, coord: &str) -> Result<bool> {
        let sid = self.cell_style_id(coord)?.unwrap_or(0);
        let xf = self.read_xf(sid)?;
        let font_id: u32 = xf.get("fontId").unwrap_or("0").parse()?;
        let font = nth_child(&self.styles_xml, b"fonts", b"font", font_id)?
            .map(|(_, inner)| inner)
            .unwrap_or_default();
        Ok(BOLD_RE
            .find_iter(&font)
            .any(|m| !m.as_str().contains(r#"val="0""#) && !m.as_str().contains(r#"val="false""#)))
    }

    /// Атрибуты `<alignment>` xf ячейки.
    pub fn cell_alignment(&self, coord: &str) -> Result<Vec<(String, String)>> {
        let sid = self.cell_style_id(coord)?.unwrap_or(0);
        Ok(self.read_xf(sid)?.alignment.unwrap_or_default())
    }

    /// Сырые дочерние элементы `<border>` ячейки.
    pub fn cell_border_xml(&self, coord: &str) -> Result<String> {
        let sid = self.cell_style_id(coord)?.unwrap_or(0);
        let xf = self.read_xf(sid)?;
        let border_id: u32 = xf.get("borderId").unwrap_or("0").parse()?;
        Ok(nth_child(&self.styles_xml, b"borders", b"border", border_id)?
            .map(|(_, inner)| inner)
            .unwrap_or_default())
    }

    /// Сырые дочерние элементы `<font>` ячейки.
    pub fn cell_font_xml(&self, coord: &str) -> Result<String> {
        let sid = self.cell_style_id(coord)?.unwrap_or(0);
        let xf = self.read_xf(sid)?;
        let font_id: u32 = xf.get("fontId").unwrap_or("0").parse()?;
        Ok(nth_child(&self.styles_xml, b"fonts", b"font", font_id)?
            .map(|(_, inner)| inner)
            .unwrap_or_default())
    }
}

static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<b(\s[^>]*)?/>").expect("static bold regex"));
static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<color\b[^>]*/>").expect("static color regex"));

/* ========================== CORE PATCH ENGINE ============================= */

impl XlsxEditor {
    fn apply_patch(&mut self, range: &str, patch: &StylePatch) -> Result<()> {
        let rect = CellRange::parse(range)?;
        for r in rect.r0..=rect.r1 {
            for c in rect.c0..=rect.c1 {
                self.patch_one_cell(c, r, patch)?;
            }
        }
        Ok(())
    }

    fn patch_one_cell(&mut self, col: u32, row: u32, patch: &StylePatch) -> Result<()> {
        let old = self.sheet.cell(col, row).and_then(|c| c.style).unwrap_or(0);
        let key = (old, patch.clone());
        let sid = match self.style_cache.xfs.get(&key) {
            Some(&sid) => sid,
            None => {
                let sid = self.derive_xf(old, patch)?;
                self.style_cache.xfs.insert(key, sid);
                sid
            }
        };
        self.sheet.cell_mut(col, row).style = Some(sid);
        Ok(())
    }

    fn derive_xf(&mut self, base: u32, patch: &StylePatch) -> Result<u32> {
        let mut xf = self.read_xf(base)?;

        if let Some(fp) = &patch.font {
            let base_font: u32 = xf.get("fontId").unwrap_or("0").parse()?;
            let fid = self.ensure_font(base_font, fp)?;
            xf.set("fontId", fid);
            xf.set("applyFont", 1);
        }
        if let Some(b) = &patch.border {
            let bid = self.ensure_border(b)?;
            xf.set("borderId", bid);
            xf.set("applyBorder", 1);
        }
        if let Some(al) = &patch.align {
            xf.merge_alignment(al);
            xf.set("applyAlignment", 1);
        }
        self.add_new_xf(&xf)
    }
}

/* ========================== LOW-LEVEL HELPERS ============================= */

impl XlsxEditor {
    fn read_xf(&self, style_id: u32) -> Result<XfRecord> {
        let Some((attrs, inner)) = nth_child(&self.styles_xml, b"cellXfs", b"xf", style_id)? else {
            return Ok(XfRecord {
                attrs: ["numFmtId", "fontId", "fillId", "borderId", "xfId"]
                    .iter()
                    .map(|k| (k.to_string(), "0".to_string()))
                    .collect(),
                ..Default::default()
            });
        };

        static ALIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"<alignment\b[^>]*?(/>|>\s*</alignment>)").expect("static alignment regex")
        });
        let alignment = ALIGN_RE.find(&inner).map(|m| parse_attrs(m.as_str()));
        let rest = ALIGN_RE.replace(&inner, "").into_owned();
        Ok(XfRecord { attrs, alignment, rest })
    }

    fn add_new_xf(&mut self, xf: &XfRecord) -> Result<u32> {
        let new_id = count_children(&self.styles_xml, b"cellXfs", b"xf")?;
        let pos = find_bytes(&self.styles_xml, b"</cellXfs>")
            .context("styles.xml: </cellXfs> not found")?;
        self.styles_xml.splice(pos..pos, xf.to_xml().bytes());
        bump_count(&mut self.styles_xml, b"<cellXfs")?;
        debug!(xf = new_id, "cellXfs: added");
        Ok(new_id)
    }

    fn ensure_font(&mut self, base: u32, patch: &FontPatch) -> Result<u32> {
        let key = (base, patch.clone());
        if let Some(&id) = self.style_cache.fonts.get(&key) {
            return Ok(id);
        }

        let mut inner = nth_child(&self.styles_xml, b"fonts", b"font", base)?
            .map(|(_, inner)| inner)
            .unwrap_or_default();
        if let Some(bold) = patch.bold {
            inner = BOLD_RE.replace_all(&inner, "").into_owned();
            if bold {
                inner.insert_str(0, "<b/>");
            }
        }
        if let Some(rgb) = &patch.color {
            inner = COLOR_RE.replace_all(&inner, "").into_owned();
            inner.push_str(&format!(r#"<color rgb="{rgb}"/>"#));
        }

        let new_id = count_children(&self.styles_xml, b"fonts", b"font")?;
        let insert = find_bytes(&self.styles_xml, b"</fonts>")
            .context("<fonts> block not found in styles.xml")?;
        let xml = format!("<font>{inner}</font>");
        self.styles_xml.splice(insert..insert, xml.bytes());
        bump_count(&mut self.styles_xml, b"<fonts")?;
        debug!(font = new_id, base, "fonts: added");

        self.style_cache.fonts.insert(key, new_id);
        Ok(new_id)
    }

    fn ensure_border(&mut self, spec: &BorderSpec) -> Result<u32> {
        if let Some(&id) = self.style_cache.borders.get(spec) {
            return Ok(id);
        }

        let new_id = count_children(&self.styles_xml, b"borders", b"border")?;
        let end_pos = find_bytes(&self.styles_xml, b"</borders>")
            .context("styles.xml: </borders> not found")?;
        let side = |name: &str| match &spec.color {
            Some(rgb) => format!(r#"<{name} style="{s}"><color rgb="{rgb}"/></{name}>"#, s = spec.style),
            None => format!(r#"<{name} style="{s}"/>"#, s = spec.style),
        };
        let tag = format!(
            "<border>{}{}{}{}<diagonal/></border>",
            side("left"),
            side("right"),
            side("top"),
            side("bottom")
        );
        self.styles_xml.splice(end_pos..end_pos, tag.bytes());
        bump_count(&mut self.styles_xml, b"<borders")?;
        debug!(border = new_id, style = %spec.style, "borders: added");

        self.style_cache.borders.insert(spec.clone(), new_id);
        Ok(new_id)
    }
}

/// Атрибуты и внутренний XML `n`-го (0-based) `child` внутри блока `block`.
fn nth_child(xml: &[u8], block: &[u8], child: &[u8], n: u32) -> Result<Option<(Vec<(String, String)>, String)>> {
    let mut rdr = Reader::from_reader(xml);
    rdr.config_mut().trim_text(true);
    let mut in_block = false;
    let mut idx = 0u32;

    loop {
        let ev = rdr.read_event()?;
        match ev {
            Event::Start(ref e) if e.name().as_ref() == block => in_block = true,
            Event::End(ref e) if e.name().as_ref() == block => break,
            Event::Start(ref e) | Event::Empty(ref e) if in_block && e.name().as_ref() == child => {
                let inner = if matches!(ev, Event::Start(_)) {
                    let span = rdr.read_to_end(e.name())?;
                    String::from_utf8_lossy(&xml[span.start as usize..span.end as usize]).into_owned()
                } else {
                    String::new()
                };
                if idx == n {
                    let attrs = e
                        .attributes()
                        .with_checks(false)
                        .flatten()
                        .map(|a| {
                            (
                                String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                                String::from_utf8_lossy(&a.value).into_owned(),
                            )
                        })
                        .collect();
                    return Ok(Some((attrs, inner)));
                }
                idx += 1;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(None)
}

fn count_children(xml: &[u8], block: &[u8], child: &[u8]) -> Result<u32> {
    let mut rdr = Reader::from_reader(xml);
    rdr.config_mut().trim_text(true);
    let mut in_block = false;
    let mut cnt = 0u32;

    loop {
        let ev = rdr.read_event()?;
        match ev {
            Event::Start(ref e) if e.name().as_ref() == block => in_block = true,
            Event::End(ref e) if e.name().as_ref() == block => break,
            Event::Start(ref e) if in_block && e.name().as_ref() == child => {
                rdr.read_to_end(e.name())?;
                cnt += 1;
            }
            Event::Empty(ref e) if in_block && e.name().as_ref() == child => cnt += 1,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(cnt)
}

/* ========================== НОРМАЛИЗАЦИЯ <cols> =========================== */

#[derive(Clone, Debug, Default, PartialEq)]
struct ColProp {
    width: Option<f64>,
    style: Option<u32>,
    best_fit: bool,
    custom_width: bool,
    hidden: bool,
    /// outlineLevel, collapsed, phonetic – переносим как есть
    extra: BTreeMap<String, String>,
}

impl XlsxEditor {
    pub fn set_column_width(&mut self, col_letter: &str, width: f64) -> Result<&mut Self> {
        let col0 = col_index(col_letter)?;
        self.set_column_properties(col0, Some(width), None)?;
        Ok(self)
    }

    pub fn set_column_hidden(&mut self, col_letter: &str, hidden: bool) -> Result<&mut Self> {
        let col0 = col_index(col_letter)?;
        self.set_column_properties(col0, None, Some(hidden))?;
        Ok(self)
    }

    /// Ширина из <cols>, `None` – столбец не описан или ширина не задана.
    pub fn column_width(&self, col_letter: &str) -> Result<Option<f64>> {
        let idx = col_index(col_letter)? + 1;
        let Some((start, end)) = self.find_cols_block() else {
            return Ok(None);
        };
        Ok(self.read_cols_map(start, end)?.get(&idx).and_then(|p| p.width))
    }

    /// `defaultColWidth` из `<sheetFormatPr>`, если лист его задаёт.
    pub fn default_column_width(&self) -> Result<Option<f64>> {
        let head = &self.sheet.head;
        let Some(start) = find_bytes(head, b"<sheetFormatPr") else {
            return Ok(None);
        };
        let end = find_bytes_from(head, b">", start).context("unterminated <sheetFormatPr>")?;
        let tag = std::str::from_utf8(&head[start..=end])?;
        parse_attrs(tag)
            .into_iter()
            .find(|(k, _)| k == "defaultColWidth")
            .map(|(_, v)| {
                v.parse::<f64>()
                    .with_context(|| format!("bad defaultColWidth {v:?}"))
            })
            .transpose()
    }

    /// Буквы скрытых столбцов по порядку.
    pub fn hidden_columns(&self) -> Result<Vec<String>> {
        let Some((start, end)) = self.find_cols_block() else {
            return Ok(Vec::new());
        };
        Ok(self
            .read_cols_map(start, end)?
            .into_iter()
            .filter(|(_, p)| p.hidden)
            .map(|(i, _)| col_letter(i - 1))
            .collect())
    }

    /// Точечное изменение столбца + нормализация всего блока.
    fn set_column_properties(
        &mut self,
        col0: u32, // 0-based
        width: Option<f64>,
        hidden: Option<bool>,
    ) -> Result<()> {
        let (cols_start, cols_end) = self.ensure_cols_block()?;

        let mut cols_map = self.read_cols_map(cols_start, cols_end)?;
        let idx = col0 + 1; // в map 1-based, как min/max в XML
        let prop = cols_map.entry(idx).or_default();

        if let Some(w) = width {
            prop.width = Some(w);
            prop.custom_width = true;
            prop.best_fit = false;
        }
        if let Some(h) = hidden {
            prop.hidden = h;
        }

        self.write_cols_map(cols_start, cols_end, &cols_map)
    }

    fn find_cols_block(&self) -> Option<(usize, usize)> {
        let head = &self.sheet.head;
        let start = find_bytes(head, b"<cols>")?;
        let end = find_bytes_from(head, b"</cols>", start)?;
        Some((start, end + "</cols>".len()))
    }

    fn ensure_cols_block(&mut self) -> Result<(usize, usize)> {
        if let Some(found) = self.find_cols_block() {
            return Ok(found);
        }
        // <cols> стоит сразу перед <sheetData>, а head как раз там и кончается
        let anchor = self.sheet.head.len();
        let block = b"<cols></cols>";
        self.sheet.head.extend_from_slice(block);
        Ok((anchor, anchor + block.len()))
    }

    fn read_cols_map(&self, cols_start: usize, cols_end: usize) -> Result<BTreeMap<u32, ColProp>> {
        let mut map: BTreeMap<u32, ColProp> = BTreeMap::new();
        let cols_xml = &self.sheet.head[cols_start..cols_end];
        let text = std::str::from_utf8(cols_xml)?;
        let re = Regex::new(r#"<col\b[^>]*/>"#)?;

        for m in re.find_iter(text) {
            let mut attrs: BTreeMap<String, String> = parse_attrs(m.as_str()).into_iter().collect();

            let min: u32 = attrs.remove("min").as_deref().unwrap_or("1").parse()?;
            let max: u32 = match attrs.remove("max") {
                Some(v) => v.parse()?,
                None => min,
            };
            if max < min {
                bail!("<col> with max {max} < min {min}");
            }
            let flag = |v: Option<String>| v.is_some_and(|v| v == "1" || v == "true");

            let prop = ColProp {
                width: attrs.remove("width").and_then(|s| s.parse::<f64>().ok()),
                style: attrs.remove("style").and_then(|s| s.parse::<u32>().ok()),
                best_fit: flag(attrs.remove("bestFit")),
                custom_width: flag(attrs.remove("customWidth")),
                hidden: flag(attrs.remove("hidden")),
                extra: attrs,
            };
            for i in min..=max {
                map.insert(i, prop.clone());
            }
        }
        Ok(map)
    }

    fn write_cols_map(
        &mut self,
        cols_start: usize,
        cols_end: usize,
        map: &BTreeMap<u32, ColProp>,
    ) -> Result<()> {
        // Сжимаем одинаковые проперти в диапазоны
        let mut out = String::with_capacity(256);
        out.push_str("<cols>");

        let mut it = map.iter().peekable();
        while let Some((&i, prop)) = it.next() {
            let mut j = i;
            while let Some(&(&k, prop2)) = it.peek() {
                if k == j + 1 && prop == prop2 {
                    j = k;
                    it.next();
                } else {
                    break;
                }
            }
            out.push_str(&build_one_col_tag(i, j, prop));
        }

        out.push_str("</cols>");

        // подменяем всё содержимое старого блока
        self.sheet.head.splice(cols_start..cols_end, out.bytes());
        Ok(())
    }
}

fn build_one_col_tag(min: u32, max: u32, p: &ColProp) -> String {
    let mut s = format!(r#"<col min="{min}" max="{max}""#);
    if let Some(w) = p.width {
        s.push_str(&format!(r#" width="{w}""#));
        if p.custom_width {
            s.push_str(r#" customWidth="1""#);
        }
    }
    if let Some(st) = p.style {
        s.push_str(&format!(r#" style="{st}""#));
    }
    if p.best_fit {
        s.push_str(r#" bestFit="1""#);
    }
    if p.hidden {
        s.push_str(r#" hidden="1""#);
    }
    for (k, v) in &p.extra {
        s.push_str(&format!(r#" {k}="{v}""#));
    }
    s.push_str("/>");
    s
}

/* ========================== BYTE/STRING HELPERS =========================== */

pub(crate) fn find_bytes(hay: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(hay, needle)
}
pub(crate) fn find_bytes_from(hay: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    memchr::memmem::find(&hay[start..], needle).map(|p| p + start)
}

/// Увеличивает `count="N"` у первого тега `tag`; ищем только внутри самого тега.
pub(crate) fn bump_count(xml: &mut Vec<u8>, tag: &[u8]) -> Result<()> {
    let pos = find_bytes(xml, tag).context("tag for count not found")?;
    let tag_end = find_bytes_from(xml, b">", pos).context("malformed tag")?;
    let Some(a) = find_bytes_from(xml, b"count=\"", pos).filter(|&a| a < tag_end) else {
        // атрибута нет – Excel пересчитает сам
        return Ok(());
    };
    let start = a + "count=\"".len();
    let end = find_bytes_from(xml, b"\"", start).context("closing quote not found")?;
    let num: u32 = std::str::from_utf8(&xml[start..end])?.parse()?;
    xml.splice(start..end, (num + 1).to_string().bytes());
    Ok(())
}
