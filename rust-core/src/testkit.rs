//! testkit.rs – сборка маленьких xlsx-книг для тестов.
//!
//! Книга собирается так, как её пишет Excel: тексты уходят в sharedStrings,
//! числа – в `<v>`, листы связаны через `r:id`. Файлы листов пронумерованы в
//! обратном порядке, чтобы поиск листа по позиции не проходил случайно.

use ::zip as zip_crate;
use anyhow::Result;
use quick_xml::escape::{escape, partial_escape};
use std::{collections::BTreeMap, fs::File, io::Write, path::Path};

use crate::coord::{coord, col_index};

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Лист тестовой книги.
#[derive(Debug, Clone, Default)]
pub struct SheetBuilder {
    /// (строка, столбец 0-based) → значение
    cells: BTreeMap<(u32, u32), String>,
    styles: BTreeMap<(u32, u32), u32>,
    widths: BTreeMap<u32, f64>,
    merges: Vec<String>,
    default_width: Option<f64>,
    state: Option<String>,
}

impl SheetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Строка `row` (1-based) начиная со столбца A; пустые строки пропускаются.
    /// Значение с `=` в начале пишется формулой без кэша `<v>`.
    pub fn row<I, S>(mut self, row: u32, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (c, v) in values.into_iter().enumerate() {
            if !v.as_ref().is_empty() {
                self.cells.insert((row, c as u32), v.as_ref().to_owned());
            }
        }
        self
    }

    pub fn cell(mut self, at: &str, value: &str) -> Self {
        let (c, r) = crate::coord::split_coord(at).unwrap_or((0, 1));
        self.cells.insert((r, c), value.to_owned());
        self
    }

    /// Индекс xf для ячейки (см. [`STYLES_XML`]).
    pub fn style(mut self, at: &str, xf: u32) -> Self {
        let (c, r) = crate::coord::split_coord(at).unwrap_or((0, 1));
        self.styles.insert((r, c), xf);
        self
    }

    pub fn width(mut self, col_letter: &str, width: f64) -> Self {
        if let Ok(c) = col_index(col_letter) {
            self.widths.insert(c, width);
        }
        self
    }

    /// `defaultColWidth` в `<sheetFormatPr>`.
    pub fn default_width(mut self, width: f64) -> Self {
        self.default_width = Some(width);
        self
    }

    pub fn merge(mut self, range: &str) -> Self {
        self.merges.push(range.to_owned());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.state = Some("hidden".into());
        self
    }

    fn to_xml(&self, sst: &mut SharedTable) -> String {
        let mut keys: Vec<(u32, u32)> = self.cells.keys().chain(self.styles.keys()).copied().collect();
        keys.sort_unstable();
        keys.dedup();

        let last = keys
            .iter()
            .fold((0, 1), |(mc, mr), &(r, c)| (mc.max(c), mr.max(r)));
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><dimension ref="A1:{}"/><sheetViews><sheetView workbookViewId="0"><selection activeCell="B2" sqref="B2"/></sheetView></sheetViews><sheetFormatPr{} defaultRowHeight="15"/>"#,
            coord(last.0, last.1),
            self.default_width
                .map(|w| format!(r#" defaultColWidth="{w}""#))
                .unwrap_or_default()
        );

        if !self.widths.is_empty() {
            xml.push_str("<cols>");
            for (c, w) in &self.widths {
                xml.push_str(&format!(
                    r#"<col min="{0}" max="{0}" width="{w}" customWidth="1"/>"#,
                    c + 1
                ));
            }
            xml.push_str("</cols>");
        }

        xml.push_str("<sheetData>");
        let mut current_row = None;
        for &(r, c) in &keys {
            if current_row != Some(r) {
                if current_row.is_some() {
                    xml.push_str("</row>");
                }
                xml.push_str(&format!(r#"<row r="{r}">"#));
                current_row = Some(r);
            }
            let at = coord(c, r);
            let s = self
                .styles
                .get(&(r, c))
                .map(|s| format!(r#" s="{s}""#))
                .unwrap_or_default();
            match self.cells.get(&(r, c)) {
                None => xml.push_str(&format!(r#"<c r="{at}"{s}/>"#)),
                Some(v) if v.starts_with('=') => xml.push_str(&format!(
                    r#"<c r="{at}"{s}><f>{}</f></c>"#,
                    partial_escape(&v[1..])
                )),
                Some(v) if v.parse::<f64>().is_ok() => {
                    xml.push_str(&format!(r#"<c r="{at}"{s}><v>{v}</v></c>"#))
                }
                Some(v) => xml.push_str(&format!(r#"<c r="{at}"{s} t="s"><v>{}</v></c>"#, sst.index(v))),
            }
        }
        if current_row.is_some() {
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData>");

        if !self.merges.is_empty() {
            xml.push_str(&format!(r#"<mergeCells count="{}">"#, self.merges.len()));
            for m in &self.merges {
                xml.push_str(&format!(r#"<mergeCell ref="{m}"/>"#));
            }
            xml.push_str("</mergeCells>");
        }
        xml.push_str(r#"<pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#);
        xml
    }
}

#[derive(Default)]
struct SharedTable {
    items: Vec<String>,
    refs: usize,
}

impl SharedTable {
    fn index(&mut self, text: &str) -> usize {
        self.refs += 1;
        match self.items.iter().position(|s| s == text) {
            Some(i) => i,
            None => {
                self.items.push(text.to_owned());
                self.items.len() - 1
            }
        }
    }

    fn to_xml(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="{MAIN_NS}" count="{}" uniqueCount="{}">"#,
            self.refs,
            self.items.len()
        );
        for s in &self.items {
            xml.push_str(&format!("<si><t>{}</t></si>", partial_escape(s.as_str())));
        }
        xml.push_str("</sst>");
        xml
    }
}

/// Стили тестовых книг.
///
/// xf 0 – обычный, xf 1 – курсив Arial 9 с заливкой и форматом `0.00`,
/// xf 2 – с переносом текста.
pub const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="1"><numFmt numFmtId="164" formatCode="0.00"/></numFmts><fonts count="2"><font><sz val="11"/><color theme="1"/><name val="Calibri"/><family val="2"/></font><font><i/><sz val="9"/><color rgb="FF1F4E79"/><name val="Arial"/></font></fonts><fills count="3"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill><fill><patternFill patternType="solid"><fgColor rgb="FFFFFF00"/><bgColor indexed="64"/></patternFill></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="164" fontId="1" fillId="2" borderId="0" xfId="0" applyNumberFormat="1" applyFont="1" applyFill="1"/><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment wrapText="1"/></xf></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles><dxfs count="0"/><tableStyles count="0" defaultTableStyle="TableStyleMedium2" defaultPivotStyle="PivotStyleLight16"/></styleSheet>"#;

/// Книга из нескольких листов.
#[derive(Debug, Clone, Default)]
pub struct WorkbookBuilder {
    sheets: Vec<(String, SheetBuilder)>,
    /// (имя, localSheetId, формула)
    defined_names: Vec<(String, Option<usize>, String)>,
    calc_chain: bool,
    macros: bool,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, name: &str, sheet: SheetBuilder) -> Self {
        self.sheets.push((name.to_owned(), sheet));
        self
    }

    pub fn defined_name(mut self, name: &str, local_sheet: Option<usize>, formula: &str) -> Self {
        self.defined_names
            .push((name.to_owned(), local_sheet, formula.to_owned()));
        self
    }

    pub fn with_calc_chain(mut self) -> Self {
        self.calc_chain = true;
        self
    }

    /// xlsm: главная часть с макросами и `xl/vbaProject.bin`.
    pub fn macro_enabled(mut self) -> Self {
        self.macros = true;
        self
    }

    /// Путь части листа в архиве, как его запишет [`write`](Self::write).
    pub fn sheet_part(&self, idx: usize) -> String {
        format!("xl/worksheets/sheet{}.xml", self.sheets.len() - idx)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut sst = SharedTable::default();
        let n = self.sheets.len();

        let mut parts: Vec<(String, Vec<u8>)> = Vec::new();
        let mut overrides = String::new();
        let mut rels = String::new();
        let mut sheets = String::new();

        rels.push_str(r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#);
        rels.push_str(r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#);

        for (i, (name, sheet)) in self.sheets.iter().enumerate() {
            let part = self.sheet_part(i);
            let file = part.trim_start_matches("xl/");
            let rid = format!("rId{}", i + 3);
            let state = sheet
                .state
                .as_ref()
                .map(|s| format!(r#" state="{s}""#))
                .unwrap_or_default();
            sheets.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}"{state} r:id="{rid}"/>"#,
                escape(name.as_str()),
                i + 1
            ));
            rels.push_str(&format!(
                r#"<Relationship Id="{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="{file}"/>"#
            ));
            overrides.push_str(&format!(
                r#"<Override PartName="/{part}" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
            ));
            parts.push((part, sheet.to_xml(&mut sst).into_bytes()));
        }

        if self.calc_chain {
            let rid = format!("rId{}", n + 3);
            rels.push_str(&format!(
                r#"<Relationship Id="{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#
            ));
            overrides.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
            let mut chain = format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><calcChain xmlns="{MAIN_NS}">"#);
            for i in 1..=n {
                chain.push_str(&format!(r#"<c r="A1" i="{i}"/>"#));
            }
            chain.push_str("</calcChain>");
            parts.push(("xl/calcChain.xml".into(), chain.into_bytes()));
        }

        let main_type = if self.macros {
            let rid = format!("rId{}", n + 4);
            rels.push_str(&format!(
                r#"<Relationship Id="{rid}" Type="http://schemas.microsoft.com/office/2006/relationships/vbaProject" Target="vbaProject.bin"/>"#
            ));
            overrides.push_str(r#"<Override PartName="/xl/vbaProject.bin" ContentType="application/vnd.ms-office.vbaProject"/>"#);
            parts.push(("xl/vbaProject.bin".into(), b"\xd0\xcf\x11\xe0 not a real vba project".to_vec()));
            "application/vnd.ms-excel.sheet.macroEnabled.main+xml"
        } else {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"
        };

        let mut names = String::new();
        if !self.defined_names.is_empty() {
            names.push_str("<definedNames>");
            for (name, local, formula) in &self.defined_names {
                let local = local
                    .map(|l| format!(r#" localSheetId="{l}""#))
                    .unwrap_or_default();
                names.push_str(&format!(
                    r#"<definedName name="{name}"{local}>{}</definedName>"#,
                    partial_escape(formula.as_str())
                ));
            }
            names.push_str("</definedNames>");
        }

        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><bookViews><workbookView xWindow="0" yWindow="0" windowWidth="28800" windowHeight="12300" firstSheet="{first}" activeTab="{active}"/></bookViews><sheets>{sheets}</sheets>{names}<calcPr calcId="191029"/></workbook>"#,
            first = 0,
            active = n.saturating_sub(1),
        );

        let content_types = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="{main_type}"/>{overrides}<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#
        );
        let root_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{PKG_REL_NS}"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
        );
        let wb_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{PKG_REL_NS}">{rels}</Relationships>"#
        );

        let mut zout = zip_crate::ZipWriter::new(File::create(path)?);
        let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
            .compression_method(zip_crate::CompressionMethod::Deflated);

        let fixed = [
            ("[Content_Types].xml".to_owned(), content_types.into_bytes()),
            ("_rels/.rels".to_owned(), root_rels.into_bytes()),
            ("xl/workbook.xml".to_owned(), workbook.into_bytes()),
            ("xl/_rels/workbook.xml.rels".to_owned(), wb_rels.into_bytes()),
            ("xl/styles.xml".to_owned(), STYLES_XML.as_bytes().to_vec()),
            ("xl/sharedStrings.xml".to_owned(), sst.to_xml().into_bytes()),
        ];
        for (name, data) in fixed.iter().chain(parts.iter()) {
            zout.start_file(name.as_str(), opt)?;
            zout.write_all(data)?;
        }
        zout.finish()?;
        Ok(())
    }
}

/// Содержимое части сохранённого архива (`None`, если части нет).
pub fn read_part_text<P: AsRef<Path>>(path: P, name: &str) -> Result<Option<String>> {
    use std::io::Read;
    let mut zip = zip_crate::ZipArchive::new(File::open(path)?)?;
    let mut f = match zip.by_name(name) {
        Ok(f) => f,
        Err(zip_crate::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut text = String::new();
    f.read_to_string(&mut text)?;
    Ok(Some(text))
}

/// Имена всех частей архива.
pub fn part_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let zip = zip_crate::ZipArchive::new(File::open(path)?)?;
    Ok(zip.file_names().map(str::to_owned).collect())
}
