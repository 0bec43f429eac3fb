use crate::sheet_data::SheetXml;
use crate::style::StyleCache;
use crate::{SharedStrings, XlsxEditor};
use ::zip as zip_crate;
use anyhow::{Context, Result, bail};
use quick_xml::{Reader, escape::unescape, events::Event};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    io::{Read, Write},
    path::Path,
    sync::LazyLock,
};
use tracing::{debug, info};

const MAIN_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const MAIN_XLSM: &str = "application/vnd.ms-excel.sheet.macroEnabled.main+xml";

static ATTRS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z:]+)\s*=\s*"([^"]*)""#).expect("static attrs regex")
});

/// `<sheet>` из workbook.xml.
#[derive(Debug, Clone)]
pub(crate) struct SheetEntry {
    pub name: String,
    pub rid: String, // "rIdNN"
}

/// `<Relationship>` из *.rels.
#[derive(Debug, Clone)]
pub(crate) struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
}

/// Work with files
impl XlsxEditor {
    /// Открывает книгу и подготавливает лист с именем `sheet_name`.
    ///
    /// Путь к XML листа берётся из связей книги (`r:id` → `Target`), а не
    /// из порядкового номера листа.
    pub fn open<P: AsRef<Path>>(src: P, sheet_name: &str) -> Result<Self> {
        let src_path = src.as_ref().to_path_buf();
        let mut zip = zip_crate::ZipArchive::new(
            File::open(&src_path).with_context(|| format!("cannot open {}", src_path.display()))?,
        )
        .with_context(|| format!("{} is not an xlsx package", src_path.display()))?;

        let workbook_xml = read_part(&mut zip, "xl/workbook.xml")?.context("xl/workbook.xml not found")?;
        let rels_xml = read_part(&mut zip, "xl/_rels/workbook.xml.rels")?
            .context("xl/_rels/workbook.xml.rels not found")?;
        let content_types_xml =
            read_part(&mut zip, "[Content_Types].xml")?.context("[Content_Types].xml not found")?;
        let styles_xml = read_part(&mut zip, "xl/styles.xml")?.context("styles.xml not found")?;

        // ── sharedStrings.xml может отсутствовать ──────────────────────
        let shared = match read_part(&mut zip, "xl/sharedStrings.xml")? {
            Some(xml) => SharedStrings::parse(&xml)?,
            None => SharedStrings::default(),
        };

        // ── путь листа через r:id ──────────────────────────────────────
        let sheet_path = resolve_sheet_path(&workbook_xml, &rels_xml, sheet_name)?;
        let sheet_xml = read_part(&mut zip, &sheet_path)?
            .with_context(|| format!("{sheet_path} not found in zip"))?;
        let sheet = SheetXml::parse(&sheet_xml).with_context(|| format!("parsing {sheet_path}"))?;

        info!(sheet = sheet_name, path = %sheet_path, rows = sheet.max_row(), "sheet opened");

        Ok(Self {
            src_path,
            sheet_name: sheet_name.to_owned(),
            sheet_path,
            sheet,
            shared,
            styles_xml,
            workbook_xml,
            rels_xml,
            content_types_xml,
            removed_parts: BTreeSet::new(),
            style_cache: StyleCache::default(),
        })
    }

    /// Удаляет из книги все листы, кроме открытого: записи в workbook.xml,
    /// связи, overrides в [Content_Types].xml, сами части и их .rels.
    /// calcChain.xml выбрасывается целиком – номера листов в нём больше не верны.
    pub fn retain_only_current_sheet(&mut self) -> Result<&mut Self> {
        let sheets = sheet_entries(&self.workbook_xml)?;
        let kept_idx = sheets
            .iter()
            .position(|s| s.name == self.sheet_name)
            .with_context(|| format!("Sheet `{}` not found in workbook.xml", self.sheet_name))?;
        let kept_rid = sheets[kept_idx].rid.clone();
        let rels = relationships(&self.rels_xml)?;

        let mut dropped_rids: BTreeSet<String> = BTreeSet::new();
        for s in sheets.iter().filter(|s| s.rid != kept_rid) {
            dropped_rids.insert(s.rid.clone());
            if let Some(rel) = rels.iter().find(|r| r.id == s.rid) {
                let path = part_path(&rel.target);
                debug!(sheet = %s.name, path = %path, "sheet removed");
                self.removed_parts.insert(part_rels_path(&path));
                self.removed_parts.insert(path);
            }
        }
        for rel in rels.iter().filter(|r| r.rel_type.ends_with("/calcChain")) {
            dropped_rids.insert(rel.id.clone());
            self.removed_parts.insert(part_path(&rel.target));
        }

        // workbook.xml
        let wb = retain_empty_elements(&self.workbook_xml, "sheet", |a| {
            a.get("r:id").is_none_or(|rid| !dropped_rids.contains(rid))
        })?;
        let wb = retain_local_defined_names(&wb, kept_idx)?;
        static VIEW_ATTRS: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"\s(activeTab|firstSheet)="[^"]*""#).expect("static view regex")
        });
        static SHEET_STATE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"(<sheet\b[^>]*?)\sstate="[^"]*""#).expect("static state regex")
        });
        let text = String::from_utf8(wb).context("workbook.xml is not UTF-8")?;
        let text = VIEW_ATTRS.replace_all(&text, "");
        let text = SHEET_STATE.replace_all(&text, "$1");
        self.workbook_xml = text.into_owned().into_bytes();

        // workbook.xml.rels
        self.rels_xml = retain_empty_elements(&self.rels_xml, "Relationship", |a| {
            a.get("Id").is_none_or(|id| !dropped_rids.contains(id))
        })?;

        // [Content_Types].xml
        let removed = &self.removed_parts;
        self.content_types_xml = retain_empty_elements(&self.content_types_xml, "Override", |a| {
            a.get("PartName")
                .is_none_or(|p| !removed.contains(p.trim_start_matches('/')))
        })?;

        info!(kept = %self.sheet_name, removed = sheets.len() - 1, "other sheets removed");
        Ok(self)
    }

    /// Saves the workbook to `dst`.
    ///
    /// The package is written to a temporary file next to `dst` and then moved
    /// over it, so `dst` may be the source file itself. Parts edited in memory
    /// replace their originals, removed parts are skipped, everything else is
    /// copied raw. Saving a macro-enabled book under `.xlsx` drops the VBA project.
    pub fn save<P: AsRef<Path>>(&self, dst: P) -> Result<()> {
        let dst = dst.as_ref();
        let dir = match dst.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut content_types = self.content_types_xml.clone();
        let mut rels = self.rels_xml.clone();
        let mut skipped = self.removed_parts.clone();

        let to_xlsx = dst
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
        if to_xlsx && memchr::memmem::find(&content_types, MAIN_XLSM.as_bytes()).is_some() {
            strip_vba(&mut content_types, &mut rels, &mut skipped)?;
        }

        let mut zin = zip_crate::ZipArchive::new(File::open(&self.src_path)?)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("cannot create a temporary file in {}", dir.display()))?;
        {
            let mut zout = zip_crate::ZipWriter::new(&mut tmp);
            let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
                .compression_method(zip_crate::CompressionMethod::Deflated)
                .compression_level(Some(1));

            let sheet_xml = self.sheet.to_xml();
            for i in 0..zin.len() {
                let file = zin.by_index_raw(i)?;
                let name = file.name().to_owned();
                if skipped.contains(&name) {
                    continue;
                }

                let replaced: Option<&[u8]> = match name.as_str() {
                    "[Content_Types].xml" => Some(&content_types),
                    "xl/workbook.xml" => Some(&self.workbook_xml),
                    "xl/_rels/workbook.xml.rels" => Some(&rels),
                    "xl/styles.xml" => Some(&self.styles_xml),
                    _ if name == self.sheet_path => Some(&sheet_xml),
                    _ => None,
                };
                match replaced {
                    Some(content) => {
                        drop(file);
                        zout.start_file(name.as_str(), opt)?;
                        zout.write_all(content)?;
                    }
                    None => zout.raw_copy_file(file)?,
                }
            }
            zout.finish()?;
        }

        // права как у исходника, а не 0600 временного файла
        if let Ok(meta) = fs::metadata(&self.src_path) {
            fs::set_permissions(tmp.path(), meta.permissions())?;
        }
        // PersistError держит временный файл, отпускаем его сразу
        tmp.persist(dst)
            .map_err(|e| e.error)
            .with_context(|| format!("cannot write {}", dst.display()))?;
        info!(path = %dst.display(), "workbook saved");
        Ok(())
    }
}

/// Содержимое части архива или `None`, если её нет.
fn read_part<R: Read + std::io::Seek>(zip: &mut zip_crate::ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut f = match zip.by_name(name) {
        Ok(f) => f,
        Err(zip_crate::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {name}")),
    };
    let mut buf = Vec::with_capacity(f.size() as usize);
    f.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn attr_string(raw: &[u8]) -> Result<String> {
    let raw = String::from_utf8_lossy(raw);
    Ok(unescape(&raw)?.into_owned())
}

/// Все `<sheet>` книги по порядку вкладок.
pub(crate) fn sheet_entries(workbook_xml: &[u8]) -> Result<Vec<SheetEntry>> {
    let mut rdr = Reader::from_reader(workbook_xml);
    rdr.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    loop {
        match rdr.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rid = None;
                for a in e.attributes().with_checks(false).flatten() {
                    match a.key.as_ref() {
                        b"name" => name = Some(attr_string(&a.value)?),
                        b"r:id" => rid = Some(attr_string(&a.value)?),
                        _ => {}
                    }
                }
                sheets.push(SheetEntry {
                    name: name.unwrap_or_default(),
                    rid: rid.unwrap_or_default(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

pub(crate) fn relationships(rels_xml: &[u8]) -> Result<Vec<Relationship>> {
    let mut rdr = Reader::from_reader(rels_xml);
    rdr.config_mut().trim_text(true);

    let mut rels = Vec::new();
    loop {
        match rdr.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"Relationship" => {
                let mut rel = Relationship {
                    id: String::new(),
                    rel_type: String::new(),
                    target: String::new(),
                };
                for a in e.attributes().with_checks(false).flatten() {
                    match a.key.as_ref() {
                        b"Id" => rel.id = attr_string(&a.value)?,
                        b"Type" => rel.rel_type = attr_string(&a.value)?,
                        b"Target" => rel.target = attr_string(&a.value)?,
                        _ => {}
                    }
                }
                rels.push(rel);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// Лист → r:id → Target → путь внутри архива.
fn resolve_sheet_path(workbook_xml: &[u8], rels_xml: &[u8], sheet_name: &str) -> Result<String> {
    let target_rid = sheet_entries(workbook_xml)?
        .into_iter()
        .find(|s| s.name == sheet_name)
        .map(|s| s.rid)
        .with_context(|| format!("Sheet `{sheet_name}` not found in workbook.xml"))?;

    let target = relationships(rels_xml)?
        .into_iter()
        .find(|r| r.id == target_rid)
        .map(|r| r.target)
        .with_context(|| format!("Relationship for `{sheet_name}` not found in workbook.xml.rels"))?;

    Ok(part_path(&target))
}

/// Target из xl/_rels/workbook.xml.rels → абсолютный путь в архиве.
fn part_path(target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        abs.to_string()
    } else if target.starts_with("xl/") {
        target.to_string()
    } else {
        format!("xl/{target}")
    }
}

/// xl/worksheets/sheet2.xml → xl/worksheets/_rels/sheet2.xml.rels
fn part_rels_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{path}.rels"),
    }
}

/// Оставляет только те пустые элементы `<tag …/>`, для атрибутов которых `keep` вернул true.
fn retain_empty_elements(
    xml: &[u8],
    tag: &str,
    keep: impl Fn(&BTreeMap<String, String>) -> bool,
) -> Result<Vec<u8>> {
    let re = Regex::new(&format!(r"<{}\b[^>]*/>", regex::escape(tag)))?;
    let text = std::str::from_utf8(xml).with_context(|| format!("<{tag}> container is not UTF-8"))?;
    let out = re.replace_all(text, |caps: &regex::Captures| {
        let attrs: BTreeMap<String, String> = ATTRS_RE
            .captures_iter(&caps[0])
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        if keep(&attrs) { caps[0].to_string() } else { String::new() }
    });
    Ok(out.into_owned().into_bytes())
}

/// Локальные имена (`localSheetId`) удалённых листов выбрасываются,
/// у оставшегося листа индекс становится 0.
fn retain_local_defined_names(workbook_xml: &[u8], kept_idx: usize) -> Result<Vec<u8>> {
    static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)<definedName\b([^>]*)>.*?</definedName>").expect("static definedName regex")
    });
    static LOCAL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"localSheetId="(\d+)""#).expect("static localSheetId regex"));
    static EMPTY_NAMES_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<definedNames>\s*</definedNames>|<definedNames/>").expect("static definedNames regex")
    });

    let text = std::str::from_utf8(workbook_xml).context("workbook.xml is not UTF-8")?;
    let out = NAME_RE.replace_all(text, |caps: &regex::Captures| {
        let Some(local) = LOCAL_RE.captures(&caps[1]) else {
            return caps[0].to_string();
        };
        if local[1].parse::<usize>().ok() == Some(kept_idx) {
            caps[0].replacen(&local[0], r#"localSheetId="0""#, 1)
        } else {
            String::new()
        }
    });
    let out = EMPTY_NAMES_RE.replace_all(&out, "");
    Ok(out.into_owned().into_bytes())
}

/// xlsm → xlsx: тип главной части, связь и часть vbaProject.
fn strip_vba(content_types: &mut Vec<u8>, rels: &mut Vec<u8>, skipped: &mut BTreeSet<String>) -> Result<()> {
    let vba: Vec<Relationship> = relationships(rels)?
        .into_iter()
        .filter(|r| r.rel_type.ends_with("/vbaProject"))
        .collect();
    if vba.is_empty() && memchr::memmem::find(content_types, MAIN_XLSM.as_bytes()).is_none() {
        bail!("workbook is not macro-enabled");
    }
    for rel in &vba {
        let path = part_path(&rel.target);
        skipped.insert(part_rels_path(&path));
        skipped.insert(path);
    }

    *rels = retain_empty_elements(rels, "Relationship", |a| {
        a.get("Type").is_none_or(|t| !t.ends_with("/vbaProject"))
    })?;
    let text = String::from_utf8(std::mem::take(content_types)).context("[Content_Types].xml is not UTF-8")?;
    *content_types = text.replace(MAIN_XLSM, MAIN_XLSX).into_bytes();
    *content_types = retain_empty_elements(content_types, "Override", |a| {
        a.get("PartName")
            .is_none_or(|p| !skipped.contains(p.trim_start_matches('/')))
    })?;
    info!("macro-enabled workbook converted to xlsx");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_resolve_relative_and_absolute() {
        assert_eq!(part_path("worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(part_path("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(part_path("xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(
            part_rels_path("xl/worksheets/sheet2.xml"),
            "xl/worksheets/_rels/sheet2.xml.rels"
        );
    }

    #[test]
    fn sheet_names_are_unescaped() -> Result<()> {
        let wb = r#"<workbook><sheets><sheet name="A &amp; B" sheetId="1" r:id="rId3"/><sheet name="Итог" sheetId="2" r:id="rId1"/></sheets></workbook>"#;
        let sheets = sheet_entries(wb.as_bytes())?;
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].name, "A & B");
        assert_eq!(sheets[0].rid, "rId3");
        assert_eq!(sheets[1].name, "Итог");
        Ok(())
    }

    #[test]
    fn local_defined_names_follow_the_kept_sheet() -> Result<()> {
        let wb = br#"<workbook><definedNames><definedName name="_xlnm.Print_Titles" localSheetId="0">'One'!$7:$7</definedName><definedName name="_xlnm.Print_Area" localSheetId="1">'Two'!$A$1:$K$40</definedName><definedName name="Global">1</definedName></definedNames></workbook>"#;
        let out = String::from_utf8(retain_local_defined_names(wb, 1)?)?;
        assert!(!out.contains("Print_Titles"));
        assert!(out.contains(r#"<definedName name="_xlnm.Print_Area" localSheetId="0">"#));
        assert!(out.contains(r#"name="Global""#));

        let only_local = br#"<workbook><definedNames><definedName name="x" localSheetId="2">1</definedName></definedNames><calcPr/></workbook>"#;
        let out = String::from_utf8(retain_local_defined_names(only_local, 0)?)?;
        assert_eq!(out, "<workbook><calcPr/></workbook>");
        Ok(())
    }

    #[test]
    fn retain_empty_elements_filters_by_attribute() -> Result<()> {
        let rels = br#"<Relationships><Relationship Id="rId1" Type="t/worksheet" Target="worksheets/sheet1.xml"/><Relationship Target="worksheets/sheet2.xml" Id="rId2" Type="t/worksheet"/></Relationships>"#;
        let out = retain_empty_elements(rels, "Relationship", |a| a.get("Id").map(String::as_str) != Some("rId2"))?;
        let out = String::from_utf8(out)?;
        assert!(out.contains("sheet1.xml"));
        assert!(!out.contains("sheet2.xml"));
        Ok(())
    }
}
