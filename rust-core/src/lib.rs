pub mod coord;
mod files_part;
mod read_part;
mod sheet_data;
pub mod style;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
#[cfg(test)]
mod test;

use anyhow::{Context, Result};
use quick_xml::{Reader, events::Event};
use std::{
    collections::BTreeSet,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};
use ::zip as zip_crate;

pub use coord::CellRange;
pub use read_part::{CellValue, SharedStrings};
pub use style::{AlignSpec, BorderSpec, FontPatch, HorizAlignment, StylePatch, VertAlignment};

use sheet_data::SheetXml;
use style::StyleCache;

/// `XlsxEditor` открывает книгу, даёт править один лист и сохраняет результат
/// в новый файл. Всё, что не правилось, копируется из исходного архива как есть.
pub struct XlsxEditor {
    src_path: PathBuf,
    sheet_name: String,
    sheet_path: String,
    sheet: SheetXml,
    shared: SharedStrings,
    styles_xml: Vec<u8>,               // содержимое styles.xml
    workbook_xml: Vec<u8>,             // содержимое workbook.xml (может изменяться)
    rels_xml: Vec<u8>,                 // содержимое workbook.xml.rels
    content_types_xml: Vec<u8>,        // [Content_Types].xml
    removed_parts: BTreeSet<String>,   // части архива, которые не попадут в результат
    style_cache: StyleCache,
}

/// Main
impl XlsxEditor {
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn src_path(&self) -> &Path {
        &self.src_path
    }

    /// Номер последней строки с ячейками (1-based, 0 – лист пуст).
    pub fn max_row(&self) -> u32 {
        self.sheet.max_row()
    }

    /// Номер последнего занятого столбца (1-based, 0 – лист пуст).
    pub fn max_column(&self) -> u32 {
        self.sheet.max_column()
    }

    /// Значение ячейки, например `value("C3")`.
    pub fn value(&self, coord: &str) -> Result<CellValue> {
        let (c, r) = coord::split_coord(coord)?;
        self.value_at(c, r)
    }

    /// То же по индексам: столбец 0-based, строка 1-based.
    pub fn value_at(&self, col: u32, row: u32) -> Result<CellValue> {
        self.sheet.value(col, row, &self.shared)
    }

    /// Sets the value of a specific cell in the sheet.
    ///
    /// The cell type is inferred from the text: a leading `=` makes a formula,
    /// anything that parses as `f64` becomes a number, the rest is written as an
    /// inline string. The cell keeps its style.
    pub fn set_cell<S: ToString>(&mut self, coord: &str, value: S) -> Result<()> {
        let (c, r) = coord::split_coord(coord)?;
        let val_str = value.to_string();
        let cell = self.sheet.cell_mut(c, r);

        if let Some(formula) = val_str.strip_prefix('=') {
            cell.set_formula(formula);
        } else if let Ok(n) = val_str.parse::<f64>() {
            cell.set_number(n);
        } else {
            cell.set_text(&val_str);
        }
        Ok(())
    }

    /// Записывает строку без попытки распознать число или формулу.
    pub fn set_text(&mut self, coord: &str, text: &str) -> Result<()> {
        let (c, r) = coord::split_coord(coord)?;
        self.sheet.cell_mut(c, r).set_text(text);
        Ok(())
    }

    /// Стирает значение ячейки, стиль остаётся. Несуществующая ячейка не создаётся.
    pub fn clear_cell(&mut self, coord: &str) -> Result<()> {
        let (c, r) = coord::split_coord(coord)?;
        if let Some(cell) = self.sheet.rows.get_mut(&r).and_then(|row| row.cells.get_mut(&c)) {
            cell.clear();
        }
        Ok(())
    }

    /// Вставляет `count` пустых столбцов перед столбцом `col_letter`.
    ///
    /// Ячейки сдвигаются вправо вместе со стилями; объединения, выделение,
    /// автофильтр, условное форматирование и проверки данных едут вместе с ними.
    /// Ширины столбцов (`<cols>`) остаются привязаны к буквам, текст формул не
    /// переписывается.
    pub fn insert_cols(&mut self, col_letter: &str, count: u32) -> Result<&mut Self> {
        let at = coord::col_index(col_letter)?;
        self.sheet.insert_cols(at, count)?;
        tracing::debug!(at = col_letter, count, "columns inserted");
        Ok(self)
    }

    /// Объединённые диапазоны листа (`<mergeCells>`).
    pub fn merged_ranges(&self) -> Result<Vec<CellRange>> {
        let mut rdr = Reader::from_reader(self.sheet.tail.as_slice());
        rdr.config_mut().trim_text(true);
        // хвост листа начинается посреди <worksheet>, его </worksheet> без пары
        rdr.config_mut().check_end_names = false;
        rdr.config_mut().allow_unmatched_ends = true;

        let mut ranges = Vec::new();
        loop {
            match rdr.read_event()? {
                Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"mergeCell" => {
                    if let Some(r) = e.attributes().with_checks(false).flatten().find_map(|a| {
                        (a.key.as_ref() == b"ref")
                            .then(|| String::from_utf8_lossy(&a.value).into_owned())
                    }) {
                        ranges.push(CellRange::parse(&r)?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(ranges)
    }

    /// Если ячейка входит в объединение – адрес его левой верхней ячейки,
    /// иначе сама ячейка.
    pub fn merge_anchor(&self, coord: &str) -> Result<String> {
        let (c, r) = coord::split_coord(coord)?;
        let anchor = self
            .merged_ranges()?
            .into_iter()
            .find(|m| m.contains(c, r))
            .map_or((c, r), |m| m.anchor());
        Ok(coord::coord(anchor.0, anchor.1))
    }
}

/// Имена листов в порядке вкладок.
pub fn scan<P: AsRef<Path>>(src: P) -> Result<Vec<String>> {
    let mut zip = zip_crate::ZipArchive::new(File::open(src)?)?;
    let mut wb = zip
        .by_name("xl/workbook.xml")
        .context("workbook.xml not found")?;

    let mut wb_xml = Vec::with_capacity(wb.size() as usize);
    wb.read_to_end(&mut wb_xml)?;

    Ok(files_part::sheet_entries(&wb_xml)?
        .into_iter()
        .map(|s| s.name)
        .collect())
}
