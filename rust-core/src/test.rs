use crate::testkit::{SheetBuilder, WorkbookBuilder, part_names, read_part_text};
use crate::{BorderSpec, CellValue, FontPatch, AlignSpec, XlsxEditor, scan};
use anyhow::Result;
use tempfile::TempDir;

fn two_sheet_book(dir: &TempDir) -> Result<std::path::PathBuf> {
    let path = dir.path().join("book.xlsx");
    WorkbookBuilder::new()
        .sheet("Сводка", SheetBuilder::new().row(1, ["summary"]))
        .sheet(
            "Конфликты",
            SheetBuilder::new()
                .row(1, ["title", "", "x"])
                .row(3, ["", "", "Отчёт 42"])
                .row(7, ["ID 1го", "ID 2го", "Комментарий"])
                .row(8, ["101", "202", "12"])
                .width("C", 12.0)
                .width("D", 30.0)
                .merge("A1:B2"),
        )
        .defined_name("_xlnm.Print_Area", Some(0), "'Сводка'!$A$1:$B$2")
        .defined_name("_xlnm.Print_Titles", Some(1), "'Конфликты'!$7:$7")
        .with_calc_chain()
        .write(&path)?;
    Ok(path)
}

#[test]
fn scan_lists_sheets_in_tab_order() -> Result<()> {
    let dir = TempDir::new()?;
    let path = two_sheet_book(&dir)?;
    assert_eq!(scan(&path)?, vec!["Сводка".to_owned(), "Конфликты".to_owned()]);
    Ok(())
}

#[test]
fn open_resolves_sheet_through_relationships() -> Result<()> {
    let dir = TempDir::new()?;
    let path = two_sheet_book(&dir)?;

    let app = XlsxEditor::open(&path, "Конфликты")?;
    assert_eq!(app.value("A1")?, CellValue::Text("title".into()));
    assert_eq!(app.value("C3")?.to_string(), "Отчёт 42");
    assert_eq!(app.value("A8")?, CellValue::Number(101.0));
    assert_eq!(app.value("Z99")?, CellValue::Empty);
    assert_eq!(app.max_row(), 8);
    assert_eq!(app.max_column(), 3);

    let first = XlsxEditor::open(&path, "Сводка")?;
    assert_eq!(first.value("A1")?.to_string(), "summary");

    assert!(XlsxEditor::open(&path, "Нет такого").is_err());
    Ok(())
}

#[test]
fn set_cell_infers_type_and_clear_keeps_style() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("cells.xlsx");
    WorkbookBuilder::new()
        .sheet("S", SheetBuilder::new().cell("B2", "old").style("B2", 1))
        .write(&path)?;

    let mut app = XlsxEditor::open(&path, "S")?;
    app.set_cell("A1", 12)?;
    app.set_cell("A2", "=SUM(A1:A1)")?;
    app.set_cell("A3", "a < b & c")?;
    app.set_text("A4", "12")?;
    app.clear_cell("B2")?;
    app.clear_cell("H40")?;

    assert_eq!(app.value("A1")?, CellValue::Number(12.0));
    assert_eq!(app.value("A2")?, CellValue::Formula("SUM(A1:A1)".into()));
    assert_eq!(app.value("A3")?, CellValue::Text("a < b & c".into()));
    assert_eq!(app.value("A4")?, CellValue::Text("12".into()));
    assert_eq!(app.value("B2")?, CellValue::Empty);
    assert_eq!(app.cell_style_id("B2")?, Some(1));
    assert_eq!(app.cell_style_id("H40")?, None);

    let out = dir.path().join("cells_out.xlsx");
    app.save(&out)?;
    let sheet = read_part_text(&out, "xl/worksheets/sheet1.xml")?.unwrap_or_default();
    assert!(sheet.contains("<f>SUM(A1:A1)</f>"));
    assert!(sheet.contains("a &lt; b &amp; c"));

    let again = XlsxEditor::open(&out, "S")?;
    assert_eq!(again.value("A3")?.to_string(), "a < b & c");
    Ok(())
}

#[test]
fn insert_cols_moves_cells_and_merges_but_not_widths() -> Result<()> {
    let dir = TempDir::new()?;
    let path = two_sheet_book(&dir)?;

    let mut app = XlsxEditor::open(&path, "Конфликты")?;
    app.insert_cols("A", 1)?;

    assert_eq!(app.value("A1")?, CellValue::Empty);
    assert_eq!(app.value("B1")?.to_string(), "title");
    assert_eq!(app.value("D3")?.to_string(), "Отчёт 42");
    assert_eq!(app.value("B7")?.to_string(), "ID 1го");
    assert_eq!(app.max_column(), 4);
    assert_eq!(app.merged_ranges()?[0].to_string(), "B1:C2");
    assert_eq!(app.merge_anchor("C2")?, "B1");
    assert_eq!(app.merge_anchor("A1")?, "A1");

    assert_eq!(app.column_width("C")?, Some(12.0));
    assert_eq!(app.column_width("D")?, Some(30.0));
    assert_eq!(app.column_width("E")?, None);
    Ok(())
}

#[test]
fn merged_ranges_are_read_from_the_sheet_tail() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("merged.xlsx");
    WorkbookBuilder::new()
        .sheet(
            "S",
            SheetBuilder::new()
                .row(1, ["a", "", "", "", "", "", "", "", "", "", "k"])
                .row(5, ["", "b"])
                .merge("K1:M2")
                .merge("B5:C6"),
        )
        .write(&path)?;

    let app = XlsxEditor::open(&path, "S")?;
    let ranges: Vec<String> = app.merged_ranges()?.iter().map(ToString::to_string).collect();
    assert_eq!(ranges, vec!["K1:M2", "B5:C6"]);
    assert_eq!(app.merge_anchor("L1")?, "K1");
    assert_eq!(app.merge_anchor("M2")?, "K1");
    assert_eq!(app.merge_anchor("K1")?, "K1");
    assert_eq!(app.merge_anchor("C6")?, "B5");
    assert_eq!(app.merge_anchor("L3")?, "L3");
    assert_eq!(app.merge_anchor("N1")?, "N1");

    let plain = XlsxEditor::open(&two_sheet_book(&dir)?, "Сводка")?;
    assert!(plain.merged_ranges()?.is_empty());
    assert_eq!(plain.merge_anchor("L1")?, "L1");
    Ok(())
}

#[test]
fn retain_only_current_sheet_drops_everything_else() -> Result<()> {
    let dir = TempDir::new()?;
    let path = two_sheet_book(&dir)?;
    let out = dir.path().join("single.xlsx");

    let mut app = XlsxEditor::open(&path, "Конфликты")?;
    app.retain_only_current_sheet()?;
    app.save(&out)?;

    assert_eq!(scan(&out)?, vec!["Конфликты".to_owned()]);

    let parts = part_names(&out)?;
    // "Сводка" лежит в sheet2.xml, "Конфликты" – в sheet1.xml
    assert!(!parts.iter().any(|p| p == "xl/worksheets/sheet2.xml"));
    assert!(parts.iter().any(|p| p == "xl/worksheets/sheet1.xml"));
    assert!(!parts.iter().any(|p| p == "xl/calcChain.xml"));

    let wb = read_part_text(&out, "xl/workbook.xml")?.unwrap_or_default();
    assert!(!wb.contains("activeTab"));
    assert!(!wb.contains("Print_Area"));
    assert!(wb.contains(r#"localSheetId="0">'Конфликты'!$7:$7"#));

    let rels = read_part_text(&out, "xl/_rels/workbook.xml.rels")?.unwrap_or_default();
    assert!(!rels.contains("sheet2.xml"));
    assert!(!rels.contains("calcChain"));
    let types = read_part_text(&out, "[Content_Types].xml")?.unwrap_or_default();
    assert!(!types.contains("/xl/worksheets/sheet2.xml"));
    assert!(!types.contains("calcChain"));

    let again = XlsxEditor::open(&out, "Конфликты")?;
    assert_eq!(again.value("C3")?.to_string(), "Отчёт 42");
    Ok(())
}

#[test]
fn hidden_sheet_becomes_visible_when_kept() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("hidden.xlsx");
    WorkbookBuilder::new()
        .sheet("Visible", SheetBuilder::new().row(1, ["a"]))
        .sheet("Secret", SheetBuilder::new().row(1, ["b"]).hidden())
        .write(&path)?;

    let out = dir.path().join("hidden_out.xlsx");
    let mut app = XlsxEditor::open(&path, "Secret")?;
    app.retain_only_current_sheet()?.save(&out)?;

    let wb = read_part_text(&out, "xl/workbook.xml")?.unwrap_or_default();
    assert!(!wb.contains("state="));
    assert!(!wb.contains("Visible"));
    Ok(())
}

#[test]
fn style_patches_keep_the_rest_of_the_cell_style() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("styles.xlsx");
    WorkbookBuilder::new()
        .sheet(
            "S",
            SheetBuilder::new()
                .row(1, ["a", "b", "c"])
                .style("A1", 1)
                .style("C1", 2),
        )
        .write(&path)?;

    let mut app = XlsxEditor::open(&path, "S")?;
    app.set_border("A1:D2", &BorderSpec::thin("FF000000"))?;
    app.set_font_with_alignment(
        "A1:C1",
        &FontPatch { bold: Some(true), color: None },
        &AlignSpec::center(),
    )?;

    // курсив Arial из xf 1 остался, добавился жирный
    assert!(app.is_bold("A1")?);
    let font = app.cell_font_xml("A1")?;
    assert!(font.contains("<i/>"));
    assert!(font.contains(r#"<name val="Arial"/>"#));
    assert!(!app.is_bold("A2")?);

    let border = app.cell_border_xml("D2")?;
    assert!(border.contains(r#"<left style="thin"><color rgb="FF000000"/></left>"#));
    assert!(border.contains(r#"<bottom style="thin">"#));

    let align = app.cell_alignment("C1")?;
    assert!(align.contains(&("horizontal".into(), "center".into())));
    assert!(align.contains(&("vertical".into(), "center".into())));
    // перенос текста из xf 2 не потерялся
    assert!(align.contains(&("wrapText".into(), "1".into())));

    // одинаковый патч поверх одинакового стиля даёт один и тот же xf
    assert_eq!(app.cell_style_id("A2")?, app.cell_style_id("B2")?);
    assert_ne!(app.cell_style_id("A1")?, app.cell_style_id("B1")?);

    let out = dir.path().join("styles_out.xlsx");
    app.save(&out)?;
    let again = XlsxEditor::open(&out, "S")?;
    assert!(again.is_bold("B1")?);
    assert!(again.cell_border_xml("A1")?.contains(r#"<top style="thin">"#));
    Ok(())
}

#[test]
fn white_font_color_replaces_theme_color() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("color.xlsx");
    WorkbookBuilder::new()
        .sheet("S", SheetBuilder::new().row(1, ["x"]))
        .write(&path)?;

    let mut app = XlsxEditor::open(&path, "S")?;
    app.set_font(
        "A1",
        &FontPatch { bold: None, color: Some("FFFFFFFF".into()) },
    )?;
    let font = app.cell_font_xml("A1")?;
    assert!(font.contains(r#"<color rgb="FFFFFFFF"/>"#));
    assert!(!font.contains("theme="));
    assert!(font.contains("Calibri"));
    Ok(())
}

#[test]
fn column_widths_and_hidden_flags_survive_save() -> Result<()> {
    let dir = TempDir::new()?;
    let path = two_sheet_book(&dir)?;

    let mut app = XlsxEditor::open(&path, "Конфликты")?;
    app.set_column_width("C", 24.0)?;
    app.set_column_width("L", 30.0)?;
    for col in ["E", "H", "I"] {
        app.set_column_hidden(col, true)?;
    }
    assert_eq!(app.hidden_columns()?, vec!["E", "H", "I"]);

    let out = dir.path().join("cols.xlsx");
    app.save(&out)?;
    let again = XlsxEditor::open(&out, "Конфликты")?;
    assert_eq!(again.column_width("C")?, Some(24.0));
    assert_eq!(again.column_width("D")?, Some(30.0));
    assert_eq!(again.column_width("L")?, Some(30.0));
    assert_eq!(again.hidden_columns()?, vec!["E", "H", "I"]);
    Ok(())
}

#[test]
fn default_column_width_comes_from_sheet_format() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("defaults.xlsx");
    WorkbookBuilder::new()
        .sheet("Wide", SheetBuilder::new().row(1, ["x"]).default_width(18.5))
        .sheet("Plain", SheetBuilder::new().row(1, ["y"]))
        .write(&path)?;

    let wide = XlsxEditor::open(&path, "Wide")?;
    assert_eq!(wide.default_column_width()?, Some(18.5));
    assert_eq!(wide.column_width("B")?, None);
    assert_eq!(XlsxEditor::open(&path, "Plain")?.default_column_width()?, None);
    Ok(())
}

#[test]
fn save_over_the_source_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = two_sheet_book(&dir)?;

    let mut app = XlsxEditor::open(&path, "Конфликты")?;
    app.set_cell("F8", "done")?;
    app.save(&path)?;

    let again = XlsxEditor::open(&path, "Конфликты")?;
    assert_eq!(again.value("F8")?.to_string(), "done");
    assert_eq!(again.value("A7")?.to_string(), "ID 1го");
    Ok(())
}

#[test]
fn macro_enabled_book_saved_as_xlsx_loses_vba() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("macros.xlsm");
    WorkbookBuilder::new()
        .sheet("S", SheetBuilder::new().row(1, ["x"]))
        .macro_enabled()
        .write(&path)?;

    let app = XlsxEditor::open(&path, "S")?;

    let kept = dir.path().join("macros_copy.xlsm");
    app.save(&kept)?;
    assert!(part_names(&kept)?.iter().any(|p| p == "xl/vbaProject.bin"));

    let out = dir.path().join("macros.xlsx");
    app.save(&out)?;
    assert!(!part_names(&out)?.iter().any(|p| p == "xl/vbaProject.bin"));
    let types = read_part_text(&out, "[Content_Types].xml")?.unwrap_or_default();
    assert!(!types.contains("macroEnabled"));
    assert!(!types.contains("vbaProject"));
    assert!(types.contains("spreadsheetml.sheet.main+xml"));
    let rels = read_part_text(&out, "xl/_rels/workbook.xml.rels")?.unwrap_or_default();
    assert!(!rels.contains("vbaProject"));
    Ok(())
}
