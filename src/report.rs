//! report.rs – переформатирование листа с коллизиями.
//!
//! Сначала структура (столбец «Конфликт», нумерация, «Комментарий ПТИ»,
//! переименование), потом внешний вид (скрытые столбцы, рамки, заголовки,
//! ширины, маркер в L1–L4). Порядок шагов важен: все буквы столбцов ниже
//! относятся к листу после вставки первого столбца.

use anyhow::Result;
use rust_core::coord::{col_letter, coord};
use rust_core::{AlignSpec, BorderSpec, FontPatch, XlsxEditor};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::layout::ReportLayout;

/// Причины, по которым отчёт прерывается с сообщением пользователю.
/// Текст каждой ошибки – ровно то, что показывается в окне.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Не удалось открыть файл:\n{0:#}")]
    Open(anyhow::Error),

    #[error("Такого листа нет!")]
    SheetNotFound,

    #[error("Не найдены столбцы 'ID 1го' и 'ID 2го'!")]
    MissingIdColumns,

    #[error("Не удалось сохранить файл {}:\n{reason:#}", .path.display())]
    Save { path: PathBuf, reason: anyhow::Error },
}

/// Номера конфликтов для строк данных.
///
/// `rows` – (номер строки, заполнен ли ID 1, заполнен ли ID 2) по порядку.
/// Строка без обоих ID сбрасывает счётчик, строка с обоими получает следующий
/// номер, кроме самой `number_row`: она остаётся без метки и счётчик не трогает.
pub fn conflict_numbers<I>(rows: I, number_row: u32) -> Vec<(u32, Option<u32>)>
where
    I: IntoIterator<Item = (u32, bool, bool)>,
{
    let mut counter = 0;
    rows.into_iter()
        .map(|(row, id1, id2)| {
            let n = match (id1, id2) {
                (false, false) => {
                    counter = 0;
                    None
                }
                (true, true) if row > number_row => {
                    counter += 1;
                    Some(counter)
                }
                _ => None,
            };
            (row, n)
        })
        .collect()
}

/// Все преобразования листа по порядку. Ничего не сохраняет.
pub fn format_sheet(editor: &mut XlsxEditor, layout: &ReportLayout) -> Result<()> {
    restructure(editor, layout)?;
    restyle(editor, layout)?;
    Ok(())
}

fn restructure(editor: &mut XlsxEditor, layout: &ReportLayout) -> Result<()> {
    let header = layout.header_row;

    editor.insert_cols("A", 1)?;
    editor.set_text(&coord(0, header), &layout.conflict_title)?;

    let (id1, id2) = find_id_columns(editor, layout)?;
    debug!(id1 = %col_letter(id1), id2 = %col_letter(id2), "ID columns found");

    // ── нумерация конфликтов ────────────────────────────────────────────
    let max_row = editor.max_row();
    let flags = (layout.number_row..=max_row)
        .map(|r| {
            Ok((
                r,
                editor.value_at(id1, r)?.is_truthy(),
                editor.value_at(id2, r)?.is_truthy(),
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    let rows = flags.len();

    let mut labelled = 0;
    for (row, n) in conflict_numbers(flags, layout.number_row) {
        let at = coord(0, row);
        match n {
            Some(n) => {
                editor.set_text(&at, &format!("{} {n}", layout.conflict_title))?;
                labelled += 1;
            }
            None => editor.clear_cell(&at)?,
        }
    }
    info!(rows, labelled, "conflicts numbered");

    // ── «Комментарий ПТИ» в первый свободный столбец ────────────────────
    let pti = editor.max_column();
    editor.set_text(&coord(pti, header), &layout.pti_header)?;
    editor.set_cell(&coord(pti, layout.number_row), layout.pti_value)?;

    for c in 0..editor.max_column() {
        if editor.value_at(c, header)?.as_text() == Some(layout.comment_header.as_str()) {
            editor.set_text(&coord(c, header), &layout.comment_renamed)?;
        }
    }
    Ok(())
}

/// Столбцы «ID 1го» и «ID 2го» в строке заголовков; при повторах берётся последний.
fn find_id_columns(editor: &XlsxEditor, layout: &ReportLayout) -> Result<(u32, u32)> {
    let mut found = [None, None];
    for c in 0..editor.max_column() {
        let value = editor.value_at(c, layout.header_row)?;
        let Some(text) = value.as_text() else { continue };
        for (slot, title) in found.iter_mut().zip(&layout.id_headers) {
            if text == title {
                *slot = Some(c);
            }
        }
    }
    match found {
        [Some(a), Some(b)] => Ok((a, b)),
        _ => Err(ReportError::MissingIdColumns.into()),
    }
}

fn restyle(editor: &mut XlsxEditor, layout: &ReportLayout) -> Result<()> {
    let header = layout.header_row;
    let last_row = editor.max_row();
    let last_col = col_letter(editor.max_column().saturating_sub(1));

    for letter in &layout.hidden_columns {
        editor.set_column_hidden(letter, true)?;
    }

    editor.set_border(
        &format!("A{header}:{last_col}{last_row}"),
        &BorderSpec::thin(&layout.border_color),
    )?;
    editor.set_font_with_alignment(
        &format!("A{header}:{last_col}{header}"),
        &FontPatch {
            bold: Some(true),
            color: None,
        },
        &AlignSpec::center(),
    )?;
    editor.set_alignment(
        &format!("A{n}:{last_col}{n}", n = layout.number_row),
        &AlignSpec::center(),
    )?;

    // ── ширины: обе стороны читаются до записи ───────────────────────────
    for (narrow, wide) in &layout.width_swaps {
        let w_narrow = width_or_default(editor, narrow, layout)?;
        let w_wide = width_or_default(editor, wide, layout)?;
        editor.set_column_width(narrow, w_wide * layout.swap_shrink)?;
        editor.set_column_width(wide, w_narrow)?;
    }
    for letter in &layout.widened_columns {
        let w = width_or_default(editor, letter, layout)?;
        editor.set_column_width(letter, w * layout.widen_factor)?;
    }

    // ── белый маркер, в объединённых ячейках – в левую верхнюю ──────────
    let marker_font = FontPatch {
        bold: None,
        color: Some(layout.marker_color.clone()),
    };
    for row in layout.marker_rows.clone() {
        let target = editor.merge_anchor(&format!("{}{row}", layout.marker_column))?;
        editor.set_text(&target, &layout.marker_text)?;
        editor.set_font(&target, &marker_font)?;
    }
    Ok(())
}

/// Ширина из `<cols>`, иначе ширина листа по умолчанию, иначе `layout.default_width`.
/// Нулевая ширина считается незаданной.
fn width_or_default(editor: &XlsxEditor, letter: &str, layout: &ReportLayout) -> Result<f64> {
    let positive = |w: &f64| *w > 0.0;
    if let Some(w) = editor.column_width(letter)?.filter(positive) {
        return Ok(w);
    }
    Ok(editor
        .default_column_width()?
        .filter(positive)
        .unwrap_or(layout.default_width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(rows: &[(bool, bool)]) -> Vec<Option<u32>> {
        let rows = rows.iter().enumerate().map(|(i, &(a, b))| (8 + i as u32, a, b));
        conflict_numbers(rows, 8).into_iter().map(|(_, n)| n).collect()
    }

    #[test]
    fn first_data_row_is_never_labelled() {
        assert_eq!(numbers(&[(true, true), (true, true)]), vec![None, Some(1)]);
    }

    #[test]
    fn blank_row_restarts_numbering() {
        let t = (true, true);
        let blank = (false, false);
        assert_eq!(
            numbers(&[blank, t, t, t, blank, t, t]),
            vec![None, Some(1), Some(2), Some(3), None, Some(1), Some(2)]
        );
    }

    #[test]
    fn half_filled_row_keeps_the_counter() {
        let t = (true, true);
        assert_eq!(
            numbers(&[(false, false), t, (true, false), t, (false, true), t]),
            vec![None, Some(1), None, Some(2), None, Some(3)]
        );
    }
}
