//! naming.rs – имя выходного файла.

use rust_core::CellValue;
use std::path::{Path, PathBuf};

use crate::layout::ReportLayout;

/// Символы, недопустимые в именах файлов Windows.
const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Куда сохранять результат: `<C3>.xlsx` рядом с исходником, а если C3 пуста
/// (или после очистки от спецсимволов ничего не осталось) – `<stem>_formatted.xlsx`.
pub fn output_path(src: &Path, name_cell: &CellValue, layout: &ReportLayout) -> PathBuf {
    let dir = src.parent().unwrap_or_else(|| Path::new(""));
    let name = if name_cell.is_truthy() {
        sanitize_file_name(&name_cell.to_string())
    } else {
        String::new()
    };

    if name.is_empty() {
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(format!("{stem}{}.xlsx", layout.fallback_suffix))
    } else {
        dir.join(format!("{name}.xlsx"))
    }
}
