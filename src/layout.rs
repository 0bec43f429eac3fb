//! layout.rs – фиксированные правила оформления отчёта о коллизиях.

use std::ops::RangeInclusive;

/// Всё, что отчёт знает о раскладке листа.
///
/// `Default` даёт рабочие правила; тесты берут константы отсюда же.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    /// Строка заголовков (1-based).
    pub header_row: u32,
    /// Первая строка данных, оформляется как строка номеров.
    pub number_row: u32,
    pub id_headers: [String; 2],
    /// Заголовок вставленного первого столбца и префикс меток `"Конфликт N"`.
    pub conflict_title: String,
    pub pti_header: String,
    pub pti_value: f64,
    pub comment_header: String,
    pub comment_renamed: String,
    pub hidden_columns: Vec<String>,
    /// Пары (X, Y): `X := w(Y) * swap_shrink`, `Y := w(X)`.
    pub width_swaps: Vec<(String, String)>,
    pub swap_shrink: f64,
    pub widened_columns: Vec<String>,
    pub widen_factor: f64,
    /// Ширина столбца, когда её не дают ни `<cols>`, ни `defaultColWidth` листа.
    pub default_width: f64,
    pub border_color: String,
    pub marker_column: String,
    pub marker_rows: RangeInclusive<u32>,
    pub marker_text: String,
    pub marker_color: String,
    /// Ячейка с именем выходного файла (после вставки столбца).
    pub name_cell: String,
    pub fallback_suffix: String,
}

impl Default for ReportLayout {
    fn default() -> Self {
        let letters = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            header_row: 7,
            number_row: 8,
            id_headers: ["ID 1го".into(), "ID 2го".into()],
            conflict_title: "Конфликт".into(),
            pti_header: "Комментарий ПТИ".into(),
            pti_value: 12.0,
            comment_header: "Комментарий".into(),
            comment_renamed: "Комментарий BIM отдела".into(),
            hidden_columns: letters(&["E", "H", "I", "J", "K"]),
            width_swaps: vec![("C".into(), "D".into()), ("F".into(), "G".into())],
            swap_shrink: 0.8,
            widened_columns: letters(&["L", "M"]),
            widen_factor: 3.0,
            default_width: 13.0,
            border_color: "FF000000".into(),
            marker_column: "L".into(),
            marker_rows: 1..=4,
            marker_text: "•".into(),
            marker_color: "FFFFFFFF".into(),
            name_cell: "C3".into(),
            fallback_suffix: "_formatted".into(),
        }
    }
}
