//! dialogs.rs – взаимодействие с пользователем.
//!
//! Отчёту нужны три вида окон: выбор файла, ввод имени листа и сообщения.
//! `None` из любого запроса означает отмену.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::warn;

pub const OPEN_TITLE: &str = "Выберите Excel файл";
pub const SHEET_TITLE: &str = "Выбор листа";
pub const ERROR_TITLE: &str = "Ошибка";
pub const DONE_TITLE: &str = "Готово";
pub const EXTENSIONS: &[&str] = &["xlsx", "xlsm"];

pub trait Dialogs {
    /// Путь к книге `.xlsx`/`.xlsm`.
    fn pick_file(&mut self) -> Option<PathBuf>;
    /// Имя листа; `sheets` показываются пользователю как подсказка.
    fn ask_sheet(&mut self, sheets: &[String]) -> Option<String>;
    fn error(&mut self, message: &str);
    fn info(&mut self, title: &str, message: &str);
}

pub(crate) fn sheet_prompt(sheets: &[String]) -> String {
    format!("Доступные листы:\n{}\n\nВведите название листа:", sheets.join(", "))
}

/// Ответ как есть, без перевода строки; из одних пробелов – отмена.
/// Имя листа может начинаться или кончаться пробелом, поэтому не обрезаем.
fn answer_or_cancel(mut answer: String) -> Option<String> {
    let kept = answer.trim_end_matches(['\r', '\n']).len();
    answer.truncate(kept);
    (!answer.trim().is_empty()).then_some(answer)
}

fn has_excel_extension(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Диалоги в терминале: вопросы в `output`, ответы из `input`.
/// Пустая строка или конец ввода – отмена.
pub struct ConsoleDialogs<R, W> {
    input: R,
    output: W,
}

impl ConsoleDialogs<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> ConsoleDialogs<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn say(&mut self, text: &str) {
        if let Err(e) = writeln!(self.output, "{text}") {
            warn!(error = %e, "console output failed");
        }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        if let Err(e) = write!(self.output, "{prompt} ").and_then(|_| self.output.flush()) {
            warn!(error = %e, "console output failed");
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => answer_or_cancel(line),
            Err(e) => {
                warn!(error = %e, "console input failed");
                None
            }
        }
    }
}

impl<R: BufRead, W: Write> Dialogs for ConsoleDialogs<R, W> {
    fn pick_file(&mut self) -> Option<PathBuf> {
        let prompt = format!("{OPEN_TITLE} (*.xlsx *.xlsm), пустая строка – отмена:");
        loop {
            // терминалы при перетаскивании файла берут путь в кавычки
            let answer = self.ask(&prompt)?;
            let path = PathBuf::from(answer.trim().trim_matches(|c| c == '"' || c == '\''));
            if has_excel_extension(&path) {
                return Some(path);
            }
            self.say("Нужен файл .xlsx или .xlsm");
        }
    }

    fn ask_sheet(&mut self, sheets: &[String]) -> Option<String> {
        self.say(&format!("[{SHEET_TITLE}]"));
        self.ask(&sheet_prompt(sheets))
    }

    fn error(&mut self, message: &str) {
        self.say(&format!("[{ERROR_TITLE}] {message}"));
    }

    fn info(&mut self, title: &str, message: &str) {
        self.say(&format!("[{title}] {message}"));
    }
}

/// Системные окна: файл и сообщения через `rfd`, имя листа через окно
/// ввода `tinyfiledialogs` (в `rfd` его нет).
#[cfg(feature = "native-dialogs")]
#[derive(Debug, Default)]
pub struct NativeDialogs;

#[cfg(feature = "native-dialogs")]
impl NativeDialogs {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "native-dialogs")]
impl Dialogs for NativeDialogs {
    fn pick_file(&mut self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .set_title(OPEN_TITLE)
            .add_filter("Excel files", EXTENSIONS)
            .pick_file()
    }

    fn ask_sheet(&mut self, sheets: &[String]) -> Option<String> {
        tinyfiledialogs::input_box(SHEET_TITLE, &sheet_prompt(sheets), "").and_then(answer_or_cancel)
    }

    fn error(&mut self, message: &str) {
        rfd::MessageDialog::new()
            .set_level(rfd::MessageLevel::Error)
            .set_title(ERROR_TITLE)
            .set_description(message)
            .set_buttons(rfd::MessageButtons::Ok)
            .show();
    }

    fn info(&mut self, title: &str, message: &str) {
        rfd::MessageDialog::new()
            .set_level(rfd::MessageLevel::Info)
            .set_title(title)
            .set_description(message)
            .set_buttons(rfd::MessageButtons::Ok)
            .show();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn console_rejects_foreign_extensions_and_strips_quotes() {
        let input = Cursor::new("report.csv\n\"C:/tmp/Отчёт.XLSM\"\n");
        let mut dlg = ConsoleDialogs::new(input, Vec::new());
        assert_eq!(dlg.pick_file(), Some(PathBuf::from("C:/tmp/Отчёт.XLSM")));
        let out = String::from_utf8(dlg.into_output()).unwrap();
        assert!(out.contains("Нужен файл .xlsx или .xlsm"));
    }

    #[test]
    fn empty_answer_or_eof_cancels() {
        let mut dlg = ConsoleDialogs::new(Cursor::new("\n"), Vec::new());
        assert_eq!(dlg.pick_file(), None);
        let mut dlg = ConsoleDialogs::new(Cursor::new(""), Vec::new());
        assert_eq!(dlg.ask_sheet(&["A".into(), "B".into()]), None);
    }

    #[test]
    fn sheet_prompt_lists_names() {
        let mut dlg = ConsoleDialogs::new(Cursor::new("Лист2\r\n"), Vec::new());
        let sheets = vec!["Лист1".to_owned(), "Лист2".to_owned()];
        assert_eq!(dlg.ask_sheet(&sheets), Some("Лист2".to_owned()));
        let out = String::from_utf8(dlg.into_output()).unwrap();
        assert!(out.contains("Доступные листы:\nЛист1, Лист2\n\nВведите название листа:"));
    }

    #[test]
    fn sheet_name_keeps_surrounding_spaces() {
        let mut dlg = ConsoleDialogs::new(Cursor::new(" Итог 2024 \n   \n"), Vec::new());
        let sheets = vec![" Итог 2024 ".to_owned()];
        assert_eq!(dlg.ask_sheet(&sheets), Some(" Итог 2024 ".to_owned()));
        assert_eq!(dlg.ask_sheet(&sheets), None);
    }

    #[test]
    fn file_path_is_still_trimmed() {
        let mut dlg = ConsoleDialogs::new(Cursor::new("  'book.xlsx'  \n"), Vec::new());
        assert_eq!(dlg.pick_file(), Some(PathBuf::from("book.xlsx")));
    }
}
