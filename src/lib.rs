//! lib.rs — отчёт о коллизиях: выбор книги и листа, переформатирование, сохранение.

pub mod dialogs;
pub mod layout;
pub mod naming;
pub mod report;

use anyhow::Result;
use rust_core::XlsxEditor;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[cfg(feature = "native-dialogs")]
pub use dialogs::NativeDialogs;
pub use dialogs::{ConsoleDialogs, Dialogs};
pub use layout::ReportLayout;
pub use report::{ReportError, conflict_numbers, format_sheet};

/// Один проход от выбора файла до сообщения «Готово».
///
/// `Ok(None)` – пользователь отказался выбирать файл. Любая другая причина
/// остановки уже показана через `dialogs.error` и возвращается как `Err`;
/// выходной файл в этом случае не создаётся.
pub fn run(dialogs: &mut dyn Dialogs, layout: &ReportLayout) -> Result<Option<PathBuf>> {
    let Some(src) = dialogs.pick_file() else {
        info!("file selection cancelled");
        return Ok(None);
    };

    match process(dialogs, &src, layout) {
        Ok(dst) => {
            dialogs.info(dialogs::DONE_TITLE, &format!("Файл сохранен:\n{}", dst.display()));
            Ok(Some(dst))
        }
        Err(e) => {
            let message = match e.downcast_ref::<ReportError>() {
                Some(known) => known.to_string(),
                None => format!("{e:#}"),
            };
            warn!(src = %src.display(), error = %format!("{e:#}"), "report aborted");
            dialogs.error(&message);
            Err(e)
        }
    }
}

fn process(dialogs: &mut dyn Dialogs, src: &Path, layout: &ReportLayout) -> Result<PathBuf> {
    let sheets = rust_core::scan(src).map_err(ReportError::Open)?;
    let sheet = match sheets.as_slice() {
        [only] => only.clone(),
        _ => match dialogs.ask_sheet(&sheets) {
            Some(name) if sheets.contains(&name) => name,
            _ => return Err(ReportError::SheetNotFound.into()),
        },
    };

    let mut editor = XlsxEditor::open(src, &sheet).map_err(ReportError::Open)?;
    editor.retain_only_current_sheet()?;
    format_sheet(&mut editor, layout)?;

    let dst = naming::output_path(src, &editor.value(&layout.name_cell)?, layout);
    editor
        .save(&dst)
        .map_err(|reason| ReportError::Save { path: dst.clone(), reason })?;
    info!(src = %src.display(), dst = %dst.display(), sheet = %sheet, "report formatted");
    Ok(dst)
}
