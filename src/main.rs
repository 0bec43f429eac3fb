use collisions_report::{ReportLayout, run};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    #[cfg(feature = "native-dialogs")]
    let mut dialogs = collisions_report::NativeDialogs::new();
    #[cfg(not(feature = "native-dialogs"))]
    let mut dialogs = collisions_report::ConsoleDialogs::stdio();

    // сообщение об ошибке пользователь уже видел, здесь только код выхода
    match run(&mut dialogs, &ReportLayout::default()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
