use std::path::PathBuf;

use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// `<cache dir>/samfw/samfw.log`
#[must_use]
pub fn log_file_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("samfw").join("samfw.log"))
}

/// Console gets `console_level` and up, coloured; the log file gets everything
/// from this crate down to `Debug`.
pub fn setup_logger(console_level: LevelFilter) -> Result<Option<PathBuf>, fern::InitError> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let console = fern::Dispatch::new()
        .level(console_level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {} {}",
                chrono::Local::now().format("%H:%M:%S"),
                colors.color(record.level()),
                message
            ));
        })
        .chain(std::io::stderr());

    let mut root = fern::Dispatch::new()
        .level(LevelFilter::Debug)
        // chatty at debug
        .level_for("adb_client", LevelFilter::Info)
        .level_for("ureq", LevelFilter::Info)
        .level_for("ureq_proto", LevelFilter::Info)
        .level_for("rustls", LevelFilter::Warn)
        .chain(console);

    let path = log_file_path();
    if let Some(ref path) = path {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {:<5} [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message
                ));
            })
            .chain(fern::log_file(path)?);
        root = root.chain(file);
    }

    root.apply()?;
    Ok(path)
}
