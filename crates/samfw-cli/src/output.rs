//! Console output for humans. Logs go through `log`; this is what the user reads.
//!
//! Write errors (e.g. a closed pipe when piping into `head`) are ignored:
//! losing progress text must never fail a firmware run.

use std::fmt::Display;
use std::io::{self, Write};

/// `==> message`
pub fn step(message: impl Display) {
    writeln!(io::stdout().lock(), "==> {message}").ok();
}

/// `    label: value`
pub fn field(label: &str, value: impl Display) {
    writeln!(io::stdout().lock(), "    {label}: {value}").ok();
}

pub fn line(text: impl Display) {
    writeln!(io::stdout().lock(), "{text}").ok();
}

pub fn failure(text: impl Display) {
    writeln!(io::stderr().lock(), "error: {text}").ok();
}

/// Keep only the first 8 digits of an IMEI visible.
pub fn mask_imei(imei: &str) -> String {
    imei.chars()
        .enumerate()
        .map(|(i, c)| if i < 8 { c } else { '*' })
        .collect()
}
