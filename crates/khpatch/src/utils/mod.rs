use camino::{Utf8Path, Utf8PathBuf};

pub mod config;

#[macro_export]
macro_rules! println_pad {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        for __line in __s.lines() {
            println!("    {}", __line);
        }
    }};
}

/// `<stem>.patched.<ext>` next to the base image.
pub fn default_output_path(image: &Utf8Path) -> Utf8PathBuf {
    let stem = image.file_stem().unwrap_or("image");
    let name = match image.extension() {
        Some(ext) => format!("{}.patched.{}", stem, ext),
        None => format!("{}.patched", stem),
    };
    image.with_file_name(name)
}

/// Formats a byte count the way the summaries print it.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
