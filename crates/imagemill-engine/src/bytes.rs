/// Human readable size in binary units: `976.6 KiB`.
pub fn byte_count_iec(bytes: u64) -> String {
    byte_count(bytes, 1024, "KMGTPE", "i")
}

/// Human readable size in decimal units: `1.0 kB`.
pub fn byte_count_si(bytes: u64) -> String {
    byte_count(bytes, 1000, "kMGTPE", "")
}

fn byte_count(bytes: u64, unit: u64, prefixes: &str, infix: &str) -> String {
    if bytes < unit {
        return format!("{bytes} B");
    }
    let mut div = unit;
    let mut exp = 0;
    let mut n = bytes / unit;
    while n >= unit {
        div *= unit;
        exp += 1;
        n /= unit;
    }
    let prefix = prefixes.chars().nth(exp).unwrap_or('?');
    format!("{:.1} {prefix}{infix}B", bytes as f64 / div as f64)
}

/// Size change in percent, negative when the image shrank.
pub fn reduction_percent(before: u64, after: u64) -> f64 {
    if before == 0 {
        return 0.0;
    }
    after as f64 * 100.0 / before as f64 - 100.0
}
