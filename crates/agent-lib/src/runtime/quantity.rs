//! Kubernetes resource quantity parsing
//!
//! The metrics API reports usage as quantity strings (`250m`, `12345678n`,
//! `64Mi`). These helpers convert them to millicores and bytes.

/// Parse a CPU quantity into millicores
pub fn parse_cpu_millicores(quantity: &str) -> Option<f64> {
    let q = quantity.trim();
    if q.is_empty() {
        return None;
    }

    let (number, factor) = if let Some(n) = q.strip_suffix('n') {
        (n, 1e-6)
    } else if let Some(n) = q.strip_suffix('u') {
        (n, 1e-3)
    } else if let Some(n) = q.strip_suffix('m') {
        (n, 1.0)
    } else {
        (q, 1000.0)
    };

    let value: f64 = number.parse().ok()?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }
    Some(value * factor)
}

const BINARY_SUFFIXES: &[(&str, u32)] = &[
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: &[(&str, i32)] = &[
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
    ("m", -3),
];

/// Parse a memory quantity into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    let q = quantity.trim();
    if q.is_empty() {
        return None;
    }

    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(n) = q.strip_suffix(suffix) {
            let value: f64 = n.parse().ok()?;
            return to_bytes(value * 1024f64.powi(*power as i32));
        }
    }

    for (suffix, exp) in DECIMAL_SUFFIXES {
        if let Some(n) = q.strip_suffix(suffix) {
            let value: f64 = n.parse().ok()?;
            return to_bytes(value * 10f64.powi(*exp));
        }
    }

    to_bytes(q.parse().ok()?)
}

fn to_bytes(value: f64) -> Option<u64> {
    if value < 0.0 || !value.is_finite() {
        return None;
    }
    Some(value.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_millicores() {
        assert_eq!(parse_cpu_millicores("250m"), Some(250.0));
        assert_eq!(parse_cpu_millicores("2"), Some(2000.0));
        assert_eq!(parse_cpu_millicores("0.5"), Some(500.0));
        assert!((parse_cpu_millicores("12345678n").unwrap() - 12.345678).abs() < 1e-9);
        assert!((parse_cpu_millicores("1500u").unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(parse_cpu_millicores(""), None);
        assert_eq!(parse_cpu_millicores("abc"), None);
        assert_eq!(parse_cpu_millicores("-1"), None);
    }

    #[test]
    fn test_parse_memory_bytes() {
        assert_eq!(parse_memory_bytes("64Mi"), Some(64 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("1Gi"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("2048Ki"), Some(2 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("1k"), Some(1000));
        assert_eq!(parse_memory_bytes("1M"), Some(1_000_000));
        assert_eq!(parse_memory_bytes("123456"), Some(123456));
        assert_eq!(parse_memory_bytes("1500m"), Some(2));
        assert_eq!(parse_memory_bytes("lots"), None);
    }
}
