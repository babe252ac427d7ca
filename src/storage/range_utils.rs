//! Range query helpers for prefix scans, grounded in
//! `restflow-storage/src/range_utils.rs`.

/// Exclusive end bound for a prefix range query: `"proj-1:"` -> `"proj-1;"`.
pub fn prefix_end_bound(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    let mut bytes = prefix.as_bytes().to_vec();
    if let Some(last) = bytes.last_mut() {
        *last = last.saturating_add(1);
    }
    String::from_utf8(bytes).unwrap_or_else(|_| format!("{}\u{7F}", prefix))
}

pub fn prefix_range(prefix: &str) -> (String, String) {
    (prefix.to_string(), prefix_end_bound(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_bound_increments_last_byte() {
        assert_eq!(prefix_end_bound("agent:"), "agent;");
        assert_eq!(prefix_end_bound("tag:rust:"), "tag:rust;");
        assert_eq!(prefix_end_bound(""), "");
    }
}
