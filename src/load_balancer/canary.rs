//! Canary (gray release) bucketing.
//!
//! A session is bucketed by a 31-multiplier rolling hash of its UTF-16 code
//! units, masked to 16 bits and reduced modulo 100. The bucket is stable for
//! a session, so a client stays on one side of the split across requests.

/// Rolling string hash over UTF-16 code units with wrapping `i32` math.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Bucket in `0..100` for a session id.
pub fn bucket(session_id: &str) -> u8 {
    // Masked to 16 bits, so the cast cannot truncate.
    ((string_hash(session_id) & 0xFFFF) % 100) as u8
}

/// Whether this session belongs to the canary share.
pub fn is_canary(session_id: Option<&str>, percent: u8) -> bool {
    match session_id {
        Some(id) if !id.is_empty() => bucket(id) < percent.min(100),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("abc"), 96354);
        // Wraps past i32::MAX.
        assert_eq!(string_hash("hello world"), 1794106052);
        assert_eq!(string_hash("polygenelubricants"), i32::MIN);
    }

    #[test]
    fn bucket_is_stable_and_bounded() {
        for id in ["s1", "session-abc", "0f8fad5b-d9cb-469f-a165-70867728950e"] {
            let b = bucket(id);
            assert!(b < 100);
            assert_eq!(b, bucket(id));
        }
        // 96354 & 0xFFFF = 30818, % 100 = 18.
        assert_eq!(bucket("abc"), 18);
    }

    #[test]
    fn percent_bounds() {
        assert!(!is_canary(None, 100));
        assert!(!is_canary(Some(""), 100));
        assert!(is_canary(Some("abc"), 100));
        assert!(!is_canary(Some("abc"), 0));
        assert!(is_canary(Some("abc"), 19));
        assert!(!is_canary(Some("abc"), 18));
    }
}
