use chrono::Utc;
use rand::Rng;

const SUFFIX_LEN: usize = 5;
const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a transaction reference: prefix, millisecond timestamp and a
/// short random suffix, e.g. `MP1734690000123K7QZ4`.
///
/// References generated within the same millisecond collide with
/// probability 36^-5 per pair.
pub fn generate_reference(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())]))
        .collect();
    format!("{prefix}{}{suffix}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn references_are_prefixed_alphanumeric() {
        let reference = generate_reference("MP");
        assert!(reference.starts_with("MP"));
        assert!(reference.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(reference.len(), 2 + 13 + SUFFIX_LEN);
    }

    #[test]
    fn burst_of_references_does_not_collide() {
        let references: HashSet<String> = (0..200).map(|_| generate_reference("T")).collect();
        assert_eq!(references.len(), 200);
    }
}
