//! Identifier issuance (spec.md §4.1): three distinct uniqueness disciplines
//! behind one small, stateless-except-for-config struct. The mint never
//! talks to the database itself — `team_id`/`team_code` collisions are
//! detected by the credential store's unique indexes and retried by the
//! registration orchestrator, which is the only caller that knows whether a
//! collision happened.

use rand::Rng;

const TEAM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ACCESS_KEY_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TEAM_CODE_SUFFIX_LEN: usize = 6;
const ACCESS_KEY_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct IdentifierMint {
    pub team_id_prefix: String,
    pub team_id_width: usize,
}

impl IdentifierMint {
    pub fn new(team_id_prefix: impl Into<String>, team_id_width: usize) -> Self {
        Self {
            team_id_prefix: team_id_prefix.into(),
            team_id_width,
        }
    }

    /// `team_id` for the `sequence`-th team registered (1-based). The caller
    /// is responsible for computing `sequence` from a count that is
    /// consistent with the transaction doing the insert.
    pub fn team_id(&self, sequence: u64) -> String {
        format!(
            "{}-{:0width$}",
            self.team_id_prefix,
            sequence,
            width = self.team_id_width
        )
    }

    /// A fresh candidate `team_code`. Call again on a `DuplicateCode` from
    /// the credential store, up to the orchestrator's retry budget.
    pub fn team_code(&self) -> String {
        let mut rng = rand::rng();
        let suffix: String = (0..TEAM_CODE_SUFFIX_LEN)
            .map(|_| TEAM_CODE_ALPHABET[rng.random_range(0..TEAM_CODE_ALPHABET.len())] as char)
            .collect();
        format!("TEAM-{suffix}")
    }

    /// Deterministic from `team_code` and the member's 0-based index; no
    /// randomness, no collision possible given a unique `team_code`.
    pub fn participant_id(team_code: &str, index: usize) -> String {
        format!("{team_code}-{index:03}")
    }

    pub fn access_key(&self) -> String {
        let mut rng = rand::rng();
        (0..ACCESS_KEY_LEN)
            .map(|_| ACCESS_KEY_ALPHABET[rng.random_range(0..ACCESS_KEY_ALPHABET.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn team_id_is_zero_padded() {
        let mint = IdentifierMint::new("HACK", 3);
        assert_eq!(mint.team_id(1), "HACK-001");
        assert_eq!(mint.team_id(42), "HACK-042");
        assert_eq!(mint.team_id(1234), "HACK-1234");
    }

    #[test]
    fn team_code_matches_format() {
        let mint = IdentifierMint::new("HACK", 3);
        for _ in 0..100 {
            let code = mint.team_code();
            assert!(code.starts_with("TEAM-"));
            assert_eq!(code.len(), 11);
            assert!(code["TEAM-".len()..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn team_codes_are_not_all_identical() {
        let mint = IdentifierMint::new("HACK", 3);
        let codes: HashSet<_> = (0..50).map(|_| mint.team_code()).collect();
        assert!(codes.len() > 1);
    }

    #[test]
    fn participant_id_is_deterministic() {
        assert_eq!(
            IdentifierMint::participant_id("TEAM-AB12CD", 0),
            "TEAM-AB12CD-000"
        );
        assert_eq!(
            IdentifierMint::participant_id("TEAM-AB12CD", 7),
            "TEAM-AB12CD-007"
        );
    }
}
