//! Which delegated role is responsible for a target path.

use globset::GlobBuilder;
use sha2::{Digest, Sha256};

use crate::hashes::sha256_hex;
use crate::metadata::{DelegatedRole, Delegations, SuccinctRoles};

impl DelegatedRole {
    /// Returns `true` when `target_path` falls within this role's purview.
    ///
    /// A role constrained by neither `paths` nor `path_hash_prefixes`
    /// is trusted for every path.
    pub fn is_delegated_path(&self, target_path: &str) -> bool {
        if let Some(patterns) = &self.paths {
            return patterns
                .iter()
                .any(|pattern| path_matches_pattern(target_path, pattern));
        }
        if let Some(prefixes) = &self.path_hash_prefixes {
            let digest = sha256_hex(target_path.as_bytes());
            return prefixes.iter().any(|prefix| digest.starts_with(prefix.as_str()));
        }
        true
    }
}

/// Matches shell-style `pattern` against `target_path`.
///
/// Both must have the same number of `/`-separated segments, and wildcards
/// never cross a separator. Braces and backslashes are literal characters.
fn path_matches_pattern(target_path: &str, pattern: &str) -> bool {
    if target_path.split('/').count() != pattern.split('/').count() {
        return false;
    }
    let glob = GlobBuilder::new(&shell_to_glob(pattern))
        .literal_separator(true)
        .backslash_escape(false)
        .build();
    match glob {
        Ok(glob) => glob.compile_matcher().is_match(target_path),
        Err(_) => false,
    }
}

/// Rewrites a shell-style pattern into `globset` syntax: `{` and `}` outside
/// a character class become single-member classes and runs of `*` collapse,
/// so `**` inside a segment means `*`.
fn shell_to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' if !in_class => {
                in_class = true;
                glob.push('[');
                if let Some(negate) = chars.next_if_eq(&'!') {
                    glob.push(negate);
                }
                // A leading `]` is a class member.
                if let Some(bracket) = chars.next_if_eq(&']') {
                    glob.push(bracket);
                }
            }
            ']' if in_class => {
                in_class = false;
                glob.push(']');
            }
            '{' | '}' if !in_class => {
                glob.push('[');
                glob.push(c);
                glob.push(']');
            }
            '*' if !in_class => {
                glob.push('*');
                while chars.next_if_eq(&'*').is_some() {}
            }
            _ => glob.push(c),
        }
    }
    glob
}

impl SuccinctRoles {
    /// Number of bins the path space is split into.
    pub fn number_of_bins(&self) -> u64 {
        1u64 << self.bit_length.min(32)
    }

    /// Hex digits in a bin name suffix.
    fn suffix_len(&self) -> usize {
        (self.bit_length as usize + 3) / 4
    }

    fn bin_name(&self, index: u64) -> String {
        format!(
            "{}-{:0width$x}",
            self.name_prefix,
            index,
            width = self.suffix_len()
        )
    }

    /// The bin role for `target_path`: the leading `bit_length` bits of
    /// SHA-256(path), read big-endian.
    pub fn bin_name_for_target(&self, target_path: &str) -> String {
        let digest = Sha256::digest(target_path.as_bytes());
        let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let index = head
            .checked_shr(32u32.saturating_sub(self.bit_length))
            .unwrap_or(0);
        self.bin_name(u64::from(index))
    }

    /// Every bin role name, in bin order.
    pub fn role_names(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.number_of_bins()).map(|index| self.bin_name(index))
    }

    /// Returns `true` when `role` names one of the bins.
    pub fn is_delegated_role(&self, role: &str) -> bool {
        let Some(suffix) = role
            .strip_prefix(self.name_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            return false;
        };
        if suffix.len() != self.suffix_len() {
            return false;
        }
        match u64::from_str_radix(suffix, 16) {
            Ok(index) => index < self.number_of_bins(),
            Err(_) => false,
        }
    }
}

impl Delegations {
    /// Keys and threshold for the delegated role `role`, if it exists.
    pub fn role_keys(&self, role: &str) -> Option<(&[String], u64)> {
        if let Some(roles) = &self.roles {
            return roles
                .iter()
                .find(|delegated| delegated.name == role)
                .map(|delegated| (delegated.keyids.as_slice(), delegated.threshold));
        }
        let succinct = self.succinct_roles.as_ref()?;
        succinct
            .is_delegated_role(role)
            .then(|| (succinct.keyids.as_slice(), succinct.threshold))
    }

    /// Child roles responsible for `target_path`, in delegation order, each
    /// paired with its terminating flag.
    ///
    /// A succinct delegation yields exactly one bin, which is terminating.
    pub fn roles_for_target(&self, target_path: &str) -> Vec<(String, bool)> {
        if let Some(roles) = &self.roles {
            return roles
                .iter()
                .filter(|delegated| delegated.is_delegated_path(target_path))
                .map(|delegated| (delegated.name.clone(), delegated.terminating))
                .collect();
        }
        match &self.succinct_roles {
            Some(succinct) => vec![(succinct.bin_name_for_target(target_path), true)],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::UnrecognizedFields;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn role(name: &str, paths: Option<&[&str]>, prefixes: Option<&[&str]>) -> DelegatedRole {
        let owned = |items: &[&str]| items.iter().map(|item| item.to_string()).collect();
        DelegatedRole {
            name: name.to_string(),
            keyids: vec![],
            threshold: 1,
            terminating: false,
            paths: paths.map(owned),
            path_hash_prefixes: prefixes.map(owned),
            unrecognized_fields: UnrecognizedFields::new(),
        }
    }

    fn succinct(bit_length: u32) -> SuccinctRoles {
        SuccinctRoles {
            keyids: vec!["k".into()],
            threshold: 1,
            bit_length,
            name_prefix: "bin".into(),
            unrecognized_fields: UnrecognizedFields::new(),
        }
    }

    #[test]
    fn glob_matches_segment_by_segment() {
        let team = role("team-a", Some(&["a/*"]), None);
        assert!(team.is_delegated_path("a/b.txt"));
        assert!(!team.is_delegated_path("a/b/c.txt"));
        assert!(!team.is_delegated_path("b/a.txt"));

        let nested = role("nested", Some(&["*/*.tar.gz", "docs/v?/index.html"]), None);
        assert!(nested.is_delegated_path("pkg/tool.tar.gz"));
        assert!(nested.is_delegated_path("docs/v2/index.html"));
        assert!(!nested.is_delegated_path("docs/v10/index.html"));
    }

    #[test]
    fn braces_and_backslashes_are_literal() {
        let braces = role("braces", Some(&["a/{x,y}"]), None);
        assert!(!braces.is_delegated_path("a/x"));
        assert!(!braces.is_delegated_path("a/y"));
        assert!(braces.is_delegated_path("a/{x,y}"));

        let escaped = role("escaped", Some(&[r"a/\*"]), None);
        assert!(escaped.is_delegated_path(r"a/\b"));
        assert!(!escaped.is_delegated_path("a/*"));
    }

    #[test]
    fn double_star_stays_within_a_segment() {
        let team = role("team", Some(&["a/**.txt", "[!x]/f"]), None);
        assert!(team.is_delegated_path("a/b.txt"));
        assert!(!team.is_delegated_path("a/b/c.txt"));
        assert!(team.is_delegated_path("b/f"));
        assert!(!team.is_delegated_path("x/f"));
    }

    #[test]
    fn invalid_pattern_never_matches() {
        let broken = role("broken", Some(&["a/[b"]), None);
        assert!(!broken.is_delegated_path("a/[b"));
    }

    #[test]
    fn hash_prefixes_match_the_path_digest() {
        // sha256("a/b.txt") starts with 5550000d.
        assert!(role("bins", None, Some(&["55", "ff"])).is_delegated_path("a/b.txt"));
        assert!(!role("bins", None, Some(&["56"])).is_delegated_path("a/b.txt"));
    }

    #[test]
    fn unconstrained_role_matches_everything() {
        assert!(role("all", None, None).is_delegated_path("any/path/at/all"));
    }

    #[test]
    fn bin_names_use_leading_hash_bits() {
        assert_eq!(succinct(8).bin_name_for_target("a/b.txt"), "bin-55");
        assert_eq!(succinct(12).bin_name_for_target("a/b.txt"), "bin-555");
        assert_eq!(succinct(5).bin_name_for_target("targets/file.txt"), "bin-1c");
        assert_eq!(succinct(8).bin_name_for_target("foo"), "bin-2c");
    }

    #[test]
    fn role_names_enumerate_every_bin() {
        let roles = succinct(5);
        let names: Vec<String> = roles.role_names().collect();
        assert_eq!(names.len(), 32);
        assert_eq!(names.first().map(String::as_str), Some("bin-00"));
        assert_eq!(names.last().map(String::as_str), Some("bin-1f"));
        assert!(names.iter().all(|name| roles.is_delegated_role(name)));
    }

    #[test]
    fn is_delegated_role_rejects_foreign_names() {
        let roles = succinct(5);
        assert!(!roles.is_delegated_role("bin-20"));
        assert!(!roles.is_delegated_role("bin-1"));
        assert!(!roles.is_delegated_role("bin-0z"));
        assert!(!roles.is_delegated_role("other-00"));
        assert!(!roles.is_delegated_role("bin00"));
    }

    #[test]
    fn roles_for_target_keeps_listed_order() {
        let mut first = role("first", Some(&["a/*"]), None);
        first.terminating = true;
        let delegations = Delegations {
            keys: BTreeMap::new(),
            roles: Some(vec![
                role("elsewhere", Some(&["b/*"]), None),
                first,
                role("fallback", None, None),
            ]),
            succinct_roles: None,
            unrecognized_fields: UnrecognizedFields::new(),
        };
        assert_eq!(
            delegations.roles_for_target("a/b.txt"),
            vec![("first".to_string(), true), ("fallback".to_string(), false)]
        );
        assert!(delegations.role_keys("elsewhere").is_some());
        assert!(delegations.role_keys("missing").is_none());
    }

    #[test]
    fn succinct_delegation_yields_one_terminating_bin() {
        let delegations = Delegations {
            keys: BTreeMap::new(),
            roles: None,
            succinct_roles: Some(succinct(8)),
            unrecognized_fields: UnrecognizedFields::new(),
        };
        assert_eq!(
            delegations.roles_for_target("a/b.txt"),
            vec![("bin-55".to_string(), true)]
        );
        assert_eq!(delegations.role_keys("bin-55").map(|(_, t)| t), Some(1));
        assert!(delegations.role_keys("bin-100").is_none());
    }

    proptest! {
        #[test]
        fn bin_assignment_is_deterministic(path in "[a-z0-9/._-]{1,40}") {
            let roles = succinct(8);
            let bin = roles.bin_name_for_target(&path);
            prop_assert_eq!(&bin, &roles.bin_name_for_target(&path));
            prop_assert!(roles.is_delegated_role(&bin));
        }

        #[test]
        fn paths_in_different_bins_never_share_a_role(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
            let roles = succinct(8);
            let digest_a = Sha256::digest(a.as_bytes());
            let digest_b = Sha256::digest(b.as_bytes());
            let same_bin = digest_a[0] == digest_b[0];
            prop_assert_eq!(
                roles.bin_name_for_target(&a) == roles.bin_name_for_target(&b),
                same_bin
            );
        }
    }
}
