//! Utility functions for domain processing and validation.
//!
//! This module contains the domain-name syntax predicate and the filter that
//! turns raw input lines into the set of domains to probe.

use crate::types::Domain;
use std::collections::BTreeSet;

/// Check whether `domain` is a syntactically valid host name.
///
/// Rules:
/// - 1 to 253 characters, ASCII only
/// - at least two dot-separated labels
/// - each label 1 to 63 characters of letters, digits and hyphens,
///   not starting or ending with a hyphen
/// - the last label is alphabetic (2+ chars) or a punycode `xn--` label
///
/// Input is not trimmed; callers decide how to treat whitespace.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 || !domain.is_ascii() {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    if !labels.iter().all(|label| is_valid_label(label)) {
        return false;
    }

    // Checked for emptiness above
    let tld = labels[labels.len() - 1];
    is_valid_tld(tld)
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > 63 {
        return false;
    }

    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }

    label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_tld(tld: &str) -> bool {
    let lower = tld.to_ascii_lowercase();
    if lower.starts_with("xn--") {
        return lower.len() > 4;
    }
    tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// Turn raw input lines into the set of domains to probe.
///
/// Each line is trimmed, lines that fail [`is_valid_domain`] are dropped
/// without error, and duplicates collapse. Empty input gives an empty set.
pub fn filter_domains<I, S>(lines: I) -> BTreeSet<Domain>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| Domain::parse(line.as_ref()).ok())
        .collect()
}
