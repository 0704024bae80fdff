//! Secret redaction.
//!
//! Every error message that may contain credentials passes through
//! [`redact`] before it is logged or surfaced. The rules are fixed:
//! `sk-…` style keys collapse to `sk-***`, and any ≥40-character
//! alphanumeric run collapses to `***`.

use once_cell::sync::Lazy;
use regex::Regex;

static SK_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{20,}").expect("sk key pattern"));

static LONG_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9]{40,}").expect("long token pattern"));

/// Scrub credential-shaped substrings out of `input`.
pub fn redact(input: &str) -> String {
    let pass1 = SK_KEY.replace_all(input, "sk-***");
    LONG_TOKEN.replace_all(&pass1, "***").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_sk_keys() {
        let msg = "401 from server, key sk-abcdefghijklmnopqrstuvwxyz012345 rejected";
        let out = redact(msg);
        assert!(!out.contains("sk-abcdefghijklmnopqrstuvwxyz012345"));
        assert!(out.contains("sk-***"));
    }

    #[test]
    fn scrubs_long_alphanumeric_runs() {
        let token = "A".repeat(48);
        let out = redact(&format!("bearer {token} expired"));
        assert!(!out.contains(&token));
        assert!(out.contains("***"));
    }

    #[test]
    fn leaves_normal_text_alone() {
        let msg = "connection refused to localhost:6334";
        assert_eq!(redact(msg), msg);
    }

    #[test]
    fn short_tokens_survive() {
        let msg = "model nomic-embed-text not found";
        assert_eq!(redact(msg), msg);
    }
}
