//! STIX pattern expression building blocks.
//!
//! Every value inserted into a pattern goes through [`escape_value`] so the
//! resulting conjunction stays syntactically valid: wrapping quotes are
//! stripped, backslashes and registry-key percent sequences are normalized,
//! and embedded quotes are escaped.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::error::{ConversionError, Result};

static HASH_FORMATS: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    let mut formats = HashMap::new();
    let mut hex = |name: &'static str, length: usize| {
        formats.insert(
            name,
            Regex::new(&format!("^[a-fA-F0-9]{{{length}}}$")).expect("static hash regex"),
        );
    };
    hex("MD5", 32);
    hex("SHA1", 40);
    hex("SHA224", 56);
    hex("SHA256", 64);
    hex("SHA384", 96);
    hex("SHA512", 128);
    hex("SHA512224", 56);
    hex("SHA512256", 64);
    hex("SHA3256", 64);
    hex("SHA3512", 128);
    formats.insert(
        "SSDEEP",
        Regex::new(r"^\d+:[A-Za-z0-9/+]*:[A-Za-z0-9/+]*$").expect("static hash regex"),
    );
    formats
});

/// Canonical hash key used in pattern paths and `hashes` dictionaries:
/// `sha256` -> `SHA256`, `sha512/224` -> `SHA224`.
pub fn normalize_hash_type(hash_type: &str) -> String {
    if let Some((_, variant)) = hash_type.split_once('/') {
        return format!("SHA{variant}");
    }
    hash_type.replace('-', "").to_uppercase()
}

/// Format check for a normalized hash type. Unknown algorithms pass; only
/// declared algorithms with a known shape can fail.
pub fn check_hash_format(normalized_type: &str, value: &str) -> bool {
    match HASH_FORMATS.get(normalized_type) {
        Some(format) => format.is_match(value),
        None => true,
    }
}

fn strip_wrapping_quotes(value: &str) -> &str {
    let mut stripped = value;
    loop {
        let trimmed = stripped
            .strip_prefix('\'')
            .or_else(|| stripped.strip_prefix('"'))
            .or_else(|| stripped.strip_suffix('\''))
            .or_else(|| stripped.strip_suffix('"'));
        match trimmed {
            Some(inner) => stripped = inner,
            None => return stripped,
        }
    }
}

fn normalize_registry_value(value: &str) -> String {
    let sanitized = strip_wrapping_quotes(value.trim()).replace('\\', "\\\\");
    if !sanitized.contains('%') || sanitized.contains("\\\\%") {
        return sanitized;
    }
    if sanitized.contains("\\%") {
        return sanitized.replace("\\%", "\\\\%");
    }
    sanitized.replace('%', "\\\\%")
}

/// Sanitizes a raw value for insertion between the single quotes of a
/// comparison expression.
pub fn escape_value(value: &str) -> String {
    normalize_registry_value(value)
        .replace('\'', "\\'")
        .replace('"', "\\\\\"")
}

/// One `object-path = 'value'` comparison term.
pub fn comparison(path: &str, value: &str) -> String {
    format!("{path} = '{value}'")
}

/// Wraps conjunctive terms into a bracketed pattern expression.
pub fn bracketed(terms: &[String]) -> String {
    format!("[{}]", terms.join(" AND "))
}

pub fn filename_comparison(name: &str) -> String {
    comparison("file:name", name)
}

pub fn domain_comparison(domain: &str) -> String {
    comparison("domain-name:value", domain)
}

pub fn domain_resolving_comparison(address: &str) -> String {
    comparison("domain-name:resolves_to_refs[*].value", address)
}

pub fn content_ref_comparison(value: &str, feature: &str) -> String {
    comparison(&format!("file:content_ref.{feature}"), value)
}

pub fn regkey_comparison(key: &str) -> String {
    comparison("windows-registry-key:key", key)
}

pub fn port_comparison(port: &str, ip_kind: &str) -> String {
    comparison(&format!("network-traffic:{ip_kind}_port"), port)
}

/// `ipv4-addr` vs `ipv6-addr` by presence of a colon.
pub fn address_type(address: &str) -> &'static str {
    if address.contains(':') {
        "ipv6-addr"
    } else {
        "ipv4-addr"
    }
}

/// Network reference pair: address type plus address value.
pub fn ip_comparison(ip_kind: &str, value: &str) -> String {
    format!(
        "{} AND {}",
        comparison(
            &format!("network-traffic:{ip_kind}_ref.type"),
            address_type(value)
        ),
        comparison(&format!("network-traffic:{ip_kind}_ref.value"), value)
    )
}

/// Strips the `AS` prefix and any other decoration from an AS number.
pub fn parse_as_number(value: &str) -> Result<u64> {
    let digits: String = value
        .chars()
        .filter(|character| character.is_ascii_digit() || *character == '.')
        .collect();
    digits
        .parse::<u64>()
        .map_err(|_| ConversionError::missing_field("asn", format!("AS value '{value}'")))
}

pub fn as_comparison(value: &str) -> Result<String> {
    Ok(comparison(
        "autonomous-system:number",
        &parse_as_number(value)?.to_string(),
    ))
}

/// Validated hash comparison. The value is stripped of stray quoting and
/// backslashes before validation; a format mismatch is the recoverable
/// [`ConversionError::InvalidHashValue`] outcome the dispatch boundary
/// downgrades to a custom fallback.
pub fn hash_comparison(prefix: &str, attribute_type: &str, value: &str) -> Result<String> {
    let value = strip_wrapping_quotes(value).trim_matches('\\');
    let hash_type = normalize_hash_type(attribute_type);
    if !check_hash_format(&hash_type, value) {
        return Err(ConversionError::invalid_hash(hash_type, value));
    }
    Ok(comparison(&format!("{prefix}.{hash_type}"), value))
}

/// `filename|hash` composite: filename term plus validated hash term.
pub fn filename_hash_comparison(hash_type: &str, value: &str, separator: &str) -> Result<String> {
    let (filename, hash_value) = value
        .split_once(separator)
        .ok_or_else(|| ConversionError::composite(hash_type, value))?;
    Ok(format!(
        "{} AND {}",
        filename_comparison(filename),
        hash_comparison("file:hashes", hash_type, hash_value)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_handles_quotes_and_backslashes() {
        assert_eq!(escape_value("plain.example"), "plain.example");
        assert_eq!(escape_value("'quoted'"), "quoted");
        assert_eq!(escape_value("it's"), "it\\'s");
        assert_eq!(
            escape_value(r"HKLM\Software\Run"),
            r"HKLM\\Software\\Run"
        );
        assert_eq!(escape_value(r"%APPDATA%"), r"\\%APPDATA\\%");
    }

    #[test]
    fn hash_type_normalization() {
        assert_eq!(normalize_hash_type("sha256"), "SHA256");
        assert_eq!(normalize_hash_type("sha-1"), "SHA1");
        assert_eq!(normalize_hash_type("sha512/224"), "SHA224");
        assert_eq!(normalize_hash_type("ssdeep"), "SSDEEP");
    }

    #[test]
    fn hash_format_checks() {
        assert!(check_hash_format("MD5", "b2a5abfeef9e36964281a31e17b57c97"));
        assert!(!check_hash_format("SHA256", "tooshort"));
        assert!(check_hash_format(
            "SSDEEP",
            "96:QRWkwoBevsL0JsIQ3pq8dkbuZHSodDtEvrG:QRWktBe80JsIIq8kbuZHDDtEvrG"
        ));
        // Unknown algorithms pass through.
        assert!(check_hash_format("WHIRLPOOL", "whatever"));
    }

    #[test]
    fn hash_comparison_rejects_malformed_value() {
        let error = hash_comparison("file:hashes", "sha256", "0123456789").unwrap_err();
        assert!(error.is_recoverable());
        let term =
            hash_comparison("file:hashes", "md5", "b2a5abfeef9e36964281a31e17b57c97").unwrap();
        assert_eq!(
            term,
            "file:hashes.MD5 = 'b2a5abfeef9e36964281a31e17b57c97'"
        );
    }

    #[test]
    fn as_number_parsing() {
        assert_eq!(parse_as_number("AS174").unwrap(), 174);
        assert_eq!(parse_as_number("174").unwrap(), 174);
        assert!(parse_as_number("ASN-none").is_err());
    }

    #[test]
    fn ip_comparison_picks_address_type() {
        assert_eq!(
            ip_comparison("dst", "8.8.8.8"),
            "network-traffic:dst_ref.type = 'ipv4-addr' AND network-traffic:dst_ref.value = '8.8.8.8'"
        );
        assert!(ip_comparison("src", "2001:db8::1").contains("ipv6-addr"));
    }

    #[test]
    fn filename_hash_composite() {
        let term = filename_hash_comparison(
            "md5",
            "invoice.doc|b2a5abfeef9e36964281a31e17b57c97",
            "|",
        )
        .unwrap();
        assert_eq!(
            term,
            "file:name = 'invoice.doc' AND file:hashes.MD5 = 'b2a5abfeef9e36964281a31e17b57c97'"
        );
    }
}
