//! Static mapping tables shared by both conversion directions.
//!
//! Pure data: field-name dictionaries, type registries and relationship
//! verb tables. Anything a table does not cover is preserved by the
//! converters as `x_misp_*` custom properties rather than dropped.

pub mod attribute;
pub mod galaxy;
pub mod object;

/// Separators tried, in priority order, when splitting a composite value.
pub const COMPOSITE_SEPARATORS: &[&str] = &["|", " - "];

/// MISP attribute types that carry a hash value.
pub const HASH_ATTRIBUTE_TYPES: &[&str] = &[
    "md5", "sha1", "sha224", "sha256", "sha384", "sha512", "ssdeep", "imphash", "authentihash",
    "telfhash", "vhash",
];

/// STIX hash dictionary key -> MISP hash attribute type.
pub const HASH_KEY_TO_MISP: &[(&str, &str)] = &[
    ("MD5", "md5"),
    ("SHA1", "sha1"),
    ("SHA-1", "sha1"),
    ("SHA224", "sha224"),
    ("SHA256", "sha256"),
    ("SHA-256", "sha256"),
    ("SHA384", "sha384"),
    ("SHA512", "sha512"),
    ("SHA-512", "sha512"),
    ("SSDEEP", "ssdeep"),
    ("IMPHASH", "imphash"),
    ("TELFHASH", "telfhash"),
    ("VHASH", "vhash"),
];

pub fn misp_hash_type(stix_key: &str) -> Option<&'static str> {
    HASH_KEY_TO_MISP
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(stix_key) || *key == stix_key)
        .map(|(_, misp)| *misp)
}

/// Sanitizes a meta-field key into an `x_misp_*` suffix.
pub fn sanitize_custom_key(key: &str) -> String {
    key.replace([' ', '.', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_lookup() {
        assert_eq!(misp_hash_type("SHA-256"), Some("sha256"));
        assert_eq!(misp_hash_type("SHA256"), Some("sha256"));
        assert_eq!(misp_hash_type("NOPE"), None);
    }

    #[test]
    fn custom_key_sanitization() {
        assert_eq!(sanitize_custom_key("attribution-confidence"), "attribution_confidence");
        assert_eq!(sanitize_custom_key("cfr.suspected victims"), "cfr_suspected_victims");
    }
}
