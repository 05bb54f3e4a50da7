//! Attribute type -> handler registry for the outbound direction.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Handler selector for a MISP attribute type. Types absent from the
/// registry fall back to the custom-attribute handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Attachment,
    AutonomousSystem,
    CampaignName,
    Domain,
    DomainIp,
    Email,
    EmailAttachment,
    EmailBody,
    EmailDestination,
    EmailHeader,
    EmailReplyTo,
    EmailSource,
    EmailSubject,
    EmailXMailer,
    Filename,
    GithubUsername,
    Hash,
    HashComposite,
    HostnamePort,
    HttpMethod,
    Ip,
    IpPort,
    MacAddress,
    MalwareSample,
    Mutex,
    Port,
    Regkey,
    RegkeyValue,
    SizeInBytes,
    Url,
    UserAgent,
    Vulnerability,
    X509Fingerprint,
}

static ATTRIBUTE_REGISTRY: Lazy<HashMap<&'static str, AttributeKind>> = Lazy::new(|| {
    use AttributeKind::*;
    let mut registry = HashMap::new();
    registry.insert("AS", AutonomousSystem);
    registry.insert("attachment", Attachment);
    registry.insert("campaign-name", CampaignName);
    registry.insert("domain", Domain);
    registry.insert("hostname", Domain);
    registry.insert("domain|ip", DomainIp);
    registry.insert("email", Email);
    registry.insert("email-attachment", EmailAttachment);
    registry.insert("email-body", EmailBody);
    registry.insert("email-dst", EmailDestination);
    registry.insert("email-header", EmailHeader);
    registry.insert("email-reply-to", EmailReplyTo);
    registry.insert("email-src", EmailSource);
    registry.insert("email-subject", EmailSubject);
    registry.insert("email-x-mailer", EmailXMailer);
    registry.insert("filename", Filename);
    registry.insert("github-username", GithubUsername);
    for hash_type in super::HASH_ATTRIBUTE_TYPES {
        registry.insert(*hash_type, Hash);
    }
    registry.insert("filename|md5", HashComposite);
    registry.insert("filename|sha1", HashComposite);
    registry.insert("filename|sha224", HashComposite);
    registry.insert("filename|sha256", HashComposite);
    registry.insert("filename|sha384", HashComposite);
    registry.insert("filename|sha512", HashComposite);
    registry.insert("filename|ssdeep", HashComposite);
    registry.insert("filename|imphash", HashComposite);
    registry.insert("hostname|port", HostnamePort);
    registry.insert("http-method", HttpMethod);
    registry.insert("ip-src", Ip);
    registry.insert("ip-dst", Ip);
    registry.insert("ip-src|port", IpPort);
    registry.insert("ip-dst|port", IpPort);
    registry.insert("mac-address", MacAddress);
    registry.insert("malware-sample", MalwareSample);
    registry.insert("mutex", Mutex);
    registry.insert("port", Port);
    registry.insert("regkey", Regkey);
    registry.insert("regkey|value", RegkeyValue);
    registry.insert("size-in-bytes", SizeInBytes);
    registry.insert("url", Url);
    registry.insert("uri", Url);
    registry.insert("link", Url);
    registry.insert("user-agent", UserAgent);
    registry.insert("vulnerability", Vulnerability);
    registry.insert("x509-fingerprint-md5", X509Fingerprint);
    registry.insert("x509-fingerprint-sha1", X509Fingerprint);
    registry.insert("x509-fingerprint-sha256", X509Fingerprint);
    registry
});

pub fn attribute_kind(attribute_type: &str) -> Option<AttributeKind> {
    ATTRIBUTE_REGISTRY.get(attribute_type).copied()
}

/// Email header fields addressed by the single-field email attribute types,
/// as `(pattern path, observable property)` pairs.
pub fn email_message_feature(kind: AttributeKind) -> Option<(&'static str, &'static str)> {
    use AttributeKind::*;
    match kind {
        EmailBody => Some(("email-message:body", "body")),
        EmailHeader => Some(("email-message:received_lines", "received_lines")),
        EmailSubject => Some(("email-message:subject", "subject")),
        EmailXMailer => Some((
            "email-message:additional_header_fields.x_mailer",
            "X-Mailer",
        )),
        EmailReplyTo => Some((
            "email-message:additional_header_fields.reply_to",
            "Reply-To",
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_composites_and_hashes() {
        assert_eq!(attribute_kind("domain|ip"), Some(AttributeKind::DomainIp));
        assert_eq!(attribute_kind("sha256"), Some(AttributeKind::Hash));
        assert_eq!(
            attribute_kind("filename|sha256"),
            Some(AttributeKind::HashComposite)
        );
        assert_eq!(attribute_kind("ip-dst|port"), Some(AttributeKind::IpPort));
        assert_eq!(attribute_kind("completely-unknown"), None);
    }
}
