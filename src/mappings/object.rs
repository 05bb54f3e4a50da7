//! Per-object-type field dictionaries for the outbound direction and the
//! observable-property dictionaries for the inbound direction.
//!
//! Outbound tables are ordered `(relation, property path)` pairs: pattern
//! terms are appended in table order, which keeps decomposition
//! deterministic. `*_SINGLE_FIELDS` lists the relations forced into the
//! single-value accumulator; `*_DATA_FIELDS` lists the relations that pair
//! their value with an attached binary payload.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Asn,
    AttackPattern,
    CourseOfAction,
    Credential,
    DomainIp,
    Email,
    File,
    IpPort,
    Mutex,
    NetworkConnection,
    NetworkSocket,
    Pe,
    PeSection,
    RegistryKey,
    Url,
    Vulnerability,
}

static OBJECT_REGISTRY: Lazy<HashMap<&'static str, ObjectKind>> = Lazy::new(|| {
    use ObjectKind::*;
    let mut registry = HashMap::new();
    registry.insert("asn", Asn);
    registry.insert("attack-pattern", AttackPattern);
    registry.insert("course-of-action", CourseOfAction);
    registry.insert("credential", Credential);
    registry.insert("domain-ip", DomainIp);
    registry.insert("email", Email);
    registry.insert("file", File);
    registry.insert("ip-port", IpPort);
    registry.insert("mutex", Mutex);
    registry.insert("network-connection", NetworkConnection);
    registry.insert("network-socket", NetworkSocket);
    registry.insert("pe", Pe);
    registry.insert("pe-section", PeSection);
    registry.insert("registry-key", RegistryKey);
    registry.insert("url", Url);
    registry.insert("vulnerability", Vulnerability);
    registry
});

pub fn object_kind(name: &str) -> Option<ObjectKind> {
    OBJECT_REGISTRY.get(name).copied()
}

pub const ASN_MAPPING: &[(&str, &str)] = &[("description", "name")];
pub const ASN_SINGLE_FIELDS: &[&str] = &["asn", "description"];

pub const ATTACK_PATTERN_MAPPING: &[(&str, &str)] =
    &[("name", "name"), ("summary", "description")];
pub const ATTACK_PATTERN_SINGLE_FIELDS: &[&str] = &["name", "summary"];

pub const COURSE_OF_ACTION_MAPPING: &[(&str, &str)] =
    &[("name", "name"), ("description", "description")];

pub const CREDENTIAL_MAPPING: &[(&str, &str)] =
    &[("username", "user_id"), ("password", "credential")];
pub const CREDENTIAL_SINGLE_FIELDS: &[&str] = &["username"];

pub const DOMAIN_IP_MAPPING: &[(&str, &str)] = &[
    ("domain", "value"),
    ("hostname", "value"),
    ("ip", "resolves_to_refs[*].value"),
];
pub const DOMAIN_IP_STANDARD_FIELDS: &[&str] = &["domain", "hostname", "ip"];

pub const EMAIL_MAPPING: &[(&str, &str)] = &[
    ("from", "from_ref.value"),
    ("from-display-name", "from_ref.display_name"),
    ("to", "to_refs[*].value"),
    ("cc", "cc_refs[*].value"),
    ("bcc", "bcc_refs[*].value"),
    ("subject", "subject"),
    ("message-id", "message_id"),
    ("reply-to", "additional_header_fields.reply_to"),
    ("x-mailer", "additional_header_fields.x_mailer"),
    ("send-date", "date"),
    ("email-body", "body"),
];
pub const EMAIL_SINGLE_FIELDS: &[&str] = &[
    "from",
    "from-display-name",
    "subject",
    "message-id",
    "x-mailer",
    "send-date",
    "email-body",
];
pub const EMAIL_DATA_FIELDS: &[&str] = &["attachment", "screenshot"];

pub const FILE_MAPPING: &[(&str, &str)] = &[
    ("filename", "name"),
    ("file-encoding", "name_enc"),
    ("mime-type", "mime_type"),
    ("size-in-bytes", "size"),
];
pub const FILE_TIME_FIELDS: &[(&str, &str)] = &[
    ("access-time", "atime"),
    ("creation-time", "ctime"),
    ("modification-time", "mtime"),
];
pub const FILE_SINGLE_FIELDS: &[&str] = &[
    "attachment",
    "authentihash",
    "entropy",
    "imphash",
    "malware-sample",
    "md5",
    "sha1",
    "sha224",
    "sha256",
    "sha384",
    "sha512",
    "size-in-bytes",
    "ssdeep",
    "telfhash",
    "vhash",
];
pub const FILE_DATA_FIELDS: &[&str] = &["attachment", "malware-sample"];

pub const IP_PORT_MAPPING: &[(&str, &str)] = &[
    ("dst-port", "dst_port"),
    ("src-port", "src_port"),
    ("first-seen", "start"),
    ("last-seen", "end"),
];
/// Relations of the ip-port object holding the address itself.
pub const IP_PORT_IP_FIELDS: &[(&str, &str)] = &[("ip", "dst"), ("ip-dst", "dst"), ("ip-src", "src")];
pub const IP_PORT_SINGLE_FIELDS: &[&str] = &["first-seen", "last-seen"];

pub const MUTEX_MAPPING: &[(&str, &str)] = &[("name", "name")];
pub const MUTEX_SINGLE_FIELDS: &[&str] = &["name"];

pub const NETWORK_TRAFFIC_MAPPING: &[(&str, &str)] = &[
    ("src-port", "src_port"),
    ("dst-port", "dst_port"),
];
pub const NETWORK_TRAFFIC_IP_FIELDS: &[(&str, &str)] =
    &[("ip-src", "src"), ("ip-dst", "dst")];
pub const NETWORK_TRAFFIC_HOSTNAME_FIELDS: &[(&str, &str)] =
    &[("hostname-src", "src"), ("hostname-dst", "dst")];
pub const NETWORK_CONNECTION_PROTOCOL_FIELDS: &[&str] = &[
    "layer3-protocol",
    "layer4-protocol",
    "layer7-protocol",
];
pub const NETWORK_SOCKET_MAPPING: &[(&str, &str)] = &[(
    "address-family",
    "extensions.'socket-ext'.address_family",
)];
pub const NETWORK_SOCKET_STATE_FIELDS: &[(&str, &str)] = &[
    ("listening", "extensions.'socket-ext'.is_listening"),
    ("blocking", "extensions.'socket-ext'.is_blocking"),
];
pub const NETWORK_SOCKET_SINGLE_FIELDS: &[&str] = &[
    "address-family",
    "dst-port",
    "src-port",
    "protocol",
];

pub const PE_MAPPING: &[(&str, &str)] = &[
    ("type", "pe_type"),
    ("imphash", "imphash"),
    ("number-sections", "number_of_sections"),
];
pub const PE_SINGLE_FIELDS: &[&str] = &[
    "type",
    "imphash",
    "number-sections",
    "entrypoint-address",
    "original-filename",
    "internal-filename",
    "compilation-timestamp",
];

pub const PE_SECTION_MAPPING: &[(&str, &str)] = &[
    ("name", "name"),
    ("size-in-bytes", "size"),
    ("entropy", "entropy"),
];
pub const PE_SECTION_SINGLE_FIELDS: &[&str] = &[
    "name",
    "size-in-bytes",
    "entropy",
    "md5",
    "sha1",
    "sha256",
    "sha512",
    "ssdeep",
];

pub const REGISTRY_KEY_MAPPING: &[(&str, &str)] = &[
    ("key", "key"),
    ("last-modified", "modified_time"),
];
pub const REGISTRY_KEY_VALUE_MAPPING: &[(&str, &str)] = &[
    ("data", "values[*].data"),
    ("data-type", "values[*].data_type"),
    ("name", "values[*].name"),
];
pub const REGISTRY_KEY_SINGLE_FIELDS: &[&str] = &[
    "key",
    "last-modified",
    "data",
    "data-type",
    "name",
    "hive",
];

pub const URL_MAPPING: &[(&str, &str)] = &[("url", "value")];
pub const URL_SINGLE_FIELDS: &[&str] = &["url"];

pub const VULNERABILITY_MAPPING: &[(&str, &str)] =
    &[("id", "name"), ("summary", "description")];
pub const VULNERABILITY_SINGLE_FIELDS: &[&str] = &["id", "summary"];

/// MISP protocol relation from a network protocol value, by layer.
pub fn protocol_layer(protocol: &str) -> &'static str {
    match protocol.to_ascii_lowercase().as_str() {
        "ip" | "ipv4" | "ipv6" | "icmp" | "arp" => "layer3-protocol",
        "tcp" | "udp" | "sctp" => "layer4-protocol",
        _ => "layer7-protocol",
    }
}

// ---------------------------------------------------------------------------
// Inbound dictionaries: observable property -> (MISP type, object relation)
// ---------------------------------------------------------------------------

pub const FILE_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("name", ("filename", "filename")),
    ("name_enc", ("text", "file-encoding")),
    ("mime_type", ("mime-type", "mimetype")),
    ("size", ("size-in-bytes", "size-in-bytes")),
    ("atime", ("datetime", "access-time")),
    ("ctime", ("datetime", "creation-time")),
    ("mtime", ("datetime", "modification-time")),
];

pub const DIRECTORY_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("path", ("text", "path")),
    ("path_enc", ("text", "path-encoding")),
    ("atime", ("datetime", "access-time")),
    ("ctime", ("datetime", "creation-time")),
    ("mtime", ("datetime", "modification-time")),
];

pub const ARTIFACT_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("mime_type", ("mime-type", "mime-type")),
    ("url", ("url", "url")),
];

pub const EMAIL_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("subject", ("email-subject", "subject")),
    ("message_id", ("email-message-id", "message-id")),
    ("date", ("datetime", "send-date")),
    ("body", ("text", "email-body")),
];

pub const EMAIL_HEADER_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("Reply-To", ("email-reply-to", "reply-to")),
    ("X-Mailer", ("email-x-mailer", "x-mailer")),
];

pub const PROCESS_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("pid", ("text", "pid")),
    ("command_line", ("text", "command-line")),
    ("cwd", ("text", "current-directory")),
    ("created_time", ("datetime", "creation-time")),
];

pub const SOFTWARE_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("name", ("text", "name")),
    ("cpe", ("cpe", "cpe")),
    ("swid", ("text", "swid")),
    ("vendor", ("text", "vendor")),
    ("version", ("text", "version")),
];

pub const USER_ACCOUNT_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("user_id", ("text", "user-id")),
    ("account_login", ("text", "username")),
    ("display_name", ("text", "display-name")),
    ("account_type", ("text", "account-type")),
    ("credential", ("text", "password")),
];

pub const REGISTRY_KEY_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("key", ("regkey", "key")),
    ("modified_time", ("datetime", "last-modified")),
];

pub const REGISTRY_VALUE_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("data", ("text", "data")),
    ("data_type", ("text", "data-type")),
    ("name", ("text", "name")),
];

pub const X509_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("serial_number", ("text", "serial-number")),
    ("issuer", ("text", "issuer")),
    ("subject", ("text", "subject")),
    ("version", ("text", "version")),
    ("validity_not_before", ("datetime", "validity-not-before")),
    ("validity_not_after", ("datetime", "validity-not-after")),
    (
        "subject_public_key_algorithm",
        ("text", "pubkey-info-algorithm"),
    ),
    ("subject_public_key_modulus", ("text", "pubkey-info-modulus")),
    (
        "subject_public_key_exponent",
        ("text", "pubkey-info-exponent"),
    ),
];

pub const X509_HASH_INBOUND_MAPPING: &[(&str, (&str, &str))] = &[
    ("MD5", ("x509-fingerprint-md5", "x509-fingerprint-md5")),
    ("SHA-1", ("x509-fingerprint-sha1", "x509-fingerprint-sha1")),
    ("SHA1", ("x509-fingerprint-sha1", "x509-fingerprint-sha1")),
    (
        "SHA-256",
        ("x509-fingerprint-sha256", "x509-fingerprint-sha256"),
    ),
    (
        "SHA256",
        ("x509-fingerprint-sha256", "x509-fingerprint-sha256"),
    ),
];
