//! WHOIS text parsing.
//!
//! Port-43 responses are free-form `Key: Value` text whose key names differ by
//! registry. The parser recognizes the common spellings of each field and the
//! usual "no match" phrasing for unregistered names.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DomainRecord, ProviderKind};

/// `Key: Value` with the key up to the first colon.
static FIELD_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 /()_.\-]*?)\s*:\s*(.*?)\s*$").ok());

const NO_MATCH_MARKERS: &[&str] = &[
    "no match for",
    "not found",
    "no data found",
    "no entries found",
    "no object found",
    "domain not found",
    "is available for registration",
    "status: free",
    "status: available",
];

const REGISTRAR_KEYS: &[&str] = &["registrar", "registrar name", "sponsoring registrar"];
const CREATED_KEYS: &[&str] = &[
    "creation date",
    "created",
    "created on",
    "registered on",
    "registration time",
    "domain registration date",
];
const UPDATED_KEYS: &[&str] = &[
    "updated date",
    "last updated",
    "last modified",
    "last-update",
    "changed",
];
const EXPIRY_KEYS: &[&str] = &[
    "registry expiry date",
    "registrar registration expiration date",
    "expiration date",
    "expiry date",
    "expires",
    "expires on",
    "expire date",
    "paid-till",
];
const STATUS_KEYS: &[&str] = &["domain status", "status", "state"];
const NAME_SERVER_KEYS: &[&str] = &["name server", "nameserver", "nserver", "name servers"];
const REFERRAL_KEYS: &[&str] = &["registrar whois server", "whois server"];

/// Fields pulled out of one WHOIS response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoisFields {
    pub registrar: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: Vec<String>,
    pub name_servers: Vec<String>,
    /// `Registrar WHOIS Server:` value, if the registry pointed elsewhere
    pub referral: Option<String>,
    pub not_found: bool,
}

impl WhoisFields {
    /// True when the response carried any registration detail.
    pub fn has_details(&self) -> bool {
        self.registrar.is_some()
            || self.creation_date.is_some()
            || self.expiry_date.is_some()
            || !self.name_servers.is_empty()
    }

    /// Fills gaps in `self` from `other`. Values already present win.
    pub fn merge_missing(&mut self, other: WhoisFields) {
        if self.registrar.is_none() {
            self.registrar = other.registrar;
        }
        self.creation_date = self.creation_date.or(other.creation_date);
        self.updated_date = self.updated_date.or(other.updated_date);
        self.expiry_date = self.expiry_date.or(other.expiry_date);
        if self.status.is_empty() {
            self.status = other.status;
        }
        if self.name_servers.is_empty() {
            self.name_servers = other.name_servers;
        }
    }

    pub fn into_record(self, domain: &str, source: ProviderKind) -> DomainRecord {
        if self.not_found && !self.has_details() {
            return DomainRecord::available(domain, source);
        }
        let mut record = DomainRecord::registered(domain, source);
        record.registrar = self.registrar;
        record.creation_date = self.creation_date;
        record.updated_date = self.updated_date;
        record.expiry_date = self.expiry_date;
        record.status = self.status;
        record.name_servers = self.name_servers;
        record.normalize_name_servers();
        record
    }
}

/// Parses a raw WHOIS response.
pub fn parse_whois_text(text: &str) -> WhoisFields {
    let mut fields = WhoisFields::default();
    let lowered = text.to_lowercase();
    fields.not_found = NO_MATCH_MARKERS.iter().any(|m| lowered.contains(m));

    let Some(line_re) = FIELD_LINE.as_ref() else {
        return fields;
    };

    for line in text.lines() {
        // Comment and notice lines
        if line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
            continue;
        }
        let Some(caps) = line_re.captures(line) else {
            continue;
        };
        let key = caps[1].to_lowercase();
        let value = caps[2].trim();
        if value.is_empty() {
            continue;
        }
        let key = key.as_str();

        if REGISTRAR_KEYS.contains(&key) && fields.registrar.is_none() {
            fields.registrar = Some(value.to_string());
        } else if CREATED_KEYS.contains(&key) && fields.creation_date.is_none() {
            fields.creation_date = parse_date_string(value);
        } else if UPDATED_KEYS.contains(&key) && fields.updated_date.is_none() {
            fields.updated_date = parse_date_string(value);
        } else if EXPIRY_KEYS.contains(&key) && fields.expiry_date.is_none() {
            fields.expiry_date = parse_date_string(value);
        } else if STATUS_KEYS.contains(&key) {
            // "clientTransferProhibited https://icann.org/epp#..." keeps the code only
            if let Some(code) = value.split_whitespace().next().map(|c| c.trim_end_matches(',')) {
                if !fields.status.iter().any(|s| s == code) {
                    fields.status.push(code.to_string());
                }
            }
        } else if NAME_SERVER_KEYS.contains(&key) {
            if let Some(host) = value.split_whitespace().next() {
                fields.name_servers.push(host.to_lowercase());
            }
        } else if REFERRAL_KEYS.contains(&key) && fields.referral.is_none() {
            fields.referral = Some(value.to_string());
        }
    }

    fields
}

/// Extracts the `refer:` (or `whois:`) server from an IANA response.
pub fn parse_iana_referral(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if (key == "refer" || key == "whois") && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

/// Attempts to parse a date string in the formats registries commonly use.
pub fn parse_date_string(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d",
        "%Y.%m.%d",
        "%d-%b-%Y",
        "%d.%m.%Y",
        "%d/%m/%Y",
    ];

    for format in &formats {
        if let Ok(dt) = DateTime::parse_from_str(date_str, format) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive_dt) = chrono::NaiveDateTime::parse_from_str(date_str, format) {
            return Some(naive_dt.and_utc());
        }
        if let Ok(naive_date) = chrono::NaiveDate::parse_from_str(date_str, format) {
            return Some(naive_date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }

    // "2024-01-15 10:30:45 UTC", "2024-01-15T10:30:45Z (UTC)"
    let first = date_str.split_whitespace().next()?;
    if first != date_str {
        return parse_date_string(first);
    }
    None
}
