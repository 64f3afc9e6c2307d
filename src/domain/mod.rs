//! Domain input sanitization.
//!
//! Every query endpoint accepts loosely formatted input (`HTTPS://WWW.Example.COM/path`,
//! `example.com.`, `bücher.de`) and reduces it to the registrable domain in ASCII
//! form before it touches a cache key, a lock key or an upstream.
//!
//! Key functions:
//! - `sanitize_domain()` - Normalizes input to a registrable domain using the Public Suffix List
//! - `tld_of()` - Returns the last label of a sanitized domain

use thiserror::Error;

/// Longest permitted fully qualified name, in ASCII octets.
const MAX_DOMAIN_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain is empty")]
    Empty,
    #[error("IP addresses do not have registrable domains: {0}")]
    IpAddress(String),
    #[error("cannot parse '{0}' as a host name")]
    Unparseable(String),
    #[error("domain exceeds {MAX_DOMAIN_LENGTH} characters")]
    TooLong,
    #[error("label '{0}' exceeds {MAX_LABEL_LENGTH} characters")]
    LabelTooLong(String),
    #[error("invalid character in label '{0}'")]
    InvalidLabel(String),
    #[error("'{0}' is a public suffix, not a registrable domain")]
    PublicSuffix(String),
}

/// Reduces raw user input to a registrable domain.
///
/// Scheme, credentials, port, path, query and a trailing dot are stripped, the
/// host is lowercased and IDNA-encoded, and subdomains are removed using the
/// Public Suffix List (`www.example.co.uk` becomes `example.co.uk`).
///
/// # Errors
///
/// Returns a [`DomainError`] for empty input, IP literals, over-long names or
/// labels, and bare public suffixes.
pub fn sanitize_domain(input: &str) -> Result<String, DomainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }

    // url handles IDNA, case folding and IP literal detection for us
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let parsed =
        url::Url::parse(&candidate).map_err(|_| DomainError::Unparseable(trimmed.to_string()))?;

    let host = match parsed.host() {
        Some(url::Host::Domain(host)) => host.trim_end_matches('.').to_string(),
        Some(url::Host::Ipv4(ip)) => return Err(DomainError::IpAddress(ip.to_string())),
        Some(url::Host::Ipv6(ip)) => return Err(DomainError::IpAddress(ip.to_string())),
        None => return Err(DomainError::Unparseable(trimmed.to_string())),
    };

    if host.is_empty() {
        return Err(DomainError::Empty);
    }
    if host.len() > MAX_DOMAIN_LENGTH {
        return Err(DomainError::TooLong);
    }
    for label in host.split('.') {
        validate_label(label)?;
    }

    match psl::domain_str(&host) {
        Some(registrable) => Ok(registrable.to_string()),
        None => Err(DomainError::PublicSuffix(host)),
    }
}

fn validate_label(label: &str) -> Result<(), DomainError> {
    if label.is_empty() {
        return Err(DomainError::InvalidLabel(label.to_string()));
    }
    if label.len() > MAX_LABEL_LENGTH {
        return Err(DomainError::LabelTooLong(label.to_string()));
    }
    let valid_chars = label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_chars || label.starts_with('-') || label.ends_with('-') {
        return Err(DomainError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// Last label of a sanitized domain (`example.co.uk` gives `uk`).
pub fn tld_of(domain: &str) -> &str {
    domain.rsplit('.').next().unwrap_or(domain)
}
