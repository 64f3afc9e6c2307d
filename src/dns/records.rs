//! DNS record queries (A, AAAA, MX, NS, TXT).
//!
//! "No records of this type" is an empty answer, not an error. NXDOMAIN is
//! reported separately so callers can tell a missing name from a broken lookup.

use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;

use super::{DnsError, MxRecord};

/// Classifies a resolver error.
///
/// `Ok(())` means the name exists but has no records of the queried type.
pub(crate) fn classify(domain: &str, err: ResolveError) -> Result<(), DnsError> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::NXDomain {
                Err(DnsError::NxDomain(domain.to_string()))
            } else {
                Ok(())
            }
        }
        ResolveErrorKind::Timeout => Err(DnsError::Timeout(domain.to_string())),
        _ => Err(DnsError::Resolve(err.to_string())),
    }
}

async fn lookup<T>(
    resolver: &TokioAsyncResolver,
    domain: &str,
    record_type: RecordType,
    extract: impl Fn(&RData) -> Option<T>,
) -> Result<Vec<T>, DnsError> {
    match resolver.lookup(domain, record_type).await {
        Ok(answer) => Ok(answer.iter().filter_map(extract).collect()),
        Err(e) => {
            classify(domain, e).map_err(|err| {
                if !matches!(err, DnsError::NxDomain(_)) {
                    log::warn!("{record_type} lookup failed for {domain}: {err}");
                }
                err
            })?;
            Ok(Vec::new())
        }
    }
}

pub async fn lookup_a_records(domain: &str, resolver: &TokioAsyncResolver) -> Result<Vec<String>, DnsError> {
    lookup(resolver, domain, RecordType::A, |rdata| match rdata {
        RData::A(a) => Some(a.to_string()),
        _ => None,
    })
    .await
}

pub async fn lookup_aaaa_records(
    domain: &str,
    resolver: &TokioAsyncResolver,
) -> Result<Vec<String>, DnsError> {
    lookup(resolver, domain, RecordType::AAAA, |rdata| match rdata {
        RData::AAAA(aaaa) => Some(aaaa.to_string()),
        _ => None,
    })
    .await
}

/// Nameserver hostnames, lowercase without the trailing dot.
pub async fn lookup_ns_records(domain: &str, resolver: &TokioAsyncResolver) -> Result<Vec<String>, DnsError> {
    lookup(resolver, domain, RecordType::NS, |rdata| match rdata {
        RData::NS(ns) => Some(ns.to_utf8().trim_end_matches('.').to_lowercase()),
        _ => None,
    })
    .await
}

pub async fn lookup_txt_records(
    domain: &str,
    resolver: &TokioAsyncResolver,
) -> Result<Vec<String>, DnsError> {
    lookup(resolver, domain, RecordType::TXT, |rdata| match rdata {
        // TXT records can contain multiple strings - join them
        RData::TXT(txt) => Some(
            txt.iter()
                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                .collect::<Vec<String>>()
                .join(""),
        ),
        _ => None,
    })
    .await
}

/// MX records sorted by preference (lower = higher priority).
pub async fn lookup_mx_records(
    domain: &str,
    resolver: &TokioAsyncResolver,
) -> Result<Vec<MxRecord>, DnsError> {
    let mut records = lookup(resolver, domain, RecordType::MX, |rdata| match rdata {
        RData::MX(mx) => Some(MxRecord {
            preference: mx.preference(),
            exchange: mx.exchange().to_utf8().trim_end_matches('.').to_lowercase(),
        }),
        _ => None,
    })
    .await?;
    records.sort_by_key(|mx| mx.preference);
    Ok(records)
}
