//! `grpc-timeout` header parsing. The wire grammar here is gRPC-standard
//! and not something to reinvent.

use http::HeaderValue;
use std::time::Duration;

const SECONDS_IN_HOUR: u64 = 60 * 60;
const SECONDS_IN_MINUTE: u64 = 60;

/// Parses a `grpc-timeout` header value. Returns `Ok(None)` for an absent
/// value is not representable here (the caller checks presence); `Err`
/// echoes the unparseable value back so callers can log it without cloning
/// twice.
pub fn parse_grpc_timeout(val: &HeaderValue) -> Result<Option<Duration>, &HeaderValue> {
    let (timeout_value, timeout_unit) = val
        .to_str()
        .map_err(|_| val)
        .and_then(|s| if s.is_empty() { Err(val) } else { Ok(s) })?
        .split_at(val.len() - 1);

    // The gRPC spec caps TimeoutValue at 8 digits; this also prevents
    // integer overflow below.
    if timeout_value.len() > 8 {
        return Err(val);
    }

    let timeout_value: u64 = timeout_value.parse().map_err(|_| val)?;

    let duration = match timeout_unit {
        "H" => Duration::from_secs(timeout_value * SECONDS_IN_HOUR),
        "M" => Duration::from_secs(timeout_value * SECONDS_IN_MINUTE),
        "S" => Duration::from_secs(timeout_value),
        "m" => Duration::from_millis(timeout_value),
        "u" => Duration::from_micros(timeout_value),
        "n" => Duration::from_nanos(timeout_value),
        _ => return Err(val),
    };

    Ok(Some(duration))
}

/// The shorter-wins combination rule: when both a client-supplied
/// `grpc-timeout` and a server-configured default deadline exist, the
/// shorter one applies.
pub fn shorter_of(client: Option<Duration>, server: Option<Duration>) -> Option<Duration> {
    match (client, server) {
        (None, None) => None,
        (Some(d), None) | (None, Some(d)) => Some(d),
        (Some(a), Some(b)) => Some(std::cmp::min(a, b)),
    }
}
