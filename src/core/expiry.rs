// Value envelope carrying an optional expiry deadline for the flat backend.
//
// Layout: tag byte, then for expiring values an 8-byte big-endian unix-millis
// deadline, then the payload.
use std::time::Duration;

use time::OffsetDateTime;

const TAG_PLAIN: u8 = 0;
const TAG_EXPIRING: u8 = 1;
const DEADLINE_LEN: usize = 8;

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Stored<'a> {
    Live(&'a [u8]),
    Expired,
    Malformed,
}

pub(crate) fn now_millis() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}

pub(crate) fn wrap(value: &[u8], ttl: Option<Duration>, now_ms: u64) -> Vec<u8> {
    match ttl {
        None => {
            let mut out = Vec::with_capacity(value.len() + 1);
            out.push(TAG_PLAIN);
            out.extend_from_slice(value);
            out
        }
        Some(ttl) => {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            let deadline = now_ms.saturating_add(ttl_ms);
            let mut out = Vec::with_capacity(value.len() + 1 + DEADLINE_LEN);
            out.push(TAG_EXPIRING);
            out.extend_from_slice(&deadline.to_be_bytes());
            out.extend_from_slice(value);
            out
        }
    }
}

pub(crate) fn unwrap(stored: &[u8], now_ms: u64) -> Stored<'_> {
    match stored.split_first() {
        Some((&TAG_PLAIN, payload)) => Stored::Live(payload),
        Some((&TAG_EXPIRING, rest)) if rest.len() >= DEADLINE_LEN => {
            let (deadline, payload) = rest.split_at(DEADLINE_LEN);
            let mut buf = [0u8; DEADLINE_LEN];
            buf.copy_from_slice(deadline);
            if now_ms < u64::from_be_bytes(buf) {
                Stored::Live(payload)
            } else {
                Stored::Expired
            }
        }
        _ => Stored::Malformed,
    }
}
