//! Share-log record layout
//!
//! Fixed binary layout consumed by the downstream share accounting
//! pipeline; field order and widths must not change.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Fullname field width in the share record
pub const FULLNAME_LIMIT: usize = 46;

/// Outcome of a share submission
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// Share was rejected (invalid, stale, duplicate or low difficulty)
    Reject = 0,
    /// Share was accepted by the upstream node
    Accept,
}

/// Worker address as a reversed-octet IPv4 integer
///
/// Non-IPv4 addresses map to 0.
pub(crate) fn inet_addr(worker_addr: &str) -> u32 {
    let host = worker_addr.split(':').next().unwrap_or(worker_addr);
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            let [a, b, c, d] = ip.octets();
            u32::from(Ipv4Addr::new(d, c, b, a))
        }
        Err(_) => 0,
    }
}

/// Fullname padded (NUL) or truncated to the record width
pub(crate) fn fixed_fullname(fullname: &str) -> [char; FULLNAME_LIMIT] {
    let mut result = ['\0'; FULLNAME_LIMIT];
    for (slot, ch) in result.iter_mut().zip(fullname.chars()) {
        *slot = ch;
    }
    result
}

/// One share-log record
#[repr(C)]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Share {
    /// Job the share was submitted for
    pub job_id: u64,
    /// Reserved, always 0
    pub worker_hash_id: i64,
    /// Share difficulty required of the worker
    pub difficulty: u64,
    /// Worker IPv4, reversed octets
    pub ip: u32,
    /// Pool-local worker id
    pub user_id: i32,
    /// Unix timestamp of the submission
    pub timestamp: u32,
    /// Reserved, always 0
    pub blkbits: u32,
    /// Accept/reject outcome
    pub result: i32,
    /// Block height of the share
    pub height: i32,
    /// Reserved, always 0
    pub share_diff: u64,
    /// Pool server id
    pub server_id: u16,
    /// Worker fullname, NUL-padded
    #[serde(with = "fullname_serde")]
    pub fullname: [char; FULLNAME_LIMIT],
}

impl Share {
    /// Build a record from a classified submission
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: u64,
        server_id: u16,
        worker_addr: &str,
        worker_id: i32,
        difficulty: u64,
        fullname: &str,
        result: SubmitResult,
        height: i32,
        timestamp: u32,
    ) -> Share {
        Share {
            job_id,
            difficulty,
            timestamp,
            height,

            worker_hash_id: 0,
            user_id: worker_id,
            blkbits: 0,
            share_diff: 0,

            result: result as i32,
            server_id,
            ip: inet_addr(worker_addr),
            fullname: fixed_fullname(fullname),
        }
    }
}

/// Serde shim for the fixed-width fullname field
///
/// Serialized as a 46-element tuple so bincode emits exactly 46 chars
/// with no length prefix.
mod fullname_serde {
    use super::FULLNAME_LIMIT;
    use serde::de::{SeqAccess, Visitor};
    use serde::ser::SerializeTuple;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        value: &[char; FULLNAME_LIMIT],
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let mut tup = ser.serialize_tuple(FULLNAME_LIMIT)?;
        for ch in value {
            tup.serialize_element(ch)?;
        }
        tup.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<[char; FULLNAME_LIMIT], D::Error> {
        struct FullnameVisitor;

        impl<'de> Visitor<'de> for FullnameVisitor {
            type Value = [char; FULLNAME_LIMIT];

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "an array of {} chars", FULLNAME_LIMIT)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut result = ['\0'; FULLNAME_LIMIT];
                for (i, slot) in result.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(result)
            }
        }

        de.deserialize_tuple(FULLNAME_LIMIT, FullnameVisitor)
    }
}
