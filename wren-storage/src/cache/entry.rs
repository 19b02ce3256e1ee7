//! On-disk value layout for TTL entries.
//!
//! ```text
//! [created_at: 8][updated_at: 8][expires_at: 8][payload...]
//! ```
//!
//! Timestamps are little-endian i64 milliseconds since the Unix epoch.

use chrono::{DateTime, Utc};

pub(crate) const HEADER_LEN: usize = 24;

/// Lifetime metadata stored in front of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryHeader {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EntryHeader {
    pub(crate) fn encode_with(&self, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&self.created_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&self.updated_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&self.expires_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Split a stored value into header and payload.
    pub(crate) fn decode(bytes: &[u8]) -> Result<(EntryHeader, &[u8]), String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!(
                "value is {} bytes, shorter than the {} byte header",
                bytes.len(),
                HEADER_LEN
            ));
        }
        let header = EntryHeader {
            created_at: read_millis(&bytes[0..8])?,
            updated_at: read_millis(&bytes[8..16])?,
            expires_at: read_millis(&bytes[16..24])?,
        };
        Ok((header, &bytes[HEADER_LEN..]))
    }

    pub(crate) fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

fn read_millis(bytes: &[u8]) -> Result<DateTime<Utc>, String> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| "invalid timestamp width".to_string())?;
    let millis = i64::from_le_bytes(raw);
    DateTime::from_timestamp_millis(millis).ok_or_else(|| format!("timestamp {} out of range", millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_header_layout() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).expect("valid");
        let header = EntryHeader {
            created_at: now,
            updated_at: now,
            expires_at: now + TimeDelta::seconds(1),
        };
        let bytes = header.encode_with(b"{}");
        assert_eq!(bytes.len(), HEADER_LEN + 2);
        assert_eq!(&bytes[0..8], &1_700_000_000_123i64.to_le_bytes());

        let (decoded, payload) = EntryHeader::decode(&bytes).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(payload, b"{}");
    }

    #[test]
    fn test_short_value_is_rejected() {
        let err = EntryHeader::decode(&[0u8; 10]).unwrap_err();
        assert!(err.contains("shorter"));
    }

    #[test]
    fn test_liveness_boundary() {
        let now = Utc::now();
        let header = EntryHeader {
            created_at: now - TimeDelta::seconds(5),
            updated_at: now - TimeDelta::seconds(5),
            expires_at: now,
        };
        assert!(!header.is_live(now));
        assert!(header.is_live(now - TimeDelta::milliseconds(1)));
    }
}
