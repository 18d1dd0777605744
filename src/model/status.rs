//! Protocol status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 32-bit OPC UA status code.
///
/// The top two bits carry the severity (00 good, 01 uncertain, 10 bad);
/// the low 16 bits carry info bits such as the queue-overflow flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    pub const BAD: StatusCode = StatusCode(0x8000_0000);

    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_NOTHING_TO_DO: StatusCode = StatusCode(0x800F_0000);
    pub const BAD_TOO_MANY_OPERATIONS: StatusCode = StatusCode(0x8010_0000);
    pub const BAD_USER_ACCESS_DENIED: StatusCode = StatusCode(0x801F_0000);
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8025_0000);
    pub const BAD_TOO_MANY_SESSIONS: StatusCode = StatusCode(0x8056_0000);
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x8028_0000);
    pub const BAD_NODE_ID_INVALID: StatusCode = StatusCode(0x8033_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    pub const BAD_INDEX_RANGE_INVALID: StatusCode = StatusCode(0x8036_0000);
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    pub const BAD_NOT_SUPPORTED: StatusCode = StatusCode(0x803D_0000);
    pub const BAD_NOT_FOUND: StatusCode = StatusCode(0x803E_0000);
    pub const BAD_MONITORED_ITEM_ID_INVALID: StatusCode = StatusCode(0x8042_0000);
    pub const BAD_MONITORED_ITEM_FILTER_INVALID: StatusCode = StatusCode(0x8043_0000);
    pub const BAD_FILTER_NOT_ALLOWED: StatusCode = StatusCode(0x8045_0000);
    pub const BAD_CONTINUATION_POINT_INVALID: StatusCode = StatusCode(0x804A_0000);
    pub const BAD_NO_CONTINUATION_POINTS: StatusCode = StatusCode(0x804B_0000);
    pub const BAD_REFERENCE_TYPE_ID_INVALID: StatusCode = StatusCode(0x804C_0000);
    pub const BAD_PARENT_NODE_ID_INVALID: StatusCode = StatusCode(0x805B_0000);
    pub const BAD_NODE_ID_EXISTS: StatusCode = StatusCode(0x805E_0000);
    pub const BAD_NODE_ATTRIBUTES_INVALID: StatusCode = StatusCode(0x805F_0000);
    pub const BAD_DUPLICATE_REFERENCE_NOT_ALLOWED: StatusCode = StatusCode(0x8066_0000);
    pub const BAD_NO_MATCH: StatusCode = StatusCode(0x806F_0000);
    pub const BAD_MESSAGE_NOT_AVAILABLE: StatusCode = StatusCode(0x807B_0000);
    pub const BAD_NO_SUBSCRIPTION: StatusCode = StatusCode(0x8079_0000);
    pub const BAD_SEQUENCE_NUMBER_UNKNOWN: StatusCode = StatusCode(0x807A_0000);
    pub const BAD_TOO_MANY_PUBLISH_REQUESTS: StatusCode = StatusCode(0x8078_0000);
    pub const BAD_TOO_MANY_SUBSCRIPTIONS: StatusCode = StatusCode(0x8077_0000);
    pub const BAD_TOO_MANY_MONITORED_ITEMS: StatusCode = StatusCode(0x80DB_0000);
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    pub const BAD_METHOD_INVALID: StatusCode = StatusCode(0x8075_0000);
    pub const BAD_ARGUMENTS_MISSING: StatusCode = StatusCode(0x8076_0000);
    pub const BAD_INVALID_ARGUMENT: StatusCode = StatusCode(0x80AB_0000);
    pub const BAD_TOO_MANY_ARGUMENTS: StatusCode = StatusCode(0x80E5_0000);
    pub const BAD_BOUND_NOT_FOUND: StatusCode = StatusCode(0x80D7_0000);
    pub const BAD_HISTORY_OPERATION_UNSUPPORTED: StatusCode = StatusCode(0x8072_0000);
    pub const BAD_ENTRY_EXISTS: StatusCode = StatusCode(0x80A0_0000);
    pub const BAD_NO_ENTRY_EXISTS: StatusCode = StatusCode(0x80A1_0000);
    pub const BAD_REFERENCE_NOT_FOUND: StatusCode = StatusCode(0x80B7_0000);
    pub const BAD_CONFIGURATION_ERROR: StatusCode = StatusCode(0x8089_0000);
    pub const GOOD_ENTRY_INSERTED: StatusCode = StatusCode(0x00A2_0000);
    pub const GOOD_ENTRY_REPLACED: StatusCode = StatusCode(0x00A3_0000);

    /// DataValue info type plus the overflow bit.
    const OVERFLOW_BITS: u32 = 0x0000_0480;

    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    pub fn is_uncertain(self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Status with the low info bits stripped.
    pub fn code(self) -> StatusCode {
        StatusCode(self.0 & 0xFFFF_0000)
    }

    pub fn with_overflow(self) -> StatusCode {
        StatusCode(self.0 | Self::OVERFLOW_BITS)
    }

    pub fn has_overflow(self) -> bool {
        self.0 & Self::OVERFLOW_BITS == Self::OVERFLOW_BITS
    }

    pub fn name(self) -> &'static str {
        match self.code() {
            StatusCode::GOOD => "Good",
            StatusCode::UNCERTAIN => "Uncertain",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_USER_ACCESS_DENIED => "BadUserAccessDenied",
            StatusCode::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            StatusCode::BAD_NODE_ID_EXISTS => "BadNodeIdExists",
            StatusCode::BAD_ATTRIBUTE_ID_INVALID => "BadAttributeIdInvalid",
            StatusCode::BAD_NOT_WRITABLE => "BadNotWritable",
            StatusCode::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            StatusCode::BAD_NO_MATCH => "BadNoMatch",
            StatusCode::BAD_BOUND_NOT_FOUND => "BadBoundNotFound",
            StatusCode::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            StatusCode::BAD_MONITORED_ITEM_FILTER_INVALID => "BadMonitoredItemFilterInvalid",
            StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN => "BadSequenceNumberUnknown",
            _ if self.is_good() => "Good",
            _ if self.is_uncertain() => "Uncertain",
            _ => "Bad",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        assert!(StatusCode::UNCERTAIN.is_uncertain());
        assert!(!StatusCode::UNCERTAIN.is_bad());
    }

    #[test]
    fn test_overflow_bit_keeps_code() {
        let s = StatusCode::GOOD.with_overflow();
        assert!(s.has_overflow());
        assert!(s.is_good());
        assert_eq!(s.code(), StatusCode::GOOD);
    }
}
