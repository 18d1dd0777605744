//! DataValue: a Variant with quality and timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StatusCode, Variant};

/// A value as read from or written to a node.
///
/// Every read and write produces a fresh `DataValue`; nothing hands out
/// references into node storage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// A good value stamped with the current time as both timestamps.
    pub fn new_now(value: impl Into<Variant>) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// A good value with an explicit source timestamp.
    pub fn new_at(value: impl Into<Variant>, source_timestamp: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Some(source_timestamp),
            server_timestamp: Some(source_timestamp),
        }
    }

    /// A value-less status, e.g. a sampling failure.
    pub fn from_status(status: StatusCode, at: DateTime<Utc>) -> Self {
        Self {
            value: Variant::Empty,
            status,
            source_timestamp: Some(at),
            server_timestamp: Some(at),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn is_good(&self) -> bool {
        self.status.is_good()
    }
}

impl From<Variant> for DataValue {
    fn from(value: Variant) -> Self {
        DataValue { value, ..Default::default() }
    }
}

/// Which timestamps a monitored item or read reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimestampsToReturn {
    Source,
    Server,
    #[default]
    Both,
    Neither,
}

impl TimestampsToReturn {
    /// Strip the timestamps the caller did not ask for.
    pub fn apply(self, mut value: DataValue) -> DataValue {
        match self {
            TimestampsToReturn::Source => value.server_timestamp = None,
            TimestampsToReturn::Server => value.source_timestamp = None,
            TimestampsToReturn::Both => {}
            TimestampsToReturn::Neither => {
                value.source_timestamp = None;
                value.server_timestamp = None;
            }
        }
        value
    }
}
