//! Timer table.
//!
//! Entries are keyed by [`TimerId`]. A due callback is taken out of its
//! entry while it runs, so the table lock is never held across user code
//! and a callback may add, change or remove timers (itself included).

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{Error, Result};

use super::ServerRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type TimerCallback = Box<dyn FnMut(&ServerRuntime, TimerId) + Send>;

struct TimerEntry {
    next_due: DateTime<Utc>,
    /// `None` for one-shot timers.
    interval: Option<Duration>,
    /// Taken while running.
    callback: Option<TimerCallback>,
}

#[derive(Default)]
struct TimerState {
    entries: BTreeMap<TimerId, TimerEntry>,
    next_id: u64,
}

#[derive(Default)]
pub(crate) struct TimerTable {
    state: Mutex<TimerState>,
}

pub(crate) fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::MAX)
}

fn advance(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl TimerTable {
    pub fn insert(&self, now: DateTime<Utc>, delay: Duration, interval: Option<Duration>, callback: TimerCallback) -> TimerId {
        let mut st = self.state.lock();
        st.next_id += 1;
        let id = TimerId(st.next_id);
        st.entries.insert(id, TimerEntry { next_due: advance(now, delay), interval, callback: Some(callback) });
        id
    }

    pub fn change_interval(&self, id: TimerId, interval: Duration, now: DateTime<Utc>) -> Result<()> {
        let mut st = self.state.lock();
        let entry = st
            .entries
            .get_mut(&id)
            .filter(|e| e.interval.is_some())
            .ok_or_else(|| Error::InvalidArgument(format!("no repeated timer {id}")))?;
        entry.interval = Some(interval);
        entry.next_due = advance(now, interval);
        Ok(())
    }

    pub fn remove(&self, id: TimerId) -> bool {
        self.state.lock().entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Run every callback due at `now`; returns how many ran.
    pub fn run_due(&self, runtime: &ServerRuntime, now: DateTime<Utc>) -> usize {
        let due: Vec<TimerId> = {
            let st = self.state.lock();
            st.entries
                .iter()
                .filter(|(_, e)| e.next_due <= now && e.callback.is_some())
                .map(|(id, _)| *id)
                .collect()
        };

        let mut ran = 0;
        for id in due {
            let callback = {
                let mut st = self.state.lock();
                match st.entries.get_mut(&id) {
                    Some(e) if e.next_due <= now => e.callback.take(),
                    _ => None,
                }
            };
            let Some(mut callback) = callback else { continue };
            trace!(timer = %id, "timer fired");
            callback(runtime, id);
            ran += 1;

            let mut st = self.state.lock();
            let Some(entry) = st.entries.get_mut(&id) else {
                // removed while running
                continue;
            };
            match entry.interval {
                Some(interval) => {
                    // change_repeated_interval from inside the callback already rescheduled
                    if entry.next_due <= now {
                        entry.next_due = advance(now, interval);
                    }
                    entry.callback = Some(callback);
                }
                None => {
                    st.entries.remove(&id);
                }
            }
        }
        ran
    }
}
