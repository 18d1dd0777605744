//! Monitored-item filters.
//!
//! Data items compare each sample against the last reported value
//! ([`DataChangeFilter`]); event items select fields from matching events
//! ([`EventFilter`]), where matching is a [`ContentFilter`] evaluated from
//! element 0.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::model::{AttributeId, DataValue, NodeId, QualifiedName, Variant};
use crate::{Error, Result};

// ============================================================================
// Data change
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataChangeTrigger {
    Status,
    #[default]
    StatusValue,
    StatusValueTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Deadband {
    #[default]
    None,
    Absolute(f64),
    /// Percent of the node's EURange span.
    Percent(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DataChangeFilter {
    pub trigger: DataChangeTrigger,
    pub deadband: Deadband,
}

impl DataChangeFilter {
    pub fn absolute(deadband: f64) -> Self {
        Self { trigger: DataChangeTrigger::StatusValue, deadband: Deadband::Absolute(deadband) }
    }

    pub fn percent(deadband: f64) -> Self {
        Self { trigger: DataChangeTrigger::StatusValue, deadband: Deadband::Percent(deadband) }
    }

    /// Whether `new` must be reported given the last reported value.
    /// `eu_range` is `(low, high)`, required by percent deadbands.
    pub fn is_reportable(&self, last: Option<&DataValue>, new: &DataValue, eu_range: Option<(f64, f64)>) -> bool {
        let Some(last) = last else {
            return true;
        };
        if last.status != new.status {
            return true;
        }
        if self.trigger == DataChangeTrigger::Status {
            return false;
        }
        if self.trigger == DataChangeTrigger::StatusValueTimestamp && last.source_timestamp != new.source_timestamp {
            return true;
        }
        let threshold = match self.deadband {
            Deadband::None => return last.value != new.value,
            Deadband::Absolute(d) => d,
            Deadband::Percent(p) => match eu_range {
                Some((low, high)) => (p / 100.0) * (high - low).abs(),
                None => return last.value != new.value,
            },
        };
        exceeds_deadband(&last.value, &new.value, threshold)
    }

    fn validate(&self) -> Result<()> {
        match self.deadband {
            Deadband::Absolute(d) if !(d >= 0.0) => Err(Error::InvalidFilter(format!("absolute deadband {d}"))),
            Deadband::Percent(p) if !(0.0..=100.0).contains(&p) => {
                Err(Error::InvalidFilter(format!("percent deadband {p} outside 0..=100")))
            }
            _ => Ok(()),
        }
    }
}

/// Numeric comparison against a deadband; arrays change if their length or
/// any element does. Non-numeric values fall back to equality.
fn exceeds_deadband(old: &Variant, new: &Variant, threshold: f64) -> bool {
    match (old, new) {
        (Variant::Array(a), Variant::Array(b)) => {
            a.len() != b.len()
                || a.values().iter().zip(b.values()).any(|(x, y)| exceeds_deadband(x, y, threshold))
        }
        _ => match (old.as_f64(), new.as_f64()) {
            (Some(x), Some(y)) => (y - x).abs() > threshold,
            _ => old != new,
        },
    }
}

// ============================================================================
// Event filter
// ============================================================================

/// A field of an event addressed by its type and browse path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleAttributeOperand {
    pub type_definition: NodeId,
    pub browse_path: Vec<QualifiedName>,
    pub attribute: AttributeId,
}

impl SimpleAttributeOperand {
    /// Value of the BaseEventType property `name`.
    pub fn field(name: &str) -> Self {
        Self {
            type_definition: crate::model::ids::BASE_EVENT_TYPE,
            browse_path: vec![QualifiedName::new(0, name)],
            attribute: AttributeId::Value,
        }
    }

    pub fn path_key(&self) -> String {
        self.browse_path.iter().map(|q| q.name.as_str()).collect::<Vec<_>>().join("/")
    }

    fn resolve(&self, event: &Event) -> Variant {
        if self.browse_path.is_empty() {
            return Variant::Empty;
        }
        event.field(&self.path_key()).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    Equals,
    IsNull,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Like,
    Not,
    Between,
    InList,
    And,
    Or,
    OfType,
}

impl FilterOperator {
    /// Allowed operand count range.
    fn arity(self) -> (usize, usize) {
        use FilterOperator::*;
        match self {
            IsNull | Not | OfType => (1, 1),
            Between => (3, 3),
            InList => (2, usize::MAX),
            _ => (2, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterOperand {
    /// Result of another element of the same filter.
    Element(u32),
    Literal(Variant),
    Attribute(SimpleAttributeOperand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFilterElement {
    pub operator: FilterOperator,
    pub operands: Vec<FilterOperand>,
}

impl ContentFilterElement {
    pub fn new(operator: FilterOperator, operands: Vec<FilterOperand>) -> Self {
        Self { operator, operands }
    }
}

/// Where clause. An empty filter matches every event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentFilter {
    pub elements: Vec<ContentFilterElement>,
}

impl ContentFilter {
    pub fn new(elements: Vec<ContentFilterElement>) -> Self {
        Self { elements }
    }

    /// Operand counts, element references (which must point further down
    /// the list, so evaluation terminates) and OfType literals.
    pub fn validate(&self) -> Result<()> {
        for (i, element) in self.elements.iter().enumerate() {
            let (min, max) = element.operator.arity();
            let n = element.operands.len();
            if n < min || n > max {
                return Err(Error::InvalidFilter(format!(
                    "element {i}: {:?} takes {min}..={max} operands, got {n}",
                    element.operator
                )));
            }
            for operand in &element.operands {
                if let FilterOperand::Element(target) = operand {
                    let target = *target as usize;
                    if target <= i || target >= self.elements.len() {
                        return Err(Error::InvalidFilter(format!("element {i}: bad element reference {target}")));
                    }
                }
            }
            if element.operator == FilterOperator::OfType
                && !matches!(&element.operands[0], FilterOperand::Literal(Variant::NodeId(_)))
            {
                return Err(Error::InvalidFilter(format!("element {i}: OfType needs a NodeId literal")));
            }
        }
        Ok(())
    }

    /// Evaluate against `event`. `is_subtype` answers OfType. A filter
    /// that fails [`validate`](Self::validate) matches nothing.
    pub fn matches(&self, event: &Event, is_subtype: &dyn Fn(&NodeId, &NodeId) -> bool) -> bool {
        if self.elements.is_empty() {
            return true;
        }
        if self.validate().is_err() {
            return false;
        }
        matches!(self.evaluate(0, event, is_subtype), Variant::Boolean(true))
    }

    fn operand(&self, operand: &FilterOperand, event: &Event, is_subtype: &dyn Fn(&NodeId, &NodeId) -> bool) -> Variant {
        match operand {
            FilterOperand::Element(i) => self.evaluate(*i as usize, event, is_subtype),
            FilterOperand::Literal(v) => v.clone(),
            FilterOperand::Attribute(a) => a.resolve(event),
        }
    }

    fn evaluate(&self, index: usize, event: &Event, is_subtype: &dyn Fn(&NodeId, &NodeId) -> bool) -> Variant {
        use std::cmp::Ordering::*;
        use FilterOperator::*;

        let Some(element) = self.elements.get(index) else {
            return Variant::Empty;
        };
        let arg = |k: usize| self.operand(&element.operands[k], event, is_subtype);
        let truthy = |v: &Variant| matches!(v, Variant::Boolean(true));
        let compare = |want: &[std::cmp::Ordering]| {
            let (a, b) = (arg(0), arg(1));
            a.partial_cmp_loose(&b).is_some_and(|o| want.contains(&o))
        };

        let result = match element.operator {
            Equals => compare(&[Equal]),
            IsNull => arg(0).is_empty(),
            GreaterThan => compare(&[Greater]),
            LessThan => compare(&[Less]),
            GreaterThanOrEqual => compare(&[Greater, Equal]),
            LessThanOrEqual => compare(&[Less, Equal]),
            Like => match (arg(0), arg(1)) {
                (Variant::String(s), Variant::String(p)) => like(&s, &p),
                _ => false,
            },
            Not => !truthy(&arg(0)),
            Between => {
                let (v, lo, hi) = (arg(0), arg(1), arg(2));
                matches!(v.partial_cmp_loose(&lo), Some(Greater | Equal))
                    && matches!(v.partial_cmp_loose(&hi), Some(Less | Equal))
            }
            InList => {
                let v = arg(0);
                (1..element.operands.len()).any(|k| v.partial_cmp_loose(&arg(k)) == Some(Equal))
            }
            And => truthy(&arg(0)) && truthy(&arg(1)),
            Or => truthy(&arg(0)) || truthy(&arg(1)),
            OfType => match arg(0) {
                Variant::NodeId(t) => is_subtype(&event.event_type, &*t),
                _ => false,
            },
        };
        Variant::Boolean(result)
    }
}

/// SQL-style pattern match: `%` any run, `_` any single character.
pub fn like(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; t.len() + 1];
    dp[0] = true;
    for &pc in &p {
        let mut next = vec![false; t.len() + 1];
        match pc {
            '%' => {
                let mut any = false;
                for j in 0..=t.len() {
                    any |= dp[j];
                    next[j] = any;
                }
            }
            _ => {
                for j in 1..=t.len() {
                    next[j] = dp[j - 1] && (pc == '_' || pc == t[j - 1]);
                }
            }
        }
        dp = next;
    }
    dp[t.len()]
}

/// Select clauses plus where clause of an event item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub select_clauses: Vec<SimpleAttributeOperand>,
    pub where_clause: ContentFilter,
}

impl EventFilter {
    pub fn new(select: &[&str]) -> Self {
        Self {
            select_clauses: select.iter().map(|name| SimpleAttributeOperand::field(name)).collect(),
            where_clause: ContentFilter::default(),
        }
    }

    pub fn with_where(mut self, where_clause: ContentFilter) -> Self {
        self.where_clause = where_clause;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.select_clauses.is_empty() {
            return Err(Error::InvalidFilter("event filter selects no fields".into()));
        }
        self.where_clause.validate()
    }

    /// Selected field values, or `None` if the where clause rejects it.
    pub fn evaluate(&self, event: &Event, is_subtype: &dyn Fn(&NodeId, &NodeId) -> bool) -> Option<Vec<Variant>> {
        if !self.where_clause.matches(event, is_subtype) {
            return None;
        }
        Some(self.select_clauses.iter().map(|s| s.resolve(event)).collect())
    }
}

// ============================================================================
// MonitoringFilter
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum MonitoringFilter {
    #[default]
    None,
    DataChange(DataChangeFilter),
    Event(EventFilter),
}

impl MonitoringFilter {
    /// Event filters go with EventNotifier items, data filters with
    /// everything else.
    pub fn validate(&self, attribute: AttributeId) -> Result<()> {
        let event_item = attribute == AttributeId::EventNotifier;
        match self {
            MonitoringFilter::None if event_item => {
                Err(Error::InvalidFilter("event items need an event filter".into()))
            }
            MonitoringFilter::None => Ok(()),
            MonitoringFilter::DataChange(_) if event_item => {
                Err(Error::InvalidFilter("data change filter on an event item".into()))
            }
            MonitoringFilter::DataChange(f) => f.validate(),
            MonitoringFilter::Event(_) if !event_item => {
                Err(Error::InvalidFilter("event filter on a data item".into()))
            }
            MonitoringFilter::Event(f) => f.validate(),
        }
    }

    pub fn data_change(&self) -> DataChangeFilter {
        match self {
            MonitoringFilter::DataChange(f) => *f,
            _ => DataChangeFilter::default(),
        }
    }

    pub fn needs_eu_range(&self) -> bool {
        matches!(self, MonitoringFilter::DataChange(DataChangeFilter { deadband: Deadband::Percent(_), .. }))
    }
}
