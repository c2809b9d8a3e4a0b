//! Numeric counter element (spec §3.2, §4.7 `Increase`).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::DocError;
use crate::primitive::Primitive;
use crate::time_ticket::TimeTicket;

/// A numeric value that supports a commutative `increase` operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CounterValue {
    Int32(i32),
    Int64(i64),
    Float64(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    created_at: TimeTicket,
    moved_at: Option<TimeTicket>,
    removed_at: Option<TimeTicket>,
    value: CounterValue,
    /// `executed_at` tickets of `Increase` ops already folded into `value`
    /// (spec §4.7: "replaying an operation whose effect was already
    /// applied is a no-op"), so an at-least-once redelivered change can't
    /// double-count.
    applied: HashSet<TimeTicket>,
}

impl Counter {
    pub fn new(created_at: TimeTicket, value: CounterValue) -> Self {
        Counter { created_at, moved_at: None, removed_at: None, value, applied: HashSet::new() }
    }

    pub fn created_at(&self) -> TimeTicket {
        self.created_at
    }

    pub fn moved_at(&self) -> Option<TimeTicket> {
        self.moved_at
    }

    pub fn removed_at(&self) -> Option<TimeTicket> {
        self.removed_at
    }

    pub fn value(&self) -> &CounterValue {
        &self.value
    }

    /// Accepts `t` only if the current `moved_at` is absent or `t` is
    /// strictly later (spec §3.2 element invariant).
    pub fn set_moved_at(&mut self, t: TimeTicket) -> bool {
        if self.moved_at.map(|m| t > m).unwrap_or(true) {
            self.moved_at = Some(t);
            true
        } else {
            false
        }
    }

    /// Accepts `t` only if `t >= created_at` and (`removed_at` absent or
    /// `t` is strictly later) (spec §3.2).
    pub fn remove(&mut self, t: TimeTicket) -> bool {
        if t < self.created_at {
            return false;
        }
        if self.removed_at.map(|r| t > r).unwrap_or(true) {
            self.removed_at = Some(t);
            true
        } else {
            false
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// `c += v`, saturating on overflow per numeric type (spec §4.7).
    /// Operands are restricted to numeric primitives (spec §3.2); a
    /// non-numeric operand is `Unsupported`. Idempotent under `executed_at`:
    /// replaying a ticket already folded into `value` is a no-op, so an
    /// at-least-once redelivered change can't double-count.
    pub fn increase(&mut self, operand: &Primitive, executed_at: TimeTicket) -> Result<(), DocError> {
        if self.applied.contains(&executed_at) {
            return Ok(());
        }
        let delta = match operand {
            Primitive::Int32(v) => *v as f64,
            Primitive::Int64(v) => *v as f64,
            Primitive::Float64(v) => *v,
            other => {
                return Err(DocError::Unsupported(
                    self.created_at,
                    format!("Increase operand must be numeric, got {other:?}"),
                ))
            }
        };
        self.value = match (&self.value, operand) {
            (CounterValue::Int32(v), _) => CounterValue::Int32(v.saturating_add(delta as i32)),
            (CounterValue::Int64(v), _) => CounterValue::Int64(v.saturating_add(delta as i64)),
            (CounterValue::Float64(v), _) => CounterValue::Float64(v + delta),
        };
        self.applied.insert(executed_at);
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self.value {
            CounterValue::Int32(v) => serde_json::Value::from(v),
            CounterValue::Int64(v) => serde_json::Value::from(v),
            CounterValue::Float64(v) => serde_json::Number::from_f64(v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn data_size(&self) -> usize {
        match self.value {
            CounterValue::Int32(_) => 4,
            CounterValue::Int64(_) => 8,
            CounterValue::Float64(_) => 8,
        }
    }
}
