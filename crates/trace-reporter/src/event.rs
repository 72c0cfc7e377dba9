// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;

use crate::error::ReporterError;
use crate::xtrace::XTrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Entry,
    Exit,
    Info,
    Error,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Label::Entry => "entry",
            Label::Exit => "exit",
            Label::Info => "info",
            Label::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// One traced operation occurrence.
///
/// Attributes keep insertion order for serialization but compare as a set. Edges
/// point at the op ids of causally preceding events of the same trace.
#[derive(Debug, Clone)]
pub struct Event {
    metadata: XTrace,
    layer: String,
    label: Label,
    attributes: Vec<(String, Value)>,
    edges: Vec<String>,
}

impl Event {
    pub fn new(metadata: XTrace, layer: impl Into<String>, label: Label) -> Self {
        Event {
            metadata,
            layer: layer.into(),
            label,
            attributes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_attribute(key, value);
        self
    }

    /// Sets an attribute, replacing a previous value for the same key in place.
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn add_edge(&mut self, parent: &XTrace) {
        let op_id = parent.op_id_hex();
        if !self.edges.contains(&op_id) {
            self.edges.push(op_id);
        }
    }

    pub fn metadata(&self) -> &XTrace {
        &self.metadata
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn attributes(&self) -> &[(String, Value)] {
        &self.attributes
    }

    pub fn edges(&self) -> &[String] {
        &self.edges
    }

    /// Stable routing key derived from the task id: every event of a trace maps to
    /// the same key.
    pub fn task_key(&self) -> u64 {
        let mut key = [0u8; 8];
        key.copy_from_slice(&self.metadata.task_id()[..8]);
        u64::from_le_bytes(key)
    }

    /// JSON encoding sent to the collector.
    pub fn encode(&self) -> Result<Vec<u8>, ReporterError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        if self.metadata != other.metadata
            || self.layer != other.layer
            || self.label != other.label
            || self.attributes.len() != other.attributes.len()
        {
            return false;
        }
        let mut edges = self.edges.clone();
        let mut other_edges = other.edges.clone();
        edges.sort();
        other_edges.sort();
        edges == other_edges
            && self
                .attributes
                .iter()
                .all(|(k, v)| other.attribute(k) == Some(v))
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let edge_entry = usize::from(!self.edges.is_empty());
        let mut map = serializer.serialize_map(Some(3 + self.attributes.len() + edge_entry))?;
        map.serialize_entry("X-Trace", &self.metadata)?;
        map.serialize_entry("Layer", &self.layer)?;
        map.serialize_entry("Label", &self.label)?;
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        if !self.edges.is_empty() {
            map.serialize_entry("Edge", &self.edges)?;
        }
        map.end()
    }
}
