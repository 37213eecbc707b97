// src/template.rs
//! Minimal `{field}` placeholder templates for push contents.
//!
//! `{{` and `}}` produce literal braces. Templates are parsed once at config
//! load; rendering against a context that lacks a placeholder is an error.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::snapshot::{Field, Snapshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unbalanced '{brace}' at byte {pos}")]
    Unbalanced { brace: char, pos: usize },
    #[error("invalid placeholder '{{{0}}}'")]
    InvalidPlaceholder(String),
    #[error("missing template field '{0}'")]
    MissingField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

static RE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("template token regex"));
static RE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("template name regex"));

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in RE_TOKEN.captures_iter(source) {
            let Some(m) = caps.get(0) else { continue };
            literal.push_str(&source[last..m.start()]);
            last = m.end();

            match m.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                "{" | "}" => {
                    return Err(TemplateError::Unbalanced {
                        brace: m.as_str().chars().next().unwrap_or('{'),
                        pos: m.start(),
                    })
                }
                _ => {
                    let name = caps.get(1).map(|n| n.as_str().trim()).unwrap_or_default();
                    if !RE_NAME.is_match(name) {
                        return Err(TemplateError::InvalidPlaceholder(name.to_string()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
            }
        }
        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Field(name) => {
                    let v = ctx
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingField(name.clone()))?;
                    out.push_str(&v.to_string());
                }
            }
        }
        Ok(out)
    }
}

/// Typed value available to templates.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    /// Arrays and objects, rendered as compact JSON.
    Json(Value),
    /// Non-JSON value rendered through its display text.
    Opaque(String),
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Text(s) | TemplateValue::Opaque(s) => f.write_str(s),
            TemplateValue::Integer(i) => write!(f, "{i}"),
            TemplateValue::Float(x) => write!(f, "{x}"),
            TemplateValue::Bool(b) => write!(f, "{b}"),
            TemplateValue::Null => Ok(()),
            TemplateValue::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<&Field> for TemplateValue {
    fn from(field: &Field) -> Self {
        match field {
            Field::Opaque { display, .. } => TemplateValue::Opaque(display.clone()),
            Field::Json(Value::String(s)) => TemplateValue::Text(s.clone()),
            Field::Json(Value::Bool(b)) => TemplateValue::Bool(*b),
            Field::Json(Value::Null) => TemplateValue::Null,
            Field::Json(Value::Number(n)) => match n.as_i64() {
                Some(i) => TemplateValue::Integer(i),
                None => TemplateValue::Float(n.as_f64().unwrap_or_default()),
            },
            Field::Json(other) => TemplateValue::Json(other.clone()),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::Text(s.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::Text(s)
    }
}

/// Named values a template is rendered against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            values: snapshot
                .fields()
                .map(|(k, v)| (k.to_string(), TemplateValue::from(v)))
                .collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.values.get(name)
    }
}
