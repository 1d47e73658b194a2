//! Normalization of heterogeneous response envelopes.
//!
//! The backend nests list results inconsistently. Rather than probing ad hoc,
//! each resource shape has an ordered list of rules; the first rule that
//! matches wins and anything unrecognized falls through to an empty
//! container.

use serde_json::{Map, Value};
use tracing::debug;

/// Canonical payload shape of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
  /// A list. `named` lists envelope keys the backend uses for this resource
  /// (e.g. `contacts`, `members`).
  Array { named: &'static [&'static str] },
  /// A single record such as profile settings.
  Object,
  /// A compound resource whose payload is an object of named array parts.
  /// Each part body is normalized as a list using the `named` envelope keys.
  Group {
    parts: &'static [&'static str],
    named: &'static [&'static str],
  },
}

/// One row of the normalization decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeRule {
  /// `{"data": {"data": [..]}}`
  NestedData,
  /// `{"data": [..]}`
  Data,
  /// `{"<named>": [..]}`
  Named(&'static str),
  /// `{"data": {"<named>": [..]}}`
  DataNamed(&'static str),
  /// `[..]`
  Bare,
  /// `{"data": {..}}`
  DataObject,
  /// `{..}`
  BareObject,
}

const ARRAY_RULES: &[ShapeRule] = &[ShapeRule::NestedData, ShapeRule::Data];
const OBJECT_RULES: &[ShapeRule] = &[ShapeRule::DataObject, ShapeRule::BareObject];

impl ShapeRule {
  /// Apply this rule, returning the extracted payload when it matches.
  fn apply<'a>(&self, raw: &'a Value) -> Option<&'a Value> {
    let found = match self {
      Self::NestedData => raw.get("data")?.get("data")?,
      Self::Data => raw.get("data")?,
      Self::Named(name) => raw.get(*name)?,
      Self::DataNamed(name) => raw.get("data")?.get(*name)?,
      Self::Bare => raw,
      Self::DataObject => {
        let inner = raw.get("data")?;
        return inner.as_object().map(|_| inner);
      }
      Self::BareObject => {
        // An envelope whose only payload is an error/status is not a record.
        let obj = raw.as_object()?;
        if obj.contains_key("data") {
          return None;
        }
        return Some(raw);
      }
    };
    found.is_array().then_some(found)
  }
}

/// Ordered rules for an array resource with the given envelope names.
pub fn array_rules(named: &'static [&'static str]) -> Vec<ShapeRule> {
  let mut rules = ARRAY_RULES.to_vec();
  rules.extend(named.iter().map(|n| ShapeRule::Named(*n)));
  rules.extend(named.iter().map(|n| ShapeRule::DataNamed(*n)));
  rules.push(ShapeRule::Bare);
  rules
}

/// Normalize a raw body into the canonical payload for `shape`.
///
/// Returns the payload together with the rule that matched, or `None` when the
/// body was unrecognized and an empty container was substituted.
pub fn normalize(shape: Shape, raw: &Value) -> (Value, Option<ShapeRule>) {
  match shape {
    Shape::Array { named } => {
      for rule in array_rules(named) {
        if let Some(found) = rule.apply(raw) {
          return (found.clone(), Some(rule));
        }
      }
      debug!("unrecognized list envelope, substituting empty list");
      (Value::Array(Vec::new()), None)
    }
    Shape::Object => {
      for rule in OBJECT_RULES {
        if let Some(found) = rule.apply(raw) {
          return (found.clone(), Some(*rule));
        }
      }
      debug!("unrecognized object envelope, substituting empty object");
      (Value::Object(Map::new()), None)
    }
    Shape::Group { parts, named } => {
      // A group body is already keyed by part; normalize each part as a list.
      let mut out = Map::new();
      for part in parts {
        let (value, _) = match raw.get(*part) {
          Some(body) => normalize(Shape::Array { named }, body),
          None => (Value::Array(Vec::new()), None),
        };
        out.insert((*part).to_string(), value);
      }
      (Value::Object(out), None)
    }
  }
}

/// Whether a canonical payload counts as "has data" for its shape.
///
/// Empty lists never count, so a transient empty response is refetched on the
/// next read instead of being served for a whole freshness window.
pub fn has_data(shape: Shape, value: &Value) -> bool {
  match shape {
    Shape::Array { .. } => value.as_array().is_some_and(|a| !a.is_empty()),
    Shape::Object => value.as_object().is_some_and(|o| !o.is_empty()),
    Shape::Group { parts, .. } => {
      let Some(obj) = value.as_object() else {
        return false;
      };
      let present = parts
        .iter()
        .all(|p| obj.get(*p).is_some_and(Value::is_array));
      let any_rows = parts
        .iter()
        .filter_map(|p| obj.get(*p).and_then(Value::as_array))
        .any(|a| !a.is_empty());
      present && any_rows
    }
  }
}
