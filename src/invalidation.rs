//! Event-driven tag/key resolution: rules indexed by AMQP-style wildcard
//! event patterns, priority-ordered, with `{path}` placeholder templates
//! resolved against an event payload.
//!
//! Cross-instance Pub/Sub broadcast lives in [`crate::broadcast`]; this
//! module is the pure rule registry with no I/O.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::{CacheError, CacheResult};

/// A dotted event pattern with two wildcards: `*` matches exactly one
/// segment, `#` matches zero or more. `user.#` also matches bare `user`.
#[derive(Clone)]
pub struct EventPattern {
    pattern: String,
    regex: Regex,
}

impl EventPattern {
    pub fn new(pattern: &str) -> CacheResult<Self> {
        if pattern.is_empty() {
            return Err(CacheError::validation("event pattern is empty"));
        }
        if !pattern
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '*' | '#'))
        {
            return Err(CacheError::validation(format!(
                "event pattern {pattern:?} contains characters outside [A-Za-z0-9._-*#]"
            )));
        }

        let segments: Vec<&str> = pattern.split('.').collect();
        let compiled: Vec<String> = segments
            .iter()
            .map(|seg| match *seg {
                "*" => "[^.]+".to_string(),
                "#" => ".*".to_string(),
                literal => regex::escape(literal),
            })
            .collect();

        let regex_src = if segments.len() > 1 && segments.last() == Some(&"#") {
            let head = &compiled[..compiled.len() - 1];
            format!("^{}(?:\\..*)?$", head.join("\\."))
        } else {
            format!("^{}$", compiled.join("\\."))
        };

        let regex = Regex::new(&regex_src)
            .map_err(|e| CacheError::validation(format!("invalid event pattern {pattern:?}: {e}")))?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, event: &str) -> bool {
        self.regex.is_match(event)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

#[derive(Clone)]
enum TemplateSegment {
    Literal(String),
    Placeholder(Vec<String>),
}

/// A string with `{dotted.path}` placeholders resolved against a JSON-like
/// payload. Parsed once at construction so resolution never re-scans the
/// template text.
#[derive(Clone)]
pub struct TagTemplate {
    segments: Vec<TemplateSegment>,
}

impl TagTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        Self {
            segments: Self::parse(&template),
        }
    }

    fn parse(template: &str) -> Vec<TemplateSegment> {
        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            if start > 0 {
                segments.push(TemplateSegment::Literal(rest[..start].to_string()));
            }
            match rest[start..].find('}') {
                Some(end_rel) => {
                    let end = start + end_rel;
                    let path = rest[start + 1..end]
                        .split('.')
                        .map(str::to_string)
                        .collect();
                    segments.push(TemplateSegment::Placeholder(path));
                    rest = &rest[end + 1..];
                }
                None => {
                    segments.push(TemplateSegment::Literal(rest[start..].to_string()));
                    rest = "";
                    break;
                }
            }
        }
        if !rest.is_empty() {
            segments.push(TemplateSegment::Literal(rest.to_string()));
        }
        segments
    }

    /// Resolves against `payload`. Placeholders whose path is absent, or
    /// whose leaf isn't a primitive, are left literal (`{a.b}`).
    pub fn resolve(&self, payload: &serde_json::Value) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(s) => out.push_str(s),
                TemplateSegment::Placeholder(path) => match Self::lookup(payload, path) {
                    Some(leaf) => out.push_str(&leaf),
                    None => {
                        out.push('{');
                        out.push_str(&path.join("."));
                        out.push('}');
                    }
                },
            }
        }
        out
    }

    fn lookup(payload: &serde_json::Value, path: &[String]) -> Option<String> {
        let mut current = payload;
        for key in path {
            current = current.as_object()?.get(key)?;
        }
        Self::stringify_leaf(current)
    }

    fn stringify_leaf(value: &serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// `{ eventPattern, tags, keys, condition?, priority }`.
#[derive(Clone)]
pub struct InvalidationRule {
    pub event_pattern: EventPattern,
    pub tags: Vec<TagTemplate>,
    pub keys: Vec<TagTemplate>,
    pub condition: Option<Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>>,
    pub priority: i32,
}

impl InvalidationRule {
    pub fn new(event_pattern: EventPattern, tags: Vec<TagTemplate>, keys: Vec<TagTemplate>) -> Self {
        Self {
            event_pattern,
            tags,
            keys,
            condition: None,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Result of resolving an event against the registry: deduplicated tags and
/// keys in order of first appearance, plus the rules that matched, in
/// priority order.
pub struct ResolvedInvalidation {
    pub tags: Vec<String>,
    pub keys: Vec<String>,
    pub matched_rules: Vec<InvalidationRule>,
}

/// Rules indexed by event pattern, kept sorted by descending priority.
pub struct InvalidationRegistry {
    rules: Mutex<Vec<InvalidationRule>>,
}

impl Default for InvalidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, rule: InvalidationRule) {
        let mut rules = self.rules.lock();
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn register_many(&self, new_rules: Vec<InvalidationRule>) {
        let mut rules = self.rules.lock();
        rules.extend(new_rules);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Removes every rule whose literal event pattern string equals `event`.
    pub fn unregister(&self, event: &str) {
        let mut rules = self.rules.lock();
        rules.retain(|r| r.event_pattern.as_str() != event);
    }

    pub fn resolve(&self, event: &str, payload: &serde_json::Value) -> ResolvedInvalidation {
        let rules = self.rules.lock();
        let mut tags = Vec::new();
        let mut tags_seen = HashSet::new();
        let mut keys = Vec::new();
        let mut keys_seen = HashSet::new();
        let mut matched_rules = Vec::new();

        for rule in rules.iter() {
            if !rule.event_pattern.matches(event) {
                continue;
            }
            if let Some(condition) = &rule.condition {
                if !condition(payload) {
                    continue;
                }
            }

            for template in &rule.tags {
                let resolved = template.resolve(payload);
                if resolved.contains('{') {
                    tracing::warn!(event, template = resolved, "unresolved tag template, dropping");
                    continue;
                }
                if tags_seen.insert(resolved.clone()) {
                    tags.push(resolved);
                }
            }
            for template in &rule.keys {
                let resolved = template.resolve(payload);
                if resolved.contains('{') {
                    tracing::warn!(event, template = resolved, "unresolved key template, dropping");
                    continue;
                }
                if keys_seen.insert(resolved.clone()) {
                    keys.push(resolved);
                }
            }
            matched_rules.push(rule.clone());
        }

        ResolvedInvalidation {
            tags,
            keys,
            matched_rules,
        }
    }
}
