//! Raw key validation, versioned prefixing, and context enrichment, plus the
//! deterministic argument fingerprinting used when no explicit key is given.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::KeysConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::{ContextProvider, ContextValue};

const CTX_MARKER: &str = "_ctx_";

fn is_allowed_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':')
}

fn sanitize_context_value(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Normalizes raw keys: validation, version/separator prefixing, and
/// multi-tenant context suffixing. Pure and synchronous — no I/O.
pub struct KeyCodec {
    config: KeysConfig,
    context_provider: Option<Arc<dyn ContextProvider>>,
    context_keys: Vec<String>,
}

impl KeyCodec {
    pub fn new(
        config: KeysConfig,
        context_provider: Option<Arc<dyn ContextProvider>>,
        context_keys: Vec<String>,
    ) -> Self {
        Self {
            config,
            context_provider,
            context_keys,
        }
    }

    /// Validates a raw key: non-empty after trimming, no whitespace, alphabet
    /// `[A-Za-z0-9_\-./:]`, at most `max_length` characters.
    pub fn validate<'a>(&self, raw_key: &'a str) -> CacheResult<&'a str> {
        let trimmed = raw_key.trim();
        if trimmed.is_empty() {
            return Err(CacheError::key_invalid(raw_key, "empty"));
        }
        if raw_key.chars().any(char::is_whitespace) {
            return Err(CacheError::key_invalid(raw_key, "contains whitespace"));
        }
        if raw_key.len() > self.config.max_length {
            return Err(CacheError::key_invalid(
                raw_key,
                format!("exceeds max length {}", self.config.max_length),
            ));
        }
        if !raw_key.chars().all(is_allowed_key_char) {
            return Err(CacheError::key_invalid(raw_key, "out-of-alphabet character"));
        }
        Ok(raw_key)
    }

    /// Enriches a validated raw key with version prefix and context suffix.
    /// Refuses to enrich a key that already carries the `_ctx_` marker
    /// (idempotence invariant).
    pub fn enrich(
        &self,
        raw_key: &str,
        vary_by: Option<&BTreeMap<String, ContextValue>>,
        skip_context: bool,
    ) -> CacheResult<String> {
        self.validate(raw_key)?;

        let mut key = String::new();
        if let Some(version) = &self.config.version {
            key.push_str(version);
            key.push_str(&self.config.separator);
        }
        key.push_str(raw_key);

        if key.contains(CTX_MARKER) || skip_context {
            return Ok(key);
        }

        let mut pairs: BTreeMap<String, String> = BTreeMap::new();
        if let Some(provider) = &self.context_provider {
            for name in &self.context_keys {
                if let Some(value) = provider.get(name) {
                    pairs.insert(name.clone(), sanitize_context_value(&value.to_raw_string()));
                }
            }
        }
        if let Some(vary) = vary_by {
            for (name, value) in vary {
                pairs.insert(name.clone(), sanitize_context_value(&value.to_raw_string()));
            }
        }

        if pairs.is_empty() {
            return Ok(key);
        }

        key.push_str(&self.config.separator);
        key.push_str(CTX_MARKER);
        for (name, value) in &pairs {
            key.push_str(&self.config.separator);
            key.push_str(name);
            key.push('.');
            key.push_str(value);
        }
        Ok(key)
    }
}

/// Deterministically serializes loader arguments into a key fragment.
pub struct ArgFingerprint;

impl ArgFingerprint {
    /// `args` is typically a `serde_json::Value::Array` built from the
    /// caller's positional arguments via `serde_json::to_value`.
    pub fn fingerprint(args: &serde_json::Value) -> String {
        Self::canonicalize(args)
    }

    fn canonicalize(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => "null".to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Self::canonicalize).collect();
                format!("[{}]", parts.join(","))
            }
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let parts: Vec<String> = keys
                    .into_iter()
                    .filter_map(|k| {
                        let v = map.get(k).expect("key from map.keys() exists in map");
                        if v.is_null() {
                            None
                        } else {
                            Some(format!("{k}:{}", Self::canonicalize(v)))
                        }
                    })
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }
}
