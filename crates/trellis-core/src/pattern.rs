//! Path pattern compilation with a process-wide cache.
//!
//! Patterns are `/`-separated. A `:name` segment captures one non-slash
//! segment, a trailing `*` captures the (possibly empty) remainder under the
//! key `"*"`, and every other segment is literal. Leading and trailing slashes
//! are insignificant, both when compiling and when matching:
//!
//! ```text
//! users/:id/messages/*   matches   /users/42/messages/a/b/c
//!                        params    { id: "42", "*": "a/b/c" }
//! ```
//!
//! Compiled patterns are immutable and shared. The cache is keyed by raw
//! pattern text and only ever grows.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;
use tracing::trace;

use crate::error::PatternError;

/// Parameters captured by a pattern match, keyed by parameter name.
pub type ParamMap = BTreeMap<String, String>;

/// Key under which a trailing wildcard stores the matched remainder.
pub const WILDCARD_KEY: &str = "*";

static PATTERN_CACHE: LazyLock<RwLock<HashMap<String, Arc<CompiledPattern>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Strips leading and trailing slashes.
///
/// `"a/b"`, `"/a/b"` and `"/a/b/"` all normalize to `"a/b"`.
pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Joins two path fragments into the canonical `/a/b` form (`/` for root).
pub fn join(base: &str, child: &str) -> String {
    let base = normalize(base);
    let child = normalize(child);
    match (base.is_empty(), child.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{child}"),
        (false, true) => format!("/{base}"),
        (false, false) => format!("/{base}/{child}"),
    }
}

/// Returns the compiled form of `pattern`, compiling it on first use.
///
/// Two calls with the same text return the same `Arc`.
pub fn compile(pattern: &str) -> Result<Arc<CompiledPattern>, PatternError> {
    if let Some(hit) = PATTERN_CACHE.read().get(pattern) {
        return Ok(Arc::clone(hit));
    }

    let mut cache = PATTERN_CACHE.write();
    if let Some(hit) = cache.get(pattern) {
        return Ok(Arc::clone(hit));
    }

    let compiled = Arc::new(CompiledPattern::build(pattern)?);
    trace!(
        pattern = %pattern,
        dynamic = compiled.dynamic,
        params = ?compiled.param_names,
        "Compiled path pattern"
    );
    cache.insert(pattern.to_string(), Arc::clone(&compiled));
    Ok(compiled)
}

/// Returns `true` if `pattern` has already been compiled.
pub fn is_cached(pattern: &str) -> bool {
    PATTERN_CACHE.read().contains_key(pattern)
}

/// A path pattern compiled into a matcher.
#[derive(Debug)]
pub struct CompiledPattern {
    raw: String,
    normalized: String,
    regex: Regex,
    param_names: Vec<String>,
    dynamic: bool,
}

impl CompiledPattern {
    fn build(raw: &str) -> Result<Self, PatternError> {
        let normalized = normalize(raw).to_string();
        let mut source = String::from("^");
        let mut param_names: Vec<String> = Vec::new();

        if !normalized.is_empty() {
            let segments: Vec<&str> = normalized.split('/').collect();
            let last = segments.len() - 1;

            for (i, segment) in segments.iter().enumerate() {
                if *segment == WILDCARD_KEY {
                    if i != last {
                        return Err(PatternError::WildcardNotLast {
                            pattern: raw.to_string(),
                        });
                    }
                    source.push_str(if i == 0 { "(.*)" } else { "(?:/(.*))?" });
                    param_names.push(WILDCARD_KEY.to_string());
                    continue;
                }

                if i > 0 {
                    source.push('/');
                }

                if let Some(name) = segment.strip_prefix(':') {
                    if name.is_empty() || name.contains(':') || name.contains('*') {
                        return Err(PatternError::InvalidParam {
                            pattern: raw.to_string(),
                            name: segment.to_string(),
                        });
                    }
                    if param_names.iter().any(|n| n == name) {
                        return Err(PatternError::DuplicateParam {
                            pattern: raw.to_string(),
                            name: name.to_string(),
                        });
                    }
                    source.push_str("([^/]+)");
                    param_names.push(name.to_string());
                } else {
                    source.push_str(&regex::escape(segment));
                }
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| PatternError::Regex {
            pattern: raw.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw: raw.to_string(),
            normalized,
            dynamic: !param_names.is_empty(),
            regex,
            param_names,
        })
    }

    /// The pattern text this was compiled from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The pattern with leading and trailing slashes stripped.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Parameter names in capture order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Whether the pattern has any parameter or wildcard segment.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Matches a path, returning captured parameters on success.
    pub fn matches(&self, path: &str) -> Option<ParamMap> {
        let path = normalize(path);
        if !self.dynamic {
            return (path == self.normalized).then(ParamMap::new);
        }

        let captures = self.regex.captures(path)?;
        let params = self
            .param_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = captures
                    .get(i + 1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                (name.clone(), value)
            })
            .collect();
        Some(params)
    }
}
