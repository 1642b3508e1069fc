//! Path templates such as `/users/{id}/posts` and their matching against raw request paths.
//!
//! Matching happens on the raw path as it arrived on the wire: neither the template nor the
//! incoming path is percent-decoded. A placeholder binds the raw segment verbatim, so
//! malformed or special-character segments (e.g. `%Ill~Formed@RequiredString!`) can be
//! matched and round-tripped. Callers that need decoded values must decode explicitly.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A path template could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("path template `{template}` contains an empty segment at position {position}")]
    EmptySegment { template: String, position: usize },
    #[error("path template `{template}` contains an empty placeholder `{{}}`")]
    EmptyPlaceholder { template: String },
    #[error("path template `{template}` binds the placeholder `{name}` more than once")]
    DuplicatePlaceholder { template: String, name: String },
    #[error(
        "path template `{template}` contains the segment `{segment}`: a placeholder must span the whole segment"
    )]
    InvalidSegment { template: String, segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A compiled path template.
///
/// A pattern matches a path only if both have the same number of segments and every literal
/// segment is byte-for-byte equal to the corresponding path segment. There is no wildcard or
/// prefix matching.
///
/// ### Example:
/// ```rust
/// use scenario_mock::PathPattern;
///
/// let pattern = PathPattern::compile("/hello/{raw}").unwrap();
///
/// let bindings = pattern.matches("/hello/%Ill~Formed@RequiredString!").unwrap();
/// assert_eq!(bindings.get("raw"), Some("%Ill~Formed@RequiredString!"));
///
/// assert!(pattern.matches("/hello").is_none());
/// assert!(pattern.matches("/hello/a/b").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    template: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a path template.
    ///
    /// A missing leading `/` is added, `"/"` is the root pattern. A segment is a placeholder
    /// when it has the form `{name}`.
    pub fn compile(template: &str) -> Result<Self, PatternError> {
        let template = if template.starts_with('/') {
            template.to_string()
        } else {
            format!("/{}", template)
        };

        let mut segments = Vec::new();
        for (position, segment) in split_segments(&template).enumerate() {
            if segment.is_empty() {
                return Err(PatternError::EmptySegment {
                    template: template.clone(),
                    position,
                });
            }
            if let Some(name) = segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                if name.is_empty() {
                    return Err(PatternError::EmptyPlaceholder {
                        template: template.clone(),
                    });
                }
                if name.contains(['{', '}']) {
                    return Err(PatternError::InvalidSegment {
                        template: template.clone(),
                        segment: segment.to_string(),
                    });
                }
                let already_bound = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Placeholder(existing) if existing == name));
                if already_bound {
                    return Err(PatternError::DuplicatePlaceholder {
                        template: template.clone(),
                        name: name.to_string(),
                    });
                }
                segments.push(Segment::Placeholder(name.to_string()));
            } else if segment.contains(['{', '}']) {
                return Err(PatternError::InvalidSegment {
                    template: template.clone(),
                    segment: segment.to_string(),
                });
            } else {
                segments.push(Segment::Literal(segment.to_string()));
            }
        }

        Ok(Self { template, segments })
    }

    /// The template this pattern was compiled from (with a leading `/`).
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The placeholder names, in template order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a raw (not percent-decoded) path, returning the placeholder bindings on success.
    pub fn matches(&self, raw_path: &str) -> Option<PathBindings> {
        let path = raw_path.strip_prefix('/').unwrap_or(raw_path);
        let path_segments: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut bindings = PathBindings::default();
        for (expected, actual) in self.segments.iter().zip(path_segments) {
            match expected {
                Segment::Literal(literal) => {
                    if literal.as_bytes() != actual.as_bytes() {
                        return None;
                    }
                }
                Segment::Placeholder(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    bindings.0.push((name.clone(), actual.to_string()));
                }
            }
        }
        Some(bindings)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

// "/a/b" -> ["a", "b"], "/" -> [], "/a/" -> ["a", ""]
fn split_segments(template: &str) -> impl Iterator<Item = &str> {
    let trimmed = &template[1..];
    let mut segments = trimmed.split('/');
    if trimmed.is_empty() {
        segments.next();
    }
    segments
}

/// Raw path segments bound to placeholder names by a successful [`PathPattern::matches`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathBindings(Vec<(String, String)>);

impl PathBindings {
    /// The raw segment bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Path patterns compiled once when a feature is built, shared read-only by every request.
///
/// Templates that were not known at build time (e.g. computed by a script) are compiled on
/// demand and not cached, keeping the cache immutable.
#[derive(Debug, Clone, Default)]
pub struct PatternCache {
    patterns: HashMap<String, Arc<PathPattern>>,
}

impl PatternCache {
    pub(crate) fn insert(&mut self, template: &str) -> Result<(), PatternError> {
        if !self.patterns.contains_key(template) {
            let pattern = PathPattern::compile(template)?;
            self.patterns.insert(template.to_string(), Arc::new(pattern));
        }
        Ok(())
    }

    /// Return the precompiled pattern for `template`, compiling it if it was not seen at build time.
    pub fn get_or_compile(&self, template: &str) -> Result<Arc<PathPattern>, PatternError> {
        match self.patterns.get(template) {
            Some(pattern) => Ok(pattern.clone()),
            None => PathPattern::compile(template).map(Arc::new),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
