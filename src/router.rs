//! Two-level host/path routing over compiled regex alternations.
//!
//! Configuration is an ordered list of host patterns, each alternative a
//! named capture like `(?P<intranet>.*\.corp\.example\.com)`, plus one
//! section per group name binding it to a second alternation of path
//! patterns, whose named groups resolve to `(handler key, argument map)`
//! leaves. Matching is first-resolvable-alternative-wins in both layers,
//! so precedence between overlapping patterns is controlled purely by
//! configuration order.
//!
//! # Examples
//! ```
//! use std::collections::HashMap;
//! use strand_web::{HostConfig, PathConfig, Router, RouterConfig};
//!
//! let config = RouterConfig {
//!     patterns: vec![r"(?P<default>.*)".to_string()],
//!     hosts: vec![HostConfig {
//!         names: "default".to_string(),
//!         patterns: vec![r"(?P<app>/app.*)".to_string(), r"(?P<files>/.*)".to_string()],
//!         paths: vec![
//!             PathConfig {
//!                 names: "app".to_string(),
//!                 handler: "cgi".to_string(),
//!                 args: HashMap::new(),
//!             },
//!             PathConfig {
//!                 names: "files".to_string(),
//!                 handler: "static".to_string(),
//!                 args: HashMap::new(),
//!             },
//!         ],
//!     }],
//! };
//!
//! let router = Router::new(&config).unwrap();
//! let found = router.resolve("example.com", "/app/hello").unwrap();
//! assert_eq!(found.handler, "cgi");
//! assert_eq!(found.path_info, "/app/hello");
//! ```

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::{error, fmt};

/// Configuration input for [`Router::new`]: ordered host patterns plus
/// the sections their group names resolve into.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Host alternation fragments, joined with `|` at compile time.
    pub patterns: Vec<String>,
    pub hosts: Vec<HostConfig>,
}

/// One named host section. `names` may carry several aliases separated by
/// whitespace, commas or pipes; all resolve to the same section.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub names: String,
    /// Path alternation fragments for this host group.
    pub patterns: Vec<String>,
    pub paths: Vec<PathConfig>,
}

/// A leaf mapping a path-group name to a handler key and a free-form
/// argument bag.
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub names: String,
    pub handler: String,
    pub args: HashMap<String, String>,
}

/// Compiled routing table. Built once at configuration time, immutable
/// and lock-free to share afterwards.
#[derive(Debug, Clone)]
pub struct Router {
    hosts: Regex,
    groups: HashMap<String, Arc<HostGroup>>,
}

#[derive(Debug)]
struct HostGroup {
    urls: Regex,
    groups: HashMap<String, Leaf>,
}

#[derive(Debug, Clone)]
struct Leaf {
    handler: String,
    args: HashMap<String, String>,
}

/// A successful resolution: the captured host and path substrings plus
/// the leaf they selected.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch<'t, 'r> {
    /// Substring of the input host captured by the winning alternative.
    pub host: &'t str,
    /// Substring of the input path captured by the winning alternative.
    pub path_info: &'t str,
    pub handler: &'r str,
    pub args: &'r HashMap<String, String>,
}

impl Router {
    /// Compiles the configuration into a routing table.
    ///
    /// Invalid patterns and duplicate group names are configuration
    /// errors, fatal to startup; they never surface at request time.
    pub fn new(config: &RouterConfig) -> Result<Self, RouterError> {
        let hosts = compile_union("router", &config.patterns)?;

        let mut groups = HashMap::new();
        for section in &config.hosts {
            let urls = compile_union(&section.names, &section.patterns)?;

            let mut leaves = HashMap::new();
            for path in &section.paths {
                let leaf = Leaf {
                    handler: path.handler.clone(),
                    args: path.args.clone(),
                };
                for name in split_names(&path.names) {
                    if leaves.insert(name.clone(), leaf.clone()).is_some() {
                        return Err(RouterError::DuplicateGroup {
                            section: section.names.clone(),
                            name,
                        });
                    }
                }
            }

            let group = Arc::new(HostGroup {
                urls,
                groups: leaves,
            });
            for name in split_names(&section.names) {
                if groups.insert(name.clone(), group.clone()).is_some() {
                    return Err(RouterError::DuplicateGroup {
                        section: "router".to_string(),
                        name,
                    });
                }
            }
        }

        Ok(Self { hosts, groups })
    }

    /// Resolves `(host, path)` to a handler leaf, or `None` when either
    /// alternation exhausts its alternatives without a resolvable group.
    ///
    /// "No route" is not an error: the caller answers it with a
    /// 400/404-class response.
    pub fn resolve<'t>(&self, host: &'t str, path: &'t str) -> Option<RouteMatch<'t, '_>> {
        let (group, host_text) = select(&self.hosts, host, |name| self.groups.get(name))?;
        let (leaf, path_text) = select(&group.urls, path, |name| group.groups.get(name))?;

        Some(RouteMatch {
            host: host_text,
            path_info: path_text,
            handler: &leaf.handler,
            args: &leaf.args,
        })
    }
}

/// Walks successive non-overlapping matches left to right; a match whose
/// participating group name has no table entry is skipped, the first one
/// that resolves wins.
fn select<'t, 'r, T>(
    pattern: &Regex,
    text: &'t str,
    lookup: impl Fn(&str) -> Option<&'r T>,
) -> Option<(&'r T, &'t str)> {
    for caps in pattern.captures_iter(text) {
        for name in pattern.capture_names().flatten() {
            let Some(matched) = caps.name(name) else {
                continue;
            };
            if let Some(entry) = lookup(&name.to_ascii_uppercase()) {
                return Some((entry, matched.as_str()));
            }
        }
    }
    None
}

fn compile_union(section: &str, patterns: &[String]) -> Result<Regex, RouterError> {
    for pattern in patterns {
        if let Err(source) = Regex::new(pattern) {
            return Err(RouterError::Pattern {
                section: section.to_string(),
                pattern: pattern.clone(),
                source,
            });
        }
    }

    let union = patterns.join("|");
    Regex::new(&union).map_err(|source| RouterError::Pattern {
        section: section.to_string(),
        pattern: union,
        source,
    })
}

/// Section names are upper-cased and may list several aliases.
fn split_names(names: &str) -> Vec<String> {
    names
        .split(|c: char| c.is_whitespace() || c == ',' || c == '|')
        .filter(|name| !name.is_empty())
        .map(|name| name.to_ascii_uppercase())
        .collect()
}

/// Configuration-time routing failures.
#[derive(Debug)]
pub enum RouterError {
    Pattern {
        section: String,
        pattern: String,
        source: regex::Error,
    },
    DuplicateGroup {
        section: String,
        name: String,
    },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Pattern {
                section,
                pattern,
                source,
            } => write!(f, "<router {}>: pattern {}: {}", section, pattern, source),
            RouterError::DuplicateGroup { section, name } => {
                write!(f, "<router {}>: duplicate group name \"{}\" exists", section, name)
            }
        }
    }
}

impl error::Error for RouterError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RouterError::Pattern { source, .. } => Some(source),
            RouterError::DuplicateGroup { .. } => None,
        }
    }
}
