use std::borrow::Cow;

/// Identifies a route resource by group, kind, and name.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct GroupKindName {
    pub group: Cow<'static, str>,
    pub kind: Cow<'static, str>,
    pub name: Cow<'static, str>,
}

impl GroupKindName {
    pub fn eq_ignore_ascii_case(&self, other: &Self) -> bool {
        self.group.eq_ignore_ascii_case(&other.group)
            && self.kind.eq_ignore_ascii_case(&other.kind)
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct GroupKindNamespaceName {
    pub group: Cow<'static, str>,
    pub kind: Cow<'static, str>,
    pub namespace: String,
    pub name: Cow<'static, str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostMatch {
    Exact(String),
    /// Hostname labels in reverse order, e.g. `*.example.com` is
    /// `["com", "example"]`.
    Suffix {
        reverse_labels: Vec<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRouteMatch {
    pub path: Option<PathMatch>,
    pub headers: Vec<HeaderMatch>,
    pub query_params: Vec<QueryParamMatch>,
    pub method: Option<String>,
}

/// Patterns are carried opaquely into the configuration document; the control
/// plane never executes them, so they are stored as plain strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderMatch {
    Exact(String, String),
    Regex(String, String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryParamMatch {
    Exact(String, String),
    Regex(String, String),
}

// === impl PathMatch ===

impl PathMatch {
    /// Ranks path matches for emission order: exact matches first, then
    /// prefixes from longest to shortest, regex matches last. Higher ranks
    /// sort earlier.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            PathMatch::Exact(p) => (2, p.len()),
            PathMatch::Prefix(p) => (1, p.len()),
            PathMatch::Regex(_) => (0, 0),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            PathMatch::Exact(p) | PathMatch::Prefix(p) | PathMatch::Regex(p) => p,
        }
    }
}

// === impl HostMatch ===

impl HostMatch {
    pub fn from_hostname(hostname: &str) -> Self {
        if let Some(suffix) = hostname.strip_prefix("*.") {
            Self::Suffix {
                reverse_labels: suffix.split('.').rev().map(|s| s.to_string()).collect(),
            }
        } else {
            Self::Exact(hostname.to_string())
        }
    }
}

/// Checks whether a route hostname set intersects a listener hostname.
///
/// An empty route hostname list matches everything. Either side may carry a
/// single leading wildcard label (`*.example.com`).
pub fn hostnames_intersect(listener: Option<&str>, hostnames: &[String]) -> bool {
    let listener = match listener {
        // A listener without a hostname admits all hostnames.
        None => return true,
        Some(l) => l,
    };
    if hostnames.is_empty() {
        return true;
    }
    hostnames.iter().any(|h| hostname_matches(listener, h))
}

fn hostname_matches(listener: &str, hostname: &str) -> bool {
    match (listener.strip_prefix("*."), hostname.strip_prefix("*.")) {
        (None, None) => listener.eq_ignore_ascii_case(hostname),
        (Some(suffix), None) => is_label_suffix(hostname, suffix),
        (None, Some(suffix)) => is_label_suffix(listener, suffix),
        // Two wildcards intersect when one suffix ends with the other.
        (Some(ls), Some(hs)) => {
            ls.eq_ignore_ascii_case(hs) || is_label_suffix(ls, hs) || is_label_suffix(hs, ls)
        }
    }
}

fn is_label_suffix(hostname: &str, suffix: &str) -> bool {
    hostname
        .strip_suffix(suffix)
        .map(|rest| rest.ends_with('.') && rest.len() > 1)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_specificity_orders_exact_before_prefix_before_regex() {
        let exact = PathMatch::Exact("/api".to_string());
        let long_prefix = PathMatch::Prefix("/api/v1".to_string());
        let short_prefix = PathMatch::Prefix("/".to_string());
        let regex = PathMatch::Regex(".*".to_string());

        let mut matches = vec![&regex, &short_prefix, &exact, &long_prefix];
        matches.sort_by(|a, b| b.specificity().cmp(&a.specificity()));
        assert_eq!(
            matches,
            vec![&exact, &long_prefix, &short_prefix, &regex],
        );
    }

    #[test]
    fn listener_without_hostname_admits_all() {
        assert!(hostnames_intersect(None, &["app.example.com".to_string()]));
        assert!(hostnames_intersect(Some("app.example.com"), &[]));
    }

    #[test]
    fn exact_hostnames_intersect_case_insensitively() {
        assert!(hostnames_intersect(
            Some("App.Example.Com"),
            &["app.example.com".to_string()]
        ));
        assert!(!hostnames_intersect(
            Some("app.example.com"),
            &["other.example.com".to_string()]
        ));
    }

    #[test]
    fn wildcard_listener_matches_subdomains_only() {
        assert!(hostnames_intersect(
            Some("*.example.com"),
            &["app.example.com".to_string()]
        ));
        assert!(!hostnames_intersect(
            Some("*.example.com"),
            &["example.com".to_string()]
        ));
    }

    #[test]
    fn wildcard_route_hostname_matches_listener() {
        assert!(hostnames_intersect(
            Some("app.example.com"),
            &["*.example.com".to_string()]
        ));
    }
}
