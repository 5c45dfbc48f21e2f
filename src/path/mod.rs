//! Parser for slash-separated telemetry paths with bracketed key
//! predicates, e.g. `/interfaces/interface[name=ge-0/0/0]/state/counters`.
//!
//! The parser is pure: no I/O, no shared state. `to_string` round-trips
//! every well-formed path modulo per-element key order.

use std::fmt;

use thiserror::Error;

/// Errors surfaced while scanning a path string.
#[derive(Error, Debug, PartialEq)]
pub enum PathError {
    #[error("path does not start with '/': {0}")]
    NoLeadingSlash(String),

    #[error("unbalanced bracket in path: {0}")]
    UnbalancedBracket(String),

    #[error("nested '[' inside predicate: {0}")]
    NestedBracket(String),

    #[error("malformed predicate in path: {0}")]
    MalformedPredicate(String),
}

/// One path element with its key predicates in parse order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathElem {
    pub name: String,
    pub keys: Vec<(String, String)>,
}

/// A parsed path with optional origin and target prefixes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    pub origin: String,
    pub target: String,
    pub elems: Vec<PathElem>,
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.origin.is_empty() {
            write!(f, "{}:", self.origin)?;
        }
        for elem in &self.elems {
            write!(f, "/{}", elem.name)?;
            for (k, v) in &elem.keys {
                if v.is_empty() {
                    write!(f, "[{k}]")?;
                } else {
                    write!(f, "[{k}={v}]")?;
                }
            }
        }
        Ok(())
    }
}

enum State {
    Name,
    KeyName,
    KeyValue,
}

/// Parse a path string into elements and per-element keys.
///
/// Predicates take the form `[key=value]` (quotes around the value are
/// stripped) or the bare `[key]`. A `/` inside a predicate belongs to the
/// value, so `[name=ge-0/0/0]` parses as one key.
pub fn parse_path(origin: &str, path: &str, target: &str) -> Result<Path, PathError> {
    let mut parsed = Path {
        origin: origin.to_string(),
        target: target.to_string(),
        elems: Vec::new(),
    };

    if path.is_empty() {
        return Ok(parsed);
    }
    if !path.starts_with('/') {
        return Err(PathError::NoLeadingSlash(path.to_string()));
    }

    let mut state = State::Name;
    let mut elem = PathElem::default();
    let mut key = String::new();
    let mut value = String::new();

    for ch in path.chars().skip(1) {
        match state {
            State::Name => match ch {
                '/' => {
                    if !elem.name.is_empty() {
                        parsed.elems.push(std::mem::take(&mut elem));
                    }
                }
                '[' => {
                    if elem.name.is_empty() {
                        return Err(PathError::MalformedPredicate(path.to_string()));
                    }
                    state = State::KeyName;
                }
                ']' => return Err(PathError::UnbalancedBracket(path.to_string())),
                _ => elem.name.push(ch),
            },
            State::KeyName => match ch {
                '=' => {
                    if key.is_empty() {
                        return Err(PathError::MalformedPredicate(path.to_string()));
                    }
                    state = State::KeyValue;
                }
                ']' => {
                    if key.is_empty() {
                        return Err(PathError::MalformedPredicate(path.to_string()));
                    }
                    elem.keys.push((std::mem::take(&mut key), String::new()));
                    state = State::Name;
                }
                '[' => return Err(PathError::NestedBracket(path.to_string())),
                _ => key.push(ch),
            },
            State::KeyValue => match ch {
                ']' => {
                    let trimmed = value.trim_matches(|c| c == '\'' || c == '"').to_string();
                    elem.keys.push((std::mem::take(&mut key), trimmed));
                    value.clear();
                    state = State::Name;
                }
                '[' => return Err(PathError::NestedBracket(path.to_string())),
                _ => value.push(ch),
            },
        }
    }

    match state {
        State::Name => {
            if !elem.name.is_empty() {
                parsed.elems.push(elem);
            }
            Ok(parsed)
        }
        _ => Err(PathError::UnbalancedBracket(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_path() {
        let p = parse_path("", "/interfaces/interface/state/counters", "").unwrap();
        let names: Vec<&str> = p.elems.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["interfaces", "interface", "state", "counters"]);
        assert!(p.elems.iter().all(|e| e.keys.is_empty()));
    }

    #[test]
    fn test_path_with_key_predicate() {
        let p = parse_path("", "/interfaces/interface[name=ge-0/0/0]/state", "").unwrap();
        assert_eq!(p.elems.len(), 3);
        assert_eq!(
            p.elems[1].keys,
            vec![("name".to_string(), "ge-0/0/0".to_string())]
        );
    }

    #[test]
    fn test_path_with_bare_key() {
        let p = parse_path("", "/a/b[ifname]/c", "").unwrap();
        assert_eq!(p.elems[1].keys, vec![("ifname".to_string(), String::new())]);
    }

    #[test]
    fn test_quoted_value_is_trimmed() {
        let p = parse_path("", "/a[k='v1']/b[k2=\"v2\"]", "").unwrap();
        assert_eq!(p.elems[0].keys[0].1, "v1");
        assert_eq!(p.elems[1].keys[0].1, "v2");
    }

    #[test]
    fn test_multiple_keys_on_one_elem() {
        let p = parse_path("", "/a/b[x=1][y=2]/c", "").unwrap();
        assert_eq!(
            p.elems[1].keys,
            vec![
                ("x".to_string(), "1".to_string()),
                ("y".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_origin_and_target_carried() {
        let p = parse_path("openconfig", "/interfaces", "r1").unwrap();
        assert_eq!(p.origin, "openconfig");
        assert_eq!(p.target, "r1");
    }

    #[test]
    fn test_empty_path_is_ok() {
        let p = parse_path("", "", "").unwrap();
        assert!(p.elems.is_empty());
    }

    #[test]
    fn test_missing_leading_slash() {
        let err = parse_path("", "interfaces/interface", "").unwrap_err();
        assert!(matches!(err, PathError::NoLeadingSlash(_)));
    }

    #[test]
    fn test_unterminated_predicate() {
        let err = parse_path("", "/a/b[name=ge-0", "").unwrap_err();
        assert!(matches!(err, PathError::UnbalancedBracket(_)));
    }

    #[test]
    fn test_nested_bracket() {
        let err = parse_path("", "/a/b[name=[x]]", "").unwrap_err();
        assert!(matches!(err, PathError::NestedBracket(_)));
    }

    #[test]
    fn test_roundtrip() {
        for path in [
            "/interfaces/interface/state/counters",
            "/interfaces/interface[name=ge-0/0/0]/state",
            "/a/b[x=1][y=2]/c",
            "/a/b[bare]/c",
        ] {
            let p = parse_path("", path, "").unwrap();
            assert_eq!(p.to_string(), path);
        }
    }

    #[test]
    fn test_roundtrip_with_origin() {
        let p = parse_path("openconfig-interfaces", "/interfaces/interface", "").unwrap();
        assert_eq!(p.to_string(), "openconfig-interfaces:/interfaces/interface");
    }
}
