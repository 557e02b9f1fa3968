//! Name-reference patterns such as `$NAME.$NAMESPACE.svc.cluster.local`.

use regex::Regex;
use smallvec::SmallVec;
use vkube_core::NamespacedName;

use crate::error::ConfigError;

const NAME_PATTERN: &str = r"(?P<name>[a-z0-9](?:[-a-z0-9.]*[a-z0-9])?)";
const NAMESPACE_PATTERN: &str = r"(?P<namespace>[a-z0-9](?:[-a-z0-9]*[a-z0-9])?)";

/// Compile a placeholder expression. Dots are literal, `$NAME` is required.
pub fn prepare_regex(expr: &str) -> Result<Regex, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRegex { regex: expr.to_string(), reason };
    // $NAME is a prefix of $NAMESPACE
    if !expr.replace("$NAMESPACE", "").contains("$NAME") {
        return Err(invalid("expression must contain $NAME".into()));
    }
    let pattern = expr.replace('.', r"\.").replace("$NAMESPACE", NAMESPACE_PATTERN).replace("$NAME", NAME_PATTERN);
    Regex::new(&pattern).map_err(|e| invalid(e.to_string()))
}

/// Rewrite every match of `regex` in `input`: the captured name (and namespace,
/// when captured) are replaced with the result of `translate`. Text outside the
/// captures is preserved.
pub fn process_regex<E>(regex: &Regex, input: &str, mut translate: impl FnMut(&str, &str) -> Result<NamespacedName, E>) -> Result<String, E> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in regex.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.name("name")) else { continue };
        let namespace = caps.name("namespace");
        let translated = translate(name.as_str(), namespace.map_or("", |m| m.as_str()))?;

        let mut spans: SmallVec<[(usize, usize, String); 2]> = SmallVec::new();
        spans.push((name.start(), name.end(), translated.name));
        if let Some(ns) = namespace {
            spans.push((ns.start(), ns.end(), translated.namespace));
        }
        spans.sort_by_key(|s| s.0);

        out.push_str(&input[last..whole.start()]);
        let mut cursor = whole.start();
        for (start, end, replacement) in spans {
            out.push_str(&input[cursor..start]);
            out.push_str(&replacement);
            cursor = end;
        }
        out.push_str(&input[cursor..whole.end()]);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn upper(name: &str, ns: &str) -> Result<NamespacedName, Infallible> {
        let ns = if ns.is_empty() { "default" } else { ns };
        Ok(NamespacedName::new(format!("NS-{ns}"), format!("N-{name}-{ns}")))
    }

    #[test]
    fn requires_name_placeholder() {
        assert!(prepare_regex("$NAMESPACE.svc").is_err());
        assert!(prepare_regex("$NAME").is_ok());
        assert!(prepare_regex("$NAME.$NAME").is_err());
    }

    #[test]
    fn replaces_only_captured_spans() {
        let re = prepare_regex("$NAME.$NAMESPACE.svc").unwrap();
        let out = process_regex(&re, "http://db.team-a.svc:5432/x", upper).unwrap();
        assert_eq!(out, "http://N-db-team-a.NS-team-a.svc:5432/x");
    }

    #[test]
    fn missing_namespace_capture_falls_back() {
        let re = prepare_regex("$NAME").unwrap();
        assert_eq!(process_regex(&re, "db", upper).unwrap(), "N-db-default");
    }

    #[test]
    fn dots_are_literal() {
        let re = prepare_regex("$NAME.svc").unwrap();
        assert_eq!(process_regex(&re, "db-svc", upper).unwrap(), "db-svc");
        assert_eq!(process_regex(&re, "db.svc", upper).unwrap(), "N-db-default.svc");
    }

    #[test]
    fn no_match_leaves_input_alone() {
        let re = prepare_regex("$NAME.$NAMESPACE.svc").unwrap();
        assert_eq!(process_regex(&re, "UPPER", upper).unwrap(), "UPPER");
    }
}
