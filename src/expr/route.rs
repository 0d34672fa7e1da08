//! Router rule conditions: `contains:`, `startsWith:`, `equals:`, `regex:`,
//! and `var:` prefixes tested against the stringified input or a named
//! variable.

use regex::RegexBuilder;

/// A parsed router rule condition.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteCondition {
    Contains(String),
    StartsWith(String),
    Equals(String),
    Regex(String),
    Var(String),
}

impl RouteCondition {
    /// Parse a `"prefix:value"` condition string. Returns `None` for an
    /// unrecognized prefix — the caller treats that as a malformed
    /// condition and evaluates it to `false`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, rest) = raw.split_once(':')?;
        match prefix {
            "contains" => Some(Self::Contains(rest.to_string())),
            "startsWith" => Some(Self::StartsWith(rest.to_string())),
            "equals" => Some(Self::Equals(rest.to_string())),
            "regex" => Some(Self::Regex(rest.to_string())),
            "var" => Some(Self::Var(rest.to_string())),
            _ => None,
        }
    }
}

/// Evaluate a raw condition string against the stringified input and the
/// flattened variable snapshot. Never panics: a malformed condition or
/// regex evaluates to `false`.
pub fn evaluate_route_condition(
    raw: &str,
    input: &str,
    variables: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    let Some(condition) = RouteCondition::parse(raw) else {
        tracing::warn!(condition = raw, "malformed router condition, skipping rule");
        return false;
    };
    match condition {
        RouteCondition::Contains(s) => input.to_lowercase().contains(&s.to_lowercase()),
        RouteCondition::StartsWith(s) => input.starts_with(&s),
        RouteCondition::Equals(s) => input == s,
        RouteCondition::Regex(pattern) => RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(input))
            .unwrap_or_else(|err| {
                tracing::warn!(pattern, error = %err, "malformed router regex, skipping rule");
                false
            }),
        RouteCondition::Var(name) => variables.get(&name).map(super::boolean::truthy).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contains_is_case_insensitive() {
        assert!(evaluate_route_condition("contains:BUG", "there is a bug here", &Default::default()));
    }

    #[test]
    fn starts_with_is_case_sensitive() {
        assert!(evaluate_route_condition("startsWith:hi", "hi there", &Default::default()));
        assert!(!evaluate_route_condition("startsWith:Hi", "hi there", &Default::default()));
    }

    #[test]
    fn equals_is_exact() {
        assert!(evaluate_route_condition("equals:x", "x", &Default::default()));
        assert!(!evaluate_route_condition("equals:x", "x ", &Default::default()));
    }

    #[test]
    fn regex_matches_without_anchors() {
        assert!(evaluate_route_condition("regex:^hi", "HI there", &Default::default()));
    }

    #[test]
    fn var_checks_truthiness() {
        let mut vars = serde_json::Map::new();
        vars.insert("flag".into(), json!(true));
        assert!(evaluate_route_condition("var:flag", "irrelevant", &vars));
        assert!(!evaluate_route_condition("var:missing", "irrelevant", &vars));
    }

    #[test]
    fn unknown_prefix_is_false() {
        assert!(!evaluate_route_condition("bogus:x", "x", &Default::default()));
    }
}
