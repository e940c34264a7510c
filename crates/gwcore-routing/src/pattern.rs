use regex::Regex;

/// The three model-key grammars a Provider's model map or a Credential's
/// allowed-model list may use (spec §3, §9 "Regex-vs-string model keys").
/// The classification is syntactic, decided once at snapshot construction
/// time, never per request.
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    Literal(String),
    Wildcard { source: String, regex: Regex },
    Regex { source: String, regex: Regex },
}

impl CompiledPattern {
    pub fn compile(key: &str) -> Self {
        match classify(key) {
            KeyKind::Literal => CompiledPattern::Literal(key.to_string()),
            KeyKind::Wildcard => {
                let escaped = regex::escape(key).replace("\\*", ".*");
                let anchored = format!("^{escaped}$");
                let regex = Regex::new(&anchored).expect("escaped wildcard pattern is valid regex");
                CompiledPattern::Wildcard {
                    source: key.to_string(),
                    regex,
                }
            }
            KeyKind::Regex => {
                let anchored = anchor(key);
                let regex = Regex::new(&anchored)
                    .unwrap_or_else(|_| Regex::new(&regex::escape(key)).expect("escaped literal is valid"));
                CompiledPattern::Regex {
                    source: key.to_string(),
                    regex,
                }
            }
        }
    }

    pub fn source(&self) -> &str {
        match self {
            CompiledPattern::Literal(s) => s,
            CompiledPattern::Wildcard { source, .. } => source,
            CompiledPattern::Regex { source, .. } => source,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, CompiledPattern::Literal(_))
    }

    pub fn matches(&self, model: &str) -> bool {
        match self {
            CompiledPattern::Literal(s) => s == model,
            CompiledPattern::Wildcard { regex, .. } | CompiledPattern::Regex { regex, .. } => {
                regex.is_match(model)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Literal,
    Wildcard,
    Regex,
}

fn classify(key: &str) -> KeyKind {
    let has_regex_meta =
        key.contains(".*") || key.contains(".+") || (key.contains('(') && key.contains('|') && key.contains(')'));
    let star_count = key.matches('*').count();

    if star_count == 0 && !has_regex_meta {
        KeyKind::Literal
    } else if star_count == 1 && !has_regex_meta {
        KeyKind::Wildcard
    } else {
        KeyKind::Regex
    }
}

fn anchor(key: &str) -> String {
    let mut anchored = String::with_capacity(key.len() + 2);
    if !key.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(key);
    if !key.ends_with('$') {
        anchored.push('$');
    }
    anchored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_literal_wildcard_and_regex() {
        assert!(matches!(CompiledPattern::compile("gpt-4"), CompiledPattern::Literal(_)));
        assert!(matches!(
            CompiledPattern::compile("gemini-*"),
            CompiledPattern::Wildcard { .. }
        ));
        assert!(matches!(
            CompiledPattern::compile("claude-(opus|sonnet)-.*"),
            CompiledPattern::Regex { .. }
        ));
    }

    #[test]
    fn wildcard_matches_prefix() {
        let pattern = CompiledPattern::compile("gemini-*");
        assert!(pattern.matches("gemini-3-pro"));
        assert!(!pattern.matches("gpt-4"));
    }

    #[test]
    fn regex_is_anchored_full_match() {
        let pattern = CompiledPattern::compile("claude-(opus|sonnet)-.*");
        assert!(pattern.matches("claude-opus-20250101"));
        assert!(!pattern.matches("not-claude-opus-20250101"));
    }
}
