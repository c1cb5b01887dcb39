use std::collections::HashSet;

use regex::Regex;

fn stopwords() -> &'static HashSet<&'static str> {
    static WORDS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "a", "an", "and", "or", "but", "to", "of", "in", "on", "for", "with", "is",
            "are", "was", "were", "be", "been", "this", "that", "it", "as", "at", "by", "from",
            "my", "me", "you", "your",
        ]
        .into_iter()
        .collect()
    })
}

fn query_synonyms() -> &'static std::collections::HashMap<&'static str, &'static [&'static str]> {
    static MAP: std::sync::OnceLock<std::collections::HashMap<&'static str, &'static [&'static str]>> =
        std::sync::OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = std::collections::HashMap::new();
        m.insert("meeting", &["calendar", "event", "events"][..]);
        m.insert("email", &["mail", "gmail", "message", "fetch"][..]);
        m.insert("doc", &["document", "docs", "file"][..]);
        m.insert("msg", &["message", "slack", "chat"][..]);
        m
    })
}

fn camel_split_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap())
}

fn split_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[_\s\-/]+").unwrap())
}

/// All valid splits of a compound token into two halves of at least 3
/// characters each, used to recover e.g. "calendarevent" -> "calendar",
/// "event" without a real segmentation dictionary.
fn auto_split_compound(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 6 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for i in 3..=(chars.len() - 3) {
        let left: String = chars[..i].iter().collect();
        let right: String = chars[i..].iter().collect();
        out.push(left);
        out.push(right);
    }
    out
}

/// Tokenize free text into lowercase, stopword-filtered word tokens,
/// splitting on punctuation/whitespace and CamelCase boundaries, and
/// appending compound-split candidates for long unbroken tokens.
pub fn tokenise(text: &str) -> Vec<String> {
    let camel_expanded = camel_split_re().replace_all(text, "$1 $2");
    let mut tokens = Vec::new();
    for raw in split_re().split(&camel_expanded) {
        let lower = raw.to_lowercase();
        let alpha_only: String = lower.chars().filter(|c| c.is_alphanumeric()).collect();
        if alpha_only.len() > 1
            && alpha_only.chars().any(|c| c.is_alphabetic())
            && !stopwords().contains(alpha_only.as_str())
        {
            tokens.push(alpha_only.clone());
            tokens.extend(auto_split_compound(&alpha_only));
        }
    }
    tokens
}

/// Expand a tokenized query with synonym tokens, deduplicated.
pub fn expand_query(tokens: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = tokens.iter().cloned().collect();
    let mut expanded = tokens.to_vec();
    for token in tokens {
        if let Some(synonyms) = query_synonyms().get(token.as_str()) {
            for syn in *synonyms {
                if seen.insert(syn.to_string()) {
                    expanded.push(syn.to_string());
                }
            }
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenise_lowercases_and_splits() {
        let tokens = tokenise("Create_Calendar Event");
        assert!(tokens.contains(&"create".to_string()));
        assert!(tokens.contains(&"calendar".to_string()));
        assert!(tokens.contains(&"event".to_string()));
    }

    #[test]
    fn tokenise_splits_camel_case() {
        let tokens = tokenise("sendGmailMessage");
        assert!(tokens.contains(&"send".to_string()));
        assert!(tokens.contains(&"gmail".to_string()));
        assert!(tokens.contains(&"message".to_string()));
    }

    #[test]
    fn tokenise_drops_stopwords() {
        let tokens = tokenise("the meeting for you");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"for".to_string()));
        assert!(tokens.contains(&"meeting".to_string()));
    }

    #[test]
    fn compound_split_generates_candidates() {
        let tokens = tokenise("calendarevent");
        assert!(tokens.len() > 1);
    }

    #[test]
    fn expand_query_adds_synonyms() {
        let tokens = vec!["meeting".to_string()];
        let expanded = expand_query(&tokens);
        assert!(expanded.contains(&"calendar".to_string()));
        assert!(expanded.contains(&"event".to_string()));
    }

    #[test]
    fn expand_query_dedupes() {
        let tokens = vec!["meeting".to_string(), "calendar".to_string()];
        let expanded = expand_query(&tokens);
        let count = expanded.iter().filter(|t| t.as_str() == "calendar").count();
        assert_eq!(count, 1);
    }
}
