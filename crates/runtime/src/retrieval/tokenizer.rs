//! Lowercase/alphanumeric tokenizer with a configurable stopword set
//! (§4.4 "Stopwords configurable").

use std::collections::HashSet;

pub fn default_stopwords() -> HashSet<String> {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "will", "with",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn tokenize(text: &str, stopwords: &HashSet<String>) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .filter(|s| !stopwords.contains(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_lowercases() {
        let tokens = tokenize("Hello, World! Rust-lang.", &HashSet::new());
        assert_eq!(tokens, vec!["hello", "world", "rust", "lang"]);
    }

    #[test]
    fn filters_stopwords() {
        let stop = default_stopwords();
        let tokens = tokenize("the quick fox and the lazy dog", &stop);
        assert_eq!(tokens, vec!["quick", "fox", "lazy", "dog"]);
    }
}
