//! Descriptor filtering for device and storage selection.

use regex::Regex;

/// Unanchored regular expression over descriptor strings. An empty pattern
/// matches everything.
#[derive(Debug, Clone, Default)]
pub struct FilterPattern {
    re: Option<Regex>,
}

impl FilterPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            re: Some(Regex::new(pattern)?),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_none()
    }

    pub fn as_str(&self) -> &str {
        self.re.as_ref().map(Regex::as_str).unwrap_or("")
    }

    pub fn matches(&self, descriptor: &str) -> bool {
        self.re.as_ref().is_none_or(|re| re.is_match(descriptor))
    }
}

/// Items whose descriptor matches `pattern`, in their original order.
pub fn filter<T, F>(items: Vec<T>, pattern: &FilterPattern, descriptor: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    items
        .into_iter()
        .filter(|item| pattern.matches(descriptor(item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<&'static str> {
        vec!["Internal Storage", "SD Card", "Internal shared storage"]
    }

    #[test]
    fn empty_pattern_matches_all() {
        let p = FilterPattern::new("").unwrap();
        assert!(p.is_empty());
        assert_eq!(filter(names(), &p, |s| *s).len(), 3);
    }

    #[test]
    fn search_is_unanchored() {
        let p = FilterPattern::new("Card").unwrap();
        assert_eq!(filter(names(), &p, |s| *s), vec!["SD Card"]);
        let p = FilterPattern::new("^Internal").unwrap();
        assert_eq!(filter(names(), &p, |s| *s).len(), 2);
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(FilterPattern::new("(unclosed").is_err());
    }
}
