//! Identifier generation
//!
//! All ids use the format: `{6-char-hex}-{type}-{slug}`, e.g.
//! `01a3f2-session-refactor-auth`. The hex prefix comes from a UUIDv7 so
//! ids sort roughly by creation time.

/// Generate a domain id from a type tag and a human title
pub fn generate_id(kind: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.simple().to_string()[..6];
    format!("{}-{}-{}", hex_prefix, kind, slugify(title))
}

/// Slugify a title for use in ids
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

/// Typed wrapper around a generated id
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    /// Generate a fresh id for the given type tag
    pub fn new(kind: &str, title: &str) -> Self {
        Self(generate_id(kind, title))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The type portion of the id, if well-formed
    pub fn kind(&self) -> Option<&str> {
        self.0.splitn(3, '-').nth(1)
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DomainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DomainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("session", "Refactor Auth Module");
        assert!(id.contains("-session-"));
        assert!(id.contains("refactor-auth-module"));
        assert_eq!(id.split('-').next().unwrap().len(), 6);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Fix bug #42!"), "fix-bug-42");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
    }

    #[test]
    fn test_slug_truncates_long_titles() {
        let slug = slugify("one two three four five six seven eight");
        assert_eq!(slug, "one-two-three-four-five-six");
    }

    #[test]
    fn test_domain_id_kind() {
        let id = DomainId::from("01a3f2-chunk-parse-config");
        assert_eq!(id.kind(), Some("chunk"));
    }

    #[test]
    fn test_domain_id_serde_transparent() {
        let id = DomainId::from("01a3f2-task-tidy");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"01a3f2-task-tidy\"");
    }
}
