use std::fmt;
use uuid::Uuid;

/// `{namespace}/{name}` model repository id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub namespace: String,
    pub name: String,
}

impl RepoId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// `{namespace}/{prefix}-{uuid v4}`; a new id on every call.
    pub fn unique(namespace: &str, prefix: &str) -> Self {
        Self::new(namespace, format!("{prefix}-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.namespace, self.name) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn unique_ids_have_prefix_and_uuid() {
        let id = RepoId::unique("cantemizyurek", "legal-ft");
        let s = id.to_string();
        assert!(s.starts_with("cantemizyurek/legal-ft-"));
        let suffix = &id.name["legal-ft-".len()..];
        let parsed = Uuid::parse_str(suffix).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn ids_do_not_repeat() {
        let ids: HashSet<String> = (0..200).map(|_| RepoId::unique("ns", "legal-ft").to_string()).collect();
        assert_eq!(ids.len(), 200);
    }
}
