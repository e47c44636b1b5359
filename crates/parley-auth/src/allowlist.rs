use std::collections::HashSet;

/// Identities permitted to obtain credentials.
///
/// Entries are compared trimmed and ASCII-lowercased. An empty allowlist
/// permits nobody.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: HashSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| normalize(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn permits(&self, subject: &str) -> bool {
        self.entries.contains(&normalize(subject))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(subject: &str) -> String {
    subject.trim().to_ascii_lowercase()
}
