use super::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct AliasRule {
    key: String,
    value: String,
}

/// Parsed `key:value,key:value` display name rules.
/// A key matches a device UUID, its advertised name, or its IP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasRules {
    rules: Vec<AliasRule>,
}

impl AliasRules {
    /// Parse and validate the rule string. Blank segments are skipped; the
    /// value may itself contain `:` since only the first one separates.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let mut rules = Vec::new();

        for raw in text.split(',') {
            if raw.trim().is_empty() {
                continue;
            }

            let (key, value) = raw
                .split_once(':')
                .ok_or_else(|| StoreError::InvalidAliasRule { rule: raw.to_string() })?;

            let key = key.trim();
            if key.is_empty() {
                return Err(StoreError::InvalidAliasRule { rule: raw.to_string() });
            }

            rules.push(AliasRule {
                key: key.to_string(),
                value: value.trim().to_string(),
            });
        }

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Value of the first rule whose key equals `uuid`, `name` or `ip`
    pub fn resolve(&self, uuid: &str, name: &str, ip: &str) -> Option<&str> {
        let candidates = [uuid.trim(), name.trim(), ip.trim()];
        self.rules
            .iter()
            .find(|rule| candidates.contains(&rule.key.as_str()))
            .map(|rule| rule.value.as_str())
    }
}
