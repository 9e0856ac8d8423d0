use std::{collections::BTreeMap, str::FromStr};

use crate::error::SlbError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Equal(String, String),
    NotEqual(String, String),
    Exists(String),
    DoesNotExist(String),
}

/// Node label selector taken from the `backend-label` annotation.
///
/// Supports `key=value`, `key!=value`, `key` and `!key` rules
/// separated by commas. All rules must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    rules: Vec<Rule>,
}

impl LabelFilter {
    #[must_use]
    pub fn check(&self, labels: &BTreeMap<String, String>) -> bool {
        self.rules.iter().all(|rule| match rule {
            Rule::Equal(key, value) => labels.get(key) == Some(value),
            Rule::NotEqual(key, value) => labels.get(key) != Some(value),
            Rule::Exists(key) => labels.contains_key(key),
            Rule::DoesNotExist(key) => !labels.contains_key(key),
        })
    }
}

impl FromStr for LabelFilter {
    type Err = SlbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rules = Vec::new();
        for rule in s.split(',').map(str::trim).filter(|rule| !rule.is_empty()) {
            let parts = rule.split('=').map(str::trim).collect::<Vec<_>>();
            match *parts.as_slice() {
                [key] if !key.is_empty() => {
                    if let Some(key) = key.strip_prefix('!') {
                        rules.push(Rule::DoesNotExist(key.to_string()));
                    } else {
                        rules.push(Rule::Exists(key.to_string()));
                    }
                }
                [key, value] if !key.is_empty() => {
                    if let Some(key) = key.strip_suffix('!') {
                        rules.push(Rule::NotEqual(key.to_string(), value.to_string()));
                    } else {
                        rules.push(Rule::Equal(key.to_string(), value.to_string()));
                    }
                }
                _ => return Err(SlbError::InvalidNodeFilter(rule.to_string())),
            }
        }
        Ok(Self { rules })
    }
}
