//! Word splitting for annotation keys.
//!
//! Legacy annotations were spelled in CamelCase (`HealthCheckFlag`), current
//! ones are kebab-case (`health-check-flag`). Both are split into words at
//! character class transitions and joined back in lower case.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Lower,
    Upper,
    Digit,
    Other,
}

impl Class {
    fn of(c: char) -> Self {
        if c.is_lowercase() {
            Self::Lower
        } else if c.is_uppercase() {
            Self::Upper
        } else if c.is_numeric() {
            Self::Digit
        } else {
            Self::Other
        }
    }
}

/// Split a string into runs of the same character class.
///
/// An upper case run followed by a lower case run gives its last
/// character to the lower case run, so `HTTPServer` becomes
/// `["HTTP", "Server"]`. Runs left empty by this are dropped.
pub fn split(s: &str) -> Vec<String> {
    let mut runs: Vec<(Class, Vec<char>)> = Vec::new();
    for c in s.chars() {
        let class = Class::of(c);
        match runs.last_mut() {
            Some((last, chars)) if *last == class => chars.push(c),
            _ => runs.push((class, vec![c])),
        }
    }

    for i in 0..runs.len().saturating_sub(1) {
        if runs[i].0 == Class::Upper && runs[i + 1].0 == Class::Lower {
            if let Some(c) = runs[i].1.pop() {
                runs[i + 1].1.insert(0, c);
            }
        }
    }

    runs.into_iter()
        .filter(|(_, chars)| !chars.is_empty())
        .map(|(_, chars)| chars.into_iter().collect())
        .collect()
}

/// Normalise an annotation name to lower case words joined by `-`.
pub fn normalize(name: &str) -> String {
    split(name)
        .into_iter()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}
