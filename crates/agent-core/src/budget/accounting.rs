//! Chat-format token accounting rules.
//!
//! Chat prompts cost more than the sum of their encoded fields: every message
//! carries a fixed framing overhead, a `name` field shifts that overhead, and
//! every reply is primed with a few tokens. The numbers differ per model family
//! and are kept in a static table here.

/// Overheads applied on top of the encoded message fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountingRules {
    /// Framing tokens added for every message
    pub tokens_per_message: i32,
    /// Adjustment applied when a message carries a `name` field
    pub tokens_per_name: i32,
    /// Tokens added once per request to prime the assistant reply
    pub reply_priming: u32,
}

const LEGACY_RULES: AccountingRules = AccountingRules {
    tokens_per_message: 4,
    tokens_per_name: -1,
    reply_priming: 3,
};

const DEFAULT_RULES: AccountingRules = AccountingRules {
    tokens_per_message: 3,
    tokens_per_name: 1,
    reply_priming: 3,
};

/// Dated snapshots with documented accounting.
const SNAPSHOT_RULES: &[(&str, AccountingRules)] = &[
    ("gpt-3.5-turbo-0301", LEGACY_RULES),
    ("gpt-3.5-turbo-0613", DEFAULT_RULES),
    ("gpt-3.5-turbo-16k-0613", DEFAULT_RULES),
    ("gpt-4-0314", DEFAULT_RULES),
    ("gpt-4-32k-0314", DEFAULT_RULES),
    ("gpt-4-0613", DEFAULT_RULES),
    ("gpt-4-32k-0613", DEFAULT_RULES),
];

/// Families whose accounting has been stable across releases.
const STABLE_FAMILIES: &[&str] = &["gpt-4o", "gpt-4.1", "o1", "o3", "o4"];

/// Undated aliases that may drift, and the snapshot they are pinned to.
const DRIFTING_ALIASES: &[(&str, &str)] = &[
    ("gpt-3.5-turbo", "gpt-3.5-turbo-0613"),
    ("gpt-4", "gpt-4-0613"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The model has its own entry in the table.
    Exact,
    /// The model is an alias that may change; accounting follows a dated snapshot.
    Pinned { snapshot: &'static str },
    /// Nothing matched; default rules are used.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAccounting {
    pub rules: AccountingRules,
    pub resolution: Resolution,
}

impl ModelAccounting {
    /// Log the drift / fallback warning for `model`, if its resolution needs one.
    pub fn warn_if_inexact(&self, model: &str) {
        match self.resolution {
            Resolution::Exact => {}
            Resolution::Pinned { snapshot } => {
                tracing::warn!(
                    "{model} may update over time. Returning num tokens assuming {snapshot}."
                );
            }
            Resolution::Fallback => {
                tracing::warn!(
                    "No token accounting rules for model {model}; using default overheads."
                );
            }
        }
    }
}

/// Resolve the accounting rules for `model`.
///
/// Exact snapshots win, then stable families by prefix, then drifting aliases
/// (pinned to their dated snapshot), then the default rules.
pub fn resolve_accounting(model: &str) -> ModelAccounting {
    if let Some((_, rules)) = SNAPSHOT_RULES.iter().find(|(name, _)| *name == model) {
        return ModelAccounting {
            rules: *rules,
            resolution: Resolution::Exact,
        };
    }

    if STABLE_FAMILIES
        .iter()
        .any(|family| model.starts_with(family))
    {
        return ModelAccounting {
            rules: DEFAULT_RULES,
            resolution: Resolution::Exact,
        };
    }

    for (alias, snapshot) in DRIFTING_ALIASES {
        if model.contains(alias) {
            let rules = SNAPSHOT_RULES
                .iter()
                .find(|(name, _)| name == snapshot)
                .map(|(_, rules)| *rules)
                .unwrap_or(DEFAULT_RULES);
            return ModelAccounting {
                rules,
                resolution: Resolution::Pinned { snapshot },
            };
        }
    }

    ModelAccounting {
        rules: DEFAULT_RULES,
        resolution: Resolution::Fallback,
    }
}
