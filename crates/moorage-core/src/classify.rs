//! Failure classification and retry decisions.
//!
//! Raw failure text is matched, case-insensitively, against substrings per
//! category. Patterns from `[error_patterns]` are consulted before the
//! built-in ones. Every classified error is kept in the classifier's history
//! for [`ErrorReport`]s; one classifier belongs to one preparation run.

use crate::retry::RetryPolicy;
use moorage_schema::EngineConfig;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

const RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Daemon,
    Image,
    Container,
    Build,
    Network,
    Filesystem,
    Resource,
    Configuration,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Daemon => "daemon",
            ErrorCategory::Image => "image",
            ErrorCategory::Container => "container",
            ErrorCategory::Build => "build",
            ErrorCategory::Network => "network",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Configuration => "configuration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "daemon" => ErrorCategory::Daemon,
            "image" => ErrorCategory::Image,
            "container" => ErrorCategory::Container,
            "build" => ErrorCategory::Build,
            "network" => ErrorCategory::Network,
            "filesystem" => ErrorCategory::Filesystem,
            "resource" => ErrorCategory::Resource,
            "configuration" => ErrorCategory::Configuration,
            _ => return None,
        })
    }

    fn recommendation(self) -> &'static str {
        match self {
            ErrorCategory::Daemon => "Check Docker installation and daemon status with 'docker info'",
            ErrorCategory::Image => "Verify Docker image names and registry access",
            ErrorCategory::Container => {
                "Clean up conflicting containers with 'docker container prune'"
            }
            ErrorCategory::Build => "Check Dockerfile syntax and build context",
            ErrorCategory::Network => "Verify network connectivity and Docker registry access",
            ErrorCategory::Filesystem => "Check file permissions and disk space",
            ErrorCategory::Resource => "Free up system resources or increase limits",
            ErrorCategory::Configuration => "Review the engine configuration and step definitions",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    /// The raw failure text.
    pub details: String,
    pub retry_possible: bool,
    pub suggested_action: String,
    pub context: BTreeMap<String, String>,
    pub occurred_at: String,
}

struct Rule {
    category: ErrorCategory,
    config_key: &'static str,
    severity: Severity,
    retry_possible: bool,
    message: &'static str,
    action: &'static str,
    patterns: &'static [&'static str],
}

const RULES: &[Rule] = &[
    Rule {
        category: ErrorCategory::Daemon,
        config_key: "daemon_connection",
        severity: Severity::Critical,
        retry_possible: true,
        message: "Docker daemon is not accessible",
        action: "Ensure Docker daemon is running and accessible",
        patterns: &[
            "cannot connect to the docker daemon",
            "docker daemon is not running",
            "connection refused",
            "docker.sock",
        ],
    },
    Rule {
        category: ErrorCategory::Image,
        config_key: "image_not_found",
        severity: Severity::High,
        retry_possible: true,
        message: "Docker image not available",
        action: "Check image name or build the image locally",
        patterns: &[
            "no such image",
            "pull access denied",
            "repository does not exist",
            "image not found",
            "manifest unknown",
        ],
    },
    Rule {
        category: ErrorCategory::Container,
        config_key: "container_conflict",
        severity: Severity::Medium,
        retry_possible: true,
        message: "Docker container conflict",
        action: "Remove conflicting container or use different name",
        patterns: &[
            "container already exists",
            "container is running",
            "container not found",
            "conflict",
            "name is already in use",
        ],
    },
    Rule {
        category: ErrorCategory::Build,
        config_key: "build_error",
        severity: Severity::High,
        retry_possible: false,
        message: "Docker build failed",
        action: "Check Dockerfile syntax and build context",
        patterns: &["dockerfile", "build failed", "build context", "step failed"],
    },
    Rule {
        category: ErrorCategory::Filesystem,
        config_key: "filesystem_error",
        severity: Severity::High,
        retry_possible: false,
        message: "Filesystem operation failed",
        action: "Check file permissions and disk space",
        patterns: &[
            "permission denied",
            "no such file or directory",
            "directory not empty",
            "disk space",
        ],
    },
    Rule {
        category: ErrorCategory::Network,
        config_key: "network_error",
        severity: Severity::Medium,
        retry_possible: true,
        message: "Network operation failed",
        action: "Check network connectivity and Docker registry access",
        patterns: &["network", "timeout", "connection", "dns", "tls"],
    },
    Rule {
        category: ErrorCategory::Resource,
        config_key: "resource_error",
        severity: Severity::High,
        retry_possible: false,
        message: "Resource constraint encountered",
        action: "Free up system resources or increase limits",
        patterns: &["out of memory", "resource", "quota", "limit", "no space left"],
    },
];

/// Summary of a run's classified failures.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorReport {
    /// `no_errors` or `errors_found`.
    pub status: String,
    pub total_errors: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
    pub recent_errors: Vec<ClassifiedError>,
}

impl ErrorReport {
    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }
}

/// Classification, retry and reporting for one preparation run.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, error: &str, context: &BTreeMap<String, String>) -> ClassifiedError;
    fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool;
    /// Pause after `attempt` failed. `key` names the retrying task and
    /// decorrelates jitter between tasks.
    fn retry_delay(&self, attempt: u32, key: &str) -> Duration;
    fn max_attempts(&self) -> u32;
    fn report(&self) -> ErrorReport;
}

pub struct ErrorClassifier {
    policy: RetryPolicy,
    retryable: BTreeSet<ErrorCategory>,
    extra_patterns: BTreeMap<&'static str, Vec<String>>,
    history: Mutex<Vec<ClassifiedError>>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ErrorClassifier {
    pub fn new(policy: RetryPolicy, retryable: impl IntoIterator<Item = ErrorCategory>) -> Self {
        Self {
            policy,
            retryable: retryable.into_iter().collect(),
            extra_patterns: BTreeMap::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let retryable = config
            .retry
            .retryable_categories
            .iter()
            .filter_map(|name| ErrorCategory::from_name(name));
        let mut classifier = Self::new(RetryPolicy::from_config(&config.retry), retryable);
        for rule in RULES {
            let extra = config.patterns_for(rule.config_key);
            if !extra.is_empty() {
                classifier.extra_patterns.insert(rule.config_key, extra);
            }
        }
        classifier
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn history(&self) -> Vec<ClassifiedError> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn match_rule(&self, lowered: &str) -> Option<&'static Rule> {
        let configured = RULES.iter().find(|rule| {
            self.extra_patterns
                .get(rule.config_key)
                .is_some_and(|extra| extra.iter().any(|p| lowered.contains(p.as_str())))
        });
        configured.or_else(|| {
            RULES
                .iter()
                .find(|rule| rule.patterns.iter().any(|p| lowered.contains(p)))
        })
    }
}

impl FailureClassifier for ErrorClassifier {
    fn classify(&self, error: &str, context: &BTreeMap<String, String>) -> ClassifiedError {
        let lowered = error.to_lowercase();
        let classified = match self.match_rule(&lowered) {
            Some(rule) => ClassifiedError {
                category: rule.category,
                severity: rule.severity,
                message: rule.message.to_owned(),
                details: error.to_owned(),
                retry_possible: rule.retry_possible,
                suggested_action: rule.action.to_owned(),
                context: context.clone(),
                occurred_at: chrono::Utc::now().to_rfc3339(),
            },
            None => ClassifiedError {
                category: ErrorCategory::Configuration,
                severity: Severity::Medium,
                message: format!("Operation failed: {}", error.trim()),
                details: error.to_owned(),
                retry_possible: true,
                suggested_action: "Review configuration and try again".to_owned(),
                context: context.clone(),
                occurred_at: chrono::Utc::now().to_rfc3339(),
            },
        };
        debug!(
            "classified failure as {}/{}: {}",
            classified.category, classified.severity, classified.message
        );
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(classified.clone());
        classified
    }

    fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        if attempt >= self.policy.max_attempts {
            return false;
        }
        if !error.retry_possible || error.severity == Severity::Critical {
            return false;
        }
        self.retryable.contains(&error.category)
    }

    fn retry_delay(&self, attempt: u32, key: &str) -> Duration {
        self.policy.for_key(key).delay(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    fn report(&self) -> ErrorReport {
        let history = self.history();
        if history.is_empty() {
            return ErrorReport {
                status: "no_errors".to_owned(),
                total_errors: 0,
                by_category: BTreeMap::new(),
                by_severity: BTreeMap::new(),
                recommendations: Vec::new(),
                recent_errors: Vec::new(),
            };
        }

        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for e in &history {
            *by_category.entry(e.category.as_str().to_owned()).or_insert(0) += 1;
            *by_severity.entry(e.severity.as_str().to_owned()).or_insert(0) += 1;
            seen.insert(e.category);
        }
        let recommendations = seen
            .into_iter()
            .map(|c| c.recommendation().to_owned())
            .collect();
        let skip = history.len().saturating_sub(RECENT_ERRORS);

        ErrorReport {
            status: "errors_found".to_owned(),
            total_errors: history.len(),
            by_category,
            by_severity,
            recommendations,
            recent_errors: history.into_iter().skip(skip).collect(),
        }
    }
}
