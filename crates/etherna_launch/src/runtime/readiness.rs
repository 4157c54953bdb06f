//! Readiness detection from service log output
//!
//! A service is considered up when a line matches its success pattern and
//! failed when a line matches one of its failure patterns. Exclusion patterns
//! mark known benign lines that look like failures; they are checked before
//! the failure patterns.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// How a single output line relates to a service's readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// The service reports it is up
    Success,
    /// The service reports a fatal error
    Failure,
    /// Looks like a failure but is known to be benign
    Excluded,
    /// Anything else
    Neutral,
}

/// Strategy deciding what a log line means for readiness.
///
/// [`ReadinessRule`] is the log-pattern implementation; services with a native
/// health signal can plug in their own.
pub trait ReadinessCheck: Send + Sync + fmt::Debug {
    fn classify_line(&self, line: &str) -> LineClass;
}

/// Regex based readiness rule
#[derive(Debug, Clone)]
pub struct ReadinessRule {
    success: Regex,
    failures: Vec<Regex>,
    exclusions: Vec<Regex>,
}

impl ReadinessRule {
    /// Start building a rule with the given success pattern
    pub fn builder(success: &str) -> ReadinessRuleBuilder {
        ReadinessRuleBuilder {
            success: success.to_string(),
            failures: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    pub fn success_pattern(&self) -> &str {
        self.success.as_str()
    }
}

impl ReadinessCheck for ReadinessRule {
    fn classify_line(&self, line: &str) -> LineClass {
        if self.success.is_match(line) {
            LineClass::Success
        } else if self.exclusions.iter().any(|re| re.is_match(line)) {
            LineClass::Excluded
        } else if self.failures.iter().any(|re| re.is_match(line)) {
            LineClass::Failure
        } else {
            LineClass::Neutral
        }
    }
}

/// Builder for [`ReadinessRule`]
#[derive(Debug, Clone)]
pub struct ReadinessRuleBuilder {
    success: String,
    failures: Vec<String>,
    exclusions: Vec<String>,
}

impl ReadinessRuleBuilder {
    /// Add a pattern whose match means the service has fatally errored
    pub fn failure(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    /// Add a pattern for benign lines that must never count as failures
    pub fn exclude(mut self, pattern: &str) -> Self {
        self.exclusions.push(pattern.to_string());
        self
    }

    pub fn build(self) -> Result<ReadinessRule, ReadinessError> {
        Ok(ReadinessRule {
            success: compile(&self.success)?,
            failures: self
                .failures
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
            exclusions: self
                .exclusions
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex, ReadinessError> {
    Regex::new(pattern).map_err(|source| ReadinessError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Readiness state of a launched service as seen from its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Indeterminate,
    Ready,
    Failed,
}

impl ReadinessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::Failed)
    }
}

/// Result of classifying output so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: ReadinessState,
    /// Failure text, or the latest unmatched line while still starting
    pub diagnostic: Option<String>,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            state: ReadinessState::Indeterminate,
            diagnostic: None,
        }
    }
}

/// Classify one line given the classification reached so far.
///
/// Terminal classifications are sticky: once `Ready` or `Failed`, later lines
/// change nothing.
pub fn classify(line: &str, check: &dyn ReadinessCheck, prior: &Classification) -> Classification {
    if prior.state.is_terminal() {
        return prior.clone();
    }

    match check.classify_line(line) {
        LineClass::Success => Classification {
            state: ReadinessState::Ready,
            diagnostic: None,
        },
        LineClass::Failure => Classification {
            state: ReadinessState::Failed,
            diagnostic: Some(line.to_string()),
        },
        LineClass::Excluded | LineClass::Neutral => Classification {
            state: ReadinessState::Indeterminate,
            diagnostic: Some(line.to_string()),
        },
    }
}

/// Message used when a process exits without any retained output
pub fn exit_message(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("process exited with code {}", code),
        None => "process exited without an exit code".to_string(),
    }
}

/// Tracks the readiness of one service across its output lines
#[derive(Debug, Clone)]
pub struct ReadinessMatcher {
    check: Arc<dyn ReadinessCheck>,
    current: Classification,
}

impl ReadinessMatcher {
    pub fn new(check: Arc<dyn ReadinessCheck>) -> Self {
        Self {
            check,
            current: Classification::default(),
        }
    }

    /// Feed one output line. Blank lines are ignored.
    pub fn observe(&mut self, line: &str) -> &Classification {
        if !line.trim().is_empty() {
            self.current = classify(line, self.check.as_ref(), &self.current);
        }
        &self.current
    }

    /// The process exited: settle on a final classification
    pub fn finish(&mut self, code: Option<i32>) -> &Classification {
        if !self.current.state.is_terminal() {
            let diagnostic = self
                .current
                .diagnostic
                .take()
                .unwrap_or_else(|| exit_message(code));
            self.current = Classification {
                state: ReadinessState::Failed,
                diagnostic: Some(diagnostic),
            };
        }
        &self.current
    }

    pub fn classification(&self) -> &Classification {
        &self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.state.is_terminal()
    }
}

/// Errors that can occur when building readiness rules
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("Invalid readiness pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bee_rule() -> Arc<dyn ReadinessCheck> {
        Arc::new(
            ReadinessRule::builder(r#""address"="\[::\]:\d+""#)
                .failure(r#""level"="error""#)
                .exclude(r#""logger"="node/storageincentives""#)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_exclusion_beats_failure() {
        let rule = bee_rule();
        let line = r#""level"="error" "logger"="node/storageincentives" "msg"="no stake""#;
        let result = classify(line, rule.as_ref(), &Classification::default());

        assert_eq!(result.state, ReadinessState::Indeterminate);
        assert_eq!(result.diagnostic.as_deref(), Some(line));
    }

    #[test]
    fn test_failure_line() {
        let rule = bee_rule();
        let line = r#""level"="error" "logger"="node" "msg"="disk full""#;
        let result = classify(line, rule.as_ref(), &Classification::default());

        assert_eq!(result.state, ReadinessState::Failed);
        assert_eq!(result.diagnostic.as_deref(), Some(line));
    }

    #[test]
    fn test_success_clears_diagnostic() {
        let mut matcher = ReadinessMatcher::new(bee_rule());
        matcher.observe("booting");
        let result = matcher.observe(r#""msg"="listening" "address"="[::]:1634""#);

        assert_eq!(result.state, ReadinessState::Ready);
        assert_eq!(result.diagnostic, None);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut matcher = ReadinessMatcher::new(bee_rule());
        matcher.observe(r#""level"="error" "msg"="boom""#);
        matcher.observe(r#""address"="[::]:1634""#);
        matcher.finish(Some(0));

        let result = matcher.classification();
        assert_eq!(result.state, ReadinessState::Failed);
        assert_eq!(result.diagnostic.as_deref(), Some(r#""level"="error" "msg"="boom""#));

        let mut ready = ReadinessMatcher::new(bee_rule());
        ready.observe(r#""address"="[::]:1634""#);
        ready.observe(r#""level"="error""#);
        assert_eq!(ready.finish(Some(1)).state, ReadinessState::Ready);
    }

    #[test]
    fn test_only_latest_line_retained() {
        let mut matcher = ReadinessMatcher::new(bee_rule());
        matcher.observe("first");
        matcher.observe("second");
        let result = matcher.finish(Some(2));

        assert_eq!(result.state, ReadinessState::Failed);
        assert_eq!(result.diagnostic.as_deref(), Some("second"));
    }

    #[test]
    fn test_exit_without_output() {
        let mut matcher = ReadinessMatcher::new(bee_rule());
        matcher.observe("   ");
        let result = matcher.finish(Some(125));

        assert_eq!(result.diagnostic.as_deref(), Some("process exited with code 125"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = ReadinessRule::builder("(unclosed").build();
        assert!(matches!(result, Err(ReadinessError::InvalidPattern { .. })));
    }
}
