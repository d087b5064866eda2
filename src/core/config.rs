use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DEFAULT_MAX_CONCURRENCY: usize = 1;

/// What a node does when one of its actor steps fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExceptionPolicy {
    /// Surface the failure to the caller of the workflow run.
    #[default]
    Rethrow,
    /// Stop stepping the node and send end-of-stream on all of its outflows.
    EndFlow,
    /// Log the failure and terminate the process with a non-zero exit code.
    Exit,
}

impl fmt::Display for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionPolicy::Rethrow => "rethrow",
            ExceptionPolicy::EndFlow => "end-flow",
            ExceptionPolicy::Exit => "exit",
        };
        f.write_str(name)
    }
}

impl FromStr for ExceptionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rethrow" => Ok(ExceptionPolicy::Rethrow),
            "end-flow" | "endflow" | "end_flow" => Ok(ExceptionPolicy::EndFlow),
            "exit" => Ok(ExceptionPolicy::Exit),
            other => Err(format!("Unknown exception policy: {}", other)),
        }
    }
}

/// Execution defaults applied to actor nodes that do not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on concurrently executing steps per node.
    pub max_concurrency: usize,
    /// Whether concurrent nodes publish results in submission order.
    pub ordered: bool,
    pub exception_policy: ExceptionPolicy,
    /// Log a warning when a run wraps up with undelivered packets.
    pub warn_on_unused_data: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            ordered: true,
            exception_policy: ExceptionPolicy::Rethrow,
            warn_on_unused_data: true,
        }
    }
}

impl ExecutionConfig {
    /// Builds a configuration from `CINNABAR_*` environment variables.
    ///
    /// Unset or unparseable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("CINNABAR_MAX_CONCURRENCY") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => config.max_concurrency = n,
                _ => log::warn!("Ignoring invalid CINNABAR_MAX_CONCURRENCY value '{}'", value),
            }
        }

        if let Ok(value) = std::env::var("CINNABAR_ORDERED") {
            config.ordered = parse_flag(&value).unwrap_or(config.ordered);
        }

        if let Ok(value) = std::env::var("CINNABAR_EXCEPTION_POLICY") {
            match value.parse() {
                Ok(policy) => config.exception_policy = policy,
                Err(e) => log::warn!("Ignoring CINNABAR_EXCEPTION_POLICY: {}", e),
            }
        }

        if let Ok(value) = std::env::var("CINNABAR_WARN_UNUSED_DATA") {
            config.warn_on_unused_data = parse_flag(&value).unwrap_or(config.warn_on_unused_data);
        }

        config
    }

    /// Sets the default per-node concurrency.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrency` is 0.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        assert!(max_concurrency > 0, "Max concurrency must be greater than 0");
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_exception_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.exception_policy = policy;
        self
    }

    pub fn with_warn_on_unused_data(mut self, warn: bool) -> Self {
        self.warn_on_unused_data = warn;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.max_concurrency, 1);
        assert!(config.ordered);
        assert_eq!(config.exception_policy, ExceptionPolicy::Rethrow);
        assert!(config.warn_on_unused_data);
    }

    #[test]
    fn test_builder_setters() {
        let config = ExecutionConfig::default()
            .with_max_concurrency(4)
            .with_ordered(false)
            .with_exception_policy(ExceptionPolicy::EndFlow)
            .with_warn_on_unused_data(false);
        assert_eq!(config.max_concurrency, 4);
        assert!(!config.ordered);
        assert_eq!(config.exception_policy, ExceptionPolicy::EndFlow);
        assert!(!config.warn_on_unused_data);
    }

    #[test]
    #[should_panic(expected = "Max concurrency must be greater than 0")]
    fn test_zero_concurrency_panics() {
        let _ = ExecutionConfig::default().with_max_concurrency(0);
    }

    #[test]
    fn test_exception_policy_parsing() {
        assert_eq!("END-FLOW".parse::<ExceptionPolicy>(), Ok(ExceptionPolicy::EndFlow));
        assert_eq!("exit".parse::<ExceptionPolicy>(), Ok(ExceptionPolicy::Exit));
        assert!("explode".parse::<ExceptionPolicy>().is_err());
        assert_eq!(ExceptionPolicy::EndFlow.to_string(), "end-flow");
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!(parse_flag("Yes"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
