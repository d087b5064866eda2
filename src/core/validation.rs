use std::fmt;

/// An issue found while validating an elaborated workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// The workflow cannot run as declared.
    Error(String),
    /// The workflow runs, but part of what it computes goes nowhere.
    Warning(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::Error(msg) => write!(f, "Error: {}", msg),
            ValidationIssue::Warning(msg) => write!(f, "Warning: {}", msg),
        }
    }
}

/// The result of a workflow validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Error(msg.into()));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self.issues.iter().any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|i| match i {
            ValidationIssue::Error(msg) => Some(msg.as_str()),
            ValidationIssue::Warning(_) => None,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|i| match i {
            ValidationIssue::Warning(msg) => Some(msg.as_str()),
            ValidationIssue::Error(_) => None,
        })
    }

    /// Logs every issue at the matching level.
    pub fn log_summary(&self) {
        if self.is_safe() && !self.has_warnings() {
            log::info!("Workflow validation passed: every outflow is read and every node can run.");
            return;
        }
        for issue in &self.issues {
            match issue {
                ValidationIssue::Error(msg) => log::error!("{}", msg),
                ValidationIssue::Warning(msg) => log::warn!("{}", msg),
            }
        }
    }
}
