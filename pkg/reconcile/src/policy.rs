use serde::Serialize;

/// What the planner and executor do after a per-resource failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Stop at the first failed or unresolved resource.
    #[default]
    FailFast,
    /// Record the failure and keep going.
    ContinueOnError,
}

impl ErrorPolicy {
    pub fn from_flag(continue_on_error: bool) -> Self {
        if continue_on_error {
            ErrorPolicy::ContinueOnError
        } else {
            ErrorPolicy::FailFast
        }
    }

    pub fn continues(&self) -> bool {
        *self == ErrorPolicy::ContinueOnError
    }
}
