use serde::Serialize;

/// A directory user that did not become a managed account.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedUser {
    pub directory_id: String,
    pub reason: String,
}

/// A managed account whose provisioning or disabling failed.
#[derive(Debug, Clone, Serialize)]
pub struct AccountFailure {
    pub username: String,
    pub error: String,
}

/// Outcome of one synchronization run.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub provisioned: Vec<String>,
    pub disabled: Vec<String>,
    pub skipped: Vec<SkippedUser>,
    /// Accounts whose authorized keys were left untouched this run.
    pub unmanaged_keys: Vec<String>,
    pub failures: Vec<AccountFailure>,
    pub failed_groups: Vec<String>,
}

impl SyncReport {
    pub fn skip(&mut self, directory_id: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedUser {
            directory_id: directory_id.to_string(),
            reason: reason.into(),
        });
    }

    pub fn fail(&mut self, username: &str, error: impl ToString) {
        self.failures.push(AccountFailure {
            username: username.to_string(),
            error: error.to_string(),
        });
    }

    /// True when every run-level step succeeded; per-account failures are
    /// reported but do not make the run unsuccessful.
    pub fn is_success(&self) -> bool {
        self.failed_groups.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} provisioned, {} disabled, {} skipped, {} failed",
            self.provisioned.len(),
            self.disabled.len(),
            self.skipped.len(),
            self.failures.len()
        );
        if !self.failed_groups.is_empty() {
            summary.push_str(&format!(
                "; unresolved directory groups: {}",
                self.failed_groups.join(", ")
            ));
        }
        summary
    }
}
