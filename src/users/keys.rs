use regex::Regex;

use crate::error::{SyncError, SyncResult};

use super::models::KeyBlob;

/// Recognizes the blob names holding one user's public keys.
///
/// A name matches when it is `[prefix]<principal>[.<tag>]<suffix>`, where the
/// tag is any run of ASCII alphanumerics, `-`, `_` or `.`. The prefix group is
/// optional even when a prefix is configured.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    regex: Regex,
}

impl KeyPattern {
    pub fn new(principal: &str, prefix: Option<&str>, suffix: &str) -> SyncResult<Self> {
        if principal.is_empty() {
            return Err(SyncError::Validation(
                "no principal name set, unable to build ssh key pattern".into(),
            ));
        }
        if suffix.is_empty() {
            return Err(SyncError::Validation("ssh key suffix must not be empty".into()));
        }

        let prefix = match prefix.filter(|p| !p.is_empty()) {
            Some(p) => format!("(?:{})?", regex::escape(p)),
            None => String::new(),
        };
        let pattern = format!(
            r"^{prefix}{}(?:\.[A-Za-z0-9._-]+)?{}$",
            regex::escape(principal),
            regex::escape(suffix)
        );

        let regex = Regex::new(&pattern)
            .map_err(|e| SyncError::Validation(format!("invalid ssh key pattern: {e}")))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, blob_name: &str) -> bool {
        self.regex.is_match(blob_name)
    }

    /// The subset of `blobs` belonging to this pattern's owner, in listing order.
    pub fn select<'a>(&self, blobs: &'a [KeyBlob]) -> Vec<&'a KeyBlob> {
        blobs.iter().filter(|b| self.matches(&b.name)).collect()
    }
}
