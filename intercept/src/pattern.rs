use regex::Regex;

use crate::types::HookError;

/// Selects which loaded modules have their import slots rebound.
///
/// The pattern is an unanchored regular expression tested against the
/// module's full path, so `.*` selects every module and `libc\.so$` selects
/// only libc.
#[derive(Debug, Clone)]
pub struct LibrarySelector {
    original: String,
    regex: Regex,
}

impl LibrarySelector {
    pub fn new(pattern: &str) -> Result<Self, HookError> {
        let regex = Regex::new(pattern).map_err(|e| HookError::InvalidSelector {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            original: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, module_path: &str) -> bool {
        self.regex.is_match(module_path)
    }

    pub fn original(&self) -> &str {
        &self.original
    }
}
