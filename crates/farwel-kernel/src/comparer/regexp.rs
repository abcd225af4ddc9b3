use regex::Regex;

use super::Comparer;
use crate::error::{FarwelError, FarwelResult};

/// Regular-expression comparer with search semantics.
///
/// The pattern matches if it occurs anywhere in the path; anchor it with
/// `^`/`$` for a full match.
#[derive(Debug, Clone)]
pub struct Regexp {
    re: Regex,
}

impl Regexp {
    pub fn new(pattern: &str) -> FarwelResult<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| FarwelError::invalid_path(format!("bad regexp {pattern:?}: {e}")))?;
        Ok(Self { re })
    }

    pub fn as_str(&self) -> &str {
        self.re.as_str()
    }
}

impl Comparer for Regexp {
    fn matches(&self, path: &str) -> bool {
        self.re.is_match(path)
    }
}
