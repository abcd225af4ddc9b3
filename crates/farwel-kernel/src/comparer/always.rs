use super::Comparer;

/// Matches every path. Used as a terminal catch-all route.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl Comparer for Always {
    fn matches(&self, _path: &str) -> bool {
        true
    }
}
