//! Resume-prefix resolution over a sorted trace set.

/// Index of the first trace id (in the given sorted order) starting with `prefix`.
///
/// Returns `None` when no id matches.
pub fn resolve_resume_index<S: AsRef<str>>(sorted_ids: &[S], prefix: &str) -> Option<usize> {
    sorted_ids
        .iter()
        .position(|id| id.as_ref().starts_with(prefix))
}
