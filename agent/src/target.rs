//! Decides whether a freshly specialized process gets its properties filtered.

/// Process names (Android package names) whose property view is filtered.
pub const TARGET_PACKAGES: &[&str] = &["com.target.app1", "com.target.app2"];

/// True iff `identity` is exactly one of [`TARGET_PACKAGES`].
///
/// No normalization: matching is case-sensitive and whitespace is significant.
pub fn is_target(identity: &str) -> bool {
    TARGET_PACKAGES.contains(&identity)
}
