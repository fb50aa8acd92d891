/// Get the final component of a path that may use either `/` or `\` as a separator.
///
/// Shader paths embedded in dumps usually come from a Windows build machine, so
/// `std::path` is not enough on other hosts.
pub fn basename(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path)
}
