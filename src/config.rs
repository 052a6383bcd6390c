//! Session configuration.

/// Knobs for a [`Session`](crate::Session).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Worker threads for per-module stage work; 0 lets rayon decide.
    pub parallelism: usize,
    /// Reference the built-in `VBA` library from every project.
    pub include_builtin_library: bool,
    /// Record an `AmbiguousResolution` diagnostic when a public-name clash
    /// is settled by the tie-break.
    pub report_ambiguity: bool,
    /// Name of the background thread [`Session::begin_pass`] spawns.
    ///
    /// [`Session::begin_pass`]: crate::Session::begin_pass
    pub pass_thread_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            include_builtin_library: true,
            report_ambiguity: true,
            pass_thread_name: "vbscope-pass".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = threads;
        self
    }

    pub fn with_builtin_library(mut self, include: bool) -> Self {
        self.include_builtin_library = include;
        self
    }

    pub fn with_ambiguity_reporting(mut self, report: bool) -> Self {
        self.report_ambiguity = report;
        self
    }

    pub fn with_pass_thread_name(mut self, name: impl Into<String>) -> Self {
        self.pass_thread_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.parallelism, 0);
        assert!(config.include_builtin_library);
        assert!(config.report_ambiguity);
    }

    #[test]
    fn test_builders_chain() {
        let config = SessionConfig::new()
            .with_parallelism(2)
            .with_builtin_library(false)
            .with_pass_thread_name("worker");
        assert_eq!(config.parallelism, 2);
        assert!(!config.include_builtin_library);
        assert_eq!(config.pass_thread_name, "worker");
    }
}
