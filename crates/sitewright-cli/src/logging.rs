// Logging and verbosity control

use std::sync::atomic::{AtomicU8, Ordering};

use tracing_subscriber::EnvFilter;

/// Environment variable holding a log filter (`debug`, `sitewright_providers=trace`, ...)
pub const LOG_ENV_VAR: &str = "SITEWRIGHT_LOG";

/// Global verbosity level
static VERBOSITY: AtomicU8 = AtomicU8::new(1);

/// Verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    /// Quiet mode - minimal output
    Quiet = 0,
    /// Normal mode - standard output
    Normal = 1,
    /// Verbose mode - detailed output
    Verbose = 2,
}

impl VerbosityLevel {
    /// Get the current verbosity level
    pub fn current() -> Self {
        match VERBOSITY.load(Ordering::Relaxed) {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Normal,
            _ => VerbosityLevel::Verbose,
        }
    }

    /// Set the verbosity level
    pub fn set(level: Self) {
        VERBOSITY.store(level as u8, Ordering::Relaxed);
    }

    /// Check if we should output at this level
    pub fn should_output(&self) -> bool {
        self <= &Self::current()
    }

    /// Log filter used when `SITEWRIGHT_LOG` is not set
    pub fn default_filter(&self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "debug",
        }
    }

    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

/// Pick the log filter: explicit flags win, then `SITEWRIGHT_LOG`, then the default
pub fn log_filter(level: VerbosityLevel, env_value: Option<String>) -> String {
    match (level, env_value) {
        (VerbosityLevel::Normal, Some(value)) if !value.trim().is_empty() => value,
        (level, _) => level.default_filter().to_string(),
    }
}

/// Initialize verbosity and the tracing subscriber based on CLI flags
pub fn init_logging(verbose: bool, quiet: bool) {
    let level = VerbosityLevel::from_flags(verbose, quiet);
    VerbosityLevel::set(level);

    let directive = log_filter(level, std::env::var(LOG_ENV_VAR).ok());
    let filter = EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| EnvFilter::new(level.default_filter()));

    // A second initialization (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        VerbosityLevel::set(VerbosityLevel::Normal);
        assert_eq!(VerbosityLevel::current(), VerbosityLevel::Normal);
        assert!(VerbosityLevel::Quiet.should_output());
        assert!(!VerbosityLevel::Verbose.should_output());

        VerbosityLevel::set(VerbosityLevel::Verbose);
        assert_eq!(VerbosityLevel::current(), VerbosityLevel::Verbose);
        VerbosityLevel::set(VerbosityLevel::Normal);
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(VerbosityLevel::from_flags(false, true), VerbosityLevel::Quiet);
        assert_eq!(VerbosityLevel::from_flags(true, false), VerbosityLevel::Verbose);
        assert_eq!(VerbosityLevel::from_flags(false, false), VerbosityLevel::Normal);
        assert_eq!(VerbosityLevel::from_flags(true, true), VerbosityLevel::Quiet);
    }

    #[test]
    fn test_flags_override_env_filter() {
        let env = Some("sitewright_providers=trace".to_string());
        assert_eq!(log_filter(VerbosityLevel::Normal, env.clone()), "sitewright_providers=trace");
        assert_eq!(log_filter(VerbosityLevel::Verbose, env.clone()), "debug");
        assert_eq!(log_filter(VerbosityLevel::Quiet, env), "error");
        assert_eq!(log_filter(VerbosityLevel::Normal, Some("  ".to_string())), "warn");
        assert_eq!(log_filter(VerbosityLevel::Normal, None), "warn");
    }
}
