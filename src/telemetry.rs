use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable enabling per-instruction debug events.
pub const DEBUG_EVALUATION_ENV: &str = "JPEVAL_DEBUG_EVALUATION";

/// Initialize logging facade with stderr output.
pub fn init_logging() {
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jpeval=info,warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

/// Whether the evaluator emits a debug event for every evaluated instruction.
pub fn evaluation_debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| flag_enabled(std::env::var(DEBUG_EVALUATION_ENV).ok().as_deref()))
}

fn flag_enabled(value: Option<&str>) -> bool {
    matches!(value, Some(value) if !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_accepts_truthy_values() {
        assert!(flag_enabled(Some("1")));
        assert!(flag_enabled(Some("yes")));
        assert!(!flag_enabled(Some("0")));
        assert!(!flag_enabled(Some("FALSE")));
        assert!(!flag_enabled(Some("")));
        assert!(!flag_enabled(None));
    }
}
