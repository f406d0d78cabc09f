use anabranch_core::config::LogFormat;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub(crate) fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("logging already initialised: {e}");
    }
}

fn default_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    format!("{level},tower_http=debug,hyper=warn,reqwest=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_keep_noisy_crates_quiet() {
        let d = default_directives(" DEBUG ");
        assert!(d.starts_with("debug,"));
        assert!(d.contains("hyper=warn"));
        assert!(EnvFilter::try_new(d).is_ok());
    }
}
