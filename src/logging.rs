use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVES: &str = "info,tvdiag_admin=debug,tower_http=info";

/// First usable filter wins: the configured directives, then `RUST_LOG`,
/// then [`DEFAULT_DIRECTIVES`].
pub fn resolve_filter(configured: Option<&str>) -> EnvFilter {
    configured
        .and_then(|directives| match EnvFilter::try_new(directives) {
            Ok(filter) => Some(filter),
            Err(err) => {
                eprintln!("ignoring invalid log filter {directives:?}: {err}");
                None
            }
        })
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

pub fn init_tracing(configured: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(configured))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_directives_take_precedence() {
        let filter = resolve_filter(Some("warn,tvdiag_admin::api=trace"));
        let rendered = filter.to_string();
        assert!(rendered.contains("warn"));
        assert!(rendered.contains("tvdiag_admin::api=trace"));
    }
}
