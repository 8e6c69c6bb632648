/// Install the global subscriber, writing to stderr so stdout stays free for
/// reports. `RUST_LOG` overrides the default `info` filter. Provider records
/// keep their `livepatch::provider` target, so targets stay visible.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
