//! Routes provider log output into the host's `tracing` subscriber.

use crate::abi::{level, RawLogSink, RawStr};

/// Target under which forwarded provider records appear.
pub const PROVIDER_TARGET: &str = "livepatch::provider";

/// Sink handed to `livepatch_attach_log`; lives for the whole process.
pub static HOST_SINK: RawLogSink = RawLogSink {
    write: forward_record,
};

extern "C" fn forward_record(lvl: u32, message: RawStr) {
    // SAFETY: the provider passes a buffer valid for the duration of the call.
    let bytes = unsafe { message.as_bytes() };
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end_matches('\n');

    match lvl {
        level::ERROR => tracing::error!(target: PROVIDER_TARGET, "{text}"),
        level::WARN => tracing::warn!(target: PROVIDER_TARGET, "{text}"),
        level::INFO => tracing::info!(target: PROVIDER_TARGET, "{text}"),
        level::DEBUG => tracing::debug!(target: PROVIDER_TARGET, "{text}"),
        _ => tracing::trace!(target: PROVIDER_TARGET, "{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarding_accepts_every_level_and_bad_utf8() {
        for lvl in [level::ERROR, level::WARN, level::INFO, level::DEBUG, level::TRACE, 99] {
            (HOST_SINK.write)(lvl, RawStr::from_bytes(b"provider says hi\n"));
        }
        (HOST_SINK.write)(level::INFO, RawStr::from_bytes(&[0xff, 0xfe]));
        (HOST_SINK.write)(
            level::INFO,
            RawStr {
                ptr: std::ptr::null(),
                len: 0,
            },
        );
    }
}
