//! # Telemetry module
//!
//! This module expose the metrics gathered while reconciling instances, the
//! embedding engine decides where to publish them.

use prometheus::{gather, Encoder, TextEncoder};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize metrics, {0}")]
    PrometheusSerialize(prometheus::Error),
    #[error("failed to interpret serialized metrics as utf-8, {0}")]
    Utf8(std::string::FromUtf8Error),
}

// -----------------------------------------------------------------------------
// Helper methods

#[cfg_attr(feature = "trace", tracing::instrument)]
/// returns the encoded metrics gathered from the application in the text
/// exposition format
pub fn encode() -> Result<String, Error> {
    let families = gather();
    let encoder = TextEncoder::new();
    let mut buf = vec![];
    encoder
        .encode(&families, &mut buf)
        .map_err(Error::PrometheusSerialize)?;

    String::from_utf8(buf).map_err(Error::Utf8)
}

/// returns the content type of the text exposition format
pub fn format_type() -> &'static str {
    prometheus::TEXT_FORMAT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_gathered_metrics() {
        let counter = prometheus::register_int_counter!(
            "rds_provider_telemetry_test",
            "counter used to check the exposition"
        )
        .unwrap();
        counter.inc();

        let text = encode().unwrap();
        assert!(text.contains("rds_provider_telemetry_test 1"));
        assert!(format_type().starts_with("text/plain"));
    }
}
