//! Error taxonomy. Bind failures are per-service and non-fatal unless no
//! service comes up; parse failures stay inside their session; sink and
//! external-scorer failures are logged and absorbed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetlureError {
    #[error("failed to bind {transport} port {port}: {source}")]
    Bind {
        transport: crate::service::Transport,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {protocol} input: {detail}")]
    ProtocolParse {
        protocol: crate::service::Protocol,
        detail: String,
    },

    #[error("event sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("external classifier failed: {0}")]
    Classifier(String),
}
