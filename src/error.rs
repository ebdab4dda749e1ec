use pnet::packet::ethernet::EtherType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PradsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file}:{line}: bad signature: {message}")]
    Signature {
        file: String,
        line: usize,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("asset database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("unsupported ethernet type: {0}")]
    UnsupportedEthernetType(EtherType),

    #[error("truncated packet: {0}")]
    Truncated(String),
}
