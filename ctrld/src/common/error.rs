use std::{io, result};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error")]
    IOError(#[from] io::Error),
    #[error("dns message error: {0}")]
    ProtoError(#[from] hickory_proto::ProtoError),
    #[error("Invalid Url: {0}")]
    InvalidUrl(String),
    #[error("could not create request: {0}")]
    InvalidRequest(#[from] http::Error),
    #[error("could not perform request: {0:#}")]
    RequestFailed(anyhow::Error),
    #[error("could not read message from response: {0:#}")]
    ReadBodyFailed(anyhow::Error),
    #[error("wrong response from DoH server, got: {body}, status: {status}")]
    BadStatus { status: u16, body: String },
    #[error("unexpected dns response: {0}")]
    UnexpectedResponse(String),
    #[error("{op}: {source}")]
    Ipc {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("not supported: {0}")]
    Unsupported(String),
    #[error("Not found")]
    NotFound,
    #[error("operation cancelled")]
    Cancelled,
    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error("anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl Error {
    /// Wraps an IPC failure with the name of the call that produced it.
    pub fn ipc<E>(op: &'static str) -> impl FnOnce(E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        move |e| Error::Ipc {
            op,
            source: Box::new(e),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
