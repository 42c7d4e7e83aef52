//! Datagram transports.
//!
//! A transport moves whole datagrams and knows nothing about sessions or
//! retries: the client drivers own the retry loop so that every attempt can
//! be re-framed with a fresh session sequence number.

#[cfg(feature = "blocking")]
use std::time::Duration;

#[cfg(feature = "blocking")]
use crate::error::Result;

/// A synchronous transport for exchanging RMCP datagrams.
#[cfg(feature = "blocking")]
pub trait Transport {
    /// Send one datagram.
    fn send(&self, datagram: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the next datagram; `Ok(None)` on timeout.
    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

#[cfg(feature = "async")]
mod async_support {
    use core::future::Future;
    use core::pin::Pin;
    use std::time::Duration;

    use crate::error::Result;

    /// Boxed future returned by [`AsyncTransport`] methods.
    pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

    /// An asynchronous transport for exchanging RMCP datagrams.
    pub trait AsyncTransport {
        /// Send one datagram.
        fn send<'a>(&'a self, datagram: &'a [u8]) -> TransportFuture<'a, ()>;

        /// Wait up to `timeout` for the next datagram; `Ok(None)` on timeout.
        fn recv(&self, timeout: Duration) -> TransportFuture<'_, Option<Vec<u8>>>;
    }
}

#[cfg(feature = "async")]
pub use async_support::{AsyncTransport, TransportFuture};

#[cfg(feature = "blocking")]
pub(crate) mod blocking;

#[cfg(feature = "async")]
pub(crate) mod tokio;
