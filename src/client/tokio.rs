use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::client::ClientBuilder;
use crate::client::core::{ClientCore, Exchange, Progress, Routing, close_outcome, time_left};
use crate::commands::{CloseSession, Command, GetDeviceId};
use crate::error::{Error, Result};
use crate::session::{Handshake, Session, SessionConfig, Step};
use crate::sol::{SolAck, SolControl, SolSend};
use crate::transport::AsyncTransport;
use crate::transport::tokio::UdpTransport;
use crate::types::{DeviceId, Pong, RawResponse, Request, Response, RetryPolicy, SessionState};

const MODE: &str = "tokio";

type BoxedTransport = Box<dyn AsyncTransport + Send + Sync>;

/// An async IPMI v1.5 LAN client for the tokio runtime.
///
/// Same semantics as [`Client`](crate::Client); exchanges from cloned
/// handles are serialized on an async mutex.
#[derive(Clone)]
pub struct AsyncClient {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    transport: Option<BoxedTransport>,
    core: ClientCore,
}

impl ClientBuilder {
    /// Connect over UDP, establish the session and build an [`AsyncClient`].
    pub async fn build_async(self) -> Result<AsyncClient> {
        let (target, config) = self.into_parts()?;
        let transport = UdpTransport::connect(target).await?;
        AsyncClient::open(Box::new(transport), config).await
    }

    /// Establish the session over a caller-supplied async transport.
    pub async fn build_async_with_transport<T>(self, transport: T) -> Result<AsyncClient>
    where
        T: AsyncTransport + Send + Sync + 'static,
    {
        let (_, config) = self.into_parts()?;
        AsyncClient::open(Box::new(transport), config).await
    }
}

impl AsyncClient {
    async fn open(transport: BoxedTransport, config: SessionConfig) -> Result<Self> {
        let mut inner = Inner {
            transport: Some(transport),
            core: ClientCore::new(Session::new(config)),
        };

        if let Err(err) = handshake_locked(&mut inner).await {
            crate::observe::record_handshake_failure(inner.core.session.state, &err);
            if inner.core.session.active {
                let _ = close_locked(&mut inner).await;
            }
            return Err(err);
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Send a request; `Ok(None)` when every attempt timed out.
    pub async fn send_recv(&self, request: Request) -> Result<Option<Response>> {
        let mut inner = self.inner.lock().await;
        exchange_locked(&mut inner, request, Routing::Session).await
    }

    /// Send a raw request; a missing response is [`Error::Timeout`].
    pub async fn send_raw(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        self.send_recv(Request::new(netfn, cmd, data))
            .await?
            .map(Response::into_raw)
            .ok_or(Error::Timeout)
    }

    /// Execute a typed command.
    pub async fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        let response = self
            .send_recv(command.request())
            .await?
            .ok_or(Error::Timeout)?;
        command.parse_response(response.into_raw())
    }

    /// Convenience wrapper for `Get Device ID`.
    pub async fn get_device_id(&self) -> Result<DeviceId> {
        self.execute(GetDeviceId).await
    }

    /// Send an ASF presence ping and wait one timeout for the pong.
    pub async fn ping(&self) -> Result<Option<Pong>> {
        let mut inner = self.inner.lock().await;
        ping_locked(&mut inner).await
    }

    /// Send Get Device ID if the keepalive interval has elapsed.
    pub async fn keepalive(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.core.keepalive_due() {
            return Ok(false);
        }
        exchange_locked(&mut inner, GetDeviceId.request(), Routing::Direct).await?;
        Ok(true)
    }

    /// When set, [`Self::close`] skips Close Session.
    pub async fn set_abort(&self, abort: bool) {
        self.inner.lock().await.core.session.abort = abort;
    }

    /// Close the session and the socket.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        close_locked(&mut inner).await
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.core.session.state
    }

    /// Session id negotiated with the BMC.
    pub async fn session_id(&self) -> u32 {
        self.inner.lock().await.core.session.session_id
    }

    /// Send console data over SOL; `false` when the retry budget ran out.
    pub async fn sol_send(&self, data: &[u8], control: SolControl) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let Inner { transport, core } = &mut *guard;
        let transport = transport.as_deref().ok_or(Error::SessionClosed)?;
        let policy = core.session.config.retry;
        let mut send = SolSend::new(&mut core.session.sol, data, control)?;

        let mut attempts = 0;
        while attempts < policy.attempts {
            attempts += 1;
            let packet = core.sol_packet(&send.packet())?;
            send_datagram(transport, &packet).await;

            let deadline = Instant::now() + policy.timeout;
            while let Some(left) = time_left(deadline) {
                let Some(bytes) = recv_datagram(transport, left).await else {
                    break;
                };
                let Some(inbound) = core.sol_inbound(Some(&mut send), &bytes)? else {
                    continue;
                };
                if let Some(ack) = inbound.ack {
                    send_datagram(transport, &ack).await;
                }
                match inbound.outcome {
                    SolAck::Complete => return Ok(true),
                    SolAck::Partial { .. } => {
                        crate::observe::record_sol_retransmit(
                            MODE,
                            send.seq(),
                            send.remaining().len(),
                        );
                        attempts = 0;
                        break;
                    }
                    SolAck::Nack => break,
                    SolAck::Unrelated => {}
                }
            }
            backoff(&policy, attempts).await;
        }
        Ok(false)
    }

    /// Console output received so far, waiting up to one timeout if none.
    pub async fn sol_receive(&self) -> Result<Vec<u8>> {
        let mut guard = self.inner.lock().await;
        let Inner { transport, core } = &mut *guard;
        if core.session.sol.has_inbound() {
            return Ok(core.session.sol.take_inbound());
        }
        let transport = transport.as_deref().ok_or(Error::SessionClosed)?;

        let deadline = Instant::now() + core.session.config.retry.timeout;
        while let Some(left) = time_left(deadline) {
            let Some(bytes) = recv_datagram(transport, left).await else {
                break;
            };
            if let Some(inbound) = core.sol_inbound(None, &bytes)? {
                if let Some(ack) = inbound.ack {
                    send_datagram(transport, &ack).await;
                }
                if core.session.sol.has_inbound() {
                    break;
                }
            }
        }
        Ok(core.session.sol.take_inbound())
    }
}

async fn handshake_locked(inner: &mut Inner) -> Result<()> {
    let mut handshake = Handshake::default();
    let mut step = handshake.start(&mut inner.core.session);
    loop {
        step = match step {
            Step::Ping => {
                let pong = ping_locked(inner).await?;
                handshake.on_pong(&mut inner.core.session, pong)
            }
            Step::Pause(pause) => {
                tokio::time::sleep(pause).await;
                handshake.resume(&mut inner.core.session)
            }
            Step::Send(request) => {
                let response = exchange_locked(inner, request, Routing::Direct).await?;
                handshake.on_response(&mut inner.core.session, response)?
            }
            Step::Done => return Ok(()),
        };
    }
}

async fn exchange_locked(
    inner: &mut Inner,
    request: Request,
    routing: Routing,
) -> Result<Option<Response>> {
    let Inner { transport, core } = inner;
    let transport = transport.as_deref().ok_or(Error::SessionClosed)?;

    let mut exchange = core.begin(request, routing)?;
    let result = run_exchange(transport, core, &mut exchange).await;
    core.finish(MODE, &exchange, &result);
    result
}

async fn run_exchange(
    transport: &(dyn AsyncTransport + Send + Sync),
    core: &mut ClientCore,
    exchange: &mut Exchange,
) -> Result<Option<Response>> {
    let policy = core.session.config.retry;

    for attempt in 1..=policy.attempts {
        for datagram in core.attempt(exchange)? {
            send_datagram(transport, &datagram).await;
        }

        let deadline = Instant::now() + policy.timeout;
        while let Some(left) = time_left(deadline) {
            let Some(bytes) = recv_datagram(transport, left).await else {
                break;
            };
            if let Progress::Complete(response) = core.on_datagram(exchange, &bytes) {
                return Ok(Some(response));
            }
        }
        backoff(&policy, attempt).await;
    }
    Ok(None)
}

async fn ping_locked(inner: &mut Inner) -> Result<Option<Pong>> {
    let Inner { transport, core } = inner;
    let transport = transport.as_deref().ok_or(Error::SessionClosed)?;

    let (tag, packet) = core.ping_packet();
    crate::debug::dump_hex("asf ping", &packet);
    send_datagram(transport, &packet).await;

    let deadline = Instant::now() + core.session.config.retry.timeout;
    while let Some(left) = time_left(deadline) {
        let Some(bytes) = recv_datagram(transport, left).await else {
            break;
        };
        if let Some(pong) = core.match_pong(tag, &bytes) {
            return Ok(Some(pong));
        }
    }
    Ok(None)
}

async fn close_locked(inner: &mut Inner) -> Result<()> {
    if inner.core.is_closed() {
        return Ok(());
    }

    let session_id = inner.core.session.session_id;
    let send_close = inner.core.session.active && !inner.core.session.abort;
    let result = if send_close {
        inner.core.session.enter(SessionState::Closing);
        exchange_locked(inner, CloseSession { session_id }.request(), Routing::Direct)
            .await
            .and_then(close_outcome)
    } else {
        Ok(())
    };

    inner.core.mark_closed();
    inner.transport = None;
    crate::observe::record_session_closed(session_id, send_close);
    result
}

async fn send_datagram(transport: &(dyn AsyncTransport + Send + Sync), datagram: &[u8]) {
    if let Err(err) = transport.send(datagram).await {
        crate::observe::record_transport_error(MODE, &err);
    }
}

async fn recv_datagram(
    transport: &(dyn AsyncTransport + Send + Sync),
    timeout: Duration,
) -> Option<Vec<u8>> {
    match transport.recv(timeout).await {
        Ok(bytes) => bytes,
        Err(err) => {
            crate::observe::record_transport_error(MODE, &err);
            None
        }
    }
}

async fn backoff(policy: &RetryPolicy, attempt: u32) {
    if attempt < policy.attempts && !policy.backoff.is_zero() {
        tokio::time::sleep(policy.backoff).await;
    }
}
