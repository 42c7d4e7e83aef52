use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crate::client::ClientBuilder;
use crate::client::core::{ClientCore, Exchange, Progress, Routing, close_outcome, time_left};
use crate::commands::{CloseSession, Command, GetDeviceId};
use crate::error::{Error, Result};
use crate::session::{Handshake, Session, SessionConfig, Step};
use crate::sol::{SolAck, SolControl, SolSend};
use crate::transport::Transport;
use crate::transport::blocking::UdpTransport;
use crate::types::{DeviceId, Pong, RawResponse, Request, Response, RetryPolicy, SessionState};

const MODE: &str = "blocking";

/// A blocking IPMI v1.5 LAN client.
///
/// `Client` owns one session on one UDP socket. Handles are cheap to clone;
/// exchanges from different handles are serialized.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    /// `None` once the session is closed and the socket dropped.
    transport: Option<Box<dyn Transport + Send>>,
    core: ClientCore,
}

impl ClientBuilder {
    /// Connect over UDP, establish the session and build the [`Client`].
    pub fn build(self) -> Result<Client> {
        let (target, config) = self.into_parts()?;
        let transport = UdpTransport::connect(target)?;
        Client::open(Box::new(transport), config)
    }

    /// Establish the session over a caller-supplied transport.
    pub fn build_with_transport<T>(self, transport: T) -> Result<Client>
    where
        T: Transport + Send + 'static,
    {
        let (_, config) = self.into_parts()?;
        Client::open(Box::new(transport), config)
    }
}

impl Client {
    /// Create a [`ClientBuilder`].
    pub fn builder(target: SocketAddr) -> ClientBuilder {
        ClientBuilder::new(target)
    }

    fn open(transport: Box<dyn Transport + Send>, config: SessionConfig) -> Result<Self> {
        let mut inner = Inner {
            transport: Some(transport),
            core: ClientCore::new(Session::new(config)),
        };

        if let Err(err) = handshake_locked(&mut inner) {
            crate::observe::record_handshake_failure(inner.core.session.state, &err);
            if inner.core.session.active {
                let _ = close_locked(&mut inner);
            }
            return Err(err);
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Send a request and wait for its response.
    ///
    /// Returns `Ok(None)` when every attempt timed out. A non-zero completion
    /// code is a valid response, not an error.
    pub fn send_recv(&self, request: Request) -> Result<Option<Response>> {
        let mut inner = self.lock_inner()?;
        exchange_locked(&mut inner, request, Routing::Session)
    }

    /// Send a raw IPMI request and return the raw response.
    ///
    /// Unlike [`Self::send_recv`], a missing response is reported as
    /// [`Error::Timeout`].
    pub fn send_raw(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        self.send_recv(Request::new(netfn, cmd, data))?
            .map(Response::into_raw)
            .ok_or(Error::Timeout)
    }

    /// Execute a typed command (single request/response).
    pub fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        let response = self
            .send_recv(command.request())?
            .ok_or(Error::Timeout)?;
        command.parse_response(response.into_raw())
    }

    /// Convenience wrapper for `Get Device ID` (App NetFn, cmd 0x01).
    pub fn get_device_id(&self) -> Result<DeviceId> {
        self.execute(GetDeviceId)
    }

    /// Send an ASF presence ping and wait one timeout for the pong.
    pub fn ping(&self) -> Result<Option<Pong>> {
        let mut inner = self.lock_inner()?;
        ping_locked(&mut inner)
    }

    /// Send Get Device ID if the keepalive interval has elapsed since the
    /// last answered exchange. Returns whether a keepalive was sent.
    pub fn keepalive(&self) -> Result<bool> {
        let mut inner = self.lock_inner()?;
        if !inner.core.keepalive_due() {
            return Ok(false);
        }
        exchange_locked(&mut inner, GetDeviceId.request(), Routing::Direct)?;
        Ok(true)
    }

    /// When set, [`Self::close`] skips Close Session and only drops the socket.
    pub fn set_abort(&self, abort: bool) -> Result<()> {
        self.lock_inner()?.core.session.abort = abort;
        Ok(())
    }

    /// Close the session (App NetFn, cmd 0x3C) and the socket.
    ///
    /// If the BMC does not respond the client still transitions to a locally
    /// closed state and will reject further requests.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock_inner()?;
        close_locked(&mut inner)
    }

    /// Current session state.
    pub fn state(&self) -> Result<SessionState> {
        Ok(self.lock_inner()?.core.session.state)
    }

    /// Session id negotiated with the BMC.
    pub fn session_id(&self) -> Result<u32> {
        Ok(self.lock_inner()?.core.session.session_id)
    }

    /// Send console data (and/or control flags) over Serial-over-LAN.
    ///
    /// Returns `true` once the BMC has accepted every byte, `false` when the
    /// retry budget ran out first. Console output that arrives meanwhile is
    /// kept for [`Self::sol_receive`].
    pub fn sol_send(&self, data: &[u8], control: SolControl) -> Result<bool> {
        let mut guard = self.lock_inner()?;
        let Inner { transport, core } = &mut *guard;
        let transport = transport.as_deref().ok_or(Error::SessionClosed)?;
        let policy = core.session.config.retry;
        let mut send = SolSend::new(&mut core.session.sol, data, control)?;

        let mut attempts = 0;
        while attempts < policy.attempts {
            attempts += 1;
            let packet = core.sol_packet(&send.packet())?;
            send_datagram(transport, &packet);

            let deadline = Instant::now() + policy.timeout;
            while let Some(left) = time_left(deadline) {
                let Some(bytes) = recv_datagram(transport, left) else {
                    break;
                };
                let Some(inbound) = core.sol_inbound(Some(&mut send), &bytes)? else {
                    continue;
                };
                if let Some(ack) = inbound.ack {
                    send_datagram(transport, &ack);
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
            backoff(&policy, attempts);
        }
        Ok(false)
    }

    /// Console output received so far; waits up to one timeout when none is
    /// queued. Every data packet is acknowledged as it arrives.
    pub fn sol_receive(&self) -> Result<Vec<u8>> {
        let mut guard = self.lock_inner()?;
        let Inner { transport, core } = &mut *guard;
        if core.session.sol.has_inbound() {
            return Ok(core.session.sol.take_inbound());
        }
        let transport = transport.as_deref().ok_or(Error::SessionClosed)?;

        let deadline = Instant::now() + core.session.config.retry.timeout;
        while let Some(left) = time_left(deadline) {
            let Some(bytes) = recv_datagram(transport, left) else {
                break;
            };
            if let Some(inbound) = core.sol_inbound(None, &bytes)? {
                if let Some(ack) = inbound.ack {
                    send_datagram(transport, &ack);
                }
                if core.session.sol.has_inbound() {
                    break;
                }
            }
        }
        Ok(core.session.sol.take_inbound())
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Protocol("client lock poisoned"))
    }
}

fn handshake_locked(inner: &mut Inner) -> Result<()> {
    let mut handshake = Handshake::default();
    let mut step = handshake.start(&mut inner.core.session);
    loop {
        step = match step {
            Step::Ping => {
                let pong = ping_locked(inner)?;
                handshake.on_pong(&mut inner.core.session, pong)
            }
            Step::Pause(pause) => {
                thread::sleep(pause);
                handshake.resume(&mut inner.core.session)
            }
            Step::Send(request) => {
                let response = exchange_locked(inner, request, Routing::Direct)?;
                handshake.on_response(&mut inner.core.session, response)?
            }
            Step::Done => return Ok(()),
        };
    }
}

fn exchange_locked(
    inner: &mut Inner,
    request: Request,
    routing: Routing,
) -> Result<Option<Response>> {
    let Inner { transport, core } = inner;
    let transport = transport.as_deref().ok_or(Error::SessionClosed)?;

    let mut exchange = core.begin(request, routing)?;
    let result = run_exchange(transport, core, &mut exchange);
    core.finish(MODE, &exchange, &result);
    result
}

fn run_exchange(
    transport: &(dyn Transport + Send),
    core: &mut ClientCore,
    exchange: &mut Exchange,
) -> Result<Option<Response>> {
    let policy = core.session.config.retry;

    for attempt in 1..=policy.attempts {
        for datagram in core.attempt(exchange)? {
            send_datagram(transport, &datagram);
        }

        let deadline = Instant::now() + policy.timeout;
        while let Some(left) = time_left(deadline) {
            let Some(bytes) = recv_datagram(transport, left) else {
                break;
            };
            if let Progress::Complete(response) = core.on_datagram(exchange, &bytes) {
                return Ok(Some(response));
            }
        }
        backoff(&policy, attempt);
    }
    Ok(None)
}

fn ping_locked(inner: &mut Inner) -> Result<Option<Pong>> {
    let Inner { transport, core } = inner;
    let transport = transport.as_deref().ok_or(Error::SessionClosed)?;

    let (tag, packet) = core.ping_packet();
    crate::debug::dump_hex("asf ping", &packet);
    send_datagram(transport, &packet);

    let deadline = Instant::now() + core.session.config.retry.timeout;
    while let Some(left) = time_left(deadline) {
        let Some(bytes) = recv_datagram(transport, left) else {
            break;
        };
        if let Some(pong) = core.match_pong(tag, &bytes) {
            return Ok(Some(pong));
        }
    }
    Ok(None)
}

fn close_locked(inner: &mut Inner) -> Result<()> {
    if inner.core.is_closed() {
        return Ok(());
    }

    let session_id = inner.core.session.session_id;
    let send_close = inner.core.session.active && !inner.core.session.abort;
    let result = if send_close {
        inner.core.session.enter(SessionState::Closing);
        exchange_locked(inner, CloseSession { session_id }.request(), Routing::Direct)
            .and_then(close_outcome)
    } else {
        Ok(())
    };

    inner.core.mark_closed();
    inner.transport = None;
    crate::observe::record_session_closed(session_id, send_close);
    result
}

/// Send failures count as a lost attempt, like a lost answer.
fn send_datagram(transport: &(dyn Transport + Send), datagram: &[u8]) {
    if let Err(err) = transport.send(datagram) {
        crate::observe::record_transport_error(MODE, &err);
    }
}

fn recv_datagram(
    transport: &(dyn Transport + Send),
    timeout: std::time::Duration,
) -> Option<Vec<u8>> {
    match transport.recv(timeout) {
        Ok(bytes) => bytes,
        Err(err) => {
            crate::observe::record_transport_error(MODE, &err);
            None
        }
    }
}

fn backoff(policy: &RetryPolicy, attempt: u32) {
    if attempt < policy.attempts && !policy.backoff.is_zero() {
        thread::sleep(policy.backoff);
    }
}
