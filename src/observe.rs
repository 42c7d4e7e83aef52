//! Logging and metrics hooks.
//!
//! Every `cfg(feature = ...)` for observability lives here so protocol code
//! stays free of it.

use std::time::Duration;

use crate::error::Error;
use crate::types::SessionState;

pub(crate) fn record_ok(
    mode: &'static str,
    netfn: u8,
    cmd: u8,
    elapsed: Duration,
    completion_code: u8,
) {
    let _ = (mode, netfn, cmd, elapsed, completion_code);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_requests_total", "mode" => mode, "outcome" => "ok").increment(1);
        metrics::histogram!("ipmi_request_seconds", "mode" => mode).record(elapsed.as_secs_f64());
        if completion_code != 0x00 {
            metrics::counter!("ipmi_completion_code_nonzero_total", "mode" => mode).increment(1);
        }
    }

    #[cfg(feature = "tracing")]
    {
        tracing::debug!(
            mode,
            netfn,
            cmd,
            completion_code,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "ipmi request ok"
        );
    }
}

/// Every attempt timed out; the caller sees an absent response.
pub(crate) fn record_absent(
    mode: &'static str,
    netfn: u8,
    cmd: u8,
    elapsed: Duration,
    attempts: u32,
) {
    let _ = (mode, netfn, cmd, elapsed, attempts);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_requests_total", "mode" => mode, "outcome" => "absent")
            .increment(1);
        metrics::histogram!("ipmi_request_seconds", "mode" => mode).record(elapsed.as_secs_f64());
    }

    #[cfg(feature = "tracing")]
    {
        tracing::warn!(
            mode,
            netfn,
            cmd,
            attempts,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "no response from BMC"
        );
    }
}

pub(crate) fn record_err(mode: &'static str, netfn: u8, cmd: u8, elapsed: Duration, err: &Error) {
    let _ = (mode, netfn, cmd, elapsed, err);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_requests_total", "mode" => mode, "outcome" => "err").increment(1);
        metrics::counter!(
            "ipmi_request_errors_total",
            "mode" => mode,
            "kind" => err.kind()
        )
        .increment(1);
        metrics::histogram!("ipmi_request_seconds", "mode" => mode).record(elapsed.as_secs_f64());
    }

    #[cfg(feature = "tracing")]
    {
        tracing::warn!(
            mode,
            netfn,
            cmd,
            kind = err.kind(),
            error = %err,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "ipmi request failed"
        );
    }
}

pub(crate) fn record_retry(cmd: u8, rq_seq: u8, attempt: u32) {
    let _ = (cmd, rq_seq, attempt);

    #[cfg(feature = "metrics")]
    metrics::counter!("ipmi_retries_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(cmd, rq_seq, attempt, "retrying request");
}

/// An inbound datagram was dropped without completing the exchange.
pub(crate) fn record_discard(reason: &'static str) {
    let _ = reason;

    #[cfg(feature = "metrics")]
    metrics::counter!("ipmi_datagrams_discarded_total", "reason" => reason).increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(reason, "discarding datagram");
}

pub(crate) fn record_state(state: SessionState) {
    let _ = state;

    #[cfg(feature = "tracing")]
    tracing::debug!(?state, "session state");
}

pub(crate) fn record_pong(answered: bool, supports_ipmi: bool) {
    let _ = (answered, supports_ipmi);

    #[cfg(feature = "tracing")]
    {
        if !answered {
            tracing::warn!("no presence pong from BMC");
        } else if !supports_ipmi {
            tracing::warn!("presence pong does not advertise IPMI");
        }
    }
}

pub(crate) fn record_session_opened(
    session_id: u32,
    auth_type: u8,
    privilege: u8,
    max_privilege: u8,
) {
    let _ = (session_id, auth_type, privilege, max_privilege);

    #[cfg(feature = "metrics")]
    metrics::counter!("ipmi_sessions_opened_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::info!(
        session_id,
        auth_type,
        privilege,
        max_privilege,
        "session established"
    );
}

pub(crate) fn record_handshake_failure(state: SessionState, err: &Error) {
    let _ = (state, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("ipmi_handshake_failures_total", "kind" => err.kind()).increment(1);

    #[cfg(feature = "tracing")]
    tracing::error!(?state, error = %err, "session setup failed");
}

pub(crate) fn record_session_closed(session_id: u32, sent_close: bool) {
    let _ = (session_id, sent_close);

    #[cfg(feature = "tracing")]
    tracing::debug!(session_id, sent_close, "session closed");
}

pub(crate) fn record_transport_error(mode: &'static str, err: &Error) {
    let _ = (mode, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("ipmi_transport_errors_total", "mode" => mode).increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(mode, error = %err, "transport error");
}

pub(crate) fn record_sol_retransmit(mode: &'static str, seq: u8, pending: usize) {
    let _ = (mode, seq, pending);

    #[cfg(feature = "metrics")]
    metrics::counter!("ipmi_sol_retransmits_total", "mode" => mode).increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(mode, seq, pending, "retransmitting SOL data");
}
