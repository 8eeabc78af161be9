use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const TARGET: &str = "telemetry::realtime_session";
pub(crate) const EVENT_TRANSITION: &str = "session_transition";
pub(crate) const EVENT_NEGOTIATION_STAGE: &str = "negotiation_stage";
pub(crate) const EVENT_CONNECTION_LOST: &str = "connection_lost";
pub(crate) const EVENT_CONTROL_SEND: &str = "control_send";

#[derive(Debug, Serialize)]
pub struct SessionTransitionEvent<'a> {
    pub session_id: &'a str,
    pub from: &'static str,
    pub to: &'static str,
    pub reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct NegotiationStageEvent<'a> {
    pub session_id: &'a str,
    pub stage: &'static str,
    pub succeeded: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionLostEvent<'a> {
    pub session_id: &'a str,
    pub state: &'static str,
    pub transitions: u32,
    pub connected_for_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ControlSendEvent<'a> {
    pub session_id: &'a str,
    pub message_type: &'a str,
    pub outcome: &'static str,
}

pub fn record_session_transition(
    session_id: &str,
    from: &'static str,
    to: &'static str,
    reason: Option<&'static str>,
) {
    let event = SessionTransitionEvent {
        session_id,
        from,
        to,
        reason,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TRANSITION,
            session_id = event.session_id,
            from = event.from,
            to = event.to,
            reason = event.reason.unwrap_or(""),
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TRANSITION,
            %err,
            "failed to encode session transition event"
        ),
    }
}

pub fn record_negotiation_stage(
    session_id: &str,
    stage: &'static str,
    succeeded: bool,
    elapsed: Duration,
) {
    let event = NegotiationStageEvent {
        session_id,
        stage,
        succeeded,
        elapsed_ms: duration_to_ms(elapsed),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_NEGOTIATION_STAGE,
            session_id = event.session_id,
            stage = event.stage,
            succeeded = event.succeeded,
            elapsed_ms = event.elapsed_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_NEGOTIATION_STAGE,
            %err,
            "failed to encode negotiation stage event"
        ),
    }
}

pub fn record_connection_lost(
    session_id: &str,
    state: &'static str,
    transitions: u32,
    connected_for: Duration,
) {
    let event = ConnectionLostEvent {
        session_id,
        state,
        transitions,
        connected_for_ms: duration_to_ms(connected_for),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_CONNECTION_LOST,
            session_id = event.session_id,
            state = event.state,
            transitions = event.transitions,
            connected_for_ms = event.connected_for_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_CONNECTION_LOST,
            %err,
            "failed to encode connection lost event"
        ),
    }
}

pub fn record_control_send(session_id: &str, message_type: &str, outcome: &'static str) {
    let event = ControlSendEvent {
        session_id,
        message_type,
        outcome,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_CONTROL_SEND,
            session_id = event.session_id,
            message_type = event.message_type,
            outcome = event.outcome,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_CONTROL_SEND,
            %err,
            "failed to encode control send event"
        ),
    }
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
