use std::time::{Duration, Instant};

use crate::media::PeerConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthVerdict {
    Healthy,
    /// 曾经连通后断开或失败。
    Lost,
    /// 从未连通即失败。
    NeverConnected,
}

/// 跟踪对等连接状态迁移，判定连接是否丢失。
#[derive(Debug, Clone)]
pub(crate) struct ConnectionHealth {
    connected_at: Option<Instant>,
    transitions: u32,
    last: PeerConnectionState,
}

impl ConnectionHealth {
    pub(crate) fn new() -> Self {
        Self {
            connected_at: None,
            transitions: 0,
            last: PeerConnectionState::New,
        }
    }

    pub(crate) fn observe(&mut self, state: PeerConnectionState) -> HealthVerdict {
        self.transitions = self.transitions.saturating_add(1);
        self.last = state;

        match state {
            PeerConnectionState::Connected => {
                self.connected_at.get_or_insert_with(Instant::now);
                HealthVerdict::Healthy
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => HealthVerdict::Healthy,
            PeerConnectionState::Disconnected if self.connected_at.is_none() => {
                HealthVerdict::Healthy
            }
            PeerConnectionState::Disconnected
            | PeerConnectionState::Failed
            | PeerConnectionState::Closed => {
                if self.connected_at.is_some() {
                    HealthVerdict::Lost
                } else {
                    HealthVerdict::NeverConnected
                }
            }
        }
    }

    pub(crate) fn transitions(&self) -> u32 {
        self.transitions
    }

    pub(crate) fn last(&self) -> PeerConnectionState {
        self.last
    }

    pub(crate) fn connected_for(&self) -> Duration {
        self.connected_at
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_after_connect_is_lost() {
        let mut health = ConnectionHealth::new();
        assert_eq!(
            health.observe(PeerConnectionState::Connecting),
            HealthVerdict::Healthy
        );
        assert_eq!(
            health.observe(PeerConnectionState::Connected),
            HealthVerdict::Healthy
        );
        assert_eq!(
            health.observe(PeerConnectionState::Disconnected),
            HealthVerdict::Lost
        );
        assert_eq!(health.transitions(), 3);
        assert_eq!(health.last(), PeerConnectionState::Disconnected);
    }

    #[test]
    fn failure_before_connect_is_never_connected() {
        let mut health = ConnectionHealth::new();
        assert_eq!(
            health.observe(PeerConnectionState::Disconnected),
            HealthVerdict::Healthy
        );
        assert_eq!(
            health.observe(PeerConnectionState::Failed),
            HealthVerdict::NeverConnected
        );
        assert_eq!(health.connected_for(), Duration::ZERO);
    }

    #[test]
    fn platform_close_after_connect_is_lost() {
        let mut health = ConnectionHealth::new();
        health.observe(PeerConnectionState::Connected);
        assert_eq!(
            health.observe(PeerConnectionState::Closed),
            HealthVerdict::Lost
        );
    }
}
