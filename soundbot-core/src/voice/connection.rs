//! soundbot-core/src/voice/connection.rs
//!
//! The connection state machine for one voice session. It is pure: every
//! input goes through [`ConnectionState::handle`], which updates the state and
//! returns the actions the owning driver has to carry out (arm a timer, ask the
//! transport to rejoin, tear down). Timers and I/O live in the driver.

use std::time::Duration;

use soundbot_common::models::voice::{ConnectionStatus, DisconnectCause};
use tracing::{debug, info, warn};

use crate::voice::config::VoiceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Bounds the time spent in signalling/connecting.
    ReadyDeadline,
    /// After a 4014 close: wait for the transport to start reconnecting on its own.
    KickWindow,
    /// Backoff before the next rejoin attempt.
    Rejoin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Status reported by the transport.
    Transport(TransportStatus),
    TimerFired(Timer),
    /// `destroy()` from the subscription, the registry or the reconciler.
    DestroyRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected(DisconnectCause),
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ArmTimer(Timer, Duration),
    CancelTimer(Timer),
    /// Ask the transport to reconnect to the session's channel.
    Rejoin,
    /// Ask the transport to close the connection.
    DestroyTransport,
    /// The session reached `Destroyed`: stop playback and notify the owner.
    /// Emitted at most once over the lifetime of the machine.
    Teardown,
}

pub struct ConnectionState {
    status: ConnectionStatus,
    ready_lock: bool,
    rejoin_attempts: u32,
    config: VoiceConfig,
}

impl ConnectionState {
    /// A new connection has already been initiated, so it starts out signalling.
    /// Call [`ConnectionState::start`] to get the initial actions.
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            status: ConnectionStatus::Signalling,
            ready_lock: false,
            rejoin_attempts: 0,
            config,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn rejoin_attempts(&self) -> u32 {
        self.rejoin_attempts
    }

    pub fn is_ready_locked(&self) -> bool {
        self.ready_lock
    }

    /// Actions for entering the initial `Signalling` state.
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        self.arm_ready_deadline(&mut actions);
        actions
    }

    /// The single transition function.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        if self.status == ConnectionStatus::Destroyed {
            debug!("(ConnectionState) ignoring {input:?}, already destroyed");
            return Vec::new();
        }

        match input {
            Input::Transport(TransportStatus::Signalling) => self.enter_pending(ConnectionStatus::Signalling),
            Input::Transport(TransportStatus::Connecting) => self.enter_pending(ConnectionStatus::Connecting),
            Input::Transport(TransportStatus::Ready) => self.enter_ready(),
            Input::Transport(TransportStatus::Disconnected(cause)) => self.enter_disconnected(cause),
            Input::Transport(TransportStatus::Destroyed) => self.enter_destroyed(false),
            Input::DestroyRequested => self.enter_destroyed(true),
            Input::TimerFired(timer) => self.on_timer(timer),
        }
    }

    fn enter_pending(&mut self, status: ConnectionStatus) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.status == ConnectionStatus::Disconnected {
            // The transport is reconnecting on its own: a channel move, not a kick.
            actions.push(Action::CancelTimer(Timer::KickWindow));
        }
        self.status = status;
        self.arm_ready_deadline(&mut actions);
        actions
    }

    fn arm_ready_deadline(&mut self, actions: &mut Vec<Action>) {
        if self.ready_lock {
            return;
        }
        self.ready_lock = true;
        actions.push(Action::ArmTimer(Timer::ReadyDeadline, self.config.ready_timeout));
    }

    fn release_ready_deadline(&mut self, actions: &mut Vec<Action>) {
        if self.ready_lock {
            self.ready_lock = false;
            actions.push(Action::CancelTimer(Timer::ReadyDeadline));
        }
    }

    fn enter_ready(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        self.release_ready_deadline(&mut actions);
        actions.push(Action::CancelTimer(Timer::KickWindow));
        actions.push(Action::CancelTimer(Timer::Rejoin));
        if self.rejoin_attempts > 0 {
            info!("(ConnectionState) recovered after {} rejoin attempt(s)", self.rejoin_attempts);
        }
        self.rejoin_attempts = 0;
        self.status = ConnectionStatus::Ready;
        actions
    }

    fn enter_disconnected(&mut self, cause: DisconnectCause) -> Vec<Action> {
        let mut actions = Vec::new();
        self.status = ConnectionStatus::Disconnected;
        // Recovery takes over from here; the next signalling phase re-arms the deadline.
        self.release_ready_deadline(&mut actions);

        match cause {
            DisconnectCause::ClosedByServer => {
                debug!("(ConnectionState) closed by server, waiting to see whether we were moved");
                actions.push(Action::ArmTimer(Timer::KickWindow, self.config.kick_window));
            }
            DisconnectCause::Other(reason) if self.rejoin_attempts < self.config.max_rejoin_attempts => {
                let delay = self.config.rejoin_delay(self.rejoin_attempts);
                info!(
                    "(ConnectionState) disconnected ({reason}), rejoin attempt {} in {:?}",
                    self.rejoin_attempts + 1,
                    delay
                );
                actions.push(Action::ArmTimer(Timer::Rejoin, delay));
            }
            DisconnectCause::Other(reason) => {
                warn!(
                    "(ConnectionState) disconnected ({reason}) after {} rejoin attempts, giving up",
                    self.rejoin_attempts
                );
                actions.extend(self.enter_destroyed(true));
            }
        }
        actions
    }

    fn on_timer(&mut self, timer: Timer) -> Vec<Action> {
        match timer {
            Timer::ReadyDeadline => {
                self.ready_lock = false;
                if self.status == ConnectionStatus::Ready {
                    return Vec::new();
                }
                warn!(
                    "(ConnectionState) not ready after {:?} (status={}), destroying",
                    self.config.ready_timeout, self.status
                );
                self.enter_destroyed(true)
            }
            Timer::KickWindow => {
                if self.status != ConnectionStatus::Disconnected {
                    return Vec::new();
                }
                info!("(ConnectionState) no reconnect after server close, assuming we were kicked");
                self.enter_destroyed(true)
            }
            Timer::Rejoin => {
                if self.status != ConnectionStatus::Disconnected {
                    return Vec::new();
                }
                self.rejoin_attempts += 1;
                self.status = ConnectionStatus::Signalling;
                let mut actions = vec![Action::Rejoin];
                self.arm_ready_deadline(&mut actions);
                actions
            }
        }
    }

    fn enter_destroyed(&mut self, destroy_transport: bool) -> Vec<Action> {
        if self.status == ConnectionStatus::Destroyed {
            return Vec::new();
        }
        self.status = ConnectionStatus::Destroyed;
        self.ready_lock = false;

        let mut actions = vec![
            Action::CancelTimer(Timer::ReadyDeadline),
            Action::CancelTimer(Timer::KickWindow),
            Action::CancelTimer(Timer::Rejoin),
        ];
        if destroy_transport {
            actions.push(Action::DestroyTransport);
        }
        actions.push(Action::Teardown);
        actions
    }
}
