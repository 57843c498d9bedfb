//! The coordinator: single owner of the proxy state machine.
//!
//! Handlers and the monitor never mutate state. They post events over an
//! mpsc channel and read the current state through a watch snapshot; the
//! coordinator serializes every transition on its own task and performs
//! the entry actions (address bind/release, wake, boot wait) in order.

use crate::identity::IdentityManager;
use crate::monitor::{ServerHealth, ServerMonitor};
use crate::stats::Stats;
use crate::wake::WakeSender;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const WAKE_MAX_RETRIES: u32 = 3;

/// Poll cadence of the bounded boot-window wait.
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyState {
    /// Proxy holds the host's address and impersonates; no forwarding.
    Offline,
    /// Wake frame in flight; surface behavior matches Offline.
    Waking,
    /// Host is booting; status probes get the "starting" variant.
    Starting,
    /// Host is reachable; address released, traffic forwarded.
    Proxying,
    /// Terminal; shutdown in progress.
    Stopping,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyState::Offline => write!(f, "offline"),
            ProxyState::Waking => write!(f, "waking"),
            ProxyState::Starting => write!(f, "starting"),
            ProxyState::Proxying => write!(f, "proxying"),
            ProxyState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug)]
pub enum ProxyEvent {
    /// A Minecraft client tried to log in.
    JoinIntent { source: SocketAddr },
    /// A new Satisfactory client showed up on one of the UDP ports.
    ClientPresent { port: u16, source: SocketAddr },
    /// The monitor (or the boot-window wait) observed a health change.
    HealthChanged {
        previous: ServerHealth,
        current: ServerHealth,
    },
    /// Outcome of an asynchronous wake attempt.
    WakeFinished { success: bool },
    /// The boot window elapsed without the host coming online.
    BootTimeout,
    /// External request to stop.
    Shutdown,
}

/// The transition table. `None` means the event is ignored in this state;
/// duplicate events are idempotent by construction.
pub fn next_state(state: ProxyState, event: &ProxyEvent) -> Option<ProxyState> {
    use ProxyState::*;

    match event {
        ProxyEvent::JoinIntent { .. } | ProxyEvent::ClientPresent { .. } => {
            (state == Offline).then_some(Waking)
        }
        ProxyEvent::HealthChanged {
            current: ServerHealth::Online,
            ..
        } => matches!(state, Offline | Waking | Starting).then_some(Proxying),
        ProxyEvent::HealthChanged {
            current: ServerHealth::Offline,
            ..
        } => (state == Proxying).then_some(Offline),
        ProxyEvent::HealthChanged { .. } => None,
        ProxyEvent::WakeFinished { success: true } => (state == Waking).then_some(Starting),
        ProxyEvent::WakeFinished { success: false } => (state == Waking).then_some(Offline),
        ProxyEvent::BootTimeout => (state == Starting).then_some(Offline),
        ProxyEvent::Shutdown => (state != Stopping).then_some(Stopping),
    }
}

pub struct Coordinator {
    state: ProxyState,
    state_tx: watch::Sender<ProxyState>,
    events_rx: mpsc::Receiver<ProxyEvent>,
    events_tx: mpsc::Sender<ProxyEvent>,
    identity: Arc<IdentityManager>,
    wake: Arc<WakeSender>,
    monitor: Arc<ServerMonitor>,
    stats: Arc<Stats>,
    boot_wait: Duration,
    wake_task: Option<JoinHandle<()>>,
    boot_task: Option<JoinHandle<()>>,
    supervised: Vec<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(
        identity: Arc<IdentityManager>,
        wake: Arc<WakeSender>,
        monitor: Arc<ServerMonitor>,
        stats: Arc<Stats>,
        boot_wait: Duration,
    ) -> (Self, mpsc::Sender<ProxyEvent>, watch::Receiver<ProxyState>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ProxyState::Offline);

        let coordinator = Self {
            state: ProxyState::Offline,
            state_tx,
            events_rx,
            events_tx: events_tx.clone(),
            identity,
            wake,
            monitor,
            stats,
            boot_wait,
            wake_task: None,
            boot_task: None,
            supervised: Vec::new(),
        };
        (coordinator, events_tx, state_rx)
    }

    /// Registers a handler or monitor task to be cancelled on Stopping.
    pub fn supervise(&mut self, task: JoinHandle<()>) {
        self.supervised.push(task);
    }

    pub async fn run(mut self) {
        // Initial identity acquisition; the service starts impersonating.
        self.enter_offline().await;

        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event).await;
            if self.state == ProxyState::Stopping {
                break;
            }
        }

        info!("Coordinator stopped");
    }

    async fn handle_event(&mut self, event: ProxyEvent) {
        let Some(next) = next_state(self.state, &event) else {
            debug!("Ignoring {:?} in state {}", event, self.state);
            return;
        };

        match &event {
            ProxyEvent::JoinIntent { source } => {
                info!("Waking server: Minecraft login attempt from {}", source);
                self.stats.record_wake_attempt();
            }
            ProxyEvent::ClientPresent { port, source } => {
                info!(
                    "Waking server: Satisfactory traffic from {} on port {}",
                    source, port
                );
                self.stats.record_wake_attempt();
            }
            ProxyEvent::HealthChanged { previous, current } => {
                debug!("Health event: {} -> {}", previous, current);
            }
            ProxyEvent::WakeFinished { success: false } => {
                error!("Wake transmission failed on every destination");
            }
            ProxyEvent::WakeFinished { success: true } => {
                debug!("Wake frame delivered, waiting for the host to boot");
            }
            ProxyEvent::BootTimeout => {
                warn!(
                    "Host did not come online within {} seconds",
                    self.boot_wait.as_secs()
                );
            }
            ProxyEvent::Shutdown => {
                info!("Shutdown requested");
            }
        }

        self.transition(next).await;
    }

    async fn transition(&mut self, next: ProxyState) {
        if next == self.state {
            return;
        }

        let previous = self.state;
        info!("Proxy state transition: {} -> {}", previous, next);
        self.state = next;
        self.stats.record_state_transition();
        self.state_tx.send_replace(next);

        match next {
            ProxyState::Offline => self.enter_offline().await,
            ProxyState::Waking => self.enter_waking().await,
            ProxyState::Starting => self.enter_starting().await,
            ProxyState::Proxying => {
                if matches!(previous, ProxyState::Waking | ProxyState::Starting) {
                    self.stats.record_successful_wake();
                }
                self.enter_proxying().await;
            }
            ProxyState::Stopping => self.enter_stopping().await,
        }
    }

    async fn enter_offline(&mut self) {
        self.cancel_wake_work();
        self.acquire_identity().await;
        self.identity.announce().await;
        debug!("Entered offline state - impersonation active");
    }

    async fn enter_waking(&mut self) {
        self.acquire_identity().await;

        let wake = Arc::clone(&self.wake);
        let events = self.events_tx.clone();
        self.wake_task = Some(tokio::spawn(async move {
            let success = wake.wake_with_retry(WAKE_MAX_RETRIES).await;
            let _ = events.send(ProxyEvent::WakeFinished { success }).await;
        }));
    }

    async fn enter_starting(&mut self) {
        self.acquire_identity().await;

        let monitor = Arc::clone(&self.monitor);
        let events = self.events_tx.clone();
        let boot_wait = self.boot_wait;
        self.boot_task = Some(tokio::spawn(async move {
            info!(
                "Waiting up to {} seconds for the host to boot",
                boot_wait.as_secs()
            );
            let event = if monitor.wait_for_online(boot_wait, BOOT_POLL_INTERVAL).await {
                ProxyEvent::HealthChanged {
                    previous: ServerHealth::Offline,
                    current: ServerHealth::Online,
                }
            } else {
                ProxyEvent::BootTimeout
            };
            let _ = events.send(event).await;
        }));
    }

    async fn enter_proxying(&mut self) {
        self.cancel_wake_work();

        if let Err(e) = self.identity.release().await {
            error!("Failed to release the host address: {}", e);
        }
        self.identity.announce().await;
        info!("Transparent forwarding enabled");
    }

    async fn enter_stopping(&mut self) {
        self.cancel_wake_work();

        for task in self.supervised.drain(..) {
            task.abort();
        }

        if self.identity.is_bound()
            && let Err(e) = self.identity.release().await
        {
            error!("Failed to release the host address on shutdown: {}", e);
        }
    }

    async fn acquire_identity(&self) {
        if let Err(e) = self.identity.bind().await {
            // Not fatal; the next transition retries.
            error!("Failed to bind the host address: {}", e);
        }
    }

    fn cancel_wake_work(&mut self) {
        if let Some(task) = self.wake_task.take() {
            task.abort();
        }
        if let Some(task) = self.boot_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ProxyState::*;

    fn join() -> ProxyEvent {
        ProxyEvent::JoinIntent {
            source: SocketAddr::from(([10, 0, 0, 1], 50000)),
        }
    }

    fn udp() -> ProxyEvent {
        ProxyEvent::ClientPresent {
            port: 7777,
            source: SocketAddr::from(([10, 0, 0, 1], 50000)),
        }
    }

    fn health(current: ServerHealth) -> ProxyEvent {
        ProxyEvent::HealthChanged {
            previous: ServerHealth::Unknown,
            current,
        }
    }

    #[test]
    fn client_intent_only_wakes_from_offline() {
        assert_eq!(next_state(Offline, &join()), Some(Waking));
        assert_eq!(next_state(Offline, &udp()), Some(Waking));

        for state in [Waking, Starting, Proxying, Stopping] {
            assert_eq!(next_state(state, &join()), None);
            assert_eq!(next_state(state, &udp()), None);
        }
    }

    #[test]
    fn host_online_moves_every_pre_proxy_state_to_proxying() {
        for state in [Offline, Waking, Starting] {
            assert_eq!(
                next_state(state, &health(ServerHealth::Online)),
                Some(Proxying)
            );
        }
        assert_eq!(next_state(Proxying, &health(ServerHealth::Online)), None);
        assert_eq!(next_state(Stopping, &health(ServerHealth::Online)), None);
    }

    #[test]
    fn host_offline_only_matters_while_proxying() {
        assert_eq!(
            next_state(Proxying, &health(ServerHealth::Offline)),
            Some(Offline)
        );
        for state in [Offline, Waking, Starting, Stopping] {
            assert_eq!(next_state(state, &health(ServerHealth::Offline)), None);
        }
    }

    #[test]
    fn wake_outcome_only_matters_while_waking() {
        assert_eq!(
            next_state(Waking, &ProxyEvent::WakeFinished { success: true }),
            Some(Starting)
        );
        assert_eq!(
            next_state(Waking, &ProxyEvent::WakeFinished { success: false }),
            Some(Offline)
        );

        for state in [Offline, Starting, Proxying, Stopping] {
            assert_eq!(
                next_state(state, &ProxyEvent::WakeFinished { success: true }),
                None
            );
        }
    }

    #[test]
    fn boot_timeout_falls_back_to_offline() {
        assert_eq!(next_state(Starting, &ProxyEvent::BootTimeout), Some(Offline));
        for state in [Offline, Waking, Proxying, Stopping] {
            assert_eq!(next_state(state, &ProxyEvent::BootTimeout), None);
        }
    }

    #[test]
    fn shutdown_is_terminal_from_everywhere() {
        for state in [Offline, Waking, Starting, Proxying] {
            assert_eq!(next_state(state, &ProxyEvent::Shutdown), Some(Stopping));
        }
        assert_eq!(next_state(Stopping, &ProxyEvent::Shutdown), None);
    }

    #[test]
    fn unknown_health_never_transitions() {
        for state in [Offline, Waking, Starting, Proxying, Stopping] {
            assert_eq!(next_state(state, &health(ServerHealth::Unknown)), None);
        }
    }
}
