//! Stele client runtime
//!
//! Ties the tracker, witness manager, and coin lifecycle together behind a
//! single event loop. The loop task exclusively owns all mutable protocol
//! state; the [`SteleClient`] handle talks to it over a command channel and
//! every command is answered through a oneshot. That gives the whole client
//! one logical thread: ledger events and commands interleave in a single
//! total order, so no operation ever observes a half-applied round.
//!
//! Ledger events take priority over commands. A spend issued right after a
//! delta was published is therefore validated against the *new* state, not
//! the one the caller last saw.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stele_crypto::CryptoContext;
use stele_tracker::{Checkpoint, StateTracker, TrackerConfig, TrackerStats};
use stele_wallet::{
    Coin, CoinEvent, CoinId, CoinLifecycle, CoinState, CompletionReceiver, GatewayError,
    LedgerEvent, LedgerEventStream, LedgerGateway, LifecycleConfig, LifecycleStats, OwnerKey,
    Receipt, WalletError, WalletResult, WitnessManager, WitnessStatus,
};

/// Errors from the client handle itself. Protocol failures surface as
/// [`WalletError`] values inside command replies.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not started")]
    NotStarted,
    #[error("client is already running")]
    AlreadyRunning,
    #[error("client event loop is gone")]
    ChannelClosed,
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// State tracker tuning
    pub tracker: TrackerConfig,
    /// Transaction lifecycle tuning
    pub lifecycle: LifecycleConfig,
    /// Command channel depth
    pub command_capacity: usize,
    /// Broadcast buffer for client events; slow subscribers lag past this
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            command_capacity: 64,
            event_capacity: 256,
        }
    }
}

/// Combined counters from the loop-owned components.
#[derive(Clone, Copy, Debug)]
pub struct ClientStats {
    pub tracker: TrackerStats,
    pub lifecycle: LifecycleStats,
    pub tracked_witnesses: usize,
}

/// Events published to client subscribers.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// The tracker advanced to this checkpoint
    Advanced(Checkpoint),
    /// A reorg rolled the tracker back to this checkpoint
    Reorged(Checkpoint),
    /// A coin changed lifecycle state
    Coin(CoinEvent),
}

enum Command {
    Mint {
        owner: OwnerKey,
        id: CoinId,
        reply: oneshot::Sender<WalletResult<(Receipt, CompletionReceiver)>>,
    },
    Spend {
        id: CoinId,
        new_owner: OwnerKey,
        reply: oneshot::Sender<WalletResult<(Receipt, CompletionReceiver)>>,
    },
    Cancel {
        id: CoinId,
        reply: oneshot::Sender<WalletResult<()>>,
    },
    TrackIncoming {
        coin: Coin,
        sequence: u64,
        reply: oneshot::Sender<WalletResult<()>>,
    },
    RefreshWitness {
        id: CoinId,
        reply: oneshot::Sender<WalletResult<()>>,
    },
    CoinState {
        id: CoinId,
        reply: oneshot::Sender<Option<CoinState>>,
    },
    WitnessStatus {
        id: CoinId,
        reply: oneshot::Sender<Option<WitnessStatus>>,
    },
    CurrentCheckpoint {
        reply: oneshot::Sender<Checkpoint>,
    },
    Stats {
        reply: oneshot::Sender<ClientStats>,
    },
    Shutdown,
}

struct ClientRuntime {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

/// Handle to a running stele client.
///
/// Cheap to keep around; all methods borrow `&self` except the start and
/// shutdown transitions.
pub struct SteleClient {
    ctx: Arc<CryptoContext>,
    gateway: Arc<dyn LedgerGateway>,
    config: ClientConfig,
    runtime: Option<ClientRuntime>,
}

impl SteleClient {
    pub fn new(
        ctx: Arc<CryptoContext>,
        gateway: Arc<dyn LedgerGateway>,
        config: ClientConfig,
    ) -> Self {
        Self {
            ctx,
            gateway,
            config,
            runtime: None,
        }
    }

    /// Query the ledger's current checkpoint, seed the tracker there,
    /// subscribe to the event stream, and spawn the event loop.
    pub async fn start(&mut self) -> ClientResult<()> {
        if self.runtime.is_some() {
            return Err(ClientError::AlreadyRunning);
        }
        let checkpoint = self.gateway.query_state().await?;
        info!(sequence = checkpoint.sequence, "starting client at ledger checkpoint");

        let ledger_events = self.gateway.subscribe_events();
        let tracker = StateTracker::new(self.ctx.clone(), self.config.tracker.clone(), checkpoint);
        let witnesses = WitnessManager::new(self.ctx.clone());
        let lifecycle = CoinLifecycle::new(self.config.lifecycle, self.gateway.clone());

        let (commands, command_rx) = mpsc::channel(self.config.command_capacity);
        let (events, _) = broadcast::channel(self.config.event_capacity);
        let event_loop = EventLoop {
            tracker,
            witnesses,
            lifecycle,
            ledger_events,
            commands: command_rx,
            events: events.clone(),
        };
        let task = tokio::spawn(event_loop.run());
        self.runtime = Some(ClientRuntime {
            commands,
            events,
            task,
        });
        Ok(())
    }

    /// Stop the event loop and wait for it to drain.
    pub async fn shutdown(&mut self) -> ClientResult<()> {
        let runtime = self.runtime.take().ok_or(ClientError::NotStarted)?;
        let _ = runtime.commands.send(Command::Shutdown).await;
        let _ = runtime.task.await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Subscribe to client events. Each subscriber gets every event from
    /// the point of subscription onward.
    pub fn subscribe(&self) -> ClientResult<broadcast::Receiver<ClientEvent>> {
        let runtime = self.runtime.as_ref().ok_or(ClientError::NotStarted)?;
        Ok(runtime.events.subscribe())
    }

    /// Mint a new coin with this id to `owner`.
    pub async fn mint(
        &self,
        owner: OwnerKey,
        id: CoinId,
    ) -> ClientResult<(Receipt, CompletionReceiver)> {
        let result = self
            .request(|reply| Command::Mint { owner, id, reply })
            .await?;
        Ok(result?)
    }

    /// Spend an owned coin to `new_owner`.
    pub async fn spend(
        &self,
        id: CoinId,
        new_owner: OwnerKey,
    ) -> ClientResult<(Receipt, CompletionReceiver)> {
        let result = self
            .request(|reply| Command::Spend {
                id,
                new_owner,
                reply,
            })
            .await?;
        Ok(result?)
    }

    /// Stop listening for an in-flight transaction's outcome.
    pub async fn cancel(&self, id: CoinId) -> ClientResult<()> {
        let result = self.request(|reply| Command::Cancel { id, reply }).await?;
        Ok(result?)
    }

    /// Adopt a coin finalized for us in the given round.
    pub async fn track_incoming(&self, coin: Coin, sequence: u64) -> ClientResult<()> {
        let result = self
            .request(|reply| Command::TrackIncoming {
                coin,
                sequence,
                reply,
            })
            .await?;
        Ok(result?)
    }

    /// Force a coin's witness back to the current checkpoint.
    pub async fn refresh_witness(&self, id: CoinId) -> ClientResult<()> {
        let result = self
            .request(|reply| Command::RefreshWitness { id, reply })
            .await?;
        Ok(result?)
    }

    pub async fn coin_state(&self, id: CoinId) -> ClientResult<Option<CoinState>> {
        self.request(|reply| Command::CoinState { id, reply }).await
    }

    pub async fn witness_status(&self, id: CoinId) -> ClientResult<Option<WitnessStatus>> {
        self.request(|reply| Command::WitnessStatus { id, reply })
            .await
    }

    pub async fn current_checkpoint(&self) -> ClientResult<Checkpoint> {
        self.request(|reply| Command::CurrentCheckpoint { reply })
            .await
    }

    pub async fn stats(&self) -> ClientResult<ClientStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> ClientResult<T> {
        let runtime = self.runtime.as_ref().ok_or(ClientError::NotStarted)?;
        let (reply, receiver) = oneshot::channel();
        runtime
            .commands
            .send(build(reply))
            .await
            .map_err(|_| ClientError::ChannelClosed)?;
        receiver.await.map_err(|_| ClientError::ChannelClosed)
    }
}

/// The loop task. Owns every piece of mutable client state.
struct EventLoop {
    tracker: StateTracker,
    witnesses: WitnessManager,
    lifecycle: CoinLifecycle,
    ledger_events: LedgerEventStream,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ClientEvent>,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                // Ledger events first, so commands always see the newest
                // applied state.
                biased;
                maybe_event = self.ledger_events.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_ledger_event(event),
                        None => {
                            warn!("ledger event stream closed");
                            break;
                        }
                    }
                }
                maybe_command = self.commands.recv() => {
                    match maybe_command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
            }
        }
        debug!("client event loop stopped");
    }

    fn handle_ledger_event(&mut self, event: LedgerEvent) {
        match event {
            LedgerEvent::Delta(delta) => match self.tracker.apply_delta(delta.clone()) {
                Ok(()) => {
                    self.witnesses.advance_all(&delta);
                    let coin_events =
                        self.lifecycle
                            .on_delta(&delta, &self.tracker, &mut self.witnesses);
                    self.publish(ClientEvent::Advanced(self.tracker.current().clone()));
                    for event in coin_events {
                        self.publish(ClientEvent::Coin(event));
                    }
                }
                Err(error) => {
                    warn!(sequence = delta.sequence, %error, "dropping delta");
                }
            },
            LedgerEvent::Reorg(checkpoint) => match self.tracker.on_reorg(&checkpoint) {
                Ok(dropped) => {
                    self.witnesses.mark_all_stale();
                    let coin_events =
                        self.lifecycle
                            .on_reorg(&dropped, &self.tracker, &mut self.witnesses);
                    self.publish(ClientEvent::Reorged(self.tracker.current().clone()));
                    for event in coin_events {
                        self.publish(ClientEvent::Coin(event));
                    }
                }
                Err(error) => {
                    warn!(sequence = checkpoint.sequence, %error, "cannot follow reorg");
                }
            },
            LedgerEvent::Outcome(outcome) => {
                let coin_events =
                    self.lifecycle
                        .on_outcome(&outcome, &self.tracker, &mut self.witnesses);
                for event in coin_events {
                    self.publish(ClientEvent::Coin(event));
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Mint { owner, id, reply } => {
                let result = self
                    .lifecycle
                    .build_mint(Coin::new(owner, id), &self.tracker)
                    .await;
                let _ = reply.send(result);
            }
            Command::Spend {
                id,
                new_owner,
                reply,
            } => {
                let result = self
                    .lifecycle
                    .build_spend(id, new_owner, &self.tracker, &mut self.witnesses)
                    .await;
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.lifecycle.cancel(id));
            }
            Command::TrackIncoming {
                coin,
                sequence,
                reply,
            } => {
                let _ = reply.send(self.lifecycle.track_incoming(
                    coin,
                    sequence,
                    &self.tracker,
                    &mut self.witnesses,
                ));
            }
            Command::RefreshWitness { id, reply } => {
                let _ = reply.send(self.lifecycle.refresh_witness(
                    id,
                    &self.tracker,
                    &mut self.witnesses,
                ));
            }
            Command::CoinState { id, reply } => {
                let _ = reply.send(self.lifecycle.registry().state_of(id));
            }
            Command::WitnessStatus { id, reply } => {
                let _ = reply.send(self.witnesses.status(id));
            }
            Command::CurrentCheckpoint { reply } => {
                let _ = reply.send(self.tracker.current().clone());
            }
            Command::Stats { reply } => {
                let _ = reply.send(ClientStats {
                    tracker: self.tracker.stats(),
                    lifecycle: self.lifecycle.stats(),
                    tracked_witnesses: self.witnesses.len(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn publish(&self, event: ClientEvent) {
        // Send only fails with zero subscribers, which is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_crypto::AccumulatorParams;
    use stele_wallet::InMemoryLedger;

    fn owner(byte: u8) -> OwnerKey {
        OwnerKey::new([byte; 32]).unwrap()
    }

    async fn started_client() -> (Arc<InMemoryLedger>, SteleClient) {
        let ctx = Arc::new(CryptoContext::new(AccumulatorParams::insecure_test_wide()));
        let ledger = Arc::new(InMemoryLedger::new(ctx.clone()));
        let mut client = SteleClient::new(ctx, ledger.clone(), ClientConfig::default());
        client.start().await.unwrap();
        (ledger, client)
    }

    #[tokio::test]
    async fn test_mint_and_spend_through_client() {
        let (ledger, client) = started_client().await;
        let id = CoinId::new(42);

        let (_, done) = client.mint(owner(1), id).await.unwrap();
        ledger.finalize_round().unwrap();
        assert_eq!(done.await.unwrap(), Ok(1));
        assert_eq!(client.coin_state(id).await.unwrap(), Some(CoinState::Minted));
        assert_eq!(
            client.witness_status(id).await.unwrap(),
            Some(WitnessStatus::Fresh)
        );

        let (_, done) = client.spend(id, owner(2)).await.unwrap();
        ledger.finalize_round().unwrap();
        assert_eq!(done.await.unwrap(), Ok(2));
        assert_eq!(client.coin_state(id).await.unwrap(), Some(CoinState::Spent));
        assert_eq!(client.current_checkpoint().await.unwrap().sequence, 2);

        let stats = client.stats().await.unwrap();
        assert_eq!(stats.lifecycle.finalized, 2);
        assert_eq!(stats.tracker.deltas_applied, 2);
    }

    #[tokio::test]
    async fn test_commands_see_freshly_published_rounds() {
        let (ledger, client) = started_client().await;
        let id = CoinId::new(7);

        let (_, done) = client.mint(owner(1), id).await.unwrap();
        ledger.finalize_round().unwrap();
        done.await.unwrap().unwrap();

        // Publish a round and immediately query: the biased loop applies
        // the delta before answering, so the checkpoint is already new.
        ledger.finalize_round().unwrap();
        assert_eq!(client.current_checkpoint().await.unwrap().sequence, 2);
        assert_eq!(
            client.witness_status(id).await.unwrap(),
            Some(WitnessStatus::Fresh)
        );
    }

    #[tokio::test]
    async fn test_client_event_feed() {
        let (ledger, client) = started_client().await;
        let mut feed = client.subscribe().unwrap();
        let id = CoinId::new(1);

        let (_, done) = client.mint(owner(1), id).await.unwrap();
        ledger.finalize_round().unwrap();
        done.await.unwrap().unwrap();

        let mut advanced = false;
        let mut minted = false;
        while let Ok(event) = feed.try_recv() {
            match event {
                ClientEvent::Advanced(checkpoint) => advanced |= checkpoint.sequence == 1,
                ClientEvent::Coin(CoinEvent::Minted { sequence, .. }) => {
                    minted |= sequence == 1;
                }
                _ => {}
            }
        }
        assert!(advanced);
        assert!(minted);
    }

    #[tokio::test]
    async fn test_reorg_rolls_client_back() {
        let (ledger, client) = started_client().await;
        let first = CoinId::new(1);
        let second = CoinId::new(2);

        let (_, done) = client.mint(owner(1), first).await.unwrap();
        ledger.finalize_round().unwrap();
        done.await.unwrap().unwrap();
        let (_, done) = client.mint(owner(1), second).await.unwrap();
        ledger.finalize_round().unwrap();
        done.await.unwrap().unwrap();

        ledger.force_reorg(1).unwrap();
        // The queued reorg event is processed before this query.
        assert_eq!(client.current_checkpoint().await.unwrap().sequence, 1);
        assert_eq!(
            client.coin_state(second).await.unwrap(),
            Some(CoinState::Unminted)
        );
        assert_eq!(
            client.coin_state(first).await.unwrap(),
            Some(CoinState::Minted)
        );
    }

    #[tokio::test]
    async fn test_lifecycle_of_the_handle() {
        let ctx = Arc::new(CryptoContext::new(AccumulatorParams::insecure_test_wide()));
        let ledger = Arc::new(InMemoryLedger::new(ctx.clone()));
        let mut client = SteleClient::new(ctx, ledger, ClientConfig::default());

        assert!(matches!(
            client.coin_state(CoinId::new(1)).await,
            Err(ClientError::NotStarted)
        ));
        client.start().await.unwrap();
        assert!(matches!(client.start().await, Err(ClientError::AlreadyRunning)));
        assert!(client.is_running());

        client.shutdown().await.unwrap();
        assert!(!client.is_running());
        assert!(matches!(
            client.mint(owner(1), CoinId::new(1)).await,
            Err(ClientError::NotStarted)
        ));
    }
}
