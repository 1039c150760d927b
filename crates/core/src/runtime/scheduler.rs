use std::sync::Arc;

use async_trait::async_trait;
use murmur_llm::{ElasticDispatcher, ProviderRegistry};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::gate::KeyedGate;
use super::shutdown::ShutdownGuard;
use crate::affect::AffectStore;
use crate::commands::Commands;
use crate::config::EngageCfg;
use crate::engagement::EngagementMachine;
use crate::error::EngageError;
use crate::io::input::{self, InputReceiver, InputSender};
use crate::io::output::{self, OutputMessage, OutputReceiver, OutputSender};
use crate::maintenance::{self, Maintenance, ProactiveInitiator};
use crate::persistence::SnapshotStore;
use crate::prompt::PromptSource;
use crate::respond::{DispatchResponder, Responder};
use crate::scoring::overload::OverloadTracker;
use crate::scoring::ScoringEngine;
use crate::types::{Outcome, ReplyKind};

const INPUT_BUFFER: usize = 256;
const OUTPUT_BUFFER: usize = 64;

/// Wires store, engine, maintenance and channels together and drives them.
pub struct Runtime {
    shutdown: ShutdownGuard,
    store: AffectStore,
    engine: Arc<EngagementMachine>,
    commands: Arc<Commands>,
    snapshots: Arc<dyn SnapshotStore>,
    maintenance: Option<Maintenance>,
    gates: Arc<KeyedGate>,
    input_rx: InputReceiver,
    output_tx: OutputSender,
}

/// Sends proactive openers through the output channel. The maintenance
/// pass holds the conversation's gate around the call.
struct ChannelInitiator {
    responder: Arc<dyn Responder>,
    prompts: Arc<dyn PromptSource>,
    output_tx: OutputSender,
}

#[async_trait]
impl ProactiveInitiator for ChannelInitiator {
    async fn initiate(&self, conversation_id: &str) -> bool {
        let Some(text) = self.responder.open(conversation_id).await else {
            return false;
        };
        self.prompts.record_reply(conversation_id, &text);
        self.output_tx
            .send(OutputMessage::reply(conversation_id, text, ReplyKind::Proactive))
            .await
            .is_ok()
    }
}

impl Runtime {
    /// Build a runtime hydrated from `snapshots`. Returns the runtime, the
    /// input sender for chat adapters, and the reply receiver.
    pub async fn new(
        cfg: Arc<EngageCfg>,
        registry: ProviderRegistry,
        prompts: Arc<dyn PromptSource>,
        snapshots: Arc<dyn SnapshotStore>,
        token: CancellationToken,
    ) -> Result<(Self, InputSender, OutputReceiver), EngageError> {
        let store = match snapshots.load().await? {
            Some(snapshot) => AffectStore::from_snapshot(Arc::clone(&cfg), snapshot),
            None => AffectStore::new(Arc::clone(&cfg)),
        };

        let dispatcher = ElasticDispatcher::new(Arc::new(registry));
        tracing::info!(registry = ?dispatcher.registry(), "providers registered");
        let overload = Arc::new(OverloadTracker::new());
        let scoring = ScoringEngine::new(dispatcher.clone(), Arc::clone(&cfg), Arc::clone(&overload));
        let responder: Arc<dyn Responder> = Arc::new(
            DispatchResponder::new(dispatcher, Arc::clone(&prompts), cfg.reply_chain())
                .with_opening_chain(cfg.summary_chain()),
        );
        let engine = Arc::new(EngagementMachine::new(
            Arc::clone(&cfg),
            store.engine(),
            scoring,
            Arc::clone(&prompts),
            Arc::clone(&responder),
        ));
        let commands = Arc::new(
            Commands::new(store.clone(), overload, Arc::clone(&snapshots)).with_prompts(Arc::clone(&prompts)),
        );

        let (input_tx, input_rx) = input::channel(INPUT_BUFFER);
        let (output_tx, output_rx) = output::channel(OUTPUT_BUFFER);
        let gates = Arc::new(KeyedGate::new());

        let initiator = Arc::new(ChannelInitiator {
            responder,
            prompts,
            output_tx: output_tx.clone(),
        });
        let maintenance = Maintenance::new(store.maintenance(), cfg)
            .with_initiator(initiator)
            .with_gate(Arc::clone(&gates));

        let runtime = Self {
            shutdown: ShutdownGuard::with_token(token),
            store,
            engine,
            commands,
            snapshots,
            maintenance: Some(maintenance),
            gates,
            input_rx,
            output_tx,
        };
        Ok((runtime, input_tx, output_rx))
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub fn commands(&self) -> Arc<Commands> {
        Arc::clone(&self.commands)
    }

    pub fn store(&self) -> &AffectStore {
        &self.store
    }

    /// Consume inbound messages until cancelled or the input closes, then
    /// drain in-flight handlers and save a final snapshot.
    pub async fn run(mut self) {
        self.shutdown.spawn_signal_listener();
        let token = self.shutdown.token();
        let tracker = TaskTracker::new();

        if let Some(m) = self.maintenance.take() {
            let handle = maintenance::spawn(m, token.clone());
            tracker.spawn(async move {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "maintenance task panicked");
                }
            });
        }

        tracing::info!(conversations = self.store.conversation_count(), "murmur runtime started");

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => break,
                message = self.input_rx.recv() => message,
            };
            let Some(message) = message else {
                tracing::info!("input channel closed");
                break;
            };

            let engine = Arc::clone(&self.engine);
            let gates = Arc::clone(&self.gates);
            let output_tx = self.output_tx.clone();
            tracker.spawn(async move {
                let _gate = gates.acquire(&message.conversation_id).await;
                if let Outcome::Replied { kind, text } = engine.handle(&message).await {
                    let out = OutputMessage::reply(message.conversation_id.clone(), text, kind);
                    if output_tx.send(out).await.is_err() {
                        tracing::warn!(conversation = %message.conversation_id, "output channel closed, reply dropped");
                    }
                }
            });
        }

        token.cancel();
        tracker.close();
        tracker.wait().await;

        match self.snapshots.save(&self.store.snapshot()).await {
            Ok(()) => tracing::info!("final snapshot saved"),
            Err(e) => tracing::error!(error = %e, "failed to save final snapshot"),
        }
        tracing::info!("murmur runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySnapshotStore;
    use crate::prompt::BasicPrompts;
    use crate::types::InboundMessage;
    use murmur_llm::provider::ScriptedProvider;
    use std::time::Duration;

    #[tokio::test]
    async fn replies_flow_to_output_and_snapshot_is_saved() {
        let judge = ScriptedProvider::always(
            "judge",
            r#"{"relevance":9,"willingness":9,"social":9,"timing":9,"continuity":9,"inferred_mood":"positive"}"#,
        );
        let writer = ScriptedProvider::always("writer", "hey!");
        let registry = ProviderRegistry::new()
            .with("judge", Arc::new(judge))
            .with("writer", Arc::new(writer));
        let cfg = Arc::new(EngageCfg {
            judge_provider_names: vec!["judge".into()],
            reply_provider_names: vec!["writer".into()],
            ..EngageCfg::default()
        });
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let token = CancellationToken::new();
        let (runtime, input_tx, mut output_rx) = Runtime::new(
            cfg,
            registry,
            Arc::new(BasicPrompts::new(false, 0.6)),
            snapshots.clone(),
            token.clone(),
        )
        .await
        .unwrap();

        let run = tokio::spawn(runtime.run());
        input_tx
            .send(InboundMessage::new("room", "ann", "murmur?").with_bonus(0.5))
            .await
            .unwrap();

        let out = tokio::time::timeout(Duration::from_secs(2), output_rx.recv()).await.unwrap().unwrap();
        assert_eq!(out.conversation_id, "room");
        assert_eq!(out.content, "hey!");
        assert_eq!(out.kind, ReplyKind::PerMessage);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
        let saved = snapshots.load().await.unwrap().unwrap();
        assert_eq!(saved.conversations["room"].total_replies, 1);
    }
}
