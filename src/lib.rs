//! Stream queue core façade and bootstrap helpers.
//!
//! Hosts hand over their bridge implementations (resolver, cache, decoder,
//! audio engine) in a [`PlaybackDependencies`] bundle and get back a fully
//! wired [`StreamQueueCore`]: queue model, prefetch pipeline, cache
//! coordinator, engine orchestrator and command queue, all sharing one
//! [`EventBus`].

pub use bridge_traits;
pub use core_async;
pub use core_playback;
pub use core_runtime;

use std::sync::Arc;

use bridge_traits::{
    time::Clock, AudioEngine, CacheManagerFactory, StreamFactory, SystemClock, TrackResolver,
};
use core_playback::{
    CacheCoordinator, CommandQueue, EngineOrchestrator, PlaybackConfig, PlaybackError,
    PlaybackStateMachine, PositionCoordinator, PrefetchPipeline, QueueManager, Result,
};
use core_runtime::events::EventBus;
use tracing::info;

const EVENT_BUFFER: usize = 256;

/// Aggregated handle to all bridge dependencies the core requires.
pub struct PlaybackDependencies {
    pub resolver: Arc<dyn TrackResolver>,
    pub cache_factory: Arc<dyn CacheManagerFactory>,
    pub stream_factory: Arc<dyn StreamFactory>,
    pub engine: Arc<dyn AudioEngine>,
    pub clock: Arc<dyn Clock>,
}

impl PlaybackDependencies {
    /// Construct a dependency bundle from explicit bridge handles. Uses the
    /// system clock.
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        cache_factory: Arc<dyn CacheManagerFactory>,
        stream_factory: Arc<dyn StreamFactory>,
        engine: Arc<dyn AudioEngine>,
    ) -> Self {
        Self {
            resolver,
            cache_factory,
            stream_factory,
            engine,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Every playback component, wired together.
pub struct StreamQueueCore {
    pub config: PlaybackConfig,
    pub events: EventBus,
    pub queue: Arc<QueueManager>,
    pub pipeline: Arc<PrefetchPipeline>,
    pub coordinator: Arc<CacheCoordinator>,
    pub state: Arc<PlaybackStateMachine>,
    pub position: Arc<PositionCoordinator>,
    pub orchestrator: Arc<EngineOrchestrator>,
    pub commands: Arc<CommandQueue>,
}

impl StreamQueueCore {
    /// Validates `config`, builds the components and starts the background
    /// listeners and the cache sweep. Must run inside a runtime.
    pub fn bootstrap(deps: PlaybackDependencies, config: PlaybackConfig) -> Result<Self> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;

        let events = EventBus::new(EVENT_BUFFER);
        let queue = Arc::new(QueueManager::new());
        let pipeline = Arc::new(
            PrefetchPipeline::new(deps.resolver, deps.cache_factory, deps.stream_factory, &config)
                .with_event_bus(events.clone()),
        );
        let coordinator = Arc::new(
            CacheCoordinator::new(queue.clone(), pipeline.clone(), config.clone())
                .with_event_bus(events.clone()),
        );
        let state = Arc::new(PlaybackStateMachine::new().with_event_bus(events.clone()));
        let position = Arc::new(PositionCoordinator::new(deps.clock));
        let orchestrator = Arc::new(
            EngineOrchestrator::new(deps.engine, state.clone(), position.clone())
                .with_pipeline(pipeline.clone())
                .with_event_bus(events.clone()),
        );
        let commands = Arc::new(
            CommandQueue::new(orchestrator.clone(), &config).with_event_bus(events.clone()),
        );

        coordinator.spawn_event_listener(&events);
        coordinator.start();
        orchestrator.spawn_engine_listener();
        info!("Stream queue core started");

        Ok(Self {
            config,
            events,
            queue,
            pipeline,
            coordinator,
            state,
            position,
            orchestrator,
            commands,
        })
    }

    /// Stops commands, background tasks and releases every cached resource.
    pub async fn shutdown(&self) {
        self.commands.shutdown();
        self.orchestrator.shutdown().await;
        self.coordinator.shutdown().await;
        self.pipeline.shutdown();
        info!("Stream queue core stopped");
    }
}
