//! End-to-end cognitive loop scenarios driven cycle by cycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ponder_core::config::AgentConfig;
use ponder_core::types::FailureKind;
use ponder_core::{
    source, CognitiveScheduler, EventBus, InstructionTTLCache, Priority, PriorityMap, RawEvent,
    SchedulerParts, SpeakReason, ThoughtBuffer, Tier, TieredMemoryStore, ToolActionTracker,
};

use common::{registry, ConcatSummarizer, ParrotInterpreter, RecapGenerator, TrigramEmbedder};

struct Agent {
    scheduler: CognitiveScheduler,
    buffer: Arc<ThoughtBuffer>,
    memory: Arc<TieredMemoryStore>,
    tracker: ToolActionTracker,
    generator: Arc<RecapGenerator>,
    t0: DateTime<Utc>,
}

impl Agent {
    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.t0 + chrono::Duration::seconds(secs)
    }

    fn say(&self, text: &str, secs: i64) {
        self.buffer
            .ingest(RawEvent::at(source::USER_INPUT, text, self.at(secs)));
    }
}

fn agent(mut config: AgentConfig) -> Agent {
    config.scheduler.proactive_interval_secs = 3600;
    let t0 = Utc::now();
    let buffer = Arc::new(ThoughtBuffer::started_at(PriorityMap::default(), t0));
    let memory = Arc::new(TieredMemoryStore::new(
        config.memory.clone(),
        Arc::new(TrigramEmbedder::new()),
        Arc::new(ConcatSummarizer),
    ));
    let tracker = ToolActionTracker::new(config.tools.clone(), Arc::new(registry()), buffer.clone());
    let generator = Arc::new(RecapGenerator::default());

    let scheduler = CognitiveScheduler::new(
        &config,
        SchedulerParts {
            buffer: buffer.clone(),
            memory: memory.clone(),
            tracker: tracker.clone(),
            instructions: Arc::new(InstructionTTLCache::new(config.instructions.ttl())),
            interpreter: Arc::new(ParrotInterpreter::default()),
            generator: generator.clone(),
            sink: Arc::new(EventBus::new()),
        },
    );

    Agent {
        scheduler,
        buffer,
        memory,
        tracker,
        generator,
        t0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_tool_times_out_into_high_thought() {
    let mut config = AgentConfig::default();
    config.tools.timeouts.insert("web_search".to_string(), 2);
    let mut agent = agent(config);

    agent.buffer.ingest(RawEvent::at(
        source::CHAT_MESSAGE,
        r#"run web_search {"secs": 10}"#,
        agent.t0,
    ));
    let first = agent.scheduler.cycle_at(agent.t0).await.unwrap();
    assert_eq!(first.thoughts_added, 2);
    assert_eq!(first.speaking, None);
    assert_eq!(agent.tracker.in_flight_count(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let history = agent.tracker.history("web_search");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].failure_kind, Some(FailureKind::Timeout));
    assert_eq!(agent.buffer.pending_len(), 1);

    let second = agent.scheduler.cycle_at(agent.at(3)).await.unwrap();
    assert_eq!(second.thoughts_added, 1);
    let timeout_thought = agent.buffer.thoughts().pop().unwrap();
    assert!(timeout_thought.is_from(source::TOOL_TIMEOUT));
    assert_eq!(timeout_thought.priority, Priority::High);
    assert!(timeout_thought.content.contains("[web_search] TIMEOUT"));

    // nobody has typed anything, so the HIGH wait has already elapsed
    assert_eq!(second.speaking, Some(SpeakReason::HighPriorityWaitElapsed));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(agent.buffer.pending_len(), 0);
}

#[tokio::test]
async fn test_conversation_turn_with_memory_recall() {
    let config = AgentConfig::builder().recent_capacity(1).build();
    let mut agent = agent(config);

    agent.say("my favourite colour is teal", 0);
    agent.scheduler.cycle_at(agent.t0).await.unwrap();
    agent.say("what is my favourite colour", 2);
    agent.scheduler.cycle_at(agent.at(2)).await.unwrap();

    assert_eq!(agent.memory.tier_len(Tier::Recent), 1);
    assert_eq!(agent.memory.tier_len(Tier::Daily), 1);

    assert_eq!(agent.scheduler.cycle_at(agent.at(7)).await.unwrap().speaking, None);
    let speak = agent.scheduler.cycle_at(agent.at(11)).await.unwrap();
    assert_eq!(speak.speaking, Some(SpeakReason::HighPriorityWaitElapsed));

    let response = agent
        .scheduler
        .finish_generation_at(agent.at(12))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.text, "Re: noted: what is my favourite colour");
    assert_eq!(response.thought_ids, vec![0, 1]);

    let request = agent.generator.requests.lock().unwrap()[0].clone();
    assert_eq!(request.unspoken.len(), 2);
    assert!(!request.memories.is_empty());
    assert_eq!(request.memories[0].record.text, "my favourite colour is teal");

    assert_eq!(agent.buffer.unspoken_count(), 0);
    let recent = agent.memory.recent(1);
    assert_eq!(recent[0].role(), Some("agent"));
    assert_eq!(agent.memory.tier_len(Tier::Daily), 2);
}

#[tokio::test]
async fn test_twenty_six_messages_migrate_one() {
    let mut agent = agent(AgentConfig::default());
    for i in 0..26 {
        agent.say(&format!("message number {}", i), 0);
    }
    let outcome = agent.scheduler.cycle_at(agent.t0).await.unwrap();
    assert_eq!(outcome.thoughts_added, 26);

    assert_eq!(agent.memory.tier_len(Tier::Recent), 25);
    let daily = agent.memory.records(Tier::Daily);
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].text, "message number 0");
    assert!(daily[0].embedding.is_some());
}

#[tokio::test]
async fn test_accumulated_then_high_volume() {
    let mut agent = agent(AgentConfig::default());
    for i in 0..4 {
        agent.buffer.ingest(RawEvent::at(
            source::OBSERVATION,
            format!("leaf {} falls", i),
            agent.t0,
        ));
    }
    agent.scheduler.cycle_at(agent.t0).await.unwrap();
    assert_eq!(agent.scheduler.cycle_at(agent.at(31)).await.unwrap().speaking, None);

    for i in 0..4 {
        agent.buffer.ingest(RawEvent::at(
            source::OBSERVATION,
            format!("bird {} sings", i),
            agent.at(31),
        ));
    }
    let outcome = agent.scheduler.cycle_at(agent.at(32)).await.unwrap();
    assert_eq!(outcome.speaking, Some(SpeakReason::AccumulatedObservations));

    let response = agent
        .scheduler
        .finish_generation_at(agent.at(33))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.thought_ids.len(), 8);

    // 8 fresh observations only 16s after speaking: high volume, not accumulation
    for i in 0..8 {
        agent.buffer.ingest(RawEvent::at(
            source::OBSERVATION,
            format!("cloud {} drifts", i),
            agent.at(40),
        ));
    }
    assert_eq!(agent.scheduler.cycle_at(agent.at(40)).await.unwrap().speaking, None);
    let volume = agent.scheduler.cycle_at(agent.at(49)).await.unwrap();
    assert_eq!(volume.speaking, Some(SpeakReason::HighVolume));
}
