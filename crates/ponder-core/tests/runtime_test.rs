//! Runtime lifecycle: persistence across restarts and day rollover.

mod common;

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use ponder_core::{
    source, AgentConfig, AgentEvent, AgentRuntime, EventSubscriber, RawEvent, Response,
    RuntimeConfig, Tier,
};

use common::collaborators;

fn config(db: &Path) -> AgentConfig {
    let mut config = AgentConfig::builder()
        .runtime(
            RuntimeConfig::default()
                .with_db_path(db)
                .without_rollover_on_start(),
        )
        .build();
    config.scheduler.proactive_interval_secs = 3600;
    config
}

async fn next_response(events: &mut EventSubscriber) -> Response {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(AgentEvent::Response(r)) = events.recv().await {
                return r;
            }
        }
    })
    .await
    .expect("no response within 5s")
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_restart_restores_thoughts_and_memory() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state").join("ponder.db");

    {
        let mut runtime = AgentRuntime::new(config(&db), collaborators()).await.unwrap();
        let mut events = runtime.subscribe();
        runtime.start().await.unwrap();

        runtime.ingest(RawEvent::new(source::DIRECT_MENTION, "are you there"));
        let response = next_response(&mut events).await;
        assert_eq!(response.text, "Re: noted: are you there");

        runtime.ingest(RawEvent::user_input("I live in Lisbon"));
        let buffer = runtime.buffer();
        wait_for(|| buffer.len() == 3).await;

        runtime.shutdown().await.unwrap();
    }

    let runtime = AgentRuntime::new(config(&db), collaborators()).await.unwrap();
    let thoughts = runtime.buffer().thoughts();
    assert_eq!(thoughts.len(), 3);
    assert!(thoughts[0].spoken);
    assert!(thoughts[1].is_from(source::RESPONSE_ECHO));
    assert!(thoughts[1].spoken);
    assert_eq!(thoughts[2].content, "noted: I live in Lisbon");
    assert!(!thoughts[2].spoken);
    assert_eq!(runtime.buffer().unspoken_count(), 1);
    assert_eq!(runtime.buffer().last_response_at(), Some(thoughts[1].created_at));

    let recent = runtime.memory().recent(10);
    let texts: Vec<&str> = recent.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["Re: noted: are you there", "I live in Lisbon"]);
}

#[tokio::test]
async fn test_rollover_archives_yesterday_durably() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("ponder.db");
    let mut cfg = config(&db);
    cfg.memory.recent_capacity = 1;

    let yesterday = Utc::now() - chrono::Duration::days(1);
    {
        let runtime = AgentRuntime::new(cfg.clone(), collaborators()).await.unwrap();
        let mut events = runtime.subscribe();
        let memory = runtime.memory();
        memory.insert("we baked bread", "user", yesterday).await.unwrap();
        memory.insert("it rose nicely", "user", yesterday).await.unwrap();
        memory.insert("good morning", "user", Utc::now()).await.unwrap();
        assert_eq!(memory.tier_len(Tier::Daily), 2);

        let report = runtime.rollover_now().await;
        assert_eq!(report.archived_days, vec![yesterday.date_naive()]);
        assert_eq!(report.purged, 2);

        match events.try_recv() {
            Some(AgentEvent::DaysArchived { days, purged, .. }) => {
                assert_eq!(days, vec![yesterday.date_naive()]);
                assert_eq!(purged, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    let runtime = AgentRuntime::new(cfg, collaborators()).await.unwrap();
    let memory = runtime.memory();
    assert_eq!(memory.tier_len(Tier::Daily), 0);
    let archived = memory.records(Tier::Archived);
    assert_eq!(archived.len(), 1);
    assert_eq!(
        archived[0].text,
        format!("{}: we baked bread | it rose nicely", yesterday.date_naive())
    );
    assert_eq!(memory.recent(5)[0].text, "good morning");
}
