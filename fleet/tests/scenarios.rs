//! End-to-end scenarios from spec §8, driven over a real in-process [`Router`] reachable
//! only through loopback TCP — every message in these tests travels through
//! [`fleet::router::server::RouterServer`] exactly as it would between real agent
//! processes. Each scenario plays the part of the worker loop itself (one `run_once` or
//! `tick` call per step) rather than spawning a real OS process, the same idiom the
//! in-crate unit tests in `client.rs`/`passive_loop.rs` already use.

use std::sync::Arc;
use std::time::Duration;

use fleet::agent::Agent;
use fleet::client::AgentClient;
use fleet::context::AgentContext;
use fleet::passive_loop::run_once;
use fleet::router::server::RouterServer;
use fleet::router::Router;
use fleet::state::AgentState;
use fleet::team::centralized::CentralizedCollaboration;
use fleet::team::decentralized::DecentralizedCollaboration;
use fleet::team::services::{DecisionStrategy, TeamVoting};
use fleet::team::Team;
use fleet_wire::{Action, AgentId, Envelope, EventType};

async fn bound_router() -> (Router, u16) {
    let router = Router::new();
    let server = RouterServer::bind(router.clone(), 0).await.unwrap();
    let port = server.local_port().unwrap();
    tokio::spawn(server.serve());
    (router, port)
}

/// Mirrors the incoming content back upper-cased, exactly as spec §8 scenario 1 describes.
struct UppercasingEcho;

#[async_trait::async_trait]
impl Agent for UppercasingEcho {
    async fn respond(
        &self,
        _context: &mut AgentContext,
        _state: &mut AgentState,
        incoming: &Envelope,
        _view: &[Envelope],
    ) -> fleet::FleetResult<Vec<Envelope>> {
        let reply = Envelope::message(incoming.content.clone().unwrap_or_default().to_uppercase())
            .with_destination(incoming.source.clone().unwrap_or_else(|| "unknown".into()));
        Ok(vec![reply])
    }

    fn name(&self) -> &str {
        "Echo"
    }
}

#[tokio::test]
async fn direct_request_response() {
    let (_router, port) = bound_router().await;

    let human = AgentClient::connect(("127.0.0.1", port), AgentId::new("human")).await.unwrap();
    let echo_client = AgentClient::connect(("127.0.0.1", port), AgentId::new("Echo")).await.unwrap();

    human
        .send_message(Envelope::new(EventType::Message).with_source("human").with_destination("Echo").with_content("hi"))
        .await
        .unwrap();

    let agent: Arc<dyn Agent> = Arc::new(UppercasingEcho);
    let mut context = AgentContext::new(AgentId::new("Echo"));
    let mut state = AgentState::new();
    let processed = run_once(&agent, &echo_client, &mut context, &mut state, &[]).await.unwrap();
    assert!(processed);

    let reply = human
        .wait_for_response(Some(&AgentId::new("Echo")), Some(&AgentId::new("human")), None, Duration::from_secs(2))
        .await
        .expect("Echo must reply within the timeout");
    assert_eq!(reply.content.as_deref(), Some("HI"));
}

#[tokio::test]
async fn channel_broadcast_excludes_the_sender() {
    let (router, port) = bound_router().await;
    router
        .create_channel(fleet_wire::Channel::with_members(
            "news",
            [AgentId::new("A"), AgentId::new("B"), AgentId::new("C")],
        ))
        .await;

    let a = AgentClient::connect(("127.0.0.1", port), AgentId::new("A")).await.unwrap();
    let b = AgentClient::connect(("127.0.0.1", port), AgentId::new("B")).await.unwrap();
    let c = AgentClient::connect(("127.0.0.1", port), AgentId::new("C")).await.unwrap();

    a.send_message(Envelope::new(EventType::Message).with_source("A").with_channel("news").with_content("hello"))
        .await
        .unwrap();

    let on_b = b.wait_for_response(None, None, Some("news"), Duration::from_secs(2)).await;
    let on_c = c.wait_for_response(None, None, Some("news"), Duration::from_secs(2)).await;
    assert_eq!(on_b.unwrap().content.as_deref(), Some("hello"));
    assert_eq!(on_c.unwrap().content.as_deref(), Some("hello"));

    // A observes its own send in the router's log but is never handed it back as a
    // recipient.
    let log = router.log_snapshot().await;
    assert!(log.iter().any(|m| m.source.as_deref() == Some("A") && m.content.as_deref() == Some("hello")));
    let on_a = a.wait_for_response(None, None, Some("news"), Duration::from_millis(200)).await;
    assert!(on_a.is_none(), "the sender must not receive its own broadcast back");
}

#[tokio::test]
async fn centralized_team_serializes_two_back_to_back_requests() {
    let (_router, port) = bound_router().await;

    let team_id = AgentId::team("eng");
    let human = AgentClient::connect(("127.0.0.1", port), AgentId::new("human")).await.unwrap();
    let k = AgentClient::connect(("127.0.0.1", port), AgentId::new("K")).await.unwrap();
    let team_client = AgentClient::connect(("127.0.0.1", port), team_id.clone()).await.unwrap();

    let team: Arc<dyn Agent> = Arc::new(Team::new(
        team_id.clone(),
        vec![AgentId::new("K"), AgentId::new("W")],
        Box::new(CentralizedCollaboration::new(AgentId::new("K"))),
    ));
    let mut context = AgentContext::new(team_id.clone());
    let mut state = AgentState::new();

    human
        .send_message(Envelope::new(EventType::Message).with_source("human").with_destination(team_id.clone()).with_content("m1"))
        .await
        .unwrap();
    human
        .send_message(Envelope::new(EventType::Message).with_source("human").with_destination(team_id.clone()).with_content("m2"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // m1 is dispatched straight to the coordinator, rewritten to come from the team.
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());
    let to_k = k.wait_for_response(Some(&team_id), None, None, Duration::from_secs(2)).await.unwrap();
    assert_eq!(to_k.content.as_deref(), Some("m1"));

    // m2 arrives while K is still busy with m1: it is queued, not forwarded.
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());
    let queued_notice = human.wait_for_response(Some(&team_id), None, None, Duration::from_secs(2)).await.unwrap();
    assert!(queued_notice.content.as_ref().unwrap().contains("position=1"));

    // K's first reply is forwarded to human and dequeues m2 to K.
    k.send_message(Envelope::message("r1").with_source("K").with_destination(team_id.clone())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());
    let r1 = human.wait_for_response(Some(&team_id), None, None, Duration::from_secs(2)).await.unwrap();
    assert_eq!(r1.content.as_deref(), Some("r1"));
    let forwarded_m2 = k.wait_for_response(Some(&team_id), None, None, Duration::from_secs(2)).await.unwrap();
    assert_eq!(forwarded_m2.content.as_deref(), Some("m2"));

    // K's second reply completes m2; human now has both replies, source rewritten to the team.
    k.send_message(Envelope::message("r2").with_source("K").with_destination(team_id.clone())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());
    let r2 = human.wait_for_response(Some(&team_id), None, None, Duration::from_secs(2)).await.unwrap();
    assert_eq!(r2.content.as_deref(), Some("r2"));
}

#[tokio::test]
async fn majority_vote_resolves_to_the_proposal_with_more_than_half_the_votes() {
    let (_router, port) = bound_router().await;

    let team_id = AgentId::team("eng");
    let human = AgentClient::connect(("127.0.0.1", port), AgentId::new("human")).await.unwrap();
    let agent1 = AgentClient::connect(("127.0.0.1", port), AgentId::new("Agent1")).await.unwrap();
    let agent3 = AgentClient::connect(("127.0.0.1", port), AgentId::new("Agent3")).await.unwrap();
    let team_client = AgentClient::connect(("127.0.0.1", port), team_id.clone()).await.unwrap();

    let team: Arc<dyn Agent> = Arc::new(
        Team::new(
            team_id.clone(),
            vec![AgentId::new("Agent1"), AgentId::new("Agent2"), AgentId::new("Agent3")],
            Box::new(DecentralizedCollaboration::new(DecisionStrategy::MajorityVote, 3, 60)),
        )
        .with_service(Box::new(TeamVoting::new(DecisionStrategy::MajorityVote, 3))),
    );
    let mut context = AgentContext::new(team_id.clone());
    let mut state = AgentState::new();

    human
        .send_message(Envelope::new(EventType::Message).with_source("human").with_destination(team_id.clone()).with_content("decide x"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());

    // Agent1 proposes P1 (auto-voting itself in favor).
    agent1
        .send_message(
            Envelope::new(EventType::TeamService)
                .with_source("Agent1")
                .with_destination(team_id.clone())
                .with_actions(vec![Action::new("team_voting", "propose", serde_json::json!({"content": "P1"}), "t1")]),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());
    let p1_reply = agent1.wait_for_response(Some(&team_id), None, None, Duration::from_secs(2)).await.unwrap();
    let p1_id = p1_reply.observations[0].data.get("id").and_then(serde_json::Value::as_str).unwrap().to_string();

    // Agent2 proposes P2 (auto-voting itself in favor).
    let agent2 = AgentClient::connect(("127.0.0.1", port), AgentId::new("Agent2")).await.unwrap();
    agent2
        .send_message(
            Envelope::new(EventType::TeamService)
                .with_source("Agent2")
                .with_destination(team_id.clone())
                .with_actions(vec![Action::new("team_voting", "propose", serde_json::json!({"content": "P2"}), "t2")]),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());

    // Agent3 votes for P1, tipping it to 2 of 3 votes (a strict majority).
    agent3
        .send_message(
            Envelope::new(EventType::TeamService)
                .with_source("Agent3")
                .with_destination(team_id.clone())
                .with_actions(vec![Action::new(
                    "team_voting",
                    "vote",
                    serde_json::json!({"proposal_id": p1_id, "in_favor": true}),
                    "t3",
                )]),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(run_once(&team, &team_client, &mut context, &mut state, &[]).await.unwrap());

    let outbound = team.tick(&mut state).await.unwrap();
    for envelope in outbound {
        team_client.send_message(envelope).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let decision = human.wait_for_response(Some(&team_id), None, None, Duration::from_secs(2)).await.unwrap();
    assert_eq!(decision.content.as_deref(), Some("P1"));
}
