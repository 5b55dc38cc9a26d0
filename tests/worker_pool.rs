mod common;

use common::{eventually, Behavior, FakeResponder, RecordingGateway};
use oxide_shop::bot::views;
use oxide_shop::engine::{
    Phase, PoolConfig, PoolDeps, ProcessingGuard, RateLimiter, Request, SubmitError, WorkerPool,
};
use oxide_shop::error::EngineError;
use oxide_shop::gateway::{ChatId, Locale, MessageRef};
use oxide_shop::ActorId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

struct Harness {
    pool: WorkerPool,
    gateway: Arc<RecordingGateway>,
    responder: Arc<FakeResponder>,
    guard: Arc<ProcessingGuard>,
}

fn start(config: PoolConfig, behavior: Behavior, limiter: RateLimiter) -> Harness {
    let gateway = RecordingGateway::new();
    let responder = FakeResponder::new(behavior);
    let guard = Arc::new(ProcessingGuard::new());
    let pool = WorkerPool::start(
        config,
        PoolDeps {
            responder: responder.clone(),
            gateway: gateway.clone(),
            limiter: Arc::new(limiter),
            guard: Arc::clone(&guard),
            cache: None,
            suggestions: None,
        },
    );
    Harness {
        pool,
        gateway,
        responder,
        guard,
    }
}

fn config(workers: usize, queue_capacity: usize) -> PoolConfig {
    PoolConfig {
        workers,
        queue_capacity,
        call_timeout: Duration::from_secs(30),
        wait_notice_interval: Duration::ZERO,
    }
}

fn generous_limiter() -> RateLimiter {
    RateLimiter::new(100, Duration::from_secs(60))
}

fn request(actor: i64, text: &str) -> Request {
    Request::new(ActorId(actor), "tester", text, ChatId(actor), Locale::En)
}

#[tokio::test]
async fn full_queue_rejects_without_blocking() {
    let gate = Arc::new(Semaphore::new(0));
    let h = start(
        config(1, 2),
        Behavior::Gated(Arc::clone(&gate), "ok".to_string()),
        generous_limiter(),
    );

    h.pool.submit(request(1, "first")).expect("accepted");
    let responder = Arc::clone(&h.responder);
    eventually("worker picked up the first request", || responder.calls() == 1).await;

    h.pool.submit(request(2, "second")).expect("queued");
    h.pool.submit(request(3, "third")).expect("queued");
    assert_eq!(h.pool.queue_len(), 2);

    let Err(SubmitError { reason, request }) = h.pool.submit(request(4, "fourth")) else {
        panic!("queue should be full");
    };
    assert!(matches!(reason, EngineError::QueueFull));
    assert_eq!(request.actor, ActorId(4));
    assert_eq!(h.pool.stats().rejected, 1);

    gate.add_permits(10);
    let pool = &h.pool;
    eventually("queued requests completed", || pool.stats().completed == 3).await;
    assert_eq!(h.gateway.texts_to(ChatId(3)), vec!["ok".to_string()]);
    assert!(h.gateway.texts_to(ChatId(4)).is_empty());

    h.pool.shutdown().await;
}

#[tokio::test]
async fn rejected_request_releases_processing_flag() {
    let gate = Arc::new(Semaphore::new(0));
    let h = start(
        config(1, 1),
        Behavior::Gated(Arc::clone(&gate), "ok".to_string()),
        generous_limiter(),
    );

    h.pool.submit(request(1, "busy")).expect("accepted");
    let responder = Arc::clone(&h.responder);
    eventually("worker busy", || responder.calls() == 1).await;
    h.pool.submit(request(2, "queued")).expect("queued");

    let ticket = h.guard.try_acquire(ActorId(3)).expect("flag free");
    let rejected = h
        .pool
        .submit(request(3, "overflow").with_ticket(ticket))
        .expect_err("queue full");
    assert!(h.guard.is_processing(ActorId(3)));
    drop(rejected);
    assert!(!h.guard.is_processing(ActorId(3)));

    gate.add_permits(10);
    h.pool.shutdown().await;
}

#[tokio::test]
async fn panic_is_contained_and_worker_keeps_serving() {
    let h = start(
        config(1, 4),
        Behavior::PanicOn("boom".to_string(), "fine".to_string()),
        generous_limiter(),
    );
    let actor = ActorId(1);
    let waiting = MessageRef {
        chat: ChatId(1),
        message_id: 99,
    };

    let ticket = h.guard.try_acquire(actor).expect("flag free");
    assert!(h.guard.set_waiting_message(actor, waiting));
    h.pool
        .submit(request(1, "boom").with_ticket(ticket))
        .expect("accepted");

    let guard = Arc::clone(&h.guard);
    eventually("flag released after panic", || !guard.is_processing(actor)).await;
    assert_eq!(h.pool.stats().panicked, 1);
    assert!(h.gateway.deleted().contains(&waiting));
    let panic_text = views::error_text(Locale::En, &EngineError::InternalPanic(String::new()));
    assert_eq!(h.gateway.last_text_to(ChatId(1)), Some(panic_text));

    let ticket = h.guard.try_acquire(actor).expect("flag free again");
    h.pool
        .submit(request(1, "hello").with_ticket(ticket))
        .expect("accepted");
    let pool = &h.pool;
    eventually("second request completed", || pool.stats().completed == 1).await;
    assert_eq!(h.gateway.last_text_to(ChatId(1)).as_deref(), Some("fine"));

    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_responder_times_out() {
    let mut cfg = config(1, 4);
    cfg.call_timeout = Duration::from_secs(5);
    let h = start(
        cfg,
        Behavior::Slow(Duration::from_secs(60), "late".to_string()),
        generous_limiter(),
    );

    let ticket = h.guard.try_acquire(ActorId(1)).expect("flag free");
    h.pool
        .submit(request(1, "hi").with_ticket(ticket))
        .expect("accepted");

    // Run the virtual clock past the call timeout
    tokio::time::sleep(Duration::from_secs(6)).await;
    let pool = &h.pool;
    eventually("timeout recorded", || pool.stats().timed_out == 1).await;
    assert!(!h.guard.is_processing(ActorId(1)));
    let texts = h.gateway.texts_to(ChatId(1));
    assert_eq!(
        texts,
        vec![views::error_text(Locale::En, &EngineError::Timeout)]
    );

    h.pool.shutdown().await;
}

#[tokio::test]
async fn panicking_gateway_still_releases_flag() {
    let h = start(config(1, 4), Behavior::Reply("ok".to_string()), generous_limiter());
    h.gateway.panic_on_send(ChatId(1));
    let actor = ActorId(1);
    let waiting = MessageRef {
        chat: ChatId(1),
        message_id: 42,
    };

    let ticket = h.guard.try_acquire(actor).expect("flag free");
    assert!(h.guard.set_waiting_message(actor, waiting));
    h.pool
        .submit(request(1, "hi").with_ticket(ticket))
        .expect("accepted");

    let guard = Arc::clone(&h.guard);
    eventually("flag released", || !guard.is_processing(actor)).await;
    assert_eq!(h.pool.stats().panicked, 1);
    assert_eq!(h.gateway.deleted(), vec![waiting]);
    assert!(h.gateway.texts_to(ChatId(1)).is_empty());

    // The same worker serves the next actor
    let ticket = h.guard.try_acquire(ActorId(2)).expect("flag free");
    h.pool
        .submit(request(2, "hi").with_ticket(ticket))
        .expect("accepted");
    let pool = &h.pool;
    eventually("second request completed", || pool.stats().completed == 1).await;
    assert_eq!(h.gateway.texts_to(ChatId(2)), vec!["ok".to_string()]);

    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn wait_notices_escalate_until_reply() {
    let cfg = PoolConfig {
        workers: 1,
        queue_capacity: 4,
        call_timeout: Duration::from_secs(100),
        wait_notice_interval: Duration::from_secs(10),
    };
    let h = start(
        cfg,
        Behavior::Slow(Duration::from_secs(35), "done".to_string()),
        generous_limiter(),
    );
    let actor = ActorId(1);
    let waiting = MessageRef {
        chat: ChatId(1),
        message_id: 7,
    };

    let ticket = h.guard.try_acquire(actor).expect("flag free");
    assert!(h.guard.set_waiting_message(actor, waiting));
    h.pool
        .submit(request(1, "hi").with_ticket(ticket))
        .expect("accepted");

    tokio::time::sleep(Duration::from_secs(36)).await;
    let pool = &h.pool;
    eventually("reply delivered", || pool.stats().completed == 1).await;

    let expected: Vec<(MessageRef, String)> = (1..=3)
        .map(|level| (waiting, views::wait_notice(Locale::En, level)))
        .collect();
    assert_eq!(h.gateway.edits(), expected);
    assert_eq!(h.gateway.deleted(), vec![waiting]);
    assert_eq!(h.gateway.texts_to(ChatId(1)), vec!["done".to_string()]);

    // No notices after the reply
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.gateway.edits().len(), 3);

    h.pool.shutdown().await;
}

#[tokio::test]
async fn queued_flags_survive_the_stale_sweep() {
    let gate = Arc::new(Semaphore::new(0));
    let h = start(
        config(1, 4),
        Behavior::Gated(Arc::clone(&gate), "ok".to_string()),
        generous_limiter(),
    );

    let running = h.guard.try_acquire(ActorId(1)).expect("flag free");
    h.pool
        .submit(request(1, "first").with_ticket(running))
        .expect("accepted");
    let responder = Arc::clone(&h.responder);
    eventually("worker busy", || responder.calls() == 1).await;

    let queued = h.guard.try_acquire(ActorId(2)).expect("flag free");
    h.pool
        .submit(request(2, "second").with_ticket(queued))
        .expect("queued");
    assert_eq!(h.guard.phase(ActorId(2)), Some(Phase::Queued));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let swept = h.guard.sweep_stale(Duration::ZERO);
    assert_eq!(swept, vec![(ActorId(1), None)]);
    assert!(h.guard.is_processing(ActorId(2)));

    gate.add_permits(10);
    let pool = &h.pool;
    eventually("queued request served", || pool.stats().completed >= 1).await;
    assert_eq!(h.gateway.texts_to(ChatId(2)), vec!["ok".to_string()]);

    h.pool.shutdown().await;
}

#[tokio::test]
async fn cancel_aborts_in_flight_call() {
    let gate = Arc::new(Semaphore::new(0));
    let h = start(
        config(1, 4),
        Behavior::Gated(Arc::clone(&gate), "never".to_string()),
        generous_limiter(),
    );
    let actor = ActorId(1);

    let ticket = h.guard.try_acquire(actor).expect("flag free");
    h.pool
        .submit(request(1, "hi").with_ticket(ticket))
        .expect("accepted");
    let responder = Arc::clone(&h.responder);
    eventually("call in flight", || responder.calls() == 1).await;

    assert!(h.guard.cancel(actor));
    let pool = &h.pool;
    eventually("cancellation recorded", || pool.stats().canceled == 1).await;
    assert!(!h.guard.is_processing(actor));
    assert_eq!(
        h.gateway.last_text_to(ChatId(1)),
        Some(views::error_text(Locale::En, &EngineError::Canceled))
    );

    h.pool.shutdown().await;
}

#[tokio::test]
async fn rate_limited_requests_never_reach_responder() {
    let h = start(
        config(1, 4),
        Behavior::Reply("ok".to_string()),
        RateLimiter::new(1, Duration::from_secs(60)),
    );

    h.pool.submit(request(1, "one")).expect("accepted");
    h.pool.submit(request(1, "two")).expect("accepted");

    let pool = &h.pool;
    eventually("both requests finished", || {
        let stats = pool.stats();
        stats.completed + stats.rate_limited == 2
    })
    .await;
    let stats = h.pool.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(h.responder.calls(), 1);
    assert_eq!(
        h.gateway.last_text_to(ChatId(1)),
        Some(views::error_text(Locale::En, &EngineError::RateLimited))
    );

    h.pool.shutdown().await;
}

#[tokio::test]
async fn upstream_failure_is_reported() {
    let h = start(config(2, 4), Behavior::Fail, generous_limiter());

    h.pool.submit(request(1, "hi")).expect("accepted");
    let pool = &h.pool;
    eventually("failure recorded", || pool.stats().failed == 1).await;
    let text = h.gateway.last_text_to(ChatId(1)).expect("error notice");
    assert!(!text.contains("upstream 500"));

    h.pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_queue_then_rejects() {
    let h = start(config(2, 8), Behavior::Reply("ok".to_string()), generous_limiter());
    for actor in 1..=5 {
        h.pool.submit(request(actor, "hi")).expect("accepted");
    }

    h.pool.shutdown().await;
    assert_eq!(h.pool.stats().completed, 5);

    let Err(SubmitError { reason, .. }) = h.pool.submit(request(9, "late")) else {
        panic!("pool is closed");
    };
    assert!(matches!(reason, EngineError::ShuttingDown));
}

#[tokio::test]
async fn grace_period_cancels_stuck_calls() {
    let gate = Arc::new(Semaphore::new(0));
    let h = start(
        config(1, 4),
        Behavior::Gated(Arc::clone(&gate), "never".to_string()),
        generous_limiter(),
    );

    h.pool.submit(request(1, "stuck")).expect("accepted");
    h.pool.submit(request(2, "queued")).expect("accepted");
    let responder = Arc::clone(&h.responder);
    eventually("call in flight", || responder.calls() == 1).await;

    h.pool.shutdown_with_grace(Duration::from_millis(50)).await;
    assert_eq!(h.pool.stats().canceled, 2);
    assert_eq!(h.responder.calls(), 1);
}
