//! Tests for the status broadcasters: per-subscriber FIFO delivery,
//! prefix-only delivery for laggards, and registry cleanup.

use workq::broadcast::Broadcaster;

#[tokio::test]
async fn test_events_arrive_in_publish_order() {
    let caster: Broadcaster<u32> = Broadcaster::new("test", 8);
    let mut sub = caster.join();

    for n in 0..5 {
        caster.publish(&n);
    }
    for n in 0..5 {
        assert_eq!(sub.recv().await, Some(n));
    }
    assert!(sub.try_recv().is_none());
    assert!(!sub.lagged());
}

#[tokio::test]
async fn test_subscriber_only_sees_events_after_joining() {
    let caster: Broadcaster<u32> = Broadcaster::new("test", 8);
    caster.publish(&1);

    let mut sub = caster.join();
    caster.publish(&2);
    assert_eq!(sub.recv().await, Some(2));
}

#[tokio::test]
async fn test_laggard_gets_a_prefix_then_nothing() {
    let caster: Broadcaster<u32> = Broadcaster::new("test", 4);
    let mut sub = caster.join();

    // the 5th publish finds the buffer full: the new event is dropped and
    // the subscriber is unsubscribed as lagging
    for n in 0..10 {
        caster.publish(&n);
    }
    assert_eq!(caster.subscriber_count(), 0);

    for n in 0..4 {
        assert_eq!(sub.recv().await, Some(n));
    }
    assert_eq!(sub.recv().await, None);
    assert!(sub.lagged());
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_fast_one() {
    let caster: Broadcaster<u32> = Broadcaster::new("test", 4);
    let mut fast = caster.join();
    let mut slow = caster.join();

    for n in 0..4 {
        caster.publish(&n);
        assert_eq!(fast.recv().await, Some(n));
    }
    // fast keeps up; slow's buffer is now full and the next publish drops it
    for n in 4..8 {
        caster.publish(&n);
        assert_eq!(fast.recv().await, Some(n));
    }
    assert_eq!(caster.subscriber_count(), 1);
    assert!(!fast.lagged());

    for n in 0..4 {
        assert_eq!(slow.recv().await, Some(n));
    }
    assert_eq!(slow.recv().await, None);
    assert!(slow.lagged());
}

#[tokio::test]
async fn test_publish_without_subscribers_is_fine() {
    let caster: Broadcaster<String> = Broadcaster::new("test", 4);
    caster.publish(&"nobody listening".to_string());
    assert_eq!(caster.subscriber_count(), 0);
}

#[tokio::test]
async fn test_closed_subscribers_are_reaped_on_publish() {
    let caster: Broadcaster<u32> = Broadcaster::new("test", 4);
    let sub = caster.join();
    assert_eq!(caster.subscriber_count(), 1);

    sub.close();
    caster.publish(&1);
    assert_eq!(caster.subscriber_count(), 0);
}
