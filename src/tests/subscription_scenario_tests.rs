//! Subscription Scenarios against the simulated ledger
//!
//! - contract events narrowed by an EventFilter
//! - server close completes, server fault errors, both exactly once
//! - unsubscribe silences an active subscription

#[cfg(test)]
mod subscription_scenario_tests {
    use super::super::test_helpers::test_helpers::*;
    use crate::endpoint::EventFilter;
    use crate::errors::ClientError;
    use crate::subscription::{ChannelObserver, Notification, SubscriptionState};
    use crate::test_utils::SimulatedLedger;
    use crate::types::Event;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn wait_for_streams(ledger: &SimulatedLedger, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while ledger.open_streams() != count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("stream count never settled");
    }

    async fn next<T>(receiver: &mut UnboundedReceiver<Notification<T>>) -> Option<Notification<T>> {
        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("notification timed out")
    }

    #[tokio::test]
    async fn test_event_filter_narrows_stream() {
        let ledger = Arc::new(SimulatedLedger::new());
        let client = new_client(&ledger, fast_policy(3));
        let contract = address(50);
        let filter = EventFilter::builder(contract.clone())
            .event_name("set")
            .arg("key")
            .build()
            .unwrap();

        let (observer, mut notifications) = ChannelObserver::<Event>::new();
        let subscription = client.block().subscribe_events(filter, observer);
        wait_for_streams(&ledger, 1).await;

        ledger.emit_event(&contract, "get", vec!["key".into()]);
        ledger.emit_event(&address(51), "set", vec!["key".into()]);
        ledger.emit_event(&contract, "set", vec!["other".into()]);
        let wanted =
            ledger.emit_event(&contract, "set", vec!["key".into(), 333.into(), "test2".into()]);
        ledger.close_streams();

        assert_eq!(next(&mut notifications).await, Some(Notification::Next(wanted)));
        assert_eq!(next(&mut notifications).await, Some(Notification::Completed));
        assert_eq!(next(&mut notifications).await, None);
        assert_eq!(subscription.state(), SubscriptionState::Completed);
    }

    #[tokio::test]
    async fn test_server_fault_errors_once() {
        let ledger = Arc::new(SimulatedLedger::new());
        let client = new_client(&ledger, fast_policy(3));
        let (observer, mut notifications) = ChannelObserver::new();
        let subscription = client.block().subscribe_new_block_metadata(observer);
        wait_for_streams(&ledger, 1).await;

        let sealed = ledger.seal_block();
        ledger.fail_streams(ClientError::Subscription("node restarted".to_string()));

        match next(&mut notifications).await {
            Some(Notification::Next(metadata)) => assert_eq!(metadata.height, sealed.height),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            next(&mut notifications).await,
            Some(Notification::Error(ClientError::Subscription("node restarted".to_string())))
        );
        assert_eq!(next(&mut notifications).await, None);
        assert_eq!(subscription.state(), SubscriptionState::Errored);
        assert!(!subscription.unsubscribe());
    }

    #[tokio::test]
    async fn test_unsubscribe_silences_and_releases_stream() {
        let ledger = Arc::new(SimulatedLedger::new());
        let client = new_client(&ledger, fast_policy(3));
        let (observer, mut notifications) = ChannelObserver::new();
        let subscription = client.block().subscribe_new_blocks(observer);
        wait_for_streams(&ledger, 1).await;

        ledger.seal_block();
        assert!(matches!(next(&mut notifications).await, Some(Notification::Next(_))));

        assert!(subscription.unsubscribe());
        ledger.seal_block();
        assert_eq!(next(&mut notifications).await, None);
        wait_for_streams(&ledger, 0).await;
    }

    #[tokio::test]
    async fn test_many_subscribers_share_one_ledger() {
        let ledger = Arc::new(SimulatedLedger::new());
        let client = new_client(&ledger, fast_policy(3));
        let mut receivers = Vec::new();
        let mut subscriptions = Vec::new();
        for _ in 0..5 {
            let (observer, receiver) = ChannelObserver::new();
            subscriptions.push(client.block().subscribe_new_blocks(observer));
            receivers.push(receiver);
        }
        wait_for_streams(&ledger, 5).await;

        let sealed = ledger.seal_block();
        for receiver in receivers.iter_mut() {
            assert_eq!(next(receiver).await, Some(Notification::Next(sealed.clone())));
        }
        let ids: std::collections::HashSet<u64> = subscriptions.iter().map(|s| s.id()).collect();
        assert_eq!(ids.len(), 5);
    }
}
