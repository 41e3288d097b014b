use async_trait::async_trait;
use quickpoll::db::{EntityKey, MemoryPollStore, NewPoll, Poll, PollOption, PollStore};
use quickpoll::error::{PollError, StoreError};
use quickpoll::live::ChangeNotification;
use quickpoll::service::{MAX_TEXT_LEN, NotificationPayload, PollService, ServiceOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn options() -> ServiceOptions {
    ServiceOptions {
        send_timeout: Duration::from_millis(500),
        subscriber_buffer: 1024,
        payload: NotificationPayload::Counter,
    }
}

fn service() -> PollService {
    PollService::new(Arc::new(MemoryPollStore::new()), options())
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn drain(rx: &mut mpsc::Receiver<Arc<ChangeNotification>>) -> Vec<ChangeNotification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push((*notification).clone());
    }
    out
}

/// Memory store whose writes, or reads following a write, can be switched to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryPollStore,
    fail_writes: AtomicBool,
    fail_reads_after_increment: AtomicBool,
    reads_failing: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("write rejected".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.reads_failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("read rejected".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PollStore for FlakyStore {
    async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, StoreError> {
        self.check()?;
        self.inner.create_poll(new_poll).await
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        self.check_read()?;
        self.inner.get_poll(poll_id).await
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        self.inner.list_polls().await
    }

    async fn get_option(&self, option_id: Uuid) -> Result<Option<PollOption>, StoreError> {
        self.inner.get_option(option_id).await
    }

    async fn counter_value(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        self.inner.counter_value(entity).await
    }

    async fn increment(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        self.check()?;
        let value = self.inner.increment(entity).await?;
        if self.fail_reads_after_increment.load(Ordering::SeqCst) {
            self.reads_failing.store(true, Ordering::SeqCst);
        }
        Ok(value)
    }
}

/// Memory store that lingers after every committed write before returning.
struct SlowStore {
    inner: MemoryPollStore,
    linger: Duration,
}

impl SlowStore {
    fn new(linger: Duration) -> Self {
        Self {
            inner: MemoryPollStore::new(),
            linger,
        }
    }
}

#[async_trait]
impl PollStore for SlowStore {
    async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, StoreError> {
        let poll = self.inner.create_poll(new_poll).await?;
        tokio::time::sleep(self.linger).await;
        Ok(poll)
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        self.inner.get_poll(poll_id).await
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        self.inner.list_polls().await
    }

    async fn get_option(&self, option_id: Uuid) -> Result<Option<PollOption>, StoreError> {
        self.inner.get_option(option_id).await
    }

    async fn counter_value(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        self.inner.counter_value(entity).await
    }

    async fn increment(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        let value = self.inner.increment(entity).await?;
        tokio::time::sleep(self.linger).await;
        Ok(value)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lunch_scenario() {
    let service = service();
    let poll = service
        .create_poll("Lunch?", texts(&["Pizza", "Salad"]))
        .await
        .unwrap();
    assert!(poll.options.iter().all(|o| o.votes == 0));
    assert_eq!(poll.likes, 0);

    let (_, mut rx) = service.subscribe();
    let pizza = poll.options[0].id;

    let (a, b) = tokio::join!(service.vote(poll.id, pizza), service.vote(poll.id, pizza));
    a.unwrap();
    b.unwrap();
    let liked = service.like(poll.id).await.unwrap();
    assert_eq!(liked.likes, 1);

    let current = service.get_poll(poll.id).await.unwrap();
    assert_eq!(current.option(pizza).unwrap().votes, 2);
    assert_eq!(current.options[1].votes, 0);

    let received = drain(&mut rx);
    assert_eq!(received.len(), 3);

    let votes: Vec<i64> = received
        .iter()
        .filter(|n| matches!(n, ChangeNotification::VoteUpdated { .. }))
        .filter_map(ChangeNotification::counter)
        .collect();
    assert_eq!(votes, [1, 2]);
    assert!(received.iter().any(|n| matches!(
        n,
        ChangeNotification::LikeUpdated { likes: 1, .. }
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_votes_are_never_lost() {
    let service = service();
    let poll = service
        .create_poll("Tabs or spaces", texts(&["Tabs", "Spaces"]))
        .await
        .unwrap();
    let poll_id = poll.id;
    let option_id = poll.options[1].id;

    let handles: Vec<_> = (0..200)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.vote(poll_id, option_id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let poll = service.get_poll(poll_id).await.unwrap();
    assert_eq!(poll.option(option_id).unwrap().votes, 200);
    assert_eq!(poll.options[0].votes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn notifications_never_go_backwards_per_entity() {
    let service = service();
    let poll = service
        .create_poll("Coffee", texts(&["Espresso", "Filter"]))
        .await
        .unwrap();
    let poll_id = poll.id;
    let (_, mut rx) = service.subscribe();

    let mut handles = Vec::new();
    for i in 0..150 {
        let service = service.clone();
        let option_id = poll.options[i % 2].id;
        handles.push(tokio::spawn(async move {
            if i % 3 == 0 {
                service.like(poll_id).await
            } else {
                service.vote(poll_id, option_id).await
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut last: HashMap<EntityKey, i64> = HashMap::new();
    let received = drain(&mut rx);
    assert_eq!(received.len(), 150);
    for notification in received {
        let value = notification.counter().unwrap();
        let previous = last.insert(notification.entity(), value).unwrap_or(0);
        assert_eq!(value, previous + 1, "{} went from {previous} to {value}", notification.entity());
    }
}

#[tokio::test]
async fn vote_with_option_from_another_poll_is_rejected() {
    let service = service();
    let lunch = service.create_poll("Lunch?", texts(&["Pizza"])).await.unwrap();
    let dinner = service.create_poll("Dinner?", texts(&["Soup"])).await.unwrap();
    let (_, mut rx) = service.subscribe();

    let err = service
        .vote(lunch.id, dinner.options[0].id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(service.get_poll(lunch.id).await.unwrap(), lunch);
    assert_eq!(service.get_poll(dinner.id).await.unwrap(), dinner);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn vote_for_unknown_option_produces_no_notification() {
    let service = service();
    let poll = service.create_poll("Lunch?", texts(&["Pizza"])).await.unwrap();
    let (_, mut rx) = service.subscribe();

    let err = service.vote(poll.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, PollError::OptionNotFound));

    let err = service.vote(Uuid::new_v4(), poll.options[0].id).await.unwrap_err();
    assert!(matches!(err, PollError::PollNotFound));

    let err = service.like(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, PollError::PollNotFound));

    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn invalid_polls_are_never_created() {
    let service = service();
    let (_, mut rx) = service.subscribe();

    let err = service.create_poll("Lunch?", Vec::new()).await.unwrap_err();
    assert!(matches!(err, PollError::Validation(_)));

    let err = service.create_poll("   ", texts(&["Pizza"])).await.unwrap_err();
    assert!(matches!(err, PollError::Validation(_)));

    let err = service.create_poll("Lunch?", texts(&["Pizza", ""])).await.unwrap_err();
    assert!(matches!(err, PollError::Validation(_)));

    assert!(service.list_polls().await.unwrap().is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn created_poll_is_broadcast_and_listed() {
    let service = service();
    let (_, mut rx) = service.subscribe();

    let poll = service
        .create_poll("Lunch?", texts(&["Pizza", "Salad"]))
        .await
        .unwrap();

    assert_eq!(drain(&mut rx), [ChangeNotification::PollCreated { poll: poll.clone() }]);
    assert_eq!(service.list_polls().await.unwrap(), [poll]);
}

#[tokio::test]
async fn unsubscribed_and_dropped_subscribers_stop_receiving() {
    let service = service();
    let poll = service.create_poll("Lunch?", texts(&["Pizza"])).await.unwrap();

    let (leaving, mut rx_leaving) = service.subscribe();
    let (dropped, rx_dropped) = service.subscribe();
    let (_, mut rx_staying) = service.subscribe();

    service.like(poll.id).await.unwrap();
    assert_eq!(drain(&mut rx_leaving).len(), 1);

    service.unsubscribe(leaving);
    drop(rx_dropped);
    service.like(poll.id).await.unwrap();

    assert!(drain(&mut rx_leaving).is_empty());
    assert!(!service.registry().contains(dropped));
    assert_eq!(service.registry().len(), 1);

    let likes: Vec<_> = drain(&mut rx_staying)
        .iter()
        .filter_map(ChangeNotification::counter)
        .collect();
    assert_eq!(likes, [1, 2]);
}

#[tokio::test]
async fn store_failure_aborts_without_notifying() {
    let store = Arc::new(FlakyStore::default());
    let service = PollService::new(store.clone(), options());
    let poll = service.create_poll("Lunch?", texts(&["Pizza"])).await.unwrap();
    let pizza = poll.options[0].id;
    let (_, mut rx) = service.subscribe();

    store.fail_writes.store(true, Ordering::SeqCst);

    let err = service.vote(poll.id, pizza).await.unwrap_err();
    assert!(matches!(err, PollError::StoreFailure(_)));
    let err = service.like(poll.id).await.unwrap_err();
    assert!(matches!(err, PollError::StoreFailure(_)));
    let err = service.create_poll("Dinner?", texts(&["Soup"])).await.unwrap_err();
    assert!(matches!(err, PollError::StoreFailure(_)));

    assert!(drain(&mut rx).is_empty());
    assert_eq!(service.get_poll(poll.id).await.unwrap(), poll);
    assert_eq!(service.list_polls().await.unwrap().len(), 1);

    store.fail_writes.store(false, Ordering::SeqCst);
    let poll = service.vote(poll.id, pizza).await.unwrap();
    assert_eq!(poll.option(pizza).unwrap().votes, 1);
}

#[tokio::test]
async fn poll_payload_embeds_the_parent_poll() {
    let service = PollService::new(
        Arc::new(MemoryPollStore::new()),
        ServiceOptions {
            payload: NotificationPayload::Poll,
            ..options()
        },
    );
    let poll = service.create_poll("Lunch?", texts(&["Pizza"])).await.unwrap();
    let pizza = poll.options[0].id;
    let (_, mut rx) = service.subscribe();

    service.vote(poll.id, pizza).await.unwrap();

    match drain(&mut rx).as_slice() {
        [ChangeNotification::VoteUpdated { votes, poll: Some(embedded), .. }] => {
            assert_eq!(*votes, 1);
            assert_eq!(embedded.option(pizza).unwrap().votes, 1);
        }
        other => panic!("unexpected notifications: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn poll_created_precedes_changes_to_the_new_poll() {
    let service = PollService::new(Arc::new(SlowStore::new(Duration::from_millis(200))), options());
    let (_, mut rx) = service.subscribe();

    // Reacts to the poll as soon as it is visible, while creation is still finishing.
    let eager = {
        let service = service.clone();
        tokio::spawn(async move {
            loop {
                if let Some(poll) = service.list_polls().await.unwrap().into_iter().next() {
                    service.like(poll.id).await.unwrap();
                    service.vote(poll.id, poll.options[0].id).await.unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let poll = service.create_poll("Lunch?", texts(&["Pizza"])).await.unwrap();
    eager.await.unwrap();

    let received = drain(&mut rx);
    assert_eq!(received.len(), 3, "{received:?}");
    assert_eq!(received[0], ChangeNotification::PollCreated { poll: poll.clone() });
    assert_eq!(poll.likes, 0);
    assert!(matches!(received[1], ChangeNotification::LikeUpdated { likes: 1, .. }));
    assert!(matches!(received[2], ChangeNotification::VoteUpdated { votes: 1, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_vote_is_still_announced() {
    let service = PollService::new(Arc::new(SlowStore::new(Duration::from_millis(100))), options());
    let poll = service.create_poll("Lunch?", texts(&["Pizza"])).await.unwrap();
    let pizza = poll.options[0].id;
    let (_, mut rx) = service.subscribe();

    let abandoned = tokio::time::timeout(Duration::from_millis(30), service.vote(poll.id, pizza)).await;
    assert!(abandoned.is_err());

    let notification = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        *notification,
        ChangeNotification::VoteUpdated {
            poll_id: poll.id,
            option_id: pizza,
            votes: 1,
            poll: None,
        }
    );

    let poll = service.vote(poll.id, pizza).await.unwrap();
    assert_eq!(poll.option(pizza).unwrap().votes, 2);
}

#[tokio::test]
async fn overlong_texts_are_rejected() {
    let service = service();
    let (_, mut rx) = service.subscribe();
    let too_long = "x".repeat(MAX_TEXT_LEN + 1);

    let err = service.create_poll(&too_long, texts(&["Pizza"])).await.unwrap_err();
    assert!(matches!(err, PollError::Validation(_)));

    let err = service
        .create_poll("Lunch?", vec!["Pizza".to_string(), too_long.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Validation(_)));
    assert!(drain(&mut rx).is_empty());

    // The limit counts characters, not bytes.
    let longest = "é".repeat(MAX_TEXT_LEN);
    let poll = service.create_poll(&longest, vec![longest.clone()]).await.unwrap();
    assert_eq!(poll.title, longest);
    assert_eq!(poll.options[0].option_text, longest);
}

#[tokio::test]
async fn committed_counters_are_reported_without_reading_back() {
    let store = Arc::new(FlakyStore::default());
    let service = PollService::new(store.clone(), options());
    let poll = service
        .create_poll("Lunch?", texts(&["Pizza", "Salad"]))
        .await
        .unwrap();
    let pizza = poll.options[0].id;
    let (_, mut rx) = service.subscribe();

    store.fail_reads_after_increment.store(true, Ordering::SeqCst);

    let voted = service.vote(poll.id, pizza).await.unwrap();
    assert_eq!(voted.option(pizza).unwrap().votes, 1);
    assert_eq!(voted.total_votes(), 1);
    assert!(matches!(
        service.get_poll(poll.id).await,
        Err(PollError::StoreFailure(_))
    ));

    store.reads_failing.store(false, Ordering::SeqCst);
    let liked = service.like(poll.id).await.unwrap();
    assert_eq!(liked.likes, 1);
    assert_eq!(liked.option(pizza).unwrap().votes, 1);

    let received = drain(&mut rx);
    assert_eq!(received.len(), 2);
    assert_eq!(
        received[0],
        ChangeNotification::VoteUpdated {
            poll_id: poll.id,
            option_id: pizza,
            votes: 1,
            poll: None,
        }
    );
    assert!(matches!(received[1], ChangeNotification::LikeUpdated { likes: 1, .. }));
}
