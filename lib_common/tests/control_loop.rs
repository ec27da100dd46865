mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, mention, texts_in, FeedTransport, RecordingSink, ScriptedChat};
use lib_common::core::commands::{ONLINE_BANNER, RESTART_NOTICE, STREAM_DOWN_NOTICE};
use lib_common::core::{
    ChatFrame, ControlLoop, ControlSettings, Relay, RelaySettings, SessionState, StreamItem, TransportError,
};
use tokio_util::sync::CancellationToken;

const HOME: &str = "home";
const RELAY_CHANNEL: &str = "tweets";

fn settings() -> ControlSettings {
    ControlSettings {
        home_channel: HOME.to_string(),
        bot_id: None,
        poll_interval: Duration::from_millis(20),
        restart_delay: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn commands_from_mentions_are_answered_in_their_channel() {
    let transport = Arc::new(FeedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let (relay, faults) = Relay::new(
        transport.clone(),
        sink.clone(),
        RelaySettings {
            relay_channel: RELAY_CHANNEL.to_string(),
            join_timeout: Duration::from_secs(1),
        },
    );
    let (chat, feed) = ScriptedChat::new();
    let posts = chat.posts.clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(ControlLoop::new(chat, relay.clone(), faults, settings(), shutdown.clone()).run());

    feed.send(Ok(vec![
        mention("C1", "time"),
        ChatFrame {
            kind: "message".to_string(),
            channel: Some("C1".to_string()),
            user: Some("UHUMAN".to_string()),
            text: Some("just chatting about python".to_string()),
        },
        mention("C2", "add python"),
        mention("C2", "channels"),
    ]))
    .unwrap();

    let watched = posts.clone();
    eventually("replies to every mention", || {
        let watched = watched.clone();
        async move { texts_in(&watched, "C2").len() == 2 }
    })
    .await;

    assert_eq!(texts_in(&posts, HOME), vec![ONLINE_BANNER]);
    assert_eq!(
        texts_in(&posts, "C1"),
        vec!["IT'S PEANUT BUTTER JELLY TIME!! \n(help for more options)"]
    );
    assert_eq!(
        texts_in(&posts, "C2"),
        vec!["Added subscriptions: ['python']", "available channels: ['general', 'random']"]
    );
    assert_eq!(relay.subscriptions().await, vec!["python"]);

    transport.push_item(StreamItem::original("1", "python is fun"));
    let relayed = sink.clone();
    eventually("the relayed item", || {
        let relayed = relayed.clone();
        async move { !texts_in(&relayed.posts, RELAY_CHANNEL).is_empty() }
    })
    .await;

    shutdown.cancel();
    let restarts = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("control loop did not stop")
        .unwrap();
    assert_eq!(restarts, 0);
    assert_eq!(relay.session_state().await, SessionState::Idle);
    assert_eq!(transport.open_now(), 0);
}

#[tokio::test]
async fn chat_failure_restarts_and_resumes_the_stream() {
    let transport = Arc::new(FeedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let (relay, faults) = Relay::new(
        transport.clone(),
        sink.clone(),
        RelaySettings {
            relay_channel: RELAY_CHANNEL.to_string(),
            join_timeout: Duration::from_secs(1),
        },
    );
    let (chat, feed) = ScriptedChat::new();
    let posts = chat.posts.clone();
    let connects = chat.connects.clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(ControlLoop::new(chat, relay.clone(), faults, settings(), shutdown.clone()).run());

    feed.send(Ok(vec![mention("C1", "add python")])).unwrap();
    let watched = posts.clone();
    eventually("the add reply", || {
        let watched = watched.clone();
        async move { !texts_in(&watched, "C1").is_empty() }
    })
    .await;

    feed.send(Err(TransportError::Disconnected("socket reset".to_string())))
        .unwrap();
    let watched = posts.clone();
    eventually("the second online banner", || {
        let watched = watched.clone();
        async move { texts_in(&watched, HOME).len() == 3 }
    })
    .await;

    assert_eq!(texts_in(&posts, HOME), vec![ONLINE_BANNER, RESTART_NOTICE, ONLINE_BANNER]);
    assert_eq!(connects.load(Ordering::SeqCst), 2);

    let observed = relay.clone();
    eventually("the resumed stream", || {
        let observed = observed.clone();
        async move { observed.session_state().await == SessionState::Running }
    })
    .await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(transport.max_open(), 1);
    assert_eq!(relay.subscriptions().await, vec!["python"]);

    shutdown.cancel();
    let restarts = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("control loop did not stop")
        .unwrap();
    assert_eq!(restarts, 1);
}

#[tokio::test]
async fn stream_failure_is_supervised_like_a_chat_failure() {
    let transport = Arc::new(FeedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let (relay, faults) = Relay::new(
        transport.clone(),
        sink,
        RelaySettings {
            relay_channel: RELAY_CHANNEL.to_string(),
            join_timeout: Duration::from_secs(1),
        },
    );
    let (chat, feed) = ScriptedChat::new();
    let posts = chat.posts.clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(ControlLoop::new(chat, relay.clone(), faults, settings(), shutdown.clone()).run());

    feed.send(Ok(vec![mention("C1", "add python")])).unwrap();
    let observed = relay.clone();
    eventually("a running stream", || {
        let observed = observed.clone();
        async move { observed.session_state().await == SessionState::Running }
    })
    .await;

    transport.hang_up();
    let watched = posts.clone();
    eventually("the restart notice", || {
        let watched = watched.clone();
        async move { texts_in(&watched, HOME).contains(&RESTART_NOTICE.to_string()) }
    })
    .await;
    eventually("the reopened stream", || {
        let transport = transport.clone();
        async move { transport.opens() == 2 && transport.open_now() == 1 }
    })
    .await;

    shutdown.cancel();
    let restarts = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("control loop did not stop")
        .unwrap();
    assert_eq!(restarts, 1);
    assert_eq!(transport.open_now(), 0);
}

#[tokio::test]
async fn failed_stream_open_keeps_answering_commands_and_retries() {
    let transport = Arc::new(FeedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let (relay, faults) = Relay::new(
        transport.clone(),
        sink,
        RelaySettings {
            relay_channel: RELAY_CHANNEL.to_string(),
            join_timeout: Duration::from_secs(1),
        },
    );
    let (chat, feed) = ScriptedChat::new();
    let posts = chat.posts.clone();
    let connects = chat.connects.clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(ControlLoop::new(chat, relay.clone(), faults, settings(), shutdown.clone()).run());

    transport.fail_open.store(true, Ordering::SeqCst);
    feed.send(Ok(vec![mention("C1", "add python")])).unwrap();
    let watched = posts.clone();
    eventually("the stream-down reply", || {
        let watched = watched.clone();
        async move { !texts_in(&watched, "C1").is_empty() }
    })
    .await;
    assert!(texts_in(&posts, "C1")[0].starts_with(STREAM_DOWN_NOTICE));
    assert_eq!(relay.subscriptions().await, vec!["python"]);

    // Several retry periods pass while the open keeps failing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed.send(Ok(vec![mention("C1", "removeall")])).unwrap();
    let watched = posts.clone();
    eventually("the removeall reply", || {
        let watched = watched.clone();
        async move { texts_in(&watched, "C1").contains(&"all subscriptions removed!".to_string()) }
    })
    .await;
    assert!(relay.subscriptions().await.is_empty());

    transport.fail_open.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.opens(), 0);

    feed.send(Ok(vec![mention("C1", "add rust")])).unwrap();
    let observed = relay.clone();
    eventually("a running stream", || {
        let observed = observed.clone();
        async move { observed.session_state().await == SessionState::Running }
    })
    .await;
    assert_eq!(transport.filters(), vec![vec!["rust".to_string()]]);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(!texts_in(&posts, HOME).contains(&RESTART_NOTICE.to_string()));

    shutdown.cancel();
    let restarts = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("control loop did not stop")
        .unwrap();
    assert_eq!(restarts, 0);
}

#[tokio::test]
async fn resume_failure_after_restart_is_retried_inside_the_session() {
    let transport = Arc::new(FeedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let (relay, faults) = Relay::new(
        transport.clone(),
        sink,
        RelaySettings {
            relay_channel: RELAY_CHANNEL.to_string(),
            join_timeout: Duration::from_secs(1),
        },
    );
    let (chat, feed) = ScriptedChat::new();
    let posts = chat.posts.clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(ControlLoop::new(chat, relay.clone(), faults, settings(), shutdown.clone()).run());

    feed.send(Ok(vec![mention("C1", "add python")])).unwrap();
    let observed = relay.clone();
    eventually("a running stream", || {
        let observed = observed.clone();
        async move { observed.session_state().await == SessionState::Running }
    })
    .await;

    transport.fail_open.store(true, Ordering::SeqCst);
    feed.send(Err(TransportError::Disconnected("socket reset".to_string())))
        .unwrap();
    let watched = posts.clone();
    eventually("the stream-down notice", || {
        let watched = watched.clone();
        async move {
            texts_in(&watched, HOME)
                .iter()
                .any(|text| text.starts_with(STREAM_DOWN_NOTICE))
        }
    })
    .await;

    feed.send(Ok(vec![mention("C1", "list")])).unwrap();
    let watched = posts.clone();
    eventually("the list reply", || {
        let watched = watched.clone();
        async move { texts_in(&watched, "C1").len() == 2 }
    })
    .await;

    transport.fail_open.store(false, Ordering::SeqCst);
    let observed = relay.clone();
    eventually("the resumed stream", || {
        let observed = observed.clone();
        async move { observed.session_state().await == SessionState::Running }
    })
    .await;
    assert_eq!(transport.opens(), 2);

    shutdown.cancel();
    let restarts = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("control loop did not stop")
        .unwrap();
    assert_eq!(restarts, 1);
}

#[tokio::test]
async fn burst_of_failed_posts_restarts_once() {
    let transport = Arc::new(FeedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let (relay, faults) = Relay::new(
        transport.clone(),
        sink.clone(),
        RelaySettings {
            relay_channel: RELAY_CHANNEL.to_string(),
            join_timeout: Duration::from_secs(1),
        },
    );
    let (chat, feed) = ScriptedChat::new();
    let posts = chat.posts.clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(ControlLoop::new(chat, relay.clone(), faults, settings(), shutdown.clone()).run());

    feed.send(Ok(vec![mention("C1", "add python")])).unwrap();
    let observed = relay.clone();
    eventually("a running stream", || {
        let observed = observed.clone();
        async move { observed.session_state().await == SessionState::Running }
    })
    .await;

    sink.fail.store(true, Ordering::SeqCst);
    for id in ["1", "2", "3"] {
        transport.push_item(StreamItem::original(id, "python again"));
    }
    let watched = posts.clone();
    eventually("the restart notice", || {
        let watched = watched.clone();
        async move { texts_in(&watched, HOME).contains(&RESTART_NOTICE.to_string()) }
    })
    .await;
    sink.fail.store(false, Ordering::SeqCst);

    let watched = posts.clone();
    eventually("the second online banner", || {
        let watched = watched.clone();
        async move { texts_in(&watched, HOME).len() == 3 }
    })
    .await;
    let observed = relay.clone();
    eventually("the resumed stream", || {
        let observed = observed.clone();
        async move { observed.session_state().await == SessionState::Running }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(texts_in(&posts, HOME), vec![ONLINE_BANNER, RESTART_NOTICE, ONLINE_BANNER]);
    assert_eq!(transport.opens(), 2);

    shutdown.cancel();
    let restarts = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("control loop did not stop")
        .unwrap();
    assert_eq!(restarts, 1);
}
