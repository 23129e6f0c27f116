use application::{ChatController, ChatEvent, SEND_FAILURE_MESSAGE, WELCOME_MESSAGE};
use domain::models::ChatMessage;
use std::sync::Arc;
use std::time::Duration;
use tests::{source, FakeChatApi, FakePush};

type Controller = ChatController<FakeChatApi, FakePush>;

fn controller(api: FakeChatApi) -> (Controller, Arc<FakeChatApi>, Arc<FakePush>) {
    let api = Arc::new(api);
    let push = Arc::new(FakePush::new());
    let controller = ChatController::new(Arc::clone(&api), Arc::clone(&push));
    (controller, api, push)
}

async fn settle(controller: &mut Controller) {
    while controller.has_pending_work() {
        let event = tokio::time::timeout(Duration::from_secs(5), controller.next_event())
            .await
            .expect("event within timeout")
            .expect("pending work yields an event");
        controller.handle_event(event);
    }
}

async fn send(controller: &mut Controller, text: &str) -> bool {
    controller.set_input(text);
    let accepted = controller.send_message();
    settle(controller).await;
    accepted
}

mod initialization {
    use super::*;

    #[tokio::test]
    async fn seeds_welcome_and_requests_session() {
        let (mut controller, api, push) = controller(FakeChatApi::new());

        assert_eq!(controller.messages().len(), 1);
        assert_eq!(controller.messages()[0].content, WELCOME_MESSAGE);
        assert!(!controller.messages()[0].is_user);
        assert_eq!(push.subscribers(), 1);
        assert!(controller.session_id().is_empty());

        settle(&mut controller).await;

        assert_eq!(api.session_calls(), 1);
        assert_eq!(controller.session_id(), "session-1");
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn session_failure_is_not_fatal() {
        let (mut controller, _api, _push) = controller(FakeChatApi::new().fail_session("backend down"));

        settle(&mut controller).await;

        assert!(controller.session_id().is_empty());
        assert_eq!(controller.messages().len(), 1);

        assert!(send(&mut controller, "still works?").await);
        assert_eq!(controller.messages().len(), 3);
    }
}

mod sending {
    use super::*;

    #[tokio::test]
    async fn successful_reply_is_appended_with_sources() {
        let (mut controller, api, _push) = controller(FakeChatApi::new().reply("I know TypeScript", vec![]));
        settle(&mut controller).await;

        controller.set_input("What are your skills?");
        assert!(controller.send_message());

        assert_eq!(controller.messages().len(), 2);
        let user = &controller.messages()[1];
        assert!(user.is_user);
        assert_eq!(user.content, "What are your skills?");
        assert!(controller.input().is_empty());
        assert!(controller.is_loading());

        settle(&mut controller).await;

        let reply = controller.messages().last().unwrap();
        assert!(!reply.is_user);
        assert_eq!(reply.content, "I know TypeScript");
        assert_eq!(reply.sources, Some(vec![]));
        assert!(!controller.is_loading());

        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "What are your skills?");
        assert_eq!(requests[0].session_id.as_deref(), Some("session-1"));
    }

    #[tokio::test]
    async fn failed_reply_becomes_apology() {
        let (mut controller, _api, _push) = controller(FakeChatApi::new().fail_reply("HTTP 500"));
        settle(&mut controller).await;

        assert!(send(&mut controller, "hello").await);

        let reply = controller.messages().last().unwrap();
        assert_eq!(reply.content, SEND_FAILURE_MESSAGE);
        assert_eq!(reply.content, "Sorry, I encountered an error. Please try again.");
        assert!(!reply.is_user);
        assert!(reply.sources.is_none());
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn citations_are_kept_on_the_reply() {
        let sources = vec![source("resume.pdf", 0.91), source("projects.md", 0.42)];
        let (mut controller, _api, _push) = controller(FakeChatApi::new().reply("Rust and Azure", sources.clone()));
        settle(&mut controller).await;

        send(&mut controller, "skills?").await;

        assert_eq!(controller.messages().last().unwrap().sources(), sources.as_slice());
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let (mut controller, api, _push) = controller(FakeChatApi::new());
        settle(&mut controller).await;

        for blank in ["", "   ", "\n\t "] {
            controller.set_input(blank);
            assert!(!controller.send_message());
            assert!(!controller.is_loading());
            assert_eq!(controller.messages().len(), 1);
        }
        assert!(api.requests().is_empty());
        assert!(!controller.has_pending_work());
    }

    #[tokio::test]
    async fn second_send_while_loading_is_dropped() {
        let (api, gate) = FakeChatApi::gated();
        let (mut controller, api, _push) = controller(api);
        settle(&mut controller).await;

        controller.set_input("first");
        assert!(controller.send_message());
        assert!(controller.is_loading());

        controller.set_input("second");
        assert!(!controller.send_message());
        assert_eq!(controller.messages().len(), 2);
        assert_eq!(controller.input(), "second");

        gate.add_permits(1);
        settle(&mut controller).await;

        assert!(!controller.is_loading());
        assert_eq!(controller.messages().len(), 3);
        assert_eq!(api.requests().len(), 1);
        assert_eq!(api.requests()[0].message, "first");
    }

    #[tokio::test]
    async fn list_grows_by_two_per_completed_send() {
        let api = FakeChatApi::new()
            .reply("one", vec![])
            .fail_reply("boom")
            .reply("three", vec![]);
        let (mut controller, _api, _push) = controller(api);
        settle(&mut controller).await;

        for (n, text) in ["a", "b", "c", "d"].into_iter().enumerate() {
            assert!(send(&mut controller, text).await);
            assert_eq!(controller.messages().len(), 1 + 2 * (n + 1));
            assert!(!controller.is_loading());
        }
    }

    #[tokio::test]
    async fn input_is_sent_untrimmed() {
        let (mut controller, api, _push) = controller(FakeChatApi::new());
        settle(&mut controller).await;

        send(&mut controller, "  padded  ").await;

        assert_eq!(controller.messages()[1].content, "  padded  ");
        assert_eq!(api.requests()[0].message, "  padded  ");
    }

    #[tokio::test]
    async fn send_before_session_omits_session_id() {
        let (mut controller, api, _push) = controller(FakeChatApi::new());

        controller.set_input("too early");
        assert!(controller.send_message());
        settle(&mut controller).await;

        assert!(api.requests()[0].session_id.is_none());
        assert_eq!(controller.session_id(), "session-1");
    }
}

mod push_stream {
    use super::*;

    #[tokio::test]
    async fn pushed_messages_are_appended_in_arrival_order() {
        let (mut controller, _api, push) = controller(FakeChatApi::new());
        settle(&mut controller).await;

        assert_eq!(push.emit(ChatMessage::assistant("first push")), 1);
        assert_eq!(push.emit(ChatMessage::assistant("second push")), 1);

        for expected in ["first push", "second push"] {
            let event = controller.next_event().await.unwrap();
            assert!(matches!(&event, ChatEvent::Pushed(m) if m.content == expected));
            let appended = controller.handle_event(event).unwrap();
            assert_eq!(appended.content, expected);
        }
        assert_eq!(controller.messages().len(), 3);
    }

    #[tokio::test]
    async fn push_can_overtake_a_slow_reply() {
        let (api, gate) = FakeChatApi::gated();
        let (mut controller, _api, push) = controller(api);
        settle(&mut controller).await;

        controller.set_input("slow question");
        controller.send_message();
        push.emit(ChatMessage::assistant("fast push"));

        let event = controller.next_event().await.unwrap();
        controller.handle_event(event);
        assert!(controller.is_loading());

        gate.add_permits(1);
        settle(&mut controller).await;

        let contents: Vec<_> = controller.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1..], ["slow question", "fast push", "echo: slow question"]);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_emissions() {
        let push = FakePush::new();
        assert_eq!(push.emit(ChatMessage::assistant("nobody listening")), 0);

        let api = Arc::new(FakeChatApi::new());
        let push = Arc::new(push);
        let mut controller = ChatController::new(api, Arc::clone(&push));
        settle(&mut controller).await;

        let waited = tokio::time::timeout(Duration::from_millis(50), controller.next_event()).await;
        assert!(waited.is_err());
        assert_eq!(controller.messages().len(), 1);
    }
}

mod clearing {
    use super::*;

    #[tokio::test]
    async fn clear_resets_to_welcome_and_new_session() {
        let (mut controller, api, _push) = controller(FakeChatApi::new());
        settle(&mut controller).await;
        send(&mut controller, "hello").await;
        assert_eq!(controller.session_id(), "session-1");

        controller.clear_chat();

        assert_eq!(controller.messages().len(), 1);
        assert_eq!(controller.messages()[0].content, WELCOME_MESSAGE);
        assert!(controller.session_id().is_empty());

        settle(&mut controller).await;

        assert_eq!(api.session_calls(), 2);
        assert_eq!(controller.session_id(), "session-2");
    }

    #[tokio::test]
    async fn stale_session_from_before_clear_is_ignored() {
        let (mut controller, _api, _push) = controller(FakeChatApi::new());
        settle(&mut controller).await;

        controller.clear_chat();
        let stale = ChatEvent::SessionCreated {
            generation: 1,
            result: Ok("late-from-first-request".into()),
        };
        assert!(controller.handle_event(stale).is_none());
        assert!(controller.session_id().is_empty());

        settle(&mut controller).await;
        assert_eq!(controller.session_id(), "session-2");
    }
}

mod teardown {
    use super::*;

    #[tokio::test]
    async fn teardown_disconnects_exactly_once() {
        let (mut controller, _api, push) = controller(FakeChatApi::new());
        settle(&mut controller).await;

        controller.teardown().await;
        controller.teardown().await;

        assert_eq!(push.disconnects(), 1);
        assert_eq!(push.subscribers(), 0);
        assert!(controller.is_torn_down());
    }

    #[tokio::test]
    async fn teardown_cancels_in_flight_send() {
        let (api, _gate) = FakeChatApi::gated();
        let (mut controller, _api, push) = controller(api);
        settle(&mut controller).await;
        send_without_settling(&mut controller, "never answered");

        controller.teardown().await;

        assert!(!controller.has_pending_work());
        assert!(controller.next_event().await.is_none());
        assert_eq!(push.emit(ChatMessage::assistant("after teardown")), 0);
        assert_eq!(controller.messages().len(), 2);
    }

    #[tokio::test]
    async fn sends_after_teardown_are_ignored() {
        let (mut controller, api, _push) = controller(FakeChatApi::new());
        settle(&mut controller).await;
        controller.teardown().await;

        controller.set_input("hello?");
        assert!(!controller.send_message());
        assert!(api.requests().is_empty());
    }

    #[tokio::test]
    async fn clear_after_teardown_is_ignored() {
        let (mut controller, api, _push) = controller(FakeChatApi::new());
        settle(&mut controller).await;
        send(&mut controller, "hello").await;
        controller.teardown().await;

        controller.clear_chat();

        assert_eq!(api.session_calls(), 1);
        assert!(!controller.has_pending_work());
        assert_eq!(controller.messages().len(), 3);
        assert_eq!(controller.session_id(), "session-1");
    }

    fn send_without_settling(controller: &mut Controller, text: &str) {
        controller.set_input(text);
        assert!(controller.send_message());
    }
}
