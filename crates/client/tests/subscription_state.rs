mod common;

use std::time::Duration;

use common::{Harness, Recorder};
use serde_json::json;
use webpubsub::shared::{events, AuthError, ChannelAuthorizationData};
use webpubsub::socket::SocketEvent;
use webpubsub::{ChannelEvent, ClientError};

fn subscribed_public(h: &mut Harness, name: &str) -> Recorder<ChannelEvent> {
    let seen = Recorder::default();
    h.client.subscribe(name).unwrap().bind_global(seen.global());
    h.subscription_succeeded(name, json!({}));
    seen
}

#[test]
fn public_subscription_waits_for_the_connection() {
    let mut h = Harness::new();
    h.client.subscribe("public-news").unwrap();
    assert!(h.client.channel("public-news").is_some());
    assert!(!h.client.channel("public-news").unwrap().is_subscription_pending());

    h.connect_and_establish();

    let frames = h.frames_with_event(events::SUBSCRIBE);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["data"], json!({ "auth": "", "channel": "public-news" }));
    assert!(h.client.channel("public-news").unwrap().is_subscription_pending());
}

#[test]
fn confirmation_marks_the_channel_subscribed() {
    let mut h = Harness::new();
    h.connect_and_establish();

    let seen: Recorder<ChannelEvent> = Recorder::default();
    h.client
        .subscribe("news")
        .unwrap()
        .bind(events::SUBSCRIPTION_SUCCEEDED, seen.named("succeeded"));
    h.subscription_succeeded("news", json!({ "since": 3 }));

    let channel = h.client.channel("news").unwrap();
    assert!(channel.is_subscribed());
    assert!(!channel.is_subscription_pending());
    assert_eq!(seen.payloads("succeeded")[0].data, json!({ "since": 3 }));
}

#[test]
fn private_channels_are_authorized_with_the_socket_id() {
    let mut h = Harness::new();
    h.connect_and_establish();
    h.client.subscribe("private-orders").unwrap();

    {
        let requests = h.channel_auth.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.socket_id, "123.456");
        assert_eq!(requests[0].0.channel_name, "private-orders");
    }
    assert!(h.frames_with_event(events::SUBSCRIBE).is_empty());

    h.authorize("private-orders", Ok(ChannelAuthorizationData::new("foobar:abc")));

    let frames = h.frames_with_event(events::SUBSCRIBE);
    assert_eq!(frames[0]["data"], json!({ "auth": "foobar:abc", "channel": "private-orders" }));
}

#[test]
fn authorization_failure_is_reported_on_the_channel() {
    let mut h = Harness::new();
    h.connect_and_establish();
    let seen: Recorder<ChannelEvent> = Recorder::default();
    h.client
        .subscribe("private-orders")
        .unwrap()
        .bind(events::SUBSCRIPTION_ERROR, seen.named("error"));

    h.authorize("private-orders", Err(AuthError::http(403, "forbidden")));

    assert_eq!(
        seen.payloads("error")[0].data,
        json!({ "type": "AuthError", "error": "forbidden", "status": 403 })
    );
    let channel = h.client.channel("private-orders").unwrap();
    assert!(!channel.is_subscription_pending());
    assert!(!channel.is_subscribed());
    assert!(h.frames_with_event(events::SUBSCRIBE).is_empty());
}

#[test]
fn unsubscribe_while_pending_unsubscribes_on_confirmation() {
    let mut h = Harness::new();
    h.connect_and_establish();
    let seen: Recorder<ChannelEvent> = Recorder::default();
    h.client.subscribe("news").unwrap().bind_global(seen.global());

    h.client.unsubscribe("news");
    assert!(h.client.channel("news").is_none());
    assert_eq!(h.client.all_channels().count(), 0);
    assert!(h.frames_with_event(events::UNSUBSCRIBE).is_empty());

    h.subscription_succeeded("news", json!({}));

    assert!(h.client.channel("news").is_none());
    assert_eq!(
        h.frames_with_event(events::UNSUBSCRIBE)[0]["data"],
        json!({ "channel": "news" })
    );
    assert_eq!(seen.len(), 0);
}

#[test]
fn resubscribing_while_pending_keeps_the_subscription() {
    let mut h = Harness::new();
    h.connect_and_establish();
    let seen: Recorder<ChannelEvent> = Recorder::default();
    h.client.subscribe("news").unwrap().bind_global(seen.global());

    h.client.unsubscribe("news");
    h.client.subscribe("news").unwrap();
    h.subscription_succeeded("news", json!({}));

    let channel = h.client.channel("news").unwrap();
    assert!(channel.is_subscribed());
    assert!(!channel.is_subscription_cancelled());
    assert_eq!(seen.events(), vec![events::SUBSCRIPTION_SUCCEEDED.to_string()]);
    assert_eq!(h.frames_with_event(events::SUBSCRIBE).len(), 1);
    assert!(h.frames_with_event(events::UNSUBSCRIBE).is_empty());
}

#[test]
fn resubscribing_while_disconnected_survives_the_reconnect() {
    let mut h = Harness::new();
    h.connect_and_establish();
    h.client.subscribe("news").unwrap();
    h.client.unsubscribe("news");

    h.socket_event(SocketEvent::Closed(None));
    h.advance(Duration::from_secs(1));
    assert!(h.client.channel("news").is_none());

    let seen: Recorder<ChannelEvent> = Recorder::default();
    h.client.subscribe("news").unwrap().bind("headline", seen.named("headline"));
    assert!(h.client.channel("news").is_some());
    h.clear_sent();

    h.open_transport();
    h.establish("9.9", 120);
    let frames = h.frames_with_event(events::SUBSCRIBE);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["data"]["channel"], "news");

    h.subscription_succeeded("news", json!({}));
    h.server_send(json!({ "event": "headline", "channel": "news", "data": { "id": 1 } }));
    assert!(h.client.channel("news").unwrap().is_subscribed());
    assert_eq!(seen.len(), 1);
}

#[test]
fn cancelled_channels_cannot_be_triggered() {
    let mut h = Harness::new();
    h.connect_and_establish();
    h.client.subscribe("private-chat").unwrap();
    h.client.unsubscribe("private-chat");

    assert!(matches!(
        h.client.trigger("private-chat", "client-typing", json!({})),
        Err(ClientError::BadChannelName(_))
    ));
}

#[test]
fn unsubscribe_after_confirmation_tells_the_server() {
    let mut h = Harness::new();
    h.connect_and_establish();
    subscribed_public(&mut h, "news");

    h.client.unsubscribe("news");

    assert!(h.client.channel("news").is_none());
    assert_eq!(h.frames_with_event(events::UNSUBSCRIBE).len(), 1);
}

#[test]
fn unsubscribing_an_unknown_channel_is_a_no_op() {
    let mut h = Harness::new();
    h.connect_and_establish();
    h.client.unsubscribe("nothing");
    assert!(h.frames_with_event(events::UNSUBSCRIBE).is_empty());
}

#[test]
fn cancelled_channel_is_dropped_when_authorization_fails() {
    let mut h = Harness::new();
    h.connect_and_establish();
    h.client.subscribe("private-orders").unwrap();
    h.client.unsubscribe("private-orders");

    h.authorize("private-orders", Err(AuthError::rejected("nope")));

    assert!(h.client.channel("private-orders").is_none());
}

#[test]
fn reconnect_resubscribes_every_channel() {
    let mut h = Harness::new();
    h.connect_and_establish();
    subscribed_public(&mut h, "news");
    subscribed_public(&mut h, "sport");
    h.clear_sent();

    h.socket_event(SocketEvent::Closed(None));
    h.advance(Duration::from_secs(1));
    assert!(!h.client.channel("news").unwrap().is_subscribed());

    h.open_transport();
    h.establish("9.9", 120);

    let mut names: Vec<String> = h
        .frames_with_event(events::SUBSCRIBE)
        .iter()
        .map(|frame| frame["data"]["channel"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, ["news", "sport"]);
}

#[test]
fn authorization_from_a_previous_connection_is_ignored() {
    let mut h = Harness::new();
    h.connect_and_establish();
    h.client.subscribe("private-orders").unwrap();

    h.socket_event(SocketEvent::Closed(None));
    h.advance(Duration::from_secs(1));
    h.open_transport();
    h.establish("9.9", 120);
    assert_eq!(h.channel_auth.count("private-orders"), 2);
    h.clear_sent();

    h.authorize("private-orders", Ok(ChannelAuthorizationData::new("stale:sig")));
    assert!(h.frames_with_event(events::SUBSCRIBE).is_empty());

    h.authorize("private-orders", Ok(ChannelAuthorizationData::new("fresh:sig")));
    let frames = h.frames_with_event(events::SUBSCRIBE);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["data"]["auth"], "fresh:sig");
}

#[test]
fn presence_channel_tracks_members() {
    let mut h = Harness::new();
    h.connect_and_establish();
    let seen: Recorder<ChannelEvent> = Recorder::default();
    h.client.subscribe("presence-room").unwrap().bind_global(seen.global());

    h.authorize(
        "presence-room",
        Ok(ChannelAuthorizationData::new("foobar:sig")
            .with_channel_data(json!({ "user_id": "u1", "user_info": { "name": "Ann" } }).to_string())),
    );
    let frame = h.frames_with_event(events::SUBSCRIBE).remove(0);
    assert!(frame["data"]["channel_data"].is_string());

    h.subscription_succeeded(
        "presence-room",
        json!({ "presence": {
            "hash": { "u1": { "name": "Ann" }, "u2": { "name": "Bob" } },
            "count": 2,
            "ids": ["u1", "u2"],
        }}),
    );

    let members = h.client.channel("presence-room").unwrap().members().unwrap();
    assert_eq!(members.count(), 2);
    assert_eq!(members.my_id(), Some("u1"));
    let succeeded = &seen.payloads(events::SUBSCRIPTION_SUCCEEDED)[0].data;
    assert_eq!(succeeded["count"], 2);
    assert_eq!(succeeded["myID"], "u1");
    assert_eq!(succeeded["me"], json!({ "id": "u1", "info": { "name": "Ann" } }));

    h.server_send(json!({
        "event": events::INTERNAL_MEMBER_ADDED,
        "channel": "presence-room",
        "data": { "user_id": 3, "user_info": { "name": "Cy" } },
    }));
    assert_eq!(
        seen.payloads(events::MEMBER_ADDED)[0].data,
        json!({ "id": "3", "info": { "name": "Cy" } })
    );

    h.server_send(json!({
        "event": events::INTERNAL_MEMBER_REMOVED,
        "channel": "presence-room",
        "data": { "user_id": "ghost" },
    }));
    assert!(seen.payloads(events::MEMBER_REMOVED).is_empty());

    h.server_send(json!({
        "event": events::INTERNAL_MEMBER_REMOVED,
        "channel": "presence-room",
        "data": { "user_id": "u2" },
    }));
    assert_eq!(seen.payloads(events::MEMBER_REMOVED)[0].data["id"], "u2");

    let members = h.client.channel("presence-room").unwrap().members().unwrap();
    assert_eq!(members.count(), 2);
    assert!(members.get("3").is_some());
}

#[test]
fn presence_authorization_requires_channel_data() {
    let mut h = Harness::new();
    h.connect_and_establish();
    let seen: Recorder<ChannelEvent> = Recorder::default();
    h.client
        .subscribe("presence-room")
        .unwrap()
        .bind(events::SUBSCRIPTION_ERROR, seen.named("error"));

    h.authorize("presence-room", Ok(ChannelAuthorizationData::new("foobar:sig")));

    assert_eq!(seen.len(), 1);
    assert!(h.frames_with_event(events::SUBSCRIBE).is_empty());
}

#[test]
fn presence_events_carry_the_sender() {
    let mut h = Harness::new();
    h.connect_and_establish();
    let presence: Recorder<ChannelEvent> = Recorder::default();
    let public: Recorder<ChannelEvent> = Recorder::default();
    h.client
        .subscribe("presence-room")
        .unwrap()
        .bind("client-wave", presence.named("client-wave"));
    h.client
        .subscribe("news")
        .unwrap()
        .bind("client-wave", public.named("client-wave"));

    for channel in ["presence-room", "news"] {
        h.server_send(json!({
            "event": "client-wave",
            "channel": channel,
            "data": {},
            "user_id": "u9",
        }));
    }

    assert_eq!(presence.payloads("client-wave")[0].user_id.as_deref(), Some("u9"));
    assert_eq!(public.payloads("client-wave")[0].user_id, None);
}

#[test]
fn client_events_need_the_client_prefix() {
    let mut h = Harness::new();
    h.connect_and_establish();
    h.client.subscribe("private-chat").unwrap();
    h.authorize("private-chat", Ok(ChannelAuthorizationData::new("foobar:sig")));
    h.subscription_succeeded("private-chat", json!({}));

    assert!(matches!(
        h.client.trigger("private-chat", "typing", json!({})),
        Err(ClientError::BadEventName(_))
    ));
    assert!(h.client.trigger("private-chat", "client-typing", json!({ "who": "me" })).unwrap());

    let frame = h.frames_with_event("client-typing").remove(0);
    assert_eq!(frame["channel"], "private-chat");
    assert_eq!(frame["data"], json!({ "who": "me" }));
}

#[test]
fn invalid_channel_names_are_rejected() {
    let mut h = Harness::new();
    assert!(matches!(
        h.client.subscribe("#server-to-user-1"),
        Err(ClientError::BadChannelName(_))
    ));
    assert!(matches!(
        h.client.subscribe("private-encrypted-vault"),
        Err(ClientError::UnsupportedFeature(_))
    ));
    assert_eq!(h.client.all_channels().count(), 0);
}
