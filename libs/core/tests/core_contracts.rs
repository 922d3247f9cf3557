use csd_core::*;
use serde_json::json;
use time::{Duration, macros::datetime};

fn conversation() -> Conversation {
    Conversation::new(
        &ConversationKey::new("bot-1", "U1"),
        "acme",
        Platform::Line,
        PeerContext::Direct,
        datetime!(2024-05-01 08:00 UTC),
    )
}

#[test]
fn conversation_wire_shape_is_camel_case() {
    let mut conv = conversation();
    conv.append(Message::inbound(
        NormalizedMessage::text("hi").with_platform_id("m1"),
        datetime!(2024-05-01 08:00:01 UTC),
    ));
    let value = serde_json::to_value(&conv).unwrap();
    assert_eq!(value["botId"], "bot-1");
    assert_eq!(value["autoReplyEnabled"], true);
    assert_eq!(value["peerContext"], "direct");
    assert_eq!(value["messages"][0]["type"], "text");
    assert_eq!(value["messages"][0]["role"], "user");
    assert_eq!(value["messages"][0]["isAutoReply"], false);
    assert_eq!(value["messages"][0]["platformMessageId"], "m1");
    assert!(value["messages"][0].get("deliveryStatus").is_none());
    assert!(value.get("customerName").is_none());
}

#[test]
fn sparse_snapshot_records_fill_defaults() {
    let conv: Conversation = serde_json::from_value(json!({
        "botId": "bot-1",
        "peerId": "U1",
        "tenantId": "acme",
        "autoReplyEnabled": false,
        "createdAt": "2024-05-01T08:00:00Z",
        "updatedAt": "2024-05-01T08:00:00Z"
    }))
    .unwrap();
    assert_eq!(conv.platform, Platform::Line);
    assert_eq!(conv.peer_context, PeerContext::Direct);
    assert!(conv.messages.is_empty());
    assert_eq!(conv.reply_mode(), ReplyMode::Manual);

    let db: Database = serde_json::from_value(json!({})).unwrap();
    assert!(db.is_empty());
}

#[test]
fn reply_mode_cycles_without_terminal_state() {
    let mut conv = conversation();
    let window = Duration::minutes(10);
    let mut now = datetime!(2024-05-01 09:00 UTC);
    for _ in 0..3 {
        conv.append(Message::human_reply("on it", now));
        assert_eq!(conv.reply_mode(), ReplyMode::Manual);
        assert!(!conv.apply_fallback(now + Duration::minutes(5), window));
        now += Duration::minutes(11);
        assert!(conv.apply_fallback(now, window));
        assert_eq!(conv.reply_mode(), ReplyMode::Auto);
    }
}

#[test]
fn assistant_delivery_status_only_moves_forward() {
    let mut conv = conversation();
    let at = datetime!(2024-05-01 08:05 UTC);
    let reply = Message::auto_reply("hello", DeliveryStatus::Pending, at);
    let id = reply.id.clone();
    conv.append(reply);
    assert!(conv.set_delivery_status(&id, DeliveryStatus::Delivered));
    assert!(!conv.set_delivery_status(&id, DeliveryStatus::Pending));
    assert_eq!(
        conv.find_message(&id).unwrap().delivery_status,
        Some(DeliveryStatus::Delivered)
    );
    assert!(!conv.set_delivery_status("missing", DeliveryStatus::Failed));
}

#[test]
fn bot_view_hides_credentials() {
    let now = datetime!(2024-05-01 08:00 UTC);
    let bot = Bot {
        id: "bot-1".into(),
        tenant_id: "acme".into(),
        name: "Support".into(),
        platform: Platform::Line,
        access_token: StoredCredential::Plaintext("tok-plain-123".into()),
        signing_secret: StoredCredential::Plaintext("sig-plain-456".into()),
        webhook_path: issue_webhook_path(),
        status: BotStatus::Active,
        message_count: 0,
        conversation_count: 0,
        created_at: now,
        updated_at: now,
    };
    let view = serde_json::to_string(&bot.view()).unwrap();
    assert!(!view.contains("tok-plain-123"));
    assert!(!view.contains("sig-plain-456"));
    assert_ne!(issue_webhook_path(), bot.webhook_path);
}
