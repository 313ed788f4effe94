//! Codec tests for ORTC core
//!
//! Inbound classification follows the priority order
//! open > heartbeat > operation > close > data > unknown.

use ortc_core::codec::{self, Command, Inbound, Operation, ServerError};
use ortc_core::{Error, Permissions};

// ============================================================================
// Inbound classification
// ============================================================================

#[test]
fn test_decode_open_and_heartbeat() {
    assert_eq!(codec::decode("o").unwrap(), Inbound::Open);
    assert_eq!(codec::decode("h").unwrap(), Inbound::Heartbeat);
}

#[test]
fn test_decode_validated_with_permissions() {
    let frame = r#"a["{\"op\":\"ortc-validated\",\"up\":{\"chat:*\":\"h1\",\"news\":\"h2\"},\"set\":1800}"]"#;

    match codec::decode(frame).expect("decode failed") {
        Inbound::Operation(Operation::Validated {
            permissions,
            session_expiration,
            busy,
        }) => {
            let permissions = permissions.expect("permissions missing");
            assert_eq!(permissions.len(), 2);
            assert_eq!(permissions.hash_for("chat:room"), Some("h1"));
            assert_eq!(permissions.hash_for("news"), Some("h2"));
            assert_eq!(session_expiration, Some(1800));
            assert!(!busy);
        }
        other => panic!("Expected Validated, got {:?}", other),
    }
}

#[test]
fn test_decode_validated_null_permissions() {
    let frame = r#"a["{"op":"ortc-validated","args":"up":null,"set":1800"}"]"#;

    match codec::decode(frame).expect("decode failed") {
        Inbound::Operation(Operation::Validated {
            permissions,
            session_expiration,
            ..
        }) => {
            assert!(permissions.is_none(), "null must not replace permissions");
            assert_eq!(session_expiration, Some(1800));
        }
        other => panic!("Expected Validated, got {:?}", other),
    }
}

#[test]
fn test_decode_validated_busy() {
    let frame = r#"a["{"op":"ortc-validated","up":null,"set":30,"busy":true}"]"#;
    match codec::decode(frame).unwrap() {
        Inbound::Operation(Operation::Validated { busy, .. }) => assert!(busy),
        other => panic!("Expected Validated, got {:?}", other),
    }
}

#[test]
fn test_decode_subscribed_and_unsubscribed() {
    assert_eq!(
        codec::decode(r#"a["{\"op\":\"ortc-subscribed\",\"ch\":\"news\"}"]"#).unwrap(),
        Inbound::Operation(Operation::Subscribed {
            channel: "news".to_string()
        })
    );
    assert_eq!(
        codec::decode(r#"a["{"op":"ortc-unsubscribed","ch":"chat:lobby"}"]"#).unwrap(),
        Inbound::Operation(Operation::Unsubscribed {
            channel: "chat:lobby".to_string()
        })
    );
}

#[test]
fn test_decode_error_with_op_and_channel() {
    let frame = r#"a["{"op":"ortc-error","ex":{"op":"subscribe","ch":"news","ex":"Access denied"}}"]"#;
    assert_eq!(
        codec::decode(frame).unwrap(),
        Inbound::Operation(Operation::Error(ServerError {
            op: Some("subscribe".to_string()),
            channel: Some("news".to_string()),
            message: "Access denied".to_string(),
        }))
    );
}

#[test]
fn test_decode_error_without_channel() {
    let frame = r#"a["{"op":"ortc-error","ex":{"op":"validate","ex":"Server is too busy"}}"]"#;
    match codec::decode(frame).unwrap() {
        Inbound::Operation(Operation::Error(err)) => {
            assert_eq!(err.op.as_deref(), Some("validate"));
            assert!(err.channel.is_none());
            assert_eq!(err.message, "Server is too busy");
        }
        other => panic!("Expected Error, got {:?}", other),
    }
}

#[test]
fn test_decode_unknown_operation() {
    let result = codec::decode(r#"a["{"op":"ortc-mystery","x":1}"]"#);
    match result {
        Err(Error::UnknownOperation { op, .. }) => assert_eq!(op, "ortc-mystery"),
        other => panic!("Expected UnknownOperation, got {:?}", other),
    }
}

#[test]
fn test_decode_data_frame() {
    let frame = r#"a["{\"ch\":\"news\",\"m\":\"abcd1234_1-1_hello world\"}"]"#;
    assert_eq!(
        codec::decode(frame).unwrap(),
        Inbound::Data {
            channel: "news".to_string(),
            message: "abcd1234_1-1_hello world".to_string(),
        }
    );
}

#[test]
fn test_decode_data_unescapes_payload() {
    let frame = r#"a["{\"ch\":\"news\",\"m\":\"line1\\nline2 \\\"quoted\\\" back\\\\slash\"}"]"#;
    match codec::decode(frame).unwrap() {
        Inbound::Data { message, .. } => {
            assert_eq!(message, "line1\nline2 \"quoted\" back\\slash");
        }
        other => panic!("Expected Data, got {:?}", other),
    }
}

#[test]
fn test_decode_unknown_frame() {
    assert!(matches!(codec::decode("garbage"), Err(Error::Protocol(_))));
    assert!(matches!(codec::decode(r#"a["{"x":1}"]"#), Err(Error::Protocol(_))));
}

// ============================================================================
// Outbound encoding
// ============================================================================

#[test]
fn test_encode_subscribe_unsubscribe() {
    assert_eq!(
        codec::encode(&Command::Subscribe {
            app_key: "key",
            auth_token: "tok",
            channel: "chat:lobby",
            hash: "h1",
        }),
        "subscribe;key;tok;chat:lobby;h1"
    );
    assert_eq!(
        codec::encode(&Command::Unsubscribe {
            app_key: "key",
            channel: "chat:lobby",
        }),
        "unsubscribe;key;chat:lobby"
    );
}

#[test]
fn test_encode_send_proxy_and_heartbeat() {
    let part = ortc_core::Part {
        message_id: "ID000001".to_string(),
        index: 1,
        total: 1,
        fragment: "payload".to_string(),
    };
    assert_eq!(
        codec::encode(&Command::SendProxy {
            app_key: "other",
            private_key: "pk",
            channel: "news",
            part: &part,
        }),
        "sendproxy;other;pk;news;ID000001_1-1_payload"
    );
    assert_eq!(codec::encode(&Command::Heartbeat), "b");
}

#[test]
fn test_permissions_from_validated_replace_wholesale() {
    let parsed = Permissions::parse(r#"{"a":"1"}"#);
    assert_eq!(parsed, Permissions::from_pairs([("a", "1")]));
}
