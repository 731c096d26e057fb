//! Integration tests to exercise the broker using its public interface.

/// Fun hack to avoid duplication: the `testing` module in the crate is only enabled in `test`
/// config, and when running integration tests like this one the crate is compiled without `test`
/// enabled.  But we need to use the same test helpers, so just include that module in this test
/// program as well.
#[path = "../src/testing.rs"]
mod test_helpers;
mod test_service;

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use jensen_broker::{
    Broker, BrokerConfig, DefaultInstanceLocator, ErrorCode, Id, Instance, InstanceLocator, JsonValue,
    LocatorError, MethodCall, Request, Response, TargetInfo,
};
use serde_json::json;
use test_helpers::{decode_output, init_test_logging};
use test_service::{Greeter, test_broker, test_broker_builder, test_registry};

/// Send one request to the broker and decode whatever it answered.
fn exchange(broker: &Broker, request: JsonValue) -> Option<JsonValue> {
    decode_output(broker.process(&request.to_string()))
}

/// Send one request that must be answered, and return the answer.
fn call(broker: &Broker, request: JsonValue) -> JsonValue {
    exchange(broker, request.clone()).unwrap_or_else(|| panic!("No response to {request}"))
}

fn error_code(response: &JsonValue) -> i64 {
    response["error"]["code"]
        .as_i64()
        .unwrap_or_else(|| panic!("Not an error response: {response}"))
}

#[test]
fn invokes_member_and_echoes_id() {
    init_test_logging();

    let broker = test_broker();
    let output = broker.process(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3],"id":1}"#);
    assert_eq!(output.as_deref(), Some(r#"{"jsonrpc":"2.0","result":5,"id":1}"#));

    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [40, 2], "id": "forty-two"}),
    );
    assert_eq!(response, json!({"jsonrpc": "2.0", "result": 42, "id": "forty-two"}));
}

#[test]
fn overloads_are_tried_in_registration_order() {
    init_test_logging();

    let broker = test_broker();

    // Both overloads could take two integers, but the integer one was registered first
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [2, 3], "id": 1}));
    assert_eq!(response["result"], json!(5));

    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1.5, 2], "id": 2}),
    );
    assert_eq!(response["result"], json!(3.5));
}

#[test]
fn incompatible_overloads_are_all_reported() {
    init_test_logging();

    let broker = test_broker();
    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Calc.add", "params": ["x", 3], "id": 1}),
    );

    assert_eq!(error_code(&response), -32601);
    assert_eq!(response["id"], json!(1));

    let data = &response["error"]["data"];
    assert_eq!(data["type"], json!("IncompatibleMember"));
    assert_eq!(data["properties"]["target"], json!("Calc"));
    assert_eq!(data["properties"]["member"], json!("add"));

    let incompatible = data["properties"]["incompatible"].as_object().unwrap();
    assert_eq!(incompatible.len(), 2);
    assert_eq!(
        incompatible["add(i64, i64)"],
        json!({"parameterType": "i64", "index": 0})
    );
    assert_eq!(
        incompatible["add(f64, f64)"],
        json!({"parameterType": "f64", "index": 0})
    );

    // The failed request is attached to the cause
    assert_eq!(data["request"]["method"], json!("Calc.add"));
    assert_eq!(data["request"]["params"], json!(["x", 3]));
}

#[test]
fn missing_arguments_are_incompatible() {
    init_test_logging();

    let broker = test_broker();
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1], "id": 1}));

    assert_eq!(error_code(&response), -32601);
    assert_eq!(
        response["error"]["data"]["properties"]["incompatible"]["add(i64, i64)"],
        json!({"parameterType": "i64", "index": 1})
    );
}

#[test]
fn method_lookup_failures() {
    init_test_logging();

    let broker = test_broker();

    let cases = [
        ("add", "MalformedMethod"),
        ("Calc.", "MalformedMethod"),
        ("Nope.add", "UnknownTarget"),
        ("Calc.subtract", "MemberNotFound"),
    ];

    for (method, expected_type) in cases {
        let response = call(&broker, json!({"jsonrpc": "2.0", "method": method, "params": [], "id": 1}));
        assert_eq!(error_code(&response), -32601, "{method}");
        assert_eq!(response["error"]["data"]["type"], json!(expected_type), "{method}");
    }

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.subtract", "params": [], "id": 1}));
    assert_eq!(
        response["error"]["message"],
        json!("Method subtract in target Calc not found")
    );
}

#[test]
fn unsupported_version_echoes_id() {
    init_test_logging();

    let broker = test_broker();
    let response = call(&broker, json!({"jsonrpc": "1.0", "method": "Calc.add", "params": [2, 3], "id": 7}));

    assert_eq!(error_code(&response), -32600);
    assert_eq!(response["id"], json!(7));
    assert_eq!(
        response["error"]["message"],
        json!("JSON-RPC 1.0 is unsupported. Use 2.0 instead")
    );
    assert_eq!(response["error"]["data"]["properties"]["version"], json!("1.0"));
}

#[test]
fn unsupported_version_notification_is_not_answered() {
    init_test_logging();

    let broker = test_broker();
    assert_eq!(
        exchange(&broker, json!({"jsonrpc": "1.0", "method": "Counter.increment"})),
        None
    );

    // Nor is it invoked
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Counter.get", "id": 1}));
    assert_eq!(response["result"], json!(0));
}

#[test]
fn any_json_number_is_an_id() {
    init_test_logging();

    let broker = test_broker();

    let output = broker.process(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3],"id":1.5}"#);
    assert_eq!(output.as_deref(), Some(r#"{"jsonrpc":"2.0","result":5,"id":1.5}"#));

    let output = broker.process(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3],"id":18446744073709551615}"#);
    assert_eq!(
        output.as_deref(),
        Some(r#"{"jsonrpc":"2.0","result":5,"id":18446744073709551615}"#)
    );

    let output = broker.process(r#"{"jsonrpc":"2.0","method":"Calc.nope","id":-0.25}"#);
    let response = decode_output(output).unwrap();
    assert_eq!(error_code(&response), -32601);
    assert_eq!(response["id"], json!(-0.25));
}

#[test]
fn malformed_requests() {
    init_test_logging();

    let broker = test_broker();

    let response = decode_output(broker.process("{not json")).unwrap();
    assert_eq!(error_code(&response), -32700);
    assert_eq!(response["id"], JsonValue::Null);

    let response = decode_output(broker.process("null")).unwrap();
    assert_eq!(error_code(&response), -32600);
    assert_eq!(response["error"]["message"], json!("Request is missing"));

    // Missing method, but the id can still be salvaged
    let response = call(&broker, json!({"jsonrpc": "2.0", "id": 9}));
    assert_eq!(error_code(&response), -32600);
    assert_eq!(response["id"], json!(9));

    // Only positional parameters are supported
    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Calc.add", "params": {"a": 1, "b": 2}, "id": 10}),
    );
    assert_eq!(error_code(&response), -32600);
    assert_eq!(response["id"], json!(10));

    let response = decode_output(broker.process_bytes(&[0x7b, 0xff, 0xfe, 0x7d])).unwrap();
    assert_eq!(error_code(&response), -32700);
}

#[test]
fn notifications_are_invoked_but_not_answered() {
    init_test_logging();

    let broker = test_broker();

    assert_eq!(
        exchange(&broker, json!({"jsonrpc": "2.0", "method": "Counter.increment"})),
        None
    );

    // Failing notifications are not answered either
    assert_eq!(
        exchange(&broker, json!({"jsonrpc": "2.0", "method": "Calc.explode"})),
        None
    );

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Counter.get", "id": 1}));
    assert_eq!(response["result"], json!(1));
}

#[test]
fn static_members_need_no_instance() {
    init_test_logging();

    // A locator that can't locate anything at all
    let broker = test_broker_builder()
        .with_instance_locator(|target: &TargetInfo| -> Result<Instance, LocatorError> {
            Err(LocatorError::not_constructible(target))
        })
        .build();

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.version", "params": [], "id": 1}));
    assert_eq!(response["result"], json!("1.0.0"));

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1, 2], "id": 2}));
    assert_eq!(error_code(&response), -32601);
    assert_eq!(response["error"]["data"]["type"], json!("NotInstantiable"));
}

#[test]
fn describable_failures_carry_their_properties() {
    init_test_logging();

    let broker = test_broker();
    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Accounts.withdraw", "params": ["alice", 500], "id": 3}),
    );

    assert_eq!(error_code(&response), -32000);
    assert_eq!(
        response["error"]["message"],
        json!("Insufficient funds in alice: balance is 100, 500 was requested")
    );

    let data = &response["error"]["data"];
    assert_eq!(data["type"], json!("InsufficientFunds"));
    assert_eq!(
        data["properties"],
        json!({"account": "alice", "balance": 100, "requested": 500})
    );
    assert!(data.get("cause").is_none());

    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Accounts.withdraw", "params": ["alice", 30], "id": 4}),
    );
    assert_eq!(response["result"], json!({"account": "alice", "balance": 70}));
}

#[test]
fn plain_failures_are_server_errors() {
    init_test_logging();

    let broker = test_broker();
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.divide", "params": [1, 0], "id": 1}));

    assert_eq!(error_code(&response), -32000);
    assert_eq!(response["error"]["message"], json!("Division of 1 by zero"));
    assert_eq!(response["error"]["data"]["message"], json!("Division of 1 by zero"));
}

#[test]
fn panics_are_server_errors() {
    init_test_logging();

    let broker = test_broker();
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.explode", "params": [], "id": 1}));

    assert_eq!(error_code(&response), -32000);
    assert_eq!(
        response["error"]["message"],
        json!("Operation panicked: OMG we're all gonna die!")
    );
    assert!(
        response["error"]["data"]["type"]
            .as_str()
            .unwrap()
            .ends_with("Panicked")
    );

    // The broker is still usable afterwards
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1, 1], "id": 2}));
    assert_eq!(response["result"], json!(2));
}

#[test]
fn optional_parameters_accept_null() {
    init_test_logging();

    let broker = test_broker();

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.negate", "params": [5], "id": 1}));
    assert_eq!(response["result"], json!(-5));

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.negate", "params": [null], "id": 2}));
    assert_eq!(response["result"], JsonValue::Null);
}

#[test]
fn custom_instance_locator() {
    init_test_logging();

    let response = call(
        &test_broker(),
        json!({"jsonrpc": "2.0", "method": "Greeter.greet", "params": ["Ferris"], "id": 1}),
    );
    assert_eq!(error_code(&response), -32601);
    assert_eq!(response["error"]["data"]["type"], json!("NotInstantiable"));
    assert_eq!(response["error"]["data"]["cause"]["type"], json!("NotConstructible"));

    let broker = test_broker_builder()
        .with_instance_locator(|target: &TargetInfo| -> Result<Instance, LocatorError> {
            if target.name() == "Greeter" {
                Ok(Arc::new(Greeter::new("Hello")))
            } else {
                DefaultInstanceLocator.instance(target)
            }
        })
        .build();

    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Greeter.greet", "params": ["Ferris"], "id": 1}),
    );
    assert_eq!(response["result"], json!("Hello, Ferris!"));
}

#[test]
fn security_filter_rejects_requests() {
    init_test_logging();

    let broker = test_broker_builder()
        .with_security_filter(|request: &Request| !request.method.starts_with("Accounts."))
        .build();

    let response = call(
        &broker,
        json!({"jsonrpc": "2.0", "method": "Accounts.withdraw", "params": ["alice", 1], "id": 1}),
    );
    assert_eq!(error_code(&response), -32600);
    assert_eq!(
        response["error"]["message"],
        json!("Invocation of Accounts.withdraw not allowed")
    );

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1, 2], "id": 2}));
    assert_eq!(response["result"], json!(3));
}

#[test]
fn interceptor_sees_resolved_call() {
    init_test_logging();

    let seen = Arc::new(AtomicUsize::new(0));
    let broker = test_broker_builder()
        .with_invocation_interceptor({
            let seen = seen.clone();
            move |call: &MethodCall, instance: Option<&Instance>| -> anyhow::Result<()> {
                seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(instance.is_none(), call.member().is_static());

                if call.member().name() == "divide" {
                    anyhow::bail!("Division is disabled");
                }
                Ok(())
            }
        })
        .build();

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1.5, 1], "id": 1}));
    assert_eq!(response["result"], json!(2.5));

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.version", "params": [], "id": 2}));
    assert_eq!(response["result"], json!("1.0.0"));

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.divide", "params": [4, 2], "id": 3}));
    assert_eq!(error_code(&response), -32000);
    assert_eq!(response["error"]["data"]["message"], json!("Division is disabled"));

    // Requests that don't resolve never reach the interceptor
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.nope", "params": [], "id": 4}));
    assert_eq!(error_code(&response), -32601);

    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[test]
fn return_value_handler() {
    init_test_logging();

    let broker = test_broker_builder()
        .with_return_value_handler(|value: JsonValue| -> anyhow::Result<JsonValue> {
            if value.is_string() {
                anyhow::bail!("Strings are not welcome here");
            }
            Ok(json!({"value": value}))
        })
        .build();

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1, 2], "id": 1}));
    assert_eq!(response["result"], json!({"value": 3}));

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.version", "params": [], "id": 2}));
    assert_eq!(error_code(&response), -32603);
    assert_eq!(response["id"], json!(2));
    assert_eq!(
        response["error"]["data"]["message"],
        json!("Strings are not welcome here")
    );
}

#[test]
fn response_handler_rewrites_and_fails() {
    init_test_logging();

    let broker = test_broker_builder()
        .with_response_handler(|mut response: Response| -> anyhow::Result<Response> {
            let number = match &response.id {
                Id::Number(number) => number.as_i64(),
                _ => None,
            };
            match number {
                Some(13) => anyhow::bail!("Unlucky request"),
                Some(n) => {
                    response.id = Id::from(n * 100);
                    Ok(response)
                }
                None => Ok(response),
            }
        })
        .build();

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1, 2], "id": 1}));
    assert_eq!(response, json!({"jsonrpc": "2.0", "result": 3, "id": 100}));

    // Error responses are post-processed too
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.nope", "params": [], "id": 2}));
    assert_eq!(error_code(&response), -32601);
    assert_eq!(response["id"], json!(200));

    // When the handler fails, the original id gets a fallback error that is not post-processed
    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1, 2], "id": 13}));
    assert_eq!(error_code(&response), -32000);
    assert_eq!(response["id"], json!(13));
    assert_eq!(response["error"]["data"]["message"], json!("Unlucky request"));
}

#[test]
fn panicking_hooks_are_reported() {
    init_test_logging();

    fn panicked(response: &JsonValue) -> bool {
        response["error"]["data"]["type"]
            .as_str()
            .is_some_and(|name| name.ends_with("Panicked"))
    }

    let add = json!({"jsonrpc": "2.0", "method": "Calc.add", "params": [1, 2], "id": 1});

    let broker = test_broker_builder()
        .with_security_filter(|_: &Request| -> bool { panic!("filter bug") })
        .build();
    let response = call(&broker, add.clone());
    assert_eq!(error_code(&response), -32603);
    assert_eq!(response["id"], json!(1));
    assert!(panicked(&response), "{response}");

    let broker = test_broker_builder()
        .with_invocation_interceptor(|_: &MethodCall, _: Option<&Instance>| -> anyhow::Result<()> {
            panic!("interceptor bug")
        })
        .build();
    let response = call(&broker, add.clone());
    assert_eq!(error_code(&response), -32000);
    assert!(panicked(&response), "{response}");

    let broker = test_broker_builder()
        .with_return_value_handler(|_: JsonValue| -> anyhow::Result<JsonValue> { panic!("return value bug") })
        .build();
    let response = call(&broker, add.clone());
    assert_eq!(error_code(&response), -32603);
    assert!(panicked(&response), "{response}");

    let broker = test_broker_builder()
        .with_response_handler(|_: Response| -> anyhow::Result<Response> { panic!("response bug") })
        .build();
    let response = call(&broker, add.clone());
    assert_eq!(error_code(&response), -32000);
    assert_eq!(response["id"], json!(1));
    assert!(panicked(&response), "{response}");

    // A panicking hook doesn't take the broker down with it
    let response = call(&broker, add);
    assert_eq!(error_code(&response), -32000);
}

#[test]
fn handle_skips_response_handler() {
    init_test_logging();

    let broker = test_broker_builder()
        .with_response_handler(|_response: Response| -> anyhow::Result<Response> {
            anyhow::bail!("Never called by handle")
        })
        .build();

    let response = broker
        .handle(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3],"id":1}"#)
        .unwrap();
    assert_eq!(response.id, Id::from(1));
    assert_eq!(response.result(), Some(&json!(5)));

    let response = broker.handle(r#"{"jsonrpc":"2.0","method":"Calc.nope","id":2}"#).unwrap();
    assert_eq!(response.error_details().unwrap().code, ErrorCode::MethodNotFound);

    assert!(
        broker
            .handle(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3]}"#)
            .is_none()
    );
}

#[test]
fn config_controls_output() {
    init_test_logging();

    let config = BrokerConfig::from_yaml_str(
        r#"
prettyPrint: true
maxCauseDepth: 1
includeStackFrames: false
slowInvocationThreshold: 10s
"#,
    )
    .unwrap();

    let broker = Broker::builder().with_registry(test_registry()).with_config(config).build();
    assert!(broker.config().pretty_print);

    let output = broker
        .process(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3],"id":1}"#)
        .unwrap();
    assert!(output.contains('\n'));

    // The locator failure is the cause of the instantiation failure, but only one level is
    // serialized
    let response = decode_output(broker.process(r#"{"jsonrpc":"2.0","method":"Greeter.greet","params":["x"],"id":2}"#))
        .unwrap();
    let data = &response["error"]["data"];
    assert_eq!(data["type"], json!("NotInstantiable"));
    assert_eq!(data["truncated"], json!(true));
    assert!(data.get("cause").is_none());
    assert_eq!(data["stackFrames"], json!([]));
}

#[test]
fn process_stream() {
    init_test_logging();

    let broker = test_broker();
    let mut output = Vec::new();
    broker
        .process_stream(
            Cursor::new(r#"{"jsonrpc":"2.0","method":"Calc.add","params":[2,3],"id":1}"#),
            &mut output,
        )
        .unwrap();

    assert_eq!(
        serde_json::from_slice::<JsonValue>(&output).unwrap(),
        json!({"jsonrpc": "2.0", "result": 5, "id": 1})
    );
}

#[tokio::test]
async fn process_async_stream_over_duplex() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    init_test_logging();

    let broker = test_broker();
    let (mut client, server) = tokio::io::duplex(1024);
    let (server_read, server_write) = tokio::io::split(server);

    client
        .write_all(br#"{"jsonrpc":"2.0","method":"Accounts.withdraw","params":["bob",25],"id":"w1"}"#)
        .await
        .unwrap();
    // Half-close so that the broker sees the end of the request
    client.shutdown().await.unwrap();

    broker.process_async_stream(server_read, server_write).await.unwrap();

    let mut output = String::new();
    client.read_to_string(&mut output).await.unwrap();
    assert_eq!(
        serde_json::from_str::<JsonValue>(&output).unwrap(),
        json!({"jsonrpc": "2.0", "result": {"account": "bob", "balance": 75}, "id": "w1"})
    );
}

#[test]
fn broker_is_shared_between_threads() {
    init_test_logging();

    let broker = test_broker();

    let handles = (0..8)
        .map(|_| {
            let broker = broker.clone();
            std::thread::spawn(move || {
                call(
                    &broker,
                    json!({"jsonrpc": "2.0", "method": "Counter.increment", "params": [], "id": 1}),
                )
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        assert!(handle.join().unwrap()["result"].is_i64());
    }

    let response = call(&broker, json!({"jsonrpc": "2.0", "method": "Counter.get", "params": [], "id": 2}));
    assert_eq!(response["result"], json!(8));
}
