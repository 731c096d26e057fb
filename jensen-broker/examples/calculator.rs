//! A calculator target served over a line-oriented connection: the "client" writes one JSON-RPC
//! request per line, and the broker answers each request that isn't a notification on its own
//! line.
use futures::{SinkExt, StreamExt};
use jensen_broker::{Broker, DescribableFailure, Properties, Registry, TargetBuilder};
use serde_json::{Value as JsonValue, json};
use tokio::io::duplex;
use tokio_util::codec::{Framed, LinesCodec};

#[derive(Debug, Default)]
struct Calculator;

#[derive(Debug, thiserror::Error)]
#[error("Cannot divide {dividend} by zero")]
struct DivideByZero {
    dividend: f64,
}

impl DescribableFailure for DivideByZero {
    fn type_name(&self) -> &'static str {
        "DivideByZero"
    }

    fn describe(&self, properties: &mut Properties) {
        properties.accessor("getDividend", self.dividend);
    }
}

impl Calculator {
    fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    fn concat(&self, a: String, b: String) -> String {
        a + &b
    }

    fn divide(&self, a: f64, b: f64) -> Result<f64, DivideByZero> {
        if b == 0.0 {
            return Err(DivideByZero { dividend: a });
        }
        Ok(a / b)
    }
}

#[tokio::main]
async fn main() {
    let broker = Broker::builder()
        .with_registry(
            Registry::new().with_target(
                TargetBuilder::<Calculator>::new("Calculator")
                    .method("add", Calculator::add)
                    .method("add", Calculator::concat)
                    .method("divide", Calculator::divide),
            ),
        )
        .build();

    // Create a pair of connected pipes that will serve as the connection between client and broker
    let (client, server) = duplex(1024);

    // Create framed transports with a reasonable max size to avoid DoS vulns
    let mut client = Framed::new(client, LinesCodec::new_with_max_length(1024 * 1024));
    let mut server = Framed::new(server, LinesCodec::new_with_max_length(1024 * 1024));

    let server_task = tokio::spawn(async move {
        while let Some(Ok(line)) = server.next().await {
            let broker = broker.clone();
            let output = tokio::task::spawn_blocking(move || broker.process(&line)).await.unwrap();
            if let Some(output) = output {
                server.send(output).await.unwrap();
            }
        }
    });

    let requests = [
        json!({"jsonrpc": "2.0", "method": "Calculator.add", "params": [2, 3], "id": 1}),
        json!({"jsonrpc": "2.0", "method": "Calculator.add", "params": ["foo", "bar"], "id": 2}),
        json!({"jsonrpc": "2.0", "method": "Calculator.divide", "params": [1, 0], "id": 3}),
        json!({"jsonrpc": "2.0", "method": "Calculator.add", "params": [true, 1], "id": 4}),
    ];

    for request in requests {
        println!("→ {request}");
        client.send(request.to_string()).await.unwrap();

        let response: JsonValue = serde_json::from_str(&client.next().await.unwrap().unwrap()).unwrap();
        println!("← {}", serde_json::to_string_pretty(&response).unwrap());
    }

    // Closing the client side ends the server loop
    drop(client);
    server_task.await.unwrap();
}
