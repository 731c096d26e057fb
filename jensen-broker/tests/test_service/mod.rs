#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use jensen_broker::{
    Broker, BrokerBuilder, DefaultInstanceLocator, DescribableFailure, Properties, Registry, SingletonInstanceLocator, Stage2,
    TargetBuilder,
};
use serde::{Deserialize, Serialize};

/// Targets whose behavior matches the expectations in the `testdata/` folder, so they can be used
/// to exercise the broker end-to-end.
#[derive(Debug, Default)]
pub struct Calc;

impl Calc {
    fn add_integers(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    fn add_floats(&self, a: f64, b: f64) -> f64 {
        a + b
    }

    fn divide(&self, a: i64, b: i64) -> anyhow::Result<i64> {
        if b == 0 {
            anyhow::bail!("Division of {a} by zero");
        }
        Ok(a / b)
    }

    fn negate(&self, value: Option<i64>) -> Option<i64> {
        value.map(|v| -v)
    }

    fn explode(&self) -> i64 {
        panic!("OMG we're all gonna die!")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Insufficient funds in {account}: balance is {balance}, {requested} was requested")]
pub struct InsufficientFunds {
    pub account: String,
    pub balance: i64,
    pub requested: i64,
}

impl DescribableFailure for InsufficientFunds {
    fn type_name(&self) -> &'static str {
        "InsufficientFunds"
    }

    fn describe(&self, properties: &mut Properties) {
        properties
            .insert("account", &self.account)
            .accessor("getBalance", self.balance)
            .accessor("getRequested", self.requested);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub account: String,
    pub balance: i64,
}

/// Accounts start with a balance of 100 each time the target is instantiated.
#[derive(Debug)]
pub struct Accounts {
    balance: Mutex<i64>,
}

impl Default for Accounts {
    fn default() -> Self {
        Self {
            balance: Mutex::new(100),
        }
    }
}

impl Accounts {
    fn withdraw(&self, account: String, amount: i64) -> Result<Statement, InsufficientFunds> {
        let mut balance = self.balance.lock().unwrap();
        if amount > *balance {
            return Err(InsufficientFunds {
                account,
                balance: *balance,
                requested: amount,
            });
        }

        *balance -= amount;
        Ok(Statement {
            account,
            balance: *balance,
        })
    }
}

/// Counts invocations.  Only useful when registered with a locator that keeps one instance.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicI64,
}

impl Counter {
    fn increment(&self) -> i64 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn get(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// A target that can't be constructed without help from an instance locator.
#[derive(Debug)]
pub struct Greeter {
    greeting: String,
}

impl Greeter {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }

    fn greet(&self, name: String) -> String {
        format!("{}, {name}!", self.greeting)
    }
}

pub fn test_registry() -> Registry {
    Registry::new()
        .with_target(
            TargetBuilder::<Calc>::new("Calc")
                .method("add", Calc::add_integers)
                .method("add", Calc::add_floats)
                .method("divide", Calc::divide)
                .method("negate", Calc::negate)
                .method("explode", Calc::explode)
                .function("version", || "1.0.0"),
        )
        .with_target(TargetBuilder::<Accounts>::new("Accounts").method("withdraw", Accounts::withdraw))
        .with_target(
            TargetBuilder::<Counter>::new("Counter")
                .method("increment", Counter::increment)
                .method("get", Counter::get),
        )
        .with_target(TargetBuilder::<Greeter>::without_constructor("Greeter").method("greet", Greeter::greet))
}

/// A builder for a broker serving the test targets, with `Counter` kept as a singleton so that
/// its state survives from one request to the next.
pub fn test_broker_builder() -> BrokerBuilder<Stage2> {
    Broker::builder()
        .with_registry(test_registry())
        .with_instance_locator(
            SingletonInstanceLocator::new()
                .with_instance(Counter::default())
                .with_fallback(DefaultInstanceLocator),
        )
}

pub fn test_broker() -> Broker {
    test_broker_builder().build()
}
