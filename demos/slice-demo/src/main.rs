//! Tessera Slice Demo
//!
//! Walks through the engine end to end:
//! - A host reducer and two slices sharing one composite state
//! - Immediate and debounced writes
//! - Subscribers notified after each commit
//! - An external write merged against local pending changes

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tessera_core::{Action, ActionType, StateMap, TesseraResult};
use tessera_runtime::{logging, Runtime, RuntimeConfig};
use tessera_state::{DispatchPolicy, SliceHooks, SliceSpec};

#[derive(Debug, Serialize, Deserialize)]
struct Todos {
    items: Vec<String>,
    done: usize,
}

/// Counts dispatched actions and applies `RENAME` from outside any slice
fn host(state: Value, action: &Action) -> TesseraResult<Value> {
    let mut state = if state.is_null() { json!({ "actions": 0 }) } else { state };
    let count = state["actions"].as_u64().unwrap_or(0);
    state["actions"] = json!(count + 1);

    if action.type_name() == "RENAME" {
        tessera_core::set(&mut state, "profile.name", action.payload.clone())?;
    }
    Ok(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::from_env()?;
    logging::init(&config.log);

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           Tessera Slice Demo                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let mut runtime = Runtime::new(config, Arc::new(host))?;

    let hooks = SliceHooks::new()
        .on_init(|slice| tracing::info!(slice = %slice.id(), "todos ready"))
        .on_state_changed(|slice| tracing::debug!(slice = %slice.id(), "todos changed"));
    let todo_spec = SliceSpec::typed(
        "todos",
        &Todos {
            items: Vec::new(),
            done: 0,
        },
    )?
    .with_hooks(hooks);
    let todos = runtime.define("todoService", move || todo_spec)?;

    let profile = runtime.define("profileService", || {
        let initial = json!({ "name": "guest", "theme": "light" });
        let initial = match initial {
            Value::Object(map) => map,
            _ => StateMap::new(),
        };
        SliceSpec::new("profile", initial).with_dispatch(DispatchPolicy::Deferred)
    })?;

    let subscription = todos.subscribe(Arc::new(|state: &StateMap| {
        println!("  todos -> {}", Value::Object(state.clone()));
    }));
    runtime.start();

    println!("Adding todos (immediate dispatch)...");
    for item in ["write slice", "test reducer", "ship"] {
        let mut current: Todos = todos.snapshot()?;
        current.items.push(item.to_string());
        todos.set_typed(&current)?;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    let current: Todos = todos.snapshot()?;
    println!("  {} items, {} done", current.items.len(), current.done);

    println!();
    println!("Renaming locally while an external rename arrives...");
    profile.set("name", json!("ada"))?;
    runtime.dispatch(&Action::new(ActionType::new("RENAME"), json!("grace")))?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    println!("  profile -> {}", Value::Object(profile.state()));

    println!();
    println!("Composite state:");
    println!("{}", serde_json::to_string_pretty(&runtime.state())?);

    subscription.unsubscribe();
    let ran = runtime.shutdown().await;
    println!();
    println!("Driver ran {ran} scheduled tasks");
    Ok(())
}
