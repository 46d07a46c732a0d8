//! Hot swap walkthrough
//!
//! Loads two in-memory units, fans a call out across them, swaps one for
//! a newer build and shows that stale builds are turned away.
//!
//! Run with: `RUST_LOG=debug cargo run -p plughub-host --example hot_swap`

use plughub_host::tracing_support::init_subscriber;
use plughub_host::{HubError, Hubs, LoadOptions, MemoryUnit, Unit, Version};
use serde_json::json;
use std::sync::Arc;

fn greeter(version: Version, greeting: &'static str) -> Arc<dyn Unit> {
    MemoryUnit::builder("greeter", version)
        .operation("greet", 1, move |args| {
            let name = args.first().and_then(|v| v.as_str()).unwrap_or("world");
            Ok(vec![json!(format!("{greeting}, {name}"))])
        })
        .on_initialize(move || {
            tracing::info!(greeting, "greeter starting");
            Ok(())
        })
        .on_release(|| {
            tracing::info!("greeter stopping");
            Ok(())
        })
        .shared()
}

fn shouter() -> Arc<dyn Unit> {
    MemoryUnit::builder("shouter", Version::new(0, 3, 0))
        .operation("greet", 1, |args| {
            let name = args.first().and_then(|v| v.as_str()).unwrap_or("world");
            Ok(vec![json!(format!("HEY {}", name.to_uppercase()))])
        })
        .shared()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber()?;

    let hubs = Hubs::new();
    hubs.load_plugin(greeter(Version::new(1, 0, 0), "Hello"))
        .await?;
    hubs.load_plugin_with(shouter(), LoadOptions::default().capacity(4))
        .await?;

    for result in hubs.call("greet", &[json!("plughub")]).await {
        let hub_id = result.hub_id.clone();
        println!("{:?}: {:?}", hub_id, result.into_result()?);
    }

    hubs.load_plugin(greeter("1.1".parse()?, "Howdy")).await?;
    println!("after swap: {:?}", hubs.statuses().await);

    match hubs
        .load_plugin(greeter(Version::new(1, 0, 5), "Hi"))
        .await
    {
        Err(HubError::Version { loaded, offered, .. }) => {
            println!("kept {loaded}, refused {offered}");
        }
        other => println!("unexpected: {other:?}"),
    }

    let (receivers, cancel) = hubs.async_call("greet", &[json!("async")]).await;
    for rx in &receivers {
        if let Some(result) = rx.recv().await {
            println!("{:?}: {:?}", result.hub_id, result.content);
        }
    }
    cancel.cancel();

    for id in hubs.ids().await {
        hubs.unload_plugin(id.as_str()).await?;
    }
    println!("registry empty: {}", hubs.is_empty().await);

    Ok(())
}
