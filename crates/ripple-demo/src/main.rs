//! # Ripple Demo
//!
//! Replays a scripted navigation session against an in-memory platform.
//! A router maps note URLs to actions on a sorted record set backed by an
//! in-memory store, and every record, set and route event is logged.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ripple-demo
//!
//! # Start somewhere else
//! RIPPLE_START_URL=/#notes ripple-demo
//!
//! # Quieter output
//! RUST_LOG=ripple=info ripple-demo
//! ```

mod config;
mod store;

use anyhow::{Context, Result};
use config::DemoConfig;
use ripple_core::value::attrs;
use ripple_core::{
    Comparator, Events, ModelEvent, Options, RecordSet, RecordType, ValidationError,
};
use ripple_nav::{History, MemoryPlatform, Platform, Router, WatchStrategy};
use serde_json::{json, Value};
use std::rc::Rc;
use store::MemoryStore;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ROUTES: &[(&str, &str)] = &[
    ("notes", "list"),
    ("notes/new/:title", "create"),
    ("notes/:id", "show"),
    ("notes/:id/rename/:title", "rename"),
    ("notes/:id/delete", "delete"),
    ("*path", "not_found"),
];

fn note_type(store: Rc<MemoryStore>) -> Rc<RecordType> {
    RecordType::new("note")
        .with_defaults(attrs(json!({"title": "", "done": false})))
        .with_validator(|a| match a.get("title").and_then(Value::as_str) {
            Some(title) if !title.trim().is_empty() => Ok(()),
            _ => Err(ValidationError::new("title must not be empty")),
        })
        .with_persistence(store)
        .build()
}

fn watch_notes(notes: &RecordSet) {
    notes.on_fn("add remove change:title destroy", |name, event| {
        if let Some(record) = event.record() {
            info!(
                event = name,
                client_id = %record.client_id(),
                title = %record.escape("title"),
                index = ?event.index(),
                "Note event"
            );
        }
    });
    notes.on_fn("error", |_, event| {
        if let ModelEvent::Error { error, .. } = event {
            warn!(error = %error, "Note error");
        }
    });
}

fn define_actions(router: &Router, notes: &RecordSet) {
    let set = notes.clone();
    router.define("list", move |_| {
        let titles: Vec<String> = set.members().iter().map(|n| n.escape("title")).collect();
        info!(count = titles.len(), titles = ?titles, "Listing notes");
    });

    let set = notes.clone();
    router.define("create", move |args| {
        let title = args.first().cloned().unwrap_or_default();
        if set.where_attrs(&attrs(json!({ "title": title }))).is_empty() {
            if let Err(error) = set.create(json!({ "title": title }), &Options::default()) {
                warn!(error = %error, "Create failed");
            }
        } else {
            info!(title = %title, "Note exists");
        }
    });

    let set = notes.clone();
    router.define("show", move |args| {
        let id = args.first().cloned().unwrap_or_default();
        match set.get(&Value::from(id.as_str())) {
            Some(note) => info!(id = %id, note = %note.to_json(), "Showing note"),
            None => warn!(id = %id, "No such note"),
        }
    });

    let set = notes.clone();
    router.define("rename", move |args| {
        let (Some(id), Some(title)) = (args.first(), args.get(1)) else {
            return;
        };
        if let Some(note) = set.get(&Value::from(id.as_str())) {
            let changes = attrs(json!({ "title": title }));
            if let Err(error) = note.save(Some(changes), &Options::default()) {
                warn!(error = %error, "Rename failed");
            }
        }
    });

    let set = notes.clone();
    router.define("delete", move |args| {
        let id = args.first().cloned().unwrap_or_default();
        if let Some(note) = set.get(&Value::from(id.as_str())) {
            if let Err(error) = note.destroy(&Options::default().with_wait()) {
                warn!(error = %error, "Delete failed");
            }
        }
    });

    router.define("not_found", |args| {
        warn!(path = ?args, "No route");
    });
}

async fn replay(history: &History, platform: &MemoryPlatform, script: &[String]) {
    if history.strategy() == Some(WatchStrategy::Polling) {
        let period = history.config().interval() * 2;
        let drive = async {
            for step in script {
                platform.set_location_quietly(&format!("#{step}"));
                tokio::time::sleep(period).await;
            }
            history.stop();
        };
        tokio::join!(history.run_polling(), drive);
        return;
    }

    for step in script {
        history.navigate(step, true);
    }
    if platform.back() {
        info!(fragment = ?history.fragment(), "Went back");
    }
    history.stop();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DemoConfig::load()?;
    info!(start_url = %config.start_url, steps = config.script.len(), "Starting Ripple demo");

    let store = Rc::new(MemoryStore::new());
    let notes = RecordSet::with_comparator(
        note_type(store.clone()),
        Comparator::by_attribute("title"),
    );
    watch_notes(&notes);

    let platform = Rc::new(MemoryPlatform::with_capabilities(
        &config.start_url,
        config.platform.push_state,
        config.platform.hash_change,
    ));
    let history = History::new(platform.clone());
    history.on_fn("route", |_, event| {
        info!(router = ?event.router, name = %event.name, args = ?event.args, "Routed");
    });

    let router = Router::with_routes(&history, ROUTES).context("Failed to bind routes")?;
    define_actions(&router, &notes);

    let matched = history
        .start(config.history.clone())
        .context("Failed to start history")?;
    info!(matched, strategy = ?history.strategy(), "History running");

    replay(&history, &platform, &config.script).await;

    info!(
        url = %platform.location(),
        stored = store.len(),
        notes = %serde_json::to_string(&notes.to_json())?,
        "Session finished"
    );

    Ok(())
}
