//! Plugin runtime integration tests
//! Run with: cargo test --test plugin_runtime

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use tokio::sync::mpsc;

use strix_bot::application::errors::PluginError;
use strix_bot::application::messaging::{ActivityTracker, EventPayload};
use strix_bot::domain::entities::{Message, MessageAuthor, OutboundMessage, Platform};
use strix_bot::infrastructure::config::Config;
use strix_bot::infrastructure::database::Storage;
use strix_bot::plugins::{
    Communicator, EntryModule, Injection, InjectionBindings, ModuleLoader, PluginManager,
    RuntimeContext,
};
use strix_bot::infrastructure::adapters::console::ConsoleHost;

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Entry module built from a closure, so tests can register behavior under
/// any loader key.
struct FnEntry<F>(F)
where
    F: Fn(&mut Communicator) -> Result<(), PluginError> + Send + Sync;

impl<F> EntryModule for FnEntry<F>
where
    F: Fn(&mut Communicator) -> Result<(), PluginError> + Send + Sync,
{
    fn setup(&self, comm: &mut Communicator) -> Result<(), PluginError> {
        (self.0)(comm)
    }
}

/// Listener bundle that counts `message` deliveries.
struct Counting {
    counter: Arc<AtomicUsize>,
    last_content: Arc<Mutex<String>>,
}

impl Injection for Counting {
    fn bindings(self: Arc<Self>) -> InjectionBindings {
        InjectionBindings::new().listen("message", {
            let this = self.clone();
            move |payload| {
                let this = this.clone();
                async move {
                    if let EventPayload::Message(message) = payload {
                        this.counter.fetch_add(1, Ordering::SeqCst);
                        *this.last_content.lock().unwrap() = message.content;
                    }
                    Ok(())
                }
            }
        })
    }
}

/// Listener bundle whose `message` listener always fails.
struct Failing;

impl Injection for Failing {
    fn bindings(self: Arc<Self>) -> InjectionBindings {
        InjectionBindings::new().listen("message", |_payload| async {
            Err(PluginError::Listener("deliberate failure".to_string()))
        })
    }
}

struct TestBed {
    _dir: tempfile::TempDir,
    plugin_root: PathBuf,
    storage: Storage,
    loader: Arc<ModuleLoader>,
    config: Config,
    ctx: Arc<RuntimeContext>,
    _outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

fn test_bed() -> TestBed {
    ensure_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let plugin_root = dir.path().join("plugins");
    std::fs::create_dir_all(&plugin_root).expect("plugin root");

    let storage = Storage::open(dir.path().join("system.db")).expect("storage");
    let plugin_db = Storage::open_in_memory().expect("plugin db");

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let host = Arc::new(ConsoleHost::new(
        vec!["!".to_string()],
        storage.clone(),
        outbound.clone(),
    ));

    let ctx = Arc::new(RuntimeContext {
        storage: storage.clone(),
        plugin_db,
        host,
        outbound,
        handle: tokio::runtime::Handle::current(),
        activity: ActivityTracker::default(),
    });

    let mut config = Config::default();
    config.plugins.directory = plugin_root.clone();
    // Nothing listens here; transfer tests only need a fast failure.
    config.hub.base_url = "http://127.0.0.1:1/".to_string();
    config.monitor.enabled = false;

    TestBed {
        _dir: dir,
        plugin_root,
        storage,
        loader: Arc::new(ModuleLoader::new()),
        config,
        ctx,
        _outbound_rx: outbound_rx,
    }
}

fn manager_for(bed: &TestBed) -> PluginManager {
    PluginManager::new(bed.ctx.clone(), bed.loader.clone(), &bed.config)
}

fn write_plugin(root: &Path, dir_name: &str, manifest: &serde_json::Value) -> PathBuf {
    let dir = root.join(dir_name);
    std::fs::create_dir_all(&dir).expect("plugin dir");
    std::fs::write(dir.join("plugin.json"), manifest.to_string()).expect("manifest");
    dir
}

fn manifest(identifier: &str, loader: &str) -> serde_json::Value {
    serde_json::json!({
        "identifier": identifier,
        "name": "T",
        "description": "d",
        "version": "1",
        "author": "x",
        "loader": loader
    })
}

fn twitch_message(content: &str) -> Message {
    Message::new(Platform::Twitch, MessageAuthor::new(1, "viewer"), content)
        .with_channel_name("console")
}

async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
}

#[tokio::test]
async fn discovery_skips_directories_without_a_manifest() {
    let bed = test_bed();
    bed.loader.register("main", || Box::new(FnEntry(|_comm: &mut Communicator| Ok(()))));

    std::fs::create_dir_all(bed.plugin_root.join("not_a_plugin")).unwrap();
    std::fs::write(bed.plugin_root.join("stray_file"), "x").unwrap();
    write_plugin(&bed.plugin_root, "real", &manifest("acme.real", "main"));

    let mut manager = manager_for(&bed);
    manager.discover().await.expect("discover");

    assert_eq!(manager.len(), 1);
    assert!(manager.load_errors().is_empty());
    assert!(manager.get("acme.real").is_some());
}

#[tokio::test]
async fn invalid_manifest_fails_before_the_entry_module_runs() {
    let bed = test_bed();
    let executed = Arc::new(AtomicBool::new(false));
    let spy = executed.clone();
    bed.loader.register("spy", move || {
        let spy = spy.clone();
        Box::new(FnEntry(move |_comm: &mut Communicator| {
            spy.store(true, Ordering::SeqCst);
            Ok(())
        }))
    });

    let mut bad = manifest("acme.bad", "spy");
    bad.as_object_mut().unwrap().remove("version");
    let path = write_plugin(&bed.plugin_root, "bad", &bad);

    let mut manager = manager_for(&bed);
    let err = manager.load(&path).await.unwrap_err();
    assert!(matches!(err, PluginError::Validation(_)));
    assert!(
        !executed.load(Ordering::SeqCst),
        "entry module must never execute for an invalid manifest"
    );

    // The same failure during a scan is collected, not propagated.
    manager.discover().await.expect("discover");
    assert_eq!(manager.len(), 0);
    assert_eq!(manager.load_errors().len(), 1);
}

#[tokio::test]
async fn duplicate_identifier_leaves_the_first_instance_untouched() {
    let bed = test_bed();
    let counter = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(Mutex::new(String::new()));
    let (c, l) = (counter.clone(), last.clone());
    bed.loader.register("main", move || {
        let (c, l) = (c.clone(), l.clone());
        Box::new(FnEntry(move |comm: &mut Communicator| {
            comm.inject(Counting {
                counter: c.clone(),
                last_content: l.clone(),
            })
        }))
    });

    let first = write_plugin(&bed.plugin_root, "first", &manifest("acme.dup", "main"));
    let second = write_plugin(&bed.plugin_root, "second", &manifest("acme.dup", "main"));

    let mut manager = manager_for(&bed);
    manager.load(&first).await.expect("first load");
    let err = manager.load(&second).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert_eq!(manager.len(), 1);

    // The surviving instance still dispatches.
    manager.get("acme.dup").unwrap().enable().unwrap();
    manager.dispatch_message(&twitch_message("hello"));
    settle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disable_persists_across_manager_reconstruction() {
    let bed = test_bed();
    bed.loader.register("main", || Box::new(FnEntry(|_comm: &mut Communicator| Ok(()))));
    let path = write_plugin(&bed.plugin_root, "p", &manifest("acme.persist", "main"));

    {
        let mut manager = manager_for(&bed);
        manager.load(&path).await.expect("load");
        let handler = manager.get("acme.persist").unwrap();
        handler.enable().unwrap();
        assert!(handler.is_enabled());
        handler.disable().unwrap();
        manager.unload_all().await;
    }

    let mut manager = manager_for(&bed);
    manager.load(&path).await.expect("reload");
    assert!(!manager.get("acme.persist").unwrap().is_enabled());

    // And the enabled state round-trips too.
    manager.get("acme.persist").unwrap().enable().unwrap();
    let row = bed.storage.plugin_row("acme.persist").unwrap().unwrap();
    assert!(row.enabled);
}

#[tokio::test]
async fn one_failing_listener_never_blocks_a_sibling_plugin() {
    let bed = test_bed();
    let counter = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(Mutex::new(String::new()));

    bed.loader.register("failing", || {
        Box::new(FnEntry(|comm: &mut Communicator| comm.inject(Failing)))
    });
    let (c, l) = (counter.clone(), last.clone());
    bed.loader.register("counting", move || {
        let (c, l) = (c.clone(), l.clone());
        Box::new(FnEntry(move |comm: &mut Communicator| {
            comm.inject(Counting {
                counter: c.clone(),
                last_content: l.clone(),
            })
        }))
    });

    write_plugin(&bed.plugin_root, "a", &manifest("acme.failing", "failing"));
    write_plugin(&bed.plugin_root, "b", &manifest("acme.counting", "counting"));

    let mut manager = manager_for(&bed);
    manager.discover().await.expect("discover");
    manager.get("acme.failing").unwrap().enable().unwrap();
    manager.get("acme.counting").unwrap().enable().unwrap();

    manager.dispatch_message(&twitch_message("x"));
    settle().await;

    assert_eq!(
        counter.load(Ordering::SeqCst),
        1,
        "plugin B's listener must run exactly once despite plugin A failing"
    );
}

#[tokio::test]
async fn injecting_the_same_type_twice_is_rejected() {
    let bed = test_bed();
    let counter = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(Mutex::new(String::new()));
    let second_inject: Arc<Mutex<Option<PluginError>>> = Arc::new(Mutex::new(None));

    let (c, l, s) = (counter.clone(), last.clone(), second_inject.clone());
    bed.loader.register("main", move || {
        let (c, l, s) = (c.clone(), l.clone(), s.clone());
        Box::new(FnEntry(move |comm: &mut Communicator| {
            comm.inject(Counting {
                counter: c.clone(),
                last_content: l.clone(),
            })?;
            let err = comm
                .inject(Counting {
                    counter: c.clone(),
                    last_content: l.clone(),
                })
                .unwrap_err();
            *s.lock().unwrap() = Some(err);
            Ok(())
        }))
    });

    let path = write_plugin(&bed.plugin_root, "p", &manifest("acme.twice", "main"));
    let mut manager = manager_for(&bed);
    manager.load(&path).await.expect("load");

    let rejected = second_inject.lock().unwrap().take().expect("second inject must fail");
    assert!(matches!(rejected, PluginError::Configuration(_)));

    // Exactly one registration stays active.
    manager.get("acme.twice").unwrap().enable().unwrap();
    manager.dispatch_message(&twitch_message("x"));
    settle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn settings_round_trip_with_and_without_a_file() {
    let bed = test_bed();
    bed.loader.register("main", || Box::new(FnEntry(|_comm: &mut Communicator| Ok(()))));

    // File-backed plugin.
    let mut with_file = manifest("acme.saved", "main");
    with_file["save_file"] = serde_json::json!("settings.json");
    let saved_dir = write_plugin(&bed.plugin_root, "saved", &with_file);

    // Memory-only plugin.
    write_plugin(&bed.plugin_root, "memory", &manifest("acme.memory", "main"));

    let mut manager = manager_for(&bed);
    manager.discover().await.expect("discover");

    let spec = serde_json::json!({
        "commands": { "hello": { "enabled": true } },
        "greeting": "hi there"
    });

    for id in ["acme.saved", "acme.memory"] {
        let handler = manager.get(id).unwrap();
        handler.set_spec(spec.clone()).expect("set_spec");
        assert_eq!(handler.get_spec()["existing_settings"], spec, "{}", id);
    }

    // The file-backed copy landed on disk and is read back on a fresh load.
    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(saved_dir.join("settings.json")).unwrap())
            .unwrap();
    assert_eq!(on_disk, spec);

    manager.unload_all().await;
    let mut manager = manager_for(&bed);
    manager.load(&saved_dir).await.expect("fresh load");
    assert_eq!(
        manager.get("acme.saved").unwrap().get_spec()["existing_settings"],
        spec
    );
}

#[tokio::test]
async fn failed_download_reports_a_message_and_leaves_no_artifacts() {
    let bed = test_bed();
    let mut manager = manager_for(&bed);

    let before: Vec<_> = std::fs::read_dir(&bed.plugin_root)
        .unwrap()
        .flatten()
        .map(|e| e.file_name())
        .collect();

    // The hub is unreachable; the call must surface a readable string and
    // never propagate an error past the boundary.
    let report = manager.download_plugin("acme.ghost").await;
    assert!(!report.is_empty());
    assert_eq!(manager.len(), 0);

    let after: Vec<_> = std::fs::read_dir(&bed.plugin_root)
        .unwrap()
        .flatten()
        .map(|e| e.file_name())
        .collect();
    assert_eq!(before, after, "no partial install may be left behind");
}

#[tokio::test]
async fn end_to_end_message_dispatch_reaches_an_injected_listener() {
    let bed = test_bed();
    let counter = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(Mutex::new(String::new()));

    let (c, l) = (counter.clone(), last.clone());
    bed.loader.register("main", move || {
        let (c, l) = (c.clone(), l.clone());
        Box::new(FnEntry(move |comm: &mut Communicator| {
            comm.inject(Counting {
                counter: c.clone(),
                last_content: l.clone(),
            })
        }))
    });

    let path = write_plugin(&bed.plugin_root, "p", &manifest("a.b", "main"));
    let mut manager = manager_for(&bed);
    manager.load(&path).await.expect("load");
    manager.get("a.b").unwrap().enable().unwrap();

    manager.dispatch_message(&twitch_message("good evening"));
    settle().await;

    assert_eq!(counter.load(Ordering::SeqCst), 1, "on_message runs exactly once");
    assert_eq!(*last.lock().unwrap(), "good evening", "listener sees the projection");
}

#[tokio::test]
async fn disabled_plugins_receive_no_dispatch() {
    let bed = test_bed();
    let counter = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(Mutex::new(String::new()));

    let (c, l) = (counter.clone(), last.clone());
    bed.loader.register("main", move || {
        let (c, l) = (c.clone(), l.clone());
        Box::new(FnEntry(move |comm: &mut Communicator| {
            comm.inject(Counting {
                counter: c.clone(),
                last_content: l.clone(),
            })
        }))
    });

    let path = write_plugin(&bed.plugin_root, "p", &manifest("acme.off", "main"));
    let mut manager = manager_for(&bed);
    manager.load(&path).await.expect("load");
    // Fresh registry rows start disabled.
    assert!(!manager.get("acme.off").unwrap().is_enabled());

    manager.dispatch_message(&twitch_message("x"));
    settle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

/// Commands bundle: `!hello` writes into the counter when enabled.
struct Greeter {
    calls: Arc<AtomicUsize>,
}

impl Injection for Greeter {
    fn bindings(self: Arc<Self>) -> InjectionBindings {
        InjectionBindings::new().command("hello", {
            let this = self;
            move |_message| {
                let this = this.clone();
                async move {
                    this.calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
    }
}

#[tokio::test]
async fn commands_run_only_when_settings_enable_them() {
    let bed = test_bed();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    bed.loader.register("main", move || {
        let c = c.clone();
        Box::new(FnEntry(move |comm: &mut Communicator| {
            comm.inject(Greeter { calls: c.clone() })
        }))
    });

    let path = write_plugin(&bed.plugin_root, "p", &manifest("acme.greeter", "main"));
    let mut manager = manager_for(&bed);
    manager.load(&path).await.expect("load");
    let handler = manager.get("acme.greeter").unwrap();
    handler.enable().unwrap();

    // Disabled by default: unknown and disabled names are silently ignored.
    manager.dispatch_message(&twitch_message("!hello chat"));
    manager.dispatch_message(&twitch_message("!nosuchcommand"));
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    manager
        .get("acme.greeter")
        .unwrap()
        .set_spec(serde_json::json!({ "commands": { "hello": { "enabled": true } } }))
        .unwrap();
    manager.dispatch_message(&twitch_message("!hello chat"));
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reload_tears_down_and_rebuilds_the_instance() {
    let bed = test_bed();
    let setups = Arc::new(AtomicUsize::new(0));
    let unloads = Arc::new(AtomicUsize::new(0));

    struct Watcher {
        unloads: Arc<AtomicUsize>,
    }
    impl Injection for Watcher {
        fn bindings(self: Arc<Self>) -> InjectionBindings {
            InjectionBindings::new().listen("will_unload", {
                let this = self;
                move |_payload| {
                    let this = this.clone();
                    async move {
                        this.unloads.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            })
        }
    }

    let (s, u) = (setups.clone(), unloads.clone());
    bed.loader.register("main", move || {
        let (s, u) = (s.clone(), u.clone());
        Box::new(FnEntry(move |comm: &mut Communicator| {
            s.fetch_add(1, Ordering::SeqCst);
            comm.inject(Watcher { unloads: u.clone() })
        }))
    });

    let path = write_plugin(&bed.plugin_root, "p", &manifest("acme.hot", "main"));
    let mut manager = manager_for(&bed);
    manager.load(&path).await.expect("load");
    manager.get("acme.hot").unwrap().enable().unwrap();
    assert_eq!(setups.load(Ordering::SeqCst), 1);

    manager.reload("acme.hot").await.expect("reload");
    settle().await;

    assert_eq!(setups.load(Ordering::SeqCst), 2, "fresh setup after reload");
    assert_eq!(unloads.load(Ordering::SeqCst), 1, "will_unload fired once");
    // Enabled state survives through the registry row.
    assert!(manager.get("acme.hot").unwrap().is_enabled());
}

#[tokio::test]
async fn schema_plugins_attach_and_detach_cleanly() {
    let bed = test_bed();
    bed.loader.register("main", || Box::new(FnEntry(|_comm: &mut Communicator| Ok(()))));

    let mut with_schema = manifest("acme.store", "main");
    with_schema["schema"] = serde_json::json!({
        "database_file": "data.db",
        "name": "store",
        "creation": "CREATE TABLE IF NOT EXISTS store.items (name TEXT);"
    });
    let path = write_plugin(&bed.plugin_root, "p", &with_schema);

    let mut manager = manager_for(&bed);
    manager.load(&path).await.expect("load with schema");

    // Unloading detaches; a second full load must attach again without a
    // name collision.
    manager.reload("acme.store").await.expect("reload reattaches");
    manager.unload_all().await;
    assert!(manager.is_empty());
}

#[tokio::test]
async fn bad_schema_script_aborts_the_load_without_partial_attachment() {
    let bed = test_bed();
    let executed = Arc::new(AtomicBool::new(false));
    let spy = executed.clone();
    bed.loader.register("main", move || {
        let spy = spy.clone();
        Box::new(FnEntry(move |_comm: &mut Communicator| {
            spy.store(true, Ordering::SeqCst);
            Ok(())
        }))
    });

    let mut broken = manifest("acme.broken", "main");
    broken["schema"] = serde_json::json!({
        "database_file": "data.db",
        "name": "broken",
        "creation": "THIS IS NOT SQL;"
    });
    let path = write_plugin(&bed.plugin_root, "p", &broken);

    let mut manager = manager_for(&bed);
    let err = manager.load(&path).await.unwrap_err();
    assert!(matches!(err, PluginError::Validation(_)));
    assert!(!executed.load(Ordering::SeqCst), "setup must not run after a schema failure");

    // The failed attachment was rolled back, so the name is free again.
    let mut ok = manifest("acme.fixed", "main");
    ok["schema"] = serde_json::json!({
        "database_file": "data.db",
        "name": "broken",
        "creation": "CREATE TABLE IF NOT EXISTS broken.items (name TEXT);"
    });
    let path = write_plugin(&bed.plugin_root, "q", &ok);
    manager.load(&path).await.expect("name must be reattachable");
}
