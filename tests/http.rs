use chrono::NaiveDate;
use daily_tracker::domain::is_placeholder_id;
use daily_tracker::models::{
    HabitFilter, HabitPatch, MediaFilter, MediaStatus, MediaType, NewHabit, NewMedia, Toggled,
};
use daily_tracker::{ClientConfig, HabitStore, HttpRemote, MediaStore};
use once_cell::sync::Lazy;
use reqwest::Client;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));

#[cfg(unix)]
mod cleanup {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Once;

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_data_path() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("daily_tracker_http_{}_{}.json", std::process::id(), nanos));
    path.to_string_lossy().to_string()
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/habits")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let port = pick_free_port();
    let data_path = unique_data_path();
    let child = Command::new(env!("CARGO_BIN_EXE_daily_tracker"))
        .env("PORT", port.to_string())
        .env("APP_DATA_PATH", data_path)
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

fn remote(server: &TestServer) -> HttpRemote {
    HttpRemote::from_config(ClientConfig::new(server.base_url.as_str()))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn unique_title(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix} {nanos}")
}

async fn new_habit(store: &HabitStore, prefix: &str) -> String {
    store
        .create_entity(&NewHabit {
            title: unique_title(prefix),
            ..NewHabit::default()
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn http_toggle_round_trip_replaces_placeholder() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let store = HabitStore::new(remote(&server));
    let id = new_habit(&store, "Stretch").await;
    let day = date(2024, 5, 10);

    assert_eq!(store.toggle_record(&id, day).await.unwrap(), Toggled::On);
    let records = store.records(&id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].date, day);
    assert!(!is_placeholder_id(&records[0].id));

    assert_eq!(store.toggle_record(&id, day).await.unwrap(), Toggled::Off);
    assert!(!store.has_record_on(&id, day));

    let fresh = HabitStore::new(remote(&server));
    assert!(fresh.load_all_records(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn http_year_loads_merge_without_dropping_other_years() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let store = HabitStore::new(remote(&server));
    let id = new_habit(&store, "Read").await;
    store.toggle_record(&id, date(2023, 12, 31)).await.unwrap();
    store.toggle_record(&id, date(2024, 1, 1)).await.unwrap();

    let reader = HabitStore::new(remote(&server));
    reader.load_year(&id, 2024).await.unwrap();
    assert_eq!(reader.records(&id).len(), 1);
    reader.load_year(&id, 2023).await.unwrap();

    let dates: Vec<_> = reader.records(&id).iter().map(|entry| entry.date).collect();
    assert_eq!(dates, [date(2023, 12, 31), date(2024, 1, 1)]);
}

#[tokio::test]
async fn http_delete_habit_drops_its_entries() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let store = HabitStore::new(remote(&server));
    let id = new_habit(&store, "Meditate").await;
    store.toggle_record(&id, date(2024, 2, 2)).await.unwrap();

    store.delete_entity(&id).await.unwrap();
    assert!(store.entity(&id).is_none());
    assert!(store.records(&id).is_empty());

    let err = store.load_all_records(&id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn http_errors_carry_server_message_and_leave_state_alone() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let store = HabitStore::new(remote(&server));
    store.load_entities(&HabitFilter::default()).await.unwrap();
    let before = store.entities();

    let err = store
        .update_entity(
            "habit_missing",
            &HabitPatch {
                title: Some("Nope".into()),
                ..HabitPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "habit not found");
    assert_eq!(store.entities(), before);

    let err = store
        .create_entity(&NewHabit {
            title: "  ".into(),
            ..NewHabit::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "title is required");
    assert_eq!(store.entities(), before);

    let err = store.toggle_record("habit_missing", date(2024, 1, 1)).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(store.records("habit_missing").is_empty());
}

#[tokio::test]
async fn http_media_lifecycle_and_filters() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let store = MediaStore::new(remote(&server));
    let title = unique_title("Dune");
    let item = store
        .create_entity(&NewMedia::new(title.as_str(), MediaType::Book))
        .await
        .unwrap();
    assert_eq!(item.status, MediaStatus::Reading);

    let done = store.set_status(&item.id, MediaStatus::Completed).await.unwrap();
    assert_eq!(done.status, MediaStatus::Completed);
    assert_eq!(done.rating, Some(0));

    let err = store.set_status(&item.id, MediaStatus::Playing).await.unwrap_err();
    assert!(err.status().is_none());

    let resumed = store.resume(&item.id).await.unwrap();
    assert_eq!(resumed.status, MediaStatus::Reading);

    let found = store
        .load_entities(&MediaFilter {
            media_type: Some(MediaType::Book),
            status: Some(MediaStatus::Reading),
            search: Some(title.to_uppercase()),
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, item.id);

    let none = store
        .load_entities(&MediaFilter {
            media_type: Some(MediaType::Movie),
            status: None,
            search: Some(title),
        })
        .await
        .unwrap();
    assert!(none.is_empty());

    assert_eq!(
        store.toggle_record(&item.id, date(2024, 3, 3)).await.unwrap(),
        Toggled::On
    );
    store.delete_entity(&item.id).await.unwrap();
    assert!(store.records(&item.id).is_empty());
}

#[tokio::test]
async fn http_concurrent_toggles_of_one_day_apply_in_order() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let store = Arc::new(HabitStore::new(remote(&server)));
    let id = new_habit(&store, "Walk").await;
    let day = date(2024, 6, 1);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move { store.toggle_record(&id, day).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }
    outcomes.sort_by_key(|toggled| *toggled == Toggled::Off);

    assert_eq!(outcomes, [Toggled::On, Toggled::Off]);
    assert!(!store.has_record_on(&id, day));
    assert!(!store.is_toggling(&id, day));

    let fresh = HabitStore::new(remote(&server));
    assert!(fresh.load_all_records(&id).await.unwrap().is_empty());
}
