use rrply_proto::directory::{Channel, ChannelDirectory};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

const WEEK: Duration = Duration::from_secs(604_800);

fn fetched() -> ChannelDirectory {
    [
        Channel { id: 42, title: "Classic Metal".into() },
        Channel { id: 7, title: "Blues Rock".into() },
    ]
    .into_iter()
    .collect()
}

fn set_age(path: &Path, age: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

async fn load(path: &Path, fetches: &AtomicUsize) -> ChannelDirectory {
    ChannelDirectory::load_or_refresh(path, WEEK, || async {
        fetches.fetch_add(1, Ordering::SeqCst);
        Ok(fetched())
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn cache_is_regenerated_only_once_a_week_old() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rrply").join("data.json");
    let fetches = AtomicUsize::new(0);

    // First run writes the cache
    assert_eq!(load(&path, &fetches).await, fetched());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        raw,
        serde_json::json!({
            "7": {"Id": 7, "Title": "Blues Rock"},
            "42": {"Id": 42, "Title": "Classic Metal"}
        })
    );

    // A hand-edited cache one minute short of a week is still served
    std::fs::write(&path, r#"{"1": {"Id": 1, "Title": "Cached"}}"#).unwrap();
    set_age(&path, WEEK - Duration::from_secs(60));
    let directory = load(&path, &fetches).await;
    assert_eq!(directory.menu_lines(), vec!["1 - Cached"]);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // Past a week it is fetched and rewritten
    set_age(&path, WEEK + Duration::from_secs(60));
    assert_eq!(load(&path, &fetches).await, fetched());
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(ChannelDirectory::load(&path).unwrap(), fetched());
}

#[tokio::test]
async fn failed_fetch_leaves_no_cache_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");

    let result = ChannelDirectory::load_or_refresh(&path, WEEK, || async {
        anyhow::bail!("landing page unreachable")
    })
    .await;

    assert!(result.is_err());
    assert!(!path.exists());
}
