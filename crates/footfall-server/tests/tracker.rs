use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::Request;

use footfall_core::memory::MemoryStore;
use footfall_core::{GeoDb, HitOptions, TrackerConfig};
use footfall_server::tracker::Tracker;

fn request(path: &str) -> Request<()> {
    Request::builder()
        .uri(path)
        .header("user-agent", "valid")
        .body(())
        .expect("build request")
}

fn request_from(path: &str, addr: &str) -> Request<()> {
    let mut req = request(path);
    let addr: SocketAddr = format!("{addr}:4711").parse().expect("socket addr");
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

fn config() -> TrackerConfig {
    TrackerConfig {
        worker_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn hits_are_flushed_after_the_worker_timeout() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(
        store.clone(),
        "salt",
        TrackerConfig {
            worker_timeout: Duration::from_millis(100),
            ..Default::default()
        },
    );

    tracker.hit(&request("/"), None).await;
    tracker.hit(&request("/hello-world"), None).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut paths: Vec<_> = store.hits().into_iter().map(|h| h.path).collect();
    paths.sort();
    assert_eq!(paths, vec!["/".to_string(), "/hello-world".to_string()]);
    tracker.stop().await;
}

#[tokio::test]
async fn stop_flushes_every_accepted_hit() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(
        store.clone(),
        "salt",
        TrackerConfig {
            worker: 1,
            worker_buffer_size: 10,
            worker_timeout: Duration::from_secs(60),
            ..Default::default()
        },
    );

    for _ in 0..7 {
        tracker.hit(&request("/"), None).await;
    }
    tracker.stop().await;

    assert_eq!(store.hits().len(), 7);
}

#[tokio::test]
async fn full_queue_and_stopped_tracker_discard_hits() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(
        store.clone(),
        "salt",
        TrackerConfig {
            worker: 1,
            worker_buffer_size: 5,
            worker_timeout: Duration::from_secs(60),
            ..Default::default()
        },
    );

    for i in 0..10 {
        tracker.hit(&request("/"), None).await;
        if i > 3 {
            tracker.stop().await;
        }
    }

    assert_eq!(store.hits().len(), 5);
}

#[tokio::test]
async fn stop_twice_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(store.clone(), "salt", config());
    tracker.hit(&request("/"), None).await;
    tracker.stop().await;
    tracker.stop().await;
    tracker.hit(&request("/late"), None).await;

    let hits = store.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/");
}

#[tokio::test]
async fn sessions_are_shared_within_the_window() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(
        store.clone(),
        "salt",
        TrackerConfig {
            sessions: true,
            ..config()
        },
    );

    tracker.hit(&request("/"), None).await;
    tracker.hit(&request("/hello-world"), None).await;
    tracker.stop().await;

    let hits = store.hits();
    assert_eq!(hits.len(), 2);
    let first = hits[0].session.expect("session set");
    assert_eq!(hits[1].session, Some(first));
}

#[tokio::test]
async fn sessions_disabled_leave_session_empty() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(store.clone(), "salt", config());
    tracker.hit(&request("/"), None).await;
    tracker.stop().await;

    assert_eq!(store.hits()[0].session, None);
}

#[tokio::test]
async fn blacklisted_referrers_are_cleared() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(store.clone(), "salt", config());
    let req = request_from("/", "81.2.69.142");

    let cases = [
        (vec!["pirsch.io"], false, "https://pirsch.io/"),
        (vec!["pirsch.io"], true, "https://www.pirsch.io/"),
        (vec!["pirsch.io", "www.pirsch.io"], false, "https://www.pirsch.io/"),
        (vec!["pirsch.io"], false, "pirsch.io"),
    ];
    for (blacklist, subdomains, referrer) in cases {
        tracker
            .hit(
                &req,
                Some(HitOptions {
                    referrer: Some(referrer.to_string()),
                    referrer_domain_blacklist: Some(
                        blacklist.into_iter().map(str::to_string).collect(),
                    ),
                    referrer_domain_blacklist_includes_subdomains: Some(subdomains),
                    ..Default::default()
                }),
            )
            .await;
    }
    tracker.stop().await;

    let hits = store.hits();
    assert_eq!(hits.len(), 4);
    for hit in hits {
        assert_eq!(hit.referrer, None);
        assert_eq!(hit.referrer_name, None);
    }
}

#[tokio::test]
async fn referrers_resolve_from_options_header_and_query() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(
        store.clone(),
        "salt",
        TrackerConfig {
            worker: 1,
            referrer_domain_blacklist: vec!["pirsch.io".to_string()],
            ..config()
        },
    );

    // Subdomains are not blocked by default.
    tracker
        .hit(
            &request("/"),
            Some(HitOptions {
                referrer: Some("https://www.pirsch.io/blog?x=1".to_string()),
                ..Default::default()
            }),
        )
        .await;

    let with_header = Request::builder()
        .uri("/")
        .header("user-agent", "valid")
        .header("referer", "https://news.ycombinator.com/item?id=1")
        .body(())
        .expect("build request");
    tracker.hit(&with_header, None).await;

    tracker.hit(&request("/?ref=example.co.uk"), None).await;
    tracker.stop().await;

    let hits = store.hits();
    let referrers: Vec<_> = hits
        .iter()
        .map(|h| (h.referrer.as_deref(), h.referrer_name.as_deref()))
        .collect();
    assert_eq!(
        referrers,
        vec![
            (Some("https://www.pirsch.io/blog"), Some("pirsch.io")),
            (
                Some("https://news.ycombinator.com/item"),
                Some("ycombinator.com")
            ),
            (Some("https://example.co.uk/"), Some("example.co.uk")),
        ]
    );
}

struct FakeGeoDb;

impl GeoDb for FakeGeoDb {
    fn country_code(&self, ip: IpAddr) -> Option<String> {
        (ip.to_string() == "81.2.69.142").then(|| "gb".to_string())
    }
}

#[tokio::test]
async fn country_codes_come_from_the_geo_db() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(store.clone(), "salt", config());
    tracker.set_geo_db(Some(Arc::new(FakeGeoDb)));

    tracker.hit(&request_from("/", "81.2.69.142"), None).await;
    tracker.hit(&request_from("/hello-world", "127.0.0.1"), None).await;
    tracker.stop().await;

    let mut countries: Vec<_> = store.hits().into_iter().map(|h| h.country_code).collect();
    countries.sort();
    assert_eq!(countries, vec!["".to_string(), "gb".to_string()]);
}

#[tokio::test]
async fn bots_are_dropped_silently() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(store.clone(), "salt", config());

    let googlebot = Request::builder()
        .uri("/")
        .header(
            "user-agent",
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        )
        .body(())
        .expect("build request");
    let anonymous = Request::builder().uri("/").body(()).expect("build request");
    tracker.hit(&googlebot, None).await;
    tracker.hit(&anonymous, None).await;
    tracker.hit(&request("/"), None).await;
    tracker.stop().await;

    assert_eq!(store.hits().len(), 1);
}

#[tokio::test]
async fn store_errors_drop_the_batch() {
    let store = Arc::new(MemoryStore::new());
    store.set_failing(true);
    let tracker = Tracker::new(store.clone(), "salt", config());
    tracker.hit(&request("/"), None).await;
    tracker.stop().await;

    store.set_failing(false);
    assert!(store.hits().is_empty());
}

#[tokio::test]
async fn hits_are_enriched_from_request_and_options() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(store.clone(), "salt", config());

    let req = Request::builder()
        .uri("/api/hit")
        .header(
            "user-agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        )
        .header("accept-language", "de-DE,de;q=0.9")
        .header("x-forwarded-for", "203.0.113.9")
        .body(())
        .expect("build request");
    let mut options = HitOptions {
        tenant_id: Some(9),
        url: Some("https://example.com/blog?utm_source=mail&utm_medium=email".to_string()),
        screen_width: 1920,
        screen_height: 1080,
        ..Default::default()
    };
    options.meta.insert("author".to_string(), "ada".to_string());
    tracker.hit(&req, Some(options)).await;
    tracker.stop().await;

    let hits = store.hits();
    let hit = hits.first().expect("saved hit");
    assert_eq!(hit.tenant_id, Some(9));
    assert_eq!(hit.path, "/blog");
    assert_eq!(hit.language, "de");
    assert_eq!(hit.browser, "Chrome");
    assert!(hit.desktop);
    assert!(!hit.mobile);
    assert_eq!(hit.screen_class, "Full HD");
    assert_eq!(hit.utm_source.as_deref(), Some("mail"));
    assert_eq!(hit.utm_medium.as_deref(), Some("email"));
    assert_eq!(hit.utm_campaign, None);
    assert_eq!(hit.meta.get("author").map(String::as_str), Some("ada"));
    assert_eq!(hit.fingerprint.len(), 16);
}

#[tokio::test]
async fn fingerprints_ignore_the_path_but_not_the_signal() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Tracker::new(
        store.clone(),
        "salt",
        TrackerConfig {
            worker: 1,
            ..config()
        },
    );

    tracker.hit(&request_from("/", "81.2.69.142"), None).await;
    tracker.hit(&request_from("/other", "81.2.69.142"), None).await;
    tracker
        .hit(
            &request_from("/", "81.2.69.142"),
            Some(HitOptions {
                visitor_signal: Some("tab-2".to_string()),
                ..Default::default()
            }),
        )
        .await;
    tracker.stop().await;

    let hits = store.hits();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].fingerprint, hits[1].fingerprint);
    assert_ne!(hits[0].fingerprint, hits[2].fingerprint);
}
