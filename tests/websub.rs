use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Router};
use hubwatch::hub::{topic_url, websub, DeliveryHandler, HubEngine, WebSubEngine};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

type Requests = Arc<Mutex<Vec<HashMap<String, String>>>>;

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn fake_hub(status: StatusCode) -> (String, Requests) {
    async fn accept(
        State((requests, status)): State<(Requests, StatusCode)>,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        requests.lock().await.push(form);
        status
    }

    let requests = Requests::default();
    let router = Router::new()
        .route("/hub", post(accept))
        .with_state((requests.clone(), status));
    let addr = serve(router).await;
    (format!("http://{addr}/hub"), requests)
}

async fn callback_server() -> (Arc<WebSubEngine>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = Arc::new(WebSubEngine::new(format!("http://{addr}/")).unwrap());
    let router = websub::router(engine.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (engine, format!("http://{addr}"))
}

#[derive(Default)]
struct Recorder {
    deliveries: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl DeliveryHandler for Recorder {
    async fn deliver(&self, content_type: &str, body: &[u8]) {
        self.deliveries
            .lock()
            .await
            .push((content_type.to_string(), body.to_vec()));
    }
}

fn http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn lease_lifecycle_over_http() {
    let (hub_url, requests) = fake_hub(StatusCode::ACCEPTED).await;
    let (engine, base) = callback_server().await;
    let recorder = Arc::new(Recorder::default());
    let topic = topic_url("UCwebsub");

    engine
        .subscribe(&hub_url, &topic, recorder.clone())
        .await
        .unwrap();

    let callback = {
        let reqs = requests.lock().await;
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0]["hub.mode"], "subscribe");
        assert_eq!(reqs[0]["hub.topic"], topic);
        assert_eq!(reqs[0]["hub.verify"], "async");
        reqs[0]["hub.callback"].clone()
    };
    assert!(callback.starts_with(&format!("{base}/push-callback/")));
    assert!(!engine.is_active(&topic).await);

    let client = http();
    let res = client
        .get(&callback)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", topic.as_str()),
            ("hub.challenge", "c-123"),
            ("hub.lease_seconds", "432000"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.text().await.unwrap(), "c-123");
    assert!(engine.is_active(&topic).await);

    let res = client
        .get(&callback)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "https://example.com/other"),
            ("hub.challenge", "nope"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);

    let res = client
        .post(&callback)
        .header("Content-Type", "application/atom+xml")
        .body("<feed/>")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    {
        let deliveries = recorder.deliveries.lock().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "application/atom+xml");
        assert_eq!(deliveries[0].1, b"<feed/>");
    }

    let res = client
        .post(format!("{base}/push-callback/unknown"))
        .body("<feed/>")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);

    engine.unsubscribe(&topic).await.unwrap();
    {
        let reqs = requests.lock().await;
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[1]["hub.mode"], "unsubscribe");
        assert_eq!(reqs[1]["hub.callback"], callback);
    }
    assert!(!engine.is_active(&topic).await);

    let res = client.post(&callback).body("<feed/>").send().await.unwrap();
    assert_eq!(res.status().as_u16(), 404);

    let res = client
        .get(&callback)
        .query(&[
            ("hub.mode", "unsubscribe"),
            ("hub.topic", topic.as_str()),
            ("hub.challenge", "bye"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "bye");
    assert!(engine.topics().await.is_empty());

    // Nothing left to cancel: no request goes out.
    engine.unsubscribe(&topic).await.unwrap();
    assert_eq!(requests.lock().await.len(), 2);
}

#[tokio::test]
async fn resubscribe_reuses_callback() {
    let (hub_url, requests) = fake_hub(StatusCode::ACCEPTED).await;
    let (engine, _base) = callback_server().await;
    let topic = topic_url("UCagain");

    engine
        .subscribe(&hub_url, &topic, Arc::new(Recorder::default()))
        .await
        .unwrap();
    engine
        .subscribe(&hub_url, &topic, Arc::new(Recorder::default()))
        .await
        .unwrap();

    let reqs = requests.lock().await;
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0]["hub.callback"], reqs[1]["hub.callback"]);
    assert_eq!(engine.topics().await, vec![topic]);
}

#[tokio::test]
async fn hub_rejection_is_an_error() {
    let (hub_url, _requests) = fake_hub(StatusCode::INTERNAL_SERVER_ERROR).await;
    let (engine, _base) = callback_server().await;
    let topic = topic_url("UCfail");

    let err = engine
        .subscribe(&hub_url, &topic, Arc::new(Recorder::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("hub rejected subscribe"));
    assert!(engine.topics().await.is_empty());
}

/// A hub that holds its first request until `release` fires, then rejects it.
/// Later requests are accepted straight away.
async fn stalling_hub() -> (String, Requests, Arc<Notify>) {
    async fn accept(
        State((requests, release)): State<(Requests, Arc<Notify>)>,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        let first = {
            let mut reqs = requests.lock().await;
            reqs.push(form);
            reqs.len() == 1
        };
        if first {
            release.notified().await;
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        StatusCode::ACCEPTED
    }

    let requests = Requests::default();
    let release = Arc::new(Notify::new());
    let router = Router::new()
        .route("/hub", post(accept))
        .with_state((requests.clone(), release.clone()));
    let addr = serve(router).await;
    (format!("http://{addr}/hub"), requests, release)
}

#[tokio::test]
async fn failed_subscribe_keeps_newer_lease() {
    let (hub_url, requests, release) = stalling_hub().await;
    let (engine, _base) = callback_server().await;
    let topic = topic_url("UCrace");

    let slow = {
        let (engine, hub_url, topic) = (engine.clone(), hub_url.clone(), topic.clone());
        tokio::spawn(async move {
            engine
                .subscribe(&hub_url, &topic, Arc::new(Recorder::default()))
                .await
        })
    };
    while requests.lock().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let newer = Arc::new(Recorder::default());
    engine.subscribe(&hub_url, &topic, newer.clone()).await.unwrap();

    release.notify_one();
    assert!(slow.await.unwrap().is_err());
    assert_eq!(engine.topics().await, vec![topic.clone()]);

    // The surviving lease still takes the hub's verification and deliveries.
    let callback = requests.lock().await[1]["hub.callback"].clone();
    let client = http();
    let res = client
        .get(&callback)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", topic.as_str()),
            ("hub.challenge", "still-here"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "still-here");
    assert!(engine.is_active(&topic).await);

    client.post(&callback).body("<feed/>").send().await.unwrap();
    assert_eq!(newer.deliveries.lock().await.len(), 1);
}
