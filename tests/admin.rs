//! Admin API tests.

use rr_proxy::load_balancer::{BackendId, FailureKind};
use serde_json::Value;

mod common;
use common::*;

const KEY: &str = "test-admin-key";

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn admin_proxy() -> RunningProxy {
    let a = start_named_backend("A").await;
    let b = start_named_backend("B").await;
    let mut config = proxy_config(&[a.addr, b.addr]);
    config.admin.enabled = true;
    config.admin.api_key = KEY.to_string();
    config.admin.bind_address = "127.0.0.1:0".to_string();
    start_proxy(config).await
}

#[tokio::test]
async fn requires_bearer_token() {
    let proxy = admin_proxy().await;
    let url = format!("http://{}/admin/status", proxy.admin_addr.unwrap());
    let client = client();

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client.get(&url).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client.get(&url).bearer_auth(KEY).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["policy"], "round_robin");
    assert_eq!(status["backends_total"], 2);
}

#[tokio::test]
async fn backends_report_health_summary() {
    let proxy = admin_proxy().await;
    for _ in 0..3 {
        proxy.registry.record_failure(BackendId(1), FailureKind::ConnectRefused);
    }
    get(proxy.addr).await;

    let url = format!("http://{}/admin/backends", proxy.admin_addr.unwrap());
    let backends: Vec<Value> = client()
        .get(&url)
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0]["healthy"], true);
    assert_eq!(backends[0]["total_successes"], 1);
    assert_eq!(backends[0]["active_connections"], 0);
    assert_eq!(backends[1]["healthy"], false);
    assert_eq!(backends[1]["consecutive_failures"], 3);
    assert_eq!(backends[1]["last_failure"], "connect_refused");

    let status: Value = client()
        .get(format!("http://{}/admin/status", proxy.admin_addr.unwrap()))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "degraded");
    assert_eq!(status["backends_healthy"], 1);
}
