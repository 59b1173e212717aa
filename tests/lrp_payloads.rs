//! Desired LRP payloads and the receptor client.

mod common;

use std::time::Duration;

use serde_json::json;

use tcp_routing_verify::control::lrp::{parse_tcp_routes, DesiredLrp, DesiredLrpUpdate, TcpRoute};
use tcp_routing_verify::control::receptor::ReceptorClient;
use tcp_routing_verify::error::ControlError;
use tcp_routing_verify::{BackendHandle, PollPolicy, WorkloadControl};

use common::http_stub::HttpStub;

fn receiver_lrp() -> DesiredLrp {
    DesiredLrp::tcp_receiver(
        "guid-1",
        &[5222],
        &[TcpRoute::new(64000, 5222)],
        "server-1",
        1,
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[test]
fn receiver_lrp_runs_the_sample_receiver() {
    let lrp = receiver_lrp();
    let value = serde_json::to_value(&lrp).unwrap();

    assert_eq!(value["process_guid"], "guid-1");
    assert_eq!(value["instances"], 1);
    assert_eq!(value["ports"], json!([5222]));
    assert_eq!(value["action"]["run"]["path"], "sh");
    assert_eq!(
        value["action"]["run"]["args"][1],
        "/tmp/tcp-sample-receiver --address 0.0.0.0:5222 --server-id server-1"
    );
    assert_eq!(value["monitor"]["run"]["args"][1], "nc -z 0.0.0.0 5222");
    assert_eq!(
        value["routes"],
        json!({"tcp-router": [{"external_port": 64000, "container_port": 5222}]})
    );
    assert_eq!(value["egress_rules"].as_array().unwrap().len(), 2);
}

#[test]
fn several_container_ports_listen_on_each() {
    let lrp = DesiredLrp::tcp_receiver("g", &[5222, 5223], &[], "s", 2).unwrap();
    assert!(lrp.action.run.args[1].contains("--address 0.0.0.0:5222,0.0.0.0:5223"));
    assert_eq!(lrp.routes["tcp-router"], json!([]));
}

#[test]
fn receiver_lrp_validates_input() {
    assert!(matches!(
        DesiredLrp::tcp_receiver("g", &[], &[], "s", 1),
        Err(ControlError::InvalidRequest(_))
    ));
    assert!(matches!(
        DesiredLrp::tcp_receiver("g", &[5222], &[], "s", -1),
        Err(ControlError::InvalidRequest(_))
    ));
}

#[test]
fn router_group_is_serialized_only_when_set() {
    let routes = [
        TcpRoute::new(64000, 5222),
        TcpRoute::new(64001, 5222).in_router_group("rg-1"),
    ];
    let lrp = DesiredLrp::tcp_receiver("g", &[5222], &routes, "s", 1).unwrap();
    assert_eq!(
        lrp.routes["tcp-router"],
        json!([
            {"external_port": 64000, "container_port": 5222},
            {"router_group_guid": "rg-1", "external_port": 64001, "container_port": 5222}
        ])
    );
    assert_eq!(parse_tcp_routes(&lrp.routes).unwrap(), routes);
}

#[test]
fn update_omits_unset_fields() {
    let update = DesiredLrpUpdate::default();
    assert!(update.is_empty());
    assert_eq!(serde_json::to_value(&update).unwrap(), json!({}));

    let update = DesiredLrpUpdate::default().instances(3);
    assert_eq!(serde_json::to_value(&update).unwrap(), json!({"instances": 3}));
}

// ---------------------------------------------------------------------------
// ReceptorClient
// ---------------------------------------------------------------------------

#[tokio::test]
async fn desire_update_and_delete() {
    let stub = HttpStub::start().await;
    let client = ReceptorClient::new(&stub.base_url);

    client.desire_lrp(&receiver_lrp()).await.unwrap();
    let update = DesiredLrpUpdate::default()
        .tcp_routes(&[TcpRoute::new(64002, 5222)])
        .unwrap();
    client.update_desired_lrp("guid-1", &update).await.unwrap();
    client.delete_desired_lrp("guid-1").await.unwrap();

    let requests = stub.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        (requests[0].method.as_str(), requests[0].path.as_str()),
        ("POST", "/v1/desired_lrps")
    );
    assert_eq!(requests[0].json()["process_guid"], "guid-1");
    assert_eq!(
        (requests[1].method.as_str(), requests[1].path.as_str()),
        ("PUT", "/v1/desired_lrps/guid-1")
    );
    assert_eq!(
        requests[1].json(),
        json!({"routes": {"tcp-router": [{"external_port": 64002, "container_port": 5222}]}})
    );
    assert_eq!(
        (requests[2].method.as_str(), requests[2].path.as_str()),
        ("DELETE", "/v1/desired_lrps/guid-1")
    );
}

#[tokio::test]
async fn list_desired_lrps() {
    let stub = HttpStub::start().await;
    let body = serde_json::to_string(&vec![receiver_lrp()]).unwrap();
    stub.reply_with(200, &body);

    let lrps = ReceptorClient::new(&stub.base_url)
        .desired_lrps()
        .await
        .unwrap();
    assert_eq!(lrps, vec![receiver_lrp()]);
}

#[tokio::test]
async fn wait_running_sees_running_instance() {
    let stub = HttpStub::start().await;
    stub.reply_with(
        200,
        r#"[{"process_guid":"guid-1","index":0,"state":"RUNNING"}]"#,
    );
    let client = ReceptorClient::new(&stub.base_url)
        .poll_policy(PollPolicy::fixed(Duration::from_millis(10)));

    let handle = BackendHandle {
        id: "guid-1".into(),
        identity: "server-1".into(),
        listen_port: 5222,
    };
    assert!(client
        .wait_running(&handle, Duration::from_secs(2))
        .await
        .unwrap());
    assert_eq!(stub.requests()[0].path, "/v1/actual_lrps/guid-1");
}

#[tokio::test]
async fn wait_running_times_out_while_claimed() {
    let stub = HttpStub::start().await;
    stub.reply_with(
        200,
        r#"[{"process_guid":"guid-1","index":0,"state":"CLAIMED"}]"#,
    );
    let client = ReceptorClient::new(&stub.base_url)
        .poll_policy(PollPolicy::fixed(Duration::from_millis(10)));

    let handle = BackendHandle {
        id: "guid-1".into(),
        identity: "server-1".into(),
        listen_port: 5222,
    };
    assert!(!client
        .wait_running(&handle, Duration::from_millis(100))
        .await
        .unwrap());
    assert!(stub.requests().len() > 1);
}

#[tokio::test]
async fn create_backend_desires_a_receiver() {
    let stub = HttpStub::start().await;
    let client = ReceptorClient::new(&stub.base_url);

    let handle = client.create_backend("server-7", 5222).await.unwrap();
    assert_eq!(handle.identity, "server-7");
    assert!(uuid::Uuid::parse_str(&handle.id).is_ok());

    let body = stub.requests()[0].json();
    assert_eq!(body["process_guid"], handle.id.as_str());
    assert!(body["action"]["run"]["args"][1]
        .as_str()
        .unwrap()
        .ends_with("--server-id server-7"));
}

#[tokio::test]
async fn receptor_errors_carry_status() {
    let stub = HttpStub::start().await;
    stub.reply_with(409, "already exists");

    let err = ReceptorClient::new(&stub.base_url)
        .desire_lrp(&receiver_lrp())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ControlError::Status { status: 409, ref body, .. } if body == "already exists"),
        "{err}"
    );
}
