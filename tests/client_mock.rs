use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use serde_json::json;

use sproutrs::controller::get_unschedulable_pods;

fn pod_json(
    name: &str,
    unschedulable: bool,
    daemonset_owned: bool,
) -> serde_json::Value {
    let mut pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": "default",
        },
        "spec": {
            "containers": [{
                "name": "worker",
                "image": "busybox",
                "resources": {"requests": {"cpu": "1", "memory": "512Mi"}},
            }],
        },
        "status": {
            "phase": "Pending",
        },
    });
    if unschedulable {
        pod["status"]["conditions"] = json!([{
            "type": "PodScheduled",
            "status": "False",
            "reason": "Unschedulable",
        }]);
    }
    if daemonset_owned {
        pod["metadata"]["ownerReferences"] = json!([{
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "name": "node-agent",
            "uid": "6b9d9f23-0000-0000-0000-000000000000",
        }]);
    }
    pod
}

#[tokio::test]
async fn lists_pending_pods_and_keeps_only_unschedulable_non_daemonset_ones() {
    let (mock_service, mut handle) =
        tower_test::mock::pair::<Request<Body>, Response<Body>>();

    let api_server = tokio::spawn(async move {
        let (request, send) = handle.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        let uri = request.uri().to_string();
        assert!(uri.contains("/api/v1/pods"), "unexpected uri {uri}");
        assert!(uri.contains("fieldSelector"), "unexpected uri {uri}");

        let pod_list = json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {"resourceVersion": "1"},
            "items": [
                pod_json("stuck-app", true, false),
                pod_json("node-agent-abc12", true, true),
                pod_json("still-initializing", false, false),
            ],
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&pod_list).unwrap()))
                .unwrap(),
        );
    });

    let client = Client::new(mock_service, "default");
    let pods = get_unschedulable_pods(client).await.unwrap();

    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].metadata.name.as_deref(), Some("stuck-app"));
    api_server.await.unwrap();
}
