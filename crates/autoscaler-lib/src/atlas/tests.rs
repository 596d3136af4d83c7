//! Atlas client tests against a local mock server

mod mock_api_tests {
    use crate::atlas::{
        AtlasClient, AtlasClientBuilder, AtlasCredentials, ControlPlane, MeasurementWindow,
        MetricsSource,
    };
    use crate::error::AtlasError;
    use crate::models::{
        LifecycleState, MemberRef, ProcessRole, ResizeRequest, DISK_PARTITION_IOPS_READ,
        DISK_PARTITION_IOPS_WRITE,
    };
    use mockito::{Matcher, Server};

    fn client(server: &Server, private_key: Option<&str>) -> AtlasClient {
        AtlasClientBuilder::new("p1", "db2")
            .base_url(server.url())
            .credentials(AtlasCredentials {
                public_key: "pub".to_string(),
                private_key: private_key.map(str::to_string),
            })
            .build()
            .unwrap()
    }

    fn cluster_body() -> String {
        r#"{
            "name": "db2",
            "stateName": "IDLE",
            "diskSizeGB": 40.0,
            "mongoURI": "mongodb://db2-shard-00-00.abc.mongodb.net:27017,db2-shard-00-01.abc.mongodb.net:27017",
            "providerSettings": {
                "providerName": "GCP",
                "instanceSizeName": "M30",
                "regionName": "WESTERN_EUROPE"
            }
        }"#
        .to_string()
    }

    fn processes_body(base: &str) -> String {
        format!(
            r#"{{"results": [
                {{"id": "db2-shard-00-00.abc.mongodb.net:27017", "userAlias": "db2-shard-00-00.abc.mongodb.net",
                  "port": 27017, "typeName": "REPLICA_PRIMARY",
                  "links": [{{"rel": "self", "href": "{base}/processes/p0"}}]}},
                {{"id": "db2-shard-00-01.abc.mongodb.net:27017", "userAlias": "db2-shard-00-01.abc.mongodb.net",
                  "port": 27017, "typeName": "REPLICA_SECONDARY",
                  "links": [{{"rel": "self", "href": "{base}/processes/p1"}}]}},
                {{"id": "other-cluster-00.abc.mongodb.net:27017", "userAlias": "other-cluster-00.abc.mongodb.net",
                  "port": 27017, "typeName": "REPLICA_PRIMARY",
                  "links": [{{"rel": "self", "href": "{base}/processes/x9"}}]}}
            ]}}"#
        )
    }

    fn window_query() -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("granularity".into(), "PT1M".into()),
            Matcher::UrlEncoded("period".into(), "PT1H".into()),
        ])
    }

    #[tokio::test]
    async fn test_cluster_state_filters_members() {
        let mut server = Server::new_async().await;
        let cluster = server
            .mock("GET", "/groups/p1/clusters/db2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(cluster_body())
            .create_async()
            .await;
        let processes = server
            .mock("GET", "/groups/p1/processes")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(processes_body(&server.url()))
            .create_async()
            .await;

        let state = client(&server, None).cluster_state().await.unwrap();

        cluster.assert_async().await;
        processes.assert_async().await;

        assert_eq!(state.size_name, "M30");
        assert_eq!(state.lifecycle_state, LifecycleState::Idle);
        assert_eq!(state.provider, "GCP");
        assert_eq!(state.region, "WESTERN_EUROPE");
        assert_eq!(state.disk_size_gb, Some(40.0));
        assert_eq!(state.members.len(), 2);
        assert_eq!(state.members[0].role, ProcessRole::Primary);
        assert_eq!(state.members[0].alias, "db2-shard-00-00.abc.mongodb.net:27017");
        assert!(state.members[0].locator.ends_with("/processes/p0"));
        assert_eq!(state.members[1].role, ProcessRole::Secondary);
    }

    #[tokio::test]
    async fn test_cluster_state_surfaces_http_errors() {
        let mut server = Server::new_async().await;
        let _cluster = server
            .mock("GET", "/groups/p1/clusters/db2")
            .with_status(404)
            .with_body(r#"{"detail": "No cluster named db2 exists in group p1."}"#)
            .create_async()
            .await;

        let err = client(&server, None).cluster_state().await.unwrap_err();
        assert!(matches!(err, AtlasError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_member_metrics_merges_process_and_disk_series() {
        let mut server = Server::new_async().await;
        let process = server
            .mock("GET", Matcher::Regex(r"^/processes/p0/measurements".into()))
            .match_query(window_query())
            .with_status(200)
            .with_body(
                r#"{"measurements": [
                    {"name": "CONNECTIONS", "dataPoints": [{"timestamp": "2021-02-19T10:00:00Z", "value": 12}]}
                ]}"#,
            )
            .create_async()
            .await;
        let disk = server
            .mock("GET", Matcher::Regex(r"^/processes/p0/disks/data/measurements".into()))
            .match_query(window_query())
            .with_status(200)
            .with_body(
                r#"{"measurements": [
                    {"name": "DISK_PARTITION_IOPS_READ", "dataPoints": [
                        {"timestamp": "2021-02-19T10:00:00Z", "value": 1253.62},
                        {"timestamp": "2021-02-19T10:01:00Z", "value": null},
                        {"timestamp": "2021-02-19T10:02:00Z", "value": 1232.57}
                    ]},
                    {"name": "DISK_PARTITION_IOPS_WRITE", "dataPoints": [
                        {"timestamp": "2021-02-19T10:00:00Z", "value": 1.68},
                        {"timestamp": "2021-02-19T10:02:00Z", "value": 1.81}
                    ]}
                ]}"#,
            )
            .create_async()
            .await;

        let member = MemberRef {
            id: "p0".to_string(),
            alias: "h0:27017".to_string(),
            locator: format!("{}/processes/p0", server.url()),
            role: ProcessRole::Primary,
        };

        let metrics = client(&server, None)
            .member_metrics(&member, MeasurementWindow::LAST_HOUR_BY_MINUTE)
            .await
            .unwrap();

        process.assert_async().await;
        disk.assert_async().await;

        assert_eq!(metrics.len(), 3);
        let read: Vec<f64> = metrics[DISK_PARTITION_IOPS_READ]
            .samples()
            .iter()
            .map(|m| m.value)
            .collect();
        assert_eq!(read, vec![1253.62, 1232.57]);
        assert_eq!(metrics[DISK_PARTITION_IOPS_WRITE].len(), 2);
    }

    #[tokio::test]
    async fn test_resize_sends_provider_settings() {
        let mut server = Server::new_async().await;
        let patch = server
            .mock("PATCH", "/groups/p1/clusters/db2")
            .match_body(Matcher::Json(serde_json::json!({
                "providerSettings": {
                    "providerName": "GCP",
                    "instanceSizeName": "M40",
                    "regionName": "WESTERN_EUROPE"
                }
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let request = ResizeRequest {
            cluster_name: "db2".to_string(),
            provider: "GCP".to_string(),
            region: "WESTERN_EUROPE".to_string(),
            size_name: "M40".to_string(),
        };
        client(&server, None).resize(&request).await.unwrap();

        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_resize_rejected() {
        let mut server = Server::new_async().await;
        let _patch = server
            .mock("PATCH", "/groups/p1/clusters/db2")
            .with_status(409)
            .with_body(r#"{"errorCode": "CLUSTER_ALREADY_UPDATING"}"#)
            .create_async()
            .await;

        let request = ResizeRequest {
            cluster_name: "db2".to_string(),
            provider: "GCP".to_string(),
            region: "WESTERN_EUROPE".to_string(),
            size_name: "M40".to_string(),
        };
        let err = client(&server, None).resize(&request).await.unwrap_err();

        match err {
            AtlasError::Status { status, body } => {
                assert_eq!(status, 409);
                assert!(body.contains("CLUSTER_ALREADY_UPDATING"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_digest_challenge_is_answered() {
        let mut server = Server::new_async().await;
        let challenge = server
            .mock("GET", "/groups/p1/clusters/db2")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header(
                "www-authenticate",
                r#"Digest realm="MMS Public API", domain="", nonce="n0nce", algorithm=MD5, qop="auth", stale=false"#,
            )
            .create_async()
            .await;
        let authorized = server
            .mock("GET", "/groups/p1/clusters/db2")
            .match_header(
                "authorization",
                Matcher::Regex(r#"^Digest username="pub", realm="MMS Public API", nonce="n0nce", uri="/groups/p1/clusters/db2""#.into()),
            )
            .with_status(200)
            .with_body(cluster_body())
            .create_async()
            .await;
        let _processes = server
            .mock("GET", "/groups/p1/processes")
            .with_status(200)
            .with_body(r#"{"results": []}"#)
            .create_async()
            .await;

        let state = client(&server, Some("secret")).cluster_state().await.unwrap();

        challenge.assert_async().await;
        authorized.assert_async().await;
        assert_eq!(state.size_name, "M30");
        assert!(state.members.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_without_private_key() {
        let mut server = Server::new_async().await;
        let _challenge = server
            .mock("GET", "/groups/p1/clusters/db2")
            .with_status(401)
            .with_header("www-authenticate", r#"Digest realm="MMS Public API", nonce="n0nce", qop="auth""#)
            .create_async()
            .await;

        let err = client(&server, None).cluster_state().await.unwrap_err();
        assert!(matches!(err, AtlasError::Status { status: 401, .. }));
    }

    #[test]
    fn test_build_rejects_bad_base_url() {
        let result = AtlasClientBuilder::new("p1", "db2").base_url("not a url").build();
        assert!(matches!(result, Err(AtlasError::InvalidUrl(_))));
    }
}
