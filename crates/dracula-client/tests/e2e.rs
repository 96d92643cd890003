//! End-to-end tests running real servers and clients over localhost.
//!
//! Each test owns a distinct port range so the suite can run in parallel.

use std::sync::Arc;
use std::time::Duration;

use dracula_client::{Client, ClientError, Config};
use dracula_server::config::ServerConfig;
use dracula_server::Server;

async fn start_server(port: u16, ttl: i64, secret: &str) -> Arc<Server> {
    let server = Arc::new(Server::new(ServerConfig::new(ttl, secret)).unwrap());
    server.listen(port, port).await.unwrap();
    server
}

async fn connect(udp_servers: &str, tcp_servers: &str, secret: &str) -> Arc<Client> {
    connect_with_timeout(udp_servers, tcp_servers, secret, Duration::from_secs(2)).await
}

async fn connect_with_timeout(
    udp_servers: &str,
    tcp_servers: &str,
    secret: &str,
    timeout: Duration,
) -> Arc<Client> {
    let client = Arc::new(
        Client::new(Config {
            udp_servers: udp_servers.to_string(),
            tcp_servers: tcp_servers.to_string(),
            timeout,
            pre_shared_key: secret.to_string(),
        })
        .unwrap(),
    );
    client.listen(0).await.unwrap();
    client
}

#[tokio::test(flavor = "multi_thread")]
async fn test_put_and_count() {
    let server = start_server(19010, 60, "").await;
    let client = connect("127.0.0.1:19010", "", "").await;

    for _ in 0..5 {
        client.put("default", "bren.msdc.co").await.unwrap();
    }
    assert_eq!(client.count("default", "bren.msdc.co").await.unwrap(), 5);
    assert_eq!(client.count("other", "bren.msdc.co").await.unwrap(), 0);
    assert_eq!(client.count("default", "unseen").await.unwrap(), 0);

    client.close();
    server.close().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pre_shared_key_auth() {
    let secret = "asdf-jkl-HOHOHO!";
    let server = start_server(19020, 60, secret).await;

    let good = connect("127.0.0.1:19020", "", secret).await;
    good.put("asdf", "99.33.22.44").await.unwrap();
    assert_eq!(good.count("asdf", "99.33.22.44").await.unwrap(), 1);

    let bad = connect("127.0.0.1:19020", "", "Brute-Force9").await;
    let err = bad.put("asdf", "99.33.22.44").await.unwrap_err();
    assert_eq!(err.to_string(), "auth failed: packet hash invalid");

    // the failed put must not have counted
    assert_eq!(good.count("asdf", "99.33.22.44").await.unwrap(), 1);

    good.close();
    bad.close();
    server.close().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cluster_replication() {
    let secret = "asdf";
    let all_peers = "127.0.0.1:19210,127.0.0.1:19220,127.0.0.1:19230";

    let mut servers = Vec::new();
    for port in [19210u16, 19220, 19230] {
        let self_peer = format!("127.0.0.1:{port}");
        let config = ServerConfig::new(60, secret)
            .with_peer_list(&self_peer, all_peers)
            .unwrap();
        let server = Arc::new(Server::new(config).unwrap());
        server.listen(port, port).await.unwrap();
        assert_eq!(server.peers().len(), 2);
        servers.push(server);
    }

    let client1 = connect("127.0.0.1:19210", "", secret).await;
    client1.put("default", "asdf").await.unwrap();

    let client2 = connect("127.0.0.1:19210,127.0.0.1:19220", "", secret).await;
    for _ in 0..5 {
        client2.put("default", "asdf").await.unwrap();
    }

    // replication is async fan-out; give the datagrams a moment
    tokio::time::sleep(Duration::from_millis(300)).await;

    for (i, server) in servers.iter().enumerate() {
        assert_eq!(
            server.store().count("default", "asdf"),
            6,
            "server {i} disagrees"
        );
    }

    client1.close();
    client2.close();
    for server in &servers {
        server.close().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_pool_health() {
    let alive_a = start_server(19240, 60, "").await;
    let alive_b = start_server(19250, 60, "").await;

    // the third endpoint's port is out of range, so it can never answer a
    // probe; it must still be accepted and tracked as unhealthy
    let client = connect_with_timeout(
        "127.0.0.1:19240,127.0.0.1:19250,127.0.0.1:99999",
        "",
        "",
        Duration::from_millis(500),
    )
    .await;

    let healthy = client.list_healthy();
    let unhealthy = client.list_unhealthy();
    assert_eq!(
        healthy,
        vec![
            "127.0.0.1:19240".parse().unwrap(),
            "127.0.0.1:19250".parse().unwrap()
        ]
    );
    assert_eq!(unhealthy, vec!["127.0.0.1:99999".parse().unwrap()]);

    client.close();
    alive_a.close().unwrap();
    alive_b.close().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_healthy_servers() {
    // nothing listens on 19255
    let client =
        connect_with_timeout("127.0.0.1:19255", "", "", Duration::from_millis(300)).await;
    assert!(matches!(
        client.put("ns", "k").await,
        Err(ClientError::NoHealthyUdpServers)
    ));
    client.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_key_match_over_tcp() {
    let server = start_server(19260, 60, "").await;
    let client = connect("127.0.0.1:19260", "127.0.0.1:19260", "").await;

    for key in ["blah", "blat", "blah:ce", "blah:2", "blah:a", "blaM!"] {
        client.put("default", key).await.unwrap();
    }
    client.put("other", "blah:other").await.unwrap();

    let mut matched = client.key_match("default", "blah*").await.unwrap();
    matched.sort();
    assert_eq!(matched, vec!["blah", "blah:2", "blah:a", "blah:ce"]);

    assert!(client
        .key_match("notexisting", "blah*")
        .await
        .unwrap()
        .is_empty());

    client.close();
    server.close().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_namespaces_over_tcp() {
    let server = start_server(19280, 60, "").await;
    let client = connect("127.0.0.1:19280", "127.0.0.1:19280", "").await;

    client.put("alpha", "k").await.unwrap();
    client.put("beta", "k").await.unwrap();

    let mut namespaces = client.list_namespaces().await.unwrap();
    namespaces.sort();
    assert_eq!(namespaces, vec!["alpha", "beta"]);

    client.close();
    server.close().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_namespace_and_server_counts() {
    let server = start_server(19290, 60, "").await;
    let client = connect("127.0.0.1:19290", "", "").await;

    client.put("ns1", "a").await.unwrap();
    client.put("ns1", "a").await.unwrap();
    client.put("ns1", "b").await.unwrap();
    client.put("ns2", "c").await.unwrap();

    assert_eq!(client.count_namespace("ns1").await.unwrap(), 3);
    assert_eq!(client.count_namespace("missing").await.unwrap(), 0);
    assert_eq!(client.count_server().await.unwrap(), 4);

    client.close();
    server.close().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_entries_expire() {
    let server = start_server(19270, 2, "").await;
    let client = connect("127.0.0.1:19270", "127.0.0.1:19270", "").await;

    client.put("x", "k").await.unwrap();
    client.put("x", "k").await.unwrap();
    assert_eq!(client.count("x", "k").await.unwrap(), 2);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(client.count("x", "k").await.unwrap(), 0);
    assert_eq!(client.count_namespace("x").await.unwrap(), 0);
    assert!(client.key_match("x", "*").await.unwrap().is_empty());

    client.close();
    server.close().unwrap();
}
