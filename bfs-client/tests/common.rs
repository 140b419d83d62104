use bfs_client::local::LocalCluster;
use bfs_client::{CallPolicy, ClientConfig, FileSystemClient};
use std::time::Duration;

#[allow(dead_code)]
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Short timeouts so failure paths finish quickly.
#[allow(dead_code)]
pub fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .namespace(CallPolicy::new(Duration::from_millis(500), 2))
        .read_block(CallPolicy::new(Duration::from_millis(500), 2))
        .write_block(CallPolicy::new(Duration::from_secs(5), 1))
}

#[allow(dead_code)]
pub async fn tcp_cluster(replicas: usize) -> (LocalCluster, FileSystemClient) {
    let cluster = LocalCluster::start("127.0.0.1:0", replicas).await.unwrap();
    let client = cluster.client(fast_config()).await.unwrap();
    (cluster, client)
}
