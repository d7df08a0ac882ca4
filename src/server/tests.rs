//! Server Module Tests
//!
//! End-to-end tests over loopback TCP: one coordinator and two shards, each running the
//! real accept loop against its own scratch directory.
//!
//! ## Test Scopes
//! - **Round trips**: Upload then download per category, landing on the owning node.
//! - **Delete**: Repeated and follow-up operations on removed files.
//! - **Aggregation**: `display` across all three nodes and `dtar` per category.
//! - **Concurrency**: Independent sessions at the same time.
//! - **Lifecycle**: Malformed input over a socket and listener shutdown.

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::error::{Error, TransportError};
    use crate::routing::router::Router;
    use crate::routing::types::{Category, ShardMapping};
    use crate::server::listener;
    use crate::session::types::NodeContext;
    use crate::storage::node::StorageNode;
    use crate::transport::relay;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct Cluster {
        client: Client,
        dir: tempfile::TempDir,
    }

    impl Cluster {
        fn path(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }
    }

    async fn spawn_node(node: NodeContext) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener::serve(
            listener,
            Arc::new(node),
            std::future::pending(),
        ));
        addr
    }

    async fn cluster() -> Cluster {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path();

        let pdf = spawn_node(NodeContext::shard(
            StorageNode::new(Category::Pdf, home.join("spdf")).unwrap(),
        ))
        .await;
        let text = spawn_node(NodeContext::shard(
            StorageNode::new(Category::Txt, home.join("stext")).unwrap(),
        ))
        .await;

        let coordinator = NodeContext::coordinator(
            StorageNode::new(Category::C, home.join("smain")).unwrap(),
            Router::new(ShardMapping::standard(pdf, text)),
            home.to_path_buf(),
        )
        .unwrap();
        let addr = spawn_node(coordinator).await;

        Cluster {
            client: Client::new(addr),
            dir,
        }
    }

    async fn upload(client: &Client, name: &str, dest: &str, body: &'static [u8]) -> String {
        client
            .upload(name, dest, relay::chunks(body))
            .await
            .unwrap()
    }

    fn tar_members(archive: &[u8]) -> Vec<String> {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("out.tar");
        std::fs::write(&path, archive).unwrap();

        let output = std::process::Command::new("tar")
            .arg("-tf")
            .arg(&path)
            .output()
            .unwrap();
        assert!(output.status.success());

        let mut members: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim_start_matches("./").to_string())
            .filter(|line| !line.is_empty() && !line.ends_with('/'))
            .collect();
        members.sort();
        members
    }

    fn assert_remote(err: TransportError, prefix: &str) {
        match err {
            TransportError::Remote { message, .. } => {
                assert!(message.starts_with(prefix), "got {:?}", message)
            }
            other => panic!("expected a remote error, got {:?}", other),
        }
    }

    // ============================================================
    // ROUND TRIP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_round_trip_per_category() {
        let cluster = cluster().await;
        let client = &cluster.client;

        let binary: &'static [u8] = &[0u8, 1, 2, 255, 254, b'\n', 0, b'E', b'r'];

        let status = upload(client, "a.c", "~/smain/docs", b"int main() { return 0; }").await;
        assert!(status.starts_with("File stored: "));
        upload(client, "b.pdf", "~/smain/docs", binary).await;
        upload(client, "c.txt", "~/smain/docs", b"plain text\n").await;

        assert_eq!(
            client.download("~/smain/docs/a.c").await.unwrap(),
            b"int main() { return 0; }"
        );
        assert_eq!(client.download("~/smain/docs/b.pdf").await.unwrap(), binary);
        assert_eq!(client.download("~/smain/docs/c.txt").await.unwrap(), b"plain text\n");

        // Each file lives on exactly one node
        assert!(cluster.path("smain/docs/a.c").is_file());
        assert!(cluster.path("spdf/docs/b.pdf").is_file());
        assert!(cluster.path("stext/docs/c.txt").is_file());
        assert!(!cluster.path("smain/docs/b.pdf").exists());
        assert!(!cluster.path("smain/docs/c.txt").exists());
    }

    #[tokio::test]
    async fn test_large_remote_file_round_trip() {
        let cluster = cluster().await;

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 256) as u8).collect();
        let source = relay::chunks(std::io::Cursor::new(payload.clone()));
        cluster
            .client
            .upload("big.pdf", "~/smain", source)
            .await
            .unwrap();

        assert_eq!(cluster.client.download("~/smain/big.pdf").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_upload_file_from_disk() {
        let cluster = cluster().await;
        let local = cluster.path("local-notes.txt");
        std::fs::write(&local, b"from disk").unwrap();

        cluster.client.upload_file(&local, "~/smain/inbox").await.unwrap();

        assert_eq!(
            std::fs::read(cluster.path("stext/inbox/local-notes.txt")).unwrap(),
            b"from disk"
        );
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_rejected() {
        let cluster = cluster().await;

        let err = cluster
            .client
            .upload("notes.md", "~/smain", relay::chunks(&b"# hi"[..]))
            .await
            .unwrap_err();

        match err {
            Error::Transport(err) => assert_remote(err, "Unsupported file type"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    // ============================================================
    // DELETE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_missing_twice_fails_twice() {
        let cluster = cluster().await;

        for path in ["~/smain/ghost.c", "~/smain/ghost.pdf", "~/smain/ghost.txt"] {
            for _ in 0..2 {
                let err = cluster.client.delete(path).await.unwrap_err();
                assert_remote(err, "File not found");
            }
        }
    }

    #[tokio::test]
    async fn test_delete_then_download_is_not_found() {
        let cluster = cluster().await;
        let client = &cluster.client;

        upload(client, "gone.pdf", "~/smain/tmp", b"%PDF").await;

        let status = client.delete("~/smain/tmp/gone.pdf").await.unwrap();
        assert!(status.starts_with("File deleted: "));
        assert!(!cluster.path("spdf/tmp/gone.pdf").exists());

        let err = client.download("~/smain/tmp/gone.pdf").await.unwrap_err();
        assert_remote(err, "File not found");
    }

    // ============================================================
    // AGGREGATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_display_merges_all_nodes() {
        let cluster = cluster().await;
        let client = &cluster.client;

        upload(client, "main.c", "~/smain/proj", b"").await;
        upload(client, "util.c", "~/smain/proj/lib", b"").await;
        upload(client, "spec.pdf", "~/smain/proj", b"").await;
        upload(client, "old.pdf", "~/smain/proj/archive", b"").await;
        upload(client, "extra.pdf", "~/smain/proj", b"").await;
        upload(client, "readme.txt", "~/smain/proj", b"").await;
        // Outside the listed directory
        upload(client, "other.c", "~/smain/elsewhere", b"").await;

        let listing = client.display("~/smain/proj").await.unwrap();

        assert_eq!(
            listing,
            vec![
                "lib/util.c",
                "main.c",
                "archive/old.pdf",
                "extra.pdf",
                "spec.pdf",
                "readme.txt",
            ]
        );
    }

    #[tokio::test]
    async fn test_display_of_missing_directory_is_empty() {
        let cluster = cluster().await;

        let listing = cluster.client.display("~/smain/nothing/here").await.unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn test_dtar_local_category() {
        let cluster = cluster().await;
        let client = &cluster.client;

        upload(client, "a.c", "~/smain", b"int a;").await;
        upload(client, "b.c", "~/smain/sub", b"int b;").await;
        upload(client, "skip.txt", "~/smain", b"not in the c archive").await;

        let archive = client.archive(".c").await.unwrap();
        assert_eq!(tar_members(&archive), vec!["a.c", "sub/b.c"]);
    }

    #[tokio::test]
    async fn test_dtar_remote_categories() {
        let cluster = cluster().await;
        let client = &cluster.client;

        // Nothing stored yet
        assert!(client.archive(".pdf").await.unwrap().is_empty());

        upload(client, "n.txt", "~/smain/notes", b"note").await;
        let archive = client.archive(".txt").await.unwrap();
        assert_eq!(tar_members(&archive), vec!["notes/n.txt"]);
    }

    #[tokio::test]
    async fn test_dtar_unknown_extension() {
        let cluster = cluster().await;

        let err = cluster.client.archive(".md").await.unwrap_err();
        assert_remote(err, "Unsupported file type");
    }

    // ============================================================
    // CONCURRENCY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let cluster = cluster().await;

        let first = cluster.client.clone();
        let second = cluster.client.clone();

        let (a, b) = tokio::join!(
            async move {
                let body = relay::chunks(std::io::Cursor::new(vec![b'a'; 50_000]));
                first.upload("one.pdf", "~/smain/par", body).await
            },
            async move {
                let body = relay::chunks(std::io::Cursor::new(vec![b'b'; 50_000]));
                second.upload("two.pdf", "~/smain/par", body).await
            },
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(std::fs::read(cluster.path("spdf/par/one.pdf")).unwrap(), vec![b'a'; 50_000]);
        assert_eq!(std::fs::read(cluster.path("spdf/par/two.pdf")).unwrap(), vec![b'b'; 50_000]);
    }

    // ============================================================
    // LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_malformed_command_over_socket() {
        let cluster = cluster().await;
        upload(&cluster.client, "a.c", "~/smain", b"int a;").await;

        let mut stream = TcpStream::connect(cluster.client.addr()).await.unwrap();
        stream
            .write_all(b"ufile onlyonearg\ndfile ~/smain/a.c\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"int a;");
    }

    #[tokio::test]
    async fn test_coordinator_survives_dead_shard() {
        let dir = tempfile::tempdir().unwrap();
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let coordinator = NodeContext::coordinator(
            StorageNode::new(Category::C, dir.path().join("smain")).unwrap(),
            Router::new(ShardMapping::standard(dead, dead)),
            dir.path().to_path_buf(),
        )
        .unwrap();
        let client = Client::new(spawn_node(coordinator).await);

        let err = client.download("~/smain/x.pdf").await.unwrap_err();
        assert_remote(err, "Shard spdf unavailable");

        // Local category still works
        client
            .upload("ok.c", "~/smain", relay::chunks(&b"ok"[..]))
            .await
            .unwrap();
        assert_eq!(client.download("~/smain/ok.c").await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = Arc::new(NodeContext::shard(
            StorageNode::new(Category::Txt, dir.path().join("stext")).unwrap(),
        ));

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(listener::serve(listener, node, async move {
            let _ = stopped.await;
        }));

        // An idle session is aborted on shutdown
        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::task::yield_now().await;

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
