//! Transport Module Tests
//!
//! Validates chunked relaying, response classification and the shard connector.
//!
//! ## Test Scopes
//! - **Relay**: Byte-exact forwarding, chunk sizes and end-of-stream on the sink.
//! - **Responses**: Error lines versus data, including short and empty bodies.
//! - **Connector**: Forwarded requests against a scripted shard and a dead address.

#[cfg(test)]
mod tests {
    use crate::error::{Error, TransportError};
    use crate::routing::types::{Category, ShardId};
    use crate::storage::protocol::CHUNK_SIZE;
    use crate::transport::connector::ShardConnector;
    use crate::transport::relay::{self, RelayError, Response};
    use bytes::Bytes;
    use futures::StreamExt;
    use std::net::SocketAddr;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    // ============================================================
    // RELAY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_chunks_never_exceed_chunk_size() {
        let payload = vec![7u8; CHUNK_SIZE * 3 + 17];
        let mut stream = relay::chunks(std::io::Cursor::new(payload.clone()));

        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= CHUNK_SIZE);
            total += chunk.len();
        }
        assert_eq!(total, payload.len());
    }

    #[tokio::test]
    async fn test_relay_to_end_half_closes_sink() {
        let (mut near, mut far) = tokio::io::duplex(4096);

        let payload = b"hello across the pipe".to_vec();
        let sent = relay::relay_to_end(relay::chunks(&payload[..]), &mut near)
            .await
            .unwrap();
        assert_eq!(sent as usize, payload.len());

        // read_to_end only returns once the sink was shut down
        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_relay_source_failure_still_ends_sink() {
        let (mut near, mut far) = tokio::io::duplex(4096);

        let broken = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("source died")),
        ])
        .boxed();

        let err = relay::relay_to_end(broken, &mut near).await.unwrap_err();
        assert!(matches!(err, RelayError::Source(_)));

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"partial");
    }

    #[tokio::test]
    async fn test_with_head_prepends_peeked_bytes() {
        let body = relay::with_head(Bytes::from_static(b"head-"), relay::chunks(&b"tail"[..]));
        assert_eq!(relay::collect(body).await.unwrap(), b"head-tail");

        let body = relay::with_head(Bytes::new(), relay::chunks(&b"only"[..]));
        assert_eq!(relay::collect(body).await.unwrap(), b"only");
    }

    // ============================================================
    // RESPONSE CLASSIFICATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_read_response_detects_error_line() {
        let mut reader = BufReader::new(&b"Error: File not found: /x/a.c\nleftover"[..]);

        let response = relay::read_response(&mut reader).await.unwrap();
        assert_eq!(
            response,
            Response::Failed("File not found: /x/a.c".to_string())
        );

        // Nothing past the error line was consumed
        let mut rest = String::new();
        reader.read_line(&mut rest).await.unwrap();
        assert_eq!(rest, "leftover");
    }

    #[tokio::test]
    async fn test_read_response_keeps_data_head() {
        let mut reader = BufReader::new(&b"%PDF-1.4 binary"[..]);

        let Response::Data(head) = relay::read_response(&mut reader).await.unwrap() else {
            panic!("expected data");
        };
        assert_eq!(&head[..], b"%PDF-1.");

        let body = relay::with_head(head, relay::chunks(reader));
        assert_eq!(relay::collect(body).await.unwrap(), b"%PDF-1.4 binary");
    }

    #[tokio::test]
    async fn test_read_response_short_and_empty_bodies() {
        let mut short = BufReader::new(&b"Err"[..]);
        assert_eq!(
            relay::read_response(&mut short).await.unwrap(),
            Response::Data(Bytes::from_static(b"Err"))
        );

        let mut empty = BufReader::new(&b""[..]);
        assert_eq!(
            relay::read_response(&mut empty).await.unwrap(),
            Response::Data(Bytes::new())
        );
    }

    // ============================================================
    // CONNECTOR TESTS
    // ============================================================

    /// Accepts one connection, checks the request and answers with `reply`.
    async fn scripted_shard(expected: &'static [u8], reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.unwrap();
            assert_eq!(request, expected);
            stream.write_all(reply).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        addr
    }

    fn connector(addr: SocketAddr) -> ShardConnector {
        ShardConnector::new(ShardId("spdf".to_string()), addr)
    }

    #[tokio::test]
    async fn test_connector_fetch_relays_body() {
        let addr = scripted_shard(b"dfile /h/spdf/a.pdf\n", b"%PDF bytes").await;

        let reply = connector(addr).fetch("/h/spdf/a.pdf").await.unwrap();
        assert!(matches!(reply.response, Response::Data(_)));
        assert_eq!(relay::collect(reply.into_body()).await.unwrap(), b"%PDF bytes");
    }

    #[tokio::test]
    async fn test_connector_fetch_surfaces_error_line() {
        let addr = scripted_shard(b"dfile /h/spdf/x.pdf\n", b"Error: File not found: x\n").await;

        let reply = connector(addr).fetch("/h/spdf/x.pdf").await.unwrap();
        assert_eq!(
            reply.response,
            Response::Failed("File not found: x".to_string())
        );
    }

    #[tokio::test]
    async fn test_connector_archive_uses_archive_name() {
        let addr = scripted_shard(b"dfile pdf.tar\n", b"").await;

        let reply = connector(addr).archive(Category::Pdf).await.unwrap();
        assert!(relay::collect(reply.into_body()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connector_store_sends_bare_header_and_body() {
        let addr = scripted_shard(b"a.pdf\n/h/spdf/docs\nbody", b"File stored: ok\n").await;

        let status = connector(addr)
            .store("a.pdf", "/h/spdf/docs", relay::chunks(&b"body"[..]))
            .await
            .unwrap();
        assert_eq!(status, "File stored: ok");
    }

    #[tokio::test]
    async fn test_connector_list_and_delete() {
        let addr = scripted_shard(b"display /h/spdf\n", b"a.pdf\nsub/b.pdf\n").await;
        let listing = connector(addr).list("/h/spdf").await.unwrap();
        assert_eq!(listing, vec!["a.pdf".to_string(), "sub/b.pdf".to_string()]);

        let addr = scripted_shard(b"rmfile /h/spdf/a.pdf\n", b"File deleted: a\n").await;
        let status = connector(addr).delete("/h/spdf/a.pdf").await.unwrap();
        assert_eq!(status, "File deleted: a");
    }

    #[tokio::test]
    async fn test_connector_list_error_is_remote() {
        let addr = scripted_shard(b"display /h/nowhere\n", b"Error: Invalid path\n").await;

        let err = connector(addr).list("/h/nowhere").await.unwrap_err();
        assert!(matches!(err, TransportError::Remote { .. }));
        assert_eq!(err.to_string(), "Invalid path");
    }

    #[tokio::test]
    async fn test_connector_reports_unavailable_shard() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connector(addr).fetch("/h/spdf/a.pdf").await.err().unwrap();
        assert!(matches!(err, TransportError::Unavailable { .. }));
        assert!(err.to_string().starts_with("Shard spdf unavailable"));

        let err = connector(addr)
            .store("a.pdf", "/h/spdf", relay::chunks(&b"x"[..]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Unavailable { .. })
        ));
    }
}
