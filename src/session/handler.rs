use super::aggregate::{self, Listing};
use super::types::{NodeContext, Role, SessionId};
use crate::error::{Error, RouteError, StorageError};
use crate::routing::router::{Route, VirtualPath, join_file_name};
use crate::routing::types::{Category, ShardTarget};
use crate::storage::protocol::{self, Command, ParseError, Parsed};
use crate::transport::connector::{ShardConnector, ShardReply};
use crate::transport::relay::{self, ChunkStream, RelayError, Response};

use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// What the session does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next command.
    Continue,
    /// A direction of the connection has been closed; no further command can follow.
    Finished,
}

/// One header line as read off the connection.
enum Field {
    Line(String),
    /// Exceeded `MAX_HEADER_LINE`; the rest of the line has been discarded.
    TooLong,
}

/// Where a command runs.
enum Placement {
    Local(String),
    Remote {
        connector: ShardConnector,
        path: String,
    },
}

impl Placement {
    fn from_route(route: Route) -> Self {
        match route.target {
            ShardTarget::Local => Placement::Local(route.path),
            ShardTarget::Remote(addr) => Placement::Remote {
                connector: ShardConnector::new(route.shard, addr),
                path: route.path,
            },
        }
    }
}

/// One client connection.
pub struct Session<R, W> {
    id: SessionId,
    node: Arc<NodeContext>,
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(id: SessionId, node: Arc<NodeContext>, reader: R, writer: W) -> Self {
        Self {
            id,
            node,
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Serves commands until the client is done. Errors are I/O failures on the
    /// session's own connection.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            let line = match self.read_field().await? {
                Some(Field::Line(line)) => line,
                Some(Field::TooLong) => {
                    tracing::warn!(
                        "Ignoring malformed command: {}",
                        ParseError::LineTooLong(protocol::MAX_HEADER_LINE)
                    );
                    continue;
                }
                None => {
                    tracing::debug!("Session {} reached end of input", self.id);
                    return Ok(());
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            if self.handle_line(&line).await? == Flow::Finished {
                tracing::debug!("Session {} finished", self.id);
                return Ok(());
            }
        }
    }

    /// Reads one header line without its line terminator. `None` at end of input.
    ///
    /// At most `MAX_HEADER_LINE` bytes are buffered; the remainder of a longer line is
    /// read and dropped.
    async fn read_field(&mut self) -> io::Result<Option<Field>> {
        let mut raw = Vec::new();
        let limit = protocol::MAX_HEADER_LINE as u64;
        if (&mut self.reader).take(limit).read_until(b'\n', &mut raw).await? == 0 {
            return Ok(None);
        }

        if raw.last() != Some(&b'\n') && raw.len() >= protocol::MAX_HEADER_LINE {
            let skipped = self.skip_line().await?;
            tracing::debug!(
                "Session {} dropped {} bytes of an over-long line",
                self.id,
                raw.len() as u64 + skipped
            );
            return Ok(Some(Field::TooLong));
        }

        let line = String::from_utf8_lossy(&raw);
        Ok(Some(Field::Line(
            line.trim_end_matches(['\r', '\n']).to_string(),
        )))
    }

    /// Consumes input up to and including the next newline without keeping it.
    async fn skip_line(&mut self) -> io::Result<u64> {
        let mut skipped = 0u64;
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(skipped);
            }
            let (used, done) = match buf.iter().position(|byte| *byte == b'\n') {
                Some(idx) => (idx + 1, true),
                None => (buf.len(), false),
            };
            self.reader.consume(used);
            skipped += used as u64;
            if done {
                return Ok(skipped);
            }
        }
    }

    /// Reads the next field of a multi-line upload header. `Err` carries how the
    /// session goes on when no usable field arrived.
    async fn upload_field(&mut self) -> io::Result<Result<String, Flow>> {
        match self.read_field().await? {
            Some(Field::Line(line)) => Ok(Ok(line.trim().to_string())),
            Some(Field::TooLong) => {
                let discarded = self.drain_body().await?;
                let err = ParseError::LineTooLong(protocol::MAX_HEADER_LINE);
                tracing::warn!("Rejected upload ({} bytes discarded): {}", discarded, err);
                self.reply_and_finish(&protocol::error_line(err))
                    .await
                    .map(Err)
            }
            None => {
                tracing::warn!("Session {} closed in the middle of an upload header", self.id);
                Ok(Err(Flow::Finished))
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        let command = match protocol::parse_line(line) {
            Ok(Parsed::Ready(command)) => command,
            Ok(Parsed::UploadHeader) => {
                let filename = match self.upload_field().await? {
                    Ok(filename) => filename,
                    Err(flow) => return Ok(flow),
                };
                let destination = match self.upload_field().await? {
                    Ok(destination) => destination,
                    Err(flow) => return Ok(flow),
                };
                Command::Upload {
                    filename,
                    destination,
                }
            }
            // Bare store header: the line is the file name, the destination follows.
            // Any unknown line on a shard is read this way; file names never contain
            // whitespace, so a name cannot be mistaken for a command line.
            Err(ParseError::Unknown(_)) if self.node.is_shard() => {
                let destination = match self.upload_field().await? {
                    Ok(destination) => destination,
                    Err(flow) => return Ok(flow),
                };
                Command::Upload {
                    filename: line.trim().to_string(),
                    destination,
                }
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed command '{}': {}", line, e);
                return Ok(Flow::Continue);
            }
        };

        tracing::info!("Received '{}'", command);

        self.dispatch(command).await
    }

    pub async fn dispatch(&mut self, command: Command) -> io::Result<Flow> {
        match command {
            Command::Upload {
                filename,
                destination,
            } => self.upload(&filename, &destination).await,
            Command::Download(path) => self.download(&path).await,
            Command::Delete(path) => self.delete(&path).await,
            Command::Archive(extension) => self.archive(&extension).await,
            Command::List(dir) => self.list(&dir).await,
        }
    }

    // ============================================================
    // COMMANDS
    // ============================================================

    async fn upload(&mut self, filename: &str, destination: &str) -> io::Result<Flow> {
        let node = Arc::clone(&self.node);

        let placement = match place_upload(&node, filename, destination) {
            Ok(placement) => placement,
            Err(e) => {
                let discarded = self.drain_body().await?;
                tracing::warn!(
                    "Rejected upload of {} to {} ({} bytes discarded): {}",
                    filename,
                    destination,
                    discarded,
                    e
                );
                return self.reply_and_finish(&protocol::error_line(e)).await;
            }
        };

        let status = match placement {
            Placement::Local(path) => {
                match node.storage.store(&path, relay::chunks(&mut self.reader)).await {
                    Ok(bytes) => {
                        protocol::status_line(format!("File stored: {} ({} bytes)", path, bytes))
                    }
                    Err(e) => protocol::error_line(e),
                }
            }
            Placement::Remote { connector, path } => {
                let (dir, name) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
                match connector.store(name, dir, relay::chunks(&mut self.reader)).await {
                    Ok(status) => protocol::status_line(status),
                    Err(e) => {
                        tracing::warn!(
                            "Forwarding {} to shard {} failed: {}",
                            path,
                            connector.shard(),
                            e
                        );
                        protocol::error_line(e)
                    }
                }
            }
        };

        // Whatever the outcome, the body runs until the client's half-close
        self.drain_body().await?;

        self.reply_and_finish(&status).await
    }

    async fn download(&mut self, raw: &str) -> io::Result<Flow> {
        let node = Arc::clone(&self.node);

        if node.is_shard() && node.storage.is_archive_name(raw) {
            return self.send_local_archive(&node).await;
        }

        let placement = match place_file(&node, raw) {
            Ok(placement) => placement,
            Err(e) => return self.reject(e).await,
        };

        match placement {
            Placement::Local(path) => match node.storage.fetch(&path).await {
                Ok(body) => self.stream_out(body).await,
                Err(e) => self.reject(e).await,
            },
            Placement::Remote { connector, path } => match connector.fetch(&path).await {
                Ok(reply) => self.relay_reply(reply).await,
                Err(e) => self.reject(e).await,
            },
        }
    }

    async fn delete(&mut self, raw: &str) -> io::Result<Flow> {
        let node = Arc::clone(&self.node);

        let placement = match place_file(&node, raw) {
            Ok(placement) => placement,
            Err(e) => return self.reject(e).await,
        };

        let status = match placement {
            Placement::Local(path) => match node.storage.delete(&path).await {
                Ok(_) => protocol::status_line(format!("File deleted: {}", path)),
                Err(e) => protocol::error_line(e),
            },
            // The shard's status line is relayed verbatim, error or not
            Placement::Remote { connector, path } => match connector.delete(&path).await {
                Ok(status) => protocol::status_line(status),
                Err(e) => protocol::error_line(e),
            },
        };

        self.write_line(&status).await?;

        Ok(Flow::Continue)
    }

    async fn archive(&mut self, extension: &str) -> io::Result<Flow> {
        let node = Arc::clone(&self.node);

        let category = match extension.parse::<Category>() {
            Ok(category) => category,
            Err(e) => return self.reject(e).await,
        };

        let router = match &node.role {
            Role::Shard => {
                if category != node.storage.category() {
                    return self
                        .reject(StorageError::Category {
                            path: extension.to_string(),
                            expected: node.storage.category().extension(),
                        })
                        .await;
                }
                return self.send_local_archive(&node).await;
            }
            Role::Coordinator { router, .. } => router,
        };

        let entry = match router.entry(category) {
            Ok(entry) => entry,
            Err(e) => return self.reject(e).await,
        };

        match entry.target {
            ShardTarget::Local => self.send_local_archive(&node).await,
            ShardTarget::Remote(addr) => {
                let connector = ShardConnector::new(entry.shard.clone(), addr);
                match connector.archive(category).await {
                    Ok(reply) => self.relay_reply(reply).await,
                    Err(e) => self.reject(e).await,
                }
            }
        }
    }

    async fn list(&mut self, raw: &str) -> io::Result<Flow> {
        let node = Arc::clone(&self.node);

        let (router, home) = match &node.role {
            Role::Shard => {
                return match node.storage.list(raw).await {
                    Ok(entries) => self.send_listing(&entries).await,
                    Err(e) => self.reject(e).await,
                };
            }
            Role::Coordinator { router, home } => (router, home),
        };

        let dir = VirtualPath::new(raw).expand(home);
        let routes: Result<Vec<Route>, RouteError> = Category::ALL
            .iter()
            .map(|category| router.rewrite_for(&dir, *category))
            .collect();
        let routes = match routes {
            Ok(routes) => routes,
            Err(e) => return self.reject(e).await,
        };

        let storage = &node.storage;
        let partials = futures::future::join_all(routes.into_iter().map(|route| async move {
            let category = route.category;
            let entries = match Placement::from_route(route) {
                Placement::Local(path) => storage.list(&path).await.map_err(Error::from),
                Placement::Remote { connector, path } => {
                    connector.list(&path).await.map_err(Error::from)
                }
            };
            entries.map(|entries| Listing::new(category, entries))
        }))
        .await;

        match partials.into_iter().collect::<Result<Vec<Listing>, Error>>() {
            Ok(listings) => {
                let merged = aggregate::merge(listings);
                tracing::info!("Listing of {} has {} entries", dir.as_str(), merged.len());
                self.send_listing(&merged).await
            }
            Err(e) => self.reject(e).await,
        }
    }

    // ============================================================
    // RESPONSES
    // ============================================================

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Answers a failed command with one error line. The session goes on.
    async fn reject(&mut self, err: impl fmt::Display) -> io::Result<Flow> {
        tracing::warn!("Command failed: {}", err);
        self.write_line(&protocol::error_line(err)).await?;
        Ok(Flow::Continue)
    }

    async fn reply_and_finish(&mut self, line: &str) -> io::Result<Flow> {
        self.write_line(line).await?;
        self.writer.shutdown().await?;
        Ok(Flow::Finished)
    }

    /// Reads and discards whatever is left of an upload body.
    async fn drain_body(&mut self) -> io::Result<u64> {
        tokio::io::copy(&mut self.reader, &mut tokio::io::sink()).await
    }

    /// Sends a body and half-closes. A failing source truncates the response.
    async fn stream_out(&mut self, body: ChunkStream<'_>) -> io::Result<Flow> {
        match relay::relay_to_end(body, &mut self.writer).await {
            Ok(bytes) => {
                tracing::info!("Sent {} bytes", bytes);
                Ok(Flow::Finished)
            }
            Err(RelayError::Sink(e)) => Err(e),
            Err(RelayError::Source(e)) => {
                tracing::warn!("Response source failed, client sees a truncated body: {}", e);
                Ok(Flow::Finished)
            }
        }
    }

    async fn relay_reply(&mut self, reply: ShardReply) -> io::Result<Flow> {
        if let Response::Failed(message) = &reply.response {
            let message = message.clone();
            return self.reject(message).await;
        }
        self.stream_out(reply.into_body()).await
    }

    async fn send_local_archive(&mut self, node: &NodeContext) -> io::Result<Flow> {
        let job = match node.storage.archive().await {
            Ok(job) => job,
            Err(e) => return self.reject(e).await,
        };

        match job.stream_into(&mut self.writer).await {
            Ok(_) => Ok(Flow::Finished),
            Err(RelayError::Sink(e)) => Err(e),
            Err(RelayError::Source(e)) => {
                tracing::warn!("Archive output failed, client sees a truncated archive: {}", e);
                Ok(Flow::Finished)
            }
        }
    }

    async fn send_listing(&mut self, entries: &[String]) -> io::Result<Flow> {
        self.writer
            .write_all(aggregate::render(entries).as_bytes())
            .await?;
        self.writer.shutdown().await?;
        Ok(Flow::Finished)
    }
}

/// Where the file named by `raw` lives. Shards take wire paths as they are.
fn place_file(node: &NodeContext, raw: &str) -> Result<Placement, RouteError> {
    match &node.role {
        Role::Shard => Ok(Placement::Local(raw.to_string())),
        Role::Coordinator { router, home } => {
            let path = VirtualPath::new(raw).expand(home);
            router.classify(&path).map(Placement::from_route)
        }
    }
}

fn place_upload(
    node: &NodeContext,
    filename: &str,
    destination: &str,
) -> Result<Placement, RouteError> {
    match &node.role {
        Role::Shard => join_file_name(destination, filename).map(Placement::Local),
        Role::Coordinator { router, home } => {
            let path = VirtualPath::new(destination).expand(home).join(filename)?;
            router.classify(&path).map(Placement::from_route)
        }
    }
}
