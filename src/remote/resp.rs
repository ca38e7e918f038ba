//! Minimal RESP2 wire client.
//!
//! Speaks the subset of the Redis serialization protocol the cache needs:
//! `PING`, `SELECT`, `GET`, `SET … PX … NX`, `DEL`, `FLUSHDB`, `PTTL`.
//! One TCP connection per store, guarded by an async mutex; the connection
//! is established lazily, `SELECT`ed onto the configured database, and
//! dropped for reconnect after any I/O or protocol failure.
//!
//! When the configured idle timeout is at least one second it is applied as
//! a per-command deadline, so a stuck backend cannot block a caller
//! indefinitely.

use crate::core::error::{StrataError, StrataResult};
use crate::remote::{RemoteStore, StoreFuture};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One reply from the server.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Reply>),
}

/// A single remote store endpoint reachable over RESP2.
pub struct RespStore {
    addr: String,
    db: u32,
    command_deadline: Option<Duration>,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl RespStore {
    /// Create a connection object for `addr` on logical database `db`.
    ///
    /// The TCP connection itself is established on first use. `idle_timeout`
    /// becomes the per-command deadline when it is at least one second.
    pub fn new(addr: impl Into<String>, db: u32, idle_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            db,
            command_deadline: (idle_timeout >= Duration::from_secs(1)).then_some(idle_timeout),
            conn: Mutex::new(None),
        }
    }

    async fn command(&self, args: &[&[u8]]) -> StrataResult<Reply> {
        let mut guard = self.conn.lock().await;
        let result = self.exchange(&mut guard, args).await;
        if result.is_err() {
            // Reconnect on the next call rather than reuse a torn stream.
            *guard = None;
        }
        result
    }

    async fn exchange(
        &self,
        slot: &mut Option<BufStream<TcpStream>>,
        args: &[&[u8]],
    ) -> StrataResult<Reply> {
        let run = async {
            if slot.is_none() {
                *slot = Some(self.connect().await?);
            }
            let Some(stream) = slot.as_mut() else {
                return Err(StrataError::Backend("connection unavailable".to_string()));
            };
            write_command(stream, args).await?;
            match read_reply(stream).await? {
                Reply::Error(message) => Err(StrataError::Backend(format!(
                    "{}: {}",
                    self.addr, message
                ))),
                reply => Ok(reply),
            }
        };
        match self.command_deadline {
            Some(deadline) => tokio::time::timeout(deadline, run).await.map_err(|_| {
                StrataError::Backend(format!("deadline exceeded talking to {}", self.addr))
            })?,
            None => run.await,
        }
    }

    async fn connect(&self) -> StrataResult<BufStream<TcpStream>> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|err| StrataError::Backend(format!("connect {}: {}", self.addr, err)))?;
        let mut stream = BufStream::new(stream);
        if self.db > 0 {
            let db = self.db.to_string();
            write_command(&mut stream, &[b"SELECT", db.as_bytes()]).await?;
            match read_reply(&mut stream).await? {
                Reply::Simple(ok) if ok == "OK" => {}
                other => {
                    return Err(StrataError::Backend(format!(
                        "SELECT {} on {} failed: {:?}",
                        self.db, self.addr, other
                    )));
                }
            }
        }
        tracing::debug!(endpoint = %self.addr, db = self.db, "remote store connected");
        Ok(stream)
    }
}

impl RemoteStore for RespStore {
    fn ping(&self) -> StoreFuture<'_, StrataResult<()>> {
        Box::pin(async move {
            match self.command(&[b"PING"]).await? {
                Reply::Simple(pong) if pong == "PONG" => Ok(()),
                Reply::Bulk(_) => Ok(()),
                other => Err(StrataError::Backend(format!(
                    "unexpected PING reply: {:?}",
                    other
                ))),
            }
        })
    }

    fn get(&self, key: &str) -> StoreFuture<'_, StrataResult<Option<Bytes>>> {
        let key = key.to_string();
        Box::pin(async move {
            match self.command(&[b"GET", key.as_bytes()]).await? {
                Reply::Bulk(bytes) => Ok(Some(bytes)),
                Reply::Null => Ok(None),
                other => Err(StrataError::Backend(format!(
                    "unexpected GET reply: {:?}",
                    other
                ))),
            }
        })
    }

    fn set_nx(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> StoreFuture<'_, StrataResult<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            let ttl_ms = ttl.as_millis().to_string();
            let mut args: Vec<&[u8]> = vec![b"SET", key.as_bytes(), &value];
            if ttl > Duration::ZERO {
                args.extend_from_slice(&[b"PX", ttl_ms.as_bytes()]);
            }
            args.push(b"NX");
            match self.command(&args).await? {
                Reply::Simple(ok) if ok == "OK" => Ok(true),
                Reply::Null => Ok(false),
                other => Err(StrataError::Backend(format!(
                    "unexpected SET reply: {:?}",
                    other
                ))),
            }
        })
    }

    fn del(&self, key: &str) -> StoreFuture<'_, StrataResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            match self.command(&[b"DEL", key.as_bytes()]).await? {
                Reply::Integer(_) => Ok(()),
                other => Err(StrataError::Backend(format!(
                    "unexpected DEL reply: {:?}",
                    other
                ))),
            }
        })
    }

    fn flush_db(&self) -> StoreFuture<'_, StrataResult<()>> {
        Box::pin(async move {
            match self.command(&[b"FLUSHDB"]).await? {
                Reply::Simple(ok) if ok == "OK" => Ok(()),
                other => Err(StrataError::Backend(format!(
                    "unexpected FLUSHDB reply: {:?}",
                    other
                ))),
            }
        })
    }

    fn ttl(&self, key: &str) -> StoreFuture<'_, StrataResult<Option<Duration>>> {
        let key = key.to_string();
        Box::pin(async move {
            match self.command(&[b"PTTL", key.as_bytes()]).await? {
                // -2 = absent, -1 = no expiry; both report as unknown.
                Reply::Integer(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms as u64))),
                Reply::Integer(_) => Ok(None),
                other => Err(StrataError::Backend(format!(
                    "unexpected PTTL reply: {:?}",
                    other
                ))),
            }
        })
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

async fn write_command(
    stream: &mut BufStream<TcpStream>,
    args: &[&[u8]],
) -> StrataResult<()> {
    let mut frame = Vec::with_capacity(32);
    frame.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        frame.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        frame.extend_from_slice(arg);
        frame.extend_from_slice(b"\r\n");
    }
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_reply(stream: &mut BufStream<TcpStream>) -> StrataResult<Reply> {
    // Recursion through arrays needs boxing in async context.
    read_reply_boxed(stream).await
}

fn read_reply_boxed<'a>(
    stream: &'a mut BufStream<TcpStream>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = StrataResult<Reply>> + Send + 'a>> {
    Box::pin(async move {
        let line = read_line(stream).await?;
        let (marker, rest) = line
            .split_first()
            .ok_or_else(|| StrataError::Backend("empty reply line".to_string()))?;
        let text = std::str::from_utf8(rest)
            .map_err(|_| StrataError::Backend("non-utf8 reply header".to_string()))?;
        match marker {
            b'+' => Ok(Reply::Simple(text.to_string())),
            b'-' => Ok(Reply::Error(text.to_string())),
            b':' => Ok(Reply::Integer(parse_int(text)?)),
            b'$' => {
                let len = parse_int(text)?;
                if len < 0 {
                    return Ok(Reply::Null);
                }
                let mut bytes = vec![0u8; len as usize + 2];
                stream.read_exact(&mut bytes).await?;
                bytes.truncate(len as usize);
                Ok(Reply::Bulk(Bytes::from(bytes)))
            }
            b'*' => {
                let len = parse_int(text)?;
                if len < 0 {
                    return Ok(Reply::Null);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_reply_boxed(stream).await?);
                }
                Ok(Reply::Array(items))
            }
            other => Err(StrataError::Backend(format!(
                "unexpected reply marker: {}",
                char::from(*other)
            ))),
        }
    })
}

async fn read_line(stream: &mut BufStream<TcpStream>) -> StrataResult<Vec<u8>> {
    let mut line = Vec::new();
    let read = stream.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(StrataError::Backend("connection closed".to_string()));
    }
    while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(line)
}

fn parse_int(text: &str) -> StrataResult<i64> {
    text.parse::<i64>()
        .map_err(|_| StrataError::Backend(format!("bad integer in reply: {:?}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one connection with canned replies, returning received frames.
    async fn one_shot_server(replies: &'static [&'static [u8]]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            for reply in replies {
                // Wait for the next command before answering it.
                let _ = socket.read(&mut buf).await.unwrap();
                socket.write_all(reply).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn get_parses_bulk_and_null() {
        let addr = one_shot_server(&[b"$5\r\nhello\r\n", b"$-1\r\n"]).await;
        let store = RespStore::new(addr, 0, Duration::ZERO);

        let hit = store.get("k").await.unwrap();
        assert_eq!(hit.as_deref(), Some(&b"hello"[..]));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_nx_reports_first_writer() {
        let addr = one_shot_server(&[b"+OK\r\n", b"$-1\r\n"]).await;
        let store = RespStore::new(addr, 0, Duration::ZERO);

        let value = Bytes::from_static(b"v");
        assert!(store
            .set_nx("k", value.clone(), Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store.set_nx("k", value, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn server_errors_surface_as_backend_errors() {
        let addr = one_shot_server(&[b"-ERR something broke\r\n"]).await;
        let store = RespStore::new(addr, 0, Duration::ZERO);

        match store.get("k").await {
            Err(StrataError::Backend(message)) => assert!(message.contains("something broke")),
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn pttl_maps_sentinels_to_unknown() {
        let addr = one_shot_server(&[b":60000\r\n", b":-2\r\n", b":-1\r\n"]).await;
        let store = RespStore::new(addr, 0, Duration::ZERO);

        assert_eq!(
            store.ttl("k").await.unwrap(),
            Some(Duration::from_secs(60))
        );
        assert!(store.ttl("absent").await.unwrap().is_none());
        assert!(store.ttl("unbounded").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn select_runs_before_first_command() {
        let addr = one_shot_server(&[b"+OK\r\n", b"+PONG\r\n"]).await;
        let store = RespStore::new(addr, 3, Duration::ZERO);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_errors_without_panicking() {
        // Port 1 is essentially never listening.
        let store = RespStore::new("127.0.0.1:1", 0, Duration::ZERO);
        assert!(matches!(store.ping().await, Err(StrataError::Backend(_))));
    }
}
