//! Upstream DNS resolution.
//!
//! Queries are sent to the configured upstream server with recursion
//! desired, retried a fixed number of times without backoff, and the
//! answers are appended to the cache with their origin so they can be
//! refreshed after expiry.

use crate::models::error::ProxyError;
use crate::services::dns_cache::{sanitize_name, DnsCache, DnsTransport};
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, RecordType};
use log::debug;
use std::io;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;

impl DnsCache {
    /// Resolves `(host, class, rtype)` against `server` and appends the
    /// answers to the cache.
    ///
    /// Up to [`max_lookup_attempts`](Self::max_lookup_attempts) queries are
    /// sent, retrying immediately on transport errors and on response codes
    /// other than `NOERROR`. An empty answer section with `NOERROR` is a
    /// success that adds nothing.
    ///
    /// # Errors
    ///
    /// [`ProxyError::DnsLookup`] naming the host when every attempt failed.
    pub async fn resolve_and_add(
        &self,
        server: &str,
        transport: DnsTransport,
        host: &str,
        class: DNSClass,
        rtype: RecordType,
    ) -> Result<(), ProxyError> {
        let name = sanitize_name(host)?;

        let mut query = Query::query(name.clone(), rtype);
        query.set_query_class(class);

        let mut last_failure = String::new();
        let mut response = None;

        for attempt in 1..=self.max_lookup_attempts {
            debug!(
                "Resolving {name} {class} {rtype} via {server} ({transport}), attempt {attempt}"
            );

            let id = rand::random::<u16>();
            let mut message = Message::new();
            message
                .set_id(id)
                .set_message_type(MessageType::Query)
                .set_op_code(OpCode::Query)
                .set_recursion_desired(true)
                .add_query(query.clone());

            let reply = match timeout(self.dial_timeout, exchange(server, transport, &message))
                .await
            {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    last_failure = e.to_string();
                    continue;
                }
                Err(_) => {
                    last_failure = format!("query to {server} timed out");
                    continue;
                }
            };

            if reply.id() != id {
                last_failure = "response id does not match query id".to_string();
                continue;
            }
            if reply.response_code() != ResponseCode::NoError {
                last_failure = format!(
                    "response code was {}, expected NOERROR",
                    reply.response_code()
                );
                continue;
            }

            response = Some(reply);
            break;
        }

        let response = response.ok_or_else(|| ProxyError::DnsLookup {
            host: name.to_string(),
            message: last_failure,
        })?;

        let answers = response.answers().to_vec();
        if !answers.is_empty() {
            self.add_resolved(server, transport, answers, Instant::now());
        }
        Ok(())
    }
}

async fn exchange(
    server: &str,
    transport: DnsTransport,
    message: &Message,
) -> io::Result<Message> {
    let bytes = message
        .to_vec()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let reply = match transport {
        DnsTransport::Udp => exchange_udp(server, &bytes).await?,
        DnsTransport::Tcp => exchange_tcp(server, &bytes).await?,
    };
    Message::from_vec(&reply).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn exchange_udp(server: &str, query: &[u8]) -> io::Result<Vec<u8>> {
    let addr = lookup_host(server)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for dns server"))?;
    let bind_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;
    socket.send(query).await?;

    let mut buffer = vec![0u8; 4096];
    let received = socket.recv(&mut buffer).await?;
    buffer.truncate(received);
    Ok(buffer)
}

// RFC 1035 4.2.2: TCP messages are prefixed with a two-byte length field.
async fn exchange_tcp(server: &str, query: &[u8]) -> io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(server).await?;
    let length = u16::try_from(query.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "query too large for tcp"))?;
    stream.write_all(&length.to_be_bytes()).await?;
    stream.write_all(query).await?;
    stream.flush().await?;

    let mut length_buf = [0u8; 2];
    stream.read_exact(&mut length_buf).await?;
    let mut reply = vec![0u8; usize::from(u16::from_be_bytes(length_buf))];
    stream.read_exact(&mut reply).await?;
    Ok(reply)
}
