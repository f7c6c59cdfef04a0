//! Loopback DNS server answering from the cache.
//!
//! Each proxy instance runs one of these on an OS-assigned UDP port on
//! `127.0.0.1`. The outbound HTTP client performs every name lookup against
//! it, which keeps upstream resolution under the proxy's control and lets
//! the TTL cache bound the upstream query rate.

use crate::models::error::ProxyError;
use crate::services::dns_cache::DnsCache;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{DNSClass, RData, RecordType};
use log::{debug, error};
use rand::random;
use reqwest::dns::{Addrs, Name as DomainName, Resolve, Resolving};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long the HTTP dialer waits for an answer from the loopback server.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// UDP server that answers DNS queries from a [`DnsCache`].
///
/// Queries with no questions and lookups that produce an empty answer
/// section are answered with `SERVFAIL`; everything else echoes the
/// transaction id and questions and returns the cached records.
#[derive(Debug)]
pub struct DnsServer {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl DnsServer {
    /// Binds `127.0.0.1:0` and starts serving `cache`. Returns once the
    /// socket is bound and the serve loop is running.
    pub async fn start(cache: Arc<DnsCache>) -> Result<Self, ProxyError> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| {
                ProxyError::config("DNSCache", format!("unable to bind loopback dns socket: {e}"))
            })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| ProxyError::config("DNSCache", e.to_string()))?;
        debug!("DNS cache server listening on {local_addr}");

        let handle = tokio::spawn(serve(socket, cache));
        Ok(Self { local_addr, handle })
    }

    /// Address of the bound loopback socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A [`reqwest`] name resolver that queries this server.
    pub fn resolver(&self) -> CacheResolver {
        CacheResolver {
            addr: self.local_addr,
        }
    }

    /// Stops the serve loop and closes the socket.
    pub fn shutdown(&self) {
        debug!("DNS cache server on {} shutting down", self.local_addr);
        self.handle.abort();
    }
}

impl Drop for DnsServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(socket: UdpSocket, cache: Arc<DnsCache>) {
    let mut buffer = [0u8; 4096];
    loop {
        let (received, peer) = match socket.recv_from(&mut buffer).await {
            Ok(value) => value,
            Err(e) => {
                error!("DNS cache server receive failed: {e}");
                return;
            }
        };
        let request = match Message::from_vec(&buffer[..received]) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping unparsable dns query from {peer}: {e}");
                continue;
            }
        };

        let response = answer(&cache, &request).await;
        debug!(
            "Answering query from {peer} with {} ({} records)",
            response.response_code(),
            response.answer_count(),
        );
        match response.to_vec() {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, peer).await {
                    debug!("Unable to send dns reply to {peer}: {e}");
                }
            }
            Err(e) => error!("Unable to serialize dns reply: {e}"),
        }
    }
}

async fn answer(cache: &DnsCache, request: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(request.recursion_desired());
    for query in request.queries() {
        response.add_query(query.clone());
    }

    if request.queries().is_empty() {
        response.set_response_code(ResponseCode::ServFail);
        return response;
    }

    for query in request.queries() {
        let name = query.name().to_lowercase();
        let records = cache
            .lookup_name(name, query.query_class(), query.query_type())
            .await;
        for record in records {
            response.add_answer(record);
        }
    }

    if response.answer_count() == 0 {
        response.set_response_code(ResponseCode::ServFail);
    } else {
        response.set_response_code(ResponseCode::NoError);
    }
    response
}

/// Name resolver for the outbound HTTP client.
///
/// Resolves every host by querying the loopback server for A and AAAA
/// records, so the client never consults the host's stock resolver.
#[derive(Debug, Clone)]
pub struct CacheResolver {
    addr: SocketAddr,
}

impl Resolve for CacheResolver {
    fn resolve(&self, name: DomainName) -> Resolving {
        let addr = self.addr;
        let host = name.as_str().to_string();
        Box::pin(async move {
            let mut ips = Vec::new();
            for rtype in [RecordType::A, RecordType::AAAA] {
                ips.extend(query_loopback(addr, &host, rtype).await?);
            }
            if ips.is_empty() {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses for {host}"),
                )) as Box<dyn std::error::Error + Send + Sync>);
            }
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

/// Sends one query to the loopback server and collects the address records
/// of the answer. A failure response code yields no addresses; only
/// transport problems are errors.
async fn query_loopback(
    addr: SocketAddr,
    host: &str,
    rtype: RecordType,
) -> Result<Vec<IpAddr>, Box<dyn std::error::Error + Send + Sync>> {
    let id = random::<u16>();
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(hickory_proto::op::Query::query(
            crate::services::dns_cache::sanitize_name(host)?,
            rtype,
        ));

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    socket.connect(addr).await?;
    socket.send(&message.to_vec()?).await?;

    let mut buffer = vec![0u8; 4096];
    let received = timeout(RESOLVE_TIMEOUT, socket.recv(&mut buffer)).await??;
    let reply = Message::from_vec(&buffer[..received])?;

    if reply.id() != id || reply.response_code() != ResponseCode::NoError {
        return Ok(Vec::new());
    }

    let ips = reply
        .answers()
        .iter()
        .filter(|record| record.dns_class() == DNSClass::IN)
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
            Some(RData::AAAA(aaaa)) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect();
    Ok(ips)
}
