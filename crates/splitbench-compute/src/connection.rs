//! One-shot connections to the Storage Node.

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use splitbench_proto::framing::{read_frame, write_frame};
use splitbench_proto::QueryRequest;

use crate::config::ComputeConfig;
use crate::error::Error;

/// A raw response together with what it cost to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    /// Encoded envelope, unframed.
    pub payload: Vec<u8>,
    /// Connect, send and receive.
    pub transfer_time: Duration,
}

impl Fetched {
    /// Bytes of encoded result received.
    pub fn data_size(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// A connection carrying exactly one query.
pub struct Connection {
    stream: TcpStream,
    endpoint: String,
    response_timeout: Duration,
    max_message_size: usize,
}

impl Connection {
    /// Connect to the configured Storage Node.
    pub async fn establish(config: &ComputeConfig) -> Result<Self, Error> {
        let endpoint = config.endpoint();
        let stream = timeout(
            config.connect_timeout,
            TcpStream::connect((config.storage_address.as_str(), config.port)),
        )
        .await
        .map_err(|_| Error::Timeout("connect"))?
        .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", endpoint, e)))?;

        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            endpoint,
            response_timeout: config.response_timeout,
            max_message_size: config.max_message_size,
        })
    }

    /// Send one query and wait for its full response.
    ///
    /// The server answers a failed query by closing the connection, which
    /// surfaces here as a protocol error.
    pub async fn query(mut self, request: &QueryRequest) -> Result<Vec<u8>, Error> {
        let payload = timeout(
            self.response_timeout,
            exchange(&mut self.stream, &request.to_bytes(), self.max_message_size),
        )
        .await
        .map_err(|_| Error::Timeout("response"))??;
        Ok(payload)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

async fn exchange(
    stream: &mut TcpStream,
    payload: &[u8],
    max_size: usize,
) -> Result<Vec<u8>, splitbench_proto::Error> {
    write_frame(stream, payload, max_size).await?;
    stream.shutdown().await?;
    read_frame(stream, max_size).await
}

/// Connect, send `query` and read the response, timing the whole exchange.
pub async fn fetch(config: &ComputeConfig, query: &str) -> Result<Fetched, Error> {
    let started = Instant::now();
    let connection = Connection::establish(config).await?;
    let payload = connection.query(&QueryRequest::new(query)).await?;
    Ok(Fetched {
        payload,
        transfer_time: started.elapsed(),
    })
}
