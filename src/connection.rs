use crate::modbus::{MAX_READ_COUNT, ModbusTCPCodec, Request, ResponseKind};
use crate::poll::WordSource;
use futures::{SinkExt as _, StreamExt as _};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP (attempt {2})")]
    Connect(#[source] std::io::Error, String, usize),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the device closed the connection")]
    Closed,
    #[error("no response received in {0:?}")]
    Timeout(Duration),
    #[error("the device responded with exception code {0}")]
    Exception(u8),
    #[error("requested {requested} registers, but the response contains {got}")]
    Incomplete { requested: u16, got: usize },
    #[error("{0} registers cannot be read with a single request")]
    TooManyRegisters(u16),
}

impl Error {
    /// Whether the connection can not be used for further requests after this error.
    fn breaks_connection(&self) -> bool {
        matches!(self, Error::Send(_) | Error::Receive(_) | Error::Closed | Error::Timeout(_))
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Connect to the controller over Modbus TCP (`host:port`).
    #[arg(long)]
    tcp: String,

    /// The modbus device ID.
    #[arg(long, short = 'i', default_value = "1")]
    device_id: u8,

    /// If the modbus response isn't received in this amount of time, consider the read failed.
    #[arg(long, default_value = "1s")]
    read_timeout: humantime::Duration,

    /// Give up connecting to the controller after this many attempts.
    #[arg(long, default_value = "50")]
    connect_attempts: usize,

    /// The amount of time to wait between connection attempts.
    #[arg(long, default_value = "10ms")]
    connect_retry_delay: humantime::Duration,
}

type TcpIo = Framed<TcpStream, ModbusTCPCodec>;

/// A Modbus TCP connection to the controller.
///
/// The connection is established on the first read and re-established after any error that
/// leaves the stream in an unknown state. Requests are sent one at a time.
pub struct Connection {
    args: Args,
    io: Mutex<Option<TcpIo>>,
    transaction_id_generator: AtomicU16,
}

impl Connection {
    pub fn new(args: Args) -> Connection {
        Self { args, io: Mutex::new(None), transaction_id_generator: AtomicU16::new(0) }
    }

    pub fn new_transaction_id(&self) -> u16 {
        self.transaction_id_generator.fetch_add(1, Ordering::Relaxed)
    }

    /// Read `count` holding registers starting at the 1-based `address`.
    pub async fn read_holdings(&self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        if count > MAX_READ_COUNT {
            return Err(Error::TooManyRegisters(count));
        }
        let mut guard = self.io.lock().await;
        let mut io = match guard.take() {
            Some(io) => io,
            None => self.connect().await?,
        };
        let request = Request {
            device_id: self.args.device_id,
            transaction_id: self.new_transaction_id(),
            address,
            count,
        };
        let result = self.exchange(&mut io, &request).await;
        match &result {
            Err(e) if e.breaks_connection() => {
                debug!(message = "dropping the connection", error = (e as &dyn std::error::Error));
            }
            _ => *guard = Some(io),
        }
        result
    }

    async fn exchange(&self, io: &mut TcpIo, request: &Request) -> Result<Vec<u16>, Error> {
        io.send(request).await.map_err(Error::Send)?;
        let read_timeout = *self.args.read_timeout;
        let deadline = tokio::time::Instant::now() + read_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, io.next())
                .await
                .map_err(|_| Error::Timeout(read_timeout))?;
            let response = next.ok_or(Error::Closed)?.map_err(Error::Receive)?;
            if response.transaction_id != request.transaction_id {
                debug!(
                    message = "a response we were not expecting",
                    transaction = response.transaction_id
                );
                continue;
            }
            trace!(message = "decoded a response", transaction = response.transaction_id);
            return match response.kind {
                ResponseKind::ErrorCode(code) => Err(Error::Exception(code)),
                ResponseKind::GetHoldings { values } if values.len() == usize::from(request.count) => {
                    Ok(values)
                }
                ResponseKind::GetHoldings { values } => {
                    Err(Error::Incomplete { requested: request.count, got: values.len() })
                }
            };
        }
    }

    async fn connect(&self) -> Result<TcpIo, Error> {
        let address = &self.args.tcp;
        info!(message = "connecting...", %address);
        let mut attempt = 1;
        loop {
            match self.try_connect(attempt).await {
                Ok(socket) => {
                    let nodelay_result = socket.set_nodelay(true);
                    trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
                    info!(message = "connected", attempt);
                    return Ok(Framed::new(socket, ModbusTCPCodec {}));
                }
                Err(e) if attempt < self.args.connect_attempts => {
                    debug!(
                        message = "connection attempt failed, will retry",
                        attempt,
                        error = (&e as &dyn std::error::Error)
                    );
                    tokio::time::sleep(*self.args.connect_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_connect(&self, attempt: usize) -> Result<TcpStream, Error> {
        let address = &self.args.tcp;
        let addresses = tokio::net::lookup_host(address)
            .await
            .map_err(|e| Error::LookupHost(e, address.to_string()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address.to_string(), attempt))
    }
}

impl WordSource for Connection {
    type Error = Error;

    async fn read_words(&self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        self.read_holdings(address, count).await
    }
}
