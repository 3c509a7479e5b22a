use crate::{
    errors,
    http::{channel::Channel, request::Request},
    limits::{ConnLimits, ReqLimits, ServerLimits, WaitStrategy},
    report::{ErrorSink, LogSink},
    server::connection::Engine,
};
use crossbeam::queue::SegQueue;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::{sleep as tokio_sleep, timeout},
};

/// Boxed error escaping a request handler, reported through the
/// configured [`ErrorSink`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The dispatch callback: invoked exactly once per parsed request.
///
/// This is where routing, caching, and handler execution are composed;
/// the server core itself does not interpret the request beyond its
/// framing.
///
/// # Examples
///
/// ```
/// use strand_web::{BoxError, Channel, Handler, Request};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, req: &mut Request, chan: &mut Channel) -> Result<(), BoxError> {
///         if req.path() == "/health" {
///             chan.send_response_and_close("200 OK", &[], Some(b"ok")).await?;
///         } else {
///             chan.not_found(req.uri()).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// # Errors
///
/// A returned error is funneled to the [`ErrorSink`] with full request
/// context. If no response byte was written yet, the client receives a
/// generic `500` page; otherwise the connection is torn down as-is.
pub trait Handler
where
    Self: Sync + Send + 'static,
{
    fn handle(
        &self,
        request: &mut Request,
        channel: &mut Channel,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// An HTTP/1.1 server multiplexing connections over a pre-spawned worker
/// pool.
///
/// # Examples
///
/// ```no_run
/// use strand_web::{BoxError, Channel, Handler, Request, Server};
/// use tokio::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut Request, chan: &mut Channel) -> Result<(), BoxError> {
///         chan.send_response_and_close("200 OK", &[], Some(b"It works!")).await?;
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder<H>() -> ServerBuilder<H>
    where
        H: Handler,
    {
        ServerBuilder {
            listener: None,
            handler: None,
            error_sink: None,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
        }
    }

    /// Starts accepting connections. Accepted sockets are queued for the
    /// workers; when the queue is full they are handed to the `503`
    /// responders instead.
    #[inline]
    pub async fn launch(self) {
        loop {
            let Ok(value) = self.listener.accept().await else {
                continue;
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(value),
                false => self.error_queue.push(value),
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H>
where
    H: Handler,
{
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    error_sink: Option<Arc<dyn ErrorSink>>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl<H> ServerBuilder<H>
where
    H: Handler,
{
    /// Sets the TCP listener the server will accept connections from.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs the error-reporting handle threaded through every
    /// connection engine. Defaults to [`LogSink`].
    #[inline(always)]
    pub fn error_sink<S: ErrorSink>(mut self, sink: S) -> Self {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Configures concurrency and queueing limits.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection timeouts and the keep-alive policy.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Finalizes the builder, spawns the worker pool, and constructs a
    /// [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `handler` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let handler = self
            .handler
            .expect("The `handler` method must be called to create");
        let sink: Arc<dyn ErrorSink> = self.error_sink.unwrap_or_else(|| Arc::new(LogSink));

        let server_limits = self.server_limits.unwrap_or_default();
        let conn_limits = self.connection_limits.unwrap_or_default();
        let req_limits = self.request_limits.unwrap_or_default();

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        let error_queue: TcpQueue = Arc::new(SegQueue::new());

        for _ in 0..server_limits.max_connections {
            Self::spawn_worker(
                &stream_queue,
                &server_limits.wait_strategy,
                Engine {
                    handler: handler.clone(),
                    sink: sink.clone(),
                    conn_limits: conn_limits.clone(),
                    req_limits: req_limits.clone(),
                },
            );
        }
        if server_limits.count_503_handlers != 0 {
            for _ in 0..server_limits.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &server_limits.wait_strategy, &conn_limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &server_limits.wait_strategy);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits,
        }
    }

    #[inline]
    fn spawn_worker(queue: &TcpQueue, wait: &WaitStrategy, engine: Engine<H>) {
        let queue = queue.clone();
        let wait = wait.clone();

        tokio::spawn(async move {
            loop {
                let (stream, addr) = Server::get_stream(&queue, &wait).await;
                let _ = stream.set_nodelay(true);

                engine.run(stream, addr).await;
            }
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, wait: &WaitStrategy, conn_limits: &ConnLimits) {
        let queue = queue.clone();
        let wait = wait.clone();
        let write_timeout = conn_limits.socket_write_timeout;

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = Server::get_stream(&queue, &wait).await;

                let _ = timeout(
                    write_timeout,
                    stream.write_all(errors::SERVICE_UNAVAILABLE),
                )
                .await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, wait: &WaitStrategy) {
        let queue = queue.clone();
        let wait = wait.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = Server::get_stream(&queue, &wait).await;

                drop(stream);
            }
        });
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
