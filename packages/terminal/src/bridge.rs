// ABOUTME: Duplex relay between a client socket and a container exec stream
// ABOUTME: Runs the per-connection session state machine from init through teardown

use crate::error::{Result, TerminalError};
use crate::protocol::{
    self, notice, ClientMessage, CloseReason, Inbound, Outbound, CLOSE_GOING_AWAY,
    CLOSE_INTERNAL_ERROR, CLOSE_NORMAL,
};
use crate::registry::{RegistrationGuard, SessionHandle, SessionRegistry};
use bytes::Bytes;
use codebox_config as defaults;
use codebox_sandbox::{ExecHandle, ExecInput, ExecOutput, ExecStream, RuntimeClient};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long teardown waits for queued input to reach the exec before dropping it
const INPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Command started inside the container for each session
    pub shell: Vec<String>,
    /// Deadline for opening the exec and for resize calls
    pub exec_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            shell: vec![defaults::DEFAULT_TERMINAL_SHELL.to_string()],
            exec_timeout: Duration::from_secs(defaults::DEFAULT_RUNTIME_TIMEOUT_SECS),
        }
    }
}

/// Attaches client connections to interactive shells inside sandboxes.
///
/// Each call to [`TerminalBridge::serve`] drives one client connection. A
/// connection owns at most one session; the shared [`SessionRegistry`]
/// ensures a container has at most one session across all connections.
#[derive(Clone)]
pub struct TerminalBridge {
    runtime: Arc<dyn RuntimeClient>,
    registry: Arc<SessionRegistry>,
    settings: BridgeSettings,
}

impl TerminalBridge {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        registry: Arc<SessionRegistry>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            runtime,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Drive one client connection until it closes or its session ends.
    ///
    /// `inbound` yields frames read from the client socket; everything to be
    /// written back goes through `outbound`, whose receiver owns the socket's
    /// write half.
    pub async fn serve<S>(&self, inbound: S, outbound: mpsc::Sender<Outbound>)
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        let mut connection = Connection {
            bridge: self,
            outbound,
            session: None,
        };
        connection.run(inbound).await;
    }

    async fn open_exec_stream(&self, container_id: &str) -> Result<(ExecHandle, ExecStream)> {
        let setup = async {
            let exec = self
                .runtime
                .open_exec(container_id, &self.settings.shell, true)
                .await?;
            let stream = self.runtime.start_exec_stream(&exec).await?;
            Ok::<_, TerminalError>((exec, stream))
        };

        tokio::time::timeout(self.settings.exec_timeout, setup)
            .await
            .map_err(|_| TerminalError::Timeout {
                operation: "open exec",
                seconds: self.settings.exec_timeout.as_secs(),
            })?
    }
}

enum StreamExit {
    Ended,
    Failed(String),
    ClientGone,
}

enum SessionEvent {
    Exited(StreamExit),
    Terminated,
}

enum Event {
    Client(Option<Inbound>),
    Session(SessionEvent),
}

enum Teardown {
    ClientClosed,
    StreamEnded,
    StreamFailed(String),
    Terminated,
}

enum Flow {
    Continue,
    Stop(Teardown),
}

struct ActiveSession {
    handle: SessionHandle,
    /// Client input queued for the writer task; `None` once teardown closed it
    stdin: Option<mpsc::UnboundedSender<Bytes>>,
    writer: JoinHandle<()>,
    pump: JoinHandle<()>,
    exit: mpsc::Receiver<StreamExit>,
    _registration: RegistrationGuard,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.pump.abort();
        self.writer.abort();
    }
}

struct Connection<'a> {
    bridge: &'a TerminalBridge,
    outbound: mpsc::Sender<Outbound>,
    session: Option<ActiveSession>,
}

impl Connection<'_> {
    async fn run<S>(&mut self, mut inbound: S)
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        loop {
            let event = tokio::select! {
                frame = inbound.next() => Event::Client(frame),
                event = next_session_event(&mut self.session) => Event::Session(event),
            };

            let flow = match event {
                Event::Client(Some(Inbound::Text(text))) => self.handle_frame(text.as_bytes()).await,
                Event::Client(Some(Inbound::Binary(data))) => self.handle_frame(&data).await,
                Event::Client(Some(Inbound::Close)) | Event::Client(None) => {
                    Flow::Stop(Teardown::ClientClosed)
                }
                Event::Session(SessionEvent::Exited(StreamExit::Ended)) => {
                    Flow::Stop(Teardown::StreamEnded)
                }
                Event::Session(SessionEvent::Exited(StreamExit::Failed(reason))) => {
                    Flow::Stop(Teardown::StreamFailed(reason))
                }
                Event::Session(SessionEvent::Exited(StreamExit::ClientGone)) => {
                    Flow::Stop(Teardown::ClientClosed)
                }
                Event::Session(SessionEvent::Terminated) => Flow::Stop(Teardown::Terminated),
            };

            if let Flow::Stop(cause) = flow {
                self.teardown(cause).await;
                break;
            }
        }
    }

    async fn handle_frame(&mut self, payload: &[u8]) -> Flow {
        match protocol::decode(payload) {
            Ok(ClientMessage::Init { container_id }) => {
                self.init(container_id).await;
                Flow::Continue
            }
            Ok(ClientMessage::Stdin {
                container_id,
                input,
            }) => {
                self.stdin(&container_id, input.as_bytes()).await;
                Flow::Continue
            }
            Ok(ClientMessage::Resize {
                container_id,
                cols,
                rows,
            }) => {
                self.resize(&container_id, cols, rows).await;
                Flow::Continue
            }
            Err(err) => {
                warn!("Rejected terminal message: {}", err);
                notify(&self.outbound, notice::rejected(&err)).await;
                Flow::Continue
            }
        }
    }

    async fn init(&mut self, container_id: String) {
        let attached = self
            .session
            .as_ref()
            .map(|session| session.handle.container_id.clone());
        if let Some(current) = attached {
            notify(&self.outbound, notice::already_initialized(&current)).await;
            return;
        }

        let (exec, stream) = match self.bridge.open_exec_stream(&container_id).await {
            Ok(opened) => opened,
            Err(err) => {
                error!(
                    "Failed to open terminal for container {}: {}",
                    container_id, err
                );
                notify(
                    &self.outbound,
                    notice::init_failed(&container_id, &err.to_string()),
                )
                .await;
                return;
            }
        };

        let handle = SessionHandle::new(container_id.clone(), exec);
        if !self.bridge.registry.try_register(handle.clone()) {
            warn!("{}", TerminalError::SessionConflict(container_id.clone()));
            // Dropping the stream closes the new exec's stdin so its shell exits
            drop(stream);
            notify(&self.outbound, notice::conflict(&container_id)).await;
            return;
        }
        let registration = RegistrationGuard::new(self.bridge.registry.clone(), &handle);

        notify(&self.outbound, notice::connected(&container_id)).await;

        let (output, input) = stream.into_split();
        // One slot each for the pump and the writer
        let (exit_tx, exit_rx) = mpsc::channel(2);
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(feed_input(input, stdin_rx, exit_tx.clone()));
        let pump = tokio::spawn(pump_output(output, self.outbound.clone(), exit_tx));

        info!(
            session_id = %handle.session_id,
            exec_id = %handle.exec.id,
            "Terminal session active for container {}",
            container_id
        );

        self.session = Some(ActiveSession {
            handle,
            stdin: Some(stdin_tx),
            writer,
            pump,
            exit: exit_rx,
            _registration: registration,
        });
    }

    async fn stdin(&mut self, container_id: &str, input: &[u8]) {
        let queue = match &self.session {
            Some(session) if session.handle.container_id == container_id => session.stdin.clone(),
            Some(_) => {
                notify(&self.outbound, notice::wrong_container(container_id)).await;
                return;
            }
            None => {
                notify(&self.outbound, notice::not_initialized()).await;
                return;
            }
        };

        // A closed queue means the writer failed; its exit event ends the session
        let queued = queue.is_some_and(|queue| queue.send(Bytes::copy_from_slice(input)).is_ok());
        if !queued {
            debug!("Dropped input for container {}", container_id);
        }
    }

    async fn resize(&mut self, container_id: &str, cols: u16, rows: u16) {
        let exec = match &self.session {
            Some(session) if session.handle.container_id == container_id => {
                Some(session.handle.exec.clone())
            }
            Some(_) => None,
            None => {
                notify(&self.outbound, notice::not_initialized()).await;
                return;
            }
        };
        let Some(exec) = exec else {
            notify(&self.outbound, notice::wrong_container(container_id)).await;
            return;
        };

        // Resize failures never affect the session
        match tokio::time::timeout(
            self.bridge.settings.exec_timeout,
            self.bridge.runtime.resize_exec(&exec, cols, rows),
        )
        .await
        {
            Ok(Ok(())) => debug!(
                "Resized terminal for container {} to {}x{}",
                container_id, cols, rows
            ),
            Ok(Err(err)) => warn!(
                "Failed to resize terminal for container {}: {}",
                container_id, err
            ),
            Err(_) => warn!(
                "Timed out resizing terminal for container {}",
                container_id
            ),
        }
    }

    /// Release the session's resources. Safe to call more than once.
    async fn teardown(&mut self, cause: Teardown) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let container_id = session.handle.container_id.clone();

        // Closing the queue lets the writer flush what it holds and shut the input down
        drop(session.stdin.take());
        if tokio::time::timeout(INPUT_DRAIN_TIMEOUT, &mut session.writer)
            .await
            .is_err()
        {
            debug!(
                "Exec input for container {} is not draining, dropping it",
                container_id
            );
        }
        // Aborts the pump and writer and releases the registry entry
        drop(session);

        let close = match cause {
            Teardown::ClientClosed => {
                info!("Client disconnected from container {}", container_id);
                return;
            }
            Teardown::StreamEnded => {
                info!("Terminal session for container {} ended", container_id);
                Some(CloseReason::new(CLOSE_NORMAL, "Terminal session ended"))
            }
            Teardown::StreamFailed(reason) => {
                error!(
                    "Terminal stream for container {} failed: {}",
                    container_id, reason
                );
                Some(CloseReason::new(
                    CLOSE_INTERNAL_ERROR,
                    format!("Terminal stream error: {}", reason),
                ))
            }
            Teardown::Terminated => {
                info!("Terminal session for container {} terminated", container_id);
                Some(CloseReason::new(CLOSE_GOING_AWAY, "Terminal session terminated"))
            }
        };

        let _ = self.outbound.send(Outbound::Close(close)).await;
    }
}

async fn notify(outbound: &mpsc::Sender<Outbound>, text: String) {
    if outbound.send(Outbound::Notice(text)).await.is_err() {
        debug!("Client went away before notice could be delivered");
    }
}

async fn next_session_event(session: &mut Option<ActiveSession>) -> SessionEvent {
    let Some(session) = session.as_mut() else {
        return std::future::pending().await;
    };
    let shutdown = session.handle.shutdown_token().clone();

    tokio::select! {
        exit = session.exit.recv() => SessionEvent::Exited(exit.unwrap_or(StreamExit::Ended)),
        _ = shutdown.cancelled() => SessionEvent::Terminated,
    }
}

/// Write client input to the exec stdin in arrival order
async fn feed_input(
    mut input: ExecInput,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    exit: mpsc::Sender<StreamExit>,
) {
    while let Some(chunk) = queue.recv().await {
        let written = async {
            input.write_all(&chunk).await?;
            input.flush().await
        };
        if let Err(err) = written.await {
            let _ = exit.send(StreamExit::Failed(err.to_string())).await;
            return;
        }
    }

    if let Err(err) = input.shutdown().await {
        debug!("Exec input already closed: {}", err);
    }
}

/// Forward exec output to the client in arrival order
async fn pump_output(
    mut output: ExecOutput,
    outbound: mpsc::Sender<Outbound>,
    exit: mpsc::Sender<StreamExit>,
) {
    let result = loop {
        match output.next().await {
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                if outbound.send(Outbound::Output(chunk)).await.is_err() {
                    break StreamExit::ClientGone;
                }
            }
            Some(Err(err)) => break StreamExit::Failed(err.to_string()),
            None => break StreamExit::Ended,
        }
    };

    let _ = exit.send(result).await;
}
