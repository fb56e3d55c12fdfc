use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;

use pipehub_engine::{ConnectionId, IpcServer, ServerConfig, ServerHandler};
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, runtime, spawn_stdin_reader, ServeArgs, POLL_INTERVAL};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{print_event, EventRecord, OutputFormat};

/// Per-connection counters carried as the engine's application state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub messages: u64,
    pub bytes: u64,
}

/// Prints every server event in the selected format.
pub struct PrintingHandler {
    format: OutputFormat,
}

impl PrintingHandler {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl ServerHandler for PrintingHandler {
    type State = ConnectionStats;

    fn on_connected(&self, id: ConnectionId) -> ConnectionStats {
        print_event(&EventRecord::connected(Some(id)), self.format);
        ConnectionStats::default()
    }

    fn on_message(&self, id: ConnectionId, payload: &[u8], state: &mut ConnectionStats) {
        state.messages += 1;
        state.bytes += payload.len() as u64;
        print_event(&EventRecord::message(Some(id), payload), self.format);
    }

    fn on_disconnected(&self, id: ConnectionId, state: ConnectionStats) {
        debug!(%id, messages = state.messages, bytes = state.bytes, "connection totals");
        print_event(
            &EventRecord::disconnected(Some(id), Some(state.messages)),
            self.format,
        );
    }
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let runtime = runtime()?;
    let config = ServerConfig::new(args.name)
        .with_instances(args.instances)
        .with_buffer_size(args.buffer_size);
    let server = IpcServer::with_runtime(
        runtime.handle().clone(),
        config,
        PrintingHandler::new(format),
    );
    server
        .start()
        .map_err(|err| engine_error("start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let lines = (!args.ignore_stdin).then(spawn_stdin_reader);
    while running.load(Ordering::SeqCst) {
        let Some(lines) = &lines else {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };
        match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => broadcast_line(&server, line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("stdin closed");
                break;
            }
        }
    }

    server.stop_blocking();
    Ok(SUCCESS)
}

fn broadcast_line(server: &IpcServer<PrintingHandler>, line: String) {
    match server.broadcast(line) {
        Ok(true) => debug!(clients = server.connection_count(), "broadcast line"),
        Ok(false) => warn!("no clients connected; line dropped"),
        Err(err) => warn!(error = %err, "broadcast failed"),
    }
}

