use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::Arc;

use pipehub_engine::{event, ClientConfig, ClientEvent, EventSender, IpcClient};
use tracing::{debug, warn};

use crate::cmd::{
    install_ctrlc_handler, parse_duration, runtime, spawn_stdin_reader, ConnectArgs,
    POLL_INTERVAL,
};
use crate::exit::{engine_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, EventRecord, OutputFormat};

type Client = IpcClient<EventSender<ClientEvent>>;

pub fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let runtime = runtime()?;

    let config = ClientConfig::new(args.name)
        .with_connect_timeout(timeout)
        .with_buffer_size(args.buffer_size);
    let (sender, mut events) = event::channel::<ClientEvent>();
    let client = IpcClient::with_runtime(runtime.handle().clone(), config, sender);
    client
        .connect_blocking()
        .map_err(|err| engine_error("connect failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    // With --data the payloads are the whole input; otherwise stdin is.
    let mut lines = args.data.is_empty().then(spawn_stdin_reader);
    for data in args.data {
        send(&client, data)?;
    }

    let mut received = 0usize;
    while running.load(Ordering::SeqCst) {
        match runtime.block_on(tokio::time::timeout(POLL_INTERVAL, events.recv())) {
            Ok(Some(ClientEvent::Connected)) => {
                print_event(&EventRecord::connected(None), format);
            }
            Ok(Some(ClientEvent::Message(payload))) => {
                print_event(&EventRecord::message(None, &payload), format);
                received += 1;
            }
            Ok(Some(ClientEvent::Disconnected)) | Ok(None) => {
                print_event(&EventRecord::disconnected(None, None), format);
                let satisfied = args.count.is_none_or(|count| received >= count);
                return Ok(if satisfied { SUCCESS } else { FAILURE });
            }
            Err(_) => {}
        }

        if let Some(count) = args.count {
            if received >= count {
                break;
            }
        }

        let mut input_done = lines.is_none();
        if let Some(rx) = &lines {
            loop {
                match rx.try_recv() {
                    Ok(line) => send(&client, line)?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        debug!("stdin closed");
                        input_done = true;
                        break;
                    }
                }
            }
        }
        if input_done {
            lines = None;
            if args.count.is_none() {
                break;
            }
        }
    }

    runtime.block_on(client.flush());
    client.stop();
    Ok(SUCCESS)
}

fn send(client: &Client, payload: String) -> CliResult<()> {
    if payload.is_empty() {
        debug!("skipping empty payload");
        return Ok(());
    }
    let sent = client
        .send(payload)
        .map_err(|err| engine_error("send failed", err))?;
    if !sent {
        warn!("not connected; payload dropped");
    }
    Ok(())
}
