//! Echo server: every message goes back to the connection that sent it.
//!
//! Run with:
//!   cargo run --example echo-server -- pipehub-echo
//!
//! In another terminal:
//!   cargo run --features cli -- connect pipehub-echo --data hello --count 1

use pipehub::engine::{event, IpcServer, PipeName, ServerConfig, ServerEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "pipehub-echo".to_string());
    let config = ServerConfig::new(PipeName::new(name)?).with_instances(4);

    let (sender, mut events) = event::channel::<ServerEvent>();
    let server = IpcServer::new(config, sender);
    server.start()?;
    if let Some(endpoint) = server.endpoint() {
        eprintln!(
            "Listening on {} ({} mode)",
            endpoint.display(),
            server.transmission_mode()
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ServerEvent::Connected(id)) => eprintln!("Connection {id} opened"),
                Some(ServerEvent::Message(id, payload)) => {
                    eprintln!("Echoing {} bytes to {id}", payload.len());
                    server.send_to(id, payload)?;
                }
                Some(ServerEvent::Disconnected(id)) => eprintln!("Connection {id} closed"),
                None => break,
            },
        }
    }

    server.stop().await;
    Ok(())
}
