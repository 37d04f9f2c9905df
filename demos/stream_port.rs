//! Stream bytes from a serial port to stdout.
//!
//! Port settings come from the usual configuration file and
//! `SERIAL_BINDINGS_*` environment overrides; the port name may be an alias
//! from `[serial.port_aliases]`.
//!
//! ```bash
//! cargo run --example stream_port -- /dev/ttyUSB0
//! ```

use futures::StreamExt;
use serial_bindings::{logging, ConfigLoader, NativeBinding, PushSource, StreamSlot};
use std::io::Write;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load()?.into_config();
    logging::init(&config.logging);

    let Some(name) = std::env::args().nth(1) else {
        eprintln!("usage: stream_port <port>");
        std::process::exit(2);
    };
    let path = config.serial.resolve_port(&name);

    let binding = NativeBinding::native(|signal| {
        error!(path = %signal.path, reason = %signal.reason, "device disconnected");
    });
    binding.open(&path, config.serial.open_options())?.await?;
    info!(%path, baud = config.serial.default_baud, "streaming; press Ctrl-C to stop");

    let mut stream = PushSource::builder()
        .binding(binding.clone())
        .sink(StreamSlot::default())
        .config(&config.stream)
        .build()?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    stdout.write_all(&chunk)?;
                    stdout.flush()?;
                }
                Some(Err(err)) => {
                    error!(error = %err, "read failed");
                    break;
                }
                None => break,
            },
        }
    }

    drop(stream);
    binding.close()?.await?;
    Ok(())
}
