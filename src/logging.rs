use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Install the global tracing subscriber, teeing formatted log lines into
/// `log_tx` so the `/api/logs` SSE endpoint can replay them to the browser.
pub(crate) fn init(log_tx: broadcast::Sender<String>) {
    let writer = BroadcastMakeWriter { sender: log_tx };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();
}

#[derive(Clone)]
struct BroadcastMakeWriter {
    sender: broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
        }
    }
}

struct BroadcastWriter {
    sender: broadcast::Sender<String>,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        std::io::stdout().write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}
