use std::io::Write;

use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Capacity of the process log channel behind `/api/logs`.
const LOG_CHANNEL_CAPACITY: usize = 500;

/// Tees every formatted tracing line into a broadcast channel and, unless
/// suppressed, to stdout.
#[derive(Clone)]
pub(crate) struct BroadcastMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct BroadcastWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).trim_end().to_string();
        // No receivers is fine: nobody is tailing the logs.
        let _ = self.sender.send(line);
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber and return the sender process logs are
/// broadcast on. Installing twice keeps the first subscriber.
pub(crate) fn init(level: Level, echo_stdout: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(echo_stdout)
        .with_writer(BroadcastMakeWriter {
            sender: log_tx.clone(),
            suppress_stdout: !echo_stdout,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_tx
}
