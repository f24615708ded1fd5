use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Maximum log file size before rotation (5 MB)
const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;
/// Size to keep after rotation (1 MB of most recent logs)
const KEEP_SIZE: u64 = 1024 * 1024;

pub const LOG_FILE_NAME: &str = "mlsens.log";

/// Truncate the log to its most recent `KEEP_SIZE` bytes once it grows past
/// `MAX_LOG_SIZE`, starting at a line boundary.
fn rotate_log_if_needed(log_path: &Path) -> io::Result<()> {
    let len = match fs::metadata(log_path) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if len <= MAX_LOG_SIZE {
        return Ok(());
    }

    let mut tail = Vec::with_capacity(KEEP_SIZE as usize);
    {
        let mut file = File::open(log_path)?;
        file.seek(SeekFrom::Start(len - KEEP_SIZE))?;
        file.read_to_end(&mut tail)?;
    }
    let first_line = tail
        .iter()
        .position(|&b| b == b'\n')
        .map_or(0, |i| i + 1);

    let mut file = File::create(log_path)?;
    file.write_all(b"--- Log rotated (older entries removed) ---\n")?;
    file.write_all(&tail[first_line..])
}

/// Hands every tracing event the same appending file handle
#[derive(Clone)]
struct SharedLogFile(Arc<Mutex<File>>);

impl Write for SharedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

impl SharedLogFile {
    fn lock(&self) -> io::Result<MutexGuard<'_, File>> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))
    }
}

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = SharedLogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Initialize logging to a file in the output directory.
///
/// Logs are written to `{out_dir}/mlsens.log` with size-based rotation
/// (5 MB cap, last 1 MB kept). `RUST_LOG` overrides `level`. With `stderr`
/// set, warnings and errors are mirrored to the terminal.
pub fn init_logging(out_dir: &Path, level: &str, stderr: bool) -> color_eyre::Result<()> {
    fs::create_dir_all(out_dir)?;
    let log_path = out_dir.join(LOG_FILE_NAME);

    if let Err(err) = rotate_log_if_needed(&log_path) {
        eprintln!("Warning: could not rotate {}: {err}", log_path.display());
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_file = SharedLogFile(Arc::new(Mutex::new(file)));

    let default_filter = format!("mlsens={level},mlsens_core={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let stderr_layer = stderr.then(|| {
        fmt::layer()
            .with_writer(io::stderr.with_max_level(tracing::Level::WARN))
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(log_file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .with(stderr_layer)
        .init();

    tracing::info!(log_path = %log_path.display(), "Logging initialized");
    Ok(())
}
