//! Local daemon: newline-delimited JSON over a private socket. The first frame of a connection
//! names its port; the connection is then the UI channel or the page-client channel until EOF.

use crate::{
    controller::Controller,
    paths::WalletPaths,
    rpc::{
        jsonrpc::{PageEnvelope, ENVELOPE_TYPE},
        ui::{UiMessage, UiRequest},
    },
};
use eyre::Context as _;
use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWriteExt as _, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, warn};

pub const MAX_FRAME_BYTES: u64 = 1_000_000;

pub const PORT_POPUP: &str = "gramWalletPopup";
pub const PORT_CONTENT_SCRIPT: &str = "gramWalletContentScript";

#[cfg(not(unix))]
pub const LOOPBACK_ADDR: &str = "127.0.0.1:41780";

#[cfg(unix)]
use tokio::net::UnixListener;

#[cfg(not(unix))]
use tokio::net::TcpListener;

#[derive(Debug, Deserialize)]
struct Hello {
    port: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Port {
    Ui,
    Page,
}

fn parse_hello(line: &[u8]) -> eyre::Result<Port> {
    let hello: Hello = serde_json::from_slice(line).context("decode hello frame")?;
    match hello.port.as_str() {
        PORT_POPUP => Ok(Port::Ui),
        PORT_CONTENT_SCRIPT => Ok(Port::Page),
        other => eyre::bail!("unknown port {other:?}"),
    }
}

enum Frame {
    Line(Vec<u8>),
    Oversized,
}

/// Newline-delimited frames. A frame never buffers more than `MAX_FRAME_BYTES` plus its newline.
struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    fn new(read: R) -> Self {
        Self {
            inner: BufReader::new(read),
            buf: Vec::new(),
        }
    }

    async fn next_frame(&mut self) -> eyre::Result<Option<Frame>> {
        self.buf.clear();
        let limit = MAX_FRAME_BYTES + 1;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if u64::try_from(n).is_ok_and(|n| n >= limit) {
            return Ok(Some(Frame::Oversized));
        }
        Ok(Some(Frame::Line(std::mem::take(&mut self.buf))))
    }
}

async fn write_frame<W, T>(out: &mut W, v: &T) -> eyre::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
    T: Serialize + Sync,
{
    out.write_all(format!("{}\n", serde_json::to_string(v)?).as_bytes())
        .await?;
    out.flush().await?;
    Ok(())
}

/// Drain a channel onto the socket until every sender is gone.
async fn pump<W, T>(mut out: W, mut rx: mpsc::UnboundedReceiver<T>)
where
    W: tokio::io::AsyncWrite + Unpin + Send,
    T: Serialize + Sync + Send,
{
    while let Some(v) = rx.recv().await {
        if let Err(e) = write_frame(&mut out, &v).await {
            debug!(error = %e, "connection write failed");
            break;
        }
    }
}

async fn serve_connection<S>(stream: S, ctl: Controller) -> eyre::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut frames = FrameReader::new(read_half);

    let first = match frames.next_frame().await? {
        None => return Ok(()),
        Some(Frame::Oversized) => eyre::bail!("oversized hello frame"),
        Some(Frame::Line(line)) => line,
    };
    let port = parse_hello(&first)?;

    match port {
        Port::Ui => {
            let (tx, rx) = mpsc::unbounded_channel::<UiMessage>();
            let writer = tokio::spawn(pump(write_half, rx));
            let id = ctl.connect_ui(tx);
            info!(conn = id, "ui connected");
            while let Some(frame) = frames.next_frame().await? {
                let Frame::Line(line) = frame else {
                    warn!(conn = id, "oversized ui frame, closing");
                    break;
                };
                let request: UiRequest = match serde_json::from_slice(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(conn = id, error = %e, "undecodable ui frame");
                        continue;
                    }
                };
                if let Err(e) = ctl.handle_ui_request(request).await {
                    debug!(conn = id, error = %e, "ui request failed");
                }
            }
            ctl.disconnect_ui(id);
            writer.abort();
        }
        Port::Page => {
            let (tx, rx) = mpsc::unbounded_channel::<PageEnvelope>();
            let writer = tokio::spawn(pump(write_half, rx));
            let replies = tx.clone();
            let id = ctl.connect_page(tx);
            info!(conn = id, "page client connected");
            while let Some(frame) = frames.next_frame().await? {
                let Frame::Line(line) = frame else {
                    warn!(conn = id, "oversized page frame, closing");
                    break;
                };
                let envelope: PageEnvelope = match serde_json::from_slice(&line) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(conn = id, error = %e, "undecodable page frame");
                        continue;
                    }
                };
                if envelope.kind != ENVELOPE_TYPE {
                    continue;
                }
                if let Some(response) = ctl.handle_page_message(envelope.message) {
                    if replies.send(response).is_err() {
                        break;
                    }
                }
            }
            ctl.disconnect_page(id);
            drop(replies);
            writer.abort();
        }
    }
    Ok(())
}

#[cfg(unix)]
fn bind_listener(paths: &WalletPaths) -> eyre::Result<UnixListener> {
    let p = paths.socket_path();
    if p.exists() {
        let md = std::fs::symlink_metadata(&p).context("stat existing socket path")?;
        if md.file_type().is_symlink() {
            eyre::bail!("refusing to remove symlink at {}", p.display());
        }
        std::fs::remove_file(&p)
            .with_context(|| format!("remove existing socket at {}", p.display()))?;
    }
    if let Some(parent) = p.parent() {
        crate::fsutil::ensure_private_dir(parent)?;
    }
    let l =
        UnixListener::bind(&p).with_context(|| format!("bind unix socket at {}", p.display()))?;

    {
        use std::os::unix::fs::PermissionsExt as _;
        if let Err(e) = std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "failed to set unix socket permissions");
        }
    }
    Ok(l)
}

#[cfg(not(unix))]
async fn bind_listener(_paths: &WalletPaths) -> eyre::Result<TcpListener> {
    TcpListener::bind(LOOPBACK_ADDR)
        .await
        .context("bind tcp listener (loopback)")
}

fn acquire_lock(paths: &WalletPaths) -> eyre::Result<std::fs::File> {
    let lock_path = paths.lock_path();
    let mut opts = std::fs::OpenOptions::new();
    opts.create(true).read(true).write(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        opts.mode(crate::fsutil::MODE_FILE_PRIVATE);
    }
    let f = opts
        .open(&lock_path)
        .with_context(|| format!("open lock file at {}", lock_path.display()))?;
    f.try_lock_exclusive()
        .with_context(|| format!("lock already held at {}", lock_path.display()))?;
    Ok(f)
}

/// Serve until interrupted. Only one daemon may own a data dir at a time.
pub async fn run_daemon(paths: &WalletPaths, ctl: Controller) -> eyre::Result<()> {
    paths.ensure_private_dirs()?;
    let _lock_file = acquire_lock(paths)?;

    #[cfg(unix)]
    let listener = bind_listener(paths)?;
    #[cfg(not(unix))]
    let listener = bind_listener(paths).await?;
    info!("daemon listening");

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted.context("accept connection")?;
                stream
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("wait for ctrl-c")?;
                info!("shutting down");
                break;
            }
        };
        let conn_ctl = ctl.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, conn_ctl).await {
                warn!(error = %e, "connection handler failed");
            }
        });
    }

    #[cfg(unix)]
    {
        if let Err(e) = std::fs::remove_file(paths.socket_path()) {
            debug!(error = %e, "socket cleanup failed");
        }
    }
    Ok(())
}
