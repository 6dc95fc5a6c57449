// ABOUTME: One-shot local HTTP listener for the OAuth redirect
// ABOUTME: Hands the authorization code back through a single-use channel

use crate::cancel::CancellationToken;
use crate::error::AuthError;
use crate::util::escape_html;
use reqwest::Url;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const SUCCESS_PAGE: &str = r#"<html>
<head><title>Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1>&#10004; Authorization Successful!</h1>
    <p>You can close this window and return to the terminal.</p>
</body>
</html>
"#;

fn failure_page(reason: &str) -> String {
    format!(
        r#"<html>
<head><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1>&#10008; Authorization Failed</h1>
    <p>Error: {}</p>
</body>
</html>
"#,
        escape_html(reason)
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthCode {
    pub code: String,
    pub state: Option<String>,
}

pub struct CallbackListener {
    listener: TcpListener,
    host: String,
    path: String,
}

impl CallbackListener {
    /// Binds before the browser is opened so the redirect cannot race the listener.
    pub fn bind(host: &str, port: u16, path: &str) -> Result<Self, AuthError> {
        let listener =
            TcpListener::bind((host, port)).map_err(|source| AuthError::CallbackBind {
                addr: format!("{}:{}", host, port),
                source,
            })?;

        Ok(CallbackListener {
            listener,
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Uses the configured host name with the port actually bound.
    pub fn redirect_uri(&self) -> io::Result<String> {
        let port = self.local_addr()?.port();
        Ok(format!("http://{}:{}{}", self.host, port, self.path))
    }

    /// Starts serving in the background; the first matching request resolves it.
    pub fn spawn(self, cancel: CancellationToken) -> PendingRedirect {
        let (tx, rx) = mpsc::sync_channel(1);
        let stop = CancellationToken::new();
        let worker_stop = stop.clone();
        let worker = thread::spawn(move || self.serve(tx, worker_stop, cancel));

        PendingRedirect {
            rx,
            stop,
            worker: Some(worker),
        }
    }

    fn serve(
        self,
        done: SyncSender<Result<AuthCode, AuthError>>,
        stop: CancellationToken,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.listener.set_nonblocking(true) {
            let _ = done.send(Err(AuthError::Storage(e)));
            return;
        }

        while !stop.is_cancelled() {
            if cancel.is_cancelled() {
                let _ = done.send(Err(AuthError::Cancelled));
                return;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => match handle_connection(stream, &self.path) {
                    Ok(Some(outcome)) => {
                        let _ = done.send(outcome);
                        return;
                    }
                    Ok(None) => debug!(%peer, "ignored request outside callback path"),
                    Err(e) => warn!(%peer, error = %e, "failed to read callback request"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = done.send(Err(AuthError::Storage(e)));
                    return;
                }
            }
        }
    }
}

/// A redirect that has not arrived yet.
pub struct PendingRedirect {
    rx: Receiver<Result<AuthCode, AuthError>>,
    stop: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl PendingRedirect {
    pub fn wait(mut self, timeout: Duration) -> Result<AuthCode, AuthError> {
        let outcome = match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(AuthError::CallbackTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(AuthError::NoCodeReceived),
        };

        self.stop.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        outcome
    }
}

impl Drop for PendingRedirect {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

pub fn await_one_redirect(
    bind_host: &str,
    bind_port: u16,
    path: &str,
    timeout: Duration,
) -> Result<AuthCode, AuthError> {
    CallbackListener::bind(bind_host, bind_port, path)?
        .spawn(CancellationToken::new())
        .wait(timeout)
}

/// `Ok(None)` means the request was answered but was not the redirect.
fn handle_connection(
    mut stream: TcpStream,
    path: &str,
) -> io::Result<Option<Result<AuthCode, AuthError>>> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header)?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let Ok(url) = Url::parse("http://localhost").and_then(|base| base.join(target)) else {
        respond(&mut stream, "400 Bad Request", &failure_page("Malformed request"))?;
        return Ok(None);
    };

    if url.path() != path {
        respond(&mut stream, "404 Not Found", "")?;
        return Ok(None);
    }

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let outcome = parse_redirect(&params);
    match &outcome {
        Ok(_) => respond(&mut stream, "200 OK", SUCCESS_PAGE)?,
        Err(e) => respond(&mut stream, "400 Bad Request", &failure_page(&e.to_string()))?,
    }

    Ok(Some(outcome))
}

fn parse_redirect(params: &HashMap<String, String>) -> Result<AuthCode, AuthError> {
    if let Some(code) = params.get("code").filter(|c| !c.is_empty()) {
        return Ok(AuthCode {
            code: code.clone(),
            state: params.get("state").cloned(),
        });
    }

    match params.get("error") {
        Some(error) => {
            let reason = match params.get("error_description") {
                Some(desc) => format!("{} ({})", error, desc),
                None => error.clone(),
            };
            Err(AuthError::AuthorizationDenied(reason))
        }
        None => Err(AuthError::NoCodeReceived),
    }
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}
