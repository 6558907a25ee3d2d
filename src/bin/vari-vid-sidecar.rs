use std::io::{self, BufRead, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use vari_vid_core::error::AppError;
use vari_vid_core::{Config, Coordinator, FfmpegEncoder, sidecar_api};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn write_failure(writer: &SharedWriter, id: u64, summary: &str, detail: String) {
    let failure = RpcFailure {
        id,
        error: RpcErrorPayload {
            summary: summary.to_string(),
            detail,
        },
    };
    let _ = write_json_line_shared(writer, &failure);
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::FfmpegFailed { code, stderr } if *code == -1 => RpcErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => {
            let parsed = vari_vid_core::ffmpeg::parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn handle_request(
    runtime: &tokio::runtime::Runtime,
    coordinator: &Coordinator,
    request: RpcRequest,
    writer: &SharedWriter,
) {
    log::debug!(
        target: "vari_vid::sidecar",
        "request id={} method={}",
        request.id,
        request.method
    );
    let outcome = runtime.block_on(sidecar_api::dispatch(
        coordinator,
        &request.method,
        request.params,
    ));
    let written = match outcome {
        Ok(result) => write_json_line_shared(
            writer,
            &RpcSuccess {
                id: request.id,
                result,
            },
        ),
        Err(err) => {
            if !err.is_lookup_miss() {
                log::warn!(
                    target: "vari_vid::sidecar",
                    "{} failed: {}",
                    request.method,
                    err
                );
            }
            write_json_line_shared(
                writer,
                &RpcFailure {
                    id: request.id,
                    error: parse_error_payload(&err),
                },
            )
        }
    };
    if let Err(err) = written {
        write_failure(writer, request.id, "Serialization error", err.to_string());
    }
}

/// Forward coordinator events as `{"event", "payload"}` lines.
fn spawn_event_forwarder(
    runtime: &tokio::runtime::Runtime,
    coordinator: &Coordinator,
    writer: SharedWriter,
) {
    let mut events = coordinator.subscribe();
    runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = write_json_line_shared(&writer, &event);
                }
                Err(RecvError::Lagged(skipped)) => log::warn!(
                    target: "vari_vid::sidecar",
                    "Dropped {} job events",
                    skipped
                ),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = Config::from_env();
    config.ensure_dirs()?;
    sidecar_api::cleanup_startup_files(&config);

    let encoder = FfmpegEncoder::discover(&config).map_err(|e| {
        log::error!(target: "vari_vid::sidecar", "{}", e);
        io::Error::other(e.to_string())
    })?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let coordinator = Coordinator::new(config, encoder);
    let retention = runtime.block_on(async { coordinator.spawn_retention_loop() });
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    spawn_event_forwarder(&runtime, &coordinator, Arc::clone(&stdout));

    log::info!(
        target: "vari_vid::sidecar",
        "Ready (protocol v{}), outputs in {}",
        sidecar_api::PROTOCOL_VERSION,
        coordinator.outputs().dir().display()
    );

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                write_failure(&stdout, 0, "Invalid input stream", err.to_string());
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_failure(&stdout, 0, "Invalid request", err.to_string());
                continue;
            }
        };
        handle_request(&runtime, &coordinator, request, &stdout);
    }

    retention.abort();
    log::info!(target: "vari_vid::sidecar", "stdin closed, shutting down");
    Ok(())
}
