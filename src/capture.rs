//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Capture (spec 4.2): spawns and supervises an external stream-reader
//! process, reads fixed-size NV12 frames off its stdout, and republishes
//! them on the bus. Grounded on `camera_hub/src/raspberry_pi/rpi_dual_stream.rs`
//! (subprocess spawn via `sh -c`, `Stdio::piped()`, `read_exact` sized to the
//! frame buffer) and `viseron/camera/stream.py` (command composition,
//! `check_command`'s stderr allow-list sanity probe).

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::bus::Bus;
use crate::config::StreamConfig;
use crate::error::PipelineError;
use crate::frame::{frame_bytes, RawFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Running,
    Faulted,
}

/// Shared, externally-toggleable capture status (spec 4.2's "only clearable
/// by explicit toggle").
pub struct CaptureHandle {
    faulted: AtomicBool,
    enabled: AtomicBool,
}

impl CaptureHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(CaptureHandle {
            faulted: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        })
    }

    pub fn status(&self) -> CaptureStatus {
        if self.faulted.load(Ordering::Acquire) {
            CaptureStatus::Faulted
        } else {
            CaptureStatus::Running
        }
    }

    /// Clear a FAULTED status and allow Capture to resume trying (spec 4.2
    /// step 3: "no further frames are emitted until external intervention").
    pub fn reset(&self) {
        self.faulted.store(false, Ordering::Release);
    }
}

fn build_command(stream: &StreamConfig, single_frame: bool) -> String {
    let mut parts = vec!["ffmpeg".to_string(), "-loglevel".to_string(), stream.ffmpeg_loglevel.clone()];
    parts.extend(stream.global_args.iter().cloned());
    parts.extend(stream.input_args.iter().cloned());
    parts.extend(stream.hwaccel_args.iter().cloned());
    parts.push("-i".to_string());
    parts.push(stream.stream_url.clone());
    if single_frame {
        parts.push("-frames:v".to_string());
        parts.push("1".to_string());
        parts.push("-f".to_string());
        parts.push("null".to_string());
        parts.push("-".to_string());
    } else {
        parts.extend(stream.filter_args.iter().cloned());
        parts.extend(stream.output_args.iter().cloned());
        parts.push("-f".to_string());
        parts.push("rawvideo".to_string());
        parts.push("-pix_fmt".to_string());
        parts.push("nv12".to_string());
        parts.push("-".to_string());
    }
    parts.join(" ")
}

/// A short one-frame invocation checking stderr against the configured
/// allow-list of known-transient errors (spec 4.2 step 2, ported from
/// `Stream.check_command`).
fn sanity_probe(stream: &StreamConfig) -> std::result::Result<(), String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(build_command(stream, true))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();
    let output = match output {
        Ok(o) => o,
        Err(e) => return Err(e.to_string()),
    };
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.is_empty() {
        return Ok(());
    }
    let recoverable = stream.ffmpeg_recoverable_errors.iter().any(|allowed| stderr.contains(allowed.as_str()));
    if recoverable {
        log::debug!("reader stderr matched recoverable allow-list: {stderr}");
        Ok(())
    } else {
        Err(stderr.to_string())
    }
}

/// Run Capture for one camera's primary (or secondary segments) reader until
/// `shutdown` fires. Internally owns the full restart/fault protocol of spec
/// 4.2; does not rely on an outer supervisor to retry, since FAULTED must
/// persist across restarts until explicit intervention.
pub fn run(stream: &StreamConfig, bus: &Bus, topic: &str, handle: &CaptureHandle, shutdown: &Receiver<()>) {
    let mut consecutive_failures: u32 = 0;

    'restart: loop {
        if shutdown.try_recv().is_ok() {
            return;
        }
        if handle.status() == CaptureStatus::Faulted {
            // Wait for explicit intervention; poll shutdown so the camera
            // can still be torn down cleanly while faulted.
            if shutdown.recv_timeout(Duration::from_secs(1)).is_ok() {
                return;
            }
            continue;
        }

        if consecutive_failures > 0 {
            if let Err(stderr) = sanity_probe(stream) {
                log::warn!("sanity probe failed, retrying in 5s: {stderr}");
                consecutive_failures += 1;
                if consecutive_failures > stream.fault_threshold {
                    log::error!("capture faulted after {consecutive_failures} consecutive failures");
                    handle.faulted.store(true, Ordering::Release);
                    let _ = bus.publish(&format!("{topic}/fault"), PipelineError::StreamFault { attempts: consecutive_failures }.to_string());
                    continue 'restart;
                }
                if shutdown.recv_timeout(Duration::from_secs(5)).is_ok() {
                    return;
                }
                continue 'restart;
            }
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(build_command(stream, false))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                log::error!("failed to spawn reader: {e}");
                consecutive_failures += 1;
                continue 'restart;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            consecutive_failures += 1;
            continue 'restart;
        };
        let mut reader = stdout;
        let bytes_per_frame = frame_bytes(stream.width.unwrap_or(0), stream.height.unwrap_or(0));
        let mut buffer = vec![0u8; bytes_per_frame];
        let mut last_frame_at = Instant::now();

        loop {
            if shutdown.try_recv().is_ok() {
                let _ = child.kill();
                return;
            }
            if last_frame_at.elapsed() > stream.frame_timeout() {
                log::warn!("frame timeout exceeded, restarting reader");
                let _ = child.kill();
                consecutive_failures += 1;
                continue 'restart;
            }
            match reader.read_exact(&mut buffer) {
                Ok(()) => {
                    last_frame_at = Instant::now();
                    consecutive_failures = 0;
                    match RawFrame::new(buffer.clone(), stream.width.unwrap_or(0), stream.height.unwrap_or(0)) {
                        Ok(frame) => {
                            if bus.publish(topic, frame).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            log::error!("decode fault, restarting reader: {e}");
                            let _ = child.kill();
                            continue 'restart;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("reader pipe read error: {e}");
                    let _ = child.kill();
                    consecutive_failures += 1;
                    continue 'restart;
                }
            }
        }
    }
}
