//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! CLI entry point. Loads a TOML config, starts one `Camera` pipeline per
//! configured camera, and blocks until Ctrl-C. Docopt/`env_logger` scaffold
//! ported from `camera_hub/src/main.rs`.

#[macro_use]
extern crate serde_derive;

use std::collections::HashMap;
use std::fs;
use std::process::exit;
use std::sync::Arc;

use docopt::Docopt;

use viseron_core::camera::Camera;
use viseron_core::config::Config;
use viseron_core::detector::Detector;

const USAGE: &str = "
viseron: a self-hosted NVR core pipeline.

Usage:
  viseron <config-file>
  viseron (--version | -v)
  viseron (--help | -h)

Options:
    --version, -v    Show version
    --help, -h       Show help
";

#[derive(Debug, Clone, Deserialize)]
struct Args {
    arg_config_file: String,
}

/// Placeholder detector that finds nothing. Real backends (object/motion
/// inference engines) are out of this crate's scope (spec 1, 6) and are
/// wired in by whatever embeds `viseron-core`.
struct NullDetector {
    name: String,
    width: u32,
    height: u32,
}

impl Detector for NullDetector {
    fn name(&self) -> &str {
        &self.name
    }
    fn model_width(&self) -> u32 {
        self.width
    }
    fn model_height(&self) -> u32 {
        self.height
    }
    fn detect(&self, _frame: &viseron_core::detector::FrameToScan) -> anyhow::Result<Vec<viseron_core::detector::DetectedObject>> {
        Ok(Vec::new())
    }
}

fn main() {
    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let source = match fs::read_to_string(&args.arg_config_file) {
        Ok(source) => source,
        Err(e) => {
            log::error!("failed to read {}: {e}", args.arg_config_file);
            exit(1);
        }
    };

    let config = match Config::from_toml(&source) {
        Ok(config) => config,
        Err(e) => {
            log::error!("invalid configuration: {e}");
            exit(1);
        }
    };

    let mut cameras = Vec::new();
    for camera_config in config.camera {
        let mut detectors: HashMap<String, Arc<dyn Detector>> = HashMap::new();
        detectors.insert(
            "objects".to_string(),
            Arc::new(NullDetector { name: "objects".into(), width: 640, height: 640 }),
        );
        if camera_config.motion_detection.is_some() {
            detectors.insert(
                "motion".to_string(),
                Arc::new(NullDetector { name: "motion".into(), width: 320, height: 320 }),
            );
        }
        log::info!("starting camera '{}'", camera_config.name);
        cameras.push(Camera::start(camera_config, detectors));
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("install SIGINT/SIGTERM handler");
    let _ = rx.recv();

    log::info!("shutting down {} camera(s)", cameras.len());
    for camera in cameras {
        camera.shutdown();
    }
}
