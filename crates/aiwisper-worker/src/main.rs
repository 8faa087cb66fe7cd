//! AIWisper Worker Process
//!
//! Isolated worker process for ML inference to prevent memory leaks (or a
//! native crash) from affecting the main application. Communication is via
//! JSON over stdin/stdout, one command/response per line.

use aiwisper_ml::diarization::{FluidDiarizationConfig, FluidDiarizationEngine};
use aiwisper_ml::traits::TranscriptionEngine;
use aiwisper_ml::whisper::WhisperEngine;
use aiwisper_types::{WorkerCommand, WorkerResponse};
use anyhow::Result;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing to stderr (stdout is for IPC)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    tracing::info!("AIWisper worker starting");

    if let Err(e) = run_worker() {
        tracing::error!("Worker error: {}", e);
        std::process::exit(1);
    }
}

/// Lazily-initialized native engines, kept alive for the process lifetime
/// so repeated commands reuse a loaded model instead of paying load cost
/// per call. `engine` in `WorkerCommand::Transcribe` is the model path the
/// parent resolved from its model registry; it doubles as the cache key.
struct EngineCache {
    transcribers: HashMap<String, Box<dyn TranscriptionEngine>>,
    diarizer: Option<FluidDiarizationEngine>,
}

impl EngineCache {
    fn new() -> Self {
        Self {
            transcribers: HashMap::new(),
            diarizer: None,
        }
    }

    fn transcribe(&mut self, samples: &[f32], engine: &str) -> Result<WorkerResponse> {
        if !self.transcribers.contains_key(engine) {
            tracing::info!("Loading whisper model: {}", engine);
            let loaded = WhisperEngine::new(engine)?;
            self.transcribers
                .insert(engine.to_string(), Box::new(loaded));
        }
        let transcriber = self.transcribers.get(engine).expect("just inserted");
        let result = transcriber.transcribe(samples)?;
        Ok(WorkerResponse::Transcription(result))
    }

    fn diarize(&mut self, samples: &[f32]) -> Result<WorkerResponse> {
        if self.diarizer.is_none() {
            tracing::info!("Initializing diarization engine");
            self.diarizer = Some(FluidDiarizationEngine::new(
                FluidDiarizationConfig::default(),
            )?);
        }
        let diarizer = self.diarizer.as_ref().expect("just initialized");
        let segments = diarizer.diarize(samples)?;
        let num_speakers = segments
            .iter()
            .map(|s| s.speaker)
            .collect::<std::collections::HashSet<_>>()
            .len() as i32;
        Ok(WorkerResponse::Diarization {
            segments,
            num_speakers,
        })
    }
}

fn run_worker() -> Result<()> {
    let mut engines = EngineCache::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    tracing::info!("Worker ready, listening for commands");

    for line in stdin.lock().lines() {
        let line = line?;

        if line.is_empty() {
            continue;
        }

        let command: WorkerCommand = match serde_json::from_str(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                let response = WorkerResponse::Error {
                    message: format!("Invalid command: {}", e),
                };
                writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
                stdout.flush()?;
                continue;
            }
        };

        let response = match command {
            WorkerCommand::Diarize { samples } => {
                tracing::debug!("Diarizing {} samples", samples.len());
                engines.diarize(&samples).unwrap_or_else(|e| {
                    tracing::error!("Diarization failed: {}", e);
                    WorkerResponse::Error {
                        message: e.to_string(),
                    }
                })
            }

            WorkerCommand::Transcribe { samples, engine } => {
                tracing::debug!("Transcribing {} samples with {}", samples.len(), engine);
                engines.transcribe(&samples, &engine).unwrap_or_else(|e| {
                    tracing::error!("Transcription failed: {}", e);
                    WorkerResponse::Error {
                        message: e.to_string(),
                    }
                })
            }

            WorkerCommand::Shutdown => {
                tracing::info!("Shutdown command received");
                let response = WorkerResponse::Ok;
                writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
                stdout.flush()?;
                break;
            }
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    tracing::info!("Worker shutting down");
    Ok(())
}
