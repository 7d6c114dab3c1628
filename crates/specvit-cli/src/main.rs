//! SpecViT CLI.
//!
//! CLI для проверки конфигураций и классификации спектрограмм.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use audio::{load_wav, to_mono, MelSpectrogramExtractor, Resampler};
use candle_core::Tensor;
use specvit_core::{AudioBuffer, DeviceKind, FeatureExtractorConfig};
use specvit_model::{SpectrogramVit, VitConfig};

#[derive(Parser)]
#[command(name = "specvit")]
#[command(
    author,
    version,
    about = "SpecViT: spectrogram Vision Transformer classifier",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a model config and print its summary
    Inspect {
        /// Path to the model config (JSON)
        #[arg(long)]
        config: PathBuf,
    },

    /// Build a randomly initialised model and run one forward pass on random input
    Check {
        /// Path to the model config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Device override (cpu, cuda[:N], metal[:N])
        #[arg(long)]
        device: Option<DeviceKind>,

        /// Batch size of the random input
        #[arg(long, default_value_t = 2)]
        batch: usize,

        /// Number of time steps of the random input
        #[arg(long, default_value_t = 100)]
        steps: usize,

        /// Run in training mode (dropout active)
        #[arg(long, default_value_t = false)]
        train: bool,
    },

    /// Classify a WAV file
    Classify {
        /// Path to the model config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Path to the audio file (WAV format)
        #[arg(long)]
        audio: PathBuf,

        /// Safetensors weight files (repeatable). Без весов модель инициализируется случайно.
        #[arg(long)]
        weights: Vec<PathBuf>,

        /// Feature extractor config (JSON). По умолчанию: log-mel с `mels` из конфига модели.
        #[arg(long)]
        features: Option<PathBuf>,

        /// Device override (cpu, cuda[:N], metal[:N])
        #[arg(long)]
        device: Option<DeviceKind>,

        /// Number of labels to print
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("specvit=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { config } => run_inspect(&config),
        Commands::Check {
            config,
            device,
            batch,
            steps,
            train,
        } => run_check(&config, device, batch, steps, train),
        Commands::Classify {
            config,
            audio,
            weights,
            features,
            device,
            top_k,
        } => run_classify(&config, &audio, &weights, features.as_deref(), device, top_k),
    }
}

fn load_config(path: &Path, device: Option<DeviceKind>) -> Result<VitConfig> {
    let mut config = VitConfig::from_json_file(path)
        .with_context(|| format!("Cannot load model config {}", path.display()))?;
    if let Some(device) = device {
        config.device = device;
    }
    Ok(config)
}

fn run_inspect(path: &Path) -> Result<()> {
    let config = load_config(path, None)?;

    println!("📊 SpecViT config: {}", path.display());
    println!("================================");
    println!("Input:        [batch, {}, {}, steps]", config.in_channels, config.mels);
    println!(
        "Hidden size:  {} ({} heads x {})",
        config.hidden_size,
        config.num_heads,
        config.head_dim()
    );
    println!("FFN dim:      {}", config.ffn_dim());
    println!("Body:         {:?}", config.body_kind());
    println!("Encoders:     {}", config.num_encoders);
    if !config.use_encoder_only {
        println!("Decoders:     {}", config.num_decoders);
    }
    println!("Class token:  {}", config.use_learnable_token);
    match config.positional_encoding {
        Some(pe) => println!("Positions:    {:?}", pe),
        None => println!("Positions:    none"),
    }
    println!("Dropout:      {}", config.dropout_p);
    println!("Device:       {}", config.device);
    println!("Labels ({}):  {}", config.num_labels(), config.labels.join(", "));
    println!("Parameters:   {}", fmt_count(config.num_parameters()));
    Ok(())
}

fn run_check(
    path: &Path,
    device: Option<DeviceKind>,
    batch: usize,
    steps: usize,
    train: bool,
) -> Result<()> {
    println!("🧪 SpecViT - Setup Check");
    println!("========================");

    let config = load_config(path, device)?;
    let start = Instant::now();
    let (model, _varmap) = SpectrogramVit::init_random(config.clone())?;
    info!(elapsed = ?start.elapsed(), "Model built");

    let xs = Tensor::randn(
        0f32,
        1f32,
        (batch, config.in_channels, config.mels, steps),
        model.device(),
    )?;

    let start = Instant::now();
    let logits = model.forward_t(&xs, train)?;
    println!("Input shape:  {:?}", xs.dims());
    println!("Output shape: {:?}", logits.dims());
    println!("✅ Forward pass took {:.2?}", start.elapsed());
    Ok(())
}

fn run_classify(
    config_path: &Path,
    audio_path: &Path,
    weights: &[PathBuf],
    features: Option<&Path>,
    device: Option<DeviceKind>,
    top_k: usize,
) -> Result<()> {
    let config = load_config(config_path, device)?;

    let feature_config = match features {
        Some(path) => load_feature_config(path)?,
        None => FeatureExtractorConfig::default().with_n_mels(config.mels),
    };
    if feature_config.n_mels != config.mels {
        bail!(
            "Feature extractor produces {} mel bands, model expects {}",
            feature_config.n_mels,
            config.mels
        );
    }

    println!("🎧 SpecViT - Classification");
    println!("===========================");
    println!("Audio file: {}", audio_path.display());

    let start = Instant::now();
    let buffer = load_wav(audio_path)?;
    println!(
        "   Sample rate: {} Hz, Channels: {}, Duration: {:.2}s",
        buffer.sample_rate,
        buffer.channels,
        buffer.duration()
    );
    let buffer = match_channels(buffer, config.in_channels)?;
    let buffer = Resampler::new(feature_config.sample_rate).resample(&buffer)?;

    let model = if weights.is_empty() {
        warn!("No --weights given, using randomly initialised parameters");
        SpectrogramVit::init_random(config)?.0
    } else {
        SpectrogramVit::from_safetensors(config, weights)?
    };

    let extractor = MelSpectrogramExtractor::new(feature_config)?;
    let spectrogram = extractor.extract(&buffer, model.device())?;
    info!(
        frames = spectrogram.num_frames,
        channels = spectrogram.channels,
        "Spectrogram ready"
    );

    let logits = model.forward(&spectrogram.tensor)?;
    let predictions = model.labels().top_k(&logits, top_k)?;

    println!();
    for prediction in predictions.first().into_iter().flatten() {
        println!(
            "{:>6.2}%  {:<24} (logit {:.3})",
            prediction.probability * 100.0,
            prediction.label,
            prediction.logit
        );
    }
    println!();
    println!("✅ Done in {:.2?}", start.elapsed());
    Ok(())
}

fn load_feature_config(path: &Path) -> Result<FeatureExtractorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read feature config {}", path.display()))?;
    let config: FeatureExtractorConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Привести число каналов аудио к ожидаемому моделью.
fn match_channels(buffer: AudioBuffer, expected: usize) -> Result<AudioBuffer> {
    if buffer.channels == expected {
        return Ok(buffer);
    }
    if expected == 1 {
        info!(from = buffer.channels, "Downmixing to mono");
        return Ok(to_mono(&buffer));
    }
    if buffer.channels == 1 {
        info!(to = expected, "Duplicating mono channel");
        let samples = buffer
            .samples
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(expected))
            .collect();
        return Ok(AudioBuffer::new(samples, buffer.sample_rate, expected));
    }
    bail!(
        "Audio has {} channels, model expects {}",
        buffer.channels,
        expected
    )
}

fn fmt_count(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_channels() {
        let stereo = AudioBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 16000, 2);
        let mono = match_channels(stereo.clone(), 1).unwrap();
        assert_eq!(mono.samples, vec![0.5, 0.5]);

        let same = match_channels(stereo.clone(), 2).unwrap();
        assert_eq!(same.samples, stereo.samples);

        let up = match_channels(AudioBuffer::new(vec![0.1, 0.2], 16000, 1), 3).unwrap();
        assert_eq!(up.channels, 3);
        assert_eq!(up.samples, vec![0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);

        assert!(match_channels(stereo, 3).is_err());
    }

    #[test]
    fn test_fmt_count() {
        assert_eq!(fmt_count(999), "999");
        assert_eq!(fmt_count(12_345), "12.3K");
        assert_eq!(fmt_count(2_500_000), "2.50M");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "specvit",
            "classify",
            "--config",
            "model.json",
            "--audio",
            "clip.wav",
            "--weights",
            "a.safetensors",
            "--weights",
            "b.safetensors",
            "--device",
            "cuda:1",
        ])
        .unwrap();
        match cli.command {
            Commands::Classify {
                weights, device, top_k, ..
            } => {
                assert_eq!(weights.len(), 2);
                assert_eq!(device, Some(DeviceKind::Cuda(1)));
                assert_eq!(top_k, 5);
            }
            _ => panic!("expected classify"),
        }
    }
}
