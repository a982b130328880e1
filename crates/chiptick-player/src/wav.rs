use std::path::Path;

use anyhow::{Context, Result, bail};
use chiptick_core::Machine;
use log::info;

/// Render `seconds` of the current track into a 32-bit float stereo WAV file.
pub fn export(machine: &mut Machine, path: &Path, seconds: f32) -> Result<()> {
    let sample_rate = machine.config().sample_rate;
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    if let Some(parent) = path
        .parent()
        .and_then(|p| (!p.as_os_str().is_empty()).then_some(p))
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create WAV file {}", path.display()))?;

    let total_frames = (seconds.max(0.0) * sample_rate as f32) as usize;
    let mut written = 0;
    while written < total_frames {
        let Some(block) = machine.produce_tick() else {
            break;
        };
        if block.is_empty() {
            bail!("driver produced no audio after {written} frames");
        }
        let frames = (block.len() / 2).min(total_frames - written);
        for &sample in &block[..frames * 2] {
            writer
                .write_sample(sample)
                .context("failed to write sample")?;
        }
        written += frames;
    }

    writer.finalize().context("failed to finalize WAV file")?;
    info!("Wrote {written} frames to {}", path.display());
    Ok(())
}
