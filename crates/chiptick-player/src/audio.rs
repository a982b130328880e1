use anyhow::{Context, Result, anyhow};
use chiptick_core::audio_queue::SampleConsumer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig};
use crossbeam_channel::Sender;
use log::{info, warn};

/// Default output device with a negotiated stream configuration.
pub struct OutputDevice {
    device: cpal::Device,
    config: StreamConfig,
    format: SampleFormat,
}

fn usable(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

impl OutputDevice {
    /// Open the default output device, preferring stereo at `sample_rate`.
    /// Falls back to the device's own default configuration.
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("no audio output device")?;

        let preferred = device
            .supported_output_configs()
            .context("failed to query output configs")?
            .filter(|range| range.channels() == 2 && usable(range.sample_format()))
            .filter(|range| {
                range.min_sample_rate().0 <= sample_rate && sample_rate <= range.max_sample_rate().0
            })
            .max_by_key(|range| range.sample_format() == SampleFormat::F32)
            .map(|range| range.with_sample_rate(SampleRate(sample_rate)));

        let supported = match preferred {
            Some(c) => c,
            None => {
                let fallback = device
                    .default_output_config()
                    .context("no supported output config")?;
                warn!(
                    "Output device does not support stereo at {sample_rate} Hz, using {} channels at {} Hz",
                    fallback.channels(),
                    fallback.sample_rate().0
                );
                fallback
            }
        };

        let format = supported.sample_format();
        if !usable(format) {
            return Err(anyhow!("unsupported sample format {format:?}"));
        }
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            "Audio output: {} ch, {} Hz, {format:?}",
            config.channels, config.sample_rate.0
        );

        Ok(Self {
            device,
            config,
            format,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Start the stream. The callback drains `consumer`, outputs silence
    /// when it runs dry and pokes `demand` after every buffer.
    pub fn start(self, consumer: SampleConsumer, demand: Sender<()>) -> Result<cpal::Stream> {
        let stream = match self.format {
            SampleFormat::I16 => self.build::<i16>(consumer, demand),
            SampleFormat::U16 => self.build::<u16>(consumer, demand),
            _ => self.build::<f32>(consumer, demand),
        }
        .context("failed to build output stream")?;

        stream.play().context("failed to start output stream")?;
        Ok(stream)
    }

    fn build<T>(
        &self,
        consumer: SampleConsumer,
        demand: Sender<()>,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.config.channels as usize;
        self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let [left, right] = consumer.pop().unwrap_or([0.0, 0.0]);
                    match frame {
                        [mono] => *mono = T::from_sample((left + right) * 0.5),
                        [l, r, rest @ ..] => {
                            *l = T::from_sample(left);
                            *r = T::from_sample(right);
                            rest.fill(T::EQUILIBRIUM);
                        }
                        [] => {}
                    }
                }
                let _ = demand.try_send(());
            },
            |err| warn!("Audio stream error: {err}"),
            None,
        )
    }
}
