//! Audio and image artifacts: WAV export, optional playback, image files.

use std::path::{Path, PathBuf};

use oxidiana_core::image::GeneratedImage;
use oxidiana_core::speech::{AudioBuffer, quantize};

/// Write `audio` as 16-bit PCM WAV at `<dir>/<message_id>.wav`.
pub fn export_wav(dir: &Path, message_id: &str, audio: &AudioBuffer) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{message_id}.wav"));
    let spec = hound::WavSpec {
        channels: audio.channel_count(),
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for s in audio.interleaved() {
        writer.write_sample(quantize(s))?;
    }
    writer.finalize()?;
    Ok(path)
}

/// Play through the default output device, blocking until done.
#[cfg(feature = "playback")]
pub fn play_blocking(audio: &AudioBuffer) -> anyhow::Result<()> {
    let (_stream, handle) = rodio::OutputStream::try_default()?;
    let sink = rodio::Sink::try_new(&handle)?;
    sink.append(rodio::buffer::SamplesBuffer::new(
        audio.channel_count(),
        audio.sample_rate,
        audio.interleaved(),
    ));
    sink.sleep_until_end();
    Ok(())
}

/// Without an output device, hold the "playing" state for the clip length.
#[cfg(not(feature = "playback"))]
pub fn play_blocking(audio: &AudioBuffer) -> anyhow::Result<()> {
    std::thread::sleep(audio.duration());
    Ok(())
}

fn extension_for(data_uri: &str) -> &'static str {
    let mime = data_uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .unwrap_or("");
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Save image bytes under `dir`, named by creation time.
pub fn save_image(dir: &Path, image: &GeneratedImage) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%3f");
    let path = dir.join(format!("{stamp}.{}", extension_for(&image.data_uri)));
    std::fs::write(&path, &image.bytes)?;
    Ok(path)
}
