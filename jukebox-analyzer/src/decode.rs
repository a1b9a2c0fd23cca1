//! Decode an audio file to mono `f32` samples.

use jukebox_core::CoreError;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

const LOG_TARGET: &str = "jukebox::analyzer";

/// Whole-song mono signal
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

fn decode_error(reason: impl std::fmt::Display) -> CoreError {
    CoreError::AnalysisDecode {
        reason: reason.to_string(),
    }
}

/// Decode the first audio track, averaging channels down to mono.
///
/// # Errors
///
/// Returns `AnalysisDecode` if the file cannot be opened, has no audio
/// track, or yields no samples.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, CoreError> {
    let file = File::open(path).map_err(|e| decode_error(format!("{}: {e}", path.display())))?;
    let stream = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_error)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error("no supported audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_error)?;

    let mut samples = Vec::new();
    let mut skipped_packets = 0usize;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // end of stream, or a chained stream we do not follow
            Err(SymphoniaError::IoError(_) | SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                skipped_packets += 1;
                continue;
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(decode_error(e)),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);
        let capacity = u64::try_from(decoded.capacity()).unwrap_or(u64::MAX);
        let mut buffer = SampleBuffer::<f32>::new(capacity, spec);
        buffer.copy_interleaved_ref(decoded);

        if channels == 1 {
            samples.extend_from_slice(buffer.samples());
        } else {
            #[allow(clippy::cast_precision_loss)]
            let scale = 1.0 / channels as f32;
            samples.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(decode_error(format!(
            "{} contains no decodable audio",
            path.display()
        )));
    }
    debug!(
        target: LOG_TARGET,
        samples = samples.len(),
        sample_rate,
        skipped_packets,
        "decoded"
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
