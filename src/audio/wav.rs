//! WAV input for offline calls, and the resampler shared by capture and playback.

use crate::audio::recorder::AudioSource;
use crate::defaults::{CHUNK_SIZE, SAMPLE_RATE};
use crate::error::{LeadlineError, Result};
use std::io::Read;
use std::path::Path;

/// Decode WAV data into mono PCM16 at `target_rate`.
///
/// Accepts integer PCM of any bit depth and 32-bit float, any channel count.
pub fn decode_wav<R: Read>(reader: R, target_rate: u32) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| LeadlineError::AudioCapture {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let raw_samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let shift = u32::from(spec.bits_per_sample.saturating_sub(16));
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<Vec<_>, _>>(),
    }
    .map_err(|e| LeadlineError::AudioCapture {
        message: format!("Failed to read WAV samples: {}", e),
    })?;

    Ok(resample(&downmix(raw_samples, channels), spec.sample_rate, target_rate))
}

/// Average interleaved frames down to one channel.
fn downmix(interleaved: Vec<i16>, channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved;
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().copied().map(i32::from).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// A recorded caller played into the engine in fixed-size reads.
///
/// The whole file is decoded up front to 16 kHz mono.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    chunk_size: usize,
}

impl WavAudioSource {
    /// Decode from any reader.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let samples = decode_wav(reader, SAMPLE_RATE)?;
        Ok(Self {
            samples,
            position: 0,
            chunk_size: CHUNK_SIZE,
        })
    }

    /// Open a WAV file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| LeadlineError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)))
    }

    /// Change how many samples each read returns.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Append trailing silence, e.g. to let idle timers run out after the
    /// recorded caller stops talking.
    pub fn with_trailing_silence(mut self, seconds: u32) -> Self {
        let extra = (SAMPLE_RATE as usize) * seconds as usize;
        self.samples.resize(self.samples.len() + extra, 0);
        self
    }

    /// Total length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(SAMPLE_RATE)
    }

    /// Consume the source and return all samples as a single buffer.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.position = self.samples.len();
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let rest = self.samples.get(self.position..).unwrap_or_default();
        let chunk = &rest[..rest.len().min(self.chunk_size)];
        self.position += chunk.len();
        Ok(chunk.to_vec())
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Linear-interpolation resampler.
///
/// Output length is `ceil(len * to_rate / from_rate)`; the last input sample is
/// held past the end.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let Some(&last) = samples.last() else {
        return Vec::new();
    };
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / step).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);
    for n in 0..out_len {
        let pos = n as f64 * step;
        let idx = pos as usize;
        let value = match (samples.get(idx), samples.get(idx + 1)) {
            (Some(&a), Some(&b)) => {
                let frac = pos - idx as f64;
                f64::from(a) + (f64::from(b) - f64::from(a)) * frac
            }
            (Some(&a), None) => f64::from(a),
            _ => f64::from(last),
        };
        out.push(value as i16);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn from_reader_16khz_mono_matches_exactly() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        assert_eq!(source.samples, input_samples);
        assert_eq!(source.chunk_size, 512);
    }

    #[test]
    fn decode_downmixes_stereo() {
        let wav_data = make_wav_data(16000, 2, &[-100, 100, 300, -300, 1000, 2000]);
        let samples = decode_wav(Cursor::new(wav_data), 16000).unwrap();
        assert_eq!(samples, vec![0, 0, 1500]);
    }

    #[test]
    fn decode_resamples_24khz_speech_to_16khz() {
        let wav_data = make_wav_data(24000, 1, &vec![500i16; 2400]);
        let samples = decode_wav(Cursor::new(wav_data), 16000).unwrap();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|&s| s == 500));
    }

    #[test]
    fn decode_float_wav() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(1.0f32).unwrap();
        writer.write_sample(0.0f32).unwrap();
        writer.finalize().unwrap();

        let samples = decode_wav(Cursor::new(cursor.into_inner()), 16000).unwrap();
        assert_eq!(samples, vec![i16::MAX, 0]);
    }

    #[test]
    fn reads_in_chunks_then_ends() {
        let wav_data = make_wav_data(16000, 1, &vec![1i16; 1000]);
        let mut source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data)))
            .unwrap()
            .with_chunk_size(400);

        assert!(source.is_finite());
        assert_eq!(source.read_samples().unwrap().len(), 400);
        assert_eq!(source.read_samples().unwrap().len(), 400);
        assert_eq!(source.read_samples().unwrap().len(), 200);
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn trailing_silence_extends_duration() {
        let wav_data = make_wav_data(16000, 1, &vec![1i16; 16000]);
        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data)))
            .unwrap()
            .with_trailing_silence(2);
        assert!((source.duration_secs() - 3.0).abs() < f64::EPSILON);
        let samples = source.into_samples();
        assert_eq!(samples[16000], 0);
    }

    #[test]
    fn stop_ends_input() {
        let wav_data = make_wav_data(16000, 1, &vec![1i16; 1000]);
        let mut source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        source.stop().unwrap();
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn resample_doubles_8khz_with_midpoints() {
        assert_eq!(
            resample(&[0, 1000, 2000], 8000, 16000),
            vec![0, 500, 1000, 1500, 2000, 2000]
        );
        assert_eq!(resample(&[7, 8, 9], 16000, 16000), vec![7, 8, 9]);
    }

    #[test]
    fn resample_short_and_empty_input() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert_eq!(resample(&[100], 16000, 8000), vec![100]);
    }

    #[test]
    fn garbage_header_is_a_parse_error() {
        let result = WavAudioSource::from_reader(Box::new(Cursor::new(b"RIFX0000WAVE".to_vec())));
        match result {
            Err(LeadlineError::AudioCapture { message }) => {
                assert!(message.contains("Failed to parse WAV"), "{}", message);
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn test_open_missing_file() {
        let result = WavAudioSource::open(Path::new("/nonexistent/call.wav"));
        assert!(matches!(result, Err(LeadlineError::AudioCapture { .. })));
    }
}
