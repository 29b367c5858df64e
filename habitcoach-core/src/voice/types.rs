//! Audio clips submitted as user turns, and the result of one AI turn.

use serde::{Deserialize, Serialize};

use crate::dialogue::DialogueStep;
use crate::error::VoiceError;
use crate::goal::{CompletionVerdict, GoalRecord};

/// One recorded user utterance, already encoded for upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioClip {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub duration_secs: f32,
    /// Recognized text, when the host has a transcription of the recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl AudioClip {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>, duration_secs: f32) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            duration_secs,
            transcript: None,
        }
    }

    /// Encode mono f32 samples (-1.0 to 1.0) as a 16-bit WAV clip.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Result<Self, VoiceError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(|e| {
                VoiceError::UnsupportedFormat {
                    format: format!("WAV write error: {}", e),
                }
            })?;
            for sample in samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(value)
                    .map_err(|e| VoiceError::UnsupportedFormat {
                        format: format!("WAV sample write error: {}", e),
                    })?;
            }
            writer.finalize().map_err(|e| VoiceError::UnsupportedFormat {
                format: format!("WAV finalize error: {}", e),
            })?;
        }
        let duration_secs = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f32 / sample_rate as f32
        };
        Ok(Self::new(cursor.into_inner(), "audio/wav", duration_secs))
    }

    /// Wrap already-encoded WAV bytes, reading the duration from the header.
    pub fn from_wav_bytes(data: Vec<u8>) -> Result<Self, VoiceError> {
        let duration_secs = decode_wav_duration(&data)?;
        Ok(Self::new(data, "audio/wav", duration_secs))
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    /// Reject empty recordings and accidental taps shorter than `min_secs`.
    pub fn validate(&self, min_secs: f32) -> Result<(), VoiceError> {
        if self.data.is_empty() {
            return Err(VoiceError::EmptyAudio);
        }
        if self.duration_secs < min_secs {
            return Err(VoiceError::AudioTooShort {
                duration_secs: self.duration_secs,
                min_secs,
            });
        }
        Ok(())
    }
}

/// Duration in seconds of a WAV payload.
pub fn decode_wav_duration(data: &[u8]) -> Result<f32, VoiceError> {
    let reader = hound::WavReader::new(std::io::Cursor::new(data)).map_err(|e| {
        VoiceError::UnsupportedFormat {
            format: format!("WAV read error: {}", e),
        }
    })?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(0.0);
    }
    // duration() counts frames, so channels are already accounted for
    Ok(reader.duration() as f32 / spec.sample_rate as f32)
}

/// What one AI turn produced for the host to present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTurnResult {
    /// Reply text with the summary block removed.
    pub text: String,
    #[serde(skip)]
    pub audio_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub verdict: CompletionVerdict,
    pub step: DialogueStep,
    pub record: GoalRecord,
    /// The completion callback has already fired for this turn.
    pub completed: bool,
}

impl AiTurnResult {
    /// Audio must play before completion is settled.
    pub fn awaiting_playback(&self) -> bool {
        self.audio_data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples_duration() {
        let samples = vec![0.0f32; 16000];
        let clip = AudioClip::from_samples(&samples, 16000).unwrap();
        assert_eq!(clip.mime_type, "audio/wav");
        assert!((clip.duration_secs - 1.0).abs() < 1e-6);
        // 44-byte header plus two bytes per sample
        assert_eq!(clip.data.len(), 44 + 32000);
    }

    #[test]
    fn test_wav_duration_roundtrip() {
        let samples = vec![0.25f32; 4000];
        let clip = AudioClip::from_samples(&samples, 16000).unwrap();
        let decoded = AudioClip::from_wav_bytes(clip.data.clone()).unwrap();
        assert!((decoded.duration_secs - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_validate_short_clip() {
        let clip = AudioClip::from_samples(&vec![0.0f32; 4800], 16000).unwrap();
        match clip.validate(0.5) {
            Err(VoiceError::AudioTooShort {
                duration_secs,
                min_secs,
            }) => {
                assert!((duration_secs - 0.3).abs() < 1e-6);
                assert!((min_secs - 0.5).abs() < f32::EPSILON);
            }
            other => panic!("expected AudioTooShort, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_empty_clip() {
        let clip = AudioClip::new(Vec::new(), "audio/wav", 2.0);
        assert!(matches!(clip.validate(0.5), Err(VoiceError::EmptyAudio)));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_wav_duration(b"not a wav"),
            Err(VoiceError::UnsupportedFormat { .. })
        ));
    }
}
