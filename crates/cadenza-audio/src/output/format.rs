//! Device mix formats, sample-format classification and conversion.

/// Sub-format carried by an extensible format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFormat {
    Pcm,
    IeeeFloat,
    Other,
}

/// Format tag of a device mix format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    Pcm,
    IeeeFloat,
    /// Extensible descriptor; classification defers to `sub_format`.
    Extensible {
        sub_format: SubFormat,
        valid_bits: u16,
        channel_mask: u32,
    },
    Other(u16),
}

/// Shared-mode format reported by or requested from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixFormat {
    pub tag: FormatTag,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl MixFormat {
    /// Interleaved 32-bit float format with the given layout.
    pub const fn float32(sample_rate: u32, channels: u16) -> Self {
        Self {
            tag: FormatTag::IeeeFloat,
            channels,
            sample_rate,
            bits_per_sample: 32,
        }
    }

    /// Interleaved 16-bit integer format with the given layout.
    pub const fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            tag: FormatTag::Pcm,
            channels,
            sample_rate,
            bits_per_sample: 16,
        }
    }

    /// Extensible float32 request matching the device's rate, channel count
    /// and channel mask. `None` if the device format has no usable layout.
    pub fn float32_request(device: &Self) -> Option<Self> {
        if device.sample_rate == 0 || device.channels == 0 {
            return None;
        }
        let channel_mask = match device.tag {
            FormatTag::Extensible { channel_mask, .. } => channel_mask,
            _ => 0,
        };
        Some(Self {
            tag: FormatTag::Extensible {
                sub_format: SubFormat::IeeeFloat,
                valid_bits: 32,
                channel_mask,
            },
            channels: device.channels,
            sample_rate: device.sample_rate,
            bits_per_sample: 32,
        })
    }

    /// Bytes per interleaved frame.
    pub const fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn sample_format(&self) -> SampleFormat {
        detect_sample_format(Some(self))
    }
}

/// Render-path classification of a mix format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    Float32,
    Pcm16,
    /// Rendered as permanent silence.
    #[default]
    Unsupported,
}

/// Classify a mix format. A missing format is unsupported.
pub const fn detect_sample_format(format: Option<&MixFormat>) -> SampleFormat {
    let Some(format) = format else {
        return SampleFormat::Unsupported;
    };
    let bits = format.bits_per_sample;
    match format.tag {
        FormatTag::IeeeFloat if bits == 32 => SampleFormat::Float32,
        FormatTag::Pcm if bits == 16 => SampleFormat::Pcm16,
        FormatTag::Extensible {
            sub_format: SubFormat::IeeeFloat,
            ..
        } if bits == 32 => SampleFormat::Float32,
        FormatTag::Extensible {
            sub_format: SubFormat::Pcm,
            ..
        } if bits == 16 => SampleFormat::Pcm16,
        _ => SampleFormat::Unsupported,
    }
}

/// Convert float samples to 16-bit PCM: clamp to [-1, 1], scale by 32767,
/// truncate toward zero. Converts `min(input.len(), output.len())` samples.
pub fn convert_f32_to_i16(input: &[f32], output: &mut [i16]) {
    for (out, sample) in output.iter_mut().zip(input) {
        *out = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extensible(sub_format: SubFormat, bits: u16) -> MixFormat {
        MixFormat {
            tag: FormatTag::Extensible {
                sub_format,
                valid_bits: bits,
                channel_mask: 0x3,
            },
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: bits,
        }
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            (Some(MixFormat::float32(48_000, 2)), SampleFormat::Float32),
            (Some(MixFormat::pcm16(44_100, 2)), SampleFormat::Pcm16),
            (Some(extensible(SubFormat::IeeeFloat, 32)), SampleFormat::Float32),
            (Some(extensible(SubFormat::Pcm, 16)), SampleFormat::Pcm16),
            (Some(extensible(SubFormat::Pcm, 24)), SampleFormat::Unsupported),
            (Some(extensible(SubFormat::Other, 32)), SampleFormat::Unsupported),
            (None, SampleFormat::Unsupported),
        ];
        for (format, expected) in cases {
            assert_eq!(detect_sample_format(format.as_ref()), expected, "{format:?}");
        }
    }

    #[test]
    fn test_mismatched_bit_depth_unsupported() {
        let mut format = MixFormat::float32(48_000, 2);
        format.bits_per_sample = 64;
        assert_eq!(format.sample_format(), SampleFormat::Unsupported);

        let format = MixFormat {
            tag: FormatTag::Other(0x0002),
            ..MixFormat::pcm16(48_000, 2)
        };
        assert_eq!(format.sample_format(), SampleFormat::Unsupported);
    }

    #[test]
    fn test_pcm16_conversion_table() {
        let input = [1.0f32, -1.0, 0.5, -0.5, 1.5, -1.5];
        let mut output = [0i16; 6];
        convert_f32_to_i16(&input, &mut output);
        assert_eq!(output, [32767, -32767, 16383, -16383, 32767, -32767]);
    }

    #[test]
    fn test_float32_request_keeps_layout() {
        let device = extensible(SubFormat::Pcm, 16);
        let request = MixFormat::float32_request(&device).unwrap_or(device);
        assert_eq!(request.sample_format(), SampleFormat::Float32);
        assert_eq!(request.sample_rate, 48_000);
        assert_eq!(request.channels, 2);
        assert_eq!(request.block_align(), 8);
        assert!(matches!(
            request.tag,
            FormatTag::Extensible {
                channel_mask: 0x3,
                valid_bits: 32,
                ..
            }
        ));

        let plain = MixFormat::pcm16(44_100, 1);
        let request = MixFormat::float32_request(&plain);
        assert!(matches!(
            request.map(|f| f.tag),
            Some(FormatTag::Extensible { channel_mask: 0, .. })
        ));
    }

    #[test]
    fn test_float32_request_rejects_empty_layout() {
        assert!(MixFormat::float32_request(&MixFormat::float32(0, 2)).is_none());
        assert!(MixFormat::float32_request(&MixFormat::float32(48_000, 0)).is_none());
    }
}
