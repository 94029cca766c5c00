// Sample-rate and channel conversion for device streams
//
// Devices rarely run at exactly 16kHz/24kHz mono, so capture and playback
// backends convert at the edge. Linear interpolation is enough for speech.

/// Streaming linear-interpolation resampler
///
/// Keeps the last input sample and the fractional read position between
/// calls so consecutive blocks join without a discontinuity.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    step: f64,
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Resample one block, appending output to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        if input.is_empty() {
            return;
        }

        // Virtual block: [carried sample] + input
        let carried = self.last.is_some() as usize;
        let total = input.len() + carried;
        let sample_at = |index: usize| -> f32 {
            match (self.last, index.checked_sub(carried)) {
                (Some(last), None) => last,
                (_, Some(i)) => input[i],
                (None, None) => 0.0,
            }
        };

        while self.position + 1.0 < total as f64 {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let a = sample_at(index);
            let b = sample_at(index + 1);
            out.push(a + (b - a) * frac);
            self.position += self.step;
        }

        // The last input sample becomes index 0 of the next block
        self.position -= (total - 1) as f64;
        self.last = input.last().copied();
    }

    /// Resample a complete buffer in one go
    ///
    /// Produces exactly `round(len * to / from)` samples.
    pub fn convert(from_rate: u32, to_rate: u32, input: &[f32]) -> Vec<f32> {
        let len = (input.len() as f64 * to_rate as f64 / from_rate.max(1) as f64).round() as usize;
        Self::convert_to_len(from_rate, to_rate, input, len)
    }

    /// Resample a complete buffer into exactly `len` samples
    ///
    /// Positions past the last input sample hold it, so the output covers the
    /// buffer's whole duration on the target clock.
    pub fn convert_to_len(from_rate: u32, to_rate: u32, input: &[f32], len: usize) -> Vec<f32> {
        if input.is_empty() {
            return vec![0.0; len];
        }

        if from_rate == to_rate && len == input.len() {
            return input.to_vec();
        }

        let step = from_rate as f64 / to_rate.max(1) as f64;
        let last = input.len() - 1;

        (0..len)
            .map(|i| {
                let position = i as f64 * step;
                let index = (position as usize).min(last);
                let frac = (position - index as f64).clamp(0.0, 1.0) as f32;
                let a = input[index];
                let b = input[(index + 1).min(last)];
                a + (b - a) * frac
            })
            .collect()
    }
}

/// Frames `(start, len)` on a `to_rate` clock covered by `input_len` samples
/// at `from_rate` that start playing at `start_time` seconds
///
/// Both ends are rounded from exact times, so a buffer placed at the previous
/// buffer's end time begins on the frame right after it.
pub fn frame_span(start_time: f64, input_len: usize, from_rate: u32, to_rate: u32) -> (u64, usize) {
    let start_time = start_time.max(0.0);
    let end_time = start_time + input_len as f64 / from_rate.max(1) as f64;
    let start = (start_time * to_rate as f64).round() as u64;
    let end = (end_time * to_rate as f64).round() as u64;
    (start, end.saturating_sub(start) as usize)
}

/// Average interleaved channels into mono
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
